//! Serde shapes of manifest JSON, before validation.
//!
//! Every field is optional here so that a missing field becomes a precise
//! validation error instead of a generic deserialization failure.

use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
pub(super) struct RawDocument {
  pub file_format_version: Option<String>,
  pub layer: Option<Value>,
  pub layers: Option<Vec<Value>>,
  #[serde(rename = "ICD")]
  pub icd: Option<Value>,
}

/// Numbers in manifests are written either as JSON numbers or as strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(super) enum NumberOrString {
  Number(u64),
  String(String),
}

impl NumberOrString {
  pub fn as_u32(&self) -> Option<u32> {
    match self {
      Self::Number(n) => u32::try_from(*n).ok(),
      Self::String(s) => s.trim().parse().ok(),
    }
  }
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct RawFunctions {
  #[serde(rename = "vkGetInstanceProcAddr")]
  pub get_instance_proc_addr: Option<String>,
  #[serde(rename = "vkGetDeviceProcAddr")]
  pub get_device_proc_addr: Option<String>,
  #[serde(rename = "vkNegotiateLoaderLayerInterfaceVersion")]
  pub negotiate_interface: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct RawExtension {
  pub name: Option<String>,
  pub spec_version: Option<NumberOrString>,
  #[serde(default)]
  pub entrypoints: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct RawLayer {
  pub name: Option<String>,
  #[serde(rename = "type")]
  pub type_: Option<String>,
  pub library_path: Option<String>,
  pub library_arch: Option<String>,
  pub component_layers: Option<Vec<String>>,
  pub api_version: Option<String>,
  pub implementation_version: Option<NumberOrString>,
  pub description: Option<String>,
  pub functions: Option<RawFunctions>,
  #[serde(default)]
  pub instance_extensions: Vec<RawExtension>,
  #[serde(default)]
  pub device_extensions: Vec<RawExtension>,
  pub enable_environment: Option<Map<String, Value>>,
  pub disable_environment: Option<Map<String, Value>>,
  pub expiration_date: Option<String>,
  #[serde(default)]
  pub override_paths: Vec<String>,
  #[serde(default)]
  pub blacklisted_layers: Vec<String>,
  #[serde(default)]
  pub app_keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct RawDriver {
  pub library_path: Option<String>,
  pub library_arch: Option<String>,
  pub api_version: Option<String>,
  #[serde(default)]
  pub is_portability_driver: bool,
}
