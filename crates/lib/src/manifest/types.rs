//! Validated manifest records.
//!
//! These are the structured results of parsing a manifest document. A
//! document describes either one driver ([`DriverManifest`]) or one or more
//! layers ([`LayerRecord`]).

use std::path::PathBuf;

use chrono::NaiveDateTime;

use crate::consts::OVERRIDE_LAYER_NAME;
use crate::settings::env_is_set;
use crate::version::{ApiVersion, ManifestVersion};

/// Whether a layer activates on its own or only when named.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerKind {
  Implicit,
  Explicit,
}

/// An extension name and its revision.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExtensionProperties {
  pub name: String,
  pub spec_version: u32,
}

impl ExtensionProperties {
  pub fn new(name: impl Into<String>, spec_version: u32) -> Self {
    Self {
      name: name.into(),
      spec_version,
    }
  }
}

/// A device extension declared by a layer, with the entry points it adds.
///
/// Extensions that only track state declare no entry points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceExtension {
  pub properties: ExtensionProperties,
  pub entrypoints: Vec<String>,
}

/// An environment variable name and the value it is compared against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvCondition {
  pub var: String,
  pub value: String,
}

impl EnvCondition {
  /// The variable exists, whatever its value.
  pub fn is_set(&self) -> bool {
    env_is_set(&self.var)
  }

  /// The variable exists and equals the expected value.
  pub fn matches(&self) -> bool {
    std::env::var(&self.var).is_ok_and(|v| v == self.value)
  }
}

/// What a layer provides: its own library, or other layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerBody {
  Library(PathBuf),
  Meta(Vec<String>),
}

/// Symbol names a layer's manifest substitutes for the defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerFunctions {
  pub get_instance_proc_addr: Option<String>,
  pub get_device_proc_addr: Option<String>,
  pub negotiate_interface: Option<String>,
}

/// A layer definition from a manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerRecord {
  pub name: String,
  pub kind: LayerKind,
  /// Highest API version the layer supports.
  pub api_version: ApiVersion,
  pub implementation_version: u32,
  pub description: String,
  pub body: LayerBody,
  pub functions: LayerFunctions,
  pub instance_extensions: Vec<ExtensionProperties>,
  pub device_extensions: Vec<DeviceExtension>,
  pub enable_environment: Option<EnvCondition>,
  pub disable_environment: Option<EnvCondition>,
  pub expiration: Option<NaiveDateTime>,
  pub override_paths: Vec<PathBuf>,
  pub blacklisted_layers: Vec<String>,
  pub app_keys: Vec<PathBuf>,
  pub manifest_path: PathBuf,
  pub file_format_version: ManifestVersion,
}

impl LayerRecord {
  pub fn is_meta(&self) -> bool {
    matches!(self.body, LayerBody::Meta(_))
  }

  pub fn is_implicit(&self) -> bool {
    self.kind == LayerKind::Implicit
  }

  /// The override layer is the implicit meta-layer with the reserved name.
  pub fn is_override(&self) -> bool {
    self.name == OVERRIDE_LAYER_NAME && self.is_implicit() && self.is_meta()
  }

  pub fn components(&self) -> &[String] {
    match &self.body {
      LayerBody::Meta(components) => components,
      LayerBody::Library(_) => &[],
    }
  }

  pub fn library_path(&self) -> Option<&PathBuf> {
    match &self.body {
      LayerBody::Library(path) => Some(path),
      LayerBody::Meta(_) => None,
    }
  }

  /// Whether the layer's expiration date lies before `now`.
  pub fn is_expired(&self, now: NaiveDateTime) -> bool {
    self.expiration.is_some_and(|expiration| expiration < now)
  }

  pub fn provides_instance_extension(&self, name: &str) -> bool {
    self.instance_extensions.iter().any(|e| e.name == name)
  }

  pub fn provides_device_extension(&self, name: &str) -> bool {
    self.device_extensions.iter().any(|e| e.properties.name == name)
  }
}

/// A driver definition from a manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverManifest {
  pub manifest_path: PathBuf,
  pub file_format_version: ManifestVersion,
  pub library_path: PathBuf,
  pub api_version: ApiVersion,
  pub is_portability_driver: bool,
}

/// The result of parsing one manifest document.
#[derive(Debug)]
pub enum ParsedManifest {
  /// Valid layer definitions plus the definitions that were skipped.
  Layers {
    layers: Vec<LayerRecord>,
    skipped: Vec<super::ManifestError>,
  },
  Driver(DriverManifest),
}
