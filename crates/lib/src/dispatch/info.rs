use crate::version::ApiVersion;

use super::NativeHandle;
use crate::devices::PhysicalDeviceHandle;

/// Parameters of an instance creation call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceCreateInfo {
  pub application_name: Option<String>,
  pub application_version: u32,
  pub engine_name: Option<String>,
  pub engine_version: u32,
  /// Requested API version; 0 means 1.0.
  pub api_version: ApiVersion,
  pub enabled_layers: Vec<String>,
  pub enabled_extensions: Vec<String>,
  /// The application opts into portability drivers.
  pub enumerate_portability: bool,
}

impl InstanceCreateInfo {
  pub fn with_layers<I, S>(mut self, layers: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.enabled_layers = layers.into_iter().map(Into::into).collect();
    self
  }

  pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.enabled_extensions = extensions.into_iter().map(Into::into).collect();
    self
  }

  pub fn with_api_version(mut self, version: ApiVersion) -> Self {
    self.api_version = version;
    self
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueCreateInfo {
  pub family_index: u32,
  pub priorities: Vec<f32>,
}

/// Parameters of a device creation call, in loader handles.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceCreateInfo {
  pub queues: Vec<QueueCreateInfo>,
  /// Deprecated; ignored.
  pub enabled_layers: Vec<String>,
  pub enabled_extensions: Vec<String>,
  /// Physical devices of the device group to create the device over.
  pub device_group: Option<Vec<PhysicalDeviceHandle>>,
}

impl DeviceCreateInfo {
  pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.enabled_extensions = extensions.into_iter().map(Into::into).collect();
    self
  }
}

/// Device creation parameters as forwarded to a driver: native handles and
/// only the extensions the driver supports.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DriverDeviceCreateInfo {
  pub queues: Vec<QueueCreateInfo>,
  pub enabled_extensions: Vec<String>,
  pub device_group: Option<Vec<NativeHandle>>,
}
