use crate::error::VkResult;
use crate::manifest::ExtensionProperties;
use crate::version::ApiVersion;

use super::{DriverDeviceCreateInfo, InstanceCreateInfo, InstanceProcResolver, ProcAddr};

/// A driver's own handle for a physical device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NativeHandle(pub u64);

/// A physical-device group as a driver reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeGroup {
  pub devices: Vec<NativeHandle>,
  pub subset_allocation: bool,
}

/// Global entry points of a loaded driver.
pub trait Icd: Send + Sync {
  fn enumerate_instance_extension_properties(&self) -> Result<Vec<ExtensionProperties>, VkResult>;

  /// Highest instance version the driver supports, if it reports one.
  fn enumerate_instance_version(&self) -> Option<ApiVersion> {
    None
  }

  fn create_instance(&self, info: &InstanceCreateInfo) -> Result<Box<dyn IcdInstance>, VkResult>;

  /// Global entry points (instance handle NULL).
  fn get_instance_proc_addr(&self, name: &str) -> Option<ProcAddr>;
}

/// A driver-side instance. Dropping it destroys the driver instance.
pub trait IcdInstance: InstanceProcResolver {
  fn enumerate_physical_devices(&self) -> Result<Vec<NativeHandle>, VkResult>;

  /// `None` when the driver has no group enumeration.
  fn enumerate_physical_device_groups(&self) -> Option<Result<Vec<NativeGroup>, VkResult>>;

  fn enumerate_device_extension_properties(&self, device: NativeHandle) -> Result<Vec<ExtensionProperties>, VkResult>;

  fn create_device(&self, device: NativeHandle, info: &DriverDeviceCreateInfo) -> Result<Box<dyn IcdDevice>, VkResult>;
}

/// A driver-side logical device. Dropping it destroys the device.
pub trait IcdDevice: Send + Sync {
  fn get_device_proc_addr(&self, name: &str) -> Option<ProcAddr>;
}
