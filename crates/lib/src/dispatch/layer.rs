use std::fmt;

use crate::chain::DriverInstance;
use crate::devices::PhysicalDeviceHandle;
use crate::error::LoaderError;

use super::{DeviceCreateInfo, DeviceProcResolver, IcdDevice, InstanceCreateInfo, InstanceProcResolver, ProcAddr};

/// The driver instances produced by a successful instance creation. Only the
/// chain's terminator can make one.
pub struct CreatedInstance {
  pub(crate) drivers: Vec<DriverInstance>,
}

impl CreatedInstance {
  /// Number of drivers that created an instance.
  pub fn driver_count(&self) -> usize {
    self.drivers.len()
  }
}

impl fmt::Debug for CreatedInstance {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CreatedInstance")
      .field("drivers", &self.drivers.len())
      .finish()
  }
}

/// A driver device produced by a successful device creation, plus the
/// per-device entry points layers attached on the way back up.
pub struct CreatedDevice {
  /// One entry per device layer the creation passed through, innermost first.
  pub(crate) layers: Vec<Option<Box<dyn DeviceProcResolver>>>,
  attached: Option<Box<dyn DeviceProcResolver>>,
  pub(crate) device: Box<dyn IcdDevice>,
  pub(crate) driver_index: usize,
}

impl CreatedDevice {
  pub(crate) fn new(device: Box<dyn IcdDevice>, driver_index: usize) -> Self {
    Self {
      layers: Vec::new(),
      attached: None,
      device,
      driver_index,
    }
  }

  /// Entry points the calling layer resolves against the device it just
  /// created. They take precedence over the layer's device-independent ones.
  pub fn attach_layer_device(&mut self, device: Box<dyn DeviceProcResolver>) {
    self.attached = Some(device);
  }

  /// Record the calling layer's frame; called by the chain once the layer returns.
  pub(crate) fn finish_layer(&mut self) {
    let attached = self.attached.take();
    self.layers.push(attached);
  }

  /// The driver's entry point for `name`.
  pub fn get_driver_device_proc_addr(&self, name: &str) -> Option<ProcAddr> {
    self.device.get_device_proc_addr(name)
  }
}

impl fmt::Debug for CreatedDevice {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CreatedDevice")
      .field("driver_index", &self.driver_index)
      .field("layers", &self.layers.len())
      .finish_non_exhaustive()
  }
}

/// The rest of the instance chain below a layer.
pub trait NextInstance {
  fn create_instance(&self, info: &InstanceCreateInfo) -> Result<CreatedInstance, LoaderError>;

  fn get_instance_proc_addr(&self, name: &str) -> Option<ProcAddr>;

  fn get_physical_device_proc_addr(&self, _name: &str) -> Option<ProcAddr> {
    None
  }
}

/// The rest of the device chain below a layer.
pub trait NextDevice {
  fn create_device(
    &self,
    physical_device: PhysicalDeviceHandle,
    info: &DeviceCreateInfo,
  ) -> Result<CreatedDevice, LoaderError>;

  fn get_device_proc_addr(&self, name: &str) -> Option<ProcAddr>;

  /// Resolve `name` below the calling layer once `created` exists, honouring
  /// the entry points inner layers attached to it.
  fn get_created_device_proc_addr(&self, created: &CreatedDevice, name: &str) -> Option<ProcAddr> {
    self
      .get_device_proc_addr(name)
      .or_else(|| created.get_driver_device_proc_addr(name))
  }
}

/// A layer's instance-level entry points.
///
/// `create_instance` may inspect or adjust the parameters; it must call
/// `next` to create anything.
pub trait InstanceLayer: InstanceProcResolver {
  fn create_instance(&self, info: &InstanceCreateInfo, next: &dyn NextInstance) -> Result<CreatedInstance, LoaderError> {
    next.create_instance(info)
  }
}

/// A layer's device-level entry points.
pub trait DeviceLayer: DeviceProcResolver {
  fn create_device(
    &self,
    physical_device: PhysicalDeviceHandle,
    info: &DeviceCreateInfo,
    next: &dyn NextDevice,
  ) -> Result<CreatedDevice, LoaderError> {
    next.create_device(physical_device, info)
  }
}
