//! Instances and devices handed to the application.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use tracing::debug;

use crate::activation::ActivationList;
use crate::chain::{DeviceChain, DeviceChainContext, InstanceChain, build_device_chain};
use crate::devices::{DeviceRegistry, PhysicalDeviceGroup, PhysicalDeviceHandle};
use crate::dispatch::{CreatedDevice, CreatedInstance, DeviceCreateInfo, IcdInstance, NativeHandle, ProcAddr};
use crate::driver::DriverSet;
use crate::error::LoaderError;
use crate::loader::LoaderShared;
use crate::manifest::ExtensionProperties;
use crate::sync::lock;
use crate::version::ApiVersion;

/// State shared between an instance and the devices created from it.
pub(crate) struct InstanceInner {
  // Drop order: wrappers, then driver instances, then layer libraries, then
  // the driver libraries held by the driver set.
  devices: Mutex<DeviceRegistry>,
  created: CreatedInstance,
  chain: InstanceChain,
  activation: ActivationList,
  api_version: ApiVersion,
  _drivers: Arc<DriverSet>,
}

impl InstanceInner {
  fn driver_instances(&self) -> Vec<(usize, &dyn IcdInstance)> {
    self
      .created
      .drivers
      .iter()
      .map(|driver| (driver.index(), driver.instance()))
      .collect()
  }

  fn chain_context(&self) -> DeviceChainContext<'_> {
    DeviceChainContext {
      activation: &self.activation,
      chain: &self.chain,
      drivers: &self.created.drivers,
      devices: &self.devices,
    }
  }
}

/// A live instance.
pub struct Instance {
  inner: Arc<InstanceInner>,
  loader: Weak<LoaderShared>,
  id: u64,
}

impl fmt::Debug for Instance {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Instance")
      .field("id", &self.id)
      .field("layers", &self.inner.chain.layer_names())
      .field("drivers", &self.inner.created.driver_count())
      .finish()
  }
}

impl Instance {
  #[allow(clippy::too_many_arguments)]
  pub(crate) fn new(
    id: u64,
    loader: Weak<LoaderShared>,
    created: CreatedInstance,
    chain: InstanceChain,
    activation: ActivationList,
    api_version: ApiVersion,
    drivers: Arc<DriverSet>,
    devices: DeviceRegistry,
  ) -> Self {
    Self {
      inner: Arc::new(InstanceInner {
        devices: Mutex::new(devices),
        created,
        chain,
        activation,
        api_version,
        _drivers: drivers,
      }),
      loader,
      id,
    }
  }

  pub fn id(&self) -> u64 {
    self.id
  }

  /// The layers this instance was created with.
  pub fn activation(&self) -> &ActivationList {
    &self.inner.activation
  }

  pub fn chain(&self) -> &InstanceChain {
    &self.inner.chain
  }

  /// The API version the application requested, 0 read as 1.0.
  pub fn api_version(&self) -> ApiVersion {
    self.inner.api_version
  }

  /// Number of drivers that created an instance.
  pub fn driver_count(&self) -> usize {
    self.inner.created.driver_count()
  }

  pub fn enumerate_physical_devices(&self) -> Result<Vec<PhysicalDeviceHandle>, LoaderError> {
    let drivers = self.inner.driver_instances();
    lock(&self.inner.devices).enumerate_physical_devices(&drivers)
  }

  pub fn enumerate_physical_device_groups(&self) -> Result<Vec<PhysicalDeviceGroup>, LoaderError> {
    let drivers = self.inner.driver_instances();
    lock(&self.inner.devices).enumerate_physical_device_groups(&drivers)
  }

  /// Device extensions of a physical device's driver, or of the named
  /// activated layer.
  pub fn enumerate_device_extension_properties(
    &self,
    physical_device: PhysicalDeviceHandle,
    layer: Option<&str>,
  ) -> Result<Vec<ExtensionProperties>, LoaderError> {
    if let Some(name) = layer {
      let activated = self
        .inner
        .activation
        .get(name)
        .ok_or_else(|| LoaderError::layer_not_present(name))?;
      return Ok(
        activated
          .layer
          .device_extensions
          .iter()
          .map(|e| e.properties.clone())
          .collect(),
      );
    }

    let (driver_index, native) = self
      .native_of(physical_device)
      .ok_or_else(|| LoaderError::initialization_failed("unknown physical device"))?;
    let driver = self
      .inner
      .created
      .drivers
      .iter()
      .find(|driver| driver.index() == driver_index)
      .ok_or_else(|| LoaderError::initialization_failed("physical device belongs to no driver of this instance"))?;
    driver
      .instance()
      .enumerate_device_extension_properties(native)
      .map_err(LoaderError::from)
  }

  /// Create a logical device. `info` is never modified; device-group members
  /// are translated to driver handles on the way down.
  pub fn create_device(&self, physical_device: PhysicalDeviceHandle, info: &DeviceCreateInfo) -> Result<Device, LoaderError> {
    let built = build_device_chain(self.inner.chain_context(), physical_device, info)?;
    Ok(Device {
      created: Some(built.created),
      chain: built.chain,
      physical_device,
      instance: Arc::clone(&self.inner),
    })
  }

  /// Resolve an instance entry point through the layers, then the drivers.
  pub fn get_instance_proc_addr(&self, name: &str) -> Option<ProcAddr> {
    self.inner.chain.get_instance_proc_addr(name).or_else(|| {
      self
        .inner
        .created
        .drivers
        .iter()
        .find_map(|driver| driver.instance().get_instance_proc_addr(name))
    })
  }

  /// Resolve a physical-device entry point unknown to the loader.
  pub fn get_physical_device_proc_addr(&self, name: &str) -> Option<ProcAddr> {
    self.inner.chain.get_physical_device_proc_addr(name).or_else(|| {
      self
        .inner
        .created
        .drivers
        .iter()
        .find_map(|driver| driver.instance().get_physical_device_proc_addr(name))
    })
  }

  /// The driver index and native handle behind a physical device.
  pub fn native_of(&self, physical_device: PhysicalDeviceHandle) -> Option<(usize, NativeHandle)> {
    lock(&self.inner.devices).native_of(physical_device)
  }

  /// The physical device wrapping a driver's native handle.
  pub fn wrapper_of(&self, driver_index: usize, native: NativeHandle) -> Option<PhysicalDeviceHandle> {
    lock(&self.inner.devices).wrapper_of(driver_index, native)
  }
}

impl Drop for Instance {
  fn drop(&mut self) {
    if let Some(loader) = self.loader.upgrade() {
      loader.unregister(self.id);
    }
    debug!(instance = self.id, "destroyed instance");
  }
}

/// A live logical device. Keeps its instance's driver state alive.
pub struct Device {
  // Option so the driver device is destroyed before the wrapper is unpinned.
  created: Option<CreatedDevice>,
  chain: DeviceChain,
  physical_device: PhysicalDeviceHandle,
  instance: Arc<InstanceInner>,
}

impl fmt::Debug for Device {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Device")
      .field("physical_device", &self.physical_device)
      .field("driver", &self.driver_index())
      .field("chain", &self.chain)
      .finish()
  }
}

impl Device {
  pub fn physical_device(&self) -> PhysicalDeviceHandle {
    self.physical_device
  }

  pub fn chain(&self) -> &DeviceChain {
    &self.chain
  }

  /// Index of the driver that created the device.
  pub fn driver_index(&self) -> Option<usize> {
    self.created.as_ref().map(|created| created.driver_index)
  }

  /// Resolve a device entry point through the layers, then the driver.
  pub fn get_device_proc_addr(&self, name: &str) -> Option<ProcAddr> {
    match &self.created {
      Some(created) => self.chain.get_created_device_proc_addr(created, name),
      None => self.chain.get_device_proc_addr(name),
    }
  }
}

impl Drop for Device {
  fn drop(&mut self) {
    self.created.take();
    lock(&self.instance.devices).unpin(self.physical_device);
  }
}
