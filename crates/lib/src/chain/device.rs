use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{debug, error, trace, warn};

use crate::activation::ActivationList;
use crate::devices::{DeviceRegistry, PhysicalDeviceHandle};
use crate::dispatch::{CreatedDevice, DeviceCreateInfo, DriverDeviceCreateInfo, NativeHandle, NextDevice, ProcAddr};
use crate::error::{LoaderError, try_reserve};
use crate::manifest::ExtensionProperties;
use crate::sync::lock;

use super::instance::{DriverInstance, InstanceChain};
use super::negotiate::LoadedLayer;

/// Everything of the owning instance a device chain is built from.
#[derive(Clone, Copy)]
pub struct DeviceChainContext<'a> {
  pub activation: &'a ActivationList,
  pub chain: &'a InstanceChain,
  pub drivers: &'a [DriverInstance],
  pub devices: &'a Mutex<DeviceRegistry>,
}

/// The layers of a device chain, outermost first. Only layers with device
/// entry points take part.
pub struct DeviceChain {
  links: Vec<LoadedLayer>,
  keep_loaded: bool,
}

impl fmt::Debug for DeviceChain {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_list().entries(&self.links).finish()
  }
}

impl DeviceChain {
  pub fn links(&self) -> &[LoadedLayer] {
    &self.links
  }

  /// The outermost layer that resolves `name`.
  pub fn get_device_proc_addr(&self, name: &str) -> Option<ProcAddr> {
    self
      .links
      .iter()
      .filter_map(|link| link.device.as_ref())
      .find_map(|layer| layer.get_device_proc_addr(name))
  }

  /// The outermost layer that resolves `name` for `created`, then the driver.
  /// Entry points a layer attached while creating the device win over its
  /// device-independent ones.
  pub fn get_created_device_proc_addr(&self, created: &CreatedDevice, name: &str) -> Option<ProcAddr> {
    resolve_created(&self.links, created, name)
  }
}

/// `links` are outermost first; `created.layers` holds the innermost
/// `links.len()` frames in reverse.
fn resolve_created(links: &[LoadedLayer], created: &CreatedDevice, name: &str) -> Option<ProcAddr> {
  let frames = created.layers.iter().rev().map(Some).chain(std::iter::repeat(None));
  links
    .iter()
    .zip(frames)
    .find_map(|(link, frame)| match frame.and_then(Option::as_ref) {
      Some(attached) => attached.get_device_proc_addr(name),
      None => link.device.as_ref()?.get_device_proc_addr(name),
    })
    .or_else(|| created.get_driver_device_proc_addr(name))
}

impl Drop for DeviceChain {
  fn drop(&mut self) {
    if self.keep_loaded {
      for link in &self.links {
        std::mem::forget(Arc::clone(&link.library));
      }
    }
  }
}

/// A successfully created device chain.
#[derive(Debug)]
pub struct BuiltDevice {
  pub chain: DeviceChain,
  pub created: CreatedDevice,
}

/// Create a logical device on `physical_device` through the instance's
/// layers. The physical device is pinned before the chain is called and
/// stays pinned until the caller unpins it; a failed creation releases it.
pub fn build_device_chain(
  ctx: DeviceChainContext<'_>,
  physical_device: PhysicalDeviceHandle,
  info: &DeviceCreateInfo,
) -> Result<BuiltDevice, LoaderError> {
  let (target, pin) = {
    let mut registry = lock(ctx.devices);
    let target = translate(&registry, physical_device, info)?;
    registry.pin(physical_device)?;
    (
      target,
      PinGuard {
        devices: ctx.devices,
        handle: physical_device,
      },
    )
  };
  let driver = driver_instance(ctx.drivers, target.driver_index)?;

  let supported = device_extensions(driver, target.native)?;
  for name in &info.enabled_extensions {
    if supported.iter().any(|e| e.name == *name) || ctx.activation.provides_device_extension(name) {
      continue;
    }
    error!(extension = %name, "requested device extension is not supported by the device or an enabled layer");
    return Err(LoaderError::extension_not_present(name.as_str()));
  }

  if !info.enabled_layers.is_empty() {
    let instance_layers: Vec<&str> = ctx.activation.app_list().iter().map(|l| l.name()).collect();
    if info.enabled_layers.iter().map(String::as_str).ne(instance_layers.iter().copied()) {
      warn!(
        requested = ?info.enabled_layers,
        "device layers are deprecated; using the instance's layers instead"
      );
    }
  }

  let mut links = Vec::new();
  try_reserve(&mut links, ctx.chain.links().len())?;
  links.extend(ctx.chain.links().iter().filter(|link| link.device.is_some()).cloned());

  let terminator = DeviceTerminator {
    drivers: ctx.drivers,
    devices: ctx.devices,
  };
  let next = DeviceNext {
    links: &links,
    terminator: &terminator,
  };
  let created = next.create_device(physical_device, info)?;

  pin.keep();
  debug!(driver = target.driver_index, layers = links.len(), "created device");

  Ok(BuiltDevice {
    chain: DeviceChain {
      links,
      keep_loaded: ctx.chain.keep_loaded(),
    },
    created,
  })
}

/// Releases the pin taken for a device creation that did not complete.
struct PinGuard<'a> {
  devices: &'a Mutex<DeviceRegistry>,
  handle: PhysicalDeviceHandle,
}

impl PinGuard<'_> {
  /// The device now holds the pin.
  fn keep(self) {
    std::mem::forget(self);
  }
}

impl Drop for PinGuard<'_> {
  fn drop(&mut self) {
    lock(self.devices).unpin(self.handle);
  }
}

/// A physical device and its device-group members as the driver knows them.
struct Translated {
  driver_index: usize,
  native: NativeHandle,
  group: Option<Vec<NativeHandle>>,
}

fn translate(
  registry: &DeviceRegistry,
  physical_device: PhysicalDeviceHandle,
  info: &DeviceCreateInfo,
) -> Result<Translated, LoaderError> {
  let (driver_index, native) = registry
    .native_of(physical_device)
    .ok_or_else(|| LoaderError::initialization_failed("unknown physical device"))?;

  let group = match &info.device_group {
    None => None,
    Some(members) => {
      let mut natives = Vec::new();
      try_reserve(&mut natives, members.len())?;
      for &member in members {
        match registry.native_of(member) {
          Some((index, member_native)) if index == driver_index => natives.push(member_native),
          Some(_) => {
            return Err(LoaderError::initialization_failed(
              "device group members belong to different drivers",
            ));
          }
          None => return Err(LoaderError::initialization_failed("unknown physical device in device group")),
        }
      }
      Some(natives)
    }
  };

  Ok(Translated {
    driver_index,
    native,
    group,
  })
}

fn driver_instance(drivers: &[DriverInstance], index: usize) -> Result<&DriverInstance, LoaderError> {
  drivers
    .iter()
    .find(|driver| driver.index == index)
    .ok_or_else(|| LoaderError::initialization_failed("physical device belongs to no driver of this instance"))
}

fn device_extensions(driver: &DriverInstance, native: NativeHandle) -> Result<Vec<ExtensionProperties>, LoaderError> {
  driver
    .instance()
    .enumerate_device_extension_properties(native)
    .map_err(LoaderError::from)
}

/// The part of a device chain below one layer.
struct DeviceNext<'a> {
  links: &'a [LoadedLayer],
  terminator: &'a DeviceTerminator<'a>,
}

impl NextDevice for DeviceNext<'_> {
  fn create_device(
    &self,
    physical_device: PhysicalDeviceHandle,
    info: &DeviceCreateInfo,
  ) -> Result<CreatedDevice, LoaderError> {
    let Some((link, rest)) = self.links.split_first() else {
      return self.terminator.create_device(physical_device, info);
    };
    let next = DeviceNext {
      links: rest,
      terminator: self.terminator,
    };
    let mut created = match &link.device {
      Some(layer) => {
        trace!(layer = %link.name(), "calling layer create_device");
        layer.create_device(physical_device, info, &next)?
      }
      None => next.create_device(physical_device, info)?,
    };
    created.finish_layer();
    Ok(created)
  }

  fn get_device_proc_addr(&self, name: &str) -> Option<ProcAddr> {
    self
      .links
      .iter()
      .filter_map(|link| link.device.as_ref())
      .find_map(|layer| layer.get_device_proc_addr(name))
  }

  fn get_created_device_proc_addr(&self, created: &CreatedDevice, name: &str) -> Option<ProcAddr> {
    resolve_created(self.links, created, name)
  }
}

/// Bottom of the device chain: translates handles and calls the driver.
struct DeviceTerminator<'a> {
  drivers: &'a [DriverInstance],
  devices: &'a Mutex<DeviceRegistry>,
}

impl DeviceTerminator<'_> {
  fn create_device(
    &self,
    physical_device: PhysicalDeviceHandle,
    info: &DeviceCreateInfo,
  ) -> Result<CreatedDevice, LoaderError> {
    let target = translate(&lock(self.devices), physical_device, info)?;
    let driver = driver_instance(self.drivers, target.driver_index)?;
    let supported = device_extensions(driver, target.native)?;
    let driver_info = DriverDeviceCreateInfo {
      queues: info.queues.clone(),
      enabled_extensions: info
        .enabled_extensions
        .iter()
        .filter(|name| supported.iter().any(|e| e.name == **name))
        .cloned()
        .collect(),
      device_group: target.group,
    };

    let device = driver
      .instance()
      .create_device(target.native, &driver_info)
      .map_err(LoaderError::from)?;
    Ok(CreatedDevice::new(device, target.driver_index))
  }
}
