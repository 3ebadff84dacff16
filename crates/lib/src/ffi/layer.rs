use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::{Arc, OnceLock};

use libloading::Library;
use tracing::{debug, trace};

use crate::devices::PhysicalDeviceHandle;
use crate::dispatch::{
  CreatedDevice, CreatedInstance, DeviceCreateInfo, DeviceLayer, DeviceProcResolver, InstanceCreateInfo, InstanceLayer,
  InstanceProcResolver, LayerLibrary, NegotiatedLayer, NextDevice, NextInstance, ProcAddr,
};
use crate::error::{LoaderError, VkResult};

use super::link::{self, LoaderObject};
use super::types::*;

/// A layer shared library opened with `libloading`.
#[derive(Debug)]
pub struct NativeLayerLibrary {
  // Before `library`: dropping the layer may call into it.
  layer: Arc<NativeLayer>,
  path: PathBuf,
  library: Library,
}

impl NativeLayerLibrary {
  pub(super) fn new(path: &Path, library: Library) -> Self {
    Self {
      layer: Arc::new(NativeLayer::new(path)),
      path: path.to_path_buf(),
      library,
    }
  }

  fn symbol<T: Copy>(&self, name: &str) -> Option<T> {
    // SAFETY: callers name exports whose ABI is `T`; the copied pointer is
    // only called while a chain link keeps this library open.
    let symbol = unsafe { self.library.get::<T>(name.as_bytes()) };
    match symbol {
      Ok(symbol) => Some(*symbol),
      Err(err) => {
        trace!(library = %self.path.display(), symbol = name, error = %err, "symbol not exported");
        None
      }
    }
  }
}

impl LayerLibrary for NativeLayerLibrary {
  fn negotiate_interface(&self, symbol: &str, loader_version: u32) -> Option<Result<NegotiatedLayer, VkResult>> {
    let negotiate = self.symbol::<PFN_vkNegotiateLoaderLayerInterfaceVersion>(symbol)?;
    let mut interface = VkNegotiateLayerInterface::new(loader_version);

    // SAFETY: `interface` is a valid, initialized negotiation struct.
    if let Err(code) = check(unsafe { negotiate(&mut interface) }) {
      return Some(Err(code));
    }

    if let Some(physical) = interface.pfn_get_physical_device_proc_addr {
      self.layer.set_physical(physical);
    }
    Some(Ok(NegotiatedLayer {
      interface_version: interface.loader_layer_interface_version,
      instance: interface
        .pfn_get_instance_proc_addr
        .map(|gipa| self.layer.with_instance_entry(gipa) as Arc<dyn InstanceLayer>),
      device: interface
        .pfn_get_device_proc_addr
        .map(|gdpa| self.layer.with_device_entry(gdpa) as Arc<dyn DeviceLayer>),
    }))
  }

  fn instance_entry(&self, symbol: &str) -> Option<Arc<dyn InstanceLayer>> {
    let gipa = self.symbol::<PFN_vkGetInstanceProcAddr>(symbol)?;
    Some(self.layer.with_instance_entry(gipa))
  }

  fn device_entry(&self, symbol: &str) -> Option<Arc<dyn DeviceLayer>> {
    let gdpa = self.symbol::<PFN_vkGetDeviceProcAddr>(symbol)?;
    Some(self.layer.with_device_entry(gdpa))
  }
}

/// The entry points of one native layer in one instance chain.
///
/// Until the layer has created its instance, lookups pass a NULL instance
/// and only resolve its global commands.
pub(super) struct NativeLayer {
  path: PathBuf,
  gipa: OnceLock<PFN_vkGetInstanceProcAddr>,
  gdpa: OnceLock<PFN_vkGetDeviceProcAddr>,
  physical: OnceLock<PFN_GetPhysicalDeviceProcAddr>,
  instance: OnceLock<LayerInstance>,
}

impl std::fmt::Debug for NativeLayer {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("NativeLayer")
      .field("path", &self.path)
      .field("created", &self.instance.get().is_some())
      .finish_non_exhaustive()
  }
}

/// The instance a native layer created, destroyed through the layer on drop.
struct LayerInstance {
  handle: usize,
  destroy: Option<PFN_vkDestroyInstance>,
  object: Box<LoaderObject>,
}

impl Drop for LayerInstance {
  fn drop(&mut self) {
    if let Some(destroy) = self.destroy {
      // SAFETY: the layer created `handle` and sees it destroyed once; its
      // call down the chain reaches a no-op.
      unsafe { destroy(self.handle as VkInstance, ptr::null()) };
    }
  }
}

fn lookup_instance(gipa: PFN_vkGetInstanceProcAddr, instance: VkInstance, name: &str) -> PFN_vkVoidFunction {
  let name = CString::new(name).ok()?;
  // SAFETY: `name` is NUL-terminated; `instance` is NULL or the layer's own.
  unsafe { gipa(instance, name.as_ptr()) }
}

fn lookup_device(gdpa: PFN_vkGetDeviceProcAddr, device: VkDevice, name: &str) -> PFN_vkVoidFunction {
  let name = CString::new(name).ok()?;
  // SAFETY: as above.
  unsafe { gdpa(device, name.as_ptr()) }
}

impl NativeLayer {
  pub(super) fn new(path: &Path) -> Self {
    Self {
      path: path.to_path_buf(),
      gipa: OnceLock::new(),
      gdpa: OnceLock::new(),
      physical: OnceLock::new(),
      instance: OnceLock::new(),
    }
  }

  pub(super) fn with_instance_entry(self: &Arc<Self>, gipa: PFN_vkGetInstanceProcAddr) -> Arc<Self> {
    let _ = self.gipa.set(gipa);
    Arc::clone(self)
  }

  pub(super) fn with_device_entry(self: &Arc<Self>, gdpa: PFN_vkGetDeviceProcAddr) -> Arc<Self> {
    let _ = self.gdpa.set(gdpa);
    Arc::clone(self)
  }

  pub(super) fn set_physical(&self, physical: PFN_GetPhysicalDeviceProcAddr) {
    let _ = self.physical.set(physical);
  }

  fn instance_handle(&self) -> VkInstance {
    self
      .instance
      .get()
      .map_or(ptr::null_mut(), |instance| instance.handle as VkInstance)
  }
}

impl InstanceProcResolver for NativeLayer {
  fn get_instance_proc_addr(&self, name: &str) -> Option<ProcAddr> {
    let gipa = *self.gipa.get()?;
    let entry = lookup_instance(gipa, self.instance_handle(), name)?;
    ProcAddr::new(entry as usize)
  }

  fn get_physical_device_proc_addr(&self, name: &str) -> Option<ProcAddr> {
    let physical = *self.physical.get()?;
    let name = CString::new(name).ok()?;
    // SAFETY: `name` is NUL-terminated; the instance is NULL or the layer's own.
    let entry = unsafe { physical(self.instance_handle(), name.as_ptr()) }?;
    ProcAddr::new(entry as usize)
  }
}

impl InstanceLayer for NativeLayer {
  fn create_instance(&self, info: &InstanceCreateInfo, next: &dyn NextInstance) -> Result<CreatedInstance, LoaderError> {
    let gipa = *self
      .gipa
      .get()
      .ok_or_else(|| LoaderError::initialization_failed("layer has no instance entry point"))?;
    let Some(entry) = lookup_instance(gipa, ptr::null_mut(), "vkCreateInstance") else {
      debug!(layer = %self.path.display(), "layer does not intercept vkCreateInstance; calling past it");
      return next.create_instance(info);
    };
    // SAFETY: resolved for exactly this command.
    let create: PFN_vkCreateInstance = unsafe { cast(entry) };

    let object = LoaderObject::dispatchable();
    let (handle, created) = link::create_instance(create, info, &object, next)?;
    let destroy = lookup_instance(gipa, handle, "vkDestroyInstance")
      // SAFETY: resolved for exactly this command.
      .map(|entry| unsafe { cast::<PFN_vkDestroyInstance>(entry) });
    trace!(layer = %self.path.display(), "layer created its instance");

    self
      .instance
      .set(LayerInstance {
        handle: handle as usize,
        destroy,
        object,
      })
      .map_err(|_| LoaderError::initialization_failed("layer is already linked into an instance"))?;
    Ok(created)
  }
}

impl DeviceProcResolver for NativeLayer {
  /// Device-independent entry points; see [`NativeLayerDevice`] for the
  /// ones resolved against a created device.
  fn get_device_proc_addr(&self, name: &str) -> Option<ProcAddr> {
    let gdpa = *self.gdpa.get()?;
    let entry = lookup_device(gdpa, ptr::null_mut(), name)?;
    ProcAddr::new(entry as usize)
  }
}

impl DeviceLayer for NativeLayer {
  fn create_device(
    &self,
    physical_device: PhysicalDeviceHandle,
    info: &DeviceCreateInfo,
    next: &dyn NextDevice,
  ) -> Result<CreatedDevice, LoaderError> {
    let (Some(&gipa), Some(&gdpa), Some(instance)) = (self.gipa.get(), self.gdpa.get(), self.instance.get()) else {
      debug!(layer = %self.path.display(), "layer has no instance of its own; calling past it");
      return next.create_device(physical_device, info);
    };
    let Some(entry) = lookup_instance(gipa, instance.handle as VkInstance, "vkCreateDevice") else {
      debug!(layer = %self.path.display(), "layer does not intercept vkCreateDevice; calling past it");
      return next.create_device(physical_device, info);
    };
    // SAFETY: resolved for exactly this command.
    let create: PFN_vkCreateDevice = unsafe { cast(entry) };

    let physical = LoaderObject::child_of(&instance.object);
    let object = LoaderObject::dispatchable();
    let (handle, mut created) = link::create_device(create, physical_device, &physical, info, &object, next)?;
    let destroy = lookup_device(gdpa, handle, "vkDestroyDevice")
      // SAFETY: resolved for exactly this command.
      .map(|entry| unsafe { cast::<PFN_vkDestroyDevice>(entry) });

    created.attach_layer_device(Box::new(NativeLayerDevice {
      handle: handle as usize,
      gdpa,
      destroy,
      _object: object,
      _physical: physical,
    }));
    Ok(created)
  }
}

/// A device a native layer created, destroyed through the layer on drop.
struct NativeLayerDevice {
  handle: usize,
  gdpa: PFN_vkGetDeviceProcAddr,
  destroy: Option<PFN_vkDestroyDevice>,
  _object: Box<LoaderObject>,
  _physical: Box<LoaderObject>,
}

impl DeviceProcResolver for NativeLayerDevice {
  fn get_device_proc_addr(&self, name: &str) -> Option<ProcAddr> {
    let entry = lookup_device(self.gdpa, self.handle as VkDevice, name)?;
    ProcAddr::new(entry as usize)
  }
}

impl Drop for NativeLayerDevice {
  fn drop(&mut self) {
    if let Some(destroy) = self.destroy {
      // SAFETY: destroyed exactly once; the layer's call down is a no-op.
      unsafe { destroy(self.handle as VkDevice, ptr::null()) };
    }
  }
}
