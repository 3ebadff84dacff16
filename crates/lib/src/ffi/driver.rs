use std::ffi::{CString, c_void};
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::Arc;

use libloading::Library;
use tracing::{debug, trace};

use crate::consts::{
  GET_INSTANCE_PROC_ADDR_SYMBOL, ICD_GET_INSTANCE_PROC_ADDR_SYMBOL, ICD_GET_PHYSICAL_DEVICE_PROC_ADDR_SYMBOL,
  ICD_NEGOTIATE_SYMBOL,
};
use crate::dispatch::{
  DriverDeviceCreateInfo, DriverLibrary, Icd, IcdDevice, IcdInstance, InstanceCreateInfo, InstanceProcResolver,
  NativeGroup, NativeHandle, ProcAddr,
};
use crate::error::VkResult;
use crate::manifest::ExtensionProperties;
use crate::version::ApiVersion;

use super::info::{RawDeviceInfo, RawInstanceInfo};
use super::types::*;

/// A driver shared library opened with `libloading`.
#[derive(Debug)]
pub struct NativeDriverLibrary {
  path: PathBuf,
  library: Library,
}

impl NativeDriverLibrary {
  pub(super) fn new(path: &Path, library: Library) -> Self {
    Self {
      path: path.to_path_buf(),
      library,
    }
  }

  fn symbol<T: Copy>(&self, name: &str) -> Option<T> {
    // SAFETY: callers name exports whose ABI is `T`. The driver record keeps
    // this library open for as long as anything built from it is alive.
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

impl DriverLibrary for NativeDriverLibrary {
  fn negotiate_interface_version(&self, max_version: u32) -> Option<Result<u32, VkResult>> {
    let negotiate = self.symbol::<PFN_vk_icdNegotiateLoaderICDInterfaceVersion>(ICD_NEGOTIATE_SYMBOL)?;
    let mut version = max_version;
    // SAFETY: the driver writes its chosen version through the pointer.
    Some(check(unsafe { negotiate(&mut version) }).map(|()| version))
  }

  fn has_symbol(&self, symbol: &str) -> bool {
    // SAFETY: the symbol is only looked up, never called.
    unsafe { self.library.get::<*const c_void>(symbol.as_bytes()) }.is_ok()
  }

  fn icd(&self, interface_version: u32) -> Option<Arc<dyn Icd>> {
    let gipa = self
      .symbol::<PFN_vkGetInstanceProcAddr>(ICD_GET_INSTANCE_PROC_ADDR_SYMBOL)
      .or_else(|| self.symbol::<PFN_vkGetInstanceProcAddr>(GET_INSTANCE_PROC_ADDR_SYMBOL))?;
    let physical = if interface_version >= 4 {
      self.symbol::<PFN_GetPhysicalDeviceProcAddr>(ICD_GET_PHYSICAL_DEVICE_PROC_ADDR_SYMBOL)
    } else {
      None
    };
    debug!(library = %self.path.display(), interface_version, "driver entry points resolved");
    Some(Arc::new(NativeIcd { gipa, physical }))
  }
}

fn lookup(gipa: PFN_vkGetInstanceProcAddr, instance: VkInstance, name: &str) -> PFN_vkVoidFunction {
  let name = CString::new(name).ok()?;
  // SAFETY: `name` is NUL-terminated; `instance` is NULL or a live instance
  // created by this driver.
  unsafe { gipa(instance, name.as_ptr()) }
}

fn to_native(device: VkPhysicalDevice) -> NativeHandle {
  NativeHandle(device as usize as u64)
}

fn from_native(handle: NativeHandle) -> VkPhysicalDevice {
  handle.0 as usize as VkPhysicalDevice
}

fn to_extensions(raw: Vec<VkExtensionProperties>) -> Vec<ExtensionProperties> {
  raw.iter().filter_map(VkExtensionProperties::to_properties).collect()
}

/// Global entry points of a native driver.
struct NativeIcd {
  gipa: PFN_vkGetInstanceProcAddr,
  physical: Option<PFN_GetPhysicalDeviceProcAddr>,
}

impl Icd for NativeIcd {
  fn enumerate_instance_extension_properties(&self) -> Result<Vec<ExtensionProperties>, VkResult> {
    let entry = lookup(self.gipa, ptr::null_mut(), "vkEnumerateInstanceExtensionProperties")
      .ok_or(VkResult::ErrorInitializationFailed)?;
    // SAFETY: resolved for exactly this command.
    let enumerate_fn: PFN_vkEnumerateInstanceExtensionProperties = unsafe { cast(entry) };
    // SAFETY: the command follows the two-call protocol.
    let raw = unsafe {
      enumerate(VkExtensionProperties::default(), |count, out| {
        enumerate_fn(ptr::null(), count, out)
      })
    }?;
    Ok(to_extensions(raw))
  }

  fn enumerate_instance_version(&self) -> Option<ApiVersion> {
    let entry = lookup(self.gipa, ptr::null_mut(), "vkEnumerateInstanceVersion")?;
    // SAFETY: resolved for exactly this command.
    let version_fn: PFN_vkEnumerateInstanceVersion = unsafe { cast(entry) };
    let mut version = 0u32;
    // SAFETY: the driver writes one u32.
    check(unsafe { version_fn(&mut version) }).ok()?;
    Some(ApiVersion::from_raw(version))
  }

  fn create_instance(&self, info: &InstanceCreateInfo) -> Result<Box<dyn IcdInstance>, VkResult> {
    let entry = lookup(self.gipa, ptr::null_mut(), "vkCreateInstance").ok_or(VkResult::ErrorInitializationFailed)?;
    // SAFETY: resolved for exactly this command.
    let create_fn: PFN_vkCreateInstance = unsafe { cast(entry) };

    let raw = RawInstanceInfo::new(info)?;
    let create_info = raw.raw(ptr::null());

    let mut handle: VkInstance = ptr::null_mut();
    // SAFETY: `raw` owns everything `create_info` points to and outlives the call.
    check(unsafe { create_fn(&create_info, ptr::null(), &mut handle) })?;

    let destroy = lookup(self.gipa, handle, "vkDestroyInstance")
      // SAFETY: resolved for exactly this command.
      .map(|entry| unsafe { cast::<PFN_vkDestroyInstance>(entry) });
    Ok(Box::new(NativeIcdInstance {
      handle,
      gipa: self.gipa,
      physical: self.physical,
      destroy,
    }))
  }

  fn get_instance_proc_addr(&self, name: &str) -> Option<ProcAddr> {
    lookup(self.gipa, ptr::null_mut(), name).and_then(|entry| ProcAddr::new(entry as usize))
  }
}

struct NativeIcdInstance {
  handle: VkInstance,
  gipa: PFN_vkGetInstanceProcAddr,
  physical: Option<PFN_GetPhysicalDeviceProcAddr>,
  destroy: Option<PFN_vkDestroyInstance>,
}

// SAFETY: dispatchable handles may be used from any thread; the ABI requires
// drivers to synchronize access to the instance internally for the commands
// issued here.
unsafe impl Send for NativeIcdInstance {}
unsafe impl Sync for NativeIcdInstance {}

impl NativeIcdInstance {
  fn command<F: Copy>(&self, name: &str) -> Option<F> {
    // SAFETY: callers pick `F` to match `name`.
    lookup(self.gipa, self.handle, name).map(|entry| unsafe { cast::<F>(entry) })
  }
}

impl InstanceProcResolver for NativeIcdInstance {
  fn get_instance_proc_addr(&self, name: &str) -> Option<ProcAddr> {
    lookup(self.gipa, self.handle, name).and_then(|entry| ProcAddr::new(entry as usize))
  }

  fn get_physical_device_proc_addr(&self, name: &str) -> Option<ProcAddr> {
    let physical = self.physical?;
    let name = CString::new(name).ok()?;
    // SAFETY: `name` is NUL-terminated; the instance is live.
    let entry = unsafe { physical(self.handle, name.as_ptr()) }?;
    ProcAddr::new(entry as usize)
  }
}

impl IcdInstance for NativeIcdInstance {
  fn enumerate_physical_devices(&self) -> Result<Vec<NativeHandle>, VkResult> {
    let enumerate_fn = self
      .command::<PFN_vkEnumeratePhysicalDevices>("vkEnumeratePhysicalDevices")
      .ok_or(VkResult::ErrorInitializationFailed)?;
    // SAFETY: two-call protocol on a live instance.
    let devices = unsafe { enumerate(ptr::null_mut(), |count, out| enumerate_fn(self.handle, count, out)) }?;
    Ok(devices.into_iter().map(to_native).collect())
  }

  fn enumerate_physical_device_groups(&self) -> Option<Result<Vec<NativeGroup>, VkResult>> {
    let enumerate_fn = self
      .command::<PFN_vkEnumeratePhysicalDeviceGroups>("vkEnumeratePhysicalDeviceGroups")
      .or_else(|| self.command::<PFN_vkEnumeratePhysicalDeviceGroups>("vkEnumeratePhysicalDeviceGroupsKHR"))?;
    // SAFETY: two-call protocol on a live instance.
    let raw = unsafe {
      enumerate(VkPhysicalDeviceGroupProperties::default(), |count, out| {
        enumerate_fn(self.handle, count, out)
      })
    };
    Some(raw.map(|groups| {
      groups
        .iter()
        .map(|group| {
          let count = (group.physical_device_count as usize).min(group.physical_devices.len());
          NativeGroup {
            devices: group.physical_devices[..count].iter().copied().map(to_native).collect(),
            subset_allocation: group.subset_allocation != 0,
          }
        })
        .collect()
    }))
  }

  fn enumerate_device_extension_properties(&self, device: NativeHandle) -> Result<Vec<ExtensionProperties>, VkResult> {
    let enumerate_fn = self
      .command::<PFN_vkEnumerateDeviceExtensionProperties>("vkEnumerateDeviceExtensionProperties")
      .ok_or(VkResult::ErrorInitializationFailed)?;
    let physical = from_native(device);
    // SAFETY: two-call protocol on a device this instance reported.
    let raw = unsafe {
      enumerate(VkExtensionProperties::default(), |count, out| {
        enumerate_fn(physical, ptr::null(), count, out)
      })
    }?;
    Ok(to_extensions(raw))
  }

  fn create_device(&self, device: NativeHandle, info: &DriverDeviceCreateInfo) -> Result<Box<dyn IcdDevice>, VkResult> {
    let create_fn = self
      .command::<PFN_vkCreateDevice>("vkCreateDevice")
      .ok_or(VkResult::ErrorInitializationFailed)?;

    let group = info
      .device_group
      .as_ref()
      .map(|members| members.iter().copied().map(from_native).collect());
    let mut raw = RawDeviceInfo::new(&info.queues, &[], &info.enabled_extensions, group)?;
    let create_info = raw.raw(ptr::null());

    let mut handle: VkDevice = ptr::null_mut();
    // SAFETY: `raw` owns everything `create_info` points to and outlives the call.
    check(unsafe { create_fn(from_native(device), &create_info, ptr::null(), &mut handle) })?;

    let gdpa = self.command::<PFN_vkGetDeviceProcAddr>("vkGetDeviceProcAddr");
    let destroy = gdpa.and_then(|gdpa| {
      let name = CString::new("vkDestroyDevice").ok()?;
      // SAFETY: `handle` was just created by this driver.
      let entry = unsafe { gdpa(handle, name.as_ptr()) }?;
      // SAFETY: resolved for exactly this command.
      Some(unsafe { cast::<PFN_vkDestroyDevice>(entry) })
    });
    Ok(Box::new(NativeIcdDevice { handle, gdpa, destroy }))
  }
}

impl Drop for NativeIcdInstance {
  fn drop(&mut self) {
    if let Some(destroy) = self.destroy {
      // SAFETY: the instance is destroyed exactly once, after every device
      // created from it.
      unsafe { destroy(self.handle, ptr::null()) };
    }
  }
}

struct NativeIcdDevice {
  handle: VkDevice,
  gdpa: Option<PFN_vkGetDeviceProcAddr>,
  destroy: Option<PFN_vkDestroyDevice>,
}

// SAFETY: see `NativeIcdInstance`.
unsafe impl Send for NativeIcdDevice {}
unsafe impl Sync for NativeIcdDevice {}

impl IcdDevice for NativeIcdDevice {
  fn get_device_proc_addr(&self, name: &str) -> Option<ProcAddr> {
    let gdpa = self.gdpa?;
    let name = CString::new(name).ok()?;
    // SAFETY: `name` is NUL-terminated; the device is live.
    let entry = unsafe { gdpa(self.handle, name.as_ptr()) }?;
    ProcAddr::new(entry as usize)
  }
}

impl Drop for NativeIcdDevice {
  fn drop(&mut self) {
    if let Some(destroy) = self.destroy {
      // SAFETY: destroyed exactly once.
      unsafe { destroy(self.handle, ptr::null()) };
    }
  }
}
