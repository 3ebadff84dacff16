//! Linking native layers into a chain.
//!
//! A native layer's `vkCreateInstance`/`vkCreateDevice` is called with a
//! loader create info in its `pNext` chain whose link names the loader's
//! trampolines below as the next proc-addr functions. The trampolines hand
//! calls back to the rest of the chain, which is found through a
//! thread-local set for the duration of the layer's create call.

use std::cell::{Cell, RefCell};
use std::ffi::{c_char, c_void};
use std::ptr;
use std::thread::LocalKey;

use tracing::{trace, warn};

use crate::devices::PhysicalDeviceHandle;
use crate::dispatch::{CreatedDevice, CreatedInstance, DeviceCreateInfo, InstanceCreateInfo, NextDevice, NextInstance, ProcAddr};
use crate::error::{LoaderError, VkResult};

use super::info::{RawDeviceInfo, RawInstanceInfo, device_info_from_raw, instance_info_from_raw, read_name};
use super::types::*;

/// Memory behind a dispatchable handle the loader gives a layer. Layers key
/// their state on the first word, which an instance shares with its
/// physical devices.
#[repr(C)]
#[derive(Debug)]
pub(super) struct LoaderObject {
  key: usize,
}

impl LoaderObject {
  /// An object keyed on its own address.
  pub fn dispatchable() -> Box<Self> {
    let mut object = Box::new(Self { key: 0 });
    object.key = object.as_ref() as *const Self as usize;
    object
  }

  /// An object sharing `parent`'s key.
  pub fn child_of(parent: &LoaderObject) -> Box<Self> {
    Box::new(Self { key: parent.key })
  }

  pub fn handle(&self) -> *mut c_void {
    self as *const Self as *mut c_void
  }
}

struct InstanceCall<'a> {
  next: &'a dyn NextInstance,
  handle: VkInstance,
  result: RefCell<Option<Result<CreatedInstance, LoaderError>>>,
}

struct DeviceCall<'a> {
  next: &'a dyn NextDevice,
  physical_device: PhysicalDeviceHandle,
  info: &'a DeviceCreateInfo,
  handle: VkDevice,
  result: RefCell<Option<Result<CreatedDevice, LoaderError>>>,
}

thread_local! {
  static INSTANCE_CALL: Cell<*const c_void> = const { Cell::new(ptr::null()) };
  static DEVICE_CALL: Cell<*const c_void> = const { Cell::new(ptr::null()) };
}

/// Publishes a call for the trampolines; restores the outer one on drop.
struct CallScope {
  key: &'static LocalKey<Cell<*const c_void>>,
  previous: *const c_void,
}

impl CallScope {
  fn enter<T>(key: &'static LocalKey<Cell<*const c_void>>, call: &T) -> Self {
    let previous = key.replace(call as *const T as *const c_void);
    Self { key, previous }
  }
}

impl Drop for CallScope {
  fn drop(&mut self) {
    self.key.set(self.previous);
  }
}

/// # Safety
///
/// Only valid inside the `CallScope` that published the call, which is the
/// layer's create call the trampolines run in.
unsafe fn current<'a, T>(key: &'static LocalKey<Cell<*const c_void>>) -> Option<&'a T> {
  let call = key.get();
  // SAFETY: the scope that stored the pointer is still on the stack.
  (!call.is_null()).then(|| unsafe { &*(call as *const T) })
}

fn to_void(addr: ProcAddr) -> PFN_vkVoidFunction {
  // SAFETY: a `ProcAddr` is a non-NULL entry point address.
  Some(unsafe { std::mem::transmute::<usize, unsafe extern "system" fn()>(addr.addr()) })
}

/// Resolve `name` under the layer that is being created.
unsafe extern "system" fn next_get_instance_proc_addr(_instance: VkInstance, name: *const c_char) -> PFN_vkVoidFunction {
  // SAFETY: callers pass a NUL-terminated name.
  let name = unsafe { read_name(name) }?;
  // SAFETY: the trampolines are `extern "system"` functions.
  unsafe {
    match name {
      "vkGetInstanceProcAddr" => return erase(next_get_instance_proc_addr as PFN_vkGetInstanceProcAddr),
      "vkCreateInstance" => return erase(next_create_instance as PFN_vkCreateInstance),
      "vkDestroyInstance" => return erase(next_destroy_instance as PFN_vkDestroyInstance),
      "vkCreateDevice" => return erase(next_create_device as PFN_vkCreateDevice),
      _ => {}
    }
  }
  // SAFETY: called from inside the layer's create call.
  let Some(call) = (unsafe { current::<InstanceCall<'_>>(&INSTANCE_CALL) }) else {
    trace!(command = name, "next-link lookup outside instance creation");
    return None;
  };
  call.next.get_instance_proc_addr(name).and_then(to_void)
}

unsafe extern "system" fn next_get_physical_device_proc_addr(
  _instance: VkInstance,
  name: *const c_char,
) -> PFN_vkVoidFunction {
  // SAFETY: callers pass a NUL-terminated name.
  let name = unsafe { read_name(name) }?;
  // SAFETY: called from inside the layer's create call.
  let call = unsafe { current::<InstanceCall<'_>>(&INSTANCE_CALL) }?;
  call.next.get_physical_device_proc_addr(name).and_then(to_void)
}

unsafe extern "system" fn next_create_instance(
  info: *const VkInstanceCreateInfo,
  _allocator: *const c_void,
  out: *mut VkInstance,
) -> i32 {
  // SAFETY: called from inside the layer's create call.
  let Some(call) = (unsafe { current::<InstanceCall<'_>>(&INSTANCE_CALL) }) else {
    warn!("layer called down the instance chain outside instance creation");
    return VkResult::ErrorInitializationFailed.as_raw();
  };
  // SAFETY: the layer forwards a valid create info.
  let Some(info) = (unsafe { info.as_ref() }).and_then(|info| unsafe { instance_info_from_raw(info) }) else {
    warn!("layer passed an unreadable instance create info down the chain");
    return VkResult::ErrorInitializationFailed.as_raw();
  };

  let result = call.next.create_instance(&info);
  let code = match &result {
    Ok(_) => {
      if !out.is_null() {
        // SAFETY: the layer forwards the application's output pointer.
        unsafe { *out = call.handle };
      }
      VkResult::Success
    }
    Err(err) => err.result(),
  };
  *call.result.borrow_mut() = Some(result);
  code.as_raw()
}

/// Driver instances belong to the loader, which destroys them itself.
unsafe extern "system" fn next_destroy_instance(_instance: VkInstance, _allocator: *const c_void) {}

unsafe extern "system" fn next_get_device_proc_addr(_device: VkDevice, name: *const c_char) -> PFN_vkVoidFunction {
  // SAFETY: callers pass a NUL-terminated name.
  let name = unsafe { read_name(name) }?;
  // SAFETY: the trampolines are `extern "system"` functions.
  unsafe {
    match name {
      "vkGetDeviceProcAddr" => return erase(next_get_device_proc_addr as PFN_vkGetDeviceProcAddr),
      "vkDestroyDevice" => return erase(next_destroy_device as PFN_vkDestroyDevice),
      _ => {}
    }
  }
  // SAFETY: called from inside the layer's create call.
  let Some(call) = (unsafe { current::<DeviceCall<'_>>(&DEVICE_CALL) }) else {
    trace!(command = name, "next-link lookup outside device creation");
    return None;
  };
  let result = call.result.try_borrow().ok()?;
  let addr = match result.as_ref() {
    Some(Ok(created)) => call.next.get_created_device_proc_addr(created, name),
    _ => call.next.get_device_proc_addr(name),
  };
  addr.and_then(to_void)
}

unsafe extern "system" fn next_create_device(
  _physical_device: VkPhysicalDevice,
  info: *const VkDeviceCreateInfo,
  _allocator: *const c_void,
  out: *mut VkDevice,
) -> i32 {
  // SAFETY: called from inside the layer's create call.
  let Some(call) = (unsafe { current::<DeviceCall<'_>>(&DEVICE_CALL) }) else {
    warn!("layer called down the device chain outside device creation");
    return VkResult::ErrorInitializationFailed.as_raw();
  };
  // SAFETY: the layer forwards a valid create info.
  let Some(parts) = (unsafe { info.as_ref() }).and_then(|info| unsafe { device_info_from_raw(info) }) else {
    warn!("layer passed an unreadable device create info down the chain");
    return VkResult::ErrorInitializationFailed.as_raw();
  };
  // Group members stay loader handles; the terminator translates them.
  let info = DeviceCreateInfo {
    queues: parts.queues,
    enabled_layers: parts.layers,
    enabled_extensions: parts.extensions,
    device_group: call.info.device_group.clone(),
  };

  let result = call.next.create_device(call.physical_device, &info);
  let code = match &result {
    Ok(_) => {
      if !out.is_null() {
        // SAFETY: the layer forwards the application's output pointer.
        unsafe { *out = call.handle };
      }
      VkResult::Success
    }
    Err(err) => err.result(),
  };
  *call.result.borrow_mut() = Some(result);
  code.as_raw()
}

unsafe extern "system" fn next_destroy_device(_device: VkDevice, _allocator: *const c_void) {}

/// Combine a layer's return code with what the chain below produced.
fn finish<T>(code: i32, below: Option<Result<T, LoaderError>>) -> Result<T, LoaderError> {
  match (check(code), below) {
    (Ok(()), Some(Ok(created))) => Ok(created),
    (_, Some(Err(err))) => Err(err),
    (Err(code), _) => Err(LoaderError::from(code)),
    (Ok(()), None) => Err(LoaderError::initialization_failed("layer did not call down the chain")),
  }
}

/// Call a layer's `vkCreateInstance` with a link to `next`. Returns the
/// handle the layer reported and what the chain below created.
pub(super) fn create_instance(
  create: PFN_vkCreateInstance,
  info: &InstanceCreateInfo,
  object: &LoaderObject,
  next: &dyn NextInstance,
) -> Result<(VkInstance, CreatedInstance), LoaderError> {
  let raw = RawInstanceInfo::new(info)?;
  let mut link = VkLayerInstanceLink {
    p_next: ptr::null_mut(),
    pfn_next_get_instance_proc_addr: next_get_instance_proc_addr,
    pfn_next_get_physical_device_proc_addr: Some(next_get_physical_device_proc_addr),
  };
  let mut link_info = VkLayerInstanceCreateInfo::link(ptr::null(), &mut link);
  let create_info = raw.raw(&mut link_info as *mut VkLayerInstanceCreateInfo as *const c_void);

  let call = InstanceCall {
    next,
    handle: object.handle(),
    result: RefCell::new(None),
  };
  let mut handle: VkInstance = ptr::null_mut();
  let code = {
    let _scope = CallScope::enter(&INSTANCE_CALL, &call);
    // SAFETY: `raw`, `link` and `link_info` outlive the call; the layer may
    // advance `link_info.p_layer_info`, which is why it is mutable.
    unsafe { create(&create_info, ptr::null(), &mut handle) }
  };
  finish(code, call.result.into_inner()).map(|created| (handle, created))
}

/// Call a layer's `vkCreateDevice` with a link to `next`.
pub(super) fn create_device(
  create: PFN_vkCreateDevice,
  physical_device: PhysicalDeviceHandle,
  physical_object: &LoaderObject,
  info: &DeviceCreateInfo,
  object: &LoaderObject,
  next: &dyn NextDevice,
) -> Result<(VkDevice, CreatedDevice), LoaderError> {
  let mut raw = RawDeviceInfo::new(&info.queues, &info.enabled_layers, &info.enabled_extensions, None)?;
  let mut link = VkLayerDeviceLink {
    p_next: ptr::null_mut(),
    pfn_next_get_instance_proc_addr: next_get_instance_proc_addr,
    pfn_next_get_device_proc_addr: next_get_device_proc_addr,
  };
  let mut link_info = VkLayerDeviceCreateInfo::link(ptr::null(), &mut link);
  let create_info = raw.raw(&mut link_info as *mut VkLayerDeviceCreateInfo as *const c_void);

  let call = DeviceCall {
    next,
    physical_device,
    info,
    handle: object.handle(),
    result: RefCell::new(None),
  };
  let mut handle: VkDevice = ptr::null_mut();
  let code = {
    let _scope = CallScope::enter(&DEVICE_CALL, &call);
    // SAFETY: as for instances.
    unsafe { create(physical_object.handle(), &create_info, ptr::null(), &mut handle) }
  };
  finish(code, call.result.into_inner()).map(|created| (handle, created))
}
