//! `repr(C)` structures and function pointer types of the driver and layer ABI.

#![allow(non_camel_case_types)]

use std::ffi::{CStr, c_char, c_void};
use std::ptr;

use crate::consts::{MAX_DEVICE_GROUP_SIZE, MAX_NAME_SIZE};
use crate::error::VkResult;
use crate::manifest::ExtensionProperties;

pub type VkInstance = *mut c_void;
pub type VkPhysicalDevice = *mut c_void;
pub type VkDevice = *mut c_void;

pub type PFN_vkVoidFunction = Option<unsafe extern "system" fn()>;
pub type PFN_vkGetInstanceProcAddr = unsafe extern "system" fn(VkInstance, *const c_char) -> PFN_vkVoidFunction;
pub type PFN_vkGetDeviceProcAddr = unsafe extern "system" fn(VkDevice, *const c_char) -> PFN_vkVoidFunction;
pub type PFN_GetPhysicalDeviceProcAddr = unsafe extern "system" fn(VkInstance, *const c_char) -> PFN_vkVoidFunction;
pub type PFN_vkNegotiateLoaderLayerInterfaceVersion = unsafe extern "system" fn(*mut VkNegotiateLayerInterface) -> i32;
pub type PFN_vk_icdNegotiateLoaderICDInterfaceVersion = unsafe extern "system" fn(*mut u32) -> i32;

pub type PFN_vkEnumerateInstanceExtensionProperties =
  unsafe extern "system" fn(*const c_char, *mut u32, *mut VkExtensionProperties) -> i32;
pub type PFN_vkEnumerateInstanceVersion = unsafe extern "system" fn(*mut u32) -> i32;
pub type PFN_vkCreateInstance =
  unsafe extern "system" fn(*const VkInstanceCreateInfo, *const c_void, *mut VkInstance) -> i32;
pub type PFN_vkDestroyInstance = unsafe extern "system" fn(VkInstance, *const c_void);
pub type PFN_vkEnumeratePhysicalDevices = unsafe extern "system" fn(VkInstance, *mut u32, *mut VkPhysicalDevice) -> i32;
pub type PFN_vkEnumeratePhysicalDeviceGroups =
  unsafe extern "system" fn(VkInstance, *mut u32, *mut VkPhysicalDeviceGroupProperties) -> i32;
pub type PFN_vkEnumerateDeviceExtensionProperties =
  unsafe extern "system" fn(VkPhysicalDevice, *const c_char, *mut u32, *mut VkExtensionProperties) -> i32;
pub type PFN_vkCreateDevice =
  unsafe extern "system" fn(VkPhysicalDevice, *const VkDeviceCreateInfo, *const c_void, *mut VkDevice) -> i32;
pub type PFN_vkDestroyDevice = unsafe extern "system" fn(VkDevice, *const c_void);

pub const STRUCTURE_TYPE_APPLICATION_INFO: u32 = 0;
pub const STRUCTURE_TYPE_INSTANCE_CREATE_INFO: u32 = 1;
pub const STRUCTURE_TYPE_DEVICE_QUEUE_CREATE_INFO: u32 = 2;
pub const STRUCTURE_TYPE_DEVICE_CREATE_INFO: u32 = 3;
pub const STRUCTURE_TYPE_PHYSICAL_DEVICE_GROUP_PROPERTIES: u32 = 1000070000;
pub const STRUCTURE_TYPE_DEVICE_GROUP_DEVICE_CREATE_INFO: u32 = 1000070001;
pub const STRUCTURE_TYPE_LOADER_INSTANCE_CREATE_INFO: u32 = 47;
pub const STRUCTURE_TYPE_LOADER_DEVICE_CREATE_INFO: u32 = 48;

/// `function` of a loader create info that carries the layer link.
pub const LAYER_LINK_INFO: u32 = 0;

/// `sType` of [`VkNegotiateLayerInterface`].
pub const LAYER_NEGOTIATE_INTERFACE_STRUCT: u32 = 1;

pub const INSTANCE_CREATE_ENUMERATE_PORTABILITY_BIT: u32 = 0x1;

#[repr(C)]
#[derive(Debug)]
pub struct VkNegotiateLayerInterface {
  pub s_type: u32,
  pub p_next: *mut c_void,
  pub loader_layer_interface_version: u32,
  pub pfn_get_instance_proc_addr: Option<PFN_vkGetInstanceProcAddr>,
  pub pfn_get_device_proc_addr: Option<PFN_vkGetDeviceProcAddr>,
  pub pfn_get_physical_device_proc_addr: Option<PFN_GetPhysicalDeviceProcAddr>,
}

impl VkNegotiateLayerInterface {
  pub fn new(loader_version: u32) -> Self {
    Self {
      s_type: LAYER_NEGOTIATE_INTERFACE_STRUCT,
      p_next: ptr::null_mut(),
      loader_layer_interface_version: loader_version,
      pfn_get_instance_proc_addr: None,
      pfn_get_device_proc_addr: None,
      pfn_get_physical_device_proc_addr: None,
    }
  }
}

/// One step of the instance chain as a layer sees it: where to forward.
#[repr(C)]
#[derive(Debug)]
pub struct VkLayerInstanceLink {
  pub p_next: *mut VkLayerInstanceLink,
  pub pfn_next_get_instance_proc_addr: PFN_vkGetInstanceProcAddr,
  pub pfn_next_get_physical_device_proc_addr: Option<PFN_GetPhysicalDeviceProcAddr>,
}

/// Loader entry in the `pNext` chain of an instance create info. A layer
/// takes its link from `p_layer_info` and advances it before calling down.
#[repr(C)]
#[derive(Debug)]
pub struct VkLayerInstanceCreateInfo {
  pub s_type: u32,
  pub p_next: *const c_void,
  pub function: u32,
  pub p_layer_info: *mut VkLayerInstanceLink,
  /// Rest of the union, whose largest member is two pointers.
  pub union_tail: *const c_void,
}

impl VkLayerInstanceCreateInfo {
  pub fn link(p_next: *const c_void, link: *mut VkLayerInstanceLink) -> Self {
    Self {
      s_type: STRUCTURE_TYPE_LOADER_INSTANCE_CREATE_INFO,
      p_next,
      function: LAYER_LINK_INFO,
      p_layer_info: link,
      union_tail: ptr::null(),
    }
  }
}

#[repr(C)]
#[derive(Debug)]
pub struct VkLayerDeviceLink {
  pub p_next: *mut VkLayerDeviceLink,
  pub pfn_next_get_instance_proc_addr: PFN_vkGetInstanceProcAddr,
  pub pfn_next_get_device_proc_addr: PFN_vkGetDeviceProcAddr,
}

#[repr(C)]
#[derive(Debug)]
pub struct VkLayerDeviceCreateInfo {
  pub s_type: u32,
  pub p_next: *const c_void,
  pub function: u32,
  pub p_layer_info: *mut VkLayerDeviceLink,
  pub union_tail: *const c_void,
}

impl VkLayerDeviceCreateInfo {
  pub fn link(p_next: *const c_void, link: *mut VkLayerDeviceLink) -> Self {
    Self {
      s_type: STRUCTURE_TYPE_LOADER_DEVICE_CREATE_INFO,
      p_next,
      function: LAYER_LINK_INFO,
      p_layer_info: link,
      union_tail: ptr::null(),
    }
  }
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VkExtensionProperties {
  pub extension_name: [c_char; MAX_NAME_SIZE],
  pub spec_version: u32,
}

impl Default for VkExtensionProperties {
  fn default() -> Self {
    Self {
      extension_name: [0; MAX_NAME_SIZE],
      spec_version: 0,
    }
  }
}

impl VkExtensionProperties {
  /// `None` when the name is not NUL-terminated UTF-8.
  pub fn to_properties(&self) -> Option<ExtensionProperties> {
    let bytes: Vec<u8> = self.extension_name.iter().map(|&c| c as u8).collect();
    let name = CStr::from_bytes_until_nul(&bytes).ok()?.to_str().ok()?;
    Some(ExtensionProperties::new(name, self.spec_version))
  }
}

#[repr(C)]
#[derive(Debug)]
pub struct VkApplicationInfo {
  pub s_type: u32,
  pub p_next: *const c_void,
  pub p_application_name: *const c_char,
  pub application_version: u32,
  pub p_engine_name: *const c_char,
  pub engine_version: u32,
  pub api_version: u32,
}

#[repr(C)]
#[derive(Debug)]
pub struct VkInstanceCreateInfo {
  pub s_type: u32,
  pub p_next: *const c_void,
  pub flags: u32,
  pub p_application_info: *const VkApplicationInfo,
  pub enabled_layer_count: u32,
  pub pp_enabled_layer_names: *const *const c_char,
  pub enabled_extension_count: u32,
  pub pp_enabled_extension_names: *const *const c_char,
}

#[repr(C)]
#[derive(Debug)]
pub struct VkDeviceQueueCreateInfo {
  pub s_type: u32,
  pub p_next: *const c_void,
  pub flags: u32,
  pub queue_family_index: u32,
  pub queue_count: u32,
  pub p_queue_priorities: *const f32,
}

#[repr(C)]
#[derive(Debug)]
pub struct VkDeviceGroupDeviceCreateInfo {
  pub s_type: u32,
  pub p_next: *const c_void,
  pub physical_device_count: u32,
  pub p_physical_devices: *const VkPhysicalDevice,
}

#[repr(C)]
#[derive(Debug)]
pub struct VkDeviceCreateInfo {
  pub s_type: u32,
  pub p_next: *const c_void,
  pub flags: u32,
  pub queue_create_info_count: u32,
  pub p_queue_create_infos: *const VkDeviceQueueCreateInfo,
  pub enabled_layer_count: u32,
  pub pp_enabled_layer_names: *const *const c_char,
  pub enabled_extension_count: u32,
  pub pp_enabled_extension_names: *const *const c_char,
  pub p_enabled_features: *const c_void,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VkPhysicalDeviceGroupProperties {
  pub s_type: u32,
  pub p_next: *mut c_void,
  pub physical_device_count: u32,
  pub physical_devices: [VkPhysicalDevice; MAX_DEVICE_GROUP_SIZE],
  pub subset_allocation: u32,
}

impl Default for VkPhysicalDeviceGroupProperties {
  fn default() -> Self {
    Self {
      s_type: STRUCTURE_TYPE_PHYSICAL_DEVICE_GROUP_PROPERTIES,
      p_next: ptr::null_mut(),
      physical_device_count: 0,
      physical_devices: [ptr::null_mut(); MAX_DEVICE_GROUP_SIZE],
      subset_allocation: 0,
    }
  }
}

/// Reinterpret a resolved command as its real signature.
///
/// # Safety
///
/// `F` must be the function pointer type of the command `entry` was resolved for.
pub unsafe fn cast<F: Copy>(entry: unsafe extern "system" fn()) -> F {
  debug_assert_eq!(size_of::<F>(), size_of::<unsafe extern "system" fn()>());
  // SAFETY: both are function pointers of the same size; the caller vouches
  // for the signature.
  unsafe { std::mem::transmute_copy(&entry) }
}

/// Erase a function pointer to the type proc-addr queries return.
///
/// # Safety
///
/// `F` must be an `extern "system"` function pointer type.
pub unsafe fn erase<F: Copy>(entry: F) -> PFN_vkVoidFunction {
  debug_assert_eq!(size_of::<F>(), size_of::<unsafe extern "system" fn()>());
  // SAFETY: as above, in the other direction.
  Some(unsafe { std::mem::transmute_copy(&entry) })
}

/// Map a raw return code to `Err` unless it is a success code.
pub fn check(raw: i32) -> Result<(), VkResult> {
  let result = VkResult::from_raw(raw);
  if result.is_success() { Ok(()) } else { Err(result) }
}

/// Run a two-call enumeration: query the count, then fill a buffer of that size.
///
/// The pair is repeated while the fill call reports `VK_INCOMPLETE`, which
/// means the set grew between the two calls.
///
/// # Safety
///
/// `call` must forward to an entry point that follows the count/pointer
/// enumeration protocol for `T`.
pub unsafe fn enumerate<T: Clone>(template: T, mut call: impl FnMut(*mut u32, *mut T) -> i32) -> Result<Vec<T>, VkResult> {
  loop {
    let mut count = 0u32;
    check(call(&mut count, ptr::null_mut()))?;

    let mut items = Vec::new();
    items
      .try_reserve(count as usize)
      .map_err(|_| VkResult::ErrorOutOfHostMemory)?;
    items.resize(count as usize, template.clone());

    let raw = call(&mut count, items.as_mut_ptr());
    if VkResult::from_raw(raw) == VkResult::Incomplete {
      continue;
    }
    check(raw)?;
    items.truncate(count as usize);
    return Ok(items);
  }
}
