//! Create parameters in their `repr(C)` form, and back.
//!
//! The `Raw*` builders own every string and array the ABI structs point to.
//! A struct returned by their `raw` methods is valid while the builder is.

use std::ffi::{CStr, CString, c_char, c_void};
use std::ptr;
use std::slice;

use crate::dispatch::{InstanceCreateInfo, QueueCreateInfo};
use crate::error::VkResult;
use crate::version::ApiVersion;

use super::types::*;

/// NUL-terminated copies of a name list plus the pointer array the ABI wants.
struct CStringList {
  _strings: Vec<CString>,
  pointers: Vec<*const c_char>,
}

impl CStringList {
  fn new(names: &[String]) -> Result<Self, VkResult> {
    let strings = names
      .iter()
      .map(|name| CString::new(name.as_str()))
      .collect::<Result<Vec<_>, _>>()
      .map_err(|_| VkResult::ErrorInitializationFailed)?;
    let pointers = strings.iter().map(|s| s.as_ptr()).collect();
    Ok(Self {
      _strings: strings,
      pointers,
    })
  }

  fn len(&self) -> u32 {
    self.pointers.len() as u32
  }

  fn as_ptr(&self) -> *const *const c_char {
    if self.pointers.is_empty() {
      ptr::null()
    } else {
      self.pointers.as_ptr()
    }
  }
}

fn c_string(value: Option<&str>) -> Result<Option<CString>, VkResult> {
  value
    .map(CString::new)
    .transpose()
    .map_err(|_| VkResult::ErrorInitializationFailed)
}

pub(super) struct RawInstanceInfo {
  _application_name: Option<CString>,
  _engine_name: Option<CString>,
  layers: CStringList,
  extensions: CStringList,
  application: VkApplicationInfo,
  flags: u32,
}

impl RawInstanceInfo {
  pub fn new(info: &InstanceCreateInfo) -> Result<Self, VkResult> {
    let application_name = c_string(info.application_name.as_deref())?;
    let engine_name = c_string(info.engine_name.as_deref())?;
    let application = VkApplicationInfo {
      s_type: STRUCTURE_TYPE_APPLICATION_INFO,
      p_next: ptr::null(),
      p_application_name: application_name.as_ref().map_or(ptr::null(), |n| n.as_ptr()),
      application_version: info.application_version,
      p_engine_name: engine_name.as_ref().map_or(ptr::null(), |n| n.as_ptr()),
      engine_version: info.engine_version,
      api_version: info.api_version.raw(),
    };
    Ok(Self {
      _application_name: application_name,
      _engine_name: engine_name,
      layers: CStringList::new(&info.enabled_layers)?,
      extensions: CStringList::new(&info.enabled_extensions)?,
      application,
      flags: if info.enumerate_portability {
        INSTANCE_CREATE_ENUMERATE_PORTABILITY_BIT
      } else {
        0
      },
    })
  }

  pub fn raw(&self, p_next: *const c_void) -> VkInstanceCreateInfo {
    VkInstanceCreateInfo {
      s_type: STRUCTURE_TYPE_INSTANCE_CREATE_INFO,
      p_next,
      flags: self.flags,
      p_application_info: &self.application,
      enabled_layer_count: self.layers.len(),
      pp_enabled_layer_names: self.layers.as_ptr(),
      enabled_extension_count: self.extensions.len(),
      pp_enabled_extension_names: self.extensions.as_ptr(),
    }
  }
}

pub(super) struct RawDeviceInfo {
  _priorities: Vec<Vec<f32>>,
  queues: Vec<VkDeviceQueueCreateInfo>,
  layers: CStringList,
  extensions: CStringList,
  group_members: Option<Vec<VkPhysicalDevice>>,
  group: Option<VkDeviceGroupDeviceCreateInfo>,
}

impl RawDeviceInfo {
  pub fn new(
    queues: &[QueueCreateInfo],
    layers: &[String],
    extensions: &[String],
    group_members: Option<Vec<VkPhysicalDevice>>,
  ) -> Result<Self, VkResult> {
    let priorities: Vec<Vec<f32>> = queues.iter().map(|queue| queue.priorities.clone()).collect();
    let raw_queues = queues
      .iter()
      .zip(&priorities)
      .map(|(queue, priorities)| VkDeviceQueueCreateInfo {
        s_type: STRUCTURE_TYPE_DEVICE_QUEUE_CREATE_INFO,
        p_next: ptr::null(),
        flags: 0,
        queue_family_index: queue.family_index,
        queue_count: priorities.len() as u32,
        p_queue_priorities: priorities.as_ptr(),
      })
      .collect();
    let group = group_members.as_ref().map(|members| VkDeviceGroupDeviceCreateInfo {
      s_type: STRUCTURE_TYPE_DEVICE_GROUP_DEVICE_CREATE_INFO,
      p_next: ptr::null(),
      physical_device_count: members.len() as u32,
      p_physical_devices: members.as_ptr(),
    });
    Ok(Self {
      _priorities: priorities,
      queues: raw_queues,
      layers: CStringList::new(layers)?,
      extensions: CStringList::new(extensions)?,
      group_members,
      group,
    })
  }

  /// `p_next` follows the device-group entry when there is one.
  pub fn raw(&mut self, p_next: *const c_void) -> VkDeviceCreateInfo {
    let head = match &mut self.group {
      Some(group) => {
        group.p_next = p_next;
        group as *const VkDeviceGroupDeviceCreateInfo as *const c_void
      }
      None => p_next,
    };
    debug_assert_eq!(self.group.is_some(), self.group_members.is_some());
    VkDeviceCreateInfo {
      s_type: STRUCTURE_TYPE_DEVICE_CREATE_INFO,
      p_next: head,
      flags: 0,
      queue_create_info_count: self.queues.len() as u32,
      p_queue_create_infos: if self.queues.is_empty() {
        ptr::null()
      } else {
        self.queues.as_ptr()
      },
      enabled_layer_count: self.layers.len(),
      pp_enabled_layer_names: self.layers.as_ptr(),
      enabled_extension_count: self.extensions.len(),
      pp_enabled_extension_names: self.extensions.as_ptr(),
      p_enabled_features: ptr::null(),
    }
  }
}

/// # Safety
///
/// `name` is NULL or NUL-terminated.
pub(super) unsafe fn read_name<'a>(name: *const c_char) -> Option<&'a str> {
  if name.is_null() {
    return None;
  }
  // SAFETY: non-NULL and NUL-terminated per the caller.
  unsafe { CStr::from_ptr(name) }.to_str().ok()
}

/// # Safety
///
/// `list` is NULL or points to `count` NULL-or-NUL-terminated strings.
unsafe fn read_names(count: u32, list: *const *const c_char) -> Option<Vec<String>> {
  if count == 0 || list.is_null() {
    return Some(Vec::new());
  }
  // SAFETY: `count` valid pointers per the caller.
  let pointers = unsafe { slice::from_raw_parts(list, count as usize) };
  pointers
    .iter()
    // SAFETY: each entry is NULL or NUL-terminated.
    .map(|&name| unsafe { read_name(name) }.map(str::to_owned))
    .collect()
}

/// Read back an instance create info a layer passed down the chain. `None`
/// when a name is missing or not UTF-8.
///
/// # Safety
///
/// `raw` and everything it points to must be valid.
pub(super) unsafe fn instance_info_from_raw(raw: &VkInstanceCreateInfo) -> Option<InstanceCreateInfo> {
  // SAFETY: NULL or valid per the caller.
  let application = unsafe { raw.p_application_info.as_ref() };
  // SAFETY: the strings of a valid application info are NULL or NUL-terminated.
  let text = |name: *const c_char| unsafe { read_name(name) }.map(str::to_owned);
  Some(InstanceCreateInfo {
    application_name: application.and_then(|app| text(app.p_application_name)),
    application_version: application.map_or(0, |app| app.application_version),
    engine_name: application.and_then(|app| text(app.p_engine_name)),
    engine_version: application.map_or(0, |app| app.engine_version),
    api_version: ApiVersion::from_raw(application.map_or(0, |app| app.api_version)),
    // SAFETY: count/pointer pairs of a valid create info.
    enabled_layers: unsafe { read_names(raw.enabled_layer_count, raw.pp_enabled_layer_names) }?,
    enabled_extensions: unsafe { read_names(raw.enabled_extension_count, raw.pp_enabled_extension_names) }?,
    enumerate_portability: raw.flags & INSTANCE_CREATE_ENUMERATE_PORTABILITY_BIT != 0,
  })
}

/// Queues, layer names and extension names of a device create info.
pub(super) struct DeviceInfoParts {
  pub queues: Vec<QueueCreateInfo>,
  pub layers: Vec<String>,
  pub extensions: Vec<String>,
}

/// Read back a device create info a layer passed down the chain.
///
/// # Safety
///
/// `raw` and everything it points to must be valid.
pub(super) unsafe fn device_info_from_raw(raw: &VkDeviceCreateInfo) -> Option<DeviceInfoParts> {
  let queues = if raw.queue_create_info_count == 0 || raw.p_queue_create_infos.is_null() {
    &[][..]
  } else {
    // SAFETY: count/pointer pair of a valid create info.
    unsafe { slice::from_raw_parts(raw.p_queue_create_infos, raw.queue_create_info_count as usize) }
  };
  let queues = queues
    .iter()
    .map(|queue| {
      let priorities = if queue.queue_count == 0 || queue.p_queue_priorities.is_null() {
        Vec::new()
      } else {
        // SAFETY: one priority per queue.
        unsafe { slice::from_raw_parts(queue.p_queue_priorities, queue.queue_count as usize) }.to_vec()
      };
      QueueCreateInfo {
        family_index: queue.queue_family_index,
        priorities,
      }
    })
    .collect();
  Some(DeviceInfoParts {
    queues,
    // SAFETY: count/pointer pairs of a valid create info.
    layers: unsafe { read_names(raw.enabled_layer_count, raw.pp_enabled_layer_names) }?,
    extensions: unsafe { read_names(raw.enabled_extension_count, raw.pp_enabled_extension_names) }?,
  })
}
