//! Physical device and device group identity.
//!
//! Drivers report their own native handles; applications only ever see the
//! loader's wrappers. [`DeviceRegistry`] reconciles every enumeration against
//! the wrappers it already handed out: a native handle that is still reported
//! keeps its wrapper, a new one gets a fresh wrapper, and wrappers for handles
//! no longer reported are released. A wrapper pinned by a live logical device
//! is retired instead of released until the device goes away.

mod arena;

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::consts::MAX_DEVICE_GROUP_SIZE;
use crate::dispatch::{IcdInstance, NativeGroup, NativeHandle};
use crate::error::{LoaderError, try_reserve};

pub use arena::{Arena, Handle};

/// Loader wrapper for a physical device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysicalDeviceHandle(Handle);

#[cfg(test)]
impl PhysicalDeviceHandle {
  /// A handle no registry knows.
  pub(crate) fn unregistered() -> Self {
    Self(Arena::new().insert(()).unwrap())
  }
}

/// Loader wrapper for a physical device group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysicalDeviceGroupHandle(Handle);

/// One enumerated device group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalDeviceGroup {
  pub handle: PhysicalDeviceGroupHandle,
  pub devices: Vec<PhysicalDeviceHandle>,
  pub subset_allocation: bool,
}

/// Platform preference for the order physical devices are reported in.
pub trait GpuOrdering: Send + Sync {
  /// A permutation of `0..devices.len()` giving the preferred order, or
  /// `None` for no preference. `devices` pairs a driver index with the
  /// driver's native handle.
  fn order(&self, devices: &[(usize, NativeHandle)]) -> Option<Vec<usize>>;
}

#[derive(Debug)]
struct PhysicalDeviceRecord {
  driver_index: usize,
  native: NativeHandle,
  pins: usize,
  retired: bool,
}

#[derive(Debug)]
struct PhysicalDeviceGroupRecord {
  driver_index: usize,
  /// Member natives, sorted; the group's identity.
  key: Vec<NativeHandle>,
}

/// Stable wrappers for one instance's physical devices and groups.
pub struct DeviceRegistry {
  devices: Arena<PhysicalDeviceRecord>,
  groups: Arena<PhysicalDeviceGroupRecord>,
  ordering: Option<Arc<dyn GpuOrdering>>,
}

impl fmt::Debug for DeviceRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("DeviceRegistry")
      .field("devices", &self.devices)
      .field("groups", &self.groups)
      .field("ordering", &self.ordering.is_some())
      .finish()
  }
}

impl Default for DeviceRegistry {
  fn default() -> Self {
    Self::new(None)
  }
}

impl DeviceRegistry {
  pub fn new(ordering: Option<Arc<dyn GpuOrdering>>) -> Self {
    Self {
      devices: Arena::new(),
      groups: Arena::new(),
      ordering,
    }
  }

  /// Enumerate every driver's physical devices and reconcile them with the
  /// existing wrappers. `drivers` pairs a driver index with its instance.
  pub fn enumerate_physical_devices(
    &mut self,
    drivers: &[(usize, &dyn IcdInstance)],
  ) -> Result<Vec<PhysicalDeviceHandle>, LoaderError> {
    let reported = self.query_devices(drivers)?;
    self.reconcile_devices(&reported)
  }

  /// Enumerate every driver's device groups. Drivers without group support
  /// report one group per device.
  pub fn enumerate_physical_device_groups(
    &mut self,
    drivers: &[(usize, &dyn IcdInstance)],
  ) -> Result<Vec<PhysicalDeviceGroup>, LoaderError> {
    let reported_devices = self.query_devices(drivers)?;
    let device_handles = self.reconcile_devices(&reported_devices)?;

    let mut reported: Vec<(usize, NativeGroup)> = Vec::new();
    for &(driver_index, instance) in drivers {
      let groups = match instance.enumerate_physical_device_groups() {
        None => reported_devices
          .iter()
          .filter(|(index, _)| *index == driver_index)
          .map(|&(_, native)| NativeGroup {
            devices: vec![native],
            subset_allocation: false,
          })
          .collect(),
        Some(Ok(groups)) => groups,
        Some(Err(code)) if code.is_out_of_memory() => return Err(LoaderError::OutOfMemory),
        Some(Err(code)) => {
          warn!(driver = driver_index, result = %code, "driver failed to enumerate device groups; skipping it");
          continue;
        }
      };

      try_reserve(&mut reported, groups.len())?;
      for group in groups {
        if group.devices.is_empty() || group.devices.len() > MAX_DEVICE_GROUP_SIZE {
          warn!(
            driver = driver_index,
            size = group.devices.len(),
            "ignoring device group with an invalid member count"
          );
          continue;
        }
        reported.push((driver_index, group));
      }
    }

    if self.ordering.is_some() {
      let position = |driver: usize, native: NativeHandle| {
        reported_devices
          .iter()
          .position(|&(d, n)| d == driver && n == native)
          .unwrap_or(usize::MAX)
      };
      reported.sort_by_key(|(driver, group)| {
        group
          .devices
          .iter()
          .map(|&native| position(*driver, native))
          .min()
          .unwrap_or(usize::MAX)
      });
    }

    self.reconcile_groups(reported, &device_handles)
  }

  /// The driver index and native handle behind a wrapper.
  pub fn native_of(&self, handle: PhysicalDeviceHandle) -> Option<(usize, NativeHandle)> {
    self
      .devices
      .get(handle.0)
      .map(|record| (record.driver_index, record.native))
  }

  /// The wrapper for a driver's native handle.
  pub fn wrapper_of(&self, driver_index: usize, native: NativeHandle) -> Option<PhysicalDeviceHandle> {
    self
      .devices
      .iter()
      .find(|(_, record)| record.driver_index == driver_index && record.native == native)
      .map(|(handle, _)| PhysicalDeviceHandle(handle))
  }

  /// Keep the wrapper alive while a logical device uses it.
  pub fn pin(&mut self, handle: PhysicalDeviceHandle) -> Result<(), LoaderError> {
    let record = self
      .devices
      .get_mut(handle.0)
      .ok_or_else(|| LoaderError::initialization_failed("unknown physical device"))?;
    record.pins += 1;
    Ok(())
  }

  /// Release a pin taken by [`pin`](Self::pin). A retired wrapper is freed
  /// once its last pin is gone.
  pub fn unpin(&mut self, handle: PhysicalDeviceHandle) {
    let Some(record) = self.devices.get_mut(handle.0) else {
      return;
    };
    record.pins = record.pins.saturating_sub(1);
    if record.pins == 0 && record.retired {
      debug!(native = record.native.0, "freeing retired physical device");
      self.devices.remove(handle.0);
    }
  }

  /// The device is no longer reported but a logical device still uses it.
  pub fn is_retired(&self, handle: PhysicalDeviceHandle) -> bool {
    self.devices.get(handle.0).is_some_and(|record| record.retired)
  }

  /// Wrappers currently allocated, retired ones included.
  pub fn device_count(&self) -> usize {
    self.devices.len()
  }

  pub fn group_count(&self) -> usize {
    self.groups.len()
  }

  fn query_devices(&self, drivers: &[(usize, &dyn IcdInstance)]) -> Result<Vec<(usize, NativeHandle)>, LoaderError> {
    let mut reported: Vec<(usize, NativeHandle)> = Vec::new();
    for &(driver_index, instance) in drivers {
      match instance.enumerate_physical_devices() {
        Ok(natives) => {
          try_reserve(&mut reported, natives.len())?;
          for native in natives {
            if reported.contains(&(driver_index, native)) {
              warn!(driver = driver_index, native = native.0, "driver reported a device twice");
              continue;
            }
            reported.push((driver_index, native));
          }
        }
        Err(code) if code.is_out_of_memory() => return Err(LoaderError::OutOfMemory),
        Err(code) => {
          warn!(driver = driver_index, result = %code, "driver failed to enumerate physical devices; skipping it");
        }
      }
    }
    Ok(self.apply_ordering(reported))
  }

  fn apply_ordering(&self, reported: Vec<(usize, NativeHandle)>) -> Vec<(usize, NativeHandle)> {
    let Some(order) = self.ordering.as_ref().and_then(|ordering| ordering.order(&reported)) else {
      return reported;
    };
    if !is_permutation(&order, reported.len()) {
      warn!("ignoring GPU ordering hint that is not a permutation of the reported devices");
      return reported;
    }
    order.into_iter().map(|index| reported[index]).collect()
  }

  fn reconcile_devices(&mut self, reported: &[(usize, NativeHandle)]) -> Result<Vec<PhysicalDeviceHandle>, LoaderError> {
    let mut handles = Vec::new();
    try_reserve(&mut handles, reported.len())?;

    for &(driver_index, native) in reported {
      let handle = match self.wrapper_of(driver_index, native) {
        Some(handle) => {
          if let Some(record) = self.devices.get_mut(handle.0)
            && record.retired
          {
            debug!(driver = driver_index, native = native.0, "retired physical device reappeared");
            record.retired = false;
          }
          handle
        }
        None => {
          let handle = PhysicalDeviceHandle(self.devices.insert(PhysicalDeviceRecord {
            driver_index,
            native,
            pins: 0,
            retired: false,
          })?);
          debug!(driver = driver_index, native = native.0, "new physical device");
          handle
        }
      };
      handles.push(handle);
    }

    for handle in self.devices.handles().into_iter().map(PhysicalDeviceHandle) {
      if !handles.contains(&handle) {
        self.release_device(handle);
      }
    }

    Ok(handles)
  }

  fn release_device(&mut self, handle: PhysicalDeviceHandle) {
    let Some(record) = self.devices.get_mut(handle.0) else {
      return;
    };
    if record.pins > 0 {
      if !record.retired {
        debug!(native = record.native.0, "physical device vanished while in use; retiring it");
        record.retired = true;
      }
      return;
    }
    debug!(native = record.native.0, "physical device vanished; releasing it");
    self.devices.remove(handle.0);
  }

  fn reconcile_groups(
    &mut self,
    reported: Vec<(usize, NativeGroup)>,
    device_handles: &[PhysicalDeviceHandle],
  ) -> Result<Vec<PhysicalDeviceGroup>, LoaderError> {
    let mut result: Vec<PhysicalDeviceGroup> = Vec::new();
    try_reserve(&mut result, reported.len())?;

    'groups: for (driver_index, group) in reported {
      let mut devices = Vec::new();
      try_reserve(&mut devices, group.devices.len())?;
      for &native in &group.devices {
        match self.wrapper_of(driver_index, native) {
          Some(handle) if device_handles.contains(&handle) => devices.push(handle),
          _ => {
            warn!(
              driver = driver_index,
              native = native.0,
              "device group member was not enumerated as a physical device; skipping group"
            );
            continue 'groups;
          }
        }
      }

      let mut key = group.devices.clone();
      key.sort();
      key.dedup();

      let existing = self
        .groups
        .iter()
        .find(|(_, record)| record.driver_index == driver_index && record.key == key)
        .map(|(handle, _)| PhysicalDeviceGroupHandle(handle));
      let handle = match existing {
        Some(handle) => handle,
        None => PhysicalDeviceGroupHandle(self.groups.insert(PhysicalDeviceGroupRecord { driver_index, key })?),
      };

      if result.iter().any(|g| g.handle == handle) {
        continue;
      }
      result.push(PhysicalDeviceGroup {
        handle,
        devices,
        subset_allocation: group.subset_allocation,
      });
    }

    for handle in self.groups.handles() {
      if !result.iter().any(|g| g.handle.0 == handle) {
        self.groups.remove(handle);
      }
    }

    Ok(result)
  }
}

fn is_permutation(order: &[usize], len: usize) -> bool {
  if order.len() != len {
    return false;
  }
  let mut seen = vec![false; len];
  order
    .iter()
    .all(|&index| index < len && !std::mem::replace(&mut seen[index], true))
}
