//! Dispatch capabilities.
//!
//! Everything the loader calls into (layers, drivers and the libraries that
//! provide them) is reached through the traits in this module. The native
//! implementations live in [`crate::ffi`]; tests substitute their own.

mod icd;
mod info;
mod layer;
mod library;

use std::ffi::c_void;
use std::num::NonZeroUsize;

pub use icd::{Icd, IcdDevice, IcdInstance, NativeGroup, NativeHandle};
pub use info::{DeviceCreateInfo, DriverDeviceCreateInfo, InstanceCreateInfo, QueueCreateInfo};
pub use layer::{CreatedDevice, CreatedInstance, DeviceLayer, InstanceLayer, NextDevice, NextInstance};
pub use library::{DriverLibrary, LayerLibrary, LibraryError, LibraryLoader, NegotiatedLayer};

/// Address of an entry point returned by a proc-addr query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcAddr(NonZeroUsize);

impl ProcAddr {
  pub fn new(addr: usize) -> Option<Self> {
    NonZeroUsize::new(addr).map(Self)
  }

  pub fn from_ptr(ptr: *const c_void) -> Option<Self> {
    Self::new(ptr as usize)
  }

  pub fn addr(self) -> usize {
    self.0.get()
  }

  pub fn as_ptr(self) -> *const c_void {
    self.0.get() as *const c_void
  }
}

/// Resolves instance-level entry points.
pub trait InstanceProcResolver: Send + Sync {
  fn get_instance_proc_addr(&self, name: &str) -> Option<ProcAddr>;

  /// Physical-device entry points the loader does not know about.
  fn get_physical_device_proc_addr(&self, _name: &str) -> Option<ProcAddr> {
    None
  }
}

/// Resolves device-level entry points.
pub trait DeviceProcResolver: Send + Sync {
  fn get_device_proc_addr(&self, name: &str) -> Option<ProcAddr>;
}
