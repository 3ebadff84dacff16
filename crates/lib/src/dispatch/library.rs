use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::error::VkResult;

use super::{DeviceLayer, Icd, InstanceLayer};

#[derive(Debug, Error)]
pub enum LibraryError {
  #[error("failed to open library {}: {source}", path.display())]
  Open {
    path: PathBuf,
    #[source]
    source: libloading::Error,
  },

  #[error("library {} not found", path.display())]
  NotFound { path: PathBuf },
}

/// Opens layer and driver libraries.
pub trait LibraryLoader: Send + Sync {
  fn open_layer(&self, path: &Path) -> Result<Arc<dyn LayerLibrary>, LibraryError>;

  fn open_driver(&self, path: &Path) -> Result<Arc<dyn DriverLibrary>, LibraryError>;
}

/// Result of a successful layer interface negotiation.
#[derive(Clone)]
pub struct NegotiatedLayer {
  pub interface_version: u32,
  pub instance: Option<Arc<dyn InstanceLayer>>,
  pub device: Option<Arc<dyn DeviceLayer>>,
}

/// An opened layer library. Dropping the last reference closes it.
pub trait LayerLibrary: Send + Sync {
  /// Call the negotiation export named `symbol`, offering `loader_version`.
  /// `None` when the library does not export it.
  fn negotiate_interface(&self, symbol: &str, loader_version: u32) -> Option<Result<NegotiatedLayer, VkResult>>;

  /// Instance entry points behind the proc-addr export named `symbol`.
  fn instance_entry(&self, symbol: &str) -> Option<Arc<dyn InstanceLayer>>;

  /// Device entry points behind the proc-addr export named `symbol`.
  fn device_entry(&self, symbol: &str) -> Option<Arc<dyn DeviceLayer>>;
}

/// An opened driver library. Dropping the last reference closes it.
pub trait DriverLibrary: Send + Sync {
  /// Call the driver's negotiation export offering `max_version`. `None` when
  /// the library does not export it.
  fn negotiate_interface_version(&self, max_version: u32) -> Option<Result<u32, VkResult>>;

  fn has_symbol(&self, symbol: &str) -> bool;

  /// The driver's entry points for the negotiated interface version, or
  /// `None` when it exports no proc-addr function.
  fn icd(&self, interface_version: u32) -> Option<Arc<dyn Icd>>;
}
