//! Native ABI: `repr(C)` types and the `libloading`-backed library loader.
//!
//! Everything `unsafe` in the crate lives below this module.

mod driver;
mod info;
mod layer;
mod link;
pub mod types;

use std::path::Path;
use std::sync::Arc;

use libloading::Library;
use tracing::debug;

use crate::dispatch::{DriverLibrary, LayerLibrary, LibraryError, LibraryLoader};

pub use driver::NativeDriverLibrary;
pub use layer::NativeLayerLibrary;

/// Opens layer and driver libraries from disk.
///
/// Bare library names are left to the platform's library search; paths with
/// a directory component must exist.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeLoader;

impl NativeLoader {
  pub fn new() -> Self {
    Self
  }

  fn open(path: &Path) -> Result<Library, LibraryError> {
    if path.components().count() > 1 && !path.exists() {
      return Err(LibraryError::NotFound {
        path: path.to_path_buf(),
      });
    }
    // SAFETY: opening a library runs its initializers. Layer and driver
    // libraries are trusted as much as the manifests that name them.
    let library = unsafe { Library::new(path) }.map_err(|source| LibraryError::Open {
      path: path.to_path_buf(),
      source,
    })?;
    debug!(library = %path.display(), "opened library");
    Ok(library)
  }
}

impl LibraryLoader for NativeLoader {
  fn open_layer(&self, path: &Path) -> Result<Arc<dyn LayerLibrary>, LibraryError> {
    let library = Self::open(path)?;
    Ok(Arc::new(NativeLayerLibrary::new(path, library)))
  }

  fn open_driver(&self, path: &Path) -> Result<Arc<dyn DriverLibrary>, LibraryError> {
    let library = Self::open(path)?;
    Ok(Arc::new(NativeDriverLibrary::new(path, library)))
  }
}
