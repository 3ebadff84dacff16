//! Driver records and the preloaded driver set.
//!
//! A [`DriverSet`] is built from driver manifests: each manifest's library is
//! opened, its interface version negotiated and its entry points resolved.
//! Drivers that fail any step are logged and left out; the set may end up
//! empty, in which case instance creation reports an incompatible driver.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::consts::{CURRENT_ICD_INTERFACE_VERSION, ICD_GET_INSTANCE_PROC_ADDR_SYMBOL, MIN_SUPPORTED_ICD_INTERFACE_VERSION};
use crate::dispatch::{DriverLibrary, Icd, LibraryLoader};
use crate::error::{LoaderError, try_reserve};
use crate::manifest::{DriverManifest, ExtensionProperties, LayerKind, ManifestStore, ParsedManifest};
use crate::settings::LoaderSettings;
use crate::version::ApiVersion;

/// A loaded driver.
pub struct DriverRecord {
  manifest: DriverManifest,
  interface_version: u32,
  icd: Arc<dyn Icd>,
  // Last, so the entry points above are gone before the library can close.
  library: Arc<dyn DriverLibrary>,
}

impl fmt::Debug for DriverRecord {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("DriverRecord")
      .field("manifest", &self.manifest.manifest_path)
      .field("library", &self.manifest.library_path)
      .field("interface_version", &self.interface_version)
      .finish_non_exhaustive()
  }
}

impl DriverRecord {
  pub fn new(
    manifest: DriverManifest,
    interface_version: u32,
    library: Arc<dyn DriverLibrary>,
    icd: Arc<dyn Icd>,
  ) -> Self {
    Self {
      manifest,
      interface_version,
      icd,
      library,
    }
  }

  pub fn manifest(&self) -> &DriverManifest {
    &self.manifest
  }

  pub fn manifest_path(&self) -> &Path {
    &self.manifest.manifest_path
  }

  pub fn library_path(&self) -> &Path {
    &self.manifest.library_path
  }

  pub fn interface_version(&self) -> u32 {
    self.interface_version
  }

  /// API version from the driver's manifest.
  pub fn api_version(&self) -> ApiVersion {
    self.manifest.api_version
  }

  pub fn is_portability_driver(&self) -> bool {
    self.manifest.is_portability_driver
  }

  pub fn icd(&self) -> &dyn Icd {
    self.icd.as_ref()
  }

  pub(crate) fn library(&self) -> &Arc<dyn DriverLibrary> {
    &self.library
  }
}

/// Every driver the loader could load, in manifest order.
pub struct DriverSet {
  drivers: Vec<Arc<DriverRecord>>,
  keep_loaded: bool,
}

impl fmt::Debug for DriverSet {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_list().entries(&self.drivers).finish()
  }
}

impl DriverSet {
  /// Load the drivers named by `paths`.
  ///
  /// Only allocation failure is returned; every other problem skips the
  /// driver concerned.
  pub fn load(
    store: &mut ManifestStore,
    paths: &[PathBuf],
    libraries: &dyn LibraryLoader,
    settings: &LoaderSettings,
  ) -> Result<Self, LoaderError> {
    let mut drivers = Vec::new();
    try_reserve(&mut drivers, paths.len())?;

    for path in paths {
      if filtered_out(path, settings) {
        continue;
      }

      let parsed = match store.load(path, LayerKind::Explicit) {
        Ok(parsed) => parsed,
        Err(err) => {
          warn!(error = %err, "skipping driver manifest");
          continue;
        }
      };
      let manifest = match parsed.as_ref() {
        ParsedManifest::Driver(manifest) => manifest.clone(),
        ParsedManifest::Layers { .. } => {
          warn!(manifest = %path.display(), "layer manifest in a driver search path ignored");
          continue;
        }
      };

      if let Some(record) = load_driver(manifest, libraries)? {
        drivers.push(Arc::new(record));
      }
    }

    info!(count = drivers.len(), "loaded drivers");
    Ok(Self::new(drivers, settings.disable_library_unloading))
  }

  pub fn new(drivers: Vec<Arc<DriverRecord>>, keep_loaded: bool) -> Self {
    Self { drivers, keep_loaded }
  }

  pub fn drivers(&self) -> &[Arc<DriverRecord>] {
    &self.drivers
  }

  pub fn len(&self) -> usize {
    self.drivers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.drivers.is_empty()
  }

  /// Union of every driver's instance extensions, first occurrence kept.
  ///
  /// A driver that fails to report is skipped.
  pub fn instance_extensions(&self) -> Result<Vec<ExtensionProperties>, LoaderError> {
    let mut extensions: Vec<ExtensionProperties> = Vec::new();
    for driver in &self.drivers {
      let reported = match driver.icd().enumerate_instance_extension_properties() {
        Ok(reported) => reported,
        Err(code) if code.is_out_of_memory() => return Err(LoaderError::OutOfMemory),
        Err(code) => {
          warn!(driver = %driver.library_path().display(), result = %code, "driver failed to report instance extensions");
          continue;
        }
      };
      try_reserve(&mut extensions, reported.len())?;
      for extension in reported {
        if !extensions.iter().any(|e| e.name == extension.name) {
          extensions.push(extension);
        }
      }
    }
    Ok(extensions)
  }
}

impl Drop for DriverSet {
  fn drop(&mut self) {
    if self.keep_loaded {
      for driver in &self.drivers {
        std::mem::forget(Arc::clone(driver.library()));
      }
    }
  }
}

fn filtered_out(path: &Path, settings: &LoaderSettings) -> bool {
  let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
  let selected = settings.drivers_select.matches_name(&name);

  if !settings.drivers_select.is_empty() && !selected {
    info!(manifest = %path.display(), "driver not selected by the driver select filter");
    return true;
  }
  if settings.drivers_disable.matches_name(&name) && !selected {
    info!(manifest = %path.display(), "driver disabled by the driver disable filter");
    return true;
  }
  false
}

/// Open and negotiate one driver. `Ok(None)` means the driver was skipped.
fn load_driver(manifest: DriverManifest, libraries: &dyn LibraryLoader) -> Result<Option<DriverRecord>, LoaderError> {
  let library = match libraries.open_driver(&manifest.library_path) {
    Ok(library) => library,
    Err(err) => {
      warn!(manifest = %manifest.manifest_path.display(), error = %err, "skipping driver");
      return Ok(None);
    }
  };

  let interface_version = match library.negotiate_interface_version(CURRENT_ICD_INTERFACE_VERSION) {
    Some(Ok(version)) if (MIN_SUPPORTED_ICD_INTERFACE_VERSION..=CURRENT_ICD_INTERFACE_VERSION).contains(&version) => {
      version
    }
    Some(Ok(version)) => {
      warn!(
        manifest = %manifest.manifest_path.display(),
        version,
        "driver negotiated an unsupported interface version; skipping it"
      );
      return Ok(None);
    }
    Some(Err(code)) if code.is_out_of_memory() => return Err(LoaderError::OutOfMemory),
    Some(Err(code)) => {
      warn!(
        manifest = %manifest.manifest_path.display(),
        result = %code,
        "driver interface negotiation failed; skipping it"
      );
      return Ok(None);
    }
    // Drivers predating negotiation: version 1 if they export the
    // driver-specific proc-addr entry, else version 0.
    None if library.has_symbol(ICD_GET_INSTANCE_PROC_ADDR_SYMBOL) => 1,
    None => 0,
  };

  let Some(icd) = library.icd(interface_version) else {
    warn!(
      manifest = %manifest.manifest_path.display(),
      "driver exports no instance proc-addr entry point; skipping it"
    );
    return Ok(None);
  };

  debug!(
    manifest = %manifest.manifest_path.display(),
    library = %manifest.library_path.display(),
    interface_version,
    api_version = %manifest.api_version,
    "loaded driver"
  );
  Ok(Some(DriverRecord::new(manifest, interface_version, library, icd)))
}
