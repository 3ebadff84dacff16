//! Manifest file discovery.
//!
//! The loader core only consumes lists of manifest paths. [`ManifestFinder`]
//! produces them; [`SearchPathFinder`] is the default, walking the standard
//! search directories and honouring the path environment variables.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, trace, warn};
use walkdir::WalkDir;

use crate::consts::{APP_NAME, DRIVER_SUBDIR, EXPLICIT_LAYER_SUBDIR, IMPLICIT_LAYER_SUBDIR};
use crate::platform::paths::manifest_dirs;
use crate::settings::LoaderSettings;

/// Locates driver and layer manifests.
pub trait ManifestFinder: Send + Sync {
  fn driver_manifests(&self, settings: &LoaderSettings) -> Vec<PathBuf>;

  fn implicit_layer_manifests(&self, settings: &LoaderSettings) -> Vec<PathBuf>;

  /// Explicit layer manifests. When the active override layer declares
  /// `override_paths`, only those directories are searched.
  fn explicit_layer_manifests(&self, settings: &LoaderSettings, override_paths: &[PathBuf]) -> Vec<PathBuf>;
}

/// Searches `<root>/vulkan/{icd.d,implicit_layer.d,explicit_layer.d}` under
/// each search root.
#[derive(Debug, Clone, Default)]
pub struct SearchPathFinder {
  roots: Option<Vec<PathBuf>>,
}

impl SearchPathFinder {
  /// Use the platform's standard search roots.
  pub fn new() -> Self {
    Self::default()
  }

  /// Use `roots` instead of the platform's search roots.
  pub fn with_roots(roots: Vec<PathBuf>) -> Self {
    Self { roots: Some(roots) }
  }

  fn standard_dirs(&self, subdir: &str) -> Vec<PathBuf> {
    match &self.roots {
      Some(roots) => roots.iter().map(|root| root.join(APP_NAME).join(subdir)).collect(),
      None => manifest_dirs(subdir),
    }
  }

  fn search(&self, replace: Option<&[PathBuf]>, add: &[PathBuf], subdir: &str) -> Vec<PathBuf> {
    let locations = match replace {
      Some(paths) => paths.to_vec(),
      None => add.iter().cloned().chain(self.standard_dirs(subdir)).collect(),
    };
    collect_manifests(&locations)
  }
}

impl ManifestFinder for SearchPathFinder {
  fn driver_manifests(&self, settings: &LoaderSettings) -> Vec<PathBuf> {
    let found = self.search(
      settings.driver_files.as_deref(),
      &settings.add_driver_files,
      DRIVER_SUBDIR,
    );
    debug!(count = found.len(), "found driver manifests");
    found
  }

  fn implicit_layer_manifests(&self, settings: &LoaderSettings) -> Vec<PathBuf> {
    let found = self.search(
      settings.implicit_layer_path.as_deref(),
      &settings.add_implicit_layer_path,
      IMPLICIT_LAYER_SUBDIR,
    );
    debug!(count = found.len(), "found implicit layer manifests");
    found
  }

  fn explicit_layer_manifests(&self, settings: &LoaderSettings, override_paths: &[PathBuf]) -> Vec<PathBuf> {
    let found = if override_paths.is_empty() {
      self.search(settings.layer_path.as_deref(), &settings.add_layer_path, EXPLICIT_LAYER_SUBDIR)
    } else {
      if settings.layer_path.is_some() || !settings.add_layer_path.is_empty() {
        warn!("override layer declares override_paths; explicit layer path variables are ignored");
      }
      collect_manifests(override_paths)
    };
    debug!(count = found.len(), "found explicit layer manifests");
    found
  }
}

/// Expand each location into manifest files: a file is taken as-is, a
/// directory contributes its `*.json` entries in name order. Missing
/// locations are skipped; duplicates keep their first position.
pub fn collect_manifests(locations: &[PathBuf]) -> Vec<PathBuf> {
  let mut seen = HashSet::new();
  let mut manifests = Vec::new();

  for location in locations {
    if location.is_file() {
      if seen.insert(location.clone()) {
        manifests.push(location.clone());
      }
      continue;
    }
    if !location.is_dir() {
      trace!(path = %location.display(), "manifest location does not exist");
      continue;
    }

    let entries = WalkDir::new(location)
      .min_depth(1)
      .max_depth(1)
      .sort_by_file_name()
      .into_iter()
      .filter_map(|e| e.ok())
      .filter(|e| !e.file_type().is_dir())
      .map(|e| e.into_path())
      .filter(|p| is_json(p));

    for path in entries {
      if seen.insert(path.clone()) {
        manifests.push(path);
      }
    }
  }

  manifests
}

fn is_json(path: &Path) -> bool {
  path
    .extension()
    .and_then(|e| e.to_str())
    .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}
