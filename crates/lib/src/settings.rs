//! Loader configuration read from the environment.
//!
//! [`LoaderSettings::from_env`] takes a snapshot of every environment variable
//! the loader honours. The snapshot is taken once per [`Loader`](crate::loader::Loader)
//! so a single instance creation sees a consistent view.

use std::path::PathBuf;

use crate::consts::*;
use crate::filter::NameFilter;

/// Separator used by list-valued environment variables.
#[cfg(windows)]
pub const LIST_SEPARATOR: char = ';';
#[cfg(not(windows))]
pub const LIST_SEPARATOR: char = ':';

#[derive(Debug, Clone, Default)]
pub struct LoaderSettings {
  /// Replaces the driver manifest search entirely.
  pub driver_files: Option<Vec<PathBuf>>,
  /// Searched before the normal driver locations.
  pub add_driver_files: Vec<PathBuf>,
  /// Replaces the explicit layer search path.
  pub layer_path: Option<Vec<PathBuf>>,
  /// Searched before the normal explicit layer locations.
  pub add_layer_path: Vec<PathBuf>,
  /// Replaces the implicit layer search path.
  pub implicit_layer_path: Option<Vec<PathBuf>>,
  /// Searched before the normal implicit layer locations.
  pub add_implicit_layer_path: Vec<PathBuf>,
  /// Layers to enable in addition to the application's.
  pub instance_layers: Vec<String>,
  pub layers_enable: NameFilter,
  pub layers_disable: NameFilter,
  pub drivers_select: NameFilter,
  pub drivers_disable: NameFilter,
  pub disable_instance_extension_filter: bool,
  pub disable_library_unloading: bool,
  /// Raw `VK_LOADER_DEBUG` value.
  pub debug: Option<String>,
}

impl LoaderSettings {
  pub fn from_env() -> Self {
    let driver_files = env_var(ENV_DRIVER_FILES)
      .or_else(|| env_var(ENV_ICD_FILENAMES))
      .map(|v| split_paths(&v));

    Self {
      driver_files,
      add_driver_files: env_var(ENV_ADD_DRIVER_FILES).map(|v| split_paths(&v)).unwrap_or_default(),
      layer_path: env_var(ENV_LAYER_PATH).map(|v| split_paths(&v)),
      add_layer_path: env_var(ENV_ADD_LAYER_PATH).map(|v| split_paths(&v)).unwrap_or_default(),
      implicit_layer_path: env_var(ENV_IMPLICIT_LAYER_PATH).map(|v| split_paths(&v)),
      add_implicit_layer_path: env_var(ENV_ADD_IMPLICIT_LAYER_PATH)
        .map(|v| split_paths(&v))
        .unwrap_or_default(),
      instance_layers: env_var(ENV_INSTANCE_LAYERS).map(|v| split_names(&v)).unwrap_or_default(),
      layers_enable: env_filter(ENV_LAYERS_ENABLE),
      layers_disable: env_filter(ENV_LAYERS_DISABLE),
      drivers_select: env_filter(ENV_DRIVERS_SELECT),
      drivers_disable: env_filter(ENV_DRIVERS_DISABLE),
      disable_instance_extension_filter: env_toggle(ENV_DISABLE_INST_EXT_FILTER),
      disable_library_unloading: env_toggle(ENV_DISABLE_LIBRARY_UNLOADING),
      debug: env_var(ENV_LOADER_DEBUG),
    }
  }
}

/// Reads an environment variable, treating empty values as unset.
pub fn env_var(name: &str) -> Option<String> {
  std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Whether an environment variable is present at all, even if empty.
pub fn env_is_set(name: &str) -> bool {
  std::env::var_os(name).is_some()
}

/// A toggle is on when its value starts with a non-zero integer or reads `true`.
fn env_toggle(name: &str) -> bool {
  env_var(name).is_some_and(|v| {
    let v = v.trim();
    if v.eq_ignore_ascii_case("true") {
      return true;
    }
    let digits: String = v.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse::<u64>().is_ok_and(|n| n != 0)
  })
}

fn env_filter(name: &str) -> NameFilter {
  env_var(name).map(|v| NameFilter::parse(&v)).unwrap_or_default()
}

fn split_paths(value: &str) -> Vec<PathBuf> {
  value
    .split(LIST_SEPARATOR)
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(PathBuf::from)
    .collect()
}

fn split_names(value: &str) -> Vec<String> {
  value
    .split(LIST_SEPARATOR)
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(str::to_string)
    .collect()
}
