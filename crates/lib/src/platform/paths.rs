use crate::consts::APP_NAME;
use std::path::PathBuf;

/// Returns the user's home directory
#[cfg(windows)]
pub fn home_dir() -> Option<PathBuf> {
  std::env::var_os("USERPROFILE").map(PathBuf::from)
}

/// Returns the user's home directory
#[cfg(not(windows))]
pub fn home_dir() -> Option<PathBuf> {
  std::env::var_os("HOME").filter(|h| !h.is_empty()).map(PathBuf::from)
}

/// Returns the per-user configuration directory
#[cfg(not(windows))]
fn config_home() -> Option<PathBuf> {
  std::env::var_os("XDG_CONFIG_HOME")
    .filter(|v| !v.is_empty())
    .map(PathBuf::from)
    .or_else(|| home_dir().map(|h| h.join(".config")))
}

/// Returns the per-user data directory
#[cfg(not(windows))]
fn data_home() -> Option<PathBuf> {
  std::env::var_os("XDG_DATA_HOME")
    .filter(|v| !v.is_empty())
    .map(PathBuf::from)
    .or_else(|| home_dir().map(|h| h.join(".local").join("share")))
}

#[cfg(not(windows))]
fn xdg_list(var: &str, default: &str) -> Vec<PathBuf> {
  let value = std::env::var(var).ok().filter(|v| !v.is_empty());
  value
    .as_deref()
    .unwrap_or(default)
    .split(':')
    .filter(|s| !s.is_empty())
    .map(PathBuf::from)
    .collect()
}

/// Directories that may contain a `vulkan/` manifest tree, highest priority first.
///
/// Order: `$XDG_CONFIG_HOME`, `$XDG_CONFIG_DIRS`, `/etc`, `$XDG_DATA_HOME`,
/// `$XDG_DATA_DIRS`.
#[cfg(not(windows))]
pub fn search_roots() -> Vec<PathBuf> {
  let mut roots = Vec::new();
  roots.extend(config_home());
  roots.extend(xdg_list("XDG_CONFIG_DIRS", "/etc/xdg"));
  roots.push(PathBuf::from("/etc"));
  roots.extend(data_home());
  roots.extend(xdg_list("XDG_DATA_DIRS", "/usr/local/share:/usr/share"));

  let mut seen = std::collections::HashSet::new();
  roots.retain(|r| seen.insert(r.clone()));
  roots
}

/// Windows manifests are registered in the registry, which is queried outside
/// the loader core; only environment overrides apply.
#[cfg(windows)]
pub fn search_roots() -> Vec<PathBuf> {
  Vec::new()
}

/// Manifest directories for one kind of manifest (e.g. `icd.d`), highest priority first.
pub fn manifest_dirs(subdir: &str) -> Vec<PathBuf> {
  search_roots()
    .into_iter()
    .map(|root| root.join(APP_NAME).join(subdir))
    .collect()
}

/// Canonical path of the running executable, used to match override layer app keys.
pub fn current_executable() -> Option<PathBuf> {
  let exe = std::env::current_exe().ok()?;
  Some(dunce::canonicalize(&exe).unwrap_or(exe))
}
