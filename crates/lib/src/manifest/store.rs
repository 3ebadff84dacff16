//! Parsed-manifest cache.
//!
//! The loader re-reads the manifest directories on every instance creation
//! and on every global enumeration call. [`ManifestStore`] keeps the parsed
//! result of each file and hands it out again as long as the file's size and
//! modification time have not changed.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use tracing::trace;

use super::parse::{ManifestError, parse_manifest};
use super::types::{LayerKind, ParsedManifest};

#[derive(Debug)]
struct CacheEntry {
  modified: SystemTime,
  len: u64,
  parsed: Arc<ParsedManifest>,
}

/// Parses manifest files, caching by path and modification time.
#[derive(Debug, Default)]
pub struct ManifestStore {
  entries: HashMap<(PathBuf, LayerKind), CacheEntry>,
}

impl ManifestStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Parse the manifest at `path`, reusing the cached result when the file is
  /// unchanged.
  ///
  /// Files whose modification time cannot be read are parsed every time.
  pub fn load(&mut self, path: &Path, kind: LayerKind) -> Result<Arc<ParsedManifest>, ManifestError> {
    let metadata = fs::metadata(path).map_err(|source| ManifestError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let modified = metadata.modified().ok();
    let key = (path.to_path_buf(), kind);

    if let Some(modified) = modified
      && let Some(entry) = self.entries.get(&key)
      && entry.modified == modified
      && entry.len == metadata.len()
    {
      trace!(manifest = %path.display(), "manifest cache hit");
      return Ok(Arc::clone(&entry.parsed));
    }

    let parsed = Arc::new(parse_manifest(path, kind)?);
    match modified {
      Some(modified) => {
        self.entries.insert(
          key,
          CacheEntry {
            modified,
            len: metadata.len(),
            parsed: Arc::clone(&parsed),
          },
        );
      }
      None => {
        self.entries.remove(&key);
      }
    }
    Ok(parsed)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Drop every cached document.
  pub fn clear(&mut self) {
    self.entries.clear();
  }
}
