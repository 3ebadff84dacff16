//! Manifest validation.
//!
//! Turns a JSON document into [`ParsedManifest`]. Document-level problems
//! (unreadable file, invalid JSON, missing or unsupported
//! `file_format_version`) reject the whole document. Problems inside one
//! layer definition only skip that definition.

use std::fs;
use std::io;
use std::path::{MAIN_SEPARATOR, Path, PathBuf};

use chrono::NaiveDateTime;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use super::raw::{RawDocument, RawDriver, RawExtension, RawLayer};
use super::types::*;
use crate::consts::*;
use crate::error::LoaderError;
use crate::platform::arch::{library_arch_matches, process_bits};
use crate::version::{ApiVersion, ManifestVersion};

/// Errors that reject a manifest document or one layer definition in it.
#[derive(Debug, Error)]
pub enum ManifestError {
  #[error("failed to read manifest {}: {source}", path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse manifest {}: {source}", path.display())]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("{}: missing required field '{field}'", path.display())]
  MissingField { path: PathBuf, field: &'static str },

  #[error("{}: invalid '{field}': {reason}", path.display())]
  InvalidField {
    path: PathBuf,
    field: &'static str,
    reason: String,
  },

  #[error("{}: unsupported file_format_version {version}", path.display())]
  UnsupportedVersion { path: PathBuf, version: String },

  #[error("{}: layer '{name}' uses the deprecated DEVICE type", path.display())]
  DeviceLayer { path: PathBuf, name: String },

  #[error("{}: '{name}' is built for {arch}-bit processes, this process is {}-bit", path.display(), process_bits())]
  ArchMismatch { path: PathBuf, name: String, arch: String },

  #[error("{}: no layer or ICD definition", path.display())]
  NoDefinition { path: PathBuf },
}

impl ManifestError {
  pub fn path(&self) -> &Path {
    match self {
      Self::Read { path, .. }
      | Self::Parse { path, .. }
      | Self::MissingField { path, .. }
      | Self::InvalidField { path, .. }
      | Self::UnsupportedVersion { path, .. }
      | Self::DeviceLayer { path, .. }
      | Self::ArchMismatch { path, .. }
      | Self::NoDefinition { path } => path,
    }
  }
}

impl From<ManifestError> for LoaderError {
  fn from(err: ManifestError) -> Self {
    LoaderError::ManifestMalformed {
      path: err.path().to_path_buf(),
      reason: err.to_string(),
    }
  }
}

fn missing(path: &Path, field: &'static str) -> ManifestError {
  ManifestError::MissingField {
    path: path.to_path_buf(),
    field,
  }
}

fn invalid(path: &Path, field: &'static str, reason: impl Into<String>) -> ManifestError {
  ManifestError::InvalidField {
    path: path.to_path_buf(),
    field,
    reason: reason.into(),
  }
}

/// Read and validate the manifest at `path`.
///
/// `kind` says whether layers found in this document are implicit or
/// explicit; it is decided by where the file was discovered.
pub fn parse_manifest(path: &Path, kind: LayerKind) -> Result<ParsedManifest, ManifestError> {
  let content = fs::read_to_string(path).map_err(|source| ManifestError::Read {
    path: path.to_path_buf(),
    source,
  })?;
  parse_manifest_str(path, &content, kind)
}

/// Validate manifest text that was already read from `path`.
pub fn parse_manifest_str(path: &Path, content: &str, kind: LayerKind) -> Result<ParsedManifest, ManifestError> {
  let document: RawDocument = serde_json::from_str(content).map_err(|source| ManifestError::Parse {
    path: path.to_path_buf(),
    source,
  })?;

  let version_text = document
    .file_format_version
    .as_deref()
    .ok_or_else(|| missing(path, "file_format_version"))?;
  let version = ManifestVersion::parse(version_text).map_err(|e| invalid(path, "file_format_version", e.to_string()))?;

  if let Some(icd) = document.icd {
    check_known_version(path, &version, KNOWN_DRIVER_FILE_VERSIONS)?;
    return parse_driver(path, version, icd).map(ParsedManifest::Driver);
  }

  check_known_version(path, &version, KNOWN_LAYER_FILE_VERSIONS)?;

  let entries = match (document.layers, document.layer) {
    (Some(layers), layer) => {
      if layer.is_some() {
        warn!(manifest = %path.display(), "both 'layer' and 'layers' present, using 'layers'");
      }
      if version < known_version(LAYERS_ARRAY_MIN_VERSION) {
        warn!(
          manifest = %path.display(),
          version = %version,
          "'layers' array requires file_format_version {LAYERS_ARRAY_MIN_VERSION}"
        );
      }
      layers
    }
    (None, Some(layer)) => vec![layer],
    (None, None) => return Err(ManifestError::NoDefinition { path: path.to_path_buf() }),
  };

  let mut layers = Vec::with_capacity(entries.len());
  let mut skipped = Vec::new();
  for entry in entries {
    match parse_layer(path, &version, kind, entry) {
      Ok(layer) => layers.push(layer),
      Err(err @ ManifestError::ArchMismatch { .. }) => {
        debug!(error = %err, "skipping layer for another architecture");
        skipped.push(err);
      }
      Err(err) => {
        warn!(error = %err, "skipping malformed layer definition");
        skipped.push(err);
      }
    }
  }

  Ok(ParsedManifest::Layers { layers, skipped })
}

fn known_version(text: &str) -> ManifestVersion {
  ManifestVersion::parse(text).unwrap_or_else(|_| ManifestVersion::new(1, 0, 0))
}

/// Known versions pass; unknown versions newer than every known one pass with
/// a warning; anything else is rejected.
fn check_known_version(path: &Path, version: &ManifestVersion, known: &[&str]) -> Result<(), ManifestError> {
  let known: Vec<ManifestVersion> = known.iter().map(|v| known_version(v)).collect();
  if known.contains(version) {
    return Ok(());
  }

  match known.iter().max() {
    Some(newest) if version > newest => {
      warn!(
        manifest = %path.display(),
        version = %version,
        newest = %newest,
        "manifest uses a newer file_format_version than this loader knows; parsing anyway"
      );
      Ok(())
    }
    _ => Err(ManifestError::UnsupportedVersion {
      path: path.to_path_buf(),
      version: version.to_string(),
    }),
  }
}

/// Relative paths that contain a separator are relative to the manifest's
/// directory; bare file names are left for the system library search.
fn resolve_relative(manifest: &Path, value: &str) -> PathBuf {
  let candidate = PathBuf::from(value);
  let has_separator = value.contains('/') || value.contains(MAIN_SEPARATOR);
  if candidate.is_relative() && has_separator {
    match manifest.parent() {
      Some(dir) => dir.join(candidate),
      None => candidate,
    }
  } else {
    candidate
  }
}

fn parse_layer(path: &Path, version: &ManifestVersion, kind: LayerKind, entry: Value) -> Result<LayerRecord, ManifestError> {
  let raw: RawLayer = serde_json::from_value(entry).map_err(|e| invalid(path, "layer", e.to_string()))?;

  let name = raw
    .name
    .map(|n| n.trim().to_string())
    .filter(|n| !n.is_empty())
    .ok_or_else(|| missing(path, "name"))?;

  if !name.starts_with(LAYER_NAME_PREFIX) {
    warn!(
      layer = %name,
      manifest = %path.display(),
      "layer name does not start with {LAYER_NAME_PREFIX}"
    );
  }

  match raw.type_.as_deref() {
    Some("INSTANCE") | Some("GLOBAL") => {}
    Some("DEVICE") => {
      return Err(ManifestError::DeviceLayer {
        path: path.to_path_buf(),
        name,
      });
    }
    Some(other) => return Err(invalid(path, "type", format!("layer '{name}' has unknown type '{other}'"))),
    None => return Err(missing(path, "type")),
  }

  if !library_arch_matches(raw.library_arch.as_deref()) {
    return Err(ManifestError::ArchMismatch {
      path: path.to_path_buf(),
      name,
      arch: raw.library_arch.unwrap_or_default(),
    });
  }

  let api_version = raw.api_version.as_deref().ok_or_else(|| missing(path, "api_version"))?;
  let api_version =
    ApiVersion::parse(api_version).map_err(|e| invalid(path, "api_version", format!("layer '{name}': {e}")))?;

  let implementation_version = match raw.implementation_version.as_ref().map(|v| v.as_u32()) {
    Some(Some(v)) => v,
    Some(None) => {
      warn!(layer = %name, manifest = %path.display(), "unreadable implementation_version, using 0");
      0
    }
    None => {
      warn!(layer = %name, manifest = %path.display(), "missing implementation_version, using 0");
      0
    }
  };

  let description = raw.description.unwrap_or_else(|| {
    debug!(layer = %name, manifest = %path.display(), "layer has no description");
    String::new()
  });

  let body = match (raw.library_path, raw.component_layers) {
    (Some(_), Some(_)) => {
      return Err(invalid(
        path,
        "library_path",
        format!("layer '{name}' declares both library_path and component_layers"),
      ));
    }
    (Some(library), None) => {
      if library.trim().is_empty() {
        return Err(invalid(path, "library_path", format!("layer '{name}' has an empty library_path")));
      }
      LayerBody::Library(resolve_relative(path, library.trim()))
    }
    (None, Some(components)) => meta_body(path, version, &name, components)?,
    (None, None) => return Err(missing(path, "library_path")),
  };

  let functions = raw
    .functions
    .map(|f| LayerFunctions {
      get_instance_proc_addr: f.get_instance_proc_addr.filter(|s| !s.is_empty()),
      get_device_proc_addr: f.get_device_proc_addr.filter(|s| !s.is_empty()),
      negotiate_interface: f.negotiate_interface.filter(|s| !s.is_empty()),
    })
    .unwrap_or_default();

  let instance_extensions = raw
    .instance_extensions
    .into_iter()
    .filter_map(|e| extension(path, &name, e))
    .map(|(properties, _)| properties)
    .collect();

  let device_extensions = raw
    .device_extensions
    .into_iter()
    .filter_map(|e| extension(path, &name, e))
    .map(|(properties, entrypoints)| DeviceExtension {
      properties,
      entrypoints,
    })
    .collect();

  let (enable_environment, disable_environment) = match kind {
    LayerKind::Implicit => (
      env_condition(path, &name, "enable_environment", raw.enable_environment),
      env_condition(path, &name, "disable_environment", raw.disable_environment),
    ),
    LayerKind::Explicit => {
      if raw.enable_environment.is_some() || raw.disable_environment.is_some() {
        warn!(
          layer = %name,
          manifest = %path.display(),
          "enable/disable environment only applies to implicit layers; ignoring"
        );
      }
      (None, None)
    }
  };

  let expiration = raw.expiration_date.and_then(|d| parse_expiration(path, &name, &d));

  let is_override = name == OVERRIDE_LAYER_NAME;
  let (override_paths, blacklisted_layers, app_keys) = if is_override {
    (
      raw.override_paths.iter().map(|p| resolve_relative(path, p)).collect(),
      raw.blacklisted_layers,
      raw.app_keys.into_iter().map(PathBuf::from).collect(),
    )
  } else {
    if !raw.override_paths.is_empty() || !raw.blacklisted_layers.is_empty() || !raw.app_keys.is_empty() {
      warn!(
        layer = %name,
        manifest = %path.display(),
        "override_paths, blacklisted_layers and app_keys only apply to {OVERRIDE_LAYER_NAME}; ignoring"
      );
    }
    (Vec::new(), Vec::new(), Vec::new())
  };

  Ok(LayerRecord {
    name,
    kind,
    api_version,
    implementation_version,
    description,
    body,
    functions,
    instance_extensions,
    device_extensions,
    enable_environment,
    disable_environment,
    expiration,
    override_paths,
    blacklisted_layers,
    app_keys,
    manifest_path: path.to_path_buf(),
    file_format_version: version.clone(),
  })
}

fn meta_body(
  path: &Path,
  version: &ManifestVersion,
  name: &str,
  components: Vec<String>,
) -> Result<LayerBody, ManifestError> {
  if *version < known_version(META_LAYER_MIN_VERSION) {
    return Err(invalid(
      path,
      "component_layers",
      format!("meta-layer '{name}' requires file_format_version {META_LAYER_MIN_VERSION} or newer"),
    ));
  }
  if components.is_empty() {
    return Err(invalid(
      path,
      "component_layers",
      format!("meta-layer '{name}' lists no components"),
    ));
  }

  let mut unique: Vec<String> = Vec::with_capacity(components.len());
  for component in components {
    let component = component.trim().to_string();
    if component == name {
      return Err(invalid(
        path,
        "component_layers",
        format!("meta-layer '{name}' lists itself as a component"),
      ));
    }
    if unique.contains(&component) {
      warn!(layer = %name, component = %component, "duplicate component layer ignored");
      continue;
    }
    unique.push(component);
  }
  Ok(LayerBody::Meta(unique))
}

fn extension(path: &Path, layer: &str, raw: RawExtension) -> Option<(ExtensionProperties, Vec<String>)> {
  let Some(name) = raw.name.filter(|n| !n.is_empty()) else {
    warn!(layer = %layer, manifest = %path.display(), "extension entry without a name ignored");
    return None;
  };
  let spec_version = raw.spec_version.and_then(|v| v.as_u32()).unwrap_or_else(|| {
    warn!(layer = %layer, extension = %name, "missing or unreadable spec_version, using 0");
    0
  });
  Some((ExtensionProperties::new(name, spec_version), raw.entrypoints))
}

fn env_condition(path: &Path, layer: &str, field: &str, raw: Option<Map<String, Value>>) -> Option<EnvCondition> {
  let map = raw?;
  if map.len() > 1 {
    warn!(layer = %layer, field, "only the first variable of {field} is used");
  }
  let Some((var, value)) = map.into_iter().next() else {
    warn!(layer = %layer, manifest = %path.display(), field, "empty {field} ignored");
    return None;
  };
  let value = match value {
    Value::String(s) => s,
    other => other.to_string(),
  };
  Some(EnvCondition { var, value })
}

fn parse_expiration(path: &Path, layer: &str, text: &str) -> Option<NaiveDateTime> {
  match NaiveDateTime::parse_from_str(text.trim(), EXPIRATION_DATE_FORMAT) {
    Ok(date) => Some(date),
    Err(e) => {
      warn!(
        layer = %layer,
        manifest = %path.display(),
        value = %text,
        error = %e,
        "unreadable expiration_date ignored"
      );
      None
    }
  }
}

fn parse_driver(path: &Path, version: ManifestVersion, icd: Value) -> Result<DriverManifest, ManifestError> {
  let raw: RawDriver = serde_json::from_value(icd).map_err(|e| invalid(path, "ICD", e.to_string()))?;

  let library = raw
    .library_path
    .map(|l| l.trim().to_string())
    .filter(|l| !l.is_empty())
    .ok_or_else(|| missing(path, "ICD.library_path"))?;

  if !library_arch_matches(raw.library_arch.as_deref()) {
    return Err(ManifestError::ArchMismatch {
      path: path.to_path_buf(),
      name: library,
      arch: raw.library_arch.unwrap_or_default(),
    });
  }

  let api_version = match raw.api_version.as_deref() {
    Some(text) => ApiVersion::parse(text).map_err(|e| invalid(path, "ICD.api_version", e.to_string()))?,
    None => {
      warn!(manifest = %path.display(), "driver manifest has no api_version, assuming 1.0.0");
      ApiVersion::V1_0
    }
  };

  Ok(DriverManifest {
    manifest_path: path.to_path_buf(),
    file_format_version: version,
    library_path: resolve_relative(path, &library),
    api_version,
    is_portability_driver: raw.is_portability_driver,
  })
}
