//! Loader error taxonomy.
//!
//! Every public operation returns [`LoaderError`]. Most failures below the
//! application's explicit request are logged and skipped instead of being
//! returned; see the individual modules for which ones.

use std::collections::TryReserveError;
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Raw ABI result codes exchanged with drivers and layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VkResult {
  Success,
  Incomplete,
  ErrorOutOfHostMemory,
  ErrorOutOfDeviceMemory,
  ErrorInitializationFailed,
  ErrorDeviceLost,
  ErrorLayerNotPresent,
  ErrorExtensionNotPresent,
  ErrorFeatureNotPresent,
  ErrorIncompatibleDriver,
  Other(i32),
}

impl VkResult {
  pub fn from_raw(raw: i32) -> Self {
    match raw {
      0 => Self::Success,
      5 => Self::Incomplete,
      -1 => Self::ErrorOutOfHostMemory,
      -2 => Self::ErrorOutOfDeviceMemory,
      -3 => Self::ErrorInitializationFailed,
      -4 => Self::ErrorDeviceLost,
      -6 => Self::ErrorLayerNotPresent,
      -7 => Self::ErrorExtensionNotPresent,
      -8 => Self::ErrorFeatureNotPresent,
      -9 => Self::ErrorIncompatibleDriver,
      other => Self::Other(other),
    }
  }

  pub fn as_raw(self) -> i32 {
    match self {
      Self::Success => 0,
      Self::Incomplete => 5,
      Self::ErrorOutOfHostMemory => -1,
      Self::ErrorOutOfDeviceMemory => -2,
      Self::ErrorInitializationFailed => -3,
      Self::ErrorDeviceLost => -4,
      Self::ErrorLayerNotPresent => -6,
      Self::ErrorExtensionNotPresent => -7,
      Self::ErrorFeatureNotPresent => -8,
      Self::ErrorIncompatibleDriver => -9,
      Self::Other(raw) => raw,
    }
  }

  /// Non-negative codes are successes.
  pub fn is_success(self) -> bool {
    self.as_raw() >= 0
  }

  pub fn is_out_of_memory(self) -> bool {
    matches!(self, Self::ErrorOutOfHostMemory | Self::ErrorOutOfDeviceMemory)
  }
}

impl fmt::Display for VkResult {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Other(raw) => write!(f, "VkResult({})", raw),
      known => write!(f, "{:?}", known),
    }
  }
}

/// Errors surfaced by loader operations.
#[derive(Debug, Error)]
pub enum LoaderError {
  /// Allocation failed. Always fatal for the current operation.
  #[error("out of host memory")]
  OutOfMemory,

  /// A manifest document or entry could not be used.
  #[error("malformed manifest {}: {reason}", path.display())]
  ManifestMalformed { path: PathBuf, reason: String },

  /// A layer the application named is not available.
  #[error("layer '{name}' not present")]
  LayerNotPresent { name: String },

  /// An extension the application requested is not supported by any driver or layer.
  #[error("extension '{name}' not present")]
  ExtensionNotPresent { name: String },

  /// No driver could satisfy the request.
  #[error("incompatible driver: {reason}")]
  IncompatibleDriver { reason: String },

  /// A required entry point or object was missing.
  #[error("initialization failed: {reason}")]
  InitializationFailed { reason: String },

  /// A driver or layer returned an error code the loader passes through.
  #[error("driver returned {0}")]
  Driver(VkResult),
}

impl LoaderError {
  pub fn layer_not_present(name: impl Into<String>) -> Self {
    Self::LayerNotPresent { name: name.into() }
  }

  pub fn extension_not_present(name: impl Into<String>) -> Self {
    Self::ExtensionNotPresent { name: name.into() }
  }

  pub fn incompatible_driver(reason: impl Into<String>) -> Self {
    Self::IncompatibleDriver { reason: reason.into() }
  }

  pub fn initialization_failed(reason: impl Into<String>) -> Self {
    Self::InitializationFailed { reason: reason.into() }
  }

  /// The ABI code reported to the application for this error.
  pub fn result(&self) -> VkResult {
    match self {
      Self::OutOfMemory => VkResult::ErrorOutOfHostMemory,
      Self::ManifestMalformed { .. } => VkResult::ErrorInitializationFailed,
      Self::LayerNotPresent { .. } => VkResult::ErrorLayerNotPresent,
      Self::ExtensionNotPresent { .. } => VkResult::ErrorExtensionNotPresent,
      Self::IncompatibleDriver { .. } => VkResult::ErrorIncompatibleDriver,
      Self::InitializationFailed { .. } => VkResult::ErrorInitializationFailed,
      Self::Driver(code) => *code,
    }
  }

  pub fn is_out_of_memory(&self) -> bool {
    matches!(self, Self::OutOfMemory) || matches!(self, Self::Driver(code) if code.is_out_of_memory())
  }
}

impl From<TryReserveError> for LoaderError {
  fn from(_: TryReserveError) -> Self {
    Self::OutOfMemory
  }
}

impl From<VkResult> for LoaderError {
  fn from(code: VkResult) -> Self {
    match code {
      VkResult::ErrorOutOfHostMemory => Self::OutOfMemory,
      other => Self::Driver(other),
    }
  }
}

/// Reserve room for `additional` more elements, mapping failure to [`LoaderError::OutOfMemory`].
pub fn try_reserve<T>(vec: &mut Vec<T>, additional: usize) -> Result<(), LoaderError> {
  vec.try_reserve(additional).map_err(LoaderError::from)
}
