//! API and manifest version numbers.
//!
//! API versions use the packed 32-bit encoding of the ABI:
//! `variant << 29 | major << 22 | minor << 12 | patch`.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A packed API version number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiVersion(pub u32);

/// Errors produced when parsing a version string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VersionError {
  #[error("invalid version string '{input}': {reason}")]
  Invalid { input: String, reason: String },

  #[error("version component out of range in '{0}'")]
  OutOfRange(String),
}

impl ApiVersion {
  pub const V1_0: ApiVersion = ApiVersion::new(1, 0, 0);
  pub const V1_1: ApiVersion = ApiVersion::new(1, 1, 0);

  pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
    Self((major << 22) | (minor << 12) | patch)
  }

  pub const fn from_raw(raw: u32) -> Self {
    Self(raw)
  }

  pub const fn raw(self) -> u32 {
    self.0
  }

  pub const fn variant(self) -> u32 {
    self.0 >> 29
  }

  pub const fn major(self) -> u32 {
    (self.0 >> 22) & 0x7f
  }

  pub const fn minor(self) -> u32 {
    (self.0 >> 12) & 0x3ff
  }

  pub const fn patch(self) -> u32 {
    self.0 & 0xfff
  }

  /// The application's requested version, treating 0 as 1.0.
  pub fn or_default_1_0(self) -> Self {
    if self.0 == 0 { Self::V1_0 } else { self }
  }

  /// Whether `self` covers `required`, comparing major and minor only.
  pub fn meets(self, required: ApiVersion) -> bool {
    (self.major(), self.minor()) >= (required.major(), required.minor())
  }

  /// Same version with the patch number cleared.
  pub fn without_patch(self) -> Self {
    Self::new(self.major(), self.minor(), 0)
  }

  /// Parse a `major.minor.patch` string as written in manifests.
  pub fn parse(input: &str) -> Result<Self, VersionError> {
    let version = parse_triple(input)?;
    if version.major > 0x7f || version.minor > 0x3ff || version.patch > 0xfff {
      return Err(VersionError::OutOfRange(input.to_string()));
    }
    Ok(Self::new(version.major as u32, version.minor as u32, version.patch as u32))
  }
}

impl fmt::Display for ApiVersion {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{}.{}", self.major(), self.minor(), self.patch())
  }
}

/// A manifest `file_format_version`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ManifestVersion(semver::Version);

impl ManifestVersion {
  pub fn new(major: u64, minor: u64, patch: u64) -> Self {
    Self(semver::Version::new(major, minor, patch))
  }

  pub fn parse(input: &str) -> Result<Self, VersionError> {
    parse_triple(input).map(Self)
  }
}

impl fmt::Display for ManifestVersion {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

fn parse_triple(input: &str) -> Result<semver::Version, VersionError> {
  let version = semver::Version::parse(input.trim()).map_err(|e| VersionError::Invalid {
    input: input.to_string(),
    reason: e.to_string(),
  })?;
  if !version.pre.is_empty() || !version.build.is_empty() {
    return Err(VersionError::Invalid {
      input: input.to_string(),
      reason: "pre-release and build metadata are not allowed".to_string(),
    });
  }
  Ok(version)
}
