//! Layer and driver manifests.
//!
//! A manifest is a JSON document describing either one driver or one or more
//! layers. [`ManifestStore`] reads and validates them and caches the result.

mod parse;
mod raw;
mod store;
mod types;

pub use parse::{ManifestError, parse_manifest, parse_manifest_str};
pub use store::ManifestStore;
pub use types::*;
