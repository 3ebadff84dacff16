//! vkload-lib: a userspace loader for Vulkan-style drivers and layers
//!
//! The loader sits between an application and one or more drivers:
//! - `manifest`: parses driver and layer manifests into records
//! - `registry`: aggregates layers per session, verifies meta-layers, picks the override layer
//! - `activation`: decides which layers a creation call activates, and in which order
//! - `chain`: loads layer libraries and wires instance and device dispatch chains
//! - `devices`: stable loader handles for physical devices and device groups
//! - `loader`: the process-wide state tying the above together

pub mod activation;
pub mod chain;
pub mod consts;
pub mod devices;
pub mod discovery;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod ffi;
pub mod filter;
pub mod instance;
pub mod loader;
pub mod logging;
pub mod manifest;
pub mod platform;
pub mod registry;
pub mod settings;
mod sync;
pub mod version;

pub use error::{LoaderError, VkResult};
pub use instance::{Device, Instance};
pub use loader::{LayerProperties, Loader, LoaderConfig};
