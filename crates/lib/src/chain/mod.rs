//! Dispatch chain construction.
//!
//! An instance chain is built from the activated layers: each layer library
//! is opened and negotiated from the driver side outward, then creation runs
//! from the outermost layer down to the terminator, which fans out to every
//! driver. Device chains reuse the instance's layers that expose device entry
//! points and end in a terminator that calls the one driver owning the
//! physical device.

mod device;
mod instance;
mod negotiate;

pub use device::{BuiltDevice, DeviceChain, DeviceChainContext, build_device_chain};
pub use instance::{BuiltInstance, ChainContext, DriverInstance, InstanceChain, build_instance_chain};
pub use negotiate::{LayerLoadError, LoadedLayer, load_layer};
