use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::consts::{
  CURRENT_LAYER_INTERFACE_VERSION, GET_DEVICE_PROC_ADDR_SYMBOL, GET_INSTANCE_PROC_ADDR_SYMBOL, LAYER_NEGOTIATE_SYMBOL,
  MIN_SUPPORTED_LAYER_INTERFACE_VERSION,
};
use crate::dispatch::{DeviceLayer, InstanceLayer, LayerLibrary, LibraryError, LibraryLoader};
use crate::error::VkResult;
use crate::manifest::LayerRecord;

/// Why a layer could not be inserted into a chain.
#[derive(Debug, Error)]
pub enum LayerLoadError {
  #[error("meta-layers have no library")]
  MetaLayer,

  #[error(transparent)]
  Library(#[from] LibraryError),

  #[error("interface negotiation failed with {0}")]
  Negotiation(VkResult),

  #[error("unsupported layer interface version {0}")]
  UnsupportedInterface(u32),

  #[error("no instance proc-addr entry point exported")]
  MissingEntryPoint,
}

/// A layer library opened and negotiated for a chain.
#[derive(Clone)]
pub struct LoadedLayer {
  pub layer: Arc<LayerRecord>,
  pub interface_version: u32,
  pub instance: Option<Arc<dyn InstanceLayer>>,
  pub device: Option<Arc<dyn DeviceLayer>>,
  // Last, so the entry points above are gone before the library can close.
  pub(crate) library: Arc<dyn LayerLibrary>,
}

impl fmt::Debug for LoadedLayer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LoadedLayer")
      .field("layer", &self.layer.name)
      .field("interface_version", &self.interface_version)
      .field("instance", &self.instance.is_some())
      .field("device", &self.device.is_some())
      .finish()
  }
}

impl LoadedLayer {
  pub fn name(&self) -> &str {
    &self.layer.name
  }
}

/// Open a layer's library and find its entry points.
///
/// The negotiation export (manifest-named, else the default name) is tried
/// first. Without it, the proc-addr exports are looked up by the name the
/// manifest gives, then by the default name.
pub fn load_layer(layer: &Arc<LayerRecord>, libraries: &dyn LibraryLoader) -> Result<LoadedLayer, LayerLoadError> {
  let path = layer.library_path().ok_or(LayerLoadError::MetaLayer)?;
  let library = libraries.open_layer(path)?;

  let negotiate_symbol = layer
    .functions
    .negotiate_interface
    .as_deref()
    .unwrap_or(LAYER_NEGOTIATE_SYMBOL);

  let (interface_version, instance, device) =
    match library.negotiate_interface(negotiate_symbol, CURRENT_LAYER_INTERFACE_VERSION) {
      Some(result) => {
        let negotiated = result.map_err(LayerLoadError::Negotiation)?;
        let version = negotiated.interface_version;
        if !(MIN_SUPPORTED_LAYER_INTERFACE_VERSION..=CURRENT_LAYER_INTERFACE_VERSION).contains(&version) {
          return Err(LayerLoadError::UnsupportedInterface(version));
        }
        let instance = negotiated.instance.or_else(|| instance_entry(library.as_ref(), layer));
        let device = negotiated.device.or_else(|| device_entry(library.as_ref(), layer));
        (version, instance, device)
      }
      None => (
        MIN_SUPPORTED_LAYER_INTERFACE_VERSION,
        instance_entry(library.as_ref(), layer),
        device_entry(library.as_ref(), layer),
      ),
    };

  if instance.is_none() {
    return Err(LayerLoadError::MissingEntryPoint);
  }

  Ok(LoadedLayer {
    layer: Arc::clone(layer),
    interface_version,
    instance,
    device,
    library,
  })
}

fn instance_entry(library: &dyn LayerLibrary, layer: &LayerRecord) -> Option<Arc<dyn InstanceLayer>> {
  layer
    .functions
    .get_instance_proc_addr
    .as_deref()
    .and_then(|symbol| library.instance_entry(symbol))
    .or_else(|| library.instance_entry(GET_INSTANCE_PROC_ADDR_SYMBOL))
}

fn device_entry(library: &dyn LayerLibrary, layer: &LayerRecord) -> Option<Arc<dyn DeviceLayer>> {
  layer
    .functions
    .get_device_proc_addr
    .as_deref()
    .and_then(|symbol| library.device_entry(symbol))
    .or_else(|| library.device_entry(GET_DEVICE_PROC_ADDR_SYMBOL))
}
