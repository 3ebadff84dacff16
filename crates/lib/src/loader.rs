//! Process-wide loader state.
//!
//! A [`Loader`] owns three independently locked containers. The instance
//! table lock is held across a whole instance creation. The manifest lock
//! only covers parsing, so global queries never wait on instance creation.
//! The driver lock guards the lazily loaded driver set. Locks are taken in
//! that order, and the manifest and driver locks are never held together.

use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::activation::{ResolveRequest, resolve};
use crate::chain::{ChainContext, build_instance_chain};
use crate::consts::{LOADER_API_VERSION, is_known_instance_extension};
use crate::devices::{DeviceRegistry, GpuOrdering};
use crate::discovery::{ManifestFinder, SearchPathFinder};
use crate::dispatch::{InstanceCreateInfo, LibraryLoader};
use crate::driver::DriverSet;
use crate::error::{LoaderError, try_reserve};
use crate::ffi::NativeLoader;
use crate::instance::Instance;
use crate::logging;
use crate::manifest::{ExtensionProperties, LayerKind, LayerRecord, ManifestStore};
use crate::registry::{AppContext, LayerRegistry};
use crate::settings::LoaderSettings;
use crate::sync::lock;
use crate::version::ApiVersion;

/// Settings plus the collaborators the loader reaches the outside world through.
#[derive(Clone)]
pub struct LoaderConfig {
  pub settings: LoaderSettings,
  pub finder: Arc<dyn ManifestFinder>,
  pub libraries: Arc<dyn LibraryLoader>,
  pub ordering: Option<Arc<dyn GpuOrdering>>,
  pub context: AppContext,
}

impl fmt::Debug for LoaderConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LoaderConfig")
      .field("settings", &self.settings)
      .field("ordering", &self.ordering.is_some())
      .field("context", &self.context)
      .finish_non_exhaustive()
  }
}

impl LoaderConfig {
  /// Environment settings, standard search paths, native libraries.
  pub fn from_env() -> Self {
    Self {
      settings: LoaderSettings::from_env(),
      finder: Arc::new(SearchPathFinder::new()),
      libraries: Arc::new(NativeLoader::new()),
      ordering: None,
      context: AppContext::current(),
    }
  }

  pub fn with_settings(mut self, settings: LoaderSettings) -> Self {
    self.settings = settings;
    self
  }

  pub fn with_finder(mut self, finder: Arc<dyn ManifestFinder>) -> Self {
    self.finder = finder;
    self
  }

  pub fn with_libraries(mut self, libraries: Arc<dyn LibraryLoader>) -> Self {
    self.libraries = libraries;
    self
  }

  pub fn with_ordering(mut self, ordering: Arc<dyn GpuOrdering>) -> Self {
    self.ordering = Some(ordering);
    self
  }

  pub fn with_context(mut self, context: AppContext) -> Self {
    self.context = context;
    self
  }
}

/// Name and versions of an available layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerProperties {
  pub name: String,
  pub api_version: ApiVersion,
  pub implementation_version: u32,
  pub description: String,
}

impl From<&LayerRecord> for LayerProperties {
  fn from(layer: &LayerRecord) -> Self {
    Self {
      name: layer.name.clone(),
      api_version: layer.api_version,
      implementation_version: layer.implementation_version,
      description: layer.description.clone(),
    }
  }
}

/// Ids of the live instances.
#[derive(Debug, Default)]
struct InstanceTable {
  next_id: u64,
  live: Vec<u64>,
}

impl InstanceTable {
  fn register(&mut self) -> Result<u64, LoaderError> {
    try_reserve(&mut self.live, 1)?;
    self.next_id += 1;
    self.live.push(self.next_id);
    Ok(self.next_id)
  }
}

pub(crate) struct LoaderShared {
  config: LoaderConfig,
  instances: Mutex<InstanceTable>,
  manifests: Mutex<ManifestStore>,
  drivers: Mutex<Option<Arc<DriverSet>>>,
}

impl LoaderShared {
  pub(crate) fn unregister(&self, id: u64) {
    lock(&self.instances).live.retain(|live| *live != id);
  }
}

/// The loader. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Loader {
  shared: Arc<LoaderShared>,
}

impl fmt::Debug for Loader {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Loader")
      .field("config", &self.shared.config)
      .field("instances", &self.instance_count())
      .finish()
  }
}

impl Loader {
  pub fn new(config: LoaderConfig) -> Self {
    Self {
      shared: Arc::new(LoaderShared {
        config,
        instances: Mutex::new(InstanceTable::default()),
        manifests: Mutex::new(ManifestStore::new()),
        drivers: Mutex::new(None),
      }),
    }
  }

  /// A loader configured from the environment. Installs the stderr log
  /// subscriber when `VK_LOADER_DEBUG` is set.
  pub fn from_env() -> Self {
    let config = LoaderConfig::from_env();
    if let Some(debug) = config.settings.debug.as_deref() {
      logging::init(Some(debug));
    }
    Self::new(config)
  }

  pub fn config(&self) -> &LoaderConfig {
    &self.shared.config
  }

  /// Resolve layers, build the instance chain and create an instance on
  /// every usable driver.
  pub fn create_instance(&self, info: &InstanceCreateInfo) -> Result<Instance, LoaderError> {
    let config = &self.shared.config;
    let mut instances = lock(&self.shared.instances);

    let registry = self.scan_layers()?;
    let request = ResolveRequest::new(
      info.enabled_layers.clone(),
      info.enabled_extensions.clone(),
      info.api_version,
    )
    .with_settings(&config.settings);
    let activation = resolve(&registry, &request)?;

    let drivers = self.driver_set()?;
    let ctx = ChainContext {
      libraries: config.libraries.as_ref(),
      settings: &config.settings,
    };
    let built = build_instance_chain(&activation, &drivers, info, ctx)?;

    let id = instances.register()?;
    info!(
      instance = id,
      layers = ?built.chain.layer_names(),
      drivers = built.created.driver_count(),
      "created instance"
    );

    Ok(Instance::new(
      id,
      Arc::downgrade(&self.shared),
      built.created,
      built.chain,
      activation,
      request.api_version,
      drivers,
      DeviceRegistry::new(config.ordering.clone()),
    ))
  }

  /// Every available layer, implicit layers first.
  pub fn enumerate_instance_layer_properties(&self) -> Result<Vec<LayerProperties>, LoaderError> {
    let registry = self.scan_layers()?;
    let mut properties = Vec::new();
    try_reserve(&mut properties, registry.len())?;
    properties.extend(registry.layers().iter().map(|layer| LayerProperties::from(layer.as_ref())));
    Ok(properties)
  }

  /// Instance extensions of the named layer, or without a name, of every
  /// driver plus the implicit layers that would be enabled.
  pub fn enumerate_instance_extension_properties(
    &self,
    layer: Option<&str>,
  ) -> Result<Vec<ExtensionProperties>, LoaderError> {
    let registry = self.scan_layers()?;

    if let Some(name) = layer {
      let record = registry.get(name).ok_or_else(|| LoaderError::layer_not_present(name))?;
      let mut extensions = Vec::new();
      collect_layer_extensions(&registry, record, &mut extensions, 0)?;
      return Ok(extensions);
    }

    let settings = &self.shared.config.settings;
    let drivers = self.driver_set()?;
    let mut extensions: Vec<ExtensionProperties> = drivers
      .instance_extensions()?
      .into_iter()
      .filter(|e| settings.disable_instance_extension_filter || is_known_instance_extension(&e.name))
      .collect();

    let mut request = ResolveRequest::new(Vec::new(), Vec::new(), ApiVersion::default());
    request.layers_enable = settings.layers_enable.clone();
    request.layers_disable = settings.layers_disable.clone();
    let implicit = resolve(&registry, &request)?;
    for activated in implicit.expanded() {
      try_reserve(&mut extensions, activated.layer.instance_extensions.len())?;
      for extension in &activated.layer.instance_extensions {
        if !extensions.iter().any(|e| e.name == extension.name) {
          extensions.push(extension.clone());
        }
      }
    }
    Ok(extensions)
  }

  /// The API version the loader implements.
  pub fn enumerate_instance_version(&self) -> ApiVersion {
    LOADER_API_VERSION
  }

  /// Drop the preloaded driver set; the next query loads drivers again.
  /// Live instances keep the drivers they were created with.
  pub fn reload_drivers(&self) {
    lock(&self.shared.drivers).take();
    debug!("driver cache cleared");
  }

  /// Clear every cache.
  pub fn teardown(&self) {
    let _instances = lock(&self.shared.instances);
    lock(&self.shared.manifests).clear();
    lock(&self.shared.drivers).take();
    debug!("loader state torn down");
  }

  /// Number of live instances.
  pub fn instance_count(&self) -> usize {
    lock(&self.shared.instances).live.len()
  }

  /// Build the layer registry: implicit layers first, so the override layer
  /// can restrict where explicit layers are searched for.
  fn scan_layers(&self) -> Result<LayerRegistry, LoaderError> {
    let config = &self.shared.config;
    let mut store = lock(&self.shared.manifests);

    let mut registry = LayerRegistry::new(config.context.clone());
    let implicit = config.finder.implicit_layer_manifests(&config.settings);
    registry.add_manifests(&mut store, &implicit, LayerKind::Implicit)?;

    let override_paths = registry
      .override_candidate()
      .map(|layer| layer.override_paths.clone())
      .unwrap_or_default();
    let explicit = config.finder.explicit_layer_manifests(&config.settings, &override_paths);
    registry.add_manifests(&mut store, &explicit, LayerKind::Explicit)?;

    registry.finalize();
    debug!(layers = registry.len(), "scanned layers");
    Ok(registry)
  }

  /// The preloaded driver set, loading it on first use.
  fn driver_set(&self) -> Result<Arc<DriverSet>, LoaderError> {
    if let Some(drivers) = lock(&self.shared.drivers).as_ref() {
      return Ok(Arc::clone(drivers));
    }

    let config = &self.shared.config;
    let paths = config.finder.driver_manifests(&config.settings);
    let loaded = {
      let mut store = lock(&self.shared.manifests);
      Arc::new(DriverSet::load(&mut store, &paths, config.libraries.as_ref(), &config.settings)?)
    };

    // Another thread may have loaded the set meanwhile; keep the first.
    let mut cached = lock(&self.shared.drivers);
    Ok(Arc::clone(cached.get_or_insert(loaded)))
  }
}

/// A layer's declared instance extensions; for meta-layers, the union of
/// their components'.
fn collect_layer_extensions(
  registry: &LayerRegistry,
  layer: &LayerRecord,
  out: &mut Vec<ExtensionProperties>,
  depth: usize,
) -> Result<(), LoaderError> {
  // Meta-layers of a finalized registry are acyclic.
  if depth > registry.len() {
    return Ok(());
  }
  try_reserve(out, layer.instance_extensions.len())?;
  for extension in &layer.instance_extensions {
    if !out.iter().any(|e| e.name == extension.name) {
      out.push(extension.clone());
    }
  }
  for component in layer.components() {
    if let Some(record) = registry.get(component) {
      collect_layer_extensions(registry, record, out, depth + 1)?;
    }
  }
  Ok(())
}
