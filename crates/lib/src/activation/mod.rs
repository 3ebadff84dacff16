//! Layer activation.
//!
//! [`resolve`] decides which registry layers go into a chain for one
//! creation call and in which order. The result keeps two views: what the
//! application asked for, and what is actually wired after meta-layers are
//! expanded.

mod resolve;

use std::sync::Arc;

use crate::filter::NameFilter;
use crate::manifest::LayerRecord;
use crate::settings::LoaderSettings;
use crate::version::ApiVersion;

pub use resolve::{is_valid_layer_name, resolve};

/// Where a layer's activation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationSource {
  Implicit,
  Environment,
  Application,
}

/// One layer in an [`ActivationList`].
#[derive(Debug, Clone)]
pub struct ActivatedLayer {
  pub layer: Arc<LayerRecord>,
  pub source: ActivationSource,
  /// The application named this layer, directly or through a meta-layer it
  /// requested. Failing to load it fails the creation call.
  pub app_accountable: bool,
}

impl ActivatedLayer {
  pub fn name(&self) -> &str {
    &self.layer.name
  }
}

/// The layers to insert into one chain.
#[derive(Debug, Clone, Default)]
pub struct ActivationList {
  app_list: Vec<ActivatedLayer>,
  expanded: Vec<ActivatedLayer>,
  enabled_extensions: Vec<String>,
}

impl ActivationList {
  /// Layers the application requested, in request order, meta-layers unexpanded.
  pub fn app_list(&self) -> &[ActivatedLayer] {
    &self.app_list
  }

  /// Layers to wire, outermost (closest to the application) first.
  pub fn expanded(&self) -> &[ActivatedLayer] {
    &self.expanded
  }

  /// Extension names the creation call enables.
  pub fn enabled_extensions(&self) -> &[String] {
    &self.enabled_extensions
  }

  pub fn is_empty(&self) -> bool {
    self.expanded.is_empty()
  }

  pub fn contains(&self, name: &str) -> bool {
    self.expanded.iter().any(|l| l.name() == name)
  }

  pub fn get(&self, name: &str) -> Option<&ActivatedLayer> {
    self.expanded.iter().find(|l| l.name() == name)
  }

  /// Whether an activated layer declares the instance extension.
  pub fn provides_instance_extension(&self, name: &str) -> bool {
    self.expanded.iter().any(|l| l.layer.provides_instance_extension(name))
  }

  /// Whether an activated layer declares the device extension.
  pub fn provides_device_extension(&self, name: &str) -> bool {
    self.expanded.iter().any(|l| l.layer.provides_device_extension(name))
  }

  /// Enabled extensions that an activated layer provides.
  pub fn layer_provided_extensions(&self) -> impl Iterator<Item = &str> {
    self
      .enabled_extensions
      .iter()
      .filter(|e| self.provides_instance_extension(e))
      .map(String::as_str)
  }
}

/// Inputs to [`resolve`] for one creation call.
#[derive(Debug, Clone)]
pub struct ResolveRequest {
  /// Layer names the application passed, in order.
  pub app_layers: Vec<String>,
  pub enabled_extensions: Vec<String>,
  /// The application's requested API version; 0 means 1.0.
  pub api_version: ApiVersion,
  /// Layers named by `VK_INSTANCE_LAYERS`.
  pub env_layers: Vec<String>,
  pub layers_enable: NameFilter,
  pub layers_disable: NameFilter,
}

impl ResolveRequest {
  pub fn new(app_layers: Vec<String>, enabled_extensions: Vec<String>, api_version: ApiVersion) -> Self {
    Self {
      app_layers,
      enabled_extensions,
      api_version: api_version.or_default_1_0(),
      env_layers: Vec::new(),
      layers_enable: NameFilter::default(),
      layers_disable: NameFilter::default(),
    }
  }

  /// Take the environment layer list and filters from `settings`.
  pub fn with_settings(mut self, settings: &LoaderSettings) -> Self {
    self.env_layers = settings.instance_layers.clone();
    self.layers_enable = settings.layers_enable.clone();
    self.layers_disable = settings.layers_disable.clone();
    self
  }
}
