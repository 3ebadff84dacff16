use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{ActivatedLayer, ActivationList, ActivationSource, ResolveRequest};
use crate::consts::MAX_NAME_SIZE;
use crate::error::{LoaderError, try_reserve};
use crate::manifest::LayerRecord;
use crate::registry::LayerRegistry;

/// Non-empty printable ASCII shorter than the ABI's name buffer.
pub fn is_valid_layer_name(name: &str) -> bool {
  !name.is_empty() && name.len() < MAX_NAME_SIZE && name.bytes().all(|b| (0x20..0x7f).contains(&b))
}

/// Build the [`ActivationList`] for one creation call.
///
/// Sources are added in order: implicit layers, environment layers, then the
/// application's. Only problems with application-named layers are errors;
/// everything else is logged and skipped.
pub fn resolve(registry: &LayerRegistry, request: &ResolveRequest) -> Result<ActivationList, LoaderError> {
  let mut resolver = Resolver::new(registry, request);

  for layer in registry.implicit_layers() {
    if resolver.implicit_enabled(layer) {
      resolver.activate(layer, ActivationSource::Implicit, false)?;
    }
  }

  for name in &request.env_layers {
    resolver.activate_named(name, ActivationSource::Environment)?;
  }
  if !request.layers_enable.is_empty() {
    for layer in registry.layers() {
      if request.layers_enable.matches_layer(&layer.name, layer.kind) {
        debug!(layer = %layer.name, "layer enabled by filter");
        resolver.activate(layer, ActivationSource::Environment, false)?;
      }
    }
  }

  for name in &request.app_layers {
    resolver.activate_named(name, ActivationSource::Application)?;
  }

  resolver.apply_blacklist();
  Ok(resolver.finish())
}

struct Resolver<'a> {
  registry: &'a LayerRegistry,
  request: &'a ResolveRequest,
  override_layer: Option<&'a Arc<LayerRecord>>,
  app_list: Vec<ActivatedLayer>,
  expanded: Vec<ActivatedLayer>,
  expanding: Vec<String>,
}

impl<'a> Resolver<'a> {
  fn new(registry: &'a LayerRegistry, request: &'a ResolveRequest) -> Self {
    let mut resolver = Self {
      registry,
      request,
      override_layer: None,
      app_list: Vec::new(),
      expanded: Vec::new(),
      expanding: Vec::new(),
    };
    resolver.override_layer = registry
      .active_override()
      .filter(|layer| resolver.implicit_enabled(layer));
    resolver
  }

  /// The implicit enable rules, applied in this order: enable condition,
  /// expiration, disable condition, override membership, API version.
  fn implicit_enabled(&self, layer: &LayerRecord) -> bool {
    let mut enabled = layer.enable_environment.as_ref().is_none_or(|cond| cond.matches());

    if layer.is_expired(self.registry.context().now) {
      debug!(layer = %layer.name, "layer expired");
      enabled = false;
    }

    if layer.disable_environment.as_ref().is_some_and(|cond| cond.is_set()) {
      debug!(layer = %layer.name, "layer disabled by environment");
      enabled = false;
    }

    if self
      .override_layer
      .is_some_and(|o| o.name != layer.name && o.components().contains(&layer.name))
    {
      debug!(layer = %layer.name, "layer enabled by override layer");
      enabled = true;
    }

    if enabled && !layer.api_version.meets(self.request.api_version) {
      warn!(
        layer = %layer.name,
        layer_version = %layer.api_version,
        app_version = %self.request.api_version,
        "implicit layer supports an older API version than the application requests; not loading it"
      );
      enabled = false;
    }

    enabled
  }

  fn disabled_by_filter(&self, layer: &LayerRecord) -> bool {
    self.request.layers_disable.matches_layer(&layer.name, layer.kind)
      && !self.request.layers_enable.matches_layer(&layer.name, layer.kind)
  }

  fn activate_named(&mut self, name: &str, source: ActivationSource) -> Result<(), LoaderError> {
    let from_app = source == ActivationSource::Application;

    if !is_valid_layer_name(name) {
      if from_app {
        return Err(LoaderError::layer_not_present(name));
      }
      warn!(layer = %name.escape_debug(), ?source, "ignoring malformed layer name");
      return Ok(());
    }

    let registry = self.registry;
    let Some(layer) = registry.get(name) else {
      if from_app {
        return Err(LoaderError::layer_not_present(name));
      }
      warn!(layer = %name, ?source, "requested layer not found; skipping");
      return Ok(());
    };

    if from_app && !self.disabled_by_filter(layer) && !self.app_list.iter().any(|l| l.name() == name) {
      try_reserve(&mut self.app_list, 1)?;
      self.app_list.push(ActivatedLayer {
        layer: Arc::clone(layer),
        source,
        app_accountable: true,
      });
    }

    self.activate(layer, source, from_app)
  }

  /// Append `layer`, or its components when it is a meta-layer. A layer
  /// already present keeps its position.
  fn activate(
    &mut self,
    layer: &Arc<LayerRecord>,
    source: ActivationSource,
    app_accountable: bool,
  ) -> Result<(), LoaderError> {
    if self.disabled_by_filter(layer) {
      info!(layer = %layer.name, ?source, "layer disabled by filter");
      return Ok(());
    }

    if !layer.is_meta() {
      if let Some(existing) = self.expanded.iter_mut().find(|l| l.name() == layer.name) {
        existing.app_accountable |= app_accountable;
        return Ok(());
      }
      try_reserve(&mut self.expanded, 1)?;
      debug!(layer = %layer.name, ?source, "activating layer");
      self.expanded.push(ActivatedLayer {
        layer: Arc::clone(layer),
        source,
        app_accountable,
      });
      return Ok(());
    }

    if self.expanding.contains(&layer.name) {
      warn!(layer = %layer.name, "meta-layer reaches itself; skipping");
      return Ok(());
    }
    self.expanding.push(layer.name.clone());

    let registry = self.registry;
    for component in layer.components() {
      let Some(record) = registry.get(component) else {
        warn!(layer = %layer.name, component = %component, "meta-layer component not found");
        continue;
      };
      if record.is_implicit() && !self.implicit_enabled(record) {
        continue;
      }
      self.activate(record, source, app_accountable)?;
    }

    self.expanding.pop();
    Ok(())
  }

  fn apply_blacklist(&mut self) {
    let Some(override_layer) = self.override_layer else {
      return;
    };
    if override_layer.blacklisted_layers.is_empty() {
      return;
    }

    self.expanded.retain(|l| {
      let blocked = l.layer.name != override_layer.name && override_layer.blacklisted_layers.contains(&l.layer.name);
      if blocked {
        info!(layer = %l.layer.name, "layer blacklisted by override layer");
      }
      !blocked
    });
  }

  fn finish(self) -> ActivationList {
    ActivationList {
      app_list: self.app_list,
      expanded: self.expanded,
      enabled_extensions: self.request.enabled_extensions.clone(),
    }
  }
}
