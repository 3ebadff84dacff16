//! Per-session layer registry.
//!
//! Layers are added from manifests in discovery order; the first definition
//! of a name wins. [`LayerRegistry::finalize`] then removes invalid
//! meta-layers and keeps at most one override layer.

mod context;
mod meta;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{LoaderError, try_reserve};
use crate::manifest::{LayerKind, LayerRecord, ManifestStore, ParsedManifest};

pub use context::AppContext;

/// All layers known to one loader session.
#[derive(Debug, Clone)]
pub struct LayerRegistry {
  layers: Vec<Arc<LayerRecord>>,
  context: AppContext,
}

impl LayerRegistry {
  pub fn new(context: AppContext) -> Self {
    Self {
      layers: Vec::new(),
      context,
    }
  }

  /// Parse `paths` and aggregate their layers, then finalize.
  pub fn scan(
    store: &mut ManifestStore,
    paths: &[PathBuf],
    kind: LayerKind,
    context: AppContext,
  ) -> Result<Self, LoaderError> {
    let mut registry = Self::new(context);
    registry.add_manifests(store, paths, kind)?;
    registry.finalize();
    Ok(registry)
  }

  /// Parse `paths` and aggregate their layers.
  ///
  /// Manifests that cannot be read or parsed are logged and skipped. Only
  /// allocation failure is returned.
  pub fn add_manifests(
    &mut self,
    store: &mut ManifestStore,
    paths: &[PathBuf],
    kind: LayerKind,
  ) -> Result<(), LoaderError> {
    for path in paths {
      let parsed = match store.load(path, kind) {
        Ok(parsed) => parsed,
        Err(err) => {
          warn!(error = %err, "skipping layer manifest");
          continue;
        }
      };

      match parsed.as_ref() {
        ParsedManifest::Layers { layers, .. } => {
          try_reserve(&mut self.layers, layers.len())?;
          for layer in layers {
            self.add_layer(layer.clone());
          }
        }
        ParsedManifest::Driver(_) => {
          warn!(manifest = %path.display(), "driver manifest in a layer search path ignored");
        }
      }
    }
    Ok(())
  }

  /// Add a single layer. A name that is already registered is ignored, except
  /// for override layers, which are all kept until [`finalize`](Self::finalize).
  pub fn add_layer(&mut self, layer: LayerRecord) {
    if !layer.is_override() && self.get(&layer.name).is_some() {
      warn!(
        layer = %layer.name,
        manifest = %layer.manifest_path.display(),
        "layer already registered; ignoring later definition"
      );
      return;
    }
    debug!(layer = %layer.name, kind = ?layer.kind, "registered layer");
    self.layers.push(Arc::new(layer));
  }

  /// Remove invalid meta-layers, then keep only the override layer that
  /// applies to this application.
  pub fn finalize(&mut self) {
    meta::verify_meta_layers(&mut self.layers);

    let keep = self.override_candidate().map(|layer| Arc::as_ptr(layer));
    self.layers.retain(|layer| {
      if !layer.is_override() || Some(Arc::as_ptr(layer)) == keep {
        return true;
      }
      debug!(manifest = %layer.manifest_path.display(), "dropping unused override layer");
      false
    });

    if let Some(active) = self.active_override() {
      debug!(manifest = %active.manifest_path.display(), "override layer active");
    }
  }

  /// The override layer that applies to this application: the first whose app
  /// keys name the executable, else the first without app keys.
  pub fn override_candidate(&self) -> Option<&Arc<LayerRecord>> {
    let overrides = || self.layers.iter().filter(|layer| layer.is_override());
    overrides()
      .find(|layer| layer.app_keys.iter().any(|key| self.context.matches_app_key(key)))
      .or_else(|| overrides().find(|layer| layer.app_keys.is_empty()))
  }

  /// The override layer left after [`finalize`](Self::finalize).
  pub fn active_override(&self) -> Option<&Arc<LayerRecord>> {
    self.layers.iter().find(|layer| layer.is_override())
  }

  pub fn get(&self, name: &str) -> Option<&Arc<LayerRecord>> {
    self.layers.iter().find(|layer| layer.name == name)
  }

  pub fn layers(&self) -> &[Arc<LayerRecord>] {
    &self.layers
  }

  pub fn implicit_layers(&self) -> impl Iterator<Item = &Arc<LayerRecord>> {
    self.layers.iter().filter(|layer| layer.is_implicit())
  }

  pub fn context(&self) -> &AppContext {
    &self.context
  }

  pub fn len(&self) -> usize {
    self.layers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.layers.is_empty()
  }
}
