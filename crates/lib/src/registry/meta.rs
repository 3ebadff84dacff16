//! Meta-layer verification.
//!
//! A meta-layer is valid when every component exists, no component leads back
//! to the meta-layer, and its API version covers every component's. Removing
//! an invalid meta-layer can invalidate meta-layers that list it, so the check
//! repeats until nothing changes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::warn;

use crate::manifest::LayerRecord;

/// Remove invalid meta-layers from `layers`, cascading.
///
/// Records are tracked by position: override layers share one reserved name,
/// and a broken candidate must not take the others with it.
pub(super) fn verify_meta_layers(layers: &mut Vec<Arc<LayerRecord>>) {
  loop {
    let invalid = find_invalid(layers);
    if invalid.is_empty() {
      return;
    }
    let mut index = 0;
    layers.retain(|_| {
      let keep = !invalid.contains(&index);
      index += 1;
      keep
    });
  }
}

fn find_invalid(layers: &[Arc<LayerRecord>]) -> HashSet<usize> {
  let mut graph: DiGraph<usize, ()> = DiGraph::new();
  let nodes: Vec<NodeIndex> = (0..layers.len()).map(|index| graph.add_node(index)).collect();

  // Components resolve to the first record carrying the name.
  let mut by_name: HashMap<&str, usize> = HashMap::new();
  for (index, layer) in layers.iter().enumerate() {
    by_name.entry(layer.name.as_str()).or_insert(index);
  }

  let mut invalid = HashSet::new();

  for (index, layer) in layers.iter().enumerate().filter(|(_, l)| l.is_meta()) {
    for component in layer.components() {
      if *component == layer.name {
        warn!(layer = %layer.name, "meta-layer lists itself as a component; removing it");
        invalid.insert(index);
        continue;
      }

      let Some(&target) = by_name.get(component.as_str()) else {
        warn!(
          layer = %layer.name,
          manifest = %layer.manifest_path.display(),
          component = %component,
          "meta-layer component not found; removing meta-layer"
        );
        invalid.insert(index);
        continue;
      };

      let record = &layers[target];
      if !layer.api_version.meets(record.api_version) {
        warn!(
          layer = %layer.name,
          layer_version = %layer.api_version,
          component = %component,
          component_version = %record.api_version,
          "meta-layer API version is lower than its component's; removing meta-layer"
        );
        invalid.insert(index);
      }

      graph.add_edge(nodes[index], nodes[target], ());
    }
  }

  for scc in tarjan_scc(&graph) {
    let cyclic = scc.len() > 1 || scc.first().is_some_and(|&node| graph.contains_edge(node, node));
    if !cyclic {
      continue;
    }
    for node in scc {
      let index = graph[node];
      warn!(layer = %layers[index].name, "meta-layer is part of a component cycle; removing it");
      invalid.insert(index);
    }
  }

  invalid
}
