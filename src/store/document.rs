//! In-memory shape of the persisted state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{RecordKind, StoreError};
use crate::model::{
    Flavor, FlavorId, Formation, FormationId, Layer, LayerId, LayerSecret, NewNode, Node, NodeId,
    NodeState, Provider, ProviderId,
};

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub(crate) struct StateDocument {
    #[serde(default)]
    pub(crate) providers: BTreeMap<ProviderId, Provider>,
    #[serde(default)]
    pub(crate) flavors: BTreeMap<FlavorId, Flavor>,
    #[serde(default)]
    pub(crate) formations: BTreeMap<FormationId, Formation>,
    #[serde(default)]
    pub(crate) layers: Vec<Layer>,
    #[serde(default)]
    pub(crate) secrets: Vec<LayerSecret>,
    /// Kept sorted by `sequence`.
    #[serde(default)]
    pub(crate) nodes: Vec<Node>,
    #[serde(default)]
    pub(crate) next_sequence: u64,
}

fn in_layer(node: &Node, formation: &FormationId, layer: &LayerId) -> bool {
    &node.formation == formation && &node.layer == layer
}

impl StateDocument {
    pub(crate) fn insert_node(&mut self, new: NewNode) -> Node {
        self.next_sequence += 1;
        let node = Node {
            id: NodeId::generate(),
            formation: new.formation,
            layer: new.layer,
            external_id: None,
            state: NodeState::Requested,
            containers: 0,
            sequence: self.next_sequence,
        };
        self.nodes.push(node.clone());
        node
    }

    pub(crate) fn layer_nodes(&self, formation: &FormationId, layer: &LayerId) -> Vec<Node> {
        self.nodes
            .iter()
            .filter(|node| in_layer(node, formation, layer))
            .cloned()
            .collect()
    }

    pub(crate) fn update_node(&mut self, node: &Node) -> Result<(), StoreError> {
        let slot = self
            .nodes
            .iter_mut()
            .find(|candidate| candidate.id == node.id)
            .ok_or_else(|| StoreError::Missing {
                kind: RecordKind::Node,
                id: node.id.to_string(),
            })?;
        *slot = node.clone();
        Ok(())
    }

    pub(crate) fn remove_node(&mut self, id: &NodeId) -> bool {
        let before = self.nodes.len();
        self.nodes.retain(|node| &node.id != id);
        self.nodes.len() != before
    }

    pub(crate) fn layer(&self, formation: &FormationId, id: &LayerId) -> Option<&Layer> {
        self.layers
            .iter()
            .find(|layer| &layer.formation == formation && &layer.id == id)
    }

    pub(crate) fn insert_layer(&mut self, layer: Layer) -> Result<(), StoreError> {
        if self.layer(&layer.formation, &layer.id).is_some() {
            return Err(StoreError::Duplicate {
                kind: RecordKind::Layer,
                id: layer.id.to_string(),
            });
        }
        self.layers.push(layer);
        Ok(())
    }

    pub(crate) fn save_layer(&mut self, layer: &Layer) -> Result<(), StoreError> {
        let slot = self
            .layers
            .iter_mut()
            .find(|candidate| candidate.formation == layer.formation && candidate.id == layer.id)
            .ok_or_else(|| StoreError::Missing {
                kind: RecordKind::Layer,
                id: layer.id.to_string(),
            })?;
        *slot = layer.clone();
        Ok(())
    }

    pub(crate) fn save_secret(&mut self, secret: LayerSecret) {
        self.secrets
            .retain(|held| !(held.formation == secret.formation && held.layer == secret.layer));
        self.secrets.push(secret);
    }

    pub(crate) fn secret(&self, formation: &FormationId, layer: &LayerId) -> Option<&LayerSecret> {
        self.secrets
            .iter()
            .find(|held| &held.formation == formation && &held.layer == layer)
    }

    /// Removes a layer together with its secret and node records.
    pub(crate) fn remove_layer(&mut self, formation: &FormationId, id: &LayerId) -> bool {
        let before = self.layers.len();
        self.layers
            .retain(|layer| !(&layer.formation == formation && &layer.id == id));
        self.secrets
            .retain(|held| !(&held.formation == formation && &held.layer == id));
        self.nodes.retain(|node| !in_layer(node, formation, id));
        self.layers.len() != before
    }

    /// Removes a formation and everything it owns.
    pub(crate) fn remove_formation(&mut self, id: &FormationId) -> bool {
        let removed = self.formations.remove(id).is_some();
        self.layers.retain(|layer| &layer.formation != id);
        self.secrets.retain(|held| &held.formation != id);
        self.nodes.retain(|node| &node.formation != id);
        removed
    }
}
