//! Roll-up of node state across a formation's layers.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::model::{FormationId, LayerId, NodeState};
use crate::store::{FormationStore, LayerStore, NodeRegistry, StoreError};

/// Aggregate view of one formation.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct FormationSummary {
    /// `up` node count per layer, including layers with no nodes.
    pub layers: BTreeMap<LayerId, usize>,
    /// Total `up` nodes.
    pub nodes: usize,
    /// Containers hosted across all `up` nodes.
    pub containers: u64,
    /// `up` nodes in layers tagged as proxy layers.
    pub proxy: usize,
    /// Current release pointer.
    pub release: u64,
}

/// Errors raised while summarising a formation.
#[derive(Debug, Error)]
pub enum SummaryError {
    /// Raised when the formation does not exist.
    #[error("formation {0} does not exist")]
    UnknownFormation(FormationId),
    /// Wrapper for store failures.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Summarises a formation from the store.
///
/// # Errors
///
/// Returns [`SummaryError::UnknownFormation`] for a missing formation and
/// [`SummaryError::Store`] when the state cannot be read.
pub fn summarize<S>(store: &S, formation: &FormationId) -> Result<FormationSummary, SummaryError>
where
    S: FormationStore + LayerStore + NodeRegistry + ?Sized,
{
    let record = store
        .get_formation(formation)?
        .ok_or_else(|| SummaryError::UnknownFormation(formation.clone()))?;
    let layers = store.list_layers(formation)?;
    let nodes = store.list_by_formation(formation)?;

    let mut summary = FormationSummary {
        release: record.release,
        ..FormationSummary::default()
    };
    for layer in &layers {
        let up: Vec<_> = nodes
            .iter()
            .filter(|node| node.layer == layer.id && node.state == NodeState::Up)
            .collect();
        summary.nodes += up.len();
        summary.containers += up.iter().map(|node| u64::from(node.containers)).sum::<u64>();
        if layer.proxy {
            summary.proxy += up.len();
        }
        summary.layers.insert(layer.id.clone(), up.len());
    }
    Ok(summary)
}
