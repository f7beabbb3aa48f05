//! Scale reconciliation engine.
//!
//! [`Reconciler::reconcile`] brings each named layer of a formation to its
//! requested node count. Preconditions are validated before any side effect;
//! provider failures during execution are collected per node and reported in
//! the [`ScaleOutcome`] rather than aborting the pass.
//!
//! A pass holds the formation's lock for its whole duration, so registry
//! reads made at the start stay valid until the pass ends. Provider calls are
//! issued concurrently and bounded by a semaphore sized from
//! `provider_concurrency`.

mod locks;
mod plan;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::aggregate::{FormationSummary, SummaryError, summarize};
use crate::model::{
    DesiredScale, Flavor, FormationId, Layer, LayerId, NewNode, Node, NodeId, NodeState, Provider,
    ProviderId,
};
use crate::provider::{
    Adapters, NodeRequest, NodeStatus, ProviderAdapter, ProviderError, ProvisionedNode,
};
use crate::store::{RecordKind, StateStore, StoreError};

pub use locks::FormationLocks;
use plan::{LayerPlan, plan_layer};

/// Default bound on in-flight provider calls per pass.
pub const DEFAULT_PROVIDER_CONCURRENCY: usize = 8;

/// Errors that reject a reconcile before or outside node execution.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Raised when the formation does not exist.
    #[error("formation {0} does not exist")]
    UnknownFormation(FormationId),
    /// Raised when the request names a layer the formation lacks.
    #[error("formation {formation} has no layer {layer}")]
    UnknownLayer {
        /// Formation addressed by the request.
        formation: FormationId,
        /// Layer that was not found.
        layer: LayerId,
    },
    /// Raised when a layer's flavor or provider record is gone.
    #[error("layer {layer} references missing {kind} {id}")]
    DanglingReference {
        /// Layer holding the reference.
        layer: LayerId,
        /// Kind of the missing record.
        kind: RecordKind,
        /// Identifier of the missing record.
        id: String,
    },
    /// Raised when a provider has no credentials.
    #[error("provider {provider} has no credentials")]
    MissingCredentials {
        /// Provider lacking credentials.
        provider: ProviderId,
    },
    /// Raised when an adapter cannot be connected for a provider.
    #[error("provider {provider} adapter unavailable: {source}")]
    Adapter {
        /// Provider whose adapter failed.
        provider: ProviderId,
        /// Adapter error.
        source: ProviderError,
    },
    /// Raised when a teardown left nodes behind.
    #[error("teardown of formation {formation} left {remaining} node(s) in place")]
    TeardownIncomplete {
        /// Formation being torn down.
        formation: FormationId,
        /// Nodes whose destroy failed.
        remaining: usize,
    },
    /// Wrapper for store failures.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReconcileError {
    /// Returns true when the caller can fix the request and retry.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        match self {
            Self::UnknownFormation(_)
            | Self::UnknownLayer { .. }
            | Self::DanglingReference { .. }
            | Self::MissingCredentials { .. } => true,
            Self::Adapter { source, .. } => matches!(
                source,
                ProviderError::Credentials { .. }
                    | ProviderError::Validation(_)
                    | ProviderError::Unsupported(_)
            ),
            Self::TeardownIncomplete { .. } | Self::Store(_) => false,
        }
    }
}

impl From<SummaryError> for ReconcileError {
    fn from(err: SummaryError) -> Self {
        match err {
            SummaryError::UnknownFormation(id) => Self::UnknownFormation(id),
            SummaryError::Store(inner) => Self::Store(inner),
        }
    }
}

/// Provider action a node failure occurred in.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeAction {
    /// Provisioning a new node.
    Create,
    /// Destroying an existing node.
    Destroy,
}

/// One provider failure collected during a pass.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct NodeFailure {
    /// Layer the node belongs to.
    pub layer: LayerId,
    /// Action that failed.
    pub action: NodeAction,
    /// Registry record involved, when one existed after the failure.
    pub node: Option<NodeId>,
    /// Provider error message.
    pub message: String,
}

/// Result of a reconcile pass.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ScaleOutcome {
    /// `up` node count per layer.
    pub layers: std::collections::BTreeMap<LayerId, usize>,
    /// Total `up` nodes.
    pub nodes: usize,
    /// Containers hosted across all `up` nodes.
    pub containers: u64,
    /// `up` nodes in proxy layers.
    pub proxy: usize,
    /// Release pointer after the pass.
    pub release: u64,
    /// Provider failures collected during the pass.
    pub failures: Vec<NodeFailure>,
}

impl ScaleOutcome {
    fn new(summary: FormationSummary, failures: Vec<NodeFailure>) -> Self {
        Self {
            layers: summary.layers,
            nodes: summary.nodes,
            containers: summary.containers,
            proxy: summary.proxy,
            release: summary.release,
            failures,
        }
    }

    /// Returns true when some requested action did not complete.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Count of `up` nodes in `layer`.
    #[must_use]
    pub fn layer_count(&self, layer: &LayerId) -> usize {
        self.layers.get(layer).copied().unwrap_or_default()
    }
}

/// Everything a pass needs to act on one layer.
struct LayerWork {
    layer: Layer,
    flavor: Flavor,
    adapter: Arc<dyn ProviderAdapter>,
    target: u32,
}

/// Drives formations towards requested layer counts.
pub struct Reconciler<S> {
    store: Arc<S>,
    adapters: Adapters,
    locks: Arc<FormationLocks>,
    concurrency: usize,
}

impl<S> std::fmt::Debug for Reconciler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("adapters", &self.adapters)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl<S: StateStore> Reconciler<S> {
    /// Creates a reconciler over `store` using `adapters` for provider calls.
    #[must_use]
    pub fn new(store: Arc<S>, adapters: Adapters) -> Self {
        Self {
            store,
            adapters,
            locks: Arc::new(FormationLocks::new()),
            concurrency: DEFAULT_PROVIDER_CONCURRENCY,
        }
    }

    /// Bounds in-flight provider calls per pass. Zero is treated as one.
    #[must_use]
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency = limit.max(1);
        self
    }

    /// Shares a lock table with other reconcilers over the same store.
    #[must_use]
    pub fn with_locks(mut self, locks: Arc<FormationLocks>) -> Self {
        self.locks = locks;
        self
    }

    /// Lock table guarding formations.
    #[must_use]
    pub fn locks(&self) -> &Arc<FormationLocks> {
        &self.locks
    }

    /// Brings every layer named in `desired` to its count.
    ///
    /// On return the formation's `layers` mapping equals `desired` and its
    /// release has been incremented, whether or not provider failures were
    /// collected.
    ///
    /// # Errors
    ///
    /// Returns a precondition [`ReconcileError`] with no side effects when
    /// the formation, a layer, a flavor or a provider is missing, when a
    /// provider has no credentials, or when an adapter cannot be connected.
    /// Returns [`ReconcileError::Store`] when the registry fails.
    pub async fn reconcile(
        &self,
        formation_id: &FormationId,
        desired: &DesiredScale,
    ) -> Result<ScaleOutcome, ReconcileError> {
        let _guard = self.locks.acquire(formation_id).await;
        let mut formation = self
            .store
            .get_formation(formation_id)?
            .ok_or_else(|| ReconcileError::UnknownFormation(formation_id.clone()))?;
        let targets = desired
            .iter()
            .map(|(layer, count)| (layer.clone(), count))
            .collect();
        let works = self.resolve(formation_id, targets)?;
        tracing::info!(
            formation = %formation_id,
            layers = works.len(),
            requested = desired.total(),
            "reconciling formation"
        );

        self.settle_stale(formation_id, &works).await?;

        let mut plans = Vec::with_capacity(works.len());
        for work in &works {
            let live: Vec<Node> = self
                .store
                .list_by_layer(formation_id, &work.layer.id)?
                .into_iter()
                .filter(|node| node.state.is_live())
                .collect();
            let plan = plan_layer(&live, work.target);
            log_plan(formation_id, work, live.len(), &plan);
            plans.push(plan);
        }

        let pass = Pass::new(self.store.as_ref(), formation_id, self.concurrency);
        let failures = pass.run(&works, plans).await?;

        let layers: Vec<Layer> = works
            .into_iter()
            .map(|work| Layer {
                desired: work.target,
                ..work.layer
            })
            .collect();
        self.store.save_layers(&layers)?;
        formation.layers = desired.clone();
        formation.release += 1;
        self.store.save_formation(&formation)?;

        let outcome = ScaleOutcome::new(summarize(self.store.as_ref(), formation_id)?, failures);
        if outcome.is_partial() {
            tracing::warn!(
                formation = %formation_id,
                failures = outcome.failures.len(),
                nodes = outcome.nodes,
                release = outcome.release,
                "reconcile finished with provider failures"
            );
        } else {
            tracing::info!(
                formation = %formation_id,
                nodes = outcome.nodes,
                containers = outcome.containers,
                release = outcome.release,
                "reconcile finished"
            );
        }
        Ok(outcome)
    }

    /// Destroys every node of a formation under its lock.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::TeardownIncomplete`] when some destroy
    /// failed, leaving those nodes registered, and the resolution errors of
    /// [`Self::reconcile`] for layers that still hold nodes.
    pub async fn teardown(&self, formation_id: &FormationId) -> Result<(), ReconcileError> {
        let _guard = self.locks.acquire(formation_id).await;
        if self.store.get_formation(formation_id)?.is_none() {
            return Err(ReconcileError::UnknownFormation(formation_id.clone()));
        }
        let mut targets = Vec::new();
        for layer in self.store.list_layers(formation_id)? {
            if !self.store.list_by_layer(formation_id, &layer.id)?.is_empty() {
                targets.push((layer.id, 0));
            }
        }
        let works = self.resolve(formation_id, targets)?;
        let mut plans = Vec::with_capacity(works.len());
        for work in &works {
            let live = self.store.list_by_layer(formation_id, &work.layer.id)?;
            plans.push(plan_layer(&live, 0));
        }
        tracing::info!(formation = %formation_id, layers = works.len(), "tearing down formation");
        let pass = Pass::new(self.store.as_ref(), formation_id, self.concurrency);
        let failures = pass.run(&works, plans).await?;
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ReconcileError::TeardownIncomplete {
                formation: formation_id.clone(),
                remaining: failures.len(),
            })
        }
    }

    /// Validates every precondition and connects adapters, in order: layers,
    /// references, credentials, adapters.
    fn resolve(
        &self,
        formation_id: &FormationId,
        targets: Vec<(LayerId, u32)>,
    ) -> Result<Vec<LayerWork>, ReconcileError> {
        let mut layers = Vec::with_capacity(targets.len());
        for (layer_id, target) in targets {
            let layer = self.store.get_layer(formation_id, &layer_id)?.ok_or_else(|| {
                ReconcileError::UnknownLayer {
                    formation: formation_id.clone(),
                    layer: layer_id.clone(),
                }
            })?;
            layers.push((layer, target));
        }

        let mut resolved: Vec<(Layer, u32, Flavor, Provider)> = Vec::with_capacity(layers.len());
        for (layer, target) in layers {
            let flavor = self.store.get_flavor(&layer.flavor)?.ok_or_else(|| {
                ReconcileError::DanglingReference {
                    layer: layer.id.clone(),
                    kind: RecordKind::Flavor,
                    id: layer.flavor.to_string(),
                }
            })?;
            let provider = self.store.get_provider(&flavor.provider)?.ok_or_else(|| {
                ReconcileError::DanglingReference {
                    layer: layer.id.clone(),
                    kind: RecordKind::Provider,
                    id: flavor.provider.to_string(),
                }
            })?;
            resolved.push((layer, target, flavor, provider));
        }

        if let Some((_, _, _, provider)) = resolved
            .iter()
            .find(|(_, _, _, provider)| provider.creds.is_empty())
        {
            return Err(ReconcileError::MissingCredentials {
                provider: provider.id.clone(),
            });
        }

        let mut connected: HashMap<ProviderId, Arc<dyn ProviderAdapter>> = HashMap::new();
        let mut works = Vec::with_capacity(resolved.len());
        for (layer, target, flavor, provider) in resolved {
            let adapter = match connected.get(&provider.id) {
                Some(adapter) => Arc::clone(adapter),
                None => {
                    let adapter = self.adapters.connect(&provider).map_err(|source| {
                        ReconcileError::Adapter {
                            provider: provider.id.clone(),
                            source,
                        }
                    })?;
                    connected.insert(provider.id.clone(), Arc::clone(&adapter));
                    adapter
                }
            };
            works.push(LayerWork {
                layer,
                flavor,
                adapter,
                target,
            });
        }
        Ok(works)
    }

    /// Clears records left behind by an interrupted pass.
    ///
    /// `requested` records without an external id never reached the provider
    /// and are removed. `destroying` records are checked against the
    /// provider: gone nodes are removed, surviving ones return to `up`.
    async fn settle_stale(
        &self,
        formation_id: &FormationId,
        works: &[LayerWork],
    ) -> Result<(), ReconcileError> {
        for work in works {
            for mut node in self.store.list_by_layer(formation_id, &work.layer.id)? {
                let external = node.external_id.clone();
                match (node.state, external.as_deref()) {
                    (NodeState::Requested | NodeState::Destroying, None) => {
                        tracing::warn!(
                            formation = %formation_id,
                            layer = %node.layer,
                            node = %node.id,
                            name = %node_name(formation_id, &node.layer, node.sequence),
                            "pruning record without an external id; a server carrying this \
                             name and the formation/layer tags may still exist"
                        );
                        self.store.remove_node(&node.id)?;
                    }
                    (NodeState::Destroying, Some(external_id)) => {
                        let gone = matches!(
                            work.adapter.query_status(external_id).await,
                            Ok(NodeStatus::Gone) | Err(ProviderError::NotFound { .. })
                        );
                        if gone {
                            self.store.remove_node(&node.id)?;
                        } else {
                            node.state = NodeState::Up;
                            self.store.update_node(&node)?;
                        }
                    }
                    (NodeState::Destroyed, _) => {
                        self.store.remove_node(&node.id)?;
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

fn log_plan(formation: &FormationId, work: &LayerWork, current: usize, plan: &LayerPlan) {
    match plan {
        LayerPlan::Keep => tracing::debug!(
            formation = %formation,
            layer = %work.layer.id,
            current,
            "layer already at target"
        ),
        LayerPlan::Create(count) => tracing::info!(
            formation = %formation,
            layer = %work.layer.id,
            current,
            count,
            "scaling up layer"
        ),
        LayerPlan::Destroy(nodes) => tracing::info!(
            formation = %formation,
            layer = %work.layer.id,
            current,
            count = nodes.len(),
            "scaling down layer"
        ),
    }
}

/// Execution state of one pass.
struct Pass<'a, S: ?Sized> {
    store: &'a S,
    formation: &'a FormationId,
    permits: Semaphore,
    aborted: AtomicBool,
}

type Step = Result<Option<NodeFailure>, StoreError>;

impl<'a, S: StateStore + ?Sized> Pass<'a, S> {
    fn new(store: &'a S, formation: &'a FormationId, concurrency: usize) -> Self {
        Self {
            store,
            formation,
            permits: Semaphore::new(concurrency),
            aborted: AtomicBool::new(false),
        }
    }

    async fn run(
        &self,
        works: &[LayerWork],
        plans: Vec<LayerPlan>,
    ) -> Result<Vec<NodeFailure>, StoreError> {
        let layer_steps = join_all(
            works
                .iter()
                .zip(plans)
                .map(|(work, plan)| self.run_layer(work, plan)),
        )
        .await;
        let mut failures = Vec::new();
        let mut store_error = None;
        for step in layer_steps.into_iter().flatten() {
            match step {
                Ok(Some(failure)) => failures.push(failure),
                Ok(None) => {}
                Err(err) => {
                    tracing::error!(
                        formation = %self.formation,
                        error = %err,
                        "registry write failed"
                    );
                    store_error.get_or_insert(err);
                }
            }
        }
        store_error.map_or(Ok(failures), Err)
    }

    async fn run_layer(&self, work: &LayerWork, plan: LayerPlan) -> Vec<Step> {
        match plan {
            LayerPlan::Keep => Vec::new(),
            LayerPlan::Create(count) => join_all((0..count).map(|_| self.create_one(work))).await,
            LayerPlan::Destroy(nodes) => {
                join_all(nodes.into_iter().map(|node| self.destroy_one(work, node))).await
            }
        }
    }

    fn failure(
        work: &LayerWork,
        action: NodeAction,
        node: Option<&Node>,
        message: String,
    ) -> NodeFailure {
        NodeFailure {
            layer: work.layer.id.clone(),
            action,
            node: node.map(|held| held.id.clone()),
            message,
        }
    }

    async fn create_one(&self, work: &LayerWork) -> Step {
        if self.aborted.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let Ok(_permit) = self.permits.acquire().await else {
            return Ok(Some(Self::failure(
                work,
                NodeAction::Create,
                None,
                String::from("provider call slots closed"),
            )));
        };
        if self.aborted.load(Ordering::SeqCst) {
            return Ok(None);
        }

        let mut node = self.store.insert_node(NewNode {
            formation: self.formation.clone(),
            layer: work.layer.id.clone(),
        })?;
        let created = match node_request(self.formation, work, &node) {
            Ok(request) => work.adapter.create_node(&request).await,
            Err(err) => Err(err),
        };
        match created {
            Ok(ProvisionedNode {
                external_id,
                containers,
                ..
            }) => {
                tracing::info!(
                    formation = %self.formation,
                    layer = %work.layer.id,
                    node = %node.id,
                    external_id = %external_id,
                    "node up"
                );
                node.external_id = Some(external_id);
                node.containers = containers;
                node.state = NodeState::Up;
                self.store.update_node(&node)?;
                Ok(None)
            }
            Err(err) => {
                self.aborted.store(true, Ordering::SeqCst);
                tracing::warn!(
                    formation = %self.formation,
                    layer = %work.layer.id,
                    error = %err,
                    "node create failed; aborting further creates"
                );
                self.store.remove_node(&node.id)?;
                Ok(Some(Self::failure(
                    work,
                    NodeAction::Create,
                    None,
                    err.to_string(),
                )))
            }
        }
    }

    async fn destroy_one(&self, work: &LayerWork, mut node: Node) -> Step {
        let Ok(_permit) = self.permits.acquire().await else {
            return Ok(Some(Self::failure(
                work,
                NodeAction::Destroy,
                Some(&node),
                String::from("provider call slots closed"),
            )));
        };
        let Some(external_id) = node.external_id.clone() else {
            self.store.remove_node(&node.id)?;
            return Ok(None);
        };

        node.state = NodeState::Destroying;
        self.store.update_node(&node)?;
        match work.adapter.destroy_node(&external_id).await {
            Ok(()) | Err(ProviderError::NotFound { .. }) => {
                tracing::info!(
                    formation = %self.formation,
                    layer = %work.layer.id,
                    node = %node.id,
                    external_id = %external_id,
                    "node destroyed"
                );
                self.store.remove_node(&node.id)?;
                Ok(None)
            }
            Err(err) => {
                tracing::warn!(
                    formation = %self.formation,
                    layer = %work.layer.id,
                    node = %node.id,
                    error = %err,
                    "node destroy failed"
                );
                node.state = NodeState::Up;
                self.store.update_node(&node)?;
                Ok(Some(Self::failure(
                    work,
                    NodeAction::Destroy,
                    Some(&node),
                    err.to_string(),
                )))
            }
        }
    }
}

/// Provider-side name of a node, `{formation}-{layer}-{sequence}`.
fn node_name(formation: &FormationId, layer: &LayerId, sequence: u64) -> String {
    format!("{formation}-{layer}-{sequence}")
}

fn node_request(
    formation: &FormationId,
    work: &LayerWork,
    node: &Node,
) -> Result<NodeRequest, ProviderError> {
    NodeRequest::builder()
        .name(node_name(formation, &work.layer.id, node.sequence))
        .flavor(work.flavor.params.clone())
        .run_list(work.layer.run_list.clone())
        .ssh_public_key(work.layer.ssh_public_key.clone())
        .tag(format!("formation={formation}"))
        .tag(format!("layer={}", work.layer.id))
        .build()
}

#[cfg(test)]
mod tests;
