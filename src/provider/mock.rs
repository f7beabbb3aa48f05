//! Deterministic in-process provider.
//!
//! `MockProvider` answers synchronously by default, assigns sequential
//! external ids (`mock-1`, `mock-2`, ...) and reports a fixed container count
//! per node. Failure injection and call recording let reconciler tests drive
//! partial-failure paths without real infrastructure.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::sleep;

use super::{
    AdapterFactory, NodeRequest, NodeStatus, ProviderAdapter, ProviderError, ProviderFuture,
    ProvisionedNode,
};
use crate::model::{Provider, ProviderKind};
use crate::store::{FormationStore, NodeRegistry, StoreError};

/// Containers reported per node unless configured otherwise.
pub const DEFAULT_CONTAINERS_PER_NODE: u32 = 1;

/// Prefix of every external id the mock hands out.
pub const MOCK_ID_PREFIX: &str = "mock-";

/// Scriptable provider used for tests and local development.
#[derive(Clone, Debug)]
pub struct MockProvider {
    state: Arc<Mutex<MockState>>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
    containers_per_node: u32,
    delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct MockState {
    next_id: u64,
    live: BTreeSet<String>,
    destroyed: BTreeSet<String>,
    created: Vec<String>,
    destroy_calls: Vec<String>,
    create_budget: Option<usize>,
    failing_destroys: BTreeSet<String>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    /// Creates a provider that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
            containers_per_node: DEFAULT_CONTAINERS_PER_NODE,
            delay: None,
        }
    }

    /// Overrides the container count reported for each node.
    #[must_use]
    pub const fn with_containers_per_node(mut self, containers: u32) -> Self {
        self.containers_per_node = containers;
        self
    }

    /// Makes every call sleep before answering, exposing concurrency.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Adopts the mock nodes already recorded in `store`, so ids handed out
    /// by this instance never collide with ones from an earlier process.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the registry cannot be read.
    pub fn resume_from<S>(self, store: &S) -> Result<Self, StoreError>
    where
        S: FormationStore + NodeRegistry + ?Sized,
    {
        let mut known = Vec::new();
        for formation in store.list_formations()? {
            for node in store.list_by_formation(&formation.id)? {
                known.extend(node.external_id);
            }
        }
        self.adopt(known.iter().map(String::as_str));
        Ok(self)
    }

    /// Treats `mock-<n>` ids as live and moves the id counter past them.
    /// Ids from other backends are ignored.
    pub fn adopt<'a>(&self, external_ids: impl IntoIterator<Item = &'a str>) {
        let mut state = self.lock();
        for external_id in external_ids {
            let Some(number) = external_id
                .strip_prefix(MOCK_ID_PREFIX)
                .and_then(|raw| raw.parse::<u64>().ok())
            else {
                continue;
            };
            state.next_id = state.next_id.max(number);
            state.live.insert(external_id.to_owned());
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lets `successes` more creates succeed, then fails every later create.
    pub fn fail_creates_after(&self, successes: usize) {
        self.lock().create_budget = Some(successes);
    }

    /// Makes destroy calls for `external_id` fail.
    pub fn fail_destroy_of(&self, external_id: impl Into<String>) {
        self.lock().failing_destroys.insert(external_id.into());
    }

    /// Clears injected failures.
    pub fn heal(&self) {
        let mut state = self.lock();
        state.create_budget = None;
        state.failing_destroys.clear();
    }

    /// External ids created so far, in creation order.
    #[must_use]
    pub fn created(&self) -> Vec<String> {
        self.lock().created.clone()
    }

    /// External ids passed to destroy, in call order.
    #[must_use]
    pub fn destroy_calls(&self) -> Vec<String> {
        self.lock().destroy_calls.clone()
    }

    /// Number of nodes the provider currently considers alive.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.lock().live.len()
    }

    /// Highest number of calls observed in flight at once.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn enter(&self) -> InFlight<'_> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        InFlight {
            counter: &self.in_flight,
        }
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            sleep(delay).await;
        }
    }

    fn create_now(&self) -> Result<ProvisionedNode, ProviderError> {
        let mut state = self.lock();
        if let Some(budget) = state.create_budget.as_mut() {
            if *budget == 0 {
                return Err(ProviderError::Backend {
                    backend: ProviderKind::Mock,
                    message: String::from("simulated create failure"),
                });
            }
            *budget -= 1;
        }
        state.next_id += 1;
        let external_id = format!("{MOCK_ID_PREFIX}{}", state.next_id);
        state.live.insert(external_id.clone());
        state.created.push(external_id.clone());
        Ok(ProvisionedNode {
            external_id,
            status: NodeStatus::Running,
            containers: self.containers_per_node,
        })
    }

    fn destroy_now(&self, external_id: &str) -> Result<(), ProviderError> {
        let mut state = self.lock();
        state.destroy_calls.push(external_id.to_owned());
        if state.failing_destroys.contains(external_id) {
            return Err(ProviderError::Backend {
                backend: ProviderKind::Mock,
                message: format!("simulated destroy failure for {external_id}"),
            });
        }
        if !state.live.remove(external_id) {
            return Err(ProviderError::NotFound {
                external_id: external_id.to_owned(),
            });
        }
        state.destroyed.insert(external_id.to_owned());
        Ok(())
    }

    fn status_now(&self, external_id: &str) -> Result<NodeStatus, ProviderError> {
        let state = self.lock();
        if state.live.contains(external_id) {
            Ok(NodeStatus::Running)
        } else if state.destroyed.contains(external_id) {
            Ok(NodeStatus::Gone)
        } else {
            Err(ProviderError::NotFound {
                external_id: external_id.to_owned(),
            })
        }
    }
}

struct InFlight<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ProviderAdapter for MockProvider {
    fn create_node<'a>(&'a self, request: &'a NodeRequest) -> ProviderFuture<'a, ProvisionedNode> {
        Box::pin(async move {
            request.validate()?;
            let _guard = self.enter();
            self.pause().await;
            self.create_now()
        })
    }

    fn destroy_node<'a>(&'a self, external_id: &'a str) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let _guard = self.enter();
            self.pause().await;
            self.destroy_now(external_id)
        })
    }

    fn query_status<'a>(&'a self, external_id: &'a str) -> ProviderFuture<'a, NodeStatus> {
        Box::pin(async move { self.status_now(external_id) })
    }
}

impl AdapterFactory for MockProvider {
    fn connect(&self, _provider: &Provider) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
        Ok(Arc::new(self.clone()))
    }
}
