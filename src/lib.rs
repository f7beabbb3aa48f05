//! Core library for the Strata formation control plane.
//!
//! A formation is a named group of layers; each layer is a homogeneous set of
//! cloud nodes sharing a flavor and a run-list. The crate exposes the resource
//! facade ([`Platform`]), the scale reconciliation engine ([`Reconciler`]),
//! durable state storage ([`Store`]) and provider adapters for a mock backend
//! and Scaleway.

pub mod aggregate;
pub mod cloud_init;
pub mod config;
pub mod logging;
pub mod model;
pub mod platform;
pub mod provider;
pub mod reconcile;
pub mod scaleway;
pub mod store;
pub mod test_support;

pub use aggregate::{FormationSummary, SummaryError, summarize};
pub use config::{ConfigError, StrataConfig};
pub use model::{
    DesiredScale, Flavor, FlavorId, Formation, FormationId, Layer, LayerId, Node, NodeId,
    NodeState, Provider, ProviderId, ProviderKind, ValidationError,
};
pub use platform::{Platform, PlatformError};
pub use provider::{
    AdapterFactory, Adapters, MockProvider, NodeRequest, NodeStatus, ProviderAdapter,
    ProviderError, ProvisionedNode,
};
pub use reconcile::{
    FormationLocks, NodeAction, NodeFailure, ReconcileError, Reconciler, ScaleOutcome,
};
pub use scaleway::{ScalewayBackend, ScalewayBackendError, ScalewayFactory};
pub use store::{StateStore, Store, StoreError};
