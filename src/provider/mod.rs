//! Provider adapter abstraction for provisioning formation nodes.
//!
//! Every backend implements [`ProviderAdapter`]. The reconciler never talks to
//! a cloud directly; it resolves a [`Provider`] record to an adapter through
//! [`Adapters`] and issues create/destroy calls through the trait.

pub mod mock;

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{FlavorParams, Provider, ProviderKind, RunList};

pub use mock::MockProvider;

/// Parameters required to provision one node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeRequest {
    /// Provider visible name for the node.
    pub name: String,
    /// Flavor parameters resolved from the layer's flavor.
    pub flavor: FlavorParams,
    /// Run-list the node is bootstrapped with.
    pub run_list: RunList,
    /// Public key installed for the layer's SSH user.
    pub ssh_public_key: Option<String>,
    /// Tags attached to the provider resource.
    pub tags: Vec<String>,
}

impl NodeRequest {
    /// Starts a builder for a [`NodeRequest`].
    #[must_use]
    pub fn builder() -> NodeRequestBuilder {
        NodeRequestBuilder::default()
    }

    /// Validates the request.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Validation`] when the name is empty.
    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.name.is_empty() {
            return Err(ProviderError::Validation(String::from("name")));
        }
        if self
            .ssh_public_key
            .as_deref()
            .is_some_and(|key| key.trim().is_empty())
        {
            return Err(ProviderError::Validation(String::from("ssh_public_key")));
        }
        Ok(())
    }
}

/// Builder for [`NodeRequest`] that trims and validates on build.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NodeRequestBuilder {
    name: String,
    flavor: FlavorParams,
    run_list: RunList,
    ssh_public_key: Option<String>,
    tags: Vec<String>,
}

impl NodeRequestBuilder {
    /// Sets the node name.
    #[must_use]
    pub fn name(mut self, value: impl Into<String>) -> Self {
        self.name = value.into();
        self
    }

    /// Sets the flavor parameters.
    #[must_use]
    pub fn flavor(mut self, value: FlavorParams) -> Self {
        self.flavor = value;
        self
    }

    /// Sets the run-list.
    #[must_use]
    pub fn run_list(mut self, value: RunList) -> Self {
        self.run_list = value;
        self
    }

    /// Sets the optional SSH public key.
    #[must_use]
    pub fn ssh_public_key(mut self, value: Option<String>) -> Self {
        self.ssh_public_key = value;
        self
    }

    /// Adds a resource tag.
    #[must_use]
    pub fn tag(mut self, value: impl Into<String>) -> Self {
        self.tags.push(value.into());
        self
    }

    /// Builds and validates the request.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Validation`] when a required field is empty.
    pub fn build(self) -> Result<NodeRequest, ProviderError> {
        let request = NodeRequest {
            name: self.name.trim().to_owned(),
            flavor: self.flavor,
            run_list: self.run_list,
            ssh_public_key: self.ssh_public_key.map(|key| key.trim().to_owned()),
            tags: self.tags,
        };
        request.validate()?;
        Ok(request)
    }
}

/// Status reported by a provider for one node.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Accepted but not yet running.
    Pending,
    /// Running.
    Running,
    /// Powered off or stopping.
    Stopped,
    /// No longer known to the provider.
    Gone,
    /// Provider specific state with no direct mapping.
    Other(String),
}

/// Provider response for a successfully provisioned node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisionedNode {
    /// Provider assigned identifier.
    pub external_id: String,
    /// Status at the time of the response.
    pub status: NodeStatus,
    /// Containers the node hosts.
    pub containers: u32,
}

/// Errors raised by provider adapters.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProviderError {
    /// Raised when a request is missing a required field.
    #[error("missing or empty field: {0}")]
    Validation(String),
    /// Raised when credentials lack a key the backend needs.
    #[error("{backend} credentials missing {key}")]
    Credentials {
        /// Backend discriminator.
        backend: ProviderKind,
        /// Missing credential key.
        key: String,
    },
    /// Raised when no adapter is registered for a provider kind.
    #[error("no adapter registered for provider type {0}")]
    Unsupported(ProviderKind),
    /// Raised when a node id is not known to the backend.
    #[error("node {external_id} not found")]
    NotFound {
        /// Provider assigned identifier.
        external_id: String,
    },
    /// Wrapper for backend level failures.
    #[error("{backend} provider error: {message}")]
    Backend {
        /// Backend discriminator.
        backend: ProviderKind,
        /// Message returned by the backend.
        message: String,
    },
}

/// Future returned by adapter operations.
pub type ProviderFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Capability set implemented by every cloud backend.
pub trait ProviderAdapter: Send + Sync {
    /// Provisions a node and returns its provider identity.
    fn create_node<'a>(&'a self, request: &'a NodeRequest) -> ProviderFuture<'a, ProvisionedNode>;

    /// Destroys a node; resolves once the provider confirms.
    fn destroy_node<'a>(&'a self, external_id: &'a str) -> ProviderFuture<'a, ()>;

    /// Queries the current status of a node.
    fn query_status<'a>(&'a self, external_id: &'a str) -> ProviderFuture<'a, NodeStatus>;
}

/// Connects provider records to adapters.
pub trait AdapterFactory: Send + Sync {
    /// Builds an adapter for `provider` from its credentials.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when the credentials are unusable.
    fn connect(&self, provider: &Provider) -> Result<Arc<dyn ProviderAdapter>, ProviderError>;
}

/// Registry of adapter factories keyed by provider kind.
#[derive(Clone, Default)]
pub struct Adapters {
    factories: BTreeMap<ProviderKind, Arc<dyn AdapterFactory>>,
}

impl Adapters {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` for `kind`, replacing any previous entry.
    #[must_use]
    pub fn with(mut self, kind: ProviderKind, factory: Arc<dyn AdapterFactory>) -> Self {
        self.factories.insert(kind, factory);
        self
    }

    /// Resolves and connects the adapter for `provider`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Unsupported`] when no factory is registered,
    /// or the factory's connection error.
    pub fn connect(&self, provider: &Provider) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
        let factory = self
            .factories
            .get(&provider.kind)
            .ok_or(ProviderError::Unsupported(provider.kind))?;
        factory.connect(provider)
    }
}

impl std::fmt::Debug for Adapters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapters")
            .field("kinds", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}
