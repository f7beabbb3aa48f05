//! Resource operations over providers, flavors, formations, layers and nodes.
//!
//! [`Platform`] is the surface an API layer or the CLI drives. It validates
//! input, enforces the ownership and in-use rules between records, and hands
//! scaling to the [`Reconciler`]. Errors are classified by
//! [`PlatformError::is_client_error`] so callers can map them to responses.

use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;

use crate::aggregate::{FormationSummary, SummaryError, summarize};
use crate::model::{
    DesiredScale, Flavor, FlavorId, FlavorPatch, Formation, FormationId, Layer, LayerId,
    LayerPatch, LayerSecret, NewFlavor, NewFormation, NewLayer, NewProvider, Node, Provider,
    ProviderId, ProviderPatch, ValidationError, require_non_empty,
};
use crate::provider::Adapters;
use crate::reconcile::{ReconcileError, Reconciler, ScaleOutcome};
use crate::store::{RecordKind, StateStore, StoreError};

/// Errors returned by platform operations.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// Raised when a referenced record does not exist.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Kind of record.
        kind: RecordKind,
        /// Requested identifier.
        id: String,
    },
    /// Raised when creating a record whose id is taken.
    #[error("{kind} {id} already exists")]
    AlreadyExists {
        /// Kind of record.
        kind: RecordKind,
        /// Conflicting identifier.
        id: String,
    },
    /// Raised when input fails validation.
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    /// Raised when a layer cannot change because it has nodes or a target.
    #[error("layer {layer} is in use: {reason}")]
    LayerInUse {
        /// Layer that is in use.
        layer: LayerId,
        /// Human readable reason.
        reason: String,
    },
    /// Raised when patching a flavor that backs a layer with nodes.
    #[error("flavor {flavor} is used by layer {layer} which has nodes")]
    FlavorInUse {
        /// Flavor being patched.
        flavor: FlavorId,
        /// Layer holding nodes on the flavor.
        layer: LayerId,
    },
    /// Wrapper for reconciler errors.
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    /// Wrapper for store failures.
    #[error(transparent)]
    Store(StoreError),
}

impl PlatformError {
    /// Returns true when the caller is at fault.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        match self {
            Self::NotFound { .. }
            | Self::AlreadyExists { .. }
            | Self::Invalid(_)
            | Self::LayerInUse { .. }
            | Self::FlavorInUse { .. } => true,
            Self::Reconcile(err) => err.is_client_error(),
            Self::Store(_) => false,
        }
    }

    fn not_found(kind: RecordKind, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

impl From<StoreError> for PlatformError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate { kind, id } => Self::AlreadyExists { kind, id },
            StoreError::Missing { kind, id } => Self::NotFound { kind, id },
            other => Self::Store(other),
        }
    }
}

impl From<SummaryError> for PlatformError {
    fn from(err: SummaryError) -> Self {
        match err {
            SummaryError::UnknownFormation(id) => Self::not_found(RecordKind::Formation, id),
            SummaryError::Store(inner) => inner.into(),
        }
    }
}

/// Facade over the state store and the reconciler.
#[derive(Debug)]
pub struct Platform<S> {
    store: Arc<S>,
    reconciler: Reconciler<S>,
    flavor_patches: Mutex<()>,
}

impl<S: StateStore> Platform<S> {
    /// Creates a platform over `store`, provisioning through `adapters`.
    #[must_use]
    pub fn new(store: Arc<S>, adapters: Adapters) -> Self {
        let reconciler = Reconciler::new(Arc::clone(&store), adapters);
        Self {
            store,
            reconciler,
            flavor_patches: Mutex::new(()),
        }
    }

    /// Bounds in-flight provider calls per reconcile pass.
    #[must_use]
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.reconciler = self.reconciler.with_concurrency(limit);
        self
    }

    /// Underlying state store.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Underlying reconciler.
    #[must_use]
    pub const fn reconciler(&self) -> &Reconciler<S> {
        &self.reconciler
    }

    /// Registers a provider.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::Invalid`] for blank ids and
    /// [`PlatformError::AlreadyExists`] for taken ids.
    pub fn create_provider(
        &self,
        owner: &str,
        input: NewProvider,
    ) -> Result<Provider, PlatformError> {
        input.validate()?;
        let provider = Provider {
            id: input.id,
            owner: owner.to_owned(),
            kind: input.kind,
            creds: input.creds,
        };
        self.store.insert_provider(provider.clone())?;
        tracing::info!(provider = %provider.id, kind = %provider.kind, "provider created");
        Ok(provider)
    }

    /// Fetches a provider.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::NotFound`] when absent.
    pub fn get_provider(&self, id: &ProviderId) -> Result<Provider, PlatformError> {
        self.store
            .get_provider(id)?
            .ok_or_else(|| PlatformError::not_found(RecordKind::Provider, id))
    }

    /// Lists providers.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::Store`] when the state cannot be read.
    pub fn list_providers(&self) -> Result<Vec<Provider>, PlatformError> {
        Ok(self.store.list_providers()?)
    }

    /// Replaces a provider's credentials.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::NotFound`] when absent.
    pub fn patch_provider(
        &self,
        id: &ProviderId,
        patch: ProviderPatch,
    ) -> Result<Provider, PlatformError> {
        let mut provider = self.get_provider(id)?;
        if let Some(creds) = patch.creds {
            provider.creds = creds;
        }
        self.store.save_provider(&provider)?;
        tracing::info!(
            provider = %provider.id,
            has_creds = !provider.creds.is_empty(),
            "provider updated"
        );
        Ok(provider)
    }

    /// Defines a flavor on an existing provider.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::NotFound`] for an unknown provider,
    /// [`PlatformError::Invalid`] for blank fields and
    /// [`PlatformError::AlreadyExists`] for taken ids.
    pub fn create_flavor(&self, owner: &str, input: NewFlavor) -> Result<Flavor, PlatformError> {
        input.validate()?;
        self.get_provider(&input.provider)?;
        let flavor = Flavor {
            id: input.id,
            owner: owner.to_owned(),
            provider: input.provider,
            params: input.params,
        };
        self.store.insert_flavor(flavor.clone())?;
        tracing::info!(flavor = %flavor.id, provider = %flavor.provider, "flavor created");
        Ok(flavor)
    }

    /// Fetches a flavor.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::NotFound`] when absent.
    pub fn get_flavor(&self, id: &FlavorId) -> Result<Flavor, PlatformError> {
        self.store
            .get_flavor(id)?
            .ok_or_else(|| PlatformError::not_found(RecordKind::Flavor, id))
    }

    /// Lists flavors.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::Store`] when the state cannot be read.
    pub fn list_flavors(&self) -> Result<Vec<Flavor>, PlatformError> {
        Ok(self.store.list_flavors()?)
    }

    /// Replaces a flavor's parameters.
    ///
    /// Holds the lock of every formation with a layer on this flavor, so no
    /// reconcile pass can build nodes from the old parameters once the new
    /// ones are saved.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::FlavorInUse`] when a layer on this flavor has
    /// nodes, and [`PlatformError::NotFound`] when absent.
    pub async fn patch_flavor(
        &self,
        id: &FlavorId,
        patch: FlavorPatch,
    ) -> Result<Flavor, PlatformError> {
        let Some(params) = patch.params else {
            return self.get_flavor(id);
        };
        let _serial = self.flavor_patches.lock().await;
        let mut locked = BTreeSet::new();
        let mut guards = Vec::new();
        loop {
            let pending: Vec<FormationId> = self
                .formations_using(id)?
                .into_iter()
                .filter(|formation| !locked.contains(formation))
                .collect();
            if pending.is_empty() {
                break;
            }
            for formation in pending {
                guards.push(self.reconciler.locks().acquire(&formation).await);
                locked.insert(formation);
            }
        }

        let mut flavor = self.get_flavor(id)?;
        for formation in &locked {
            for layer in self.store.list_layers(formation)? {
                if &layer.flavor == id && self.store.count_by_layer(formation, &layer.id)? > 0 {
                    return Err(PlatformError::FlavorInUse {
                        flavor: id.clone(),
                        layer: layer.id,
                    });
                }
            }
        }
        flavor.params = params;
        self.store.save_flavor(&flavor)?;
        tracing::info!(flavor = %flavor.id, formations = guards.len(), "flavor updated");
        Ok(flavor)
    }

    fn formations_using(&self, flavor: &FlavorId) -> Result<BTreeSet<FormationId>, PlatformError> {
        let mut users = BTreeSet::new();
        for formation in self.store.list_formations()? {
            if self
                .store
                .list_layers(&formation.id)?
                .iter()
                .any(|layer| &layer.flavor == flavor)
            {
                users.insert(formation.id);
            }
        }
        Ok(users)
    }

    /// Creates an empty formation.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::Invalid`] for blank ids and
    /// [`PlatformError::AlreadyExists`] for taken ids.
    pub fn create_formation(
        &self,
        owner: &str,
        input: NewFormation,
    ) -> Result<Formation, PlatformError> {
        input.validate()?;
        let formation = Formation::new(input.id, owner);
        self.store.insert_formation(formation.clone())?;
        tracing::info!(formation = %formation.id, "formation created");
        Ok(formation)
    }

    /// Fetches a formation.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::NotFound`] when absent.
    pub fn get_formation(&self, id: &FormationId) -> Result<Formation, PlatformError> {
        self.store
            .get_formation(id)?
            .ok_or_else(|| PlatformError::not_found(RecordKind::Formation, id))
    }

    /// Lists formations.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::Store`] when the state cannot be read.
    pub fn list_formations(&self) -> Result<Vec<Formation>, PlatformError> {
        Ok(self.store.list_formations()?)
    }

    /// Destroys a formation's nodes, then removes it with its layers.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::NotFound`] when absent and
    /// [`PlatformError::Reconcile`] when nodes could not be destroyed; the
    /// formation is kept in that case.
    pub async fn delete_formation(&self, id: &FormationId) -> Result<(), PlatformError> {
        self.get_formation(id)?;
        self.reconciler.teardown(id).await?;
        self.store.remove_formation(id)?;
        self.reconciler.locks().forget(id);
        tracing::info!(formation = %id, "formation deleted");
        Ok(())
    }

    /// Attaches a layer to a formation.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::NotFound`] for an unknown formation or
    /// flavor, [`PlatformError::Invalid`] for blank fields and
    /// [`PlatformError::AlreadyExists`] when the id is taken in the formation.
    pub fn create_layer(
        &self,
        owner: &str,
        formation: &FormationId,
        input: NewLayer,
    ) -> Result<Layer, PlatformError> {
        input.validate()?;
        self.get_formation(formation)?;
        self.get_flavor(&input.flavor)?;
        let proxy = input.is_proxy();
        let secret = input.ssh_private_key.map(|key| LayerSecret {
            formation: formation.clone(),
            layer: input.id.clone(),
            ssh_private_key: key,
        });
        let layer = Layer {
            id: input.id,
            formation: formation.clone(),
            owner: owner.to_owned(),
            flavor: input.flavor,
            run_list: input.run_list,
            ssh_public_key: input.ssh_public_key,
            proxy,
            desired: 0,
        };
        self.store.insert_layer(layer.clone(), secret)?;
        tracing::info!(formation = %formation, layer = %layer.id, proxy, "layer created");
        Ok(layer)
    }

    /// Fetches a layer.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::NotFound`] when absent.
    pub fn get_layer(&self, formation: &FormationId, id: &LayerId) -> Result<Layer, PlatformError> {
        self.store
            .get_layer(formation, id)?
            .ok_or_else(|| PlatformError::not_found(RecordKind::Layer, id))
    }

    /// Lists a formation's layers in creation order.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::NotFound`] for an unknown formation.
    pub fn list_layers(&self, formation: &FormationId) -> Result<Vec<Layer>, PlatformError> {
        self.get_formation(formation)?;
        Ok(self.store.list_layers(formation)?)
    }

    /// Applies the supplied fields of `patch` to a layer.
    ///
    /// Runs under the formation lock so it never races a reconcile pass.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::LayerInUse`] when changing the flavor of a
    /// layer with nodes, [`PlatformError::NotFound`] for unknown layers or
    /// flavors and [`PlatformError::Invalid`] for blank values.
    pub async fn patch_layer(
        &self,
        formation: &FormationId,
        id: &LayerId,
        patch: LayerPatch,
    ) -> Result<Layer, PlatformError> {
        let _guard = self.reconciler.locks().acquire(formation).await;
        let mut layer = self.get_layer(formation, id)?;
        if let Some(flavor) = patch.flavor
            && flavor != layer.flavor
        {
            let nodes = self.store.count_by_layer(formation, id)?;
            if nodes > 0 {
                return Err(PlatformError::LayerInUse {
                    layer: id.clone(),
                    reason: format!("cannot change flavor while {nodes} node(s) exist"),
                });
            }
            self.get_flavor(&flavor)?;
            layer.flavor = flavor;
        }
        if let Some(run_list) = patch.run_list {
            layer.run_list = run_list;
        }
        if let Some(public) = patch.ssh_public_key {
            require_non_empty(&public, "ssh_public_key")?;
            layer.ssh_public_key = Some(public);
        }
        if let Some(proxy) = patch.proxy {
            layer.proxy = proxy;
        }
        let secret = match patch.ssh_private_key {
            Some(key) => {
                require_non_empty(key.expose(), "ssh_private_key")?;
                Some(LayerSecret {
                    formation: formation.clone(),
                    layer: id.clone(),
                    ssh_private_key: key,
                })
            }
            None => None,
        };
        self.store.save_layer(&layer, secret)?;
        tracing::info!(formation = %formation, layer = %id, "layer updated");
        Ok(layer)
    }

    /// Removes a layer that has no target and no nodes.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::LayerInUse`] when the layer still has a
    /// target or nodes, and [`PlatformError::NotFound`] when absent.
    pub async fn delete_layer(
        &self,
        formation: &FormationId,
        id: &LayerId,
    ) -> Result<(), PlatformError> {
        let _guard = self.reconciler.locks().acquire(formation).await;
        let layer = self.get_layer(formation, id)?;
        if layer.desired > 0 {
            return Err(PlatformError::LayerInUse {
                layer: id.clone(),
                reason: format!("desired count is {}", layer.desired),
            });
        }
        let nodes = self.store.count_by_layer(formation, id)?;
        if nodes > 0 {
            return Err(PlatformError::LayerInUse {
                layer: id.clone(),
                reason: format!("{nodes} node(s) still exist"),
            });
        }
        self.store.remove_layer(formation, id)?;
        tracing::info!(formation = %formation, layer = %id, "layer deleted");
        Ok(())
    }

    /// Lists a formation's node records.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::NotFound`] for an unknown formation.
    pub fn list_nodes(&self, formation: &FormationId) -> Result<Vec<Node>, PlatformError> {
        self.get_formation(formation)?;
        Ok(self.store.list_by_formation(formation)?)
    }

    /// Brings the named layers to the requested counts.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::Reconcile`] when a precondition fails; no
    /// node is touched in that case.
    pub async fn scale(
        &self,
        formation: &FormationId,
        desired: &DesiredScale,
    ) -> Result<ScaleOutcome, PlatformError> {
        Ok(self.reconciler.reconcile(formation, desired).await?)
    }

    /// Summarises a formation.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::NotFound`] for an unknown formation.
    pub fn summarize(&self, formation: &FormationId) -> Result<FormationSummary, PlatformError> {
        Ok(summarize(self.store.as_ref(), formation)?)
    }
}
