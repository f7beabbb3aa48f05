//! Durable state: the node registry, the layer store and the catalog.
//!
//! [`Store`] keeps the whole state document in memory behind a mutex and,
//! when opened on a directory, persists it after every mutation. Each trait
//! method is one atomic write: the mutation is applied to a copy, the copy is
//! persisted, and only then does it replace the live document.

mod document;
mod file;

use std::fmt;
use std::sync::{Mutex, MutexGuard};

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::model::{
    Flavor, FlavorId, Formation, FormationId, Layer, LayerId, LayerSecret, NewNode, Node, NodeId,
    Provider, ProviderId,
};
use document::StateDocument;
use file::FileBacking;

pub use file::{STATE_FILE, TEMP_FILE};

/// Kind of record named in store and platform errors.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RecordKind {
    /// Provider record.
    Provider,
    /// Flavor record.
    Flavor,
    /// Formation record.
    Formation,
    /// Layer record.
    Layer,
    /// Node record.
    Node,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Provider => "provider",
            Self::Flavor => "flavor",
            Self::Formation => "formation",
            Self::Layer => "layer",
            Self::Node => "node",
        })
    }
}

/// Errors raised by the state store.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StoreError {
    /// Raised when the state directory or document cannot be accessed.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Operating system error message.
        message: String,
    },
    /// Raised when the persisted document cannot be decoded.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path of the document.
        path: Utf8PathBuf,
        /// Decoder message.
        message: String,
    },
    /// Raised when the document cannot be encoded.
    #[error("failed to encode state: {message}")]
    Encode {
        /// Encoder message.
        message: String,
    },
    /// Raised when a writer panicked while holding the state lock.
    #[error("state lock poisoned")]
    Poisoned,
    /// Raised when inserting a record whose id is taken.
    #[error("{kind} {id} already exists")]
    Duplicate {
        /// Kind of record.
        kind: RecordKind,
        /// Conflicting identifier.
        id: String,
    },
    /// Raised when updating a record that does not exist.
    #[error("{kind} {id} does not exist")]
    Missing {
        /// Kind of record.
        kind: RecordKind,
        /// Missing identifier.
        id: String,
    },
}

/// Durable store of node records scoped to a formation and layer.
pub trait NodeRegistry: Send + Sync {
    /// Counts live records (requested, up or destroying) in a layer.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the state cannot be read.
    fn count_by_layer(&self, formation: &FormationId, layer: &LayerId)
    -> Result<usize, StoreError>;

    /// Lists a layer's records in creation order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the state cannot be read.
    fn list_by_layer(
        &self,
        formation: &FormationId,
        layer: &LayerId,
    ) -> Result<Vec<Node>, StoreError>;

    /// Lists every record of a formation in creation order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the state cannot be read.
    fn list_by_formation(&self, formation: &FormationId) -> Result<Vec<Node>, StoreError>;

    /// Inserts a record in the `requested` state and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn insert_node(&self, node: NewNode) -> Result<Node, StoreError>;

    /// Replaces an existing record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Missing`] when the record is gone, or a write
    /// error.
    fn update_node(&self, node: &Node) -> Result<(), StoreError>;

    /// Removes a record, returning whether it existed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn remove_node(&self, id: &NodeId) -> Result<bool, StoreError>;
}

/// Durable store of layer definitions and their write-only secrets.
pub trait LayerStore: Send + Sync {
    /// Inserts a layer and, when present, its secret.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Duplicate`] when the layer exists in the
    /// formation, or a write error.
    fn insert_layer(&self, layer: Layer, secret: Option<LayerSecret>) -> Result<(), StoreError>;

    /// Fetches a layer.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the state cannot be read.
    fn get_layer(
        &self,
        formation: &FormationId,
        layer: &LayerId,
    ) -> Result<Option<Layer>, StoreError>;

    /// Lists a formation's layers in creation order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the state cannot be read.
    fn list_layers(&self, formation: &FormationId) -> Result<Vec<Layer>, StoreError>;

    /// Replaces a layer and optionally its secret.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Missing`] when the layer is gone, or a write
    /// error.
    fn save_layer(&self, layer: &Layer, secret: Option<LayerSecret>) -> Result<(), StoreError>;

    /// Replaces several layers in one write.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Missing`] when any layer is gone, or a write
    /// error.
    fn save_layers(&self, layers: &[Layer]) -> Result<(), StoreError>;

    /// Fetches the internal secret record of a layer.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the state cannot be read.
    fn layer_secret(
        &self,
        formation: &FormationId,
        layer: &LayerId,
    ) -> Result<Option<LayerSecret>, StoreError>;

    /// Removes a layer with its secret and node records.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn remove_layer(&self, formation: &FormationId, layer: &LayerId) -> Result<bool, StoreError>;
}

/// Durable store of formation records.
pub trait FormationStore: Send + Sync {
    /// Inserts a formation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Duplicate`] when the id is taken.
    fn insert_formation(&self, formation: Formation) -> Result<(), StoreError>;

    /// Fetches a formation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the state cannot be read.
    fn get_formation(&self, id: &FormationId) -> Result<Option<Formation>, StoreError>;

    /// Lists formations ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the state cannot be read.
    fn list_formations(&self) -> Result<Vec<Formation>, StoreError>;

    /// Replaces a formation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Missing`] when the formation is gone.
    fn save_formation(&self, formation: &Formation) -> Result<(), StoreError>;

    /// Removes a formation and everything it owns.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn remove_formation(&self, id: &FormationId) -> Result<bool, StoreError>;
}

/// Durable store of providers and flavors.
pub trait CatalogStore: Send + Sync {
    /// Inserts a provider.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Duplicate`] when the id is taken.
    fn insert_provider(&self, provider: Provider) -> Result<(), StoreError>;

    /// Fetches a provider.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the state cannot be read.
    fn get_provider(&self, id: &ProviderId) -> Result<Option<Provider>, StoreError>;

    /// Lists providers ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the state cannot be read.
    fn list_providers(&self) -> Result<Vec<Provider>, StoreError>;

    /// Replaces a provider.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Missing`] when the provider is gone.
    fn save_provider(&self, provider: &Provider) -> Result<(), StoreError>;

    /// Inserts a flavor.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Duplicate`] when the id is taken.
    fn insert_flavor(&self, flavor: Flavor) -> Result<(), StoreError>;

    /// Fetches a flavor.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the state cannot be read.
    fn get_flavor(&self, id: &FlavorId) -> Result<Option<Flavor>, StoreError>;

    /// Lists flavors ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the state cannot be read.
    fn list_flavors(&self) -> Result<Vec<Flavor>, StoreError>;

    /// Replaces a flavor.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Missing`] when the flavor is gone.
    fn save_flavor(&self, flavor: &Flavor) -> Result<(), StoreError>;
}

/// Everything the reconciler and platform need from storage.
pub trait StateStore: NodeRegistry + LayerStore + FormationStore + CatalogStore {}

impl<T> StateStore for T where T: NodeRegistry + LayerStore + FormationStore + CatalogStore {}

/// State store backed by memory and, optionally, a JSON document on disk.
pub struct Store {
    document: Mutex<StateDocument>,
    backing: Option<FileBacking>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("root", &self.root())
            .finish_non_exhaustive()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl Store {
    /// Creates an empty, non-durable store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            document: Mutex::new(StateDocument::default()),
            backing: None,
        }
    }

    /// Opens a durable store rooted at `root`, creating the directory and
    /// loading any existing document.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when the directory cannot be created or
    /// read, and [`StoreError::Parse`] when the document is corrupt.
    pub fn open(root: &Utf8Path) -> Result<Self, StoreError> {
        let (backing, document) = FileBacking::open(root)?;
        tracing::debug!(
            root = %root,
            formations = document.formations.len(),
            nodes = document.nodes.len(),
            "opened state store"
        );
        Ok(Self {
            document: Mutex::new(document),
            backing: Some(backing),
        })
    }

    /// Directory backing the store, if durable.
    #[must_use]
    pub fn root(&self) -> Option<&Utf8Path> {
        self.backing.as_ref().map(FileBacking::root)
    }

    fn lock(&self) -> Result<MutexGuard<'_, StateDocument>, StoreError> {
        self.document.lock().map_err(|_| StoreError::Poisoned)
    }

    fn read<T>(&self, view: impl FnOnce(&StateDocument) -> T) -> Result<T, StoreError> {
        let guard = self.lock()?;
        Ok(view(&guard))
    }

    fn write<T>(
        &self,
        mutate: impl FnOnce(&mut StateDocument) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.lock()?;
        let mut next = guard.clone();
        let outcome = mutate(&mut next)?;
        if let Some(backing) = &self.backing {
            backing.persist(&next)?;
        }
        *guard = next;
        Ok(outcome)
    }
}

impl NodeRegistry for Store {
    fn count_by_layer(
        &self,
        formation: &FormationId,
        layer: &LayerId,
    ) -> Result<usize, StoreError> {
        self.read(|doc| {
            doc.layer_nodes(formation, layer)
                .iter()
                .filter(|node| node.state.is_live())
                .count()
        })
    }

    fn list_by_layer(
        &self,
        formation: &FormationId,
        layer: &LayerId,
    ) -> Result<Vec<Node>, StoreError> {
        self.read(|doc| doc.layer_nodes(formation, layer))
    }

    fn list_by_formation(&self, formation: &FormationId) -> Result<Vec<Node>, StoreError> {
        self.read(|doc| {
            doc.nodes
                .iter()
                .filter(|node| &node.formation == formation)
                .cloned()
                .collect()
        })
    }

    fn insert_node(&self, node: NewNode) -> Result<Node, StoreError> {
        self.write(|doc| Ok(doc.insert_node(node)))
    }

    fn update_node(&self, node: &Node) -> Result<(), StoreError> {
        self.write(|doc| doc.update_node(node))
    }

    fn remove_node(&self, id: &NodeId) -> Result<bool, StoreError> {
        self.write(|doc| Ok(doc.remove_node(id)))
    }
}

impl LayerStore for Store {
    fn insert_layer(&self, layer: Layer, secret: Option<LayerSecret>) -> Result<(), StoreError> {
        self.write(|doc| {
            doc.insert_layer(layer)?;
            if let Some(held) = secret {
                doc.save_secret(held);
            }
            Ok(())
        })
    }

    fn get_layer(
        &self,
        formation: &FormationId,
        layer: &LayerId,
    ) -> Result<Option<Layer>, StoreError> {
        self.read(|doc| doc.layer(formation, layer).cloned())
    }

    fn list_layers(&self, formation: &FormationId) -> Result<Vec<Layer>, StoreError> {
        self.read(|doc| {
            doc.layers
                .iter()
                .filter(|layer| &layer.formation == formation)
                .cloned()
                .collect()
        })
    }

    fn save_layer(&self, layer: &Layer, secret: Option<LayerSecret>) -> Result<(), StoreError> {
        self.write(|doc| {
            doc.save_layer(layer)?;
            if let Some(held) = secret {
                doc.save_secret(held);
            }
            Ok(())
        })
    }

    fn save_layers(&self, layers: &[Layer]) -> Result<(), StoreError> {
        self.write(|doc| layers.iter().try_for_each(|layer| doc.save_layer(layer)))
    }

    fn layer_secret(
        &self,
        formation: &FormationId,
        layer: &LayerId,
    ) -> Result<Option<LayerSecret>, StoreError> {
        self.read(|doc| doc.secret(formation, layer).cloned())
    }

    fn remove_layer(&self, formation: &FormationId, layer: &LayerId) -> Result<bool, StoreError> {
        self.write(|doc| Ok(doc.remove_layer(formation, layer)))
    }
}

impl FormationStore for Store {
    fn insert_formation(&self, formation: Formation) -> Result<(), StoreError> {
        self.write(|doc| {
            if doc.formations.contains_key(&formation.id) {
                return Err(StoreError::Duplicate {
                    kind: RecordKind::Formation,
                    id: formation.id.to_string(),
                });
            }
            doc.formations.insert(formation.id.clone(), formation);
            Ok(())
        })
    }

    fn get_formation(&self, id: &FormationId) -> Result<Option<Formation>, StoreError> {
        self.read(|doc| doc.formations.get(id).cloned())
    }

    fn list_formations(&self) -> Result<Vec<Formation>, StoreError> {
        self.read(|doc| doc.formations.values().cloned().collect())
    }

    fn save_formation(&self, formation: &Formation) -> Result<(), StoreError> {
        self.write(|doc| {
            let slot = doc
                .formations
                .get_mut(&formation.id)
                .ok_or_else(|| StoreError::Missing {
                    kind: RecordKind::Formation,
                    id: formation.id.to_string(),
                })?;
            *slot = formation.clone();
            Ok(())
        })
    }

    fn remove_formation(&self, id: &FormationId) -> Result<bool, StoreError> {
        self.write(|doc| Ok(doc.remove_formation(id)))
    }
}

impl CatalogStore for Store {
    fn insert_provider(&self, provider: Provider) -> Result<(), StoreError> {
        self.write(|doc| {
            if doc.providers.contains_key(&provider.id) {
                return Err(StoreError::Duplicate {
                    kind: RecordKind::Provider,
                    id: provider.id.to_string(),
                });
            }
            doc.providers.insert(provider.id.clone(), provider);
            Ok(())
        })
    }

    fn get_provider(&self, id: &ProviderId) -> Result<Option<Provider>, StoreError> {
        self.read(|doc| doc.providers.get(id).cloned())
    }

    fn list_providers(&self) -> Result<Vec<Provider>, StoreError> {
        self.read(|doc| doc.providers.values().cloned().collect())
    }

    fn save_provider(&self, provider: &Provider) -> Result<(), StoreError> {
        self.write(|doc| {
            let slot = doc
                .providers
                .get_mut(&provider.id)
                .ok_or_else(|| StoreError::Missing {
                    kind: RecordKind::Provider,
                    id: provider.id.to_string(),
                })?;
            *slot = provider.clone();
            Ok(())
        })
    }

    fn insert_flavor(&self, flavor: Flavor) -> Result<(), StoreError> {
        self.write(|doc| {
            if doc.flavors.contains_key(&flavor.id) {
                return Err(StoreError::Duplicate {
                    kind: RecordKind::Flavor,
                    id: flavor.id.to_string(),
                });
            }
            doc.flavors.insert(flavor.id.clone(), flavor);
            Ok(())
        })
    }

    fn get_flavor(&self, id: &FlavorId) -> Result<Option<Flavor>, StoreError> {
        self.read(|doc| doc.flavors.get(id).cloned())
    }

    fn list_flavors(&self) -> Result<Vec<Flavor>, StoreError> {
        self.read(|doc| doc.flavors.values().cloned().collect())
    }

    fn save_flavor(&self, flavor: &Flavor) -> Result<(), StoreError> {
        self.write(|doc| {
            let slot = doc
                .flavors
                .get_mut(&flavor.id)
                .ok_or_else(|| StoreError::Missing {
                    kind: RecordKind::Flavor,
                    id: flavor.id.to_string(),
                })?;
            *slot = flavor.clone();
            Ok(())
        })
    }
}
