//! Domain records for providers, flavors, formations, layers and nodes.
//!
//! Records are plain serialisable values. Ownership is by reference: a
//! [`Layer`] names its formation and flavor, a [`Node`] names its formation
//! and layer. Cascades are applied by the store and the platform facade.

mod input;
mod scale;

use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use input::{
    FlavorPatch, LayerPatch, NewFlavor, NewFormation, NewLayer, NewProvider, ProviderPatch,
};
pub use scale::DesiredScale;

/// Layer id that is tagged as the proxy layer when no explicit flag is given.
pub const DEFAULT_PROXY_LAYER: &str = "proxy";

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a raw identifier value.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub const fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

identifier!(
    /// Identifier of a registered cloud provider.
    ProviderId
);
identifier!(
    /// Identifier of an instance flavor.
    FlavorId
);
identifier!(
    /// Identifier of a formation.
    FormationId
);
identifier!(
    /// Identifier of a layer, unique within its formation.
    LayerId
);
identifier!(
    /// Identifier of a node record.
    NodeId
);

impl NodeId {
    /// Generates a fresh random node identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// Errors raised when input fails validation before any side effect.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ValidationError {
    /// Raised when a desired count is below zero.
    #[error("layer {layer} requested a negative node count ({count})")]
    NegativeCount {
        /// Layer carrying the invalid count.
        layer: LayerId,
        /// Count as submitted.
        count: i64,
    },
    /// Raised when a desired count does not fit the supported range.
    #[error("layer {layer} requested too many nodes ({count})")]
    CountTooLarge {
        /// Layer carrying the invalid count.
        layer: LayerId,
        /// Count as submitted.
        count: i64,
    },
    /// Raised when the same layer appears twice in one request.
    #[error("layer {layer} appears more than once")]
    DuplicateLayer {
        /// Repeated layer id.
        layer: LayerId,
    },
    /// Raised when a required string field is blank.
    #[error("missing or empty field: {field}")]
    EmptyField {
        /// Name of the blank field.
        field: String,
    },
    /// Raised when a provider type is not supported.
    #[error("unsupported provider type: {value}")]
    UnknownProviderKind {
        /// Value supplied by the caller.
        value: String,
    },
    /// Raised when a JSON payload cannot be decoded.
    #[error("malformed input: {message}")]
    Malformed {
        /// Decoder message.
        message: String,
    },
}

/// Backend discriminator carried by a provider record.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Deterministic in-process provider used for testing.
    Mock,
    /// Scaleway Instances API.
    Scaleway,
}

impl ProviderKind {
    /// Returns the lowercase wire name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mock => "mock",
            Self::Scaleway => "scaleway",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mock" => Ok(Self::Mock),
            "scaleway" => Ok(Self::Scaleway),
            _ => Err(ValidationError::UnknownProviderKind {
                value: value.to_owned(),
            }),
        }
    }
}

macro_rules! opaque_map {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(BTreeMap<String, serde_json::Value>);

        impl $name {
            /// Decodes a JSON object.
            ///
            /// # Errors
            ///
            /// Returns [`ValidationError::Malformed`] when the payload is not
            /// a JSON object.
            pub fn from_json(raw: &str) -> Result<Self, ValidationError> {
                serde_json::from_str(raw).map_err(|err| ValidationError::Malformed {
                    message: err.to_string(),
                })
            }

            /// Returns true when the map holds no entries.
            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }

            /// Returns the raw value stored under `key`.
            #[must_use]
            pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
                self.0.get(key)
            }

            /// Returns the value under `key` rendered as a trimmed, non-empty
            /// string. Numbers and booleans are rendered with their JSON text.
            #[must_use]
            pub fn get_str(&self, key: &str) -> Option<String> {
                let rendered = match self.0.get(key)? {
                    serde_json::Value::String(text) => text.trim().to_owned(),
                    serde_json::Value::Null => return None,
                    other => other.to_string(),
                };
                (!rendered.is_empty()).then_some(rendered)
            }

            /// Inserts or replaces an entry.
            pub fn insert(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
                self.0.insert(key.into(), value.into());
            }
        }

        impl<K, V> FromIterator<(K, V)> for $name
        where
            K: Into<String>,
            V: Into<serde_json::Value>,
        {
            fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
                Self(
                    iter.into_iter()
                        .map(|(key, value)| (key.into(), value.into()))
                        .collect(),
                )
            }
        }
    };
}

opaque_map!(
    /// Opaque provider credentials. Only emptiness is checked generically;
    /// each backend validates the keys it needs.
    Credentials
);
opaque_map!(
    /// Opaque flavor parameters such as `region` and `instance_size`.
    FlavorParams
);

/// Registered cloud provider.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    /// Provider identifier.
    pub id: ProviderId,
    /// Owning user.
    pub owner: String,
    /// Backend discriminator.
    #[serde(rename = "type")]
    pub kind: ProviderKind,
    /// Opaque credentials handed to the backend.
    pub creds: Credentials,
}

/// Named instance-sizing template tied to a provider.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Flavor {
    /// Flavor identifier.
    pub id: FlavorId,
    /// Owning user.
    pub owner: String,
    /// Provider this flavor provisions through.
    pub provider: ProviderId,
    /// Backend specific parameters.
    pub params: FlavorParams,
}

/// Deployed application environment.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Formation {
    /// Formation identifier.
    pub id: FormationId,
    /// Owning user.
    pub owner: String,
    /// Desired layer counts exactly as last submitted.
    pub layers: DesiredScale,
    /// Current release pointer.
    pub release: u64,
}

impl Formation {
    /// Creates an empty formation at release zero.
    #[must_use]
    pub fn new(id: FormationId, owner: impl Into<String>) -> Self {
        Self {
            id,
            owner: owner.into(),
            layers: DesiredScale::default(),
            release: 0,
        }
    }
}

/// Opaque configuration-management run-list applied to a layer's nodes.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunList(String);

impl RunList {
    /// Wraps a run-list string.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the raw run-list.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for RunList {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Homogeneous group of nodes within a formation.
///
/// The SSH private key supplied at creation is not part of this record; it is
/// kept in a [`LayerSecret`] and never leaves the store.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    /// Layer identifier.
    pub id: LayerId,
    /// Owning formation.
    pub formation: FormationId,
    /// Owning user.
    pub owner: String,
    /// Flavor used for new nodes.
    pub flavor: FlavorId,
    /// Run-list applied to new nodes.
    pub run_list: RunList,
    /// Public half of the layer keypair.
    pub ssh_public_key: Option<String>,
    /// Whether this layer fronts the formation as its reverse proxy.
    pub proxy: bool,
    /// Desired node count recorded by the last reconcile.
    pub desired: u32,
}

/// SSH private key accepted on layer input.
///
/// `Debug` is redacted. The value is only serialised into the internal
/// secret record.
#[derive(Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrivateKey(String);

impl PrivateKey {
    /// Wraps a PEM encoded private key.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Exposes the key material.
    #[must_use]
    pub const fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

/// Internal record holding a layer's write-only private key.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct LayerSecret {
    /// Owning formation.
    pub formation: FormationId,
    /// Owning layer.
    pub layer: LayerId,
    /// Private key material.
    pub ssh_private_key: PrivateKey,
}

/// Lifecycle state of a node record.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    /// Provider call issued, no confirmation yet.
    Requested,
    /// Confirmed by the provider.
    Up,
    /// Destroy call issued.
    Destroying,
    /// Confirmed gone; records in this state are removed from the registry.
    Destroyed,
}

impl NodeState {
    /// Returns true for states that still occupy a slot in the layer.
    #[must_use]
    pub const fn is_live(self) -> bool {
        !matches!(self, Self::Destroyed)
    }
}

/// Provisioned virtual machine belonging to a layer.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Node identifier.
    pub id: NodeId,
    /// Owning formation.
    pub formation: FormationId,
    /// Owning layer.
    pub layer: LayerId,
    /// Provider assigned identifier, absent until the provider confirms.
    pub external_id: Option<String>,
    /// Lifecycle state.
    pub state: NodeState,
    /// Containers hosted on this node.
    pub containers: u32,
    /// Store assigned creation sequence.
    pub sequence: u64,
}

/// Request to insert a node record in the `requested` state.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NewNode {
    /// Owning formation.
    pub formation: FormationId,
    /// Owning layer.
    pub layer: LayerId,
}

pub(crate) fn require_non_empty(value: &str, field: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyField {
            field: field.to_owned(),
        });
    }
    Ok(())
}
