//! Caller supplied payloads for creating and patching records.
//!
//! These types only derive `Deserialize`: they are decoded from requests and
//! never echoed back, which keeps write-only fields such as the SSH private
//! key off every output path.

use serde::Deserialize;

use super::{
    Credentials, FlavorId, FlavorParams, FormationId, LayerId, PrivateKey, ProviderId,
    ProviderKind, RunList, ValidationError, require_non_empty,
};

/// Payload for registering a provider.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct NewProvider {
    /// Provider identifier.
    pub id: ProviderId,
    /// Backend discriminator.
    #[serde(rename = "type")]
    pub kind: ProviderKind,
    /// Opaque credentials.
    #[serde(default)]
    pub creds: Credentials,
}

impl NewProvider {
    /// Checks required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyField`] when the id is blank.
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_non_empty(self.id.as_str(), "id")
    }
}

/// Partial update for a provider.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct ProviderPatch {
    /// Replacement credentials.
    pub creds: Option<Credentials>,
}

/// Payload for defining a flavor.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct NewFlavor {
    /// Flavor identifier.
    pub id: FlavorId,
    /// Provider the flavor provisions through.
    pub provider: ProviderId,
    /// Backend specific parameters.
    #[serde(default)]
    pub params: FlavorParams,
}

impl NewFlavor {
    /// Checks required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyField`] when the id or provider is blank.
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_non_empty(self.id.as_str(), "id")?;
        require_non_empty(self.provider.as_str(), "provider")
    }
}

/// Partial update for a flavor.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct FlavorPatch {
    /// Replacement parameters.
    pub params: Option<FlavorParams>,
}

/// Payload for creating a formation.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct NewFormation {
    /// Formation identifier.
    pub id: FormationId,
}

impl NewFormation {
    /// Checks required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyField`] when the id is blank.
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_non_empty(self.id.as_str(), "id")
    }
}

/// Payload for attaching a layer to a formation.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct NewLayer {
    /// Layer identifier, unique within the formation.
    pub id: LayerId,
    /// Flavor used for the layer's nodes.
    pub flavor: FlavorId,
    /// Run-list applied to the layer's nodes.
    #[serde(default)]
    pub run_list: RunList,
    /// Public half of the keypair, returned on reads.
    #[serde(default)]
    pub ssh_public_key: Option<String>,
    /// Private half of the keypair; accepted here and never returned.
    #[serde(default)]
    pub ssh_private_key: Option<PrivateKey>,
    /// Proxy tag; defaults to true when the id is `proxy`.
    #[serde(default)]
    pub proxy: Option<bool>,
}

impl NewLayer {
    /// Starts a layer payload with the required fields.
    #[must_use]
    pub fn new(id: impl Into<LayerId>, flavor: impl Into<FlavorId>, run_list: &str) -> Self {
        Self {
            id: id.into(),
            flavor: flavor.into(),
            run_list: RunList::from(run_list),
            ssh_public_key: None,
            ssh_private_key: None,
            proxy: None,
        }
    }

    /// Attaches an SSH keypair.
    #[must_use]
    pub fn with_keypair(mut self, public: impl Into<String>, private: PrivateKey) -> Self {
        self.ssh_public_key = Some(public.into());
        self.ssh_private_key = Some(private);
        self
    }

    /// Sets the proxy tag explicitly.
    #[must_use]
    pub const fn with_proxy(mut self, proxy: bool) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Resolves the effective proxy tag.
    #[must_use]
    pub fn is_proxy(&self) -> bool {
        self.proxy
            .unwrap_or_else(|| self.id.as_str() == super::DEFAULT_PROXY_LAYER)
    }

    /// Checks required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyField`] when the id, flavor or a
    /// supplied key is blank.
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_non_empty(self.id.as_str(), "id")?;
        require_non_empty(self.flavor.as_str(), "flavor")?;
        if let Some(public) = &self.ssh_public_key {
            require_non_empty(public, "ssh_public_key")?;
        }
        if let Some(private) = &self.ssh_private_key {
            require_non_empty(private.expose(), "ssh_private_key")?;
        }
        Ok(())
    }
}

/// Partial update for a layer; absent fields are left unchanged.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct LayerPatch {
    /// Replacement flavor; rejected while the layer has nodes.
    pub flavor: Option<FlavorId>,
    /// Replacement run-list.
    pub run_list: Option<RunList>,
    /// Replacement public key.
    pub ssh_public_key: Option<String>,
    /// Replacement private key.
    pub ssh_private_key: Option<PrivateKey>,
    /// Replacement proxy tag.
    pub proxy: Option<bool>,
}

impl LayerPatch {
    /// Patch that only replaces the run-list.
    #[must_use]
    pub fn run_list(run_list: &str) -> Self {
        Self {
            run_list: Some(RunList::from(run_list)),
            ..Self::default()
        }
    }
}
