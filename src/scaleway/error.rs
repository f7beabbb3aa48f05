//! Error types for the Scaleway backend.

use scaleway_rs::ScalewayError;
use thiserror::Error;

use crate::cloud_init::CloudInitError;
use crate::model::ProviderKind;
use crate::provider::ProviderError;

/// Errors raised by the Scaleway backend.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ScalewayBackendError {
    /// Raised when a required credential key is absent or blank.
    #[error("missing credential {0}")]
    Credentials(String),
    /// Raised when a request is missing a required field.
    #[error("invalid node request: {0}")]
    Validation(String),
    /// Raised when an external id is not of the form `<zone>/<server id>`.
    #[error("malformed external id {0:?}; expected <zone>/<server id>")]
    ExternalId(String),
    /// Raised when the requested image label cannot be resolved.
    #[error("image '{label}' (arch {arch}) not found in zone {zone}")]
    ImageNotFound {
        /// Image label from the flavor.
        label: String,
        /// Architecture from the flavor.
        arch: String,
        /// Zone used for the lookup.
        zone: String,
    },
    /// Raised when the server type is not available in the selected zone.
    #[error("instance type '{instance_type}' not available in zone {zone}")]
    InstanceTypeUnavailable {
        /// Requested commercial type.
        instance_type: String,
        /// Target zone.
        zone: String,
    },
    /// Raised when the server is not known to the API.
    #[error("server {external_id} not found")]
    NotFound {
        /// External id in `<zone>/<server id>` form.
        external_id: String,
    },
    /// Raised when teardown leaves a server visible in the API.
    #[error("instance {instance_id} still present after teardown")]
    ResidualResource {
        /// Provider instance identifier.
        instance_id: String,
    },
    /// Raised when an instance cannot be powered on.
    #[error("instance {instance_id} in state {state} cannot be powered on")]
    PowerOnNotAllowed {
        /// Provider instance identifier.
        instance_id: String,
        /// Current state reported by the provider.
        state: String,
    },
    /// Raised when user-data cannot be rendered.
    #[error(transparent)]
    CloudInit(#[from] CloudInitError),
    /// Wrapper for provider level failures.
    #[error("provider error: {message}")]
    Provider {
        /// Message returned by the provider SDK.
        message: String,
    },
}

impl From<ScalewayError> for ScalewayBackendError {
    fn from(value: ScalewayError) -> Self {
        Self::Provider {
            message: value.to_string(),
        }
    }
}

impl From<reqwest::Error> for ScalewayBackendError {
    fn from(value: reqwest::Error) -> Self {
        Self::Provider {
            message: value.to_string(),
        }
    }
}

impl From<ScalewayBackendError> for ProviderError {
    fn from(value: ScalewayBackendError) -> Self {
        match value {
            ScalewayBackendError::Credentials(key) => Self::Credentials {
                backend: ProviderKind::Scaleway,
                key,
            },
            ScalewayBackendError::Validation(field) => Self::Validation(field),
            ScalewayBackendError::CloudInit(err) => Self::Validation(err.to_string()),
            ScalewayBackendError::NotFound { external_id } => Self::NotFound { external_id },
            other => Self::Backend {
                backend: ProviderKind::Scaleway,
                message: other.to_string(),
            },
        }
    }
}
