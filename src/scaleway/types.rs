//! Newtypes and parsed inputs for the Scaleway backend.

use std::fmt;
use std::ops::Deref;

use crate::model::{Credentials, FlavorParams};
use crate::provider::NodeStatus;

use super::ScalewayBackendError;

/// Zone used when the flavor names no `region`.
pub const DEFAULT_ZONE: &str = "fr-par-1";
/// Commercial type used when the flavor names no `instance_size`.
pub const DEFAULT_INSTANCE_TYPE: &str = "DEV1-S";
/// Image label used when the flavor names no `image`.
pub const DEFAULT_IMAGE: &str = "Ubuntu 24.04 Noble Numbat";
/// Architecture used when the flavor names no `architecture`.
pub const DEFAULT_ARCHITECTURE: &str = "x86_64";

macro_rules! newtype {
    ($name:ident) => {
        #[derive(Clone, Debug, Eq, PartialEq)]
        pub(crate) struct $name(String);

        impl $name {
            pub(crate) const fn as_str(&self) -> &str {
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

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &Self::Target {
                self.as_str()
            }
        }
    };
}

newtype!(InstanceId);
newtype!(Zone);
newtype!(InstanceState);
newtype!(Action);

impl InstanceState {
    /// Maps a Scaleway server state onto the adapter status vocabulary.
    pub(crate) fn status(&self) -> NodeStatus {
        match self.as_str() {
            "running" => NodeStatus::Running,
            "starting" => NodeStatus::Pending,
            "stopped" | "stopped in place" | "stopping" => NodeStatus::Stopped,
            other => NodeStatus::Other(other.to_owned()),
        }
    }
}

/// Node identity as stored in the registry: `<zone>/<server id>`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct ExternalId {
    pub(crate) zone: Zone,
    pub(crate) id: InstanceId,
}

impl ExternalId {
    pub(crate) fn new(zone: &Zone, id: &InstanceId) -> Self {
        Self {
            zone: zone.clone(),
            id: id.clone(),
        }
    }

    pub(crate) fn parse(raw: &str) -> Result<Self, ScalewayBackendError> {
        let (zone, id) = raw
            .split_once('/')
            .filter(|(zone, id)| !zone.is_empty() && !id.is_empty() && !id.contains('/'))
            .ok_or_else(|| ScalewayBackendError::ExternalId(raw.to_owned()))?;
        Ok(Self {
            zone: Zone::from(zone),
            id: InstanceId::from(id),
        })
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.zone.as_str(), self.id.as_str())
    }
}

/// Account material extracted from provider credentials.
#[derive(Clone, Eq, PartialEq)]
pub(crate) struct ScalewayCredentials {
    pub(crate) secret_key: String,
    pub(crate) project_id: String,
    pub(crate) organization_id: Option<String>,
}

impl ScalewayCredentials {
    pub(crate) fn from_creds(creds: &Credentials) -> Result<Self, ScalewayBackendError> {
        let required = |key: &str| {
            creds
                .get_str(key)
                .ok_or_else(|| ScalewayBackendError::Credentials(key.to_owned()))
        };
        Ok(Self {
            secret_key: required("secret_key")?,
            project_id: required("project_id")?,
            organization_id: creds.get_str("organization_id"),
        })
    }
}

impl fmt::Debug for ScalewayCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScalewayCredentials")
            .field("secret_key", &"<redacted>")
            .field("project_id", &self.project_id)
            .field("organization_id", &self.organization_id)
            .finish()
    }
}

/// Server shape resolved from flavor parameters.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct ServerSpec {
    pub(crate) zone: Zone,
    pub(crate) instance_type: String,
    pub(crate) image_label: String,
    pub(crate) architecture: String,
}

impl ServerSpec {
    pub(crate) fn from_params(params: &FlavorParams) -> Self {
        let or_default = |key: &str, fallback: &str| {
            params.get_str(key).unwrap_or_else(|| fallback.to_owned())
        };
        Self {
            zone: Zone::from(or_default("region", DEFAULT_ZONE)),
            instance_type: or_default("instance_size", DEFAULT_INSTANCE_TYPE),
            image_label: or_default("image", DEFAULT_IMAGE),
            architecture: or_default("architecture", DEFAULT_ARCHITECTURE),
        }
    }
}
