//! Server creation helpers for the Scaleway backend.
//!
//! Servers are created with `stopped: true` so cloud-init user-data can be
//! written before the first boot.

use serde::{Deserialize, Serialize};

use crate::scaleway::types::{ServerSpec, Zone};

use super::super::{ScalewayBackend, ScalewayBackendError};
use super::{HTTP_CLIENT, InstanceSnapshot, SCALEWAY_INSTANCE_API_BASE};

#[derive(Serialize)]
struct CreateServerRequest<'a> {
    name: &'a str,
    commercial_type: &'a str,
    image: &'a str,
    project: &'a str,
    routed_ip_enabled: bool,
    dynamic_ip_required: bool,
    tags: &'a [String],
    stopped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization: Option<&'a str>,
}

#[derive(Deserialize)]
struct CreateServerResponse {
    server: scaleway_rs::ScalewayInstance,
}

impl ScalewayBackend {
    fn is_instance_type_error(api_err: &scaleway_rs::ScalewayApiError, spec: &ServerSpec) -> bool {
        matches!(api_err.resource.as_deref(), Some("commercial_type"))
            || api_err
                .resource_id
                .as_deref()
                .is_some_and(|id| id == spec.instance_type)
            || (api_err.etype == "invalid_arguments"
                && api_err
                    .message
                    .to_ascii_lowercase()
                    .contains("commercial_type"))
    }

    pub(in crate::scaleway) async fn power_on_if_needed(
        &self,
        zone: &Zone,
        snapshot: &InstanceSnapshot,
    ) -> Result<(), ScalewayBackendError> {
        if snapshot.state.as_str() == "running" {
            return Ok(());
        }

        if snapshot.allows("poweron") {
            self.api
                .perform_instance_action_async(zone.as_str(), snapshot.id.as_str(), "poweron")
                .await?;
            return Ok(());
        }

        Err(ScalewayBackendError::PowerOnNotAllowed {
            instance_id: snapshot.id.as_str().to_owned(),
            state: snapshot.state.as_str().to_owned(),
        })
    }

    /// Creates a stopped server of the given shape.
    ///
    /// # Errors
    ///
    /// Returns [`ScalewayBackendError::InstanceTypeUnavailable`] when the zone
    /// rejects the commercial type and [`ScalewayBackendError::Provider`] for
    /// any other API failure.
    pub(in crate::scaleway) async fn create_server_stopped(
        &self,
        spec: &ServerSpec,
        name: &str,
        tags: &[String],
        image_id: &str,
    ) -> Result<InstanceSnapshot, ScalewayBackendError> {
        let url = format!(
            "{SCALEWAY_INSTANCE_API_BASE}/zones/{}/servers",
            spec.zone.as_str()
        );
        let payload = CreateServerRequest {
            name,
            commercial_type: &spec.instance_type,
            image: image_id,
            project: &self.creds.project_id,
            routed_ip_enabled: true,
            dynamic_ip_required: true,
            tags,
            stopped: true,
            organization: self.creds.organization_id.as_deref(),
        };

        let response = HTTP_CLIENT
            .post(&url)
            .header("X-Auth-Token", &self.creds.secret_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        if status.is_success() {
            let parsed: CreateServerResponse =
                serde_json::from_slice(&body).map_err(|err| ScalewayBackendError::Provider {
                    message: err.to_string(),
                })?;
            return Ok(parsed.server.into());
        }

        if let Ok(api_err) = serde_json::from_slice::<scaleway_rs::ScalewayApiError>(&body)
            && Self::is_instance_type_error(&api_err, spec)
        {
            return Err(ScalewayBackendError::InstanceTypeUnavailable {
                instance_type: spec.instance_type.clone(),
                zone: spec.zone.as_str().to_owned(),
            });
        }

        Err(ScalewayBackendError::Provider {
            message: String::from_utf8_lossy(&body).into_owned(),
        })
    }
}
