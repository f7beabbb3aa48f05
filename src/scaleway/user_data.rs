//! Cloud-init user-data helpers for the Scaleway backend.
//!
//! Scaleway exposes instance user-data as a per-server key/value store. When
//! the key is set to `cloud-init`, the value is consumed by cloud-init on the
//! instance's first boot, so it must be written while the server is stopped.

use reqwest::header::CONTENT_TYPE;

use super::lifecycle::{HTTP_CLIENT, SCALEWAY_INSTANCE_API_BASE};
use super::types::{InstanceId, Zone};
use super::{ScalewayBackend, ScalewayBackendError};

/// Reserved user-data key that Scaleway recognises for cloud-init payloads.
pub(crate) const CLOUD_INIT_USER_DATA_KEY: &str = "cloud-init";

pub(crate) fn user_data_url(zone: &str, server_id: &str, key: &str) -> String {
    format!("{SCALEWAY_INSTANCE_API_BASE}/zones/{zone}/servers/{server_id}/user_data/{key}")
}

impl ScalewayBackend {
    pub(in crate::scaleway) async fn write_cloud_init(
        &self,
        zone: &Zone,
        id: &InstanceId,
        payload: String,
    ) -> Result<(), ScalewayBackendError> {
        let url = user_data_url(zone.as_str(), id.as_str(), CLOUD_INIT_USER_DATA_KEY);
        let response = HTTP_CLIENT
            .patch(&url)
            .header("X-Auth-Token", &self.creds.secret_key)
            .header(CONTENT_TYPE, "text/plain")
            .body(payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await?;
        Err(ScalewayBackendError::Provider {
            message: format!("user-data upload for {} failed ({status}): {body}", id.as_str()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_user_data_url() {
        let url = user_data_url("fr-par-1", "server-123", CLOUD_INIT_USER_DATA_KEY);
        assert_eq!(
            url,
            "https://api.scaleway.com/instance/v1/zones/fr-par-1/servers/server-123/user_data/cloud-init"
        );
    }
}
