//! Scaleway backend implementation of the provider adapter.
//!
//! Credentials need `secret_key` and `project_id`; `organization_id` is
//! optional. Flavor parameters map `region` to the zone and `instance_size`
//! to the commercial type. Nodes are identified as `<zone>/<server id>`.

mod error;
mod lifecycle;
mod types;
mod user_data;

use std::sync::Arc;
use std::time::Duration;

use scaleway_rs::ScalewayApi;

use crate::cloud_init;
use crate::model::{Credentials, Provider};
use crate::provider::{
    AdapterFactory, NodeRequest, NodeStatus, ProviderAdapter, ProviderError, ProviderFuture,
    ProvisionedNode,
};
use types::{ExternalId, ScalewayCredentials, ServerSpec};

pub use error::ScalewayBackendError;
pub use types::{DEFAULT_ARCHITECTURE, DEFAULT_IMAGE, DEFAULT_INSTANCE_TYPE, DEFAULT_ZONE};

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const WAIT_TIMEOUT: Duration = Duration::from_secs(300);
const CONTAINERS_PER_NODE: u32 = 1;
const RESOURCE_TAG: &str = "strata";

/// Backend that provisions nodes through the Scaleway Instances API.
#[derive(Clone)]
pub struct ScalewayBackend {
    api: ScalewayApi,
    creds: ScalewayCredentials,
    poll_interval: Duration,
    wait_timeout: Duration,
}

impl ScalewayBackend {
    /// Constructs a backend from a provider's credentials.
    ///
    /// # Errors
    ///
    /// Returns [`ScalewayBackendError::Credentials`] when `secret_key` or
    /// `project_id` is missing.
    pub fn from_credentials(creds: &Credentials) -> Result<Self, ScalewayBackendError> {
        let parsed = ScalewayCredentials::from_creds(creds)?;
        Ok(Self {
            api: ScalewayApi::new(&parsed.secret_key),
            creds: parsed,
            poll_interval: POLL_INTERVAL,
            wait_timeout: WAIT_TIMEOUT,
        })
    }

    async fn provision(
        &self,
        request: &NodeRequest,
    ) -> Result<ProvisionedNode, ScalewayBackendError> {
        let spec = ServerSpec::from_params(&request.flavor);
        let user_data = cloud_init::render(
            &request.name,
            &request.run_list,
            request.ssh_public_key.as_deref(),
        )?;
        let image_id = self.resolve_image_id(&spec).await?;
        let tags: Vec<String> = std::iter::once(RESOURCE_TAG.to_owned())
            .chain(request.tags.iter().cloned())
            .collect();

        let server = self
            .create_server_stopped(&spec, &request.name, &tags, &image_id)
            .await?;
        let external = ExternalId::new(&spec.zone, &server.id);

        let booted = match self.write_cloud_init(&spec.zone, &server.id, user_data).await {
            Ok(()) => self.power_on_if_needed(&spec.zone, &server).await,
            Err(err) => Err(err),
        };
        if let Err(err) = booted {
            self.discard(&external).await;
            return Err(err);
        }

        tracing::info!(external_id = %external, name = %request.name, "Scaleway server created");
        Ok(ProvisionedNode {
            external_id: external.to_string(),
            status: NodeStatus::Pending,
            containers: CONTAINERS_PER_NODE,
        })
    }

    /// Deletes a server that never finished booting; failures are logged.
    async fn discard(&self, external: &ExternalId) {
        if let Err(err) = self
            .api
            .delete_instance_async(external.zone.as_str(), external.id.as_str())
            .await
        {
            tracing::warn!(external_id = %external, error = %err, "failed to discard server");
        }
    }

    async fn terminate(&self, raw: &str) -> Result<(), ScalewayBackendError> {
        let external = ExternalId::parse(raw)?;
        let server = self
            .fetch_instance(&external)
            .await?
            .ok_or_else(|| ScalewayBackendError::NotFound {
                external_id: raw.to_owned(),
            })?;

        if server.allows("terminate") {
            self.api
                .perform_instance_action_async(
                    external.zone.as_str(),
                    external.id.as_str(),
                    "terminate",
                )
                .await?;
        } else {
            self.api
                .delete_instance_async(external.zone.as_str(), external.id.as_str())
                .await?;
        }
        self.wait_until_gone(&external).await?;
        tracing::info!(external_id = %external, "Scaleway server terminated");
        Ok(())
    }

    async fn status(&self, raw: &str) -> Result<NodeStatus, ScalewayBackendError> {
        let external = ExternalId::parse(raw)?;
        Ok(self
            .fetch_instance(&external)
            .await?
            .map_or(NodeStatus::Gone, |server| server.state.status()))
    }
}

impl std::fmt::Debug for ScalewayBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScalewayBackend")
            .field("creds", &self.creds)
            .field("poll_interval", &self.poll_interval)
            .field("wait_timeout", &self.wait_timeout)
            .finish_non_exhaustive()
    }
}

impl ProviderAdapter for ScalewayBackend {
    fn create_node<'a>(&'a self, request: &'a NodeRequest) -> ProviderFuture<'a, ProvisionedNode> {
        Box::pin(async move {
            request.validate()?;
            self.provision(request).await.map_err(ProviderError::from)
        })
    }

    fn destroy_node<'a>(&'a self, external_id: &'a str) -> ProviderFuture<'a, ()> {
        Box::pin(async move { self.terminate(external_id).await.map_err(ProviderError::from) })
    }

    fn query_status<'a>(&'a self, external_id: &'a str) -> ProviderFuture<'a, NodeStatus> {
        Box::pin(async move { self.status(external_id).await.map_err(ProviderError::from) })
    }
}

/// Connects Scaleway provider records to [`ScalewayBackend`] adapters.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScalewayFactory;

impl AdapterFactory for ScalewayFactory {
    fn connect(&self, provider: &Provider) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
        let backend = ScalewayBackend::from_credentials(&provider.creds)?;
        Ok(Arc::new(backend))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ProviderId, ProviderKind};
    use rstest::rstest;

    fn provider(creds: Credentials) -> Provider {
        Provider {
            id: ProviderId::from("scw"),
            owner: "autotest".to_owned(),
            kind: ProviderKind::Scaleway,
            creds,
        }
    }

    #[rstest]
    fn factory_reports_missing_credential_keys() {
        let err = ScalewayFactory
            .connect(&provider(Credentials::from_iter([("secret_key", "k")])))
            .err()
            .expect("missing project");
        assert_eq!(
            err,
            ProviderError::Credentials {
                backend: ProviderKind::Scaleway,
                key: "project_id".to_owned(),
            }
        );
    }

    #[rstest]
    fn factory_connects_with_complete_credentials() {
        let creds = Credentials::from_iter([("secret_key", "k"), ("project_id", "p")]);
        assert!(ScalewayFactory.connect(&provider(creds)).is_ok());
    }

    #[rstest]
    #[tokio::test]
    async fn malformed_external_ids_fail_without_api_calls() {
        let creds = Credentials::from_iter([("secret_key", "k"), ("project_id", "p")]);
        let backend = ScalewayBackend::from_credentials(&creds).expect("backend");
        let err = backend.destroy_node("no-zone").await.expect_err("malformed");
        assert!(matches!(
            err,
            ProviderError::Backend {
                backend: ProviderKind::Scaleway,
                ..
            }
        ));
    }

    #[rstest]
    fn debug_output_redacts_the_secret() {
        let creds = Credentials::from_iter([("secret_key", "hunter2"), ("project_id", "p")]);
        let backend = ScalewayBackend::from_credentials(&creds).expect("backend");
        assert!(!format!("{backend:?}").contains("hunter2"));
    }
}
