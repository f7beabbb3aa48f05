//! Lookup and teardown wait helpers for the Scaleway backend.

use std::future::Future;
use std::time::Instant;

use tokio::time::sleep;

use crate::scaleway::types::ExternalId;

use super::super::{ScalewayBackend, ScalewayBackendError};
use super::InstanceSnapshot;

impl ScalewayBackend {
    pub(in crate::scaleway) async fn fetch_instance(
        &self,
        external: &ExternalId,
    ) -> Result<Option<InstanceSnapshot>, ScalewayBackendError> {
        let mut servers = self
            .api
            .list_instances(external.zone.as_str())
            .servers(external.id.as_str())
            .per_page(1)
            .run_async()
            .await?;
        Ok(servers.pop().map(InstanceSnapshot::from))
    }

    pub(in crate::scaleway) async fn wait_until_gone(
        &self,
        external: &ExternalId,
    ) -> Result<(), ScalewayBackendError> {
        self.wait_until_gone_with(external, || self.fetch_instance(external))
            .await
    }

    /// Polls `fetch` until it reports no server or the wait times out.
    pub(in crate::scaleway) async fn wait_until_gone_with<Fetch, Fut>(
        &self,
        external: &ExternalId,
        mut fetch: Fetch,
    ) -> Result<(), ScalewayBackendError>
    where
        Fetch: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<InstanceSnapshot>, ScalewayBackendError>>,
    {
        let deadline = Instant::now() + self.wait_timeout;
        while Instant::now() <= deadline {
            if fetch().await?.is_none() {
                return Ok(());
            }
            sleep(self.poll_interval).await;
        }

        Err(ScalewayBackendError::ResidualResource {
            instance_id: external.id.as_str().to_owned(),
        })
    }
}
