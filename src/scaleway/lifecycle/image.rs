//! Image resolution helpers for the Scaleway backend.

use std::future::Future;

use scaleway_rs::{ScalewayImage, ScalewayListInstanceImagesBuilder};

use crate::scaleway::types::ServerSpec;

use super::super::{ScalewayBackend, ScalewayBackendError};

impl ScalewayBackend {
    /// Resolves the flavor's image label, preferring project images over
    /// public ones.
    pub(in crate::scaleway) async fn resolve_image_id(
        &self,
        spec: &ServerSpec,
    ) -> Result<String, ScalewayBackendError> {
        let zone = spec.zone.as_str();
        self.resolve_image_id_with(
            spec,
            || async move {
                let mut scoped = ScalewayListInstanceImagesBuilder::new(self.api.clone(), zone)
                    .public(true)
                    .project(&self.creds.project_id)
                    .name(&spec.image_label)
                    .arch(&spec.architecture);
                if let Some(org) = &self.creds.organization_id {
                    scoped = scoped.organization(org);
                }
                scoped.run_async().await.map_err(ScalewayBackendError::from)
            },
            || async move {
                ScalewayListInstanceImagesBuilder::new(self.api.clone(), zone)
                    .public(true)
                    .name(&spec.image_label)
                    .arch(&spec.architecture)
                    .run_async()
                    .await
                    .map_err(ScalewayBackendError::from)
            },
        )
        .await
    }

    pub(in crate::scaleway) async fn resolve_image_id_with<FutA, FutB, FetchA, FetchB>(
        &self,
        spec: &ServerSpec,
        project_fetch: FetchA,
        public_fetch: FetchB,
    ) -> Result<String, ScalewayBackendError>
    where
        FetchA: FnOnce() -> FutA,
        FetchB: FnOnce() -> FutB,
        FutA: Future<Output = Result<Vec<ScalewayImage>, ScalewayBackendError>>,
        FutB: Future<Output = Result<Vec<ScalewayImage>, ScalewayBackendError>>,
    {
        let project_images = project_fetch().await?;
        let primary = if project_images.is_empty() {
            public_fetch().await?
        } else {
            project_images
        };
        Self::select_image_id(Self::filter_images(primary, spec), spec)
    }

    pub(in crate::scaleway) fn select_image_id(
        mut candidates: Vec<ScalewayImage>,
        spec: &ServerSpec,
    ) -> Result<String, ScalewayBackendError> {
        candidates.sort_by(|lhs, rhs| rhs.creation_date.cmp(&lhs.creation_date));
        candidates
            .into_iter()
            .next()
            .map(|image| image.id)
            .ok_or_else(|| ScalewayBackendError::ImageNotFound {
                label: spec.image_label.clone(),
                arch: spec.architecture.clone(),
                zone: spec.zone.as_str().to_owned(),
            })
    }

    pub(in crate::scaleway) fn filter_images(
        images: Vec<ScalewayImage>,
        spec: &ServerSpec,
    ) -> Vec<ScalewayImage> {
        images
            .into_iter()
            .filter(|image| image.arch == spec.architecture)
            .filter(|image| image.state == "available")
            .collect()
    }
}
