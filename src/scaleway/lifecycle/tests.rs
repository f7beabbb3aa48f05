//! Unit tests for Scaleway lifecycle helpers.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use rstest::{fixture, rstest};
use scaleway_rs::{ScalewayApi, ScalewayImage};

use super::InstanceSnapshot;
use crate::scaleway::types::{
    Action, ExternalId, InstanceId, InstanceState, ScalewayCredentials, ServerSpec, Zone,
};
use crate::scaleway::{ScalewayBackend, ScalewayBackendError};

fn snapshot(state: &str, allowed: &[&str]) -> InstanceSnapshot {
    InstanceSnapshot {
        id: InstanceId::from("id"),
        state: InstanceState::from(state),
        allowed_actions: allowed.iter().copied().map(Action::from).collect(),
    }
}

fn image(id: &str, arch: &str, state: &str, creation_date: &str) -> ScalewayImage {
    ScalewayImage {
        id: id.to_owned(),
        name: String::new(),
        arch: arch.to_owned(),
        creation_date: creation_date.to_owned(),
        modification_date: String::new(),
        from_server: None,
        organization: String::new(),
        public: true,
        state: state.to_owned(),
        project: String::new(),
        tags: vec![],
        zone: String::new(),
        root_volume: scaleway_rs::ScalewayImageRootVolume {
            id: String::new(),
            name: String::new(),
            size: 0,
            volume_type: String::new(),
        },
        default_bootscript: None,
        extra_volumes: scaleway_rs::ScalewayImageExtraVolumes {
            volumes: HashMap::new(),
        },
    }
}

fn spec() -> ServerSpec {
    ServerSpec {
        zone: Zone::from("fr-par-1"),
        instance_type: "DEV1-S".to_owned(),
        image_label: "Ubuntu".to_owned(),
        architecture: "x86_64".to_owned(),
    }
}

#[fixture]
fn backend() -> ScalewayBackend {
    ScalewayBackend {
        api: ScalewayApi::new("dummy"),
        creds: ScalewayCredentials {
            secret_key: "dummy".to_owned(),
            project_id: "proj".to_owned(),
            organization_id: None,
        },
        poll_interval: Duration::from_millis(1),
        wait_timeout: Duration::from_millis(20),
    }
}

fn external() -> ExternalId {
    ExternalId::new(&Zone::from("fr-par-1"), &InstanceId::from("id"))
}

#[rstest]
#[tokio::test]
async fn power_on_is_skipped_for_running_servers(backend: ScalewayBackend) {
    let zone = Zone::from("fr-par-1");
    let result = backend
        .power_on_if_needed(&zone, &snapshot("running", &["poweron"]))
        .await;
    assert!(result.is_ok());
}

#[rstest]
#[tokio::test]
async fn power_on_errors_when_not_allowed(backend: ScalewayBackend) {
    let zone = Zone::from("fr-par-1");
    let result = backend
        .power_on_if_needed(&zone, &snapshot("stopped", &[]))
        .await;
    assert!(matches!(
        result,
        Err(ScalewayBackendError::PowerOnNotAllowed { .. })
    ));
}

#[rstest]
fn filter_images_discards_wrong_arch_or_state() {
    let images = vec![
        image("keep", "x86_64", "available", "2025-01-01T00:00:00Z"),
        image("wrong-arch", "arm64", "available", "2025-01-01T00:00:00Z"),
        image("wrong-state", "x86_64", "failed", "2025-01-01T00:00:00Z"),
    ];
    let filtered = ScalewayBackend::filter_images(images, &spec());
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered.first().map(|img| img.id.as_str()), Some("keep"));
}

#[rstest]
fn select_image_id_picks_newest() {
    let images = vec![
        image("oldest", "x86_64", "available", "2024-12-01T00:00:00Z"),
        image("newest", "x86_64", "available", "2025-02-01T00:00:00Z"),
    ];
    let id = ScalewayBackend::select_image_id(images, &spec()).expect("image selected");
    assert_eq!(id, "newest");
}

#[rstest]
fn select_image_id_errors_on_empty() {
    let err = ScalewayBackend::select_image_id(Vec::new(), &spec()).expect_err("no images");
    assert!(matches!(err, ScalewayBackendError::ImageNotFound { .. }));
}

#[rstest]
#[tokio::test]
async fn public_images_are_consulted_when_project_has_none(backend: ScalewayBackend) {
    let id = backend
        .resolve_image_id_with(
            &spec(),
            || async { Ok(Vec::new()) },
            || async {
                Ok(vec![image(
                    "public",
                    "x86_64",
                    "available",
                    "2025-01-01T00:00:00Z",
                )])
            },
        )
        .await
        .expect("resolved");
    assert_eq!(id, "public");
}

#[rstest]
#[tokio::test]
async fn wait_until_gone_returns_once_the_server_disappears(backend: ScalewayBackend) {
    let seen = Mutex::new(VecDeque::from([
        Some(snapshot("stopping", &[])),
        Some(snapshot("stopping", &[])),
        None,
    ]));
    let result = backend
        .wait_until_gone_with(&external(), || {
            let next = seen.lock().map_or(None, |mut queue| queue.pop_front().flatten());
            async move { Ok(next) }
        })
        .await;
    assert!(result.is_ok());
}

#[rstest]
#[tokio::test]
async fn wait_until_gone_reports_residual_servers(backend: ScalewayBackend) {
    let result = backend
        .wait_until_gone_with(&external(), || async { Ok(Some(snapshot("running", &[]))) })
        .await;
    assert!(matches!(
        result,
        Err(ScalewayBackendError::ResidualResource { .. })
    ));
}
