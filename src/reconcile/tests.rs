//! Unit tests for the reconciliation engine.

use std::time::Duration;

use super::*;
use crate::model::{Credentials, ProviderPatch};
use crate::provider::MockProvider;
use crate::store::{LayerStore, NodeRegistry};
use crate::test_support::{FIXTURE_ID, Harness};
use rstest::{fixture, rstest};

struct Ctx {
    harness: Harness,
    formation: FormationId,
}

impl Ctx {
    fn seed(harness: Harness) -> Self {
        let formation = harness
            .formation_with_layers()
            .expect("formation should seed");
        Self { harness, formation }
    }

    fn reconciler(&self) -> &Reconciler<crate::store::Store> {
        self.harness.platform.reconciler()
    }

    async fn scale(&self, pairs: &[(&str, i64)]) -> Result<ScaleOutcome, ReconcileError> {
        let desired = DesiredScale::from_pairs(pairs.iter().copied()).expect("valid scale");
        self.reconciler().reconcile(&self.formation, &desired).await
    }

    fn nodes(&self, layer: &str) -> Vec<Node> {
        self.harness
            .platform
            .store()
            .list_by_layer(&self.formation, &LayerId::from(layer))
            .expect("list nodes")
    }
}

#[fixture]
fn ctx() -> Ctx {
    Ctx::seed(Harness::seeded().expect("harness"))
}

fn runtime() -> LayerId {
    LayerId::from("runtime")
}

#[rstest]
#[tokio::test]
async fn scales_up_from_zero_and_records_desired(ctx: Ctx) {
    let outcome = ctx
        .scale(&[("proxy", 2), ("runtime", 4)])
        .await
        .expect("scale");
    assert_eq!(outcome.nodes, 6);
    assert_eq!(outcome.proxy, 2);
    assert_eq!(outcome.containers, 6);
    assert_eq!(outcome.release, 1);
    assert!(!outcome.is_partial());
    assert_eq!(outcome.layer_count(&runtime()), 4);

    let formation = ctx
        .harness
        .platform
        .get_formation(&ctx.formation)
        .expect("formation");
    assert_eq!(
        serde_json::to_string(&formation.layers).expect("json"),
        r#"{"proxy":2,"runtime":4}"#
    );
    let layer = ctx
        .harness
        .platform
        .get_layer(&ctx.formation, &runtime())
        .expect("layer");
    assert_eq!(layer.desired, 4);
    assert!(
        ctx.nodes("runtime")
            .iter()
            .all(|node| node.state == NodeState::Up && node.external_id.is_some())
    );
}

#[rstest]
#[tokio::test]
async fn repeating_an_achieved_target_makes_no_provider_calls(ctx: Ctx) {
    ctx.scale(&[("runtime", 3)]).await.expect("first");
    let created = ctx.harness.mock.created().len();
    let again = ctx.scale(&[("runtime", 3)]).await.expect("second");
    assert_eq!(again.nodes, 3);
    assert_eq!(again.release, 2);
    assert_eq!(ctx.harness.mock.created().len(), created);
    assert!(ctx.harness.mock.destroy_calls().is_empty());
    assert_eq!(ctx.nodes("runtime").len(), 3);
}

#[rstest]
#[tokio::test]
async fn scale_down_destroys_newest_first(ctx: Ctx) {
    ctx.scale(&[("runtime", 4)]).await.expect("up");
    let outcome = ctx.scale(&[("runtime", 1)]).await.expect("down");
    assert_eq!(outcome.layer_count(&runtime()), 1);
    assert_eq!(ctx.harness.mock.destroy_calls(), ["mock-4", "mock-3", "mock-2"]);
    let remaining = ctx.nodes("runtime");
    assert!(
        remaining
            .iter()
            .all(|node| node.external_id.as_deref() == Some("mock-1"))
    );
}

#[rstest]
#[tokio::test]
async fn create_failure_aborts_further_creates_and_reports_achieved(ctx: Ctx) {
    ctx.harness.mock.fail_creates_after(2);
    let outcome = ctx.scale(&[("runtime", 5)]).await.expect("scale");
    assert!(outcome.is_partial());
    assert_eq!(outcome.layer_count(&runtime()), 2);
    assert_eq!(ctx.nodes("runtime").len(), 2);
    assert!(
        outcome
            .failures
            .iter()
            .all(|failure| failure.action == NodeAction::Create)
    );
    assert_eq!(outcome.release, 1);
    let formation = ctx
        .harness
        .platform
        .get_formation(&ctx.formation)
        .expect("formation");
    assert_eq!(formation.layers.get(&runtime()), Some(5));
}

#[rstest]
#[tokio::test]
async fn destroy_failures_are_collected_independently(ctx: Ctx) {
    ctx.scale(&[("runtime", 3)]).await.expect("up");
    ctx.harness.mock.fail_destroy_of("mock-3");
    let outcome = ctx.scale(&[("runtime", 0)]).await.expect("down");
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.layer_count(&runtime()), 1);
    let survivors = ctx.nodes("runtime");
    assert_eq!(survivors.len(), 1);
    assert!(survivors.iter().all(|node| node.state == NodeState::Up));
    assert_eq!(ctx.harness.mock.destroy_calls().len(), 3);

    ctx.harness.mock.heal();
    let retried = ctx.scale(&[("runtime", 0)]).await.expect("retry");
    assert_eq!(retried.nodes, 0);
    assert!(!retried.is_partial());
}

#[rstest]
#[tokio::test]
async fn unknown_layer_rejects_without_side_effects(ctx: Ctx) {
    let err = ctx
        .scale(&[("runtime", 2), ("ghost", 1)])
        .await
        .expect_err("unknown layer");
    assert!(matches!(err, ReconcileError::UnknownLayer { .. }));
    assert!(err.is_client_error());
    assert!(ctx.harness.mock.created().is_empty());
    let formation = ctx
        .harness
        .platform
        .get_formation(&ctx.formation)
        .expect("formation");
    assert_eq!(formation.release, 0);
    assert!(formation.layers.is_empty());
}

#[rstest]
#[tokio::test]
async fn empty_credentials_fail_before_any_call(ctx: Ctx) {
    ctx.harness
        .platform
        .patch_provider(
            &FIXTURE_ID.into(),
            ProviderPatch {
                creds: Some(Credentials::default()),
            },
        )
        .expect("patch");
    let err = ctx.scale(&[("runtime", 1)]).await.expect_err("no creds");
    assert!(matches!(err, ReconcileError::MissingCredentials { .. }));
    assert!(err.is_client_error());
    assert!(ctx.nodes("runtime").is_empty());
}

#[rstest]
#[tokio::test]
async fn unknown_formation_is_a_client_error(ctx: Ctx) {
    let desired = DesiredScale::from_pairs([("runtime", 1)]).expect("scale");
    let err = ctx
        .reconciler()
        .reconcile(&FormationId::from("ghost"), &desired)
        .await
        .expect_err("unknown formation");
    assert!(matches!(err, ReconcileError::UnknownFormation(_)));
}

#[rstest]
#[tokio::test]
async fn in_flight_calls_respect_the_concurrency_bound() {
    let mock = MockProvider::new().with_delay(Duration::from_millis(5));
    let ctx = Ctx::seed(Harness::with_mock(mock).expect("harness").with_concurrency(3));
    ctx.scale(&[("proxy", 4), ("runtime", 6)]).await.expect("up");
    let peak = ctx.harness.mock.peak_in_flight();
    assert!(peak <= 3, "peak in flight was {peak}");
    assert!(peak >= 2, "calls should overlap, peak was {peak}");
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_passes_on_one_formation_serialise() {
    let mock = MockProvider::new().with_delay(Duration::from_millis(2));
    let ctx = Ctx::seed(Harness::with_mock(mock).expect("harness"));
    let (first, second) = tokio::join!(ctx.scale(&[("runtime", 3)]), ctx.scale(&[("runtime", 3)]));
    assert_eq!(first.expect("first").nodes, 3);
    assert_eq!(second.expect("second").nodes, 3);
    assert_eq!(ctx.harness.mock.created().len(), 3);
    assert_eq!(ctx.nodes("runtime").len(), 3);
}

#[rstest]
#[tokio::test]
async fn stale_requested_records_are_pruned(ctx: Ctx) {
    let store = ctx.harness.platform.store();
    store
        .insert_node(NewNode {
            formation: ctx.formation.clone(),
            layer: runtime(),
        })
        .expect("stale record");
    let outcome = ctx.scale(&[("runtime", 2)]).await.expect("scale");
    assert_eq!(outcome.layer_count(&runtime()), 2);
    assert_eq!(ctx.nodes("runtime").len(), 2);
    assert_eq!(ctx.harness.mock.created().len(), 2);
}

#[derive(Clone, Default)]
struct LogBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

impl LogBuffer {
    fn contents(&self) -> String {
        let bytes = self.0.lock().expect("log buffer").clone();
        String::from_utf8(bytes).expect("utf8 logs")
    }
}

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().expect("log buffer").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[rstest]
#[tokio::test]
async fn pruned_records_are_logged_with_their_provider_name(ctx: Ctx) {
    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .finish();
    let _default = tracing::subscriber::set_default(subscriber);

    let stale = ctx
        .harness
        .platform
        .store()
        .insert_node(NewNode {
            formation: ctx.formation.clone(),
            layer: runtime(),
        })
        .expect("stale record");
    ctx.scale(&[("runtime", 1)]).await.expect("scale");

    let rendered = logs.contents();
    let name = format!("{}-runtime-{}", ctx.formation, stale.sequence);
    assert!(rendered.contains("WARN"), "missing warning in {rendered:?}");
    assert!(rendered.contains(&name), "missing {name} in {rendered:?}");
    assert!(ctx.nodes("runtime").iter().all(|node| node.id != stale.id));
}

#[rstest]
#[tokio::test]
async fn interrupted_destroys_are_settled_against_the_provider(ctx: Ctx) {
    ctx.scale(&[("runtime", 2)]).await.expect("up");
    let store = ctx.harness.platform.store();
    let mut nodes = ctx.nodes("runtime");
    for node in &mut nodes {
        node.state = NodeState::Destroying;
        store.update_node(node).expect("mark destroying");
    }
    ctx.harness
        .mock
        .destroy_node("mock-2")
        .await
        .expect("out-of-band destroy");

    let outcome = ctx.scale(&[("runtime", 1)]).await.expect("settle");
    assert_eq!(outcome.layer_count(&runtime()), 1);
    let remaining = ctx.nodes("runtime");
    assert_eq!(remaining.len(), 1);
    assert!(remaining.iter().all(|node| node.state == NodeState::Up));
}

#[rstest]
#[tokio::test]
async fn teardown_destroys_every_node(ctx: Ctx) {
    ctx.scale(&[("proxy", 1), ("runtime", 2)]).await.expect("up");
    ctx.reconciler()
        .teardown(&ctx.formation)
        .await
        .expect("teardown");
    assert!(ctx.nodes("proxy").is_empty());
    assert!(ctx.nodes("runtime").is_empty());
    assert_eq!(ctx.harness.mock.live_count(), 0);
    assert_eq!(
        ctx.harness
            .platform
            .store()
            .list_layers(&ctx.formation)
            .expect("layers")
            .len(),
        2
    );
}

#[rstest]
#[tokio::test]
async fn teardown_reports_nodes_left_behind(ctx: Ctx) {
    ctx.scale(&[("runtime", 2)]).await.expect("up");
    ctx.harness.mock.fail_destroy_of("mock-1");
    let err = ctx
        .reconciler()
        .teardown(&ctx.formation)
        .await
        .expect_err("one destroy fails");
    assert!(matches!(
        err,
        ReconcileError::TeardownIncomplete { remaining: 1, .. }
    ));
    assert!(!err.is_client_error());
}
