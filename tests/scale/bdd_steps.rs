//! BDD step definitions for scaling formation layers.

use rstest_bdd_macros::{given, then, when};
use strata::model::{Credentials, LayerId, ProviderPatch};
use strata::test_support::FIXTURE_ID;

use super::test_helpers::{ScaleContext, ScaleResult, ScaleTestError};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Setup(#[from] ScaleTestError),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn outcome(scale_context: &ScaleContext) -> Result<&strata::ScaleOutcome, StepError> {
    match &scale_context.result {
        Some(ScaleResult::Applied(outcome)) => Ok(outcome),
        Some(ScaleResult::Rejected { message, .. }) => Err(StepError::Assertion(format!(
            "expected an applied scale, got rejection: {message}"
        ))),
        None => Err(StepError::Assertion(String::from("no scale was requested"))),
    }
}

fn expect_eq<T>(what: &str, actual: T, expected: T) -> Result<(), StepError>
where
    T: PartialEq + std::fmt::Debug,
{
    if actual == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "{what}: expected {expected:?}, got {actual:?}"
        )))
    }
}

#[given("a formation with proxy and runtime layers")]
fn formation_with_layers(scale_context: ScaleContext) -> Result<ScaleContext, StepError> {
    let formation = scale_context
        .harness
        .formation_with_layers()
        .map_err(|err| ScaleTestError::Fixture(err.to_string()))?;
    Ok(ScaleContext {
        formation: Some(formation),
        ..scale_context
    })
}

#[given("the provider fails after \"{count}\" creates")]
fn provider_fails_after(scale_context: ScaleContext, count: usize) -> ScaleContext {
    scale_context.harness.mock.fail_creates_after(count);
    scale_context
}

#[given("the provider credentials are cleared")]
fn credentials_cleared(scale_context: ScaleContext) -> Result<ScaleContext, StepError> {
    scale_context
        .harness
        .platform
        .patch_provider(
            &FIXTURE_ID.into(),
            ProviderPatch {
                creds: Some(Credentials::default()),
            },
        )
        .map_err(|err| ScaleTestError::Fixture(err.to_string()))?;
    Ok(scale_context)
}

#[when("I scale the formation to \"{targets}\"")]
fn scale_formation(
    scale_context: ScaleContext,
    targets: String,
) -> Result<ScaleContext, StepError> {
    Ok(scale_context.scale(&targets)?)
}

#[then("the scale result is complete")]
fn result_complete(scale_context: &ScaleContext) -> Result<(), StepError> {
    let applied = outcome(scale_context)?;
    if applied.is_partial() {
        return Err(StepError::Assertion(format!(
            "unexpected failures: {:?}",
            applied.failures
        )));
    }
    Ok(())
}

#[then("the scale result is partial")]
fn result_partial(scale_context: &ScaleContext) -> Result<(), StepError> {
    expect_eq("partial", outcome(scale_context)?.is_partial(), true)
}

#[then("the formation has \"{count}\" nodes")]
fn formation_nodes(scale_context: &ScaleContext, count: usize) -> Result<(), StepError> {
    let formation = scale_context
        .formation
        .as_ref()
        .ok_or_else(|| StepError::Assertion(String::from("formation not created")))?;
    let nodes = scale_context
        .harness
        .platform
        .list_nodes(formation)
        .map_err(|err| StepError::Assertion(err.to_string()))?;
    expect_eq("node records", nodes.len(), count)
}

#[then("\"{count}\" nodes serve as proxies")]
fn proxy_nodes(scale_context: &ScaleContext, count: usize) -> Result<(), StepError> {
    expect_eq("proxy nodes", outcome(scale_context)?.proxy, count)
}

#[then("the formation release is \"{release}\"")]
fn formation_release(scale_context: &ScaleContext, release: u64) -> Result<(), StepError> {
    expect_eq("release", outcome(scale_context)?.release, release)
}

#[then("layer \"{layer}\" has \"{count}\" nodes")]
fn layer_nodes(
    scale_context: &ScaleContext,
    layer: String,
    count: usize,
) -> Result<(), StepError> {
    let achieved = outcome(scale_context)?.layer_count(&LayerId::from(layer.as_str()));
    expect_eq("layer nodes", achieved, count)
}

#[then("the provider created \"{count}\" nodes")]
fn provider_created(scale_context: &ScaleContext, count: usize) -> Result<(), StepError> {
    expect_eq("provider creates", scale_context.harness.mock.created().len(), count)
}

#[then("the provider destroyed \"{ids}\"")]
fn provider_destroyed(scale_context: &ScaleContext, ids: String) -> Result<(), StepError> {
    let expected: Vec<String> = ids.split(',').map(str::to_owned).collect();
    expect_eq("destroy order", scale_context.harness.mock.destroy_calls(), expected)
}

#[then("the request is rejected as a client error")]
fn rejected_as_client_error(scale_context: &ScaleContext) -> Result<(), StepError> {
    match &scale_context.result {
        Some(ScaleResult::Rejected { client: true, .. }) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected a client error, got {other:?}"
        ))),
    }
}
