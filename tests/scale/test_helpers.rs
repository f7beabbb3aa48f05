//! Shared fixtures for scale BDD scenarios.

use std::sync::{Arc, LazyLock};

use rstest::fixture;
use strata::model::{DesiredScale, FormationId, ValidationError};
use strata::test_support::Harness;
use strata::{PlatformError, ScaleOutcome};
use thiserror::Error;
use tokio::runtime::Runtime;

static RUNTIME: LazyLock<Runtime> = LazyLock::new(|| {
    Runtime::new().unwrap_or_else(|err| panic!("tokio runtime should start for scenarios: {err}"))
});

/// Result of the most recent scale request.
#[derive(Clone, Debug)]
pub enum ScaleResult {
    Applied(ScaleOutcome),
    Rejected { client: bool, message: String },
}

#[derive(Clone, Debug)]
pub struct ScaleContext {
    pub harness: Arc<Harness>,
    pub formation: Option<FormationId>,
    pub result: Option<ScaleResult>,
}

#[derive(Clone, Debug, Error)]
pub enum ScaleTestError {
    #[error("fixture setup failed: {0}")]
    Fixture(String),
    #[error(transparent)]
    Target(#[from] ValidationError),
}

impl ScaleContext {
    /// Applies `targets` (`layer=count` pairs separated by commas).
    pub fn scale(self, targets: &str) -> Result<Self, ScaleTestError> {
        let formation = self
            .formation
            .clone()
            .ok_or_else(|| ScaleTestError::Fixture(String::from("formation not created")))?;
        let desired = parse_targets(targets)?;
        let harness = Arc::clone(&self.harness);
        let result =
            RUNTIME.block_on(async move { harness.platform.scale(&formation, &desired).await });
        Ok(Self {
            result: Some(classify(result)),
            ..self
        })
    }
}

fn classify(result: Result<ScaleOutcome, PlatformError>) -> ScaleResult {
    match result {
        Ok(outcome) => ScaleResult::Applied(outcome),
        Err(err) => ScaleResult::Rejected {
            client: err.is_client_error(),
            message: err.to_string(),
        },
    }
}

fn parse_targets(raw: &str) -> Result<DesiredScale, ScaleTestError> {
    let pairs = raw
        .split(',')
        .map(|pair| {
            let (layer, count) = pair
                .split_once('=')
                .ok_or_else(|| ScaleTestError::Fixture(format!("bad target {pair:?}")))?;
            let parsed = count
                .trim()
                .parse::<i64>()
                .map_err(|err| ScaleTestError::Fixture(format!("bad count {count:?}: {err}")))?;
            Ok((layer.trim().to_owned(), parsed))
        })
        .collect::<Result<Vec<_>, ScaleTestError>>()?;
    Ok(DesiredScale::from_pairs(pairs)?)
}

#[fixture]
pub fn scale_context_result() -> Result<ScaleContext, ScaleTestError> {
    let harness = Harness::seeded().map_err(|err| ScaleTestError::Fixture(err.to_string()))?;
    Ok(ScaleContext {
        harness: Arc::new(harness),
        formation: None,
        result: None,
    })
}

#[fixture]
pub fn scale_context(scale_context_result: Result<ScaleContext, ScaleTestError>) -> ScaleContext {
    scale_context_result
        .unwrap_or_else(|err| panic!("scale context fixture should initialise: {err}"))
}
