//! BDD scenarios for scaling formation layers.

use rstest_bdd_macros::scenario;

use super::test_helpers::{ScaleContext, scale_context};

#[scenario(path = "tests/features/scale.feature", name = "Scale layers up from zero")]
fn scenario_scale_up(scale_context: ScaleContext) {
    let _ = scale_context;
}

#[scenario(
    path = "tests/features/scale.feature",
    name = "Repeating a target changes nothing but the release"
)]
fn scenario_idempotent(scale_context: ScaleContext) {
    let _ = scale_context;
}

#[scenario(
    path = "tests/features/scale.feature",
    name = "Scale down removes the newest nodes first"
)]
fn scenario_scale_down_lifo(scale_context: ScaleContext) {
    let _ = scale_context;
}

#[scenario(
    path = "tests/features/scale.feature",
    name = "A provider failure stops further creates"
)]
fn scenario_create_abort(scale_context: ScaleContext) {
    let _ = scale_context;
}

#[scenario(
    path = "tests/features/scale.feature",
    name = "Unknown layers reject the whole request"
)]
fn scenario_unknown_layer(scale_context: ScaleContext) {
    let _ = scale_context;
}

#[scenario(
    path = "tests/features/scale.feature",
    name = "Empty provider credentials block scaling"
)]
fn scenario_missing_credentials(scale_context: ScaleContext) {
    let _ = scale_context;
}
