//! BDD scenarios for the instance lifecycle.

use rstest_bdd_macros::scenario;

use super::test_helpers::{LifecycleContext, lifecycle_context};

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Create an instance and record its identifier"
)]
fn scenario_create(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Stop a running instance"
)]
fn scenario_stop(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Stop that races with another start"
)]
fn scenario_stop_race(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Start leaves the instance stopped"
)]
fn scenario_start_unexpected_state(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Remove fails while the instance is busy"
)]
fn scenario_remove_busy(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Instance without a network interface reports empty endpoints"
)]
fn scenario_no_network(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}
