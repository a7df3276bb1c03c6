//! BDD step definitions for the instance lifecycle.

use reqwest::StatusCode;
use rstest_bdd_macros::{given, then, when};
use serde_json::json;
use zstack_machine::test_support::vm_inventory;
use zstack_machine::{DriverError, LifecyclePhase, ZstackError};

use super::test_helpers::{
    INSTANCE_UUID, LifecycleContext, LifecycleOutcome, LifecycleTestError, block_on,
};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Setup(#[from] LifecycleTestError),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn parse_phase(raw: &str) -> Result<LifecyclePhase, StepError> {
    match raw {
        "Running" => Ok(LifecyclePhase::Running),
        "Stopped" => Ok(LifecyclePhase::Stopped),
        "Removed" => Ok(LifecyclePhase::Removed),
        "Failed" => Ok(LifecyclePhase::Failed),
        other => Err(StepError::Assertion(format!("unknown phase {other}"))),
    }
}

#[given("an uncreated driver")]
fn uncreated_driver(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let driver = block_on(lifecycle_context.build_driver())??;
    lifecycle_context.install_driver(driver);
    Ok(())
}

#[given("a driver attached to a \"{state}\" instance")]
fn attached_driver(lifecycle_context: &LifecycleContext, state: String) -> Result<(), StepError> {
    let driver = block_on(async {
        let mut driver = lifecycle_context.build_driver().await?;
        lifecycle_context
            .transport
            .push_inventories(&[vm_inventory(INSTANCE_UUID, &state, &["10.0.0.5"])]);
        driver
            .attach(INSTANCE_UUID)
            .await
            .map_err(LifecycleTestError::from)?;
        Ok::<_, LifecycleTestError>(driver)
    })??;
    lifecycle_context.install_driver(driver);
    Ok(())
}

#[given("the create job returns instance \"{uuid}\"")]
fn create_job_returns(lifecycle_context: &LifecycleContext, uuid: String) {
    let transport = &lifecycle_context.transport;
    transport.push_accepted("job-create");
    transport.push_inventory(&vm_inventory(&uuid, "Running", &["10.0.0.7"]));
    transport.push_inventories(&[vm_inventory(&uuid, "Running", &["10.0.0.7"])]);
}

#[given("the next job leaves the instance \"{state}\"")]
fn next_job_leaves(lifecycle_context: &LifecycleContext, state: String) {
    let transport = &lifecycle_context.transport;
    transport.push_accepted("job-next");
    transport.push_inventory(&vm_inventory(INSTANCE_UUID, &state, &["10.0.0.5"]));
}

#[given("the next job is pending once, then leaves the instance \"{state}\"")]
fn next_job_pending_then_leaves(lifecycle_context: &LifecycleContext, state: String) {
    let transport = &lifecycle_context.transport;
    transport.push_accepted("job-next");
    transport.push_pending("job-next");
    transport.push_inventory(&vm_inventory(INSTANCE_UUID, &state, &["10.0.0.5"]));
}

#[given("the delete job succeeds")]
fn delete_job_succeeds(lifecycle_context: &LifecycleContext) {
    let transport = &lifecycle_context.transport;
    transport.push_accepted("job-delete");
    transport.push_json(StatusCode::OK, &json!({}));
}

#[given("the expunge job fails with code \"{code}\" and message \"{message}\"")]
fn expunge_job_fails(lifecycle_context: &LifecycleContext, code: String, message: String) {
    let transport = &lifecycle_context.transport;
    transport.push_accepted("job-expunge");
    transport.push_json(
        StatusCode::CONFLICT,
        &json!({ "error": { "code": code, "description": message, "details": "" } }),
    );
}

#[given("the instance has no network interface")]
fn no_network_interface(lifecycle_context: &LifecycleContext) {
    let transport = &lifecycle_context.transport;
    transport.push_inventories(&[vm_inventory(INSTANCE_UUID, "Running", &[])]);
    transport.push_inventories(&[vm_inventory(INSTANCE_UUID, "Running", &[])]);
}

fn run_operation(
    lifecycle_context: &LifecycleContext,
    operation: &str,
) -> Result<(), StepError> {
    let mut guard = lifecycle_context.driver();
    let driver = guard.as_mut().ok_or(LifecycleTestError::MissingDriver)?;
    let result = block_on(async {
        match operation {
            "create" => driver.create().await,
            "start" => driver.start().await,
            "stop" => driver.stop().await,
            _ => driver.remove().await,
        }
    })?;
    lifecycle_context.record(match result {
        Ok(()) => LifecycleOutcome::Succeeded,
        Err(err) => LifecycleOutcome::Failed(err),
    });
    Ok(())
}

#[when("I create the instance")]
fn create_instance(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    run_operation(lifecycle_context, "create")
}

#[when("I start the instance")]
fn start_instance(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    run_operation(lifecycle_context, "start")
}

#[when("I stop the instance")]
fn stop_instance(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    run_operation(lifecycle_context, "stop")
}

#[when("I remove the instance")]
fn remove_instance(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    run_operation(lifecycle_context, "remove")
}

#[when("I read the instance endpoints")]
fn read_endpoints(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let guard = lifecycle_context.driver();
    let driver = guard.as_ref().ok_or(LifecycleTestError::MissingDriver)?;
    let outcome = block_on(async {
        let ip = driver.ip().await?;
        let url = driver.url().await?;
        Ok::<_, DriverError>(LifecycleOutcome::Endpoints { ip, url })
    })?
    .unwrap_or_else(LifecycleOutcome::Failed);
    lifecycle_context.record(outcome);
    Ok(())
}

#[then("the operation succeeds")]
fn operation_succeeds(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    match &*lifecycle_context.outcome() {
        Some(LifecycleOutcome::Succeeded) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected success, got {other:?}"
        ))),
    }
}

#[then("the job status was checked \"{count}\" times")]
fn job_status_checked(lifecycle_context: &LifecycleContext, count: String) -> Result<(), StepError> {
    let expected: usize = count
        .parse()
        .map_err(|_| StepError::Assertion(format!("invalid poll count {count:?}")))?;
    let checks = lifecycle_context
        .transport
        .request_lines()
        .iter()
        .filter(|line| line.starts_with("GET /zstack/v1/api-jobs/"))
        .count();
    if checks == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {expected} job status checks, saw {checks}"
        )))
    }
}

#[then("the operation fails with a lifecycle error")]
fn fails_with_lifecycle(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    match &*lifecycle_context.outcome() {
        Some(LifecycleOutcome::Failed(err)) if err.is_lifecycle() => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected lifecycle error, got {other:?}"
        ))),
    }
}

#[then("the operation fails during \"{operation}\" with code \"{code}\" and message \"{message}\"")]
fn fails_during(
    lifecycle_context: &LifecycleContext,
    operation: String,
    code: String,
    message: String,
) -> Result<(), StepError> {
    let outcome = lifecycle_context.outcome();
    let Some(LifecycleOutcome::Failed(DriverError::Operation {
        operation: failed,
        source,
        ..
    })) = &*outcome
    else {
        return Err(StepError::Assertion(format!(
            "expected operation failure, got {outcome:?}"
        )));
    };
    let expected = ZstackError::RemoteOperation { code, message };
    if failed.as_str() == operation && *source == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {operation} failure {expected:?}, got {failed} {source:?}"
        )))
    }
}

#[then("the IP address and URL are empty")]
fn endpoints_empty(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    match &*lifecycle_context.outcome() {
        Some(LifecycleOutcome::Endpoints { ip, url }) if ip.is_empty() && url.is_empty() => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected empty endpoints, got {other:?}"
        ))),
    }
}

#[then("the instance UUID is \"{uuid}\"")]
fn instance_uuid_is(lifecycle_context: &LifecycleContext, uuid: String) -> Result<(), StepError> {
    let guard = lifecycle_context.driver();
    let driver = guard.as_ref().ok_or(LifecycleTestError::MissingDriver)?;
    if driver.instance_uuid() == Some(uuid.as_str()) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected instance {uuid}, got {:?}",
            driver.instance_uuid()
        )))
    }
}

#[then("the lifecycle phase is \"{phase}\"")]
fn phase_is(lifecycle_context: &LifecycleContext, phase: String) -> Result<(), StepError> {
    let expected = parse_phase(&phase)?;
    let guard = lifecycle_context.driver();
    let driver = guard.as_ref().ok_or(LifecycleTestError::MissingDriver)?;
    if driver.phase() == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected phase {expected:?}, got {:?}",
            driver.phase()
        )))
    }
}
