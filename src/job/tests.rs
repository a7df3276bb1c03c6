//! Unit tests for job tracking.

use super::*;
use crate::instance::InstanceResponse;
use crate::test_support::{ScriptedTransport, logged_in_session, vm_inventory};
use rstest::rstest;
use serde_json::json;

const JOB: &str = "job-0001";

async fn accepted(transport: &ScriptedTransport) -> (SessionHandle, AsyncJob) {
    let session = logged_in_session(transport).await;
    transport.push_accepted(JOB);
    let response = session
        .authenticated_request(Method::POST, "/zstack/v1/vm-instances", None)
        .await
        .expect("submit should reach the transport");
    let job = AsyncJob::from_response(&session, response);
    (session, job)
}

fn polls(transport: &ScriptedTransport) -> usize {
    transport
        .request_lines()
        .iter()
        .filter(|line| line.as_str() == "GET /zstack/v1/api-jobs/job-0001")
        .count()
}

#[rstest]
#[case::zero(Duration::ZERO, DEFAULT_WAIT)]
#[case::shorter(Duration::from_secs(60), Duration::from_secs(60))]
#[case::longer(Duration::from_secs(600), DEFAULT_WAIT)]
fn effective_wait_caps_at_default(#[case] requested: Duration, #[case] expected: Duration) {
    assert_eq!(JobTracker::new().effective_wait(requested), expected);
}

#[rstest]
#[case::pending(StatusCode::ACCEPTED, json!({ "location": "http://h/zstack/v1/api-jobs/j" }), JobOutcome::Pending)]
#[case::pending_without_location(StatusCode::ACCEPTED, json!({}), JobOutcome::Pending)]
#[case::succeeded(StatusCode::OK, json!({ "inventory": {} }), JobOutcome::Succeeded(br#"{"inventory":{}}"#.to_vec()))]
#[case::error_on_2xx(
    StatusCode::OK,
    json!({ "error": { "code": "SYS.1000", "description": "boom", "details": "" } }),
    JobOutcome::Failed { code: String::from("SYS.1000"), message: String::from("boom") }
)]
#[case::status_only(
    StatusCode::SERVICE_UNAVAILABLE,
    json!("unavailable"),
    JobOutcome::Failed { code: String::from("503"), message: String::from("\"unavailable\"") }
)]
fn classify_distinguishes_outcomes(
    #[case] status: StatusCode,
    #[case] body: serde_json::Value,
    #[case] expected: JobOutcome,
) {
    let outcome = JobOutcome::classify(&HttpResponse::json(status, &body));
    assert_eq!(outcome, expected);
}

#[rstest]
fn empty_error_object_is_not_a_failure() {
    let response = HttpResponse::json(StatusCode::OK, &json!({ "error": {} }));
    assert!(matches!(JobOutcome::classify(&response), JobOutcome::Succeeded(_)));
    assert!(JobOutcome::classify(&response).is_terminal());
}

#[rstest]
#[case("http://h/zstack/v1/api-jobs/abc", Some("abc"))]
#[case("http://h/zstack/v1/api-jobs/abc/", Some("abc"))]
#[case("", None)]
fn job_uuid_is_last_location_segment(#[case] location: &str, #[case] expected: Option<&str>) {
    assert_eq!(job_uuid_from_location(location).as_deref(), expected);
}

#[tokio::test]
async fn submit_without_location_is_completed() {
    let transport = ScriptedTransport::new();
    let session = logged_in_session(&transport).await;
    let response = HttpResponse::json(StatusCode::ACCEPTED, &json!({}));

    let job = AsyncJob::from_response(&session, response);

    assert!(matches!(job, AsyncJob::Completed(_)));
    assert_eq!(job.job_uuid(), None);
}

#[tokio::test(start_paused = true)]
async fn synchronous_result_is_decoded_without_polling() {
    let transport = ScriptedTransport::new();
    let session = logged_in_session(&transport).await;
    let response = HttpResponse::json(
        StatusCode::OK,
        &json!({ "inventory": vm_inventory("vm-1", "Running", &[]) }),
    );
    let job = AsyncJob::from_response(&session, response);
    let started = Instant::now();

    let decoded: InstanceResponse = JobTracker::new()
        .resolve(job, Duration::ZERO)
        .await
        .expect("synchronous result should decode");

    assert_eq!(decoded.inventory.map(|vm| vm.state).as_deref(), Some("Running"));
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn pending_job_is_polled_at_fixed_interval() {
    let transport = ScriptedTransport::new();
    let (_session, job) = accepted(&transport).await;
    transport.push_pending(JOB);
    transport.push_inventory(&vm_inventory("vm-1", "Stopped", &[]));
    let started = Instant::now();

    let decoded: InstanceResponse = JobTracker::new()
        .resolve(job, Duration::from_secs(60))
        .await
        .expect("job should succeed");

    assert_eq!(decoded.inventory.map(|vm| vm.uuid).as_deref(), Some("vm-1"));
    assert_eq!(polls(&transport), 2);
    assert_eq!(started.elapsed(), POLL_INTERVAL * 2);
}

#[rstest]
fn bodyless_accepted_status_is_pending() {
    let response = HttpResponse {
        status: StatusCode::ACCEPTED,
        body: Vec::new(),
    };
    assert_eq!(JobOutcome::classify(&response), JobOutcome::Pending);
}

#[tokio::test(start_paused = true)]
async fn bodyless_accepted_status_keeps_polling() {
    let transport = ScriptedTransport::new();
    let (_session, job) = accepted(&transport).await;
    transport.push_raw(StatusCode::ACCEPTED, "");
    transport.push_inventory(&vm_inventory("vm-1", "Stopped", &[]));

    let decoded: InstanceResponse = JobTracker::new()
        .resolve(job, Duration::from_secs(60))
        .await
        .expect("job should succeed after the bodyless 202");

    assert_eq!(decoded.inventory.map(|vm| vm.uuid).as_deref(), Some("vm-1"));
    assert_eq!(polls(&transport), 2);
}

#[tokio::test(start_paused = true)]
async fn short_bound_times_out_without_overshooting() {
    let transport = ScriptedTransport::new();
    let (_session, job) = accepted(&transport).await;
    for _ in 0..5 {
        transport.push_pending(JOB);
    }
    let started = Instant::now();

    let err = JobTracker::new()
        .resolve::<InstanceResponse>(job, Duration::from_secs(12))
        .await
        .expect_err("job should time out");

    assert!(matches!(err, ZstackError::Timeout { .. }));
    assert_eq!(polls(&transport), 2);
    assert!(started.elapsed() <= Duration::from_secs(12));
}

#[tokio::test(start_paused = true)]
async fn job_that_never_finishes_times_out_at_bound() {
    let transport = ScriptedTransport::new();
    let (_session, job) = accepted(&transport).await;
    for _ in 0..20 {
        transport.push_pending(JOB);
    }
    let started = Instant::now();

    let err = JobTracker::new()
        .resolve::<InstanceResponse>(job, Duration::from_secs(60))
        .await
        .expect_err("job should time out");

    assert_eq!(
        err,
        ZstackError::Timeout {
            job_uuid: JOB.to_owned(),
            waited: Duration::from_secs(60),
        }
    );
    // 12 polls land at 5s..=60s; a 13th would fall past the bound.
    assert_eq!(polls(&transport), 12);
    assert_eq!(started.elapsed(), Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn failed_job_reports_provider_code_and_message() {
    let transport = ScriptedTransport::new();
    let (_session, job) = accepted(&transport).await;
    transport.push_json(
        StatusCode::OK,
        &json!({ "error": { "code": "SYS.1006", "description": "operation failed", "details": "host busy" } }),
    );

    let err = JobTracker::new()
        .resolve::<InstanceResponse>(job, Duration::ZERO)
        .await
        .expect_err("job should fail");

    assert_eq!(
        err,
        ZstackError::RemoteOperation {
            code: String::from("SYS.1006"),
            message: String::from("operation failed host busy"),
        }
    );
    assert_eq!(polls(&transport), 1);
}

#[tokio::test(start_paused = true)]
async fn undecodable_terminal_payload_is_protocol_error() {
    let transport = ScriptedTransport::new();
    let (_session, job) = accepted(&transport).await;
    transport.push_raw(StatusCode::OK, "not json");

    let err = JobTracker::new()
        .resolve::<InstanceResponse>(job, Duration::ZERO)
        .await
        .expect_err("payload should not decode");

    assert!(matches!(err, ZstackError::Protocol { .. }), "unexpected error: {err:?}");
}

#[tokio::test(start_paused = true)]
async fn transport_failure_while_polling_is_not_retried() {
    let transport = ScriptedTransport::new();
    let (_session, job) = accepted(&transport).await;
    transport.push_transport_error("connection reset");
    transport.push_inventory(&vm_inventory("vm-1", "Running", &[]));

    let err = JobTracker::new()
        .resolve::<InstanceResponse>(job, Duration::ZERO)
        .await
        .expect_err("transport failure should surface");

    assert!(matches!(err, ZstackError::Transport { .. }));
    assert_eq!(transport.remaining(), 1);
}

#[tokio::test(start_paused = true)]
async fn bodyless_success_decodes_as_empty_response() {
    let transport = ScriptedTransport::new();
    let (_session, job) = accepted(&transport).await;
    transport.push_raw(StatusCode::OK, "");

    let decoded: InstanceResponse = JobTracker::new()
        .resolve(job, Duration::ZERO)
        .await
        .expect("empty body should decode");

    assert_eq!(decoded.inventory, None);
}
