//! Asynchronous job tracking.
//!
//! Mutating `ZStack` calls answer `202 Accepted` with a `location` pointing
//! at a job. The real result only exists once that job is terminal, so
//! callers wrap the raw response with [`AsyncJob::from_response`] and later
//! [`JobTracker::resolve`] it into the payload they expect.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tokio::time::{Instant, sleep};
use tracing::{debug, info};

use crate::envelope::{Envelope, failure_from};
use crate::error::ZstackError;
use crate::session::SessionHandle;
use crate::transport::HttpResponse;

/// Interval between two job status checks.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Bound applied when a caller passes a zero wait.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(120);

const JOB_PATH: &str = "/zstack/v1/api-jobs";

/// Handle to an accepted job. Consumed by [`JobTracker::resolve`].
#[derive(Clone)]
pub struct AsyncJobHandle {
    job_uuid: String,
    session: SessionHandle,
}

impl AsyncJobHandle {
    /// Returns the provider's identifier for the job.
    #[must_use]
    pub fn job_uuid(&self) -> &str {
        &self.job_uuid
    }
}

impl fmt::Debug for AsyncJobHandle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AsyncJobHandle")
            .field("job_uuid", &self.job_uuid)
            .field("endpoint", &self.session.endpoint())
            .finish()
    }
}

/// Result of submitting a mutating call.
#[derive(Debug)]
pub enum AsyncJob {
    /// The server answered synchronously; no polling is needed.
    Completed(HttpResponse),
    /// The server accepted a job that must be polled.
    Accepted(AsyncJobHandle),
}

impl AsyncJob {
    /// Wraps the response of a mutating call.
    ///
    /// A `202` carrying a `location` becomes [`AsyncJob::Accepted`]; any other
    /// response is treated as already complete.
    #[must_use]
    pub fn from_response(session: &SessionHandle, response: HttpResponse) -> Self {
        if response.status != StatusCode::ACCEPTED {
            return Self::Completed(response);
        }
        let job_uuid = Envelope::parse(&response)
            .location
            .as_deref()
            .and_then(job_uuid_from_location);
        match job_uuid {
            Some(uuid) => {
                debug!(job_uuid = %uuid, "job accepted");
                Self::Accepted(AsyncJobHandle {
                    job_uuid: uuid,
                    session: Arc::clone(session),
                })
            }
            None => Self::Completed(response),
        }
    }

    /// Returns the job identifier when the call was accepted asynchronously.
    #[must_use]
    pub fn job_uuid(&self) -> Option<&str> {
        match self {
            Self::Completed(_) => None,
            Self::Accepted(handle) => Some(handle.job_uuid()),
        }
    }
}

/// Classification of one job status observation.
#[derive(Debug, Eq, PartialEq)]
pub enum JobOutcome {
    /// The job has not finished yet.
    Pending,
    /// The job finished; the payload is still undecoded.
    Succeeded(Vec<u8>),
    /// The job finished with a provider reported error.
    Failed {
        /// Provider error code.
        code: String,
        /// Provider error description.
        message: String,
    },
}

impl JobOutcome {
    /// Classifies a response from a job status (or synchronous) call.
    ///
    /// Any `202` without an error object is pending, whatever its body. A 2xx
    /// status is necessary but not sufficient for success: an error object in
    /// the body always marks the job as failed.
    #[must_use]
    pub fn classify(response: &HttpResponse) -> Self {
        let envelope = Envelope::parse(response);
        if response.status == StatusCode::ACCEPTED && envelope.error.is_none() {
            return Self::Pending;
        }
        if response.status.is_success() && envelope.error.is_none() {
            return Self::Succeeded(response.body.clone());
        }

        match failure_from(response, envelope) {
            ZstackError::RemoteOperation { code, message } => Self::Failed { code, message },
            other => Self::Failed {
                code: response.status.as_u16().to_string(),
                message: other.to_string(),
            },
        }
    }

    /// Returns `true` for [`JobOutcome::Succeeded`] and [`JobOutcome::Failed`].
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Polls accepted jobs until they reach a terminal state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct JobTracker {
    poll_interval: Duration,
    default_wait: Duration,
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl JobTracker {
    /// Creates a tracker using [`POLL_INTERVAL`] and [`DEFAULT_WAIT`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
            default_wait: DEFAULT_WAIT,
        }
    }

    /// Overrides the polling interval.
    ///
    /// This is primarily used by tests to keep polling scenarios fast.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Returns the configured polling interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Returns the bound actually applied for a requested wait: the default
    /// when `requested` is zero, otherwise the smaller of the two.
    #[must_use]
    pub fn effective_wait(&self, requested: Duration) -> Duration {
        if requested.is_zero() {
            self.default_wait
        } else {
            requested.min(self.default_wait)
        }
    }

    /// Blocks until `job` is terminal and decodes its payload into `T`.
    ///
    /// Synchronous results are decoded straight away without polling.
    ///
    /// # Errors
    ///
    /// - [`ZstackError::RemoteOperation`] when the job reports failure.
    /// - [`ZstackError::Timeout`] when the job is still pending after the
    ///   effective wait.
    /// - [`ZstackError::Protocol`] when the terminal payload cannot be decoded.
    /// - [`ZstackError::Transport`] when a status call cannot be completed.
    pub async fn resolve<T: DeserializeOwned>(
        &self,
        job: AsyncJob,
        max_wait: Duration,
    ) -> Result<T, ZstackError> {
        match job {
            AsyncJob::Completed(response) => match JobOutcome::classify(&response) {
                JobOutcome::Pending | JobOutcome::Succeeded(_) => {
                    decode("synchronous response", &response.body)
                }
                JobOutcome::Failed { code, message } => {
                    Err(ZstackError::RemoteOperation { code, message })
                }
            },
            AsyncJob::Accepted(handle) => {
                let payload = self.poll_until_terminal(&handle, max_wait).await?;
                decode(&format!("job {}", handle.job_uuid), &payload)
            }
        }
    }

    async fn poll_until_terminal(
        &self,
        handle: &AsyncJobHandle,
        max_wait: Duration,
    ) -> Result<Vec<u8>, ZstackError> {
        let waited = self.effective_wait(max_wait);
        let deadline = Instant::now() + waited;
        let path = format!("{JOB_PATH}/{}", handle.job_uuid);
        let mut attempt: u32 = 0;

        loop {
            // The next status check would land past the bound.
            if Instant::now() + self.poll_interval > deadline {
                return Err(ZstackError::Timeout {
                    job_uuid: handle.job_uuid.clone(),
                    waited,
                });
            }
            sleep(self.poll_interval).await;

            attempt += 1;
            let response = handle
                .session
                .authenticated_request(Method::GET, &path, None)
                .await?;
            match JobOutcome::classify(&response) {
                JobOutcome::Pending => {
                    debug!(job_uuid = %handle.job_uuid, attempt, "job still pending");
                }
                JobOutcome::Succeeded(payload) => {
                    info!(job_uuid = %handle.job_uuid, attempt, "job succeeded");
                    return Ok(payload);
                }
                JobOutcome::Failed { code, message } => {
                    info!(job_uuid = %handle.job_uuid, attempt, %code, "job failed");
                    return Err(ZstackError::RemoteOperation { code, message });
                }
            }
        }
    }
}

fn job_uuid_from_location(location: &str) -> Option<String> {
    location
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(str::to_owned)
}

fn decode<T: DeserializeOwned>(context: &str, payload: &[u8]) -> Result<T, ZstackError> {
    // Bodyless successes decode as an empty object.
    let body: &[u8] = if payload.iter().all(u8::is_ascii_whitespace) {
        b"{}"
    } else {
        payload
    };
    serde_json::from_slice(body).map_err(|err| ZstackError::protocol(context, err))
}

#[cfg(test)]
mod tests;
