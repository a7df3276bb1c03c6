//! Error taxonomy shared by the session, job and instance layers.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while talking to the `ZStack` control plane.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ZstackError {
    /// Raised when the HTTP exchange itself cannot be completed.
    #[error("transport failure during {context}: {message}")]
    Transport {
        /// What the client was doing when the exchange failed.
        context: String,
        /// Message reported by the HTTP stack.
        message: String,
    },
    /// Raised when the login call is rejected.
    #[error("authentication failed: {message}")]
    Authentication {
        /// Provider supplied reason, or the unexpected HTTP status.
        message: String,
    },
    /// Raised when a reachable server returns a payload that cannot be decoded.
    #[error("malformed response during {context}: {message}")]
    Protocol {
        /// What the client was decoding.
        context: String,
        /// Decoder message.
        message: String,
    },
    /// Raised when the provider explicitly reports that an operation failed.
    #[error("remote operation failed with code {code}: {message}")]
    RemoteOperation {
        /// Provider error code (or the HTTP status when no code was sent).
        code: String,
        /// Provider error description and details.
        message: String,
    },
    /// Raised when an asynchronous job stays pending past its bound.
    #[error("job {job_uuid} still pending after {waited:?}")]
    Timeout {
        /// Identifier of the job being polled.
        job_uuid: String,
        /// Bound that was exceeded.
        waited: Duration,
    },
    /// Raised when a resource expected to exist is absent.
    #[error("{resource} {uuid} not found")]
    NotFound {
        /// Resource kind, for example `vm instance`.
        resource: String,
        /// Identifier that was queried.
        uuid: String,
    },
}

impl ZstackError {
    pub(crate) fn transport(context: impl Into<String>, err: impl ToString) -> Self {
        Self::Transport {
            context: context.into(),
            message: err.to_string(),
        }
    }

    pub(crate) fn protocol(context: impl Into<String>, err: impl ToString) -> Self {
        Self::Protocol {
            context: context.into(),
            message: err.to_string(),
        }
    }
}
