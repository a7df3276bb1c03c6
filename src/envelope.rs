//! Request and response envelopes shared by every `ZStack` endpoint.

use serde::{Deserialize, Serialize};

use crate::error::ZstackError;
use crate::transport::HttpResponse;

/// Tag lists that accompany every mutating request body.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tags {
    /// System tags interpreted by the provider (for example `staticIp::...`).
    pub system_tags: Vec<String>,
    /// Free-form user tags.
    pub user_tags: Vec<String>,
}

/// Error object embedded in provider responses.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub(crate) struct ApiError {
    #[serde(default)]
    pub(crate) code: String,
    #[serde(default)]
    pub(crate) description: String,
    #[serde(default)]
    pub(crate) details: String,
}

impl ApiError {
    fn is_empty(&self) -> bool {
        self.code.is_empty() && self.description.is_empty() && self.details.is_empty()
    }

    pub(crate) fn message(&self) -> String {
        format!("{} {}", self.description, self.details)
            .trim()
            .to_owned()
    }

    pub(crate) fn into_remote(self) -> ZstackError {
        let message = self.message();
        ZstackError::RemoteOperation {
            code: self.code,
            message,
        }
    }
}

/// The fields of a response body this crate inspects before decoding the
/// endpoint specific payload.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct Envelope {
    #[serde(default)]
    pub(crate) error: Option<ApiError>,
    #[serde(default)]
    pub(crate) location: Option<String>,
}

impl Envelope {
    /// Parses the envelope leniently: an empty or non-JSON body yields an
    /// empty envelope so the status code alone decides the outcome. An error
    /// object with no populated fields counts as absent.
    pub(crate) fn parse(response: &HttpResponse) -> Self {
        let parsed: Self = serde_json::from_slice(&response.body).unwrap_or_default();
        Self {
            error: parsed.error.filter(|err| !err.is_empty()),
            location: parsed.location,
        }
    }
}

/// Converts a response that is not a success into a remote error, preferring
/// the provider's error object over the raw status.
pub(crate) fn failure_from(response: &HttpResponse, envelope: Envelope) -> ZstackError {
    envelope.error.map_or_else(
        || ZstackError::RemoteOperation {
            code: response.status.as_u16().to_string(),
            message: response.body_text(),
        },
        ApiError::into_remote,
    )
}
