//! HTTP transport seam used by the session client.
//!
//! The session layer only needs a single request/response exchange. Keeping
//! that behind [`Transport`] lets tests script the control plane without a
//! network, while [`ReqwestTransport`] performs real calls.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde_json::Value;

use crate::error::ZstackError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Future returned by [`Transport::send`].
pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<HttpResponse, ZstackError>> + Send + 'a>>;

/// Outbound request handed to a [`Transport`].
#[derive(Clone, Debug, PartialEq)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute URL (`{endpoint}{path}`).
    pub url: String,
    /// Value for the `Authorization` header, when the call is authenticated.
    pub authorization: Option<String>,
    /// JSON body, if any.
    pub body: Option<Value>,
}

/// Raw response returned by a [`Transport`]; interpretation is left to the
/// caller because a 2xx means different things on different endpoints.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HttpResponse {
    /// Status code returned by the server.
    pub status: StatusCode,
    /// Undecoded response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Builds a response from a status and a JSON value.
    #[must_use]
    pub fn json(status: StatusCode, body: &Value) -> Self {
        Self {
            status,
            body: body.to_string().into_bytes(),
        }
    }

    /// Returns the body as lossy UTF-8 text for error messages.
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Performs one HTTP exchange.
pub trait Transport: Send + Sync {
    /// Sends `request` and returns the raw response.
    ///
    /// # Errors
    ///
    /// Returns [`ZstackError::Transport`] when the exchange cannot complete.
    /// Non-2xx statuses are not errors at this layer.
    fn send(&self, request: HttpRequest) -> TransportFuture<'_>;
}

/// [`Transport`] backed by a shared `reqwest` client.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport with the default request timeout.
    #[must_use]
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: HttpRequest) -> TransportFuture<'_> {
        Box::pin(async move {
            let context = format!("{} {}", request.method, request.url);
            let mut builder = self.client.request(request.method, &request.url);
            if let Some(authorization) = request.authorization {
                builder = builder.header(reqwest::header::AUTHORIZATION, authorization);
            }
            if let Some(body) = request.body {
                builder = builder.json(&body);
            }

            let response = builder
                .send()
                .await
                .map_err(|err| ZstackError::transport(context.as_str(), err))?;
            let status = response.status();
            let body = response
                .bytes()
                .await
                .map_err(|err| ZstackError::transport(context.as_str(), err))?;

            Ok(HttpResponse {
                status,
                body: body.to_vec(),
            })
        })
    }
}
