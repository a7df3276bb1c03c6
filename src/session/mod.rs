//! Session authentication against the `ZStack` REST API.
//!
//! A [`SessionClient`] owns the account credentials, logs in once, and signs
//! every later call with the issued session token. Resource clients share it
//! through a [`SessionHandle`] rather than holding their own copy.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha512};
use tracing::{debug, info, warn};

use crate::envelope::Envelope;
use crate::error::ZstackError;
use crate::transport::{HttpRequest, HttpResponse, Transport};

const LOGIN_PATH: &str = "/zstack/v1/accounts/login";
const SESSION_PATH: &str = "/zstack/v1/accounts/sessions";

/// Shared, reference-counted session used by every resource client.
pub type SessionHandle = Arc<SessionClient>;

/// Account name plus the SHA-512 digest of its password.
///
/// The plaintext password is hashed on construction and never retained.
#[derive(Clone, Eq, PartialEq)]
pub struct Credentials {
    account_name: String,
    password_digest: String,
}

impl Credentials {
    /// Hashes `password` and stores it alongside `account_name`.
    #[must_use]
    pub fn new(account_name: impl Into<String>, password: &str) -> Self {
        let digest = Sha512::digest(password.as_bytes());
        Self {
            account_name: account_name.into(),
            password_digest: hex::encode(digest),
        }
    }

    /// Returns the account name.
    #[must_use]
    pub fn account_name(&self) -> &str {
        &self.account_name
    }

    /// Returns the lowercase hex SHA-512 digest sent at login.
    #[must_use]
    pub fn password_digest(&self) -> &str {
        &self.password_digest
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Credentials")
            .field("account_name", &self.account_name)
            .field("password_digest", &"<redacted>")
            .finish()
    }
}

#[derive(Deserialize)]
struct LoginResponse {
    inventory: Option<SessionInventory>,
}

#[derive(Deserialize)]
struct SessionInventory {
    uuid: String,
}

/// Authenticated client for one `ZStack` endpoint.
pub struct SessionClient {
    endpoint: String,
    credentials: Credentials,
    transport: Arc<dyn Transport>,
    token: RwLock<Option<String>>,
}

impl fmt::Debug for SessionClient {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SessionClient")
            .field("endpoint", &self.endpoint)
            .field("credentials", &self.credentials)
            .field("authenticated", &self.is_authenticated())
            .finish_non_exhaustive()
    }
}

impl SessionClient {
    /// Creates an unauthenticated client. Call [`SessionClient::login`] (or
    /// use [`SessionClient::connect`]) before issuing requests.
    #[must_use]
    pub fn new(
        endpoint: impl Into<String>,
        credentials: Credentials,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let raw: String = endpoint.into();
        Self {
            endpoint: raw.trim_end_matches('/').to_owned(),
            credentials,
            transport,
            token: RwLock::new(None),
        }
    }

    /// Builds a client, logs in, and returns it as a shareable handle.
    ///
    /// # Errors
    ///
    /// Returns [`ZstackError::Authentication`] when the login is rejected and
    /// [`ZstackError::Transport`] when the endpoint cannot be reached.
    pub async fn connect(
        endpoint: impl Into<String>,
        account_name: impl Into<String>,
        password: &str,
        transport: Arc<dyn Transport>,
    ) -> Result<SessionHandle, ZstackError> {
        let client = Self::new(endpoint, Credentials::new(account_name, password), transport);
        client.login().await?;
        Ok(Arc::new(client))
    }

    /// Returns the endpoint requests are sent to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns `true` once a session token is held.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.current_token().is_some()
    }

    /// Logs in and stores the issued session token.
    ///
    /// Each call performs a fresh login; use
    /// [`SessionClient::ensure_logged_in`] to skip it when a token is held.
    ///
    /// # Errors
    ///
    /// Returns [`ZstackError::Authentication`] on a non-2xx status, an error
    /// payload, or a response without a session inventory, and
    /// [`ZstackError::Transport`] when the call cannot be completed.
    pub async fn login(&self) -> Result<(), ZstackError> {
        let body = json!({
            "logInByAccount": {
                "accountName": self.credentials.account_name(),
                "password": self.credentials.password_digest(),
            },
            "systemTags": [],
            "userTags": [],
        });
        let response = self
            .transport
            .send(HttpRequest {
                method: Method::PUT,
                url: self.url(LOGIN_PATH),
                authorization: None,
                body: Some(body),
            })
            .await?;

        let token = Self::token_from_login(&response)?;
        info!(
            account = self.credentials.account_name(),
            endpoint = %self.endpoint,
            "logged in to zstack"
        );
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token);
        Ok(())
    }

    /// Logs in only when no session token is held.
    ///
    /// # Errors
    ///
    /// Propagates any error from [`SessionClient::login`].
    pub async fn ensure_logged_in(&self) -> Result<(), ZstackError> {
        if self.is_authenticated() {
            return Ok(());
        }
        self.login().await
    }

    fn token_from_login(response: &HttpResponse) -> Result<String, ZstackError> {
        let envelope = Envelope::parse(response);
        if let Some(error) = envelope.error {
            return Err(ZstackError::Authentication {
                message: error.message(),
            });
        }
        if !response.status.is_success() {
            return Err(ZstackError::Authentication {
                message: format!("login returned status {}", response.status),
            });
        }

        let parsed: LoginResponse = serde_json::from_slice(&response.body)
            .map_err(|err| ZstackError::protocol("login response", err))?;
        parsed
            .inventory
            .map(|inventory| inventory.uuid)
            .filter(|uuid| !uuid.is_empty())
            .ok_or_else(|| ZstackError::Authentication {
                message: String::from("login response carried no session"),
            })
    }

    /// Sends `method` to `{endpoint}{path}` signed with the session token and
    /// returns the raw response. Status interpretation is left to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`ZstackError::Transport`] when the exchange fails.
    pub async fn authenticated_request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<HttpResponse, ZstackError> {
        let authorization = self.current_token().map(|token| format!("OAuth {token}"));
        debug!(%method, path, "sending authenticated request");
        self.transport
            .send(HttpRequest {
                method,
                url: self.url(path),
                authorization,
                body,
            })
            .await
    }

    /// Logs out and forgets the session token.
    ///
    /// The token is cleared locally whether or not the logout call succeeds;
    /// the returned error only reports what happened server-side.
    ///
    /// # Errors
    ///
    /// Returns [`ZstackError::Transport`] when the logout call cannot be sent
    /// and [`ZstackError::RemoteOperation`] when it is not answered with 200.
    pub async fn teardown(&self) -> Result<(), ZstackError> {
        let taken = self
            .token
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(token) = taken else {
            return Ok(());
        };

        let response = self
            .transport
            .send(HttpRequest {
                method: Method::DELETE,
                url: self.url(&format!("{SESSION_PATH}/{token}")),
                authorization: Some(format!("OAuth {token}")),
                body: None,
            })
            .await;

        match response {
            Ok(reply) if reply.status == StatusCode::OK => {
                info!(endpoint = %self.endpoint, "logged out of zstack");
                Ok(())
            }
            Ok(reply) => {
                warn!(status = %reply.status, "logout was not acknowledged");
                Err(ZstackError::RemoteOperation {
                    code: reply.status.as_u16().to_string(),
                    message: String::from("logout was not acknowledged"),
                })
            }
            Err(err) => {
                warn!(error = %err, "logout request failed");
                Err(err)
            }
        }
    }

    fn current_token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.endpoint)
    }
}
