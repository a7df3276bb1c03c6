//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, PoisonError};

use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

use crate::config::DriverConfig;
use crate::error::ZstackError;
use crate::provision::{CommandOutput, CommandRunner, ProvisionError};
use crate::session::{SessionClient, SessionHandle};
use crate::transport::{HttpRequest, HttpResponse, Transport, TransportFuture};

/// Endpoint used by scripted sessions.
pub const TEST_ENDPOINT: &str = "http://zstack.test:8080";

/// Session token issued by [`ScriptedTransport::push_login`].
pub const TEST_SESSION: &str = "session-0001";

/// Scripted transport that returns pre-seeded responses in FIFO order and
/// records every request it receives.
///
/// Clones share the same queue, so a test can keep one clone for assertions
/// while the client under test owns another.
#[derive(Clone, Debug, Default)]
pub struct ScriptedTransport {
    responses: Arc<Mutex<VecDeque<Result<HttpResponse, ZstackError>>>>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
}

impl ScriptedTransport {
    /// Creates a transport with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a JSON response.
    pub fn push_json(&self, status: StatusCode, body: &Value) {
        self.push(Ok(HttpResponse::json(status, body)));
    }

    /// Queues a response with a raw body.
    pub fn push_raw(&self, status: StatusCode, body: impl Into<Vec<u8>>) {
        self.push(Ok(HttpResponse {
            status,
            body: body.into(),
        }));
    }

    /// Queues a successful login issuing [`TEST_SESSION`].
    pub fn push_login(&self) {
        self.push_json(
            StatusCode::OK,
            &json!({ "inventory": { "uuid": TEST_SESSION, "accountUuid": "account-1" } }),
        );
    }

    /// Queues a `202 Accepted` job envelope for `job_uuid`.
    pub fn push_accepted(&self, job_uuid: &str) {
        self.push_json(StatusCode::ACCEPTED, &job_location(job_uuid));
    }

    /// Queues a job status reply that is still pending.
    pub fn push_pending(&self, job_uuid: &str) {
        self.push_accepted(job_uuid);
    }

    /// Queues a terminal job status carrying `inventory`.
    pub fn push_inventory(&self, inventory: &Value) {
        self.push_json(StatusCode::OK, &json!({ "inventory": inventory }));
    }

    /// Queues a terminal job failure with the provider error envelope.
    pub fn push_job_failure(&self, code: &str, description: &str) {
        self.push_json(
            StatusCode::SERVICE_UNAVAILABLE,
            &json!({ "error": { "code": code, "description": description, "details": "" } }),
        );
    }

    /// Queues a query reply listing `inventories`.
    pub fn push_inventories(&self, inventories: &[Value]) {
        self.push_json(StatusCode::OK, &json!({ "inventories": inventories }));
    }

    /// Queues a transport level failure.
    pub fn push_transport_error(&self, message: &str) {
        self.push(Err(ZstackError::Transport {
            context: String::from("scripted"),
            message: message.to_owned(),
        }));
    }

    fn push(&self, response: Result<HttpResponse, ZstackError>) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(response);
    }

    /// Returns a snapshot of all requests recorded so far.
    #[must_use]
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the recorded requests as `METHOD path` strings.
    #[must_use]
    pub fn request_lines(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .map(|request| {
                let path = request
                    .url
                    .strip_prefix(TEST_ENDPOINT)
                    .unwrap_or(&request.url)
                    .to_owned();
                format!("{} {path}", request.method)
            })
            .collect()
    }

    /// Returns how many scripted responses have not been consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, request: HttpRequest) -> TransportFuture<'_> {
        let context = format!("{} {}", request.method, request.url);
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        let next = self
            .responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        Box::pin(async move {
            next.unwrap_or_else(|| {
                Err(ZstackError::Transport {
                    context,
                    message: String::from("no scripted response available"),
                })
            })
        })
    }
}

/// Body of a `202 Accepted` reply pointing at `job_uuid`.
#[must_use]
pub fn job_location(job_uuid: &str) -> Value {
    json!({ "location": format!("{TEST_ENDPOINT}/zstack/v1/api-jobs/{job_uuid}") })
}

/// Minimal VM inventory with the given identity, state and NIC addresses.
#[must_use]
pub fn vm_inventory(uuid: &str, state: &str, ips: &[&str]) -> Value {
    let nics: Vec<Value> = ips
        .iter()
        .map(|ip| json!({ "uuid": format!("nic-{ip}"), "vmInstanceUuid": uuid, "ip": ip }))
        .collect();
    json!({
        "uuid": uuid,
        "name": "machine",
        "state": state,
        "vmNics": nics,
        "allVolumes": [],
    })
}

/// Valid configuration with a single network and no data disk.
#[must_use]
pub fn driver_config() -> DriverConfig {
    DriverConfig {
        account_name: String::from("admin"),
        account_password: String::from("password"),
        endpoint: String::from(TEST_ENDPOINT),
        name: Some(String::from("machine")),
        description: None,
        zone_uuid: Some(String::from("zone-1")),
        cluster_uuid: None,
        host_uuid: None,
        image_uuid: String::from("image-1"),
        instance_offering_uuid: String::from("offering-1"),
        network_uuids: String::from("l3-1"),
        static_ip: None,
        system_disk_offering_uuid: None,
        system_disk_size: None,
        data_disk_offering_uuid: None,
        data_disk_size: None,
        ssh_user: String::from("root"),
        ssh_port: 22,
        ssh_password: None,
        ssh_key_path: None,
    }
}

/// Logs a session in over `transport` and returns the shared handle.
///
/// # Panics
///
/// Panics when the scripted login does not succeed.
pub async fn logged_in_session(transport: &ScriptedTransport) -> SessionHandle {
    transport.push_login();
    SessionClient::connect(TEST_ENDPOINT, "admin", "password", Arc::new(transport.clone()))
        .await
        .unwrap_or_else(|err| panic!("scripted login should succeed: {err}"))
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Pushes an explicit command output response.
    pub fn push_output(&self, code: Option<i32>, stderr: impl Into<String>) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(CommandOutput {
                code,
                stdout: String::new(),
                stderr: stderr.into(),
            });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, ProvisionError> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(CommandInvocation {
                program: program.to_owned(),
                args: args.to_vec(),
            });
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| ProvisionError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
