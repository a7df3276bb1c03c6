//! VM instance operations against the `ZStack` REST API.
//!
//! Every mutating call returns an [`AsyncJob`] without waiting for it; the
//! caller resolves it with its own [`crate::JobTracker`], picking the timeout
//! and decode target.

use std::future::Future;
use std::pin::Pin;

use reqwest::Method;
use serde_json::{Value, json};
use tracing::debug;

use crate::envelope::{Envelope, failure_from};
use crate::error::ZstackError;
use crate::job::AsyncJob;
use crate::session::SessionHandle;

mod types;

pub use types::{
    CreateInstanceParams, CreateInstanceRequest, InstanceResponse, StopType, VmInstanceInventory,
    VmNic, Volume,
};
use types::QueryInstancesResponse;

const INSTANCES_PATH: &str = "/zstack/v1/vm-instances";
const INSTANCE_RESOURCE: &str = "vm instance";

/// Future returned by [`InstanceApi`] operations.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ZstackError>> + Send + 'a>>;

/// Capability set the lifecycle controller depends on.
pub trait InstanceApi: Send + Sync {
    /// Submits a create request.
    fn create_instance<'a>(&'a self, request: &'a CreateInstanceRequest) -> ApiFuture<'a, AsyncJob>;

    /// Marks an instance for removal (first phase of a delete).
    fn delete_instance<'a>(&'a self, uuid: &'a str) -> ApiFuture<'a, AsyncJob>;

    /// Irreversibly destroys a deleted instance.
    fn expunge_instance<'a>(&'a self, uuid: &'a str) -> ApiFuture<'a, AsyncJob>;

    /// Powers an instance on.
    fn start_instance<'a>(&'a self, uuid: &'a str) -> ApiFuture<'a, AsyncJob>;

    /// Stops an instance gracefully or forcefully.
    fn stop_instance<'a>(&'a self, uuid: &'a str, stop_type: StopType) -> ApiFuture<'a, AsyncJob>;

    /// Reboots an instance.
    fn restart_instance<'a>(&'a self, uuid: &'a str) -> ApiFuture<'a, AsyncJob>;

    /// Fetches one instance; fails with [`ZstackError::NotFound`] when the
    /// provider returns no inventory for `uuid`.
    fn query_instance<'a>(&'a self, uuid: &'a str) -> ApiFuture<'a, VmInstanceInventory>;

    /// Lists every visible instance. An empty list is not an error.
    fn query_instances(&self) -> ApiFuture<'_, Vec<VmInstanceInventory>>;
}

/// [`InstanceApi`] implementation over an authenticated session.
#[derive(Clone, Debug)]
pub struct ZstackInstanceClient {
    session: SessionHandle,
}

impl ZstackInstanceClient {
    /// Creates a client sharing `session`.
    #[must_use]
    pub const fn new(session: SessionHandle) -> Self {
        Self { session }
    }

    /// Returns the shared session.
    #[must_use]
    pub const fn session(&self) -> &SessionHandle {
        &self.session
    }

    async fn submit(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<AsyncJob, ZstackError> {
        let response = self
            .session
            .authenticated_request(method, path, body)
            .await?;
        let job = AsyncJob::from_response(&self.session, response);
        debug!(path, job_uuid = job.job_uuid().unwrap_or("-"), "submitted instance call");
        Ok(job)
    }

    async fn action(&self, uuid: &str, body: Value) -> Result<AsyncJob, ZstackError> {
        self.submit(Method::PUT, &actions_path(uuid), Some(body))
            .await
    }

    async fn query(&self, path: &str) -> Result<Vec<VmInstanceInventory>, ZstackError> {
        let response = self
            .session
            .authenticated_request(Method::GET, path, None)
            .await?;
        let envelope = Envelope::parse(&response);
        if !response.status.is_success() || envelope.error.is_some() {
            return Err(failure_from(&response, envelope));
        }
        let parsed: QueryInstancesResponse = serde_json::from_slice(&response.body)
            .map_err(|err| ZstackError::protocol(format!("query {path}"), err))?;
        Ok(parsed.inventories)
    }
}

fn instance_path(uuid: &str) -> String {
    format!("{INSTANCES_PATH}/{uuid}")
}

fn actions_path(uuid: &str) -> String {
    format!("{INSTANCES_PATH}/{uuid}/actions")
}

impl InstanceApi for ZstackInstanceClient {
    fn create_instance<'a>(&'a self, request: &'a CreateInstanceRequest) -> ApiFuture<'a, AsyncJob> {
        Box::pin(async move {
            let body = serde_json::to_value(request)
                .map_err(|err| ZstackError::protocol("create request", err))?;
            self.submit(Method::POST, INSTANCES_PATH, Some(body)).await
        })
    }

    fn delete_instance<'a>(&'a self, uuid: &'a str) -> ApiFuture<'a, AsyncJob> {
        Box::pin(async move { self.submit(Method::DELETE, &instance_path(uuid), None).await })
    }

    fn expunge_instance<'a>(&'a self, uuid: &'a str) -> ApiFuture<'a, AsyncJob> {
        Box::pin(async move { self.action(uuid, json!({ "expungeVmInstance": {} })).await })
    }

    fn start_instance<'a>(&'a self, uuid: &'a str) -> ApiFuture<'a, AsyncJob> {
        Box::pin(async move { self.action(uuid, json!({ "startVmInstance": {} })).await })
    }

    fn stop_instance<'a>(&'a self, uuid: &'a str, stop_type: StopType) -> ApiFuture<'a, AsyncJob> {
        Box::pin(async move {
            self.action(uuid, json!({ "stopVmInstance": { "type": stop_type } }))
                .await
        })
    }

    fn restart_instance<'a>(&'a self, uuid: &'a str) -> ApiFuture<'a, AsyncJob> {
        Box::pin(async move { self.action(uuid, json!({ "rebootVmInstance": {} })).await })
    }

    fn query_instance<'a>(&'a self, uuid: &'a str) -> ApiFuture<'a, VmInstanceInventory> {
        Box::pin(async move {
            self.query(&instance_path(uuid))
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| ZstackError::NotFound {
                    resource: INSTANCE_RESOURCE.to_owned(),
                    uuid: uuid.to_owned(),
                })
        })
    }

    fn query_instances(&self) -> ApiFuture<'_, Vec<VmInstanceInventory>> {
        Box::pin(async move { self.query(INSTANCES_PATH).await })
    }
}
