//! Core library for the `zstack-machine` VM driver.
//!
//! The crate layers a `ZStack` REST client into four parts: a session client
//! that logs in and signs requests, a job tracker that polls accepted
//! asynchronous jobs to completion, an instance client for VM operations, and
//! a lifecycle controller that sequences those operations and checks the
//! state each one leaves the instance in.

pub mod config;
pub mod driver;
mod envelope;
pub mod error;
pub mod instance;
pub mod job;
pub mod provision;
pub mod session;
pub mod test_support;
pub mod transport;

pub use config::{ConfigError, DriverConfig};
pub use driver::{
    DOCKER_PORT, DRIVER_NAME, Driver, DriverError, LifecyclePhase, MachineState,
    OPERATION_TIMEOUT, Operation,
};
pub use envelope::Tags;
pub use error::ZstackError;
pub use instance::{
    CreateInstanceParams, CreateInstanceRequest, InstanceApi, InstanceResponse, StopType,
    VmInstanceInventory, ZstackInstanceClient,
};
pub use job::{AsyncJob, AsyncJobHandle, DEFAULT_WAIT, JobOutcome, JobTracker, POLL_INTERVAL};
pub use provision::{
    CommandOutput, CommandRunner, GuestProvisioner, NoopProvisioner, ProcessCommandRunner,
    ProvisionError, SshCredentials, SshProvisioner,
};
pub use session::{Credentials, SessionClient, SessionHandle};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
