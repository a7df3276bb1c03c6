//! Instance lifecycle controller.
//!
//! [`Driver`] sequences [`InstanceApi`] calls for one instance, resolves each
//! job within [`OPERATION_TIMEOUT`], and checks the state the job left the
//! instance in. A job that succeeds but leaves the instance somewhere else is
//! reported as [`DriverError::Lifecycle`].
//!
//! Operations take `&mut self`: calls against one instance are serialised by
//! the borrow checker rather than a lock.

use std::time::Duration;

use serde::de::IgnoredAny;
use tracing::info;

use crate::config::DriverConfig;
use crate::error::ZstackError;
use crate::instance::{InstanceApi, InstanceResponse, StopType, VmInstanceInventory};
use crate::job::{AsyncJob, JobTracker};
use crate::provision::GuestProvisioner;

mod error;
mod state;

pub use error::DriverError;
pub use state::{LifecyclePhase, MachineState, Operation};

/// Name reported by [`Driver::driver_name`].
pub const DRIVER_NAME: &str = "zstack";

/// Port composed into [`Driver::url`].
pub const DOCKER_PORT: u16 = 2376;

/// Ceiling applied to every lifecycle job on top of the tracker default.
pub const OPERATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Drives one VM instance through its lifecycle.
#[derive(Debug)]
pub struct Driver<A, P> {
    api: A,
    provisioner: P,
    tracker: JobTracker,
    config: DriverConfig,
    instance_uuid: Option<String>,
    phase: LifecyclePhase,
}

impl<A, P> Driver<A, P>
where
    A: InstanceApi,
    P: GuestProvisioner,
{
    /// Creates a controller from fully constructed collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Config`] when `config` fails validation; no
    /// remote call is made in that case.
    pub fn new(api: A, provisioner: P, config: DriverConfig) -> Result<Self, DriverError> {
        config.validate()?;
        Ok(Self {
            api,
            provisioner,
            tracker: JobTracker::new(),
            config,
            instance_uuid: None,
            phase: LifecyclePhase::Uncreated,
        })
    }

    /// Overrides the job tracker used to resolve lifecycle jobs.
    #[must_use]
    pub const fn with_tracker(mut self, tracker: JobTracker) -> Self {
        self.tracker = tracker;
        self
    }

    /// Returns the driver name.
    #[must_use]
    pub const fn driver_name(&self) -> &'static str {
        DRIVER_NAME
    }

    /// Returns the identifier of the instance being driven, if any.
    #[must_use]
    pub fn instance_uuid(&self) -> Option<&str> {
        self.instance_uuid.as_deref()
    }

    /// Returns the controller-local lifecycle phase.
    #[must_use]
    pub const fn phase(&self) -> LifecyclePhase {
        self.phase
    }

    /// Returns the validated configuration.
    #[must_use]
    pub const fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Checks that a create can be attempted: configuration is valid and no
    /// instance is held yet.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Config`] or [`DriverError::AlreadyCreated`].
    pub fn pre_create_check(&self) -> Result<(), DriverError> {
        self.config.validate()?;
        self.ensure_uncreated()
    }

    fn ensure_uncreated(&self) -> Result<(), DriverError> {
        match &self.instance_uuid {
            Some(uuid) => Err(DriverError::AlreadyCreated {
                instance_uuid: uuid.clone(),
            }),
            None => Ok(()),
        }
    }

    fn require_uuid(&self) -> Result<String, DriverError> {
        self.instance_uuid.clone().ok_or(DriverError::NotCreated)
    }

    fn settle<T>(
        &mut self,
        result: Result<T, DriverError>,
        phase: LifecyclePhase,
    ) -> Result<T, DriverError> {
        self.phase = if result.is_ok() {
            phase
        } else {
            LifecyclePhase::Failed
        };
        result
    }

    /// Attaches to an existing instance after confirming it exists.
    ///
    /// The phase is derived from the reported state; states the controller
    /// cannot drive from (transient, `Error`, ...) attach as
    /// [`LifecyclePhase::Failed`].
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::AlreadyCreated`] when an instance is held and
    /// [`DriverError::Operation`] when the lookup fails.
    pub async fn attach(&mut self, instance_uuid: &str) -> Result<MachineState, DriverError> {
        self.ensure_uncreated()?;
        let instance = self.query(instance_uuid).await?;
        let state = MachineState::from_provider(&instance.state);
        self.instance_uuid = Some(instance.uuid);
        self.phase = LifecyclePhase::from_machine_state(state);
        info!(instance_uuid, %state, "attached to instance");
        Ok(state)
    }

    /// Creates the instance, confirms it exists, records its identifier and
    /// runs the guest provisioner.
    ///
    /// The identifier is recorded before provisioning, so a provisioning
    /// failure leaves the instance attached for a later [`Driver::remove`].
    ///
    /// # Errors
    ///
    /// - [`DriverError::AlreadyCreated`] when an instance is already held.
    /// - [`DriverError::Operation`] when submission, resolution or the
    ///   confirming query fails.
    /// - [`DriverError::Lifecycle`] when the job returns no instance or the
    ///   instance cannot be found afterwards.
    /// - [`DriverError::Provisioning`] when the provisioner fails.
    pub async fn create(&mut self) -> Result<(), DriverError> {
        self.ensure_uncreated()?;
        self.phase = LifecyclePhase::Creating;
        let result = self.create_instance().await;
        self.settle(result, LifecyclePhase::Running)
    }

    async fn create_instance(&mut self) -> Result<(), DriverError> {
        let request = self.config.create_request();
        info!(name = %request.params.name, "creating instance");
        let job = self
            .api
            .create_instance(&request)
            .await
            .map_err(|source| DriverError::operation(Operation::Create, "", source))?;
        let response: InstanceResponse = self
            .tracker
            .resolve(job, OPERATION_TIMEOUT)
            .await
            .map_err(|source| DriverError::operation(Operation::Create, "", source))?;

        let uuid = response
            .inventory
            .map(|inventory| inventory.uuid)
            .filter(|uuid| !uuid.is_empty())
            .ok_or_else(|| DriverError::Lifecycle {
                operation: Operation::Create,
                instance_uuid: String::new(),
                expected: String::from("an inventory with an instance UUID"),
                actual: String::from("no inventory"),
            })?;

        let instance = match self.api.query_instance(&uuid).await {
            Ok(instance) => instance,
            Err(ZstackError::NotFound { .. }) => {
                return Err(DriverError::Lifecycle {
                    operation: Operation::Create,
                    instance_uuid: uuid,
                    expected: String::from("instance present"),
                    actual: String::from("not found"),
                });
            }
            Err(source) => return Err(DriverError::operation(Operation::Query, &uuid, source)),
        };

        self.instance_uuid = Some(uuid.clone());
        info!(instance_uuid = %uuid, state = %instance.state, "instance created");

        let ssh = self.config.ssh_credentials();
        self.provisioner
            .provision(instance.primary_ip(), &ssh)
            .await
            .map_err(|source| DriverError::Provisioning {
                instance_uuid: uuid,
                source,
            })
    }

    /// Powers the instance on and requires it to report `Running`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotCreated`], [`DriverError::Operation`], or
    /// [`DriverError::Lifecycle`] when the job leaves another state.
    pub async fn start(&mut self) -> Result<(), DriverError> {
        let uuid = self.require_uuid()?;
        self.phase = LifecyclePhase::Starting;
        let result = self.start_instance(&uuid).await;
        self.settle(result, LifecyclePhase::Running)
    }

    async fn start_instance(&self, uuid: &str) -> Result<(), DriverError> {
        info!(instance_uuid = uuid, "starting instance");
        let job = self
            .api
            .start_instance(uuid)
            .await
            .map_err(|source| DriverError::operation(Operation::Start, uuid, source))?;
        let response = self.resolve_instance(Operation::Start, uuid, job).await?;
        expect_state(Operation::Start, uuid, &response, MachineState::Running)
    }

    /// Stops the instance gracefully and requires it to report `Stopped`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotCreated`], [`DriverError::Operation`], or
    /// [`DriverError::Lifecycle`] when the job leaves another state.
    pub async fn stop(&mut self) -> Result<(), DriverError> {
        self.stop_with(Operation::Stop, StopType::Grace).await
    }

    /// Powers the instance off and requires it to report `Stopped`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotCreated`], [`DriverError::Operation`], or
    /// [`DriverError::Lifecycle`] when the job leaves another state.
    pub async fn kill(&mut self) -> Result<(), DriverError> {
        self.stop_with(Operation::Kill, StopType::Cold).await
    }

    async fn stop_with(
        &mut self,
        operation: Operation,
        stop_type: StopType,
    ) -> Result<(), DriverError> {
        let uuid = self.require_uuid()?;
        self.phase = LifecyclePhase::Stopping;
        let result = self.stop_instance(operation, &uuid, stop_type).await;
        self.settle(result, LifecyclePhase::Stopped)
    }

    async fn stop_instance(
        &self,
        operation: Operation,
        uuid: &str,
        stop_type: StopType,
    ) -> Result<(), DriverError> {
        info!(instance_uuid = uuid, %operation, ?stop_type, "stopping instance");
        let job = self
            .api
            .stop_instance(uuid, stop_type)
            .await
            .map_err(|source| DriverError::operation(operation, uuid, source))?;
        let response = self.resolve_instance(operation, uuid, job).await?;
        expect_state(operation, uuid, &response, MachineState::Stopped)
    }

    /// Reboots the instance. The resulting state is not checked.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotCreated`] or [`DriverError::Operation`].
    pub async fn restart(&mut self) -> Result<(), DriverError> {
        let uuid = self.require_uuid()?;
        self.phase = LifecyclePhase::Starting;
        let result = self.restart_instance(&uuid).await;
        self.settle(result, LifecyclePhase::Running)
    }

    async fn restart_instance(&self, uuid: &str) -> Result<(), DriverError> {
        info!(instance_uuid = uuid, "restarting instance");
        let job = self
            .api
            .restart_instance(uuid)
            .await
            .map_err(|source| DriverError::operation(Operation::Restart, uuid, source))?;
        self.tracker
            .resolve::<IgnoredAny>(job, OPERATION_TIMEOUT)
            .await
            .map_err(|source| DriverError::operation(Operation::Restart, uuid, source))?;
        Ok(())
    }

    /// Deletes then expunges the instance. Both phases must resolve; the
    /// identifier is released only after the expunge succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotCreated`] or [`DriverError::Operation`]
    /// naming the phase that failed. A failed expunge leaves the delete in
    /// effect.
    pub async fn remove(&mut self) -> Result<(), DriverError> {
        let uuid = self.require_uuid()?;
        self.phase = LifecyclePhase::Removing;
        let result = self.remove_instance(&uuid).await;
        if result.is_ok() {
            self.instance_uuid = None;
        }
        self.settle(result, LifecyclePhase::Removed)
    }

    async fn remove_instance(&self, uuid: &str) -> Result<(), DriverError> {
        for operation in [Operation::Delete, Operation::Expunge] {
            info!(instance_uuid = uuid, %operation, "removing instance");
            let submitted = match operation {
                Operation::Delete => self.api.delete_instance(uuid).await,
                _ => self.api.expunge_instance(uuid).await,
            };
            let job = submitted.map_err(|source| DriverError::operation(operation, uuid, source))?;
            self.tracker
                .resolve::<IgnoredAny>(job, OPERATION_TIMEOUT)
                .await
                .map_err(|source| DriverError::operation(operation, uuid, source))?;
        }
        Ok(())
    }

    /// Queries the instance and maps its state to [`MachineState`].
    /// Unrecognised provider states map to [`MachineState::Unknown`].
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotCreated`] or [`DriverError::Operation`].
    pub async fn state(&self) -> Result<MachineState, DriverError> {
        let uuid = self.require_uuid()?;
        let instance = self.query(&uuid).await?;
        Ok(MachineState::from_provider(&instance.state))
    }

    /// Returns the first NIC's address, or an empty string when the
    /// instance has no interface yet.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotCreated`] or [`DriverError::Operation`].
    pub async fn ip(&self) -> Result<String, DriverError> {
        let uuid = self.require_uuid()?;
        let instance = self.query(&uuid).await?;
        Ok(instance.primary_ip().to_owned())
    }

    /// Returns the hostname used for SSH, which is the instance IP.
    ///
    /// # Errors
    ///
    /// See [`Driver::ip`].
    pub async fn ssh_hostname(&self) -> Result<String, DriverError> {
        self.ip().await
    }

    /// Returns `tcp://{ip}:2376`, or an empty string while no IP is
    /// assigned.
    ///
    /// # Errors
    ///
    /// See [`Driver::ip`].
    pub async fn url(&self) -> Result<String, DriverError> {
        let ip = self.ip().await?;
        if ip.is_empty() {
            return Ok(String::new());
        }
        Ok(format!("tcp://{ip}:{DOCKER_PORT}"))
    }

    /// Lists every instance visible to the account.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Operation`] when the query fails.
    pub async fn list(&self) -> Result<Vec<VmInstanceInventory>, DriverError> {
        self.api
            .query_instances()
            .await
            .map_err(|source| DriverError::operation(Operation::Query, "", source))
    }

    async fn query(&self, uuid: &str) -> Result<VmInstanceInventory, DriverError> {
        self.api
            .query_instance(uuid)
            .await
            .map_err(|source| DriverError::operation(Operation::Query, uuid, source))
    }

    async fn resolve_instance(
        &self,
        operation: Operation,
        uuid: &str,
        job: AsyncJob,
    ) -> Result<InstanceResponse, DriverError> {
        self.tracker
            .resolve(job, OPERATION_TIMEOUT)
            .await
            .map_err(|source| DriverError::operation(operation, uuid, source))
    }
}

fn expect_state(
    operation: Operation,
    uuid: &str,
    response: &InstanceResponse,
    expected: MachineState,
) -> Result<(), DriverError> {
    let actual = response
        .inventory
        .as_ref()
        .map_or("", |inventory| inventory.state.as_str());
    if MachineState::from_provider(actual) == expected {
        return Ok(());
    }
    Err(DriverError::Lifecycle {
        operation,
        instance_uuid: uuid.to_owned(),
        expected: expected.as_str().to_owned(),
        actual: if actual.is_empty() {
            String::from("no state")
        } else {
            actual.to_owned()
        },
    })
}
