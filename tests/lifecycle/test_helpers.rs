//! Shared fixtures for lifecycle BDD scenarios.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rstest::fixture;
use thiserror::Error;
use tokio::runtime::Builder;
use zstack_machine::test_support::{ScriptedTransport, driver_config, logged_in_session};
use zstack_machine::{Driver, DriverError, JobTracker, NoopProvisioner, ZstackInstanceClient};

pub type TestDriver = Driver<ZstackInstanceClient, NoopProvisioner>;

pub const INSTANCE_UUID: &str = "vm-0001";

/// What the `when` step observed.
#[derive(Debug)]
pub enum LifecycleOutcome {
    Succeeded,
    Failed(DriverError),
    Endpoints { ip: String, url: String },
}

#[derive(Debug, Error)]
pub enum LifecycleTestError {
    #[error("failed to build runtime: {0}")]
    Runtime(String),
    #[error("driver fixture failed: {0}")]
    Driver(#[from] DriverError),
    #[error("no driver has been prepared")]
    MissingDriver,
}

/// Scenario state shared by reference between steps.
#[derive(Clone, Debug, Default)]
pub struct LifecycleContext {
    pub transport: ScriptedTransport,
    driver: Arc<Mutex<Option<TestDriver>>>,
    outcome: Arc<Mutex<Option<LifecycleOutcome>>>,
}

impl LifecycleContext {
    pub fn install_driver(&self, driver: TestDriver) {
        *self.driver.lock().unwrap_or_else(PoisonError::into_inner) = Some(driver);
    }

    pub fn driver(&self) -> MutexGuard<'_, Option<TestDriver>> {
        self.driver.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, outcome: LifecycleOutcome) {
        *self.outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome);
    }

    pub fn outcome(&self) -> MutexGuard<'_, Option<LifecycleOutcome>> {
        self.outcome.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn build_driver(&self) -> Result<TestDriver, LifecycleTestError> {
        let tracker = JobTracker::new().with_poll_interval(Duration::from_millis(1));
        let session = logged_in_session(&self.transport).await;
        let driver = Driver::new(
            ZstackInstanceClient::new(session),
            NoopProvisioner,
            driver_config(),
        )?;
        Ok(driver.with_tracker(tracker))
    }
}

/// Runs `future` to completion on a fresh current-thread runtime.
pub fn block_on<F: Future>(future: F) -> Result<F::Output, LifecycleTestError> {
    let runtime = Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|err| LifecycleTestError::Runtime(err.to_string()))?;
    Ok(runtime.block_on(future))
}

#[fixture]
pub fn lifecycle_context() -> LifecycleContext {
    LifecycleContext::default()
}
