//! Guest provisioning extension point.
//!
//! The lifecycle controller calls a [`GuestProvisioner`] once after a
//! successful create. A failing provisioner aborts the create but leaves the
//! remote instance in place.

use std::ffi::OsString;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use camino::Utf8PathBuf;
use shell_escape::unix::escape;
use thiserror::Error;
use tracing::info;

mod runner;
mod script;

pub use runner::{CommandOutput, CommandRunner, ProcessCommandRunner};
pub use script::{DATA_DISK_DEVICE, DATA_MOUNT_PATH, disk_setup_script};

/// Default SSH port on freshly booted guests.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Future returned by [`GuestProvisioner::provision`].
pub type ProvisionFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ProvisionError>> + Send + 'a>>;

/// SSH materials handed to the provisioner.
#[derive(Clone, Eq, PartialEq)]
pub struct SshCredentials {
    /// Remote login user.
    pub user: String,
    /// Remote SSH port.
    pub port: u16,
    /// Optional password for provisioners able to use one; [`SshProvisioner`]
    /// ignores it.
    pub password: Option<String>,
    /// Optional private key file.
    pub key_path: Option<Utf8PathBuf>,
}

impl fmt::Debug for SshCredentials {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SshCredentials")
            .field("user", &self.user)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("key_path", &self.key_path)
            .finish()
    }
}

/// Errors raised while provisioning a guest.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ProvisionError {
    /// Raised when the instance has no address to connect to.
    #[error("instance has no IP address to provision")]
    MissingAddress,
    /// Raised when the external command could not be started.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Error message reported by the OS.
        message: String,
    },
    /// Raised when the provisioning command exits unsuccessfully.
    #[error("{program} exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Program that failed.
        program: String,
        /// Exit status text (`unknown` when killed by a signal).
        status_text: String,
        /// Captured standard error.
        stderr: String,
    },
}

/// Hook invoked after the instance has been created.
pub trait GuestProvisioner: Send + Sync {
    /// Prepares the guest reachable at `ip_address`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] when the guest cannot be prepared.
    fn provision<'a>(
        &'a self,
        ip_address: &'a str,
        ssh: &'a SshCredentials,
    ) -> ProvisionFuture<'a>;
}

/// Provisioner that does nothing, for callers that prepare guests elsewhere.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopProvisioner;

impl GuestProvisioner for NoopProvisioner {
    fn provision<'a>(
        &'a self,
        _ip_address: &'a str,
        _ssh: &'a SshCredentials,
    ) -> ProvisionFuture<'a> {
        Box::pin(async { Ok(()) })
    }
}

/// Prepares the data disk over the system `ssh` client.
///
/// Password authentication is not supported by the non-interactive client;
/// the guest must accept the configured key or an agent-provided one.
#[derive(Clone, Debug)]
pub struct SshProvisioner<R: CommandRunner> {
    runner: R,
    ssh_bin: String,
    setup_data_disk: bool,
}

impl SshProvisioner<ProcessCommandRunner> {
    /// Convenience constructor that wires the real process runner.
    #[must_use]
    pub fn with_process_runner(setup_data_disk: bool) -> Self {
        Self::new(ProcessCommandRunner, setup_data_disk)
    }
}

impl<R: CommandRunner> SshProvisioner<R> {
    /// Creates a provisioner. When `setup_data_disk` is `false` provisioning
    /// succeeds without contacting the guest.
    #[must_use]
    pub fn new(runner: R, setup_data_disk: bool) -> Self {
        Self {
            runner,
            ssh_bin: String::from("ssh"),
            setup_data_disk,
        }
    }

    /// Overrides the `ssh` executable.
    #[must_use]
    pub fn with_ssh_bin(mut self, ssh_bin: impl Into<String>) -> Self {
        self.ssh_bin = ssh_bin.into();
        self
    }

    fn build_ssh_args(
        ip_address: &str,
        ssh: &SshCredentials,
        remote_command: &str,
    ) -> Vec<OsString> {
        let mut args = vec![OsString::from("-p"), OsString::from(ssh.port.to_string())];
        if let Some(ref key_path) = ssh.key_path {
            args.push(OsString::from("-i"));
            args.push(OsString::from(key_path.as_str()));
        }
        for option in [
            "BatchMode=yes",
            "StrictHostKeyChecking=no",
            "UserKnownHostsFile=/dev/null",
        ] {
            args.push(OsString::from("-o"));
            args.push(OsString::from(option));
        }
        args.push(OsString::from(format!("{}@{ip_address}", ssh.user)));
        args.push(OsString::from(remote_command));
        args
    }

    fn run_disk_setup(
        &self,
        ip_address: &str,
        ssh: &SshCredentials,
    ) -> Result<(), ProvisionError> {
        let script = disk_setup_script(DATA_DISK_DEVICE, DATA_MOUNT_PATH);
        let remote_command = format!("sh -c {}", escape(script.into()));
        let args = Self::build_ssh_args(ip_address, ssh, &remote_command);
        let output = self.runner.run(&self.ssh_bin, &args)?;
        if output.is_success() {
            return Ok(());
        }

        let status_text = output
            .code
            .map_or_else(|| String::from("unknown"), |code| code.to_string());
        Err(ProvisionError::CommandFailure {
            program: self.ssh_bin.clone(),
            status_text,
            stderr: output.stderr,
        })
    }
}

impl<R: CommandRunner> GuestProvisioner for SshProvisioner<R> {
    fn provision<'a>(
        &'a self,
        ip_address: &'a str,
        ssh: &'a SshCredentials,
    ) -> ProvisionFuture<'a> {
        Box::pin(async move {
            if !self.setup_data_disk {
                return Ok(());
            }
            if ip_address.is_empty() {
                return Err(ProvisionError::MissingAddress);
            }
            info!(ip = ip_address, user = %ssh.user, "preparing data disk");
            self.run_disk_setup(ip_address, ssh)
        })
    }
}
