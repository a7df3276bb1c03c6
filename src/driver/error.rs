//! Error types for the lifecycle controller.

use thiserror::Error;

use crate::config::ConfigError;
use crate::error::ZstackError;
use crate::provision::ProvisionError;

use super::Operation;

/// Errors raised by [`Driver`](super::Driver) operations.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum DriverError {
    /// Raised when the configuration fails validation.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    /// Raised when an operation needs an instance but none is held.
    #[error("no instance has been created")]
    NotCreated,
    /// Raised when create is called while an instance is already held.
    #[error("instance {instance_uuid} already exists")]
    AlreadyCreated {
        /// Identifier of the instance already held.
        instance_uuid: String,
    },
    /// Raised when a remote call fails.
    #[error("{operation} failed for instance '{instance_uuid}': {source}")]
    Operation {
        /// Operation that failed.
        operation: Operation,
        /// Instance the operation targeted; empty before create assigns one.
        instance_uuid: String,
        /// Underlying client error.
        #[source]
        source: ZstackError,
    },
    /// Raised when a remote call succeeds but leaves the instance somewhere
    /// other than where the operation should have put it.
    #[error(
        "{operation} left instance '{instance_uuid}' in an unexpected state: expected {expected}, found {actual}"
    )]
    Lifecycle {
        /// Operation whose post-condition failed.
        operation: Operation,
        /// Instance the operation targeted; empty before create assigns one.
        instance_uuid: String,
        /// Expected post-condition.
        expected: String,
        /// What the provider reported instead.
        actual: String,
    },
    /// Raised when guest provisioning fails after create.
    #[error("provisioning instance {instance_uuid} failed: {source}")]
    Provisioning {
        /// Instance that was created but not provisioned.
        instance_uuid: String,
        /// Underlying provisioning error.
        #[source]
        source: ProvisionError,
    },
}

impl DriverError {
    pub(super) fn operation(operation: Operation, instance_uuid: &str, source: ZstackError) -> Self {
        Self::Operation {
            operation,
            instance_uuid: instance_uuid.to_owned(),
            source,
        }
    }

    /// Returns the client error behind an [`DriverError::Operation`].
    #[must_use]
    pub const fn remote_error(&self) -> Option<&ZstackError> {
        match self {
            Self::Operation { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Returns `true` for post-condition failures.
    #[must_use]
    pub const fn is_lifecycle(&self) -> bool {
        matches!(self, Self::Lifecycle { .. })
    }
}
