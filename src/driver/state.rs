//! State enumerations used by the lifecycle controller.

use std::fmt;

/// Controller-local view of where the instance is in its lifecycle.
///
/// The provider's reported state remains the source of truth; this only
/// records what the controller last did and how it ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LifecyclePhase {
    /// No instance has been created or attached.
    Uncreated,
    /// A create is in flight.
    Creating,
    /// The last operation left the instance running.
    Running,
    /// A stop or kill is in flight.
    Stopping,
    /// The last operation left the instance stopped.
    Stopped,
    /// A start or restart is in flight.
    Starting,
    /// A delete/expunge sequence is in flight.
    Removing,
    /// The instance has been expunged.
    Removed,
    /// The last operation failed.
    Failed,
}

impl LifecyclePhase {
    /// Phase adopted when attaching to an existing instance.
    #[must_use]
    pub const fn from_machine_state(state: MachineState) -> Self {
        match state {
            MachineState::Running | MachineState::Paused => Self::Running,
            MachineState::Stopped => Self::Stopped,
            MachineState::Unknown => Self::Failed,
        }
    }
}

/// Closed set of instance states reported to callers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MachineState {
    /// Provider reports `Running`.
    Running,
    /// Provider reports `Paused`.
    Paused,
    /// Provider reports `Stopped`.
    Stopped,
    /// Empty, transient (`Starting`, `Stopping`, ...) or unrecognised states.
    Unknown,
}

impl MachineState {
    /// Maps a provider state string. Anything other than an exact
    /// `Running`, `Paused` or `Stopped` is [`MachineState::Unknown`].
    #[must_use]
    pub fn from_provider(state: &str) -> Self {
        match state {
            "Running" => Self::Running,
            "Paused" => Self::Paused,
            "Stopped" => Self::Stopped,
            _ => Self::Unknown,
        }
    }

    /// Returns the provider spelling of the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "Running",
            Self::Paused => "Paused",
            Self::Stopped => "Stopped",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Remote operation a lifecycle error refers to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Operation {
    /// Instance creation.
    Create,
    /// Power on.
    Start,
    /// Graceful stop.
    Stop,
    /// Forced stop.
    Kill,
    /// Reboot.
    Restart,
    /// First phase of removal.
    Delete,
    /// Second, irreversible phase of removal.
    Expunge,
    /// Instance lookup.
    Query,
}

impl Operation {
    /// Returns the lowercase operation name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Kill => "kill",
            Self::Restart => "restart",
            Self::Delete => "delete",
            Self::Expunge => "expunge",
            Self::Query => "query",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}
