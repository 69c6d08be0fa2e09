use core::fmt;

use serde::{Deserialize, Serialize};

/// Outcome of one component health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckState {
    Running,
    Stopped,
    StoppedButSuccessful,
    StartedByHand,
    DepFailed,
    Unreachable,
    NotInstalled,
}

impl fmt::Display for CheckState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let description = match self {
            CheckState::Running => "RUNNING",
            CheckState::Stopped => "STOPPED",
            CheckState::StoppedButSuccessful => "STOPPED BUT CHECK WAS SUCCESSFUL",
            CheckState::StartedByHand => "RUNNING BUT NOT STARTED BY HYPERION",
            CheckState::DepFailed => "DEPENDENCY FAILED",
            CheckState::Unreachable => "HOST UNREACHABLE",
            CheckState::NotInstalled => "HYPERION NOT INSTALLED ON REMOTE",
        };

        write!(f, "{}", description)
    }
}

/// Result of a component start attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartState {
    Started,
    AlreadyRunning,
    Failed,
}

/// Liveness of the connection between the master and a remote host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostConnectionState {
    Connected,
    Disconnected,
}

/// Outcome of a remote pre-flight command, mapped from its exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitStatus {
    Fine,
    ConfigInvalid,
    MissingSshConfig,
    UnknownError,
}

impl ExitStatus {
    /// Map a process exit code to a status. `None` means the process was
    /// terminated by a signal.
    pub fn from_code(code: Option<i32>) -> Self {
        match code {
            Some(0) => ExitStatus::Fine,
            Some(1) => ExitStatus::ConfigInvalid,
            Some(2) => ExitStatus::MissingSshConfig,
            _ => ExitStatus::UnknownError,
        }
    }

    pub fn is_fine(&self) -> bool {
        *self == ExitStatus::Fine
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Fine => write!(f, "FINE"),
            ExitStatus::ConfigInvalid => write!(f, "CONFIG INVALID"),
            ExitStatus::MissingSshConfig => write!(f, "MISSING SSH CONFIG"),
            ExitStatus::UnknownError => write!(f, "UNKNOWN ERROR"),
        }
    }
}
