//! Fatal error taxonomy of the control daemon.
//!
//! Transient sensor loss and lock contention never show up here: the former
//! drives the loop into fail-safe, the latter is a normal early exit.

use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlError {
    /// Mandatory hwmon group is not present at startup.
    #[error("hwmon group '{name}' not found under {}", .root.display())]
    GroupMissing { name: String, root: PathBuf },

    /// Group was found but exposes no duty-control endpoint.
    #[error("duty control endpoint {} does not exist", .path.display())]
    DutyControlMissing { path: PathBuf },

    #[error("failed to read duty from {}: {source}", .path.display())]
    ActuatorRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Channel could not be switched to manual control.
    #[error("failed to enable manual control via {}: {source}", .path.display())]
    ManualMode {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write duty {duty} to {}: {source}", .path.display())]
    ActuatorWrite {
        duty: u8,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
