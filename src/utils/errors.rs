// src/utils/errors.rs
//! Error types for the sandbox
//!
//! Only two failures ever leave the sandbox as `Err`:
//! - **Load failures**: a team's program cannot be instrumented, reported
//!   once before any of that team's actors execute
//! - **Host misuse**: unknown actors, terminated actors, bad configuration
//!
//! Everything that happens *inside* a turn (violations, exhaustion, guest
//! faults) is reported as a `TurnOutcome` value instead.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::runtime::actor::ActorHandle;
use crate::runtime::team::Team;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Why a team's program could not be loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadFailureKind {
    /// The program references something players may not touch
    Illegal,

    /// A class, method or entry point the program needs does not exist
    Missing,

    /// Malformed code (bad jump target, bad slot, bad arity)
    Malformed,

    /// External operation without a cost entry while running in strict mode
    UnmappedOperation,
}

impl std::fmt::Display for LoadFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LoadFailureKind::Illegal => "ILLEGAL",
            LoadFailureKind::Missing => "MISSING",
            LoadFailureKind::Malformed => "MALFORMED",
            LoadFailureKind::UnmappedOperation => "UNMAPPED",
        };
        f.write_str(s)
    }
}

/// Sandbox error type
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("load failed ({kind}): {message}")]
    LoadFailed {
        kind: LoadFailureKind,
        message: String,
    },

    #[error("team {0} has no loaded program")]
    TeamNotLoaded(Team),

    #[error("unknown actor: {0:?}")]
    UnknownActor(ActorHandle),

    #[error("actor {0} already exists")]
    DuplicateActor(u32),

    #[error("actor {0:?} has been terminated")]
    ActorTerminated(ActorHandle),

    #[error("invalid program: {0}")]
    InvalidProgram(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    /// Shorthand for building a load failure
    pub fn load(kind: LoadFailureKind, message: impl Into<String>) -> Self {
        SandboxError::LoadFailed {
            kind,
            message: message.into(),
        }
    }

    /// The load failure kind, if this is a load failure
    pub fn load_kind(&self) -> Option<LoadFailureKind> {
        match self {
            SandboxError::LoadFailed { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

impl From<config::ConfigError> for SandboxError {
    fn from(e: config::ConfigError) -> Self {
        SandboxError::ConfigError(e.to_string())
    }
}

impl From<serde_yaml::Error> for SandboxError {
    fn from(e: serde_yaml::Error) -> Self {
        SandboxError::ConfigError(format!("YAML error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_failure_display() {
        let err = SandboxError::load(LoadFailureKind::Illegal, "Illegal class: Sandbox");
        assert_eq!(err.to_string(), "load failed (ILLEGAL): Illegal class: Sandbox");
        assert_eq!(err.load_kind(), Some(LoadFailureKind::Illegal));
    }

    #[test]
    fn test_non_load_error_has_no_kind() {
        let err = SandboxError::TeamNotLoaded(Team::B);
        assert!(err.load_kind().is_none());
        assert!(err.to_string().contains('B'));
    }
}
