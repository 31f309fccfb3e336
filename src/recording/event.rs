// src/recording/event.rs
//! Structured sandbox events
//!
//! Every failure the match recorder has to persist is reported as one of
//! these values, never as free text.

use crate::instrumentation::policy::ViolationCause;
use crate::runtime::fault::ProgramFault;
use crate::runtime::team::Team;
use crate::utils::errors::LoadFailureKind;
use serde::{Deserialize, Serialize};

/// Event reported to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SandboxEvent {
    /// A team hit its output quota; sent once per quota period
    OutputTruncated { team: Team, actor_id: u32, round: u32 },

    /// A denied operation was reached
    SandboxViolation {
        team: Team,
        actor_id: u32,
        round: u32,
        cause: ViolationCause,
    },

    /// A turn ran out of budget
    BudgetExhausted {
        team: Team,
        actor_id: u32,
        round: u32,
        budget: u32,
    },

    /// A turn ended with a guest runtime fault
    RuntimeFault {
        team: Team,
        actor_id: u32,
        round: u32,
        fault: ProgramFault,
    },

    /// A team's program was rejected
    LoadFailed {
        team: Team,
        kind: LoadFailureKind,
        message: String,
    },
}

impl SandboxEvent {
    pub fn team(&self) -> Team {
        match self {
            SandboxEvent::OutputTruncated { team, .. }
            | SandboxEvent::SandboxViolation { team, .. }
            | SandboxEvent::BudgetExhausted { team, .. }
            | SandboxEvent::RuntimeFault { team, .. }
            | SandboxEvent::LoadFailed { team, .. } => *team,
        }
    }

    pub fn actor_id(&self) -> Option<u32> {
        match self {
            SandboxEvent::OutputTruncated { actor_id, .. }
            | SandboxEvent::SandboxViolation { actor_id, .. }
            | SandboxEvent::BudgetExhausted { actor_id, .. }
            | SandboxEvent::RuntimeFault { actor_id, .. } => Some(*actor_id),
            SandboxEvent::LoadFailed { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SandboxEvent::OutputTruncated { .. } => "output_truncated",
            SandboxEvent::SandboxViolation { .. } => "sandbox_violation",
            SandboxEvent::BudgetExhausted { .. } => "budget_exhausted",
            SandboxEvent::RuntimeFault { .. } => "runtime_fault",
            SandboxEvent::LoadFailed { .. } => "load_failed",
        }
    }
}
