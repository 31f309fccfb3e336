// src/runtime/mod.rs
//! Actor execution runtime
//!
//! This module runs instrumented team programs, one actor-turn at a time:
//!
//! - **Sandbox**: host-facing facade that loads teams and runs turns
//! - **Actor**: per-robot execution context (statics, heap, budget, output)
//! - **Interpreter**: metered op dispatch with stack, call and heap limits
//! - **Budget**: per-turn countdown reset every round
//! - **Host**: the simulation engine's robot-controller operations
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────── Sandbox ────────────────────────────┐
//! │  LoadedTeam A          LoadedTeam B          LoadedTeam Neutral  │
//! │      │                     │                                    │
//! │  ┌───┴────┐ ┌────────┐ ┌───┴────┐                               │
//! │  │Actor #1│ │Actor #2│ │Actor #3│   statics + heap per actor    │
//! │  └───┬────┘ └───┬────┘ └───┬────┘                               │
//! │      └──── Interpreter ────┘ ──► HostApi (robot controller)     │
//! │                 │                                               │
//! │      BudgetCounter (per actor)   OutputLedger (per team)        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Turns are strictly sequential; nothing here consults a clock.

pub mod actor;
pub mod budget;
pub mod builtins;
pub mod fault;
pub mod heap;
pub mod host;
pub mod interpreter;
pub mod sandbox;
pub mod team;
pub mod value;

// Re-export commonly used types
pub use actor::{ActorHandle, ActorInfo, SandboxedActor, TurnOutcome, TurnReport, TurnState};
pub use budget::{BudgetCounter, BudgetLimits};
pub use fault::ProgramFault;
pub use host::{HostApi, HostError, NullHost, ScriptedHost};
pub use interpreter::ExecLimits;
pub use sandbox::Sandbox;
pub use team::{RobotType, Team};
pub use value::Value;
