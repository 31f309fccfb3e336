// src/lib.rs
//! Arena Sandbox Library
//!
//! Deterministic execution sandbox for untrusted competition robot players.
//! Team programs are verified and rewritten at load time so that every
//! operation is metered against a per-turn budget, denied operations trap,
//! and diagnostic output is framed and capped per team.
//!
//! # Architecture
//!
//! The sandbox is structured into several key modules:
//!
//! - **program**: the team program format, its codec and a builder
//! - **cost**: budget cost table and cost-gap reporting
//! - **instrumentation**: policy, rewriter and per-team loader
//! - **runtime**: interpreter, actors, budgets and the `Sandbox` facade
//! - **output**: quota governor, per-actor framer, null sink, output wrapper
//! - **recording**: structured events and the bounded event queue
//! - **observability**: tracing and metrics
//! - **utils**: configuration and error types

// Public module exports
pub mod cost;
pub mod instrumentation;
pub mod observability;
pub mod output;
pub mod program;
pub mod recording;
pub mod runtime;
pub mod utils;

// Re-export commonly used types
pub use program::{Program, ProgramBuilder};
pub use runtime::{ActorHandle, HostApi, RobotType, Sandbox, Team, TurnOutcome, TurnReport};
pub use utils::config::EngineConfig;
pub use utils::errors::{Result, SandboxError};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
