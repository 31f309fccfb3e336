// src/instrumentation/mod.rs
//! Program isolation and instrumentation
//!
//! - **Policy**: which external operations are denied or redirected
//! - **Rewriter**: verifies a team program and emits metered ops
//! - **Loader**: one isolated, instrumented program per team
//!
//! ```text
//! Program ──► Rewriter ──► InstrumentedProgram ──► LoadedTeam::instantiate
//!               │  ▲
//!     CostTable ┘  └ SandboxPolicy
//! ```

pub mod loader;
pub mod policy;
pub mod rewriter;

pub use loader::{LoadedTeam, TeamLoader};
pub use policy::{PolicyDecision, SandboxPolicy, ViolationCause, ViolationCode};
pub use rewriter::{InstrumentedProgram, Op, PreCallHook, RewriteOptions, Rewriter};
