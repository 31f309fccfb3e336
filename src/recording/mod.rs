// src/recording/mod.rs
//! Structured event reporting
//!
//! - **Events**: serde values for truncations, violations, exhaustion,
//!   runtime faults and load failures
//! - **Event Queue**: bounded lock-free queue the host drains between turns
//! - **Profiler**: per-actor method profiles exported in speedscope form
//!
//! ```text
//! Framer / turn runner → report() → ArrayQueue → Sandbox::drain_events()
//! ```

pub mod event;
pub mod event_queue;
pub mod profiler;

pub use event::SandboxEvent;
pub use event_queue::{EventQueue, QueueStats};
pub use profiler::{ProfileCollection, Profiler, SpeedscopeFile};
