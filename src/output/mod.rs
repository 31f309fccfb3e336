// src/output/mod.rs
//! Diagnostic output path
//!
//! ```text
//! guest System.print → OutputWrapper → ActorFramer → LimitedWriter → sink
//!                          ↑ rebind (host only)        ↑ OutputLedger (per team)
//! guest Stdout.print → NullSink
//! ```

pub mod framer;
pub mod quota;
pub mod silencer;
pub mod sinks;
pub mod wrapper;

pub use framer::ActorFramer;
pub use quota::{LimitedWriter, OutputLedger, SharedSink, TeamQuota, WriteOutcome, TRUNCATION_MESSAGE};
pub use silencer::NullSink;
pub use sinks::MemorySink;
pub use wrapper::{OutputBinding, OutputWrapper};

/// Something guest text can be printed to
pub trait PrintTarget: Send + Sync {
    fn print(&self, text: &str);

    fn println(&self, text: &str);
}
