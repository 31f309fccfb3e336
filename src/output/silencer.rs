// src/output/silencer.rs
//! Null sink for ambient output channels
//!
//! Guest calls to `Stdout.print`/`Stdout.println` resolve here, as does the
//! front wrapper of a silenced team. Nothing written here is ever observable.

use crate::output::PrintTarget;
use once_cell::sync::Lazy;
use std::io::{self, Write};
use std::sync::Arc;

static SHARED: Lazy<Arc<NullSink>> = Lazy::new(|| Arc::new(NullSink));

/// Sink that discards all input
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl NullSink {
    /// The process-wide instance
    pub fn shared() -> Arc<NullSink> {
        Arc::clone(&SHARED)
    }
}

impl Write for NullSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl PrintTarget for NullSink {
    fn print(&self, _text: &str) {}

    fn println(&self, _text: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discards_everything() {
        let mut sink = NullSink;
        assert_eq!(sink.write(b"anything").unwrap(), 8);
        sink.flush().unwrap();
        NullSink::shared().println("gone");
    }

    #[test]
    fn test_shared_instance_is_single() {
        assert!(Arc::ptr_eq(&NullSink::shared(), &NullSink::shared()));
    }
}
