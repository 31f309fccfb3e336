// src/output/sinks.rs
//! Concrete output destinations

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::Arc;

/// In-memory sink capturing everything written to it
#[derive(Debug, Default)]
pub struct MemorySink {
    buf: BytesMut,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new sink behind the shared lock writers expect
    pub fn shared() -> Arc<Mutex<MemorySink>> {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Contents as text, replacing invalid UTF-8 (a truncated multi-byte character)
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Take everything written so far, leaving the sink empty
    pub fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_and_take() {
        let mut sink = MemorySink::new();
        sink.write_all(b"line one\n").unwrap();
        writeln!(sink, "line {}", 2).unwrap();

        assert_eq!(sink.contents(), "line one\nline 2\n");
        let taken = sink.take();
        assert_eq!(&taken[..], b"line one\nline 2\n");
        assert!(sink.is_empty());
    }
}
