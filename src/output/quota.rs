// src/output/quota.rs
//! Per-team output quota governor
//!
//! The [`OutputLedger`] holds one quota per team for the lifetime of the
//! host process (or until reset). Every actor of a team writes through a
//! [`LimitedWriter`] bound to that team's slot:
//!
//! - quota >= length: the whole write goes through
//! - 0 < quota < length: the prefix that fits goes through, quota drops to 0
//! - quota == 0: the write is dropped
//!
//! Any short write sends the truncation notice, once per team until the
//! quota is reset. Each team slot has its own lock, so teams never contend.

use crate::observability::metrics;
use crate::runtime::team::Team;
use parking_lot::Mutex;
use serde::Serialize;
use std::io::{self, Write};
use std::sync::Arc;
use tracing::{debug, info};

/// Written to the sink, uncharged, the first time a team is truncated
pub const TRUNCATION_MESSAGE: &str = "[output truncated due to team output limit]\n";

/// Underlying destination shared by every writer
pub type SharedSink = Arc<Mutex<dyn Write + Send>>;

/// Quota state of one team
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TeamQuota {
    /// Remaining bytes; `None` is unlimited
    pub remaining: Option<u64>,

    pub truncation_reported: bool,
}

/// Result of reserving quota for one write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Reservation {
    allowed: usize,
    notify: bool,
}

/// Output quotas of every team
#[derive(Debug)]
pub struct OutputLedger {
    teams: [Mutex<TeamQuota>; Team::COUNT],
}

impl OutputLedger {
    /// Ledger with the same limit for every team
    pub fn new(limit: Option<u64>) -> Self {
        let quota = TeamQuota {
            remaining: limit,
            truncation_reported: false,
        };
        Self {
            teams: [Mutex::new(quota), Mutex::new(quota), Mutex::new(quota)],
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None)
    }

    /// Set a team's limit and clear its truncation flag
    pub fn reset(&self, team: Team, limit: Option<u64>) {
        let mut quota = self.teams[team.index()].lock();
        quota.remaining = limit;
        quota.truncation_reported = false;
        info!("Output quota for team {} reset to {:?}", team, limit);
    }

    pub fn snapshot(&self, team: Team) -> TeamQuota {
        *self.teams[team.index()].lock()
    }

    pub fn remaining(&self, team: Team) -> Option<u64> {
        self.snapshot(team).remaining
    }

    pub fn truncation_reported(&self, team: Team) -> bool {
        self.snapshot(team).truncation_reported
    }

    /// Add `bytes` back to a limited team quota
    ///
    /// Applies only while the quota is above zero: an exhausted team stays
    /// exhausted. Returns whether the refund was applied.
    pub fn refund(&self, team: Team, bytes: u64) -> bool {
        let mut quota = self.teams[team.index()].lock();
        match quota.remaining.as_mut() {
            Some(remaining) if *remaining > 0 => {
                *remaining = remaining.saturating_add(bytes);
                true
            }
            _ => false,
        }
    }

    fn reserve(&self, team: Team, len: usize, byte_counting: bool) -> Reservation {
        let mut quota = self.teams[team.index()].lock();

        let allowed = match quota.remaining {
            None => len,
            Some(0) => 0,
            // Uncounted streams pass freely until the quota is gone
            Some(_) if !byte_counting => len,
            Some(remaining) => len.min(usize::try_from(remaining).unwrap_or(usize::MAX)),
        };

        if byte_counting {
            if let Some(remaining) = quota.remaining.as_mut() {
                *remaining -= allowed as u64;
            }
        }

        let notify = allowed < len && !quota.truncation_reported;
        if notify {
            quota.truncation_reported = true;
        }

        Reservation { allowed, notify }
    }
}

impl Default for OutputLedger {
    fn default() -> Self {
        Self::unlimited()
    }
}

/// Outcome of one governed write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Bytes delivered to the sink
    pub written: usize,

    /// Some bytes were dropped
    pub truncated: bool,

    /// This write sent the team's truncation notice
    pub notice_sent: bool,
}

/// Quota-governed writer for one team
pub struct LimitedWriter {
    team: Team,
    ledger: Arc<OutputLedger>,
    sink: SharedSink,
    byte_counting: bool,
}

impl LimitedWriter {
    pub fn new(team: Team, ledger: Arc<OutputLedger>, sink: SharedSink) -> Self {
        Self {
            team,
            ledger,
            sink,
            byte_counting: true,
        }
    }

    /// Disable byte counting for trusted diagnostic paths
    pub fn with_byte_counting(mut self, byte_counting: bool) -> Self {
        self.byte_counting = byte_counting;
        self
    }

    pub fn team(&self) -> Team {
        self.team
    }

    pub fn ledger(&self) -> &Arc<OutputLedger> {
        &self.ledger
    }

    pub fn refund(&self, bytes: u64) -> bool {
        self.ledger.refund(self.team, bytes)
    }

    /// Write as much of `buf` as the team's quota allows
    pub fn write_governed(&self, buf: &[u8]) -> WriteOutcome {
        let reservation = self.ledger.reserve(self.team, buf.len(), self.byte_counting);

        {
            let mut sink = self.sink.lock();
            if reservation.allowed > 0 {
                if let Err(e) = sink.write_all(&buf[..reservation.allowed]) {
                    debug!("Output sink error for team {}: {}", self.team, e);
                }
            }
            if reservation.notify {
                if let Err(e) = sink.write_all(TRUNCATION_MESSAGE.as_bytes()) {
                    debug!("Output sink error for team {}: {}", self.team, e);
                }
            }
        }

        if reservation.allowed > 0 {
            metrics::record_output(self.team.as_str(), reservation.allowed);
        }
        if reservation.notify {
            info!("Team {} reached its output limit", self.team);
            metrics::record_truncation(self.team.as_str());
        }

        WriteOutcome {
            written: reservation.allowed,
            truncated: reservation.allowed < buf.len(),
            notice_sent: reservation.notify,
        }
    }
}

impl Write for LimitedWriter {
    /// Dropped bytes count as consumed; callers never see backpressure
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_governed(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.lock().flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::sinks::MemorySink;
    use proptest::prelude::*;

    fn writer(team: Team, limit: Option<u64>) -> (LimitedWriter, Arc<Mutex<MemorySink>>) {
        let memory = MemorySink::shared();
        let sink: SharedSink = memory.clone();
        let ledger = Arc::new(OutputLedger::new(limit));
        (LimitedWriter::new(team, ledger, sink), memory)
    }

    #[test]
    fn test_full_write_under_quota() {
        let (w, sink) = writer(Team::A, Some(10));
        let outcome = w.write_governed(b"hello");
        assert_eq!(
            outcome,
            WriteOutcome {
                written: 5,
                truncated: false,
                notice_sent: false
            }
        );
        assert_eq!(w.ledger().remaining(Team::A), Some(5));
        assert_eq!(sink.lock().contents(), "hello");
    }

    #[test]
    fn test_prefix_write_and_single_notice() {
        let (w, sink) = writer(Team::B, Some(4));
        let first = w.write_governed(b"abcdefgh");
        assert_eq!(first.written, 4);
        assert!(first.notice_sent);

        let second = w.write_governed(b"more");
        assert_eq!(second.written, 0);
        assert!(second.truncated);
        assert!(!second.notice_sent);

        assert_eq!(w.ledger().remaining(Team::B), Some(0));
        assert_eq!(sink.lock().contents(), format!("abcd{}", TRUNCATION_MESSAGE));
    }

    #[test]
    fn test_zero_quota_drops_with_notice() {
        let (w, sink) = writer(Team::A, Some(0));
        let outcome = w.write_governed(b"x");
        assert_eq!(outcome.written, 0);
        assert!(outcome.notice_sent);
        assert_eq!(sink.lock().contents(), TRUNCATION_MESSAGE);
    }

    #[test]
    fn test_unlimited() {
        let (w, sink) = writer(Team::Neutral, None);
        let big = vec![b'z'; 100_000];
        assert_eq!(w.write_governed(&big).written, 100_000);
        assert_eq!(sink.lock().len(), 100_000);
        assert_eq!(w.ledger().remaining(Team::Neutral), None);
    }

    #[test]
    fn test_refund_only_while_quota_remains() {
        let ledger = OutputLedger::new(Some(5));
        assert!(ledger.refund(Team::A, 12));
        assert_eq!(ledger.remaining(Team::A), Some(17));

        let exhausted = OutputLedger::new(Some(0));
        assert!(!exhausted.refund(Team::A, 12));
        assert_eq!(exhausted.remaining(Team::A), Some(0));

        let unlimited = OutputLedger::unlimited();
        assert!(!unlimited.refund(Team::A, 12));
        assert_eq!(unlimited.remaining(Team::A), None);
    }

    #[test]
    fn test_uncounted_stream() {
        let (w, sink) = writer(Team::A, Some(3));
        let w = w.with_byte_counting(false);

        assert_eq!(w.write_governed(b"longer than three").written, 17);
        assert_eq!(w.ledger().remaining(Team::A), Some(3));

        // Once exhausted, uncounted writes are dropped too
        w.ledger().reset(Team::A, Some(0));
        assert_eq!(w.write_governed(b"dropped").written, 0);
        assert!(sink.lock().contents().ends_with(TRUNCATION_MESSAGE));
    }

    #[test]
    fn test_teams_are_independent() {
        let memory = MemorySink::shared();
        let sink: SharedSink = memory.clone();
        let ledger = Arc::new(OutputLedger::new(Some(3)));
        let a = LimitedWriter::new(Team::A, ledger.clone(), sink.clone());
        let b = LimitedWriter::new(Team::B, ledger.clone(), sink);

        a.write_governed(b"aaaaaa");
        assert!(ledger.truncation_reported(Team::A));
        assert!(!ledger.truncation_reported(Team::B));
        assert_eq!(ledger.remaining(Team::B), Some(3));

        assert_eq!(b.write_governed(b"bb").written, 2);

        // Resetting A clears only A's flag
        ledger.reset(Team::A, Some(10));
        assert!(!ledger.truncation_reported(Team::A));
        assert_eq!(ledger.remaining(Team::B), Some(1));

        let again = a.write_governed(&[b'a'; 11]);
        assert!(again.notice_sent);
    }

    #[test]
    fn test_io_write_reports_full_length() {
        let (mut w, _sink) = writer(Team::A, Some(2));
        assert_eq!(w.write(b"abcdef").unwrap(), 6);
        w.flush().unwrap();
    }

    proptest! {
        #[test]
        fn prop_writes_within_quota_are_verbatim(
            chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..32), 0..16),
            slack in 0u64..64,
        ) {
            let total: u64 = chunks.iter().map(|c| c.len() as u64).sum();
            let (w, sink) = writer(Team::A, Some(total + slack));

            for chunk in &chunks {
                let outcome = w.write_governed(chunk);
                prop_assert_eq!(outcome.written, chunk.len());
                prop_assert!(!outcome.truncated);
            }

            let expected: Vec<u8> = chunks.concat();
            let delivered = sink.lock();
            prop_assert_eq!(delivered.as_bytes(), expected.as_slice());
            drop(delivered);
            prop_assert_eq!(w.ledger().remaining(Team::A), Some(slack));
        }

        #[test]
        fn prop_overflow_delivers_exactly_remaining(
            remaining in 1u64..64,
            extra in 1usize..64,
            followups in 0usize..5,
        ) {
            let (w, sink) = writer(Team::B, Some(remaining));
            let payload = vec![b'x'; remaining as usize + extra];

            let outcome = w.write_governed(&payload);
            prop_assert_eq!(outcome.written as u64, remaining);
            prop_assert!(outcome.notice_sent);

            for _ in 0..followups {
                let later = w.write_governed(b"late");
                prop_assert_eq!(later.written, 0);
                prop_assert!(!later.notice_sent);
            }

            prop_assert_eq!(w.ledger().remaining(Team::B), Some(0));
            let contents = sink.lock().contents();
            prop_assert_eq!(contents.matches(TRUNCATION_MESSAGE).count(), 1);
            prop_assert_eq!(contents.len() as u64, remaining + TRUNCATION_MESSAGE.len() as u64);
        }
    }
}
