// src/output/framer.rs
//! Per-actor output framing
//!
//! Every chunk an actor prints is prefixed with `[team:type#id@round] `.
//! The header's length is refunded to the team quota before the write, so
//! only content bytes count against it. Header and content are then written
//! as one governed chunk; a truncated chunk cuts into the content, never
//! the header, unless the quota is already exhausted.

use crate::output::quota::{LimitedWriter, SharedSink, WriteOutcome};
use crate::output::PrintTarget;
use crate::recording::{EventQueue, SandboxEvent};
use crate::runtime::actor::ActorInfo;
use crate::runtime::team::{RobotType, Team};
use std::io::Write;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

/// Framing writer owned by one actor
pub struct ActorFramer {
    team: Team,
    role: RobotType,
    id: u32,
    round: AtomicU32,
    writer: LimitedWriter,
    mirror: Option<SharedSink>,
    mirror_failed: AtomicBool,
    events: Option<Arc<EventQueue>>,
}

impl ActorFramer {
    pub fn new(info: &ActorInfo, writer: LimitedWriter) -> Self {
        Self {
            team: info.team,
            role: info.role,
            id: info.id,
            round: AtomicU32::new(info.round),
            writer,
            mirror: None,
            mirror_failed: AtomicBool::new(false),
            events: None,
        }
    }

    /// Also copy framed text to the host's stdout, ignoring the quota
    pub fn with_mirror(self, mirror_to_stdout: bool) -> Self {
        if mirror_to_stdout {
            self.with_mirror_sink(Arc::new(Mutex::new(std::io::stdout())))
        } else {
            self
        }
    }

    /// Copy framed text to `sink`, ignoring the quota
    pub fn with_mirror_sink(mut self, sink: SharedSink) -> Self {
        self.mirror = Some(sink);
        self
    }

    /// Report truncation notices as structured events
    pub fn with_events(mut self, events: Arc<EventQueue>) -> Self {
        self.events = Some(events);
        self
    }

    /// Set the round shown in subsequent headers
    pub fn update_round(&self, round: u32) {
        self.round.store(round, Ordering::Relaxed);
    }

    pub fn header(&self) -> String {
        format!(
            "[{}:{}#{}@{}] ",
            self.team,
            self.role,
            self.id,
            self.round.load(Ordering::Relaxed)
        )
    }

    /// Frame and write one chunk of text
    pub fn write_framed(&self, text: &str) -> WriteOutcome {
        let header = self.header();
        self.writer.refund(header.len() as u64);

        let mut framed = String::with_capacity(header.len() + text.len());
        framed.push_str(&header);
        framed.push_str(text);

        let outcome = self.writer.write_governed(framed.as_bytes());
        trace!(
            "Actor {} wrote {}/{} framed bytes",
            self.id,
            outcome.written,
            framed.len()
        );

        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror.lock().write_all(framed.as_bytes()) {
                // Once per actor; a broken mirror would fail every write
                if !self.mirror_failed.swap(true, Ordering::Relaxed) {
                    warn!("Actor {} could not mirror output: {}", self.id, e);
                }
            }
        }

        if outcome.notice_sent {
            if let Some(events) = &self.events {
                events.report(SandboxEvent::OutputTruncated {
                    team: self.team,
                    actor_id: self.id,
                    round: self.round.load(Ordering::Relaxed),
                });
            }
        }

        outcome
    }
}

impl PrintTarget for ActorFramer {
    fn print(&self, text: &str) {
        self.write_framed(text);
    }

    fn println(&self, text: &str) {
        let mut line = String::with_capacity(text.len() + 1);
        line.push_str(text);
        line.push('\n');
        self.write_framed(&line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::quota::{OutputLedger, SharedSink, TRUNCATION_MESSAGE};
    use crate::output::sinks::MemorySink;

    struct Fixture {
        ledger: Arc<OutputLedger>,
        sink: Arc<Mutex<MemorySink>>,
        events: Arc<EventQueue>,
    }

    impl Fixture {
        fn new(limit: Option<u64>) -> Self {
            Self {
                ledger: Arc::new(OutputLedger::new(limit)),
                sink: MemorySink::shared(),
                events: Arc::new(EventQueue::new(16)),
            }
        }

        fn framer(&self, team: Team, role: RobotType, id: u32, round: u32) -> ActorFramer {
            let sink: SharedSink = self.sink.clone();
            let info = ActorInfo {
                team,
                role,
                id,
                round,
            };
            ActorFramer::new(&info, LimitedWriter::new(team, self.ledger.clone(), sink))
                .with_events(self.events.clone())
        }
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_mirror_copies_framed_text() {
        let fx = Fixture::new(Some(0));
        let mirror = MemorySink::shared();
        let mirror_sink: SharedSink = mirror.clone();
        let framer = fx
            .framer(Team::B, RobotType::Muckraker, 4, 2)
            .with_mirror_sink(mirror_sink);

        framer.print("hi");
        assert_eq!(mirror.lock().contents(), "[B:MUCKRAKER#4@2] hi");
    }

    #[test]
    fn test_failing_mirror_does_not_affect_governed_output() {
        let fx = Fixture::new(None);
        let broken: SharedSink = Arc::new(Mutex::new(BrokenPipe));
        let framer = fx
            .framer(Team::A, RobotType::Slanderer, 3, 1)
            .with_mirror_sink(broken);

        framer.print("one");
        framer.print("two");
        assert!(framer.mirror_failed.load(Ordering::Relaxed));
        assert_eq!(fx.sink.lock().contents(), "[A:SLANDERER#3@1] one[A:SLANDERER#3@1] two");
    }

    #[test]
    fn test_header_format() {
        let fx = Fixture::new(None);
        let framer = fx.framer(Team::A, RobotType::Politician, 12, 5);
        assert_eq!(framer.header(), "[A:POLITICIAN#12@5] ");

        framer.update_round(6);
        framer.println("hi");
        assert_eq!(fx.sink.lock().contents(), "[A:POLITICIAN#12@6] hi\n");
    }

    #[test]
    fn test_header_is_not_charged() {
        let fx = Fixture::new(Some(100));
        let framer = fx.framer(Team::B, RobotType::Muckraker, 3, 1);
        framer.print("0123456789");
        assert_eq!(fx.ledger.remaining(Team::B), Some(90));
    }

    #[test]
    fn test_fifty_byte_quota_scenario() {
        let fx = Fixture::new(Some(50));
        // "[B:SLANDERER#7@1] " is 18 bytes
        let framer = fx.framer(Team::B, RobotType::Slanderer, 7, 1);
        let header = framer.header();

        let first = "x".repeat(30);
        framer.print(&first);
        assert_eq!(fx.ledger.remaining(Team::B), Some(20));

        let second = "y".repeat(25);
        let outcome = framer.write_framed(&second);
        assert!(outcome.truncated);
        assert!(outcome.notice_sent);
        assert_eq!(outcome.written, header.len() + 20);
        assert_eq!(fx.ledger.remaining(Team::B), Some(0));

        let expected = format!(
            "{h}{a}{h}{b}{n}",
            h = header,
            a = first,
            b = "y".repeat(20),
            n = TRUNCATION_MESSAGE
        );
        assert_eq!(fx.sink.lock().contents(), expected);

        let events = fx.events.drain();
        assert_eq!(
            events,
            vec![SandboxEvent::OutputTruncated {
                team: Team::B,
                actor_id: 7,
                round: 1
            }]
        );
    }

    #[test]
    fn test_exhausted_team_gets_no_header_refund() {
        let fx = Fixture::new(Some(5));
        let framer = fx.framer(Team::A, RobotType::EnlightenmentCenter, 1, 1);

        framer.print(&"z".repeat(10));
        assert_eq!(fx.ledger.remaining(Team::A), Some(0));
        let before = fx.sink.lock().len();

        // At zero the refund is withheld and the whole chunk, header included, is dropped
        let outcome = framer.write_framed("later");
        assert_eq!(outcome.written, 0);
        assert!(!outcome.notice_sent);
        assert_eq!(fx.ledger.remaining(Team::A), Some(0));
        assert_eq!(fx.sink.lock().len(), before);
        assert_eq!(fx.events.drain().len(), 1);
    }

    #[test]
    fn test_actors_share_team_quota() {
        let fx = Fixture::new(Some(10));
        let one = fx.framer(Team::A, RobotType::Politician, 1, 1);
        let two = fx.framer(Team::A, RobotType::Politician, 2, 1);
        let other = fx.framer(Team::B, RobotType::Politician, 3, 1);

        one.print("123456");
        two.print("123456");
        assert_eq!(fx.ledger.remaining(Team::A), Some(0));
        assert_eq!(fx.ledger.remaining(Team::B), Some(10));

        other.print("abc");
        assert_eq!(fx.ledger.remaining(Team::B), Some(7));
        assert!(!fx.ledger.truncation_reported(Team::B));
    }
}
