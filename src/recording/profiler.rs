// src/recording/profiler.rs
//! Per-method budget profiles
//!
//! A [`ProfileCollection`] holds one team's profiles for a match. Each actor
//! gets a [`Profiler`] that records open/close events for the team methods it
//! enters, stamped with the budget units that actor has used across all of its
//! turns. Library operations are never profiled. Export follows the speedscope
//! evented-profile file format.

use crate::instrumentation::rewriter::{InstrumentedProgram, MethodId};
use crate::runtime::team::{RobotType, Team};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

pub const SPEEDSCOPE_SCHEMA: &str = "https://www.speedscope.app/file-format-schema.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfileEventType {
    #[serde(rename = "O")]
    Open,
    #[serde(rename = "C")]
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileEvent {
    #[serde(rename = "type")]
    pub kind: ProfileEventType,
    pub frame: u32,
    pub at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameName {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedFrames {
    pub frames: Vec<FrameName>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventedProfile {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub unit: String,
    pub start_value: u64,
    pub end_value: u64,
    pub events: Vec<ProfileEvent>,
}

/// A speedscope file for one team
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedscopeFile {
    #[serde(rename = "$schema")]
    pub schema: String,
    pub name: String,
    pub exporter: String,
    pub shared: SharedFrames,
    pub profiles: Vec<EventedProfile>,
}

#[derive(Debug, Default)]
struct Frames {
    names: Vec<String>,
    ids: HashMap<String, u32>,
}

#[derive(Debug)]
struct ActorProfile {
    name: String,
    events: Vec<ProfileEvent>,
}

/// Frames and profiles of one team for a match
#[derive(Debug)]
pub struct ProfileCollection {
    team: Team,
    frames: Mutex<Frames>,
    profiles: Mutex<Vec<Arc<Mutex<ActorProfile>>>>,
    recorded: AtomicUsize,
    max_events: usize,
}

impl ProfileCollection {
    pub fn new(team: Team, max_events: usize) -> Self {
        Self {
            team,
            frames: Mutex::new(Frames::default()),
            profiles: Mutex::new(Vec::new()),
            recorded: AtomicUsize::new(0),
            max_events,
        }
    }

    pub fn team(&self) -> Team {
        self.team
    }

    /// Start a profile for one actor, named `#id (ROLE)`
    pub fn create_profiler(self: &Arc<Self>, id: u32, role: RobotType) -> Profiler {
        let profile = Arc::new(Mutex::new(ActorProfile {
            name: format!("#{} ({})", id, role),
            events: Vec::new(),
        }));
        self.profiles.lock().push(Arc::clone(&profile));
        debug!("Profiling actor {}#{}", self.team, id);

        Profiler {
            collection: Arc::clone(self),
            profile,
            frame_ids: HashMap::new(),
            open: Vec::new(),
            skipped: 0,
            elapsed: 0,
        }
    }

    /// Open events recorded so far, capped at the limit
    pub fn recorded_events(&self) -> usize {
        self.recorded.load(Ordering::Relaxed).min(self.max_events)
    }

    pub fn is_recording(&self) -> bool {
        self.recorded.load(Ordering::Relaxed) < self.max_events
    }

    fn try_record(&self) -> bool {
        let previous = self.recorded.fetch_add(1, Ordering::Relaxed);
        if previous == self.max_events {
            warn!(
                "Team {} reached {} profile events; later method entries are not profiled",
                self.team, self.max_events
            );
        }
        previous < self.max_events
    }

    fn frame_id(&self, name: String) -> u32 {
        let mut frames = self.frames.lock();
        if let Some(id) = frames.ids.get(&name) {
            return *id;
        }
        let id = frames.names.len() as u32;
        frames.names.push(name.clone());
        frames.ids.insert(name, id);
        id
    }

    /// Snapshot every profile as a speedscope file
    pub fn export(&self) -> SpeedscopeFile {
        let frames = self
            .frames
            .lock()
            .names
            .iter()
            .map(|name| FrameName { name: name.clone() })
            .collect();

        let profiles = self
            .profiles
            .lock()
            .iter()
            .map(|profile| {
                let profile = profile.lock();
                EventedProfile {
                    kind: "evented".to_string(),
                    name: profile.name.clone(),
                    unit: "none".to_string(),
                    start_value: 0,
                    end_value: profile.events.last().map_or(0, |e| e.at),
                    events: profile.events.clone(),
                }
            })
            .collect();

        SpeedscopeFile {
            schema: SPEEDSCOPE_SCHEMA.to_string(),
            name: format!("Team {}", self.team),
            exporter: format!("arena-sandbox {}", env!("CARGO_PKG_VERSION")),
            shared: SharedFrames { frames },
            profiles,
        }
    }
}

/// One actor's event recorder
#[derive(Debug)]
pub struct Profiler {
    collection: Arc<ProfileCollection>,
    profile: Arc<Mutex<ActorProfile>>,
    frame_ids: HashMap<MethodId, u32>,
    open: Vec<u32>,
    /// Entries dropped at the event limit that have not returned yet
    skipped: usize,
    /// Units used in finished turns
    elapsed: u64,
}

impl Profiler {
    /// A team method was entered after `used` units of the current turn
    pub fn enter(&mut self, program: &InstrumentedProgram, method: MethodId, used: u64) {
        if self.skipped > 0 || !self.collection.try_record() {
            self.skipped += 1;
            return;
        }

        let collection = &self.collection;
        let frame = *self.frame_ids.entry(method).or_insert_with(|| {
            let def = program.method(method);
            collection.frame_id(format!("{}.{}", program.class(def.class).name, def.name))
        });
        self.record(ProfileEventType::Open, frame, used);
        self.open.push(frame);
    }

    /// The innermost entered method returned
    pub fn exit(&mut self, used: u64) {
        if self.skipped > 0 {
            self.skipped -= 1;
            return;
        }
        if let Some(frame) = self.open.pop() {
            self.record(ProfileEventType::Close, frame, used);
        }
    }

    /// Close frames left open by an abandoned turn and advance the clock
    pub fn finish_turn(&mut self, used: u64) {
        while let Some(frame) = self.open.pop() {
            self.record(ProfileEventType::Close, frame, used);
        }
        self.skipped = 0;
        self.elapsed = self.elapsed.saturating_add(used);
    }

    fn record(&mut self, kind: ProfileEventType, frame: u32, used: u64) {
        self.profile.lock().events.push(ProfileEvent {
            kind,
            frame,
            at: self.elapsed.saturating_add(used),
        });
    }
}
