// src/runtime/team.rs
//! Teams and robot roles
//!
//! Both sets are fixed for the lifetime of the process. Every per-team table
//! in the sandbox is a plain array indexed by [`Team::index`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// A competitor, or the neutral environment pseudo-team
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Team {
    A,
    B,
    Neutral,
}

impl Team {
    /// Number of teams, i.e. the length of every per-team table
    pub const COUNT: usize = 3;

    pub const ALL: [Team; Team::COUNT] = [Team::A, Team::B, Team::Neutral];

    /// Compact numeric id used in accounting and in reported events
    pub fn index(self) -> usize {
        match self {
            Team::A => 0,
            Team::B => 1,
            Team::Neutral => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Team::A => "A",
            Team::B => "B",
            Team::Neutral => "NEUTRAL",
        }
    }

    pub fn opponent(self) -> Team {
        match self {
            Team::A => Team::B,
            Team::B => Team::A,
            Team::Neutral => Team::Neutral,
        }
    }

    pub fn is_player(self) -> bool {
        matches!(self, Team::A | Team::B)
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of unit an actor controls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RobotType {
    EnlightenmentCenter,
    Politician,
    Slanderer,
    Muckraker,
}

impl RobotType {
    pub const ALL: [RobotType; 4] = [
        RobotType::EnlightenmentCenter,
        RobotType::Politician,
        RobotType::Slanderer,
        RobotType::Muckraker,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RobotType::EnlightenmentCenter => "ENLIGHTENMENT_CENTER",
            RobotType::Politician => "POLITICIAN",
            RobotType::Slanderer => "SLANDERER",
            RobotType::Muckraker => "MUCKRAKER",
        }
    }
}

impl fmt::Display for RobotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
