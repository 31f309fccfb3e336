// src/utils/config.rs
//! Engine configuration
//!
//! Loaded with the `config` crate from an optional TOML file layered under
//! `ARENA__*` environment variables, e.g.
//! `ARENA__OUTPUT__PER_TEAM_LIMIT_BYTES=4096`.

use crate::runtime::team::{RobotType, Team};
use crate::utils::errors::{Result, SandboxError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "arena.toml";

/// Environment variable overriding the config file path
pub const CONFIG_PATH_ENV: &str = "ARENA_CONFIG";

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sandbox: SandboxSettings,
    pub costs: CostSettings,
    pub output: OutputSettings,
    pub events: EventSettings,
    pub logging: LoggingSettings,
}

/// Execution limits and instrumentation switches
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSettings {
    /// Per-turn budget for enlightenment centers
    pub enlightenment_center_budget: u32,

    /// Per-turn budget for politicians
    pub politician_budget: u32,

    /// Per-turn budget for slanderers
    pub slanderer_budget: u32,

    /// Per-turn budget for muckrakers
    pub muckraker_budget: u32,

    /// Cost of one plain (non-call) instruction
    pub instruction_cost: u32,

    /// Run `debug_` methods for free instead of stripping them
    pub debug_methods_enabled: bool,

    /// Match seed; every actor derives its own seed from it
    pub seed: u64,

    /// Maximum operand stack depth per actor
    pub max_stack_depth: usize,

    /// Maximum call depth per actor
    pub max_call_depth: usize,

    /// Maximum heap cells per actor (objects, arrays, closures)
    pub max_heap_cells: usize,

    /// Maximum string bytes an actor may retain at once
    pub max_string_bytes: usize,

    /// Bytes of newly built string text covered by one budget unit
    pub string_bytes_per_unit: u32,

    /// Ops one turn may run inside debug methods, which are otherwise free
    pub max_debug_ops: u64,

    /// Largest decoded program accepted from bytes or files
    pub max_program_bytes: usize,

    /// Record per-method speedscope profiles for every team
    pub profiling_enabled: bool,

    /// Profile events kept per team per match
    pub profiler_max_events: usize,

    /// Class holding the turn entry point
    pub entry_class: String,

    /// Turn entry point (static, zero parameters)
    pub entry_method: String,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            enlightenment_center_budget: 20_000,
            politician_budget: 15_000,
            slanderer_budget: 10_000,
            muckraker_budget: 15_000,
            instruction_cost: 1,
            debug_methods_enabled: false,
            seed: 0,
            max_stack_depth: 1024,
            max_call_depth: 256,
            max_heap_cells: 65_536,
            max_string_bytes: 1 << 20,
            string_bytes_per_unit: 32,
            max_debug_ops: 1_000_000,
            max_program_bytes: crate::program::codec::DEFAULT_MAX_PROGRAM_BYTES,
            profiling_enabled: false,
            profiler_max_events: 10_000_000,
            entry_class: "RobotPlayer".to_string(),
            entry_method: "turn".to_string(),
        }
    }
}

impl SandboxSettings {
    /// Per-turn budget for a role
    pub fn budget_for(&self, role: RobotType) -> u32 {
        match role {
            RobotType::EnlightenmentCenter => self.enlightenment_center_budget,
            RobotType::Politician => self.politician_budget,
            RobotType::Slanderer => self.slanderer_budget,
            RobotType::Muckraker => self.muckraker_budget,
        }
    }
}

/// Cost table behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CostSettings {
    /// Cost charged for external operations missing from the table
    pub default_cost: u32,

    /// Refuse to load programs calling unmapped operations
    pub strict: bool,

    /// Optional YAML file merged over the built-in table
    pub overrides_file: Option<String>,
}

impl Default for CostSettings {
    fn default() -> Self {
        Self {
            default_cost: 1,
            strict: false,
            overrides_file: None,
        }
    }
}

/// Diagnostic output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Per-team byte quota; `None` means unlimited
    pub per_team_limit_bytes: Option<u64>,

    /// Count content bytes against the quota
    pub byte_counting: bool,

    /// Mirror framed output to the host's stdout
    pub mirror_to_stdout: bool,

    /// Discard all output of team A
    pub silence_a: bool,

    /// Discard all output of team B
    pub silence_b: bool,

    /// Discard all output of the neutral team
    pub silence_neutral: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            per_team_limit_bytes: None,
            byte_counting: true,
            mirror_to_stdout: false,
            silence_a: false,
            silence_b: false,
            silence_neutral: false,
        }
    }
}

impl OutputSettings {
    /// Whether a team's output goes to the null sink
    pub fn is_silenced(&self, team: Team) -> bool {
        match team {
            Team::A => self.silence_a,
            Team::B => self.silence_b,
            Team::Neutral => self.silence_neutral,
        }
    }
}

/// Structured event reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventSettings {
    /// Capacity of the event queue drained by the host
    pub queue_capacity: usize,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 65_536,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Fallback filter when `RUST_LOG` is unset
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from `ARENA_CONFIG` (or `arena.toml`) and the environment
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(&path, false)
    }

    /// Load configuration from a specific file, layered under the environment
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_string_lossy().to_string();
        Self::load_from(&path, true)
    }

    fn load_from(path: &str, required: bool) -> Result<Self> {
        debug!("Loading configuration from {} (required: {})", path, required);

        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(required))
            .add_source(
                config::Environment::with_prefix("ARENA")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let config: EngineConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the sandbox cannot run with
    pub fn validate(&self) -> Result<()> {
        let s = &self.sandbox;
        for role in RobotType::ALL {
            if s.budget_for(role) == 0 {
                return Err(SandboxError::ConfigError(format!(
                    "budget for {} cannot be 0",
                    role
                )));
            }
        }
        if s.max_stack_depth == 0 || s.max_call_depth == 0 {
            return Err(SandboxError::ConfigError(
                "stack and call depth limits must be positive".to_string(),
            ));
        }
        if s.max_string_bytes == 0 || s.string_bytes_per_unit == 0 {
            return Err(SandboxError::ConfigError(
                "string limits must be positive".to_string(),
            ));
        }
        if s.max_debug_ops == 0 || s.max_program_bytes == 0 {
            return Err(SandboxError::ConfigError(
                "debug op and program size limits must be positive".to_string(),
            ));
        }
        if s.entry_class.is_empty() || s.entry_method.is_empty() {
            return Err(SandboxError::ConfigError(
                "entry point cannot be empty".to_string(),
            ));
        }
        if self.events.queue_capacity == 0 {
            return Err(SandboxError::ConfigError(
                "event queue capacity cannot be 0".to_string(),
            ));
        }
        Ok(())
    }
}
