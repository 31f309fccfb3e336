// src/cost/cost_table.rs
//! Cost table mapping operation identity to a fixed budget cost
//!
//! The built-in table is declared statically in [`DEFAULT_COSTS`] and built
//! once per process. Hosts extend or override it from YAML or the builder
//! methods before loading any team; after that the table is shared read-only.
//!
//! YAML shape:
//!
//! ```yaml
//! default_cost: 2
//! costs:
//!   RobotController.senseNearbyRobots: 100
//!   RobotController.move: 1
//! ```

use crate::cost::gap_report::CostGapReport;
use crate::program::ir::OpRef;
use crate::utils::config::CostSettings;
use crate::utils::errors::{LoadFailureKind, Result, SandboxError};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info, warn};

/// Built-in costs: `(owner, name, cost)`
pub static DEFAULT_COSTS: &[(&str, &str, u32)] = &[
    // Runtime library
    ("Math", "abs", 1),
    ("Math", "min", 1),
    ("Math", "max", 1),
    ("Math", "random", 5),
    ("Random", "nextInt", 5),
    ("String", "concat", 2),
    ("String", "length", 1),
    ("String", "valueOf", 2),
    ("Object", "toString", 2),
    ("Object", "hashCode", 1),
    ("System", "identityHashCode", 1),
    ("System", "print", 1),
    ("System", "println", 1),
    ("Stdout", "print", 1),
    ("Stdout", "println", 1),
    // Turn control and budget introspection are free
    ("Clock", "yield", 0),
    ("Clock", "getBytecodesLeft", 0),
    ("Clock", "getBytecodeNum", 0),
    // Robot controller
    ("RobotController", "getRoundNum", 1),
    ("RobotController", "getTeam", 1),
    ("RobotController", "getType", 1),
    ("RobotController", "getID", 1),
    ("RobotController", "getLocation", 1),
    ("RobotController", "getInfluence", 1),
    ("RobotController", "getConviction", 1),
    ("RobotController", "getCooldownTurns", 1),
    ("RobotController", "isReady", 1),
    ("RobotController", "onTheMap", 5),
    ("RobotController", "canSenseLocation", 5),
    ("RobotController", "canDetectLocation", 5),
    ("RobotController", "senseRobotAtLocation", 25),
    ("RobotController", "senseNearbyRobots", 100),
    ("RobotController", "detectNearbyRobots", 100),
    ("RobotController", "sensePassability", 5),
    ("RobotController", "canMove", 10),
    ("RobotController", "move", 1),
    ("RobotController", "canBuildRobot", 10),
    ("RobotController", "buildRobot", 1),
    ("RobotController", "canEmpower", 10),
    ("RobotController", "empower", 1),
    ("RobotController", "canExpose", 10),
    ("RobotController", "expose", 1),
    ("RobotController", "canBid", 10),
    ("RobotController", "bid", 1),
    ("RobotController", "canSetFlag", 5),
    ("RobotController", "setFlag", 1),
    ("RobotController", "canGetFlag", 5),
    ("RobotController", "getFlag", 5),
    ("RobotController", "getEmpowerFactor", 5),
    ("RobotController", "resign", 0),
];

static BUILTIN: Lazy<CostTable> = Lazy::new(|| {
    let mut table = CostTable::new(CostSettings::default().default_cost, false);
    for (owner, name, cost) in DEFAULT_COSTS {
        table.entries.insert(OpRef::new(*owner, *name), *cost);
    }
    debug!("Built-in cost table ready with {} entries", table.entries.len());
    table
});

/// On-disk override format
#[derive(Debug, Default, Serialize, Deserialize)]
struct CostOverrides {
    #[serde(default)]
    default_cost: Option<u32>,

    #[serde(default)]
    costs: BTreeMap<String, u32>,
}

/// Operation cost table
#[derive(Debug, Clone)]
pub struct CostTable {
    entries: HashMap<OpRef, u32>,
    default_cost: u32,
    strict: bool,
}

impl CostTable {
    /// Empty table
    pub fn new(default_cost: u32, strict: bool) -> Self {
        Self {
            entries: HashMap::new(),
            default_cost,
            strict,
        }
    }

    /// The process-wide built-in table
    pub fn builtin() -> &'static CostTable {
        &BUILTIN
    }

    /// Copy of the built-in table
    pub fn with_defaults() -> Self {
        BUILTIN.clone()
    }

    /// Built-in table adjusted by the `costs` config section
    pub fn from_settings(settings: &CostSettings) -> Result<Self> {
        let mut table = Self::with_defaults()
            .with_default_cost(settings.default_cost)
            .strict(settings.strict);

        if let Some(path) = &settings.overrides_file {
            let applied = table.load_yaml_file(path)?;
            info!("Applied {} cost overrides from {}", applied, path);
        }

        Ok(table)
    }

    pub fn with_cost(mut self, owner: &str, name: &str, cost: u32) -> Self {
        self.set(OpRef::new(owner, name), cost);
        self
    }

    pub fn with_default_cost(mut self, default_cost: u32) -> Self {
        self.default_cost = default_cost;
        self
    }

    /// Fail loads on unmapped operations instead of charging the default
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn set(&mut self, op: OpRef, cost: u32) {
        self.entries.insert(op, cost);
    }

    /// Merge YAML overrides, returning how many entries were applied
    pub fn merge_yaml(&mut self, yaml: &str) -> Result<usize> {
        let overrides: CostOverrides = serde_yaml::from_str(yaml)?;

        if let Some(default_cost) = overrides.default_cost {
            self.default_cost = default_cost;
        }

        let count = overrides.costs.len();
        for (key, cost) in overrides.costs {
            let op = OpRef::parse(&key).ok_or_else(|| {
                SandboxError::ConfigError(format!("Invalid operation in cost table: {}", key))
            })?;
            self.entries.insert(op, cost);
        }

        Ok(count)
    }

    pub fn load_yaml_file(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let yaml = std::fs::read_to_string(path)?;
        self.merge_yaml(&yaml)
    }

    /// Export as YAML with entries sorted by operation
    pub fn export_yaml(&self) -> Result<String> {
        let overrides = CostOverrides {
            default_cost: Some(self.default_cost),
            costs: self
                .entries
                .iter()
                .map(|(op, cost)| (op.to_string(), *cost))
                .collect(),
        };
        Ok(serde_yaml::to_string(&overrides)?)
    }

    pub fn get(&self, op: &OpRef) -> Option<u32> {
        self.entries.get(op).copied()
    }

    pub fn contains(&self, op: &OpRef) -> bool {
        self.entries.contains_key(op)
    }

    pub fn default_cost(&self) -> u32 {
        self.default_cost
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cost to charge for a call site
    ///
    /// Unmapped operations fail the load in strict mode; otherwise they cost
    /// the default, are logged once, and are counted in `gaps`.
    pub fn resolve(&self, op: &OpRef, gaps: Option<&CostGapReport>) -> Result<u32> {
        if let Some(cost) = self.get(op) {
            return Ok(cost);
        }

        if self.strict {
            return Err(SandboxError::load(
                LoadFailureKind::UnmappedOperation,
                format!("No cost entry for {}", op),
            ));
        }

        let first = gaps.map(|g| g.record(op)).unwrap_or(true);
        if first {
            warn!(
                "No cost entry for {}, charging default cost {}",
                op, self.default_cost
            );
        }
        crate::observability::metrics::record_cost_gap();

        Ok(self.default_cost)
    }
}

impl Default for CostTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}
