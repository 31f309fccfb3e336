// src/cost/mod.rs
//! Budget costs of external operations

pub mod cost_table;
pub mod gap_report;

pub use cost_table::{CostTable, DEFAULT_COSTS};
pub use gap_report::CostGapReport;
