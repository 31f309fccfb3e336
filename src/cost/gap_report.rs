// src/cost/gap_report.rs
//! Unmapped operations seen while rewriting
//!
//! Shared by every team load in the process, so it uses a concurrent map.
//! Documentation tooling reads it to find operations without a cost entry.

use crate::program::ir::OpRef;
use dashmap::DashMap;

/// Call-site counts of operations charged the default cost
#[derive(Debug, Default)]
pub struct CostGapReport {
    gaps: DashMap<OpRef, u64>,
}

impl CostGapReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one call site; returns true the first time `op` is seen
    pub fn record(&self, op: &OpRef) -> bool {
        let mut entry = self.gaps.entry(op.clone()).or_insert(0);
        *entry += 1;
        *entry == 1
    }

    pub fn count(&self, op: &OpRef) -> u64 {
        self.gaps.get(op).map(|c| *c).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.gaps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gaps.is_empty()
    }

    /// All gaps sorted by operation
    pub fn snapshot(&self) -> Vec<(OpRef, u64)> {
        let mut gaps: Vec<(OpRef, u64)> = self
            .gaps
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        gaps.sort();
        gaps
    }

    /// Human-readable listing, one operation per line
    pub fn render(&self) -> String {
        let mut output = String::from("# Operations without a cost entry\n\n");
        for (op, count) in self.snapshot() {
            output.push_str(&format!("{} ({} call sites)\n", op, count));
        }
        output
    }
}
