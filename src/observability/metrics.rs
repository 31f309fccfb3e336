// src/observability/metrics.rs
//! Metric names and recording helpers
//!
//! Recording is a no-op until a recorder is installed with
//! [`init_metrics`](super::init_metrics), so library code calls these
//! unconditionally.

use ::metrics::{counter, describe_counter, describe_histogram, histogram, Unit};

pub const TURNS_TOTAL: &str = "sandbox_turns_total";
pub const BUDGET_USED: &str = "sandbox_budget_used";
pub const VIOLATIONS_TOTAL: &str = "sandbox_violations_total";
pub const OUTPUT_BYTES_TOTAL: &str = "sandbox_output_bytes_total";
pub const OUTPUT_TRUNCATIONS_TOTAL: &str = "sandbox_output_truncations_total";
pub const COST_GAPS_TOTAL: &str = "sandbox_cost_gaps_total";
pub const LOAD_FAILURES_TOTAL: &str = "sandbox_load_failures_total";
pub const EVENTS_DROPPED_TOTAL: &str = "sandbox_events_dropped_total";

/// Register descriptions for every metric the sandbox emits
pub fn describe_all() {
    describe_counter!(TURNS_TOTAL, "Actor turns executed, by outcome");
    describe_histogram!(BUDGET_USED, Unit::Count, "Budget units consumed per turn");
    describe_counter!(VIOLATIONS_TOTAL, "Sandbox violations, by cause code");
    describe_counter!(OUTPUT_BYTES_TOTAL, Unit::Bytes, "Diagnostic bytes delivered, by team");
    describe_counter!(OUTPUT_TRUNCATIONS_TOTAL, "Truncation notices, by team");
    describe_counter!(COST_GAPS_TOTAL, "Call sites charged the default cost");
    describe_counter!(LOAD_FAILURES_TOTAL, "Programs rejected by the loader");
    describe_counter!(EVENTS_DROPPED_TOTAL, "Events lost to a full event queue");
}

pub fn record_turn(outcome: &'static str, budget_used: u64) {
    counter!(TURNS_TOTAL, "outcome" => outcome).increment(1);
    histogram!(BUDGET_USED).record(budget_used as f64);
}

pub fn record_violation(code: &'static str) {
    counter!(VIOLATIONS_TOTAL, "code" => code).increment(1);
}

pub fn record_output(team: &'static str, bytes: usize) {
    counter!(OUTPUT_BYTES_TOTAL, "team" => team).increment(bytes as u64);
}

pub fn record_truncation(team: &'static str) {
    counter!(OUTPUT_TRUNCATIONS_TOTAL, "team" => team).increment(1);
}

pub fn record_cost_gap() {
    counter!(COST_GAPS_TOTAL).increment(1);
}

pub fn record_load_failure() {
    counter!(LOAD_FAILURES_TOTAL).increment(1);
}

pub fn record_event_dropped() {
    counter!(EVENTS_DROPPED_TOTAL).increment(1);
}
