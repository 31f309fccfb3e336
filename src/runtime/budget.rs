// src/runtime/budget.rs
//! Per-turn execution budget
//!
//! Each actor owns one [`BudgetCounter`]. It is reset to the role's limit at
//! the start of every turn, decremented by `Charge` ops, and never carries
//! anything over between turns. Debug sections run free.

use crate::runtime::fault::ProgramFault;
use crate::runtime::team::RobotType;
use crate::utils::config::SandboxSettings;
use serde::{Deserialize, Serialize};

/// Per-role turn budgets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetLimits {
    pub enlightenment_center: u32,
    pub politician: u32,
    pub slanderer: u32,
    pub muckraker: u32,
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self::from_settings(&SandboxSettings::default())
    }
}

impl BudgetLimits {
    pub fn from_settings(settings: &SandboxSettings) -> Self {
        Self {
            enlightenment_center: settings.enlightenment_center_budget,
            politician: settings.politician_budget,
            slanderer: settings.slanderer_budget,
            muckraker: settings.muckraker_budget,
        }
    }

    /// Same budget for every role
    pub fn uniform(budget: u32) -> Self {
        Self {
            enlightenment_center: budget,
            politician: budget,
            slanderer: budget,
            muckraker: budget,
        }
    }

    pub fn for_role(&self, role: RobotType) -> u32 {
        match role {
            RobotType::EnlightenmentCenter => self.enlightenment_center,
            RobotType::Politician => self.politician,
            RobotType::Slanderer => self.slanderer,
            RobotType::Muckraker => self.muckraker,
        }
    }

    /// Validate budgets
    pub fn validate(&self) -> Result<(), String> {
        for role in RobotType::ALL {
            if self.for_role(role) == 0 {
                return Err(format!("{} budget cannot be 0", role));
            }
        }
        Ok(())
    }
}

/// Result of a charge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charged {
    Continue,
    Exhausted,
}

/// Countdown for one actor's current turn
#[derive(Debug, Clone, Default)]
pub struct BudgetCounter {
    limit: u32,
    remaining: i64,
    deferred: i64,
    debug_depth: u32,
}

impl BudgetCounter {
    pub fn new(limit: u32) -> Self {
        let mut counter = Self::default();
        counter.reset(limit);
        counter
    }

    /// Start a new turn with a full budget
    pub fn reset(&mut self, limit: u32) {
        self.limit = limit;
        self.remaining = limit as i64;
        self.deferred = 0;
        self.debug_depth = 0;
    }

    /// Apply a charge plus anything deferred since the last one
    pub fn charge(&mut self, cost: u32) -> Charged {
        let deferred = std::mem::take(&mut self.deferred);
        if self.debug_depth > 0 {
            return Charged::Continue;
        }

        self.remaining = self
            .remaining
            .saturating_sub(cost as i64)
            .saturating_sub(deferred);

        if self.remaining <= 0 {
            Charged::Exhausted
        } else {
            Charged::Continue
        }
    }

    /// Queue a charge to be applied at the next `charge`
    pub fn defer(&mut self, amount: i64) {
        if amount > 0 && self.debug_depth == 0 {
            self.deferred = self.deferred.saturating_add(amount);
        }
    }

    pub fn enter_debug(&mut self) {
        self.debug_depth += 1;
    }

    pub fn exit_debug(&mut self) -> Result<(), ProgramFault> {
        self.debug_depth = self
            .debug_depth
            .checked_sub(1)
            .ok_or(ProgramFault::DebugUnderflow)?;
        Ok(())
    }

    pub fn in_debug(&self) -> bool {
        self.debug_depth > 0
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Raw remaining count; may be negative after the final charge
    pub fn remaining(&self) -> i64 {
        self.remaining
    }

    /// Remaining budget as the guest sees it
    pub fn left(&self) -> i64 {
        self.remaining.max(0)
    }

    /// Units consumed this turn; can exceed the limit by the last charge
    pub fn used(&self) -> u64 {
        (self.limit as i64).saturating_sub(self.remaining).max(0) as u64
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining <= 0
    }
}
