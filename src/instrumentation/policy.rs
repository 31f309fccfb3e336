// src/instrumentation/policy.rs
//! Deny/allow policy keyed by operation identity
//!
//! Lookup order: exact entries first, then owner/name patterns by descending
//! priority. Operations no rule matches are allowed.
//!
//! Patterns are `*` (anything), `prefix.*` (owners under a dotted prefix),
//! or an exact name.

use crate::program::ir::OpRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info};

/// Owners reserved for host internals; referencing them fails the load
pub const RESERVED_OWNERS: &[&str] = &["Sandbox", "Monitor"];

/// Package prefixes team classes may not be declared in
pub const RESERVED_PACKAGES: &[&str] = &["sandbox.", "arena.", "instrumented."];

/// Why a call was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationCode {
    NondeterministicClock,
    EnvironmentAccess,
    ReflectiveLookup,
    StringInterning,
    ThreadBlocking,
    FileOutput,
    DynamicInvocation,
}

impl ViolationCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ViolationCode::NondeterministicClock => "NONDETERMINISTIC_CLOCK",
            ViolationCode::EnvironmentAccess => "ENVIRONMENT_ACCESS",
            ViolationCode::ReflectiveLookup => "REFLECTIVE_LOOKUP",
            ViolationCode::StringInterning => "STRING_INTERNING",
            ViolationCode::ThreadBlocking => "THREAD_BLOCKING",
            ViolationCode::FileOutput => "FILE_OUTPUT",
            ViolationCode::DynamicInvocation => "DYNAMIC_INVOCATION",
        }
    }
}

impl fmt::Display for ViolationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A denied call: what was called and why it was refused
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ViolationCause {
    pub code: ViolationCode,
    pub operation: OpRef,
}

impl fmt::Display for ViolationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Illegal call to {} ({})", self.operation, self.code)
    }
}

/// Deterministic stand-ins for calls that would leak process state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Redirect {
    /// Seeded per-actor identity hash
    IdentityHash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Deny(ViolationCode),
    Redirect(Redirect),
}

/// Name matcher for one side of an operation identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    Any,
    Prefix(String),
    Exact(String),
}

impl Pattern {
    pub fn parse(s: &str) -> Self {
        if s == "*" {
            Pattern::Any
        } else if let Some(prefix) = s.strip_suffix('*') {
            Pattern::Prefix(prefix.to_string())
        } else {
            Pattern::Exact(s.to_string())
        }
    }

    pub fn matches(&self, s: &str) -> bool {
        match self {
            Pattern::Any => true,
            Pattern::Prefix(prefix) => s.starts_with(prefix.as_str()),
            Pattern::Exact(exact) => s == exact,
        }
    }
}

/// Policy rule
#[derive(Debug, Clone)]
pub struct PolicyRule {
    pub owner: Pattern,
    pub name: Pattern,
    pub decision: PolicyDecision,

    /// Higher is checked first among pattern rules
    pub priority: u32,
}

impl PolicyRule {
    pub fn new(owner: &str, name: &str, decision: PolicyDecision) -> Self {
        Self {
            owner: Pattern::parse(owner),
            name: Pattern::parse(name),
            decision,
            priority: 0,
        }
    }

    pub fn deny(owner: &str, name: &str, code: ViolationCode) -> Self {
        Self::new(owner, name, PolicyDecision::Deny(code))
    }

    pub fn allow(owner: &str, name: &str) -> Self {
        Self::new(owner, name, PolicyDecision::Allow)
    }

    pub fn redirect(owner: &str, name: &str, redirect: Redirect) -> Self {
        Self::new(owner, name, PolicyDecision::Redirect(redirect))
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn matches(&self, op: &OpRef) -> bool {
        self.owner.matches(&op.owner) && self.name.matches(&op.name)
    }
}

/// Policy table consulted by the rewriter for every external call
#[derive(Debug, Clone, Default)]
pub struct SandboxPolicy {
    exact: HashMap<OpRef, PolicyDecision>,
    patterns: Vec<PolicyRule>,
}

impl SandboxPolicy {
    /// Empty policy, allowing everything
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard denylist plus the identity-hash redirects
    pub fn with_defaults() -> Self {
        use ViolationCode::*;

        let rules = vec![
            // Clocks and process identity
            PolicyRule::deny("System", "currentTimeMillis", NondeterministicClock),
            PolicyRule::deny("System", "nanoTime", NondeterministicClock),
            PolicyRule::deny("Instant", "now", NondeterministicClock),
            PolicyRule::deny("Runtime", "*", EnvironmentAccess),
            PolicyRule::deny("System", "getenv", EnvironmentAccess),
            PolicyRule::deny("System", "getProperty", EnvironmentAccess),
            PolicyRule::deny("System", "getProperties", EnvironmentAccess),
            PolicyRule::deny("System", "setProperty", EnvironmentAccess),
            PolicyRule::deny("System", "exit", EnvironmentAccess),
            PolicyRule::deny("System", "gc", EnvironmentAccess),
            PolicyRule::deny("System", "load", EnvironmentAccess),
            PolicyRule::deny("System", "loadLibrary", EnvironmentAccess),
            PolicyRule::deny("System", "setOut", EnvironmentAccess),
            PolicyRule::deny("System", "setErr", EnvironmentAccess),
            // Reflection by name; assertion status is harmless
            PolicyRule::deny("Class", "*", ReflectiveLookup),
            PolicyRule::allow("Class", "desiredAssertionStatus"),
            PolicyRule::deny("reflect.*", "*", ReflectiveLookup).with_priority(10),
            PolicyRule::deny("invoke.*", "*", DynamicInvocation).with_priority(10),
            PolicyRule::deny("String", "intern", StringInterning),
            // Blocking
            PolicyRule::deny("Object", "wait", ThreadBlocking),
            PolicyRule::deny("Object", "notify", ThreadBlocking),
            PolicyRule::deny("Object", "notifyAll", ThreadBlocking),
            PolicyRule::deny("Thread", "*", ThreadBlocking),
            // File-backed output
            PolicyRule::deny("PrintStream", "new", FileOutput),
            PolicyRule::deny("FileOutputStream", "*", FileOutput),
            PolicyRule::deny("FileWriter", "*", FileOutput),
            // Identity hashes become seeded
            PolicyRule::redirect("Object", "hashCode", Redirect::IdentityHash),
            PolicyRule::redirect("System", "identityHashCode", Redirect::IdentityHash),
        ];

        let mut policy = Self::new();
        for rule in rules {
            policy.add_rule(rule);
        }
        info!(
            "Sandbox policy ready: {} exact rules, {} pattern rules",
            policy.exact.len(),
            policy.patterns.len()
        );
        policy
    }

    /// Add a rule; exact rules replace earlier exact rules for the same operation
    pub fn add_rule(&mut self, rule: PolicyRule) {
        match (&rule.owner, &rule.name) {
            (Pattern::Exact(owner), Pattern::Exact(name)) => {
                self.exact
                    .insert(OpRef::new(owner.as_str(), name.as_str()), rule.decision);
            }
            _ => {
                self.patterns.push(rule);
                // Stable: equal priorities keep insertion order
                self.patterns.sort_by(|a, b| b.priority.cmp(&a.priority));
            }
        }
    }

    pub fn with_rule(mut self, rule: PolicyRule) -> Self {
        self.add_rule(rule);
        self
    }

    /// Decide what happens to a call of `op`
    pub fn classify(&self, op: &OpRef) -> PolicyDecision {
        if let Some(decision) = self.exact.get(op) {
            return *decision;
        }

        for rule in &self.patterns {
            if rule.matches(op) {
                debug!(
                    "{} matched pattern rule {:?}.{:?}",
                    op, rule.owner, rule.name
                );
                return rule.decision;
            }
        }

        PolicyDecision::Allow
    }

    /// Whether a call of `op` traps
    pub fn is_denied(&self, op: &OpRef) -> bool {
        matches!(self.classify(op), PolicyDecision::Deny(_))
    }

    pub fn rule_count(&self) -> usize {
        self.exact.len() + self.patterns.len()
    }

    /// Whether `owner` names host internals
    pub fn is_reserved_owner(owner: &str) -> bool {
        RESERVED_OWNERS.contains(&owner)
            || RESERVED_PACKAGES.iter().any(|p| owner.starts_with(p))
    }

    /// Whether a team may declare a class with this name
    pub fn is_legal_class_name(name: &str) -> bool {
        !name.is_empty() && !Self::is_reserved_owner(name) && !name.contains(char::is_whitespace)
    }

    /// Listing of every rule, exact rules sorted by operation
    pub fn export(&self) -> String {
        let mut exact: Vec<_> = self.exact.iter().collect();
        exact.sort_by(|a, b| a.0.cmp(b.0));

        let mut output = String::from("# Sandbox policy\n\n");
        for (op, decision) in exact {
            output.push_str(&format!("{} -> {:?}\n", op, decision));
        }
        for rule in &self.patterns {
            output.push_str(&format!(
                "{:?}.{:?} -> {:?} (priority {})\n",
                rule.owner, rule.name, rule.decision, rule.priority
            ));
        }
        output
    }
}
