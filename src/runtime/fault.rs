// src/runtime/fault.rs
//! Guest runtime faults
//!
//! A fault ends the current turn with `TurnOutcome::Errored`; the actor
//! itself survives and starts fresh next round.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgramFault {
    #[error("division by zero")]
    DivisionByZero,

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("operand stack underflow")]
    StackUnderflow,

    #[error("operand stack overflow")]
    StackOverflow,

    #[error("call depth limit exceeded")]
    CallDepthExceeded,

    #[error("heap exhausted")]
    HeapExhausted,

    #[error("string of {len} bytes exceeds the {limit}-byte string allowance")]
    StringTooLong { len: usize, limit: usize },

    #[error("array index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: i64, len: usize },

    #[error("illegal array size {size}")]
    IllegalArraySize { size: i64 },

    #[error("illegal argument to {operation}: {message}")]
    IllegalArgument { operation: String, message: String },

    #[error("closure expects {expected} arguments, got {found}")]
    ClosureArity { expected: u16, found: u16 },

    #[error("dangling reference")]
    InvalidReference,

    #[error("unbalanced debug section")]
    DebugUnderflow,

    #[error("debug methods ran more than {limit} ops in one turn")]
    DebugLimitExceeded { limit: u64 },

    #[error("host operation {operation} failed: {message}")]
    Host { operation: String, message: String },
}

impl ProgramFault {
    pub fn type_mismatch(expected: &str, found: &str) -> Self {
        ProgramFault::TypeMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    /// Stable label for metrics
    pub fn code(&self) -> &'static str {
        match self {
            ProgramFault::DivisionByZero => "division_by_zero",
            ProgramFault::TypeMismatch { .. } => "type_mismatch",
            ProgramFault::StackUnderflow => "stack_underflow",
            ProgramFault::StackOverflow => "stack_overflow",
            ProgramFault::CallDepthExceeded => "call_depth_exceeded",
            ProgramFault::HeapExhausted => "heap_exhausted",
            ProgramFault::StringTooLong { .. } => "string_too_long",
            ProgramFault::IndexOutOfBounds { .. } => "index_out_of_bounds",
            ProgramFault::IllegalArraySize { .. } => "illegal_array_size",
            ProgramFault::IllegalArgument { .. } => "illegal_argument",
            ProgramFault::ClosureArity { .. } => "closure_arity",
            ProgramFault::InvalidReference => "invalid_reference",
            ProgramFault::DebugUnderflow => "debug_underflow",
            ProgramFault::DebugLimitExceeded { .. } => "debug_limit_exceeded",
            ProgramFault::Host { .. } => "host",
        }
    }
}
