// src/runtime/value.rs
//! Guest values
//!
//! Heap objects live in the actor's own arena and are referenced by index,
//! so values are plain data and every actor is `Send`.

use std::fmt;
use std::sync::Arc;

/// Index of a cell in an actor's heap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeapRef(pub u32);

/// A value on the operand stack, in a local, static, field or array slot
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Value {
    #[default]
    Unit,
    Int(i64),
    Str(Arc<str>),
    Ref(HeapRef),
}

impl Value {
    pub fn str(s: impl AsRef<str>) -> Self {
        Value::Str(Arc::from(s.as_ref()))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Unit => "unit",
            Value::Int(_) => "int",
            Value::Str(_) => "string",
            Value::Ref(_) => "reference",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_heap_ref(&self) -> Option<HeapRef> {
        match self {
            Value::Ref(r) => Some(*r),
            _ => None,
        }
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, Value::Unit)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Int(v as i64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

/// Text form of non-reference values; references render through the
/// actor's identity hasher instead
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => f.write_str("null"),
            Value::Int(v) => write!(f, "{}", v),
            Value::Str(s) => f.write_str(s),
            Value::Ref(r) => write!(f, "ref#{}", r.0),
        }
    }
}
