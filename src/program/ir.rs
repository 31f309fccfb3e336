// src/program/ir.rs
//! Source form of a team's compiled program
//!
//! A program is a package of classes; each class owns static fields and
//! methods; each method body is a flat list of stack-machine instructions
//! whose jump targets are absolute instruction indices.
//!
//! This is the form teams submit. It is never executed directly: the
//! [`Rewriter`](crate::instrumentation::rewriter::Rewriter) turns it into
//! metered [`Op`](crate::instrumentation::rewriter::Op)s first.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of an operation: declaring type plus operation name
///
/// Displayed and parsed as `Owner.name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpRef {
    pub owner: String,
    pub name: String,
}

impl OpRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Parse `Owner.name`; the split happens at the last dot so owners may be
    /// dotted (`invoke.MethodHandles.lookup`)
    pub fn parse(s: &str) -> Option<Self> {
        let (owner, name) = s.rsplit_once('.')?;
        if owner.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(owner, name))
    }
}

impl fmt::Display for OpRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner, self.name)
    }
}

/// A team's compiled program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    /// Team package name, used in diagnostics only
    pub package: String,

    /// Classes in declaration order
    pub classes: Vec<ClassDef>,
}

impl Program {
    pub fn class(&self, name: &str) -> Option<&ClassDef> {
        self.classes.iter().find(|c| c.name == name)
    }

    /// Total instruction count across all methods
    pub fn instruction_count(&self) -> usize {
        self.classes
            .iter()
            .flat_map(|c| c.methods.iter())
            .map(|m| m.code.len())
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDef {
    pub name: String,

    /// Static field names; each actor gets its own copy, initialized to unit
    #[serde(default)]
    pub statics: Vec<String>,

    pub methods: Vec<MethodDef>,
}

impl ClassDef {
    pub fn method(&self, name: &str) -> Option<&MethodDef> {
        self.methods.iter().find(|m| m.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDef {
    pub name: String,

    /// Parameters occupy local slots `0..params`
    #[serde(default)]
    pub params: u16,

    /// Total local slots, parameters included
    #[serde(default)]
    pub locals: u16,

    pub code: Vec<Instr>,
}

impl MethodDef {
    /// Name of the per-class static initializer
    pub const STATIC_INIT: &'static str = "<clinit>";

    /// Prefix marking debug methods
    pub const DEBUG_PREFIX: &'static str = "debug_";

    pub fn is_debug(&self) -> bool {
        self.name.starts_with(Self::DEBUG_PREFIX)
    }
}

/// Binary operators on integers (`Eq`/`Ne` compare any values)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// One source instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "instr", rename_all = "snake_case")]
pub enum Instr {
    PushInt { value: i64 },
    PushStr { value: String },
    PushUnit,
    Load { slot: u16 },
    Store { slot: u16 },
    GetStatic { class: String, field: String },
    PutStatic { class: String, field: String },
    Pop,
    Dup,
    Binary { op: BinOp },
    Not,
    Jump { target: usize },
    JumpIfFalse { target: usize },

    /// Call a team method or an external operation; always pushes one result
    Invoke { owner: String, name: String, argc: u8 },

    New { class: String },
    GetField { field: String },
    PutField { field: String },
    NewArray,
    ArrayLoad,
    ArrayStore,
    ArrayLength,

    /// Capture `captures` stack values into a closure over a team method
    MakeClosure { class: String, method: String, captures: u8 },
    InvokeClosure { argc: u8 },

    Return,
}

impl Instr {
    pub fn invoke(owner: impl Into<String>, name: impl Into<String>, argc: u8) -> Self {
        Instr::Invoke {
            owner: owner.into(),
            name: name.into(),
            argc,
        }
    }

    /// Jump target, if this instruction branches
    pub fn jump_target(&self) -> Option<usize> {
        match self {
            Instr::Jump { target } | Instr::JumpIfFalse { target } => Some(*target),
            _ => None,
        }
    }
}
