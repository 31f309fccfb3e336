// src/program/mod.rs
//! Team programs: the instruction set, its encoding and a builder

pub mod builder;
pub mod codec;
pub mod ir;

pub use builder::ProgramBuilder;
pub use ir::{BinOp, ClassDef, Instr, MethodDef, OpRef, Program};
