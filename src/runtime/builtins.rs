// src/runtime/builtins.rs
//! Runtime library operations implemented inside the sandbox
//!
//! These resolve at rewrite time and never reach the host. Their budget
//! costs come from the cost table like any other external operation.

use crate::program::ir::OpRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    MathAbs,
    MathMin,
    MathMax,
    /// Seeded per actor
    MathRandom,
    RandomNextInt,
    StringConcat,
    StringLength,
    StringValueOf,
    ObjectToString,
    /// Framed, quota-governed output
    SystemPrint,
    SystemPrintln,
    /// Ambient output, discarded
    StdoutPrint,
    StdoutPrintln,
    ClockYield,
    ClockGetBytecodesLeft,
    ClockGetBytecodeNum,
}

const TABLE: &[(&str, &str, Builtin, u8)] = &[
    ("Math", "abs", Builtin::MathAbs, 1),
    ("Math", "min", Builtin::MathMin, 2),
    ("Math", "max", Builtin::MathMax, 2),
    ("Math", "random", Builtin::MathRandom, 0),
    ("Random", "nextInt", Builtin::RandomNextInt, 1),
    ("String", "concat", Builtin::StringConcat, 2),
    ("String", "length", Builtin::StringLength, 1),
    ("String", "valueOf", Builtin::StringValueOf, 1),
    ("Object", "toString", Builtin::ObjectToString, 1),
    ("System", "print", Builtin::SystemPrint, 1),
    ("System", "println", Builtin::SystemPrintln, 1),
    ("Stdout", "print", Builtin::StdoutPrint, 1),
    ("Stdout", "println", Builtin::StdoutPrintln, 1),
    ("Clock", "yield", Builtin::ClockYield, 0),
    ("Clock", "getBytecodesLeft", Builtin::ClockGetBytecodesLeft, 0),
    ("Clock", "getBytecodeNum", Builtin::ClockGetBytecodeNum, 0),
];

/// Owners implemented by the runtime library; team classes may not reuse them
pub const LIBRARY_OWNERS: &[&str] = &["Math", "Random", "String", "Object", "System", "Stdout", "Clock"];

impl Builtin {
    pub fn resolve(op: &OpRef) -> Option<Builtin> {
        TABLE
            .iter()
            .find(|(owner, name, _, _)| *owner == op.owner && *name == op.name)
            .map(|(_, _, builtin, _)| *builtin)
    }

    pub fn arity(self) -> u8 {
        TABLE
            .iter()
            .find(|(_, _, b, _)| *b == self)
            .map(|(_, _, _, arity)| *arity)
            .unwrap_or(0)
    }

    pub fn op_ref(self) -> OpRef {
        TABLE
            .iter()
            .find(|(_, _, b, _)| *b == self)
            .map(|(owner, name, _, _)| OpRef::new(*owner, *name))
            .unwrap_or_else(|| OpRef::new("?", "?"))
    }

    pub fn is_library_owner(owner: &str) -> bool {
        LIBRARY_OWNERS.contains(&owner)
    }
}

/// Polynomial string hash over UTF-16 units, deterministic across runs
pub fn string_hash(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(c as i32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve() {
        assert_eq!(
            Builtin::resolve(&OpRef::new("Clock", "yield")),
            Some(Builtin::ClockYield)
        );
        assert_eq!(Builtin::resolve(&OpRef::new("RobotController", "move")), None);
        assert_eq!(Builtin::MathMin.arity(), 2);
        assert_eq!(Builtin::SystemPrintln.op_ref().to_string(), "System.println");
    }

    #[test]
    fn test_every_builtin_has_a_default_cost() {
        let table = crate::cost::CostTable::builtin();
        for (owner, name, _, _) in TABLE {
            assert!(
                table.contains(&OpRef::new(*owner, *name)),
                "{}.{} missing from cost table",
                owner,
                name
            );
        }
    }

    #[test]
    fn test_string_hash() {
        assert_eq!(string_hash(""), 0);
        assert_eq!(string_hash("a"), 97);
        assert_eq!(string_hash("hello"), 99_162_322);
    }
}
