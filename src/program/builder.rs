// src/program/builder.rs
//! Fluent construction of programs
//!
//! Used by tests, benchmarks and hosts that generate players in code.

use crate::program::ir::{BinOp, ClassDef, Instr, MethodDef, Program};

/// Builds a [`Program`]
pub struct ProgramBuilder {
    program: Program,
}

impl ProgramBuilder {
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            program: Program {
                package: package.into(),
                classes: Vec::new(),
            },
        }
    }

    /// Add a class
    pub fn class(mut self, name: impl Into<String>, f: impl FnOnce(&mut ClassBuilder)) -> Self {
        let mut class = ClassBuilder {
            class: ClassDef {
                name: name.into(),
                statics: Vec::new(),
                methods: Vec::new(),
            },
        };
        f(&mut class);
        self.program.classes.push(class.class);
        self
    }

    pub fn build(self) -> Program {
        self.program
    }
}

/// Builds one [`ClassDef`]
pub struct ClassBuilder {
    class: ClassDef,
}

impl ClassBuilder {
    pub fn static_field(&mut self, name: impl Into<String>) -> &mut Self {
        self.class.statics.push(name.into());
        self
    }

    /// Add a method with `params` parameters and `locals` total slots
    pub fn method(
        &mut self,
        name: impl Into<String>,
        params: u16,
        locals: u16,
        f: impl FnOnce(&mut MethodBuilder),
    ) -> &mut Self {
        let mut method = MethodBuilder { code: Vec::new() };
        f(&mut method);
        self.class.methods.push(MethodDef {
            name: name.into(),
            params,
            locals: locals.max(params),
            code: method.code,
        });
        self
    }
}

/// Appends instructions to a method body
pub struct MethodBuilder {
    code: Vec<Instr>,
}

impl MethodBuilder {
    /// Index the next instruction will occupy
    pub fn here(&self) -> usize {
        self.code.len()
    }

    pub fn instr(&mut self, instr: Instr) -> &mut Self {
        self.code.push(instr);
        self
    }

    pub fn push_int(&mut self, value: i64) -> &mut Self {
        self.instr(Instr::PushInt { value })
    }

    pub fn push_str(&mut self, value: impl Into<String>) -> &mut Self {
        self.instr(Instr::PushStr {
            value: value.into(),
        })
    }

    pub fn push_unit(&mut self) -> &mut Self {
        self.instr(Instr::PushUnit)
    }

    pub fn load(&mut self, slot: u16) -> &mut Self {
        self.instr(Instr::Load { slot })
    }

    pub fn store(&mut self, slot: u16) -> &mut Self {
        self.instr(Instr::Store { slot })
    }

    pub fn get_static(&mut self, class: &str, field: &str) -> &mut Self {
        self.instr(Instr::GetStatic {
            class: class.to_string(),
            field: field.to_string(),
        })
    }

    pub fn put_static(&mut self, class: &str, field: &str) -> &mut Self {
        self.instr(Instr::PutStatic {
            class: class.to_string(),
            field: field.to_string(),
        })
    }

    pub fn pop(&mut self) -> &mut Self {
        self.instr(Instr::Pop)
    }

    pub fn dup(&mut self) -> &mut Self {
        self.instr(Instr::Dup)
    }

    pub fn binary(&mut self, op: BinOp) -> &mut Self {
        self.instr(Instr::Binary { op })
    }

    pub fn jump(&mut self, target: usize) -> &mut Self {
        self.instr(Instr::Jump { target })
    }

    pub fn jump_if_false(&mut self, target: usize) -> &mut Self {
        self.instr(Instr::JumpIfFalse { target })
    }

    pub fn invoke(&mut self, owner: &str, name: &str, argc: u8) -> &mut Self {
        self.instr(Instr::invoke(owner, name, argc))
    }

    pub fn new_object(&mut self, class: &str) -> &mut Self {
        self.instr(Instr::New {
            class: class.to_string(),
        })
    }

    pub fn get_field(&mut self, field: &str) -> &mut Self {
        self.instr(Instr::GetField {
            field: field.to_string(),
        })
    }

    pub fn put_field(&mut self, field: &str) -> &mut Self {
        self.instr(Instr::PutField {
            field: field.to_string(),
        })
    }

    pub fn new_array(&mut self) -> &mut Self {
        self.instr(Instr::NewArray)
    }

    pub fn make_closure(&mut self, class: &str, method: &str, captures: u8) -> &mut Self {
        self.instr(Instr::MakeClosure {
            class: class.to_string(),
            method: method.to_string(),
            captures,
        })
    }

    pub fn invoke_closure(&mut self, argc: u8) -> &mut Self {
        self.instr(Instr::InvokeClosure { argc })
    }

    pub fn ret(&mut self) -> &mut Self {
        self.instr(Instr::Return)
    }

    /// `count` no-op instruction pairs (push then pop), `2 * count` instructions
    pub fn filler(&mut self, count: usize) -> &mut Self {
        for _ in 0..count {
            self.push_unit().pop();
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_layout() {
        let program = ProgramBuilder::new("team")
            .class("RobotPlayer", |c| {
                c.static_field("counter")
                    .method("turn", 0, 0, |m| {
                        m.filler(3).ret();
                    })
                    .method("helper", 2, 1, |m| {
                        m.load(1).ret();
                    });
            })
            .build();

        let class = program.class("RobotPlayer").unwrap();
        assert_eq!(class.statics, vec!["counter"]);
        assert_eq!(class.method("turn").unwrap().code.len(), 7);
        // Locals never fewer than params
        assert_eq!(class.method("helper").unwrap().locals, 2);
        assert_eq!(program.instruction_count(), 9);
    }
}
