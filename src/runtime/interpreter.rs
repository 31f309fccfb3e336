// src/runtime/interpreter.rs
//! Metered op interpreter
//!
//! Executes an [`InstrumentedProgram`] for one actor. All limits are enforced
//! here: the turn budget through `Charge` ops, and stack depth, call depth,
//! heap size, retained string bytes and free debug work as guest faults.
//!
//! Building a string costs one extra unit per `string_bytes_per_unit` bytes,
//! deferred to the next charge like array allocation.
//!
//! ```text
//! fetch op ─► Charge? ─► budget ≤ 0 ─► Stop::Exhausted
//!    │           └──────► continue
//!    ├─► Trap ─────────────────────► Stop::Violated
//!    ├─► Clock.yield ──────────────► Stop::Yielded
//!    ├─► CallHost ─► HostApi::invoke
//!    └─► Return from entry ────────► Ok(value)
//! ```

use crate::instrumentation::policy::ViolationCause;
use crate::instrumentation::rewriter::{InstrumentedProgram, MethodId, Op};
use crate::output::PrintTarget;
use crate::program::ir::BinOp;
use crate::recording::profiler::Profiler;
use crate::runtime::actor::ActorInfo;
use crate::runtime::budget::{BudgetCounter, Charged};
use crate::runtime::builtins::{string_hash, Builtin};
use crate::runtime::fault::ProgramFault;
use crate::runtime::heap::{splitmix64, Cell, Heap, IdentityHasher};
use crate::runtime::host::HostApi;
use crate::runtime::value::{HeapRef, Value};
use crate::utils::config::SandboxSettings;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Values inspected per budget unit when recounting retained strings
const SCAN_VALUES_PER_UNIT: usize = 64;

/// Structural limits for one actor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecLimits {
    pub max_stack_depth: usize,
    pub max_call_depth: usize,
    pub max_heap_cells: usize,
    pub max_string_bytes: usize,
    pub string_bytes_per_unit: u32,
    pub max_debug_ops: u64,
}

impl Default for ExecLimits {
    fn default() -> Self {
        Self::from(&SandboxSettings::default())
    }
}

impl From<&SandboxSettings> for ExecLimits {
    fn from(settings: &SandboxSettings) -> Self {
        Self {
            max_stack_depth: settings.max_stack_depth,
            max_call_depth: settings.max_call_depth,
            max_heap_cells: settings.max_heap_cells,
            max_string_bytes: settings.max_string_bytes,
            string_bytes_per_unit: settings.string_bytes_per_unit.max(1),
            max_debug_ops: settings.max_debug_ops,
        }
    }
}

/// Why execution stopped before the entry point returned
#[derive(Debug, Clone, PartialEq)]
pub enum Stop {
    Yielded,
    Exhausted,
    Violated(ViolationCause),
    Fault(ProgramFault),
}

impl From<ProgramFault> for Stop {
    fn from(fault: ProgramFault) -> Self {
        Stop::Fault(fault)
    }
}

/// Guest state that survives between turns
#[derive(Debug, Clone)]
pub struct ActorState {
    pub statics: Vec<Value>,
    pub heap: Heap,
    rng: StdRng,
    identity: IdentityHasher,
    next_initializer: usize,
    /// Upper bound on retained string bytes, recounted when it hits the limit
    string_bytes: usize,
}

impl ActorState {
    pub fn new(program: &InstrumentedProgram, seed: u64, limits: &ExecLimits) -> Self {
        Self {
            statics: vec![Value::Unit; program.static_count()],
            heap: Heap::new(limits.max_heap_cells),
            rng: StdRng::seed_from_u64(seed),
            identity: IdentityHasher::new(splitmix64(seed)),
            next_initializer: 0,
            string_bytes: 0,
        }
    }

    pub fn string_bytes(&self) -> usize {
        self.string_bytes
    }

    /// Whether every static initializer has completed
    pub fn is_initialized(&self, program: &InstrumentedProgram) -> bool {
        self.next_initializer >= program.static_initializers().count()
    }
}

/// Where the two guest print channels go
#[derive(Clone, Copy)]
pub struct Outputs<'a> {
    /// `System.print`, framed and governed
    pub system: &'a dyn PrintTarget,
    /// `Stdout.print`, normally the null sink
    pub ambient: &'a dyn PrintTarget,
}

#[derive(Debug)]
struct Frame {
    method: MethodId,
    pc: usize,
    locals_base: usize,
    stack_base: usize,
}

pub struct Interpreter<'a> {
    program: &'a InstrumentedProgram,
    state: &'a mut ActorState,
    budget: &'a mut BudgetCounter,
    host: &'a mut dyn HostApi,
    actor: &'a ActorInfo,
    outputs: Outputs<'a>,
    limits: ExecLimits,
    stack: Vec<Value>,
    locals: Vec<Value>,
    frames: Vec<Frame>,
    executed: u64,
    debug_ops: u64,
    profiler: Option<&'a mut Profiler>,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        program: &'a InstrumentedProgram,
        state: &'a mut ActorState,
        budget: &'a mut BudgetCounter,
        host: &'a mut dyn HostApi,
        actor: &'a ActorInfo,
        outputs: Outputs<'a>,
        limits: ExecLimits,
    ) -> Self {
        Self {
            program,
            state,
            budget,
            host,
            actor,
            outputs,
            limits,
            stack: Vec::new(),
            locals: Vec::new(),
            frames: Vec::new(),
            executed: 0,
            debug_ops: 0,
            profiler: None,
        }
    }

    /// Record method entries and exits into `profiler`
    pub fn with_profiler(mut self, profiler: Option<&'a mut Profiler>) -> Self {
        self.profiler = profiler;
        self
    }

    /// Ops executed so far by this interpreter
    pub fn executed(&self) -> u64 {
        self.executed
    }

    /// Run static initializers that have not completed yet, in order
    pub fn run_initializers(&mut self) -> Result<(), Stop> {
        let pending: Vec<MethodId> = self
            .program
            .static_initializers()
            .skip(self.state.next_initializer)
            .collect();

        for method in pending {
            self.call(method, Vec::new())?;
            self.state.next_initializer += 1;
        }
        Ok(())
    }

    /// Call `method` on a fresh stack and run until it returns
    pub fn call(&mut self, method: MethodId, args: Vec<Value>) -> Result<Value, Stop> {
        self.stack.clear();
        self.locals.clear();
        self.frames.clear();

        for arg in args {
            self.push(arg)?;
        }
        self.push_frame(method)?;
        self.execute()
    }

    fn execute(&mut self) -> Result<Value, Stop> {
        let program = self.program;

        loop {
            let frame = match self.frames.last_mut() {
                Some(frame) => frame,
                None => return Ok(Value::Unit),
            };
            let op = match program.method(frame.method).code.get(frame.pc) {
                Some(op) => op,
                None => {
                    if let Some(value) = self.return_from_frame(Value::Unit)? {
                        return Ok(value);
                    }
                    continue;
                }
            };
            frame.pc += 1;
            self.executed += 1;

            if self.budget.in_debug() {
                self.debug_ops += 1;
                if self.debug_ops > self.limits.max_debug_ops {
                    return Err(ProgramFault::DebugLimitExceeded {
                        limit: self.limits.max_debug_ops,
                    }
                    .into());
                }
            }

            match op {
                Op::PushInt(v) => self.push(Value::Int(*v))?,
                Op::PushStr(s) => self.push(Value::Str(s.clone()))?,
                Op::PushUnit => self.push(Value::Unit)?,
                Op::Load(slot) => {
                    let value = self.local(*slot)?.clone();
                    self.push(value)?;
                }
                Op::Store(slot) => {
                    let value = self.pop()?;
                    *self.local(*slot)? = value;
                }
                Op::GetStatic(id) => {
                    let value = self
                        .state
                        .statics
                        .get(*id)
                        .cloned()
                        .ok_or(ProgramFault::InvalidReference)?;
                    self.push(value)?;
                }
                Op::PutStatic(id) => {
                    let value = self.pop()?;
                    let slot = self
                        .state
                        .statics
                        .get_mut(*id)
                        .ok_or(ProgramFault::InvalidReference)?;
                    *slot = value;
                }
                Op::Pop => {
                    self.pop()?;
                }
                Op::Dup => {
                    let value = self.peek()?.clone();
                    self.push(value)?;
                }
                Op::Binary(op) => self.binary(*op)?,
                Op::Not => {
                    let v = self.pop_int()?;
                    self.push(Value::from(v == 0))?;
                }
                Op::Jump(target) => self.jump(*target),
                Op::JumpIfFalse(target) => {
                    if self.pop_int()? == 0 {
                        self.jump(*target);
                    }
                }
                Op::Call(method) => self.push_frame(*method)?,
                Op::CallBuiltin(builtin) => self.builtin(*builtin)?,
                Op::CallHost { op, argc } => {
                    let args = self.pop_n(*argc as usize)?;
                    let operation = program.host_op(*op);
                    let value = self
                        .host
                        .invoke(self.actor, operation, &args)
                        .map_err(|e| ProgramFault::Host {
                            operation: operation.to_string(),
                            message: e.message,
                        })?;
                    if let Value::Ref(_) = value {
                        return Err(Stop::Fault(ProgramFault::Host {
                            operation: operation.to_string(),
                            message: "host returned a heap reference".to_string(),
                        }));
                    }
                    self.push(value)?;
                }
                Op::IdentityHash => {
                    let value = self.pop()?;
                    let hash = self.identity_hash(&value);
                    self.push(Value::Int(hash))?;
                }
                Op::New(class) => {
                    let r = self.state.heap.alloc(Cell::Object {
                        class: *class,
                        fields: BTreeMap::new(),
                    })?;
                    self.push(Value::Ref(r))?;
                }
                Op::GetField(name) => {
                    let r = self.pop_ref()?;
                    let value = match self.state.heap.get(r)? {
                        Cell::Object { fields, .. } => fields.get(name).cloned().unwrap_or_default(),
                        other => return Err(ProgramFault::type_mismatch("object", other.kind()).into()),
                    };
                    self.push(value)?;
                }
                Op::PutField(name) => {
                    let value = self.pop()?;
                    let r = self.pop_ref()?;
                    match self.state.heap.get_mut(r)? {
                        Cell::Object { fields, .. } => {
                            fields.insert(name.clone(), value);
                        }
                        other => return Err(ProgramFault::type_mismatch("object", other.kind()).into()),
                    }
                }
                Op::NewArray => {
                    let len = self.pop_int()?;
                    let r = self.state.heap.alloc_array(len)?;
                    self.push(Value::Ref(r))?;
                }
                Op::ArrayLoad => {
                    let index = self.pop_int()?;
                    let r = self.pop_ref()?;
                    let items = self.array(r)?;
                    let value = element_index(index, items.len()).map(|i| items[i].clone())?;
                    self.push(value)?;
                }
                Op::ArrayStore => {
                    let value = self.pop()?;
                    let index = self.pop_int()?;
                    let r = self.pop_ref()?;
                    let items = self.array_mut(r)?;
                    let i = element_index(index, items.len())?;
                    items[i] = value;
                }
                Op::ArrayLength => {
                    let r = self.pop_ref()?;
                    let len = self.array(r)?.len();
                    self.push(Value::Int(len as i64))?;
                }
                Op::MakeClosure { method, captures } => {
                    let captured = self.pop_n(*captures as usize)?;
                    let r = self.state.heap.alloc(Cell::Closure {
                        method: *method,
                        captured,
                    })?;
                    self.push(Value::Ref(r))?;
                }
                Op::InvokeClosure(argc) => self.invoke_closure(*argc)?,
                Op::Return => {
                    let value = if self.stack.len() > self.stack_floor() {
                        self.pop()?
                    } else {
                        Value::Unit
                    };
                    if let Some(value) = self.return_from_frame(value)? {
                        return Ok(value);
                    }
                }
                Op::Charge(cost) => {
                    if self.budget.charge(*cost) == Charged::Exhausted {
                        return Err(Stop::Exhausted);
                    }
                }
                Op::DeferArrayCharge => {
                    let len = match self.peek()? {
                        Value::Int(n) => *n,
                        other => return Err(ProgramFault::type_mismatch("int", other.type_name()).into()),
                    };
                    self.budget.defer(len.max(1));
                }
                Op::Trap(index) => {
                    return Err(Stop::Violated(program.violation(*index).clone()));
                }
                Op::DebugEnter => self.budget.enter_debug(),
                Op::DebugExit => self.budget.exit_debug()?,
                Op::Discard(argc) => {
                    self.pop_n(*argc as usize)?;
                    self.push(Value::Unit)?;
                }
            }
        }
    }

    fn builtin(&mut self, builtin: Builtin) -> Result<(), Stop> {
        let result = match builtin {
            Builtin::MathAbs => Value::Int(self.pop_int()?.wrapping_abs()),
            Builtin::MathMin => {
                let b = self.pop_int()?;
                let a = self.pop_int()?;
                Value::Int(a.min(b))
            }
            Builtin::MathMax => {
                let b = self.pop_int()?;
                let a = self.pop_int()?;
                Value::Int(a.max(b))
            }
            Builtin::MathRandom => Value::Int(self.state.rng.gen_range(0..(1i64 << 31))),
            Builtin::RandomNextInt => {
                let bound = self.pop_int()?;
                if bound <= 0 {
                    return Err(ProgramFault::IllegalArgument {
                        operation: builtin.op_ref().to_string(),
                        message: format!("bound must be positive, got {}", bound),
                    }
                    .into());
                }
                Value::Int(self.state.rng.gen_range(0..bound))
            }
            Builtin::StringConcat => {
                let b = self.pop()?;
                let a = self.pop()?;
                let head = self.render(&a)?;
                let tail = self.render(&b)?;
                self.reserve_string(head.len().saturating_add(tail.len()))?;
                let mut text = head;
                text.push_str(&tail);
                Value::str(text)
            }
            Builtin::StringLength => match self.pop()? {
                Value::Str(s) => Value::Int(s.encode_utf16().count() as i64),
                other => return Err(ProgramFault::type_mismatch("string", other.type_name()).into()),
            },
            Builtin::StringValueOf | Builtin::ObjectToString => match self.pop()? {
                Value::Str(s) => Value::Str(s),
                value => {
                    let text = self.render(&value)?;
                    self.reserve_string(text.len())?;
                    Value::str(text)
                }
            },
            Builtin::SystemPrint | Builtin::SystemPrintln | Builtin::StdoutPrint | Builtin::StdoutPrintln => {
                let value = self.pop()?;
                let text = self.render(&value)?;
                let target = match builtin {
                    Builtin::SystemPrint | Builtin::SystemPrintln => self.outputs.system,
                    _ => self.outputs.ambient,
                };
                match builtin {
                    Builtin::SystemPrintln | Builtin::StdoutPrintln => target.println(&text),
                    _ => target.print(&text),
                }
                Value::Unit
            }
            Builtin::ClockYield => return Err(Stop::Yielded),
            Builtin::ClockGetBytecodesLeft => Value::Int(self.budget.left()),
            Builtin::ClockGetBytecodeNum => Value::Int(self.budget.used() as i64),
        };
        self.push(result)?;
        Ok(())
    }

    fn binary(&mut self, op: BinOp) -> Result<(), ProgramFault> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let value = match op {
            BinOp::Eq => Value::from(lhs == rhs),
            BinOp::Ne => Value::from(lhs != rhs),
            _ => Value::Int(arith(op, expect_int(&lhs)?, expect_int(&rhs)?)?),
        };
        self.push(value)
    }

    fn invoke_closure(&mut self, argc: u8) -> Result<(), ProgramFault> {
        let args = self.pop_n(argc as usize)?;
        let r = self.pop_ref()?;
        let (method, captured) = match self.state.heap.get(r)? {
            Cell::Closure { method, captured } => (*method, captured.clone()),
            other => return Err(ProgramFault::type_mismatch("closure", other.kind())),
        };

        let expected = self.program.method(method).params;
        let found = (captured.len() + args.len()) as u16;
        if expected != found {
            return Err(ProgramFault::ClosureArity { expected, found });
        }

        for value in captured.into_iter().chain(args) {
            self.push(value)?;
        }
        self.push_frame(method)
    }

    fn push_frame(&mut self, method: MethodId) -> Result<(), ProgramFault> {
        if self.frames.len() >= self.limits.max_call_depth {
            return Err(ProgramFault::CallDepthExceeded);
        }

        let callee = self.program.method(method);
        let params = callee.params as usize;
        if self.stack.len() < self.stack_floor() + params {
            return Err(ProgramFault::StackUnderflow);
        }

        let locals_base = self.locals.len();
        let args_start = self.stack.len() - params;
        self.locals.extend(self.stack.drain(args_start..));
        self.locals
            .resize(locals_base + (callee.locals as usize).max(params), Value::Unit);

        self.frames.push(Frame {
            method,
            pc: 0,
            locals_base,
            stack_base: self.stack.len(),
        });

        if let Some(profiler) = self.profiler.as_deref_mut() {
            profiler.enter(self.program, method, self.budget.used());
        }
        Ok(())
    }

    /// Pop the current frame; returns the value once the outermost frame returns
    fn return_from_frame(&mut self, value: Value) -> Result<Option<Value>, ProgramFault> {
        let frame = self.frames.pop().ok_or(ProgramFault::StackUnderflow)?;
        self.stack.truncate(frame.stack_base);
        self.locals.truncate(frame.locals_base);

        if let Some(profiler) = self.profiler.as_deref_mut() {
            profiler.exit(self.budget.used());
        }

        if self.frames.is_empty() {
            return Ok(Some(value));
        }
        self.push(value)?;
        Ok(None)
    }

    /// Account for a string of `len` bytes about to be built
    fn reserve_string(&mut self, len: usize) -> Result<(), ProgramFault> {
        let limit = self.limits.max_string_bytes;
        if self.state.string_bytes.saturating_add(len) > limit {
            self.state.string_bytes = self.retained_string_bytes();
            if self.state.string_bytes.saturating_add(len) > limit {
                return Err(ProgramFault::StringTooLong { len, limit });
            }
        }
        self.state.string_bytes += len;
        self.budget
            .defer((len / self.limits.string_bytes_per_unit as usize) as i64);
        Ok(())
    }

    /// Bytes of distinct strings reachable from statics, heap, stack and locals
    fn retained_string_bytes(&mut self) -> usize {
        let mut seen = HashSet::new();
        let mut total = 0usize;
        let mut visited = 0usize;
        let mut count = |value: &Value| {
            visited += 1;
            if let Value::Str(s) = value {
                if seen.insert(Arc::as_ptr(s) as *const u8 as usize) {
                    total += s.len();
                }
            }
        };

        self.state.statics.iter().for_each(&mut count);
        self.stack.iter().for_each(&mut count);
        self.locals.iter().for_each(&mut count);
        self.state.heap.for_each_value(&mut count);

        self.budget.defer((visited / SCAN_VALUES_PER_UNIT) as i64);
        total
    }

    fn jump(&mut self, target: usize) {
        if let Some(frame) = self.frames.last_mut() {
            frame.pc = target;
        }
    }

    fn stack_floor(&self) -> usize {
        self.frames.last().map_or(0, |f| f.stack_base)
    }

    fn local(&mut self, slot: u16) -> Result<&mut Value, ProgramFault> {
        let base = self.frames.last().map_or(0, |f| f.locals_base);
        self.locals
            .get_mut(base + slot as usize)
            .ok_or(ProgramFault::InvalidReference)
    }

    fn push(&mut self, value: Value) -> Result<(), ProgramFault> {
        if self.stack.len() >= self.limits.max_stack_depth {
            return Err(ProgramFault::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, ProgramFault> {
        if self.stack.len() <= self.stack_floor() {
            return Err(ProgramFault::StackUnderflow);
        }
        self.stack.pop().ok_or(ProgramFault::StackUnderflow)
    }

    fn pop_n(&mut self, count: usize) -> Result<Vec<Value>, ProgramFault> {
        if self.stack.len() < self.stack_floor() + count {
            return Err(ProgramFault::StackUnderflow);
        }
        let start = self.stack.len() - count;
        Ok(self.stack.split_off(start))
    }

    fn peek(&self) -> Result<&Value, ProgramFault> {
        if self.stack.len() <= self.stack_floor() {
            return Err(ProgramFault::StackUnderflow);
        }
        self.stack.last().ok_or(ProgramFault::StackUnderflow)
    }

    fn pop_int(&mut self) -> Result<i64, ProgramFault> {
        let value = self.pop()?;
        expect_int(&value)
    }

    fn pop_ref(&mut self) -> Result<HeapRef, ProgramFault> {
        match self.pop()? {
            Value::Ref(r) => Ok(r),
            other => Err(ProgramFault::type_mismatch("reference", other.type_name())),
        }
    }

    fn array(&self, r: HeapRef) -> Result<&Vec<Value>, ProgramFault> {
        match self.state.heap.get(r)? {
            Cell::Array(items) => Ok(items),
            other => Err(ProgramFault::type_mismatch("array", other.kind())),
        }
    }

    fn array_mut(&mut self, r: HeapRef) -> Result<&mut Vec<Value>, ProgramFault> {
        match self.state.heap.get_mut(r)? {
            Cell::Array(items) => Ok(items),
            other => Err(ProgramFault::type_mismatch("array", other.kind())),
        }
    }

    fn identity_hash(&mut self, value: &Value) -> i64 {
        match value {
            Value::Unit => 0,
            Value::Int(v) => {
                let bits = *v as u64;
                ((bits ^ (bits >> 32)) as i32) as i64
            }
            Value::Str(s) => string_hash(s) as i64,
            Value::Ref(r) => self.state.identity.code(*r) as i64,
        }
    }

    /// Text form of a value; references show their kind and identity hash
    fn render(&mut self, value: &Value) -> Result<String, ProgramFault> {
        match value {
            Value::Ref(r) => {
                let kind = match self.state.heap.get(*r)? {
                    Cell::Object { class, .. } => self.program.class(*class).name.to_string(),
                    other => other.kind().to_string(),
                };
                Ok(format!("{}@{:x}", kind, self.state.identity.code(*r)))
            }
            other => Ok(other.to_string()),
        }
    }
}

fn expect_int(value: &Value) -> Result<i64, ProgramFault> {
    value
        .as_int()
        .ok_or_else(|| ProgramFault::type_mismatch("int", value.type_name()))
}

fn element_index(index: i64, len: usize) -> Result<usize, ProgramFault> {
    usize::try_from(index)
        .ok()
        .filter(|i| *i < len)
        .ok_or(ProgramFault::IndexOutOfBounds { index, len })
}

fn arith(op: BinOp, a: i64, b: i64) -> Result<i64, ProgramFault> {
    Ok(match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::Div => {
            if b == 0 {
                return Err(ProgramFault::DivisionByZero);
            }
            a.wrapping_div(b)
        }
        BinOp::Rem => {
            if b == 0 {
                return Err(ProgramFault::DivisionByZero);
            }
            a.wrapping_rem(b)
        }
        BinOp::Eq => (a == b) as i64,
        BinOp::Ne => (a != b) as i64,
        BinOp::Lt => (a < b) as i64,
        BinOp::Le => (a <= b) as i64,
        BinOp::Gt => (a > b) as i64,
        BinOp::Ge => (a >= b) as i64,
        BinOp::And => (a != 0 && b != 0) as i64,
        BinOp::Or => (a != 0 || b != 0) as i64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::CostTable;
    use crate::instrumentation::policy::{SandboxPolicy, ViolationCode};
    use crate::instrumentation::rewriter::{RewriteOptions, Rewriter};
    use crate::output::NullSink;
    use crate::program::builder::{MethodBuilder, ProgramBuilder};
    use crate::program::ir::{Instr, Program};
    use crate::runtime::host::{NullHost, ScriptedHost};
    use crate::runtime::team::{RobotType, Team};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct Captured(Mutex<String>);

    impl PrintTarget for Captured {
        fn print(&self, text: &str) {
            self.0.lock().push_str(text);
        }

        fn println(&self, text: &str) {
            let mut out = self.0.lock();
            out.push_str(text);
            out.push('\n');
        }
    }

    struct Harness {
        program: InstrumentedProgram,
        state: ActorState,
        budget: BudgetCounter,
        info: ActorInfo,
        printed: Arc<Captured>,
        limits: ExecLimits,
    }

    impl Harness {
        fn new(program: &Program) -> Self {
            Self::with_costs(program, &CostTable::with_defaults(), RewriteOptions::default())
        }

        fn with_costs(program: &Program, costs: &CostTable, options: RewriteOptions) -> Self {
            let policy = SandboxPolicy::with_defaults();
            let program = Rewriter::new(costs, &policy, options).rewrite(program).unwrap();
            let limits = ExecLimits::default();
            let state = ActorState::new(&program, 7, &limits);
            Self {
                program,
                state,
                budget: BudgetCounter::new(10_000),
                info: ActorInfo {
                    team: Team::A,
                    role: RobotType::Politician,
                    id: 1,
                    round: 1,
                },
                printed: Arc::new(Captured::default()),
                limits,
            }
        }

        fn run_with(&mut self, host: &mut dyn HostApi) -> Result<Value, Stop> {
            let entry = self.program.method_id("RobotPlayer", "turn").unwrap();
            let printed = self.printed.clone();
            let outputs = Outputs {
                system: &*printed,
                ambient: &NullSink,
            };
            let mut interp = Interpreter::new(
                &self.program,
                &mut self.state,
                &mut self.budget,
                host,
                &self.info,
                outputs,
                self.limits,
            );
            interp.run_initializers()?;
            interp.call(entry, Vec::new())
        }

        fn run(&mut self) -> Result<Value, Stop> {
            self.run_with(&mut NullHost)
        }

        fn printed(&self) -> String {
            self.printed.0.lock().clone()
        }
    }

    fn turn(body: impl FnOnce(&mut MethodBuilder)) -> Program {
        ProgramBuilder::new("t")
            .class("RobotPlayer", |c| {
                c.method("turn", 0, 4, body);
            })
            .build()
    }

    #[test]
    fn test_arithmetic_and_locals() {
        let program = turn(|m| {
            m.push_int(6)
                .store(0)
                .load(0)
                .push_int(7)
                .binary(BinOp::Mul)
                .ret();
        });
        assert_eq!(Harness::new(&program).run(), Ok(Value::Int(42)));
    }

    #[test]
    fn test_loop_with_conditional_jump() {
        // i = 0; while (i < 5) i = i + 1; return i
        let program = turn(|m| {
            m.push_int(0).store(0);
            let head = m.here();
            m.load(0).push_int(5).binary(BinOp::Lt);
            let exit = head + 9;
            m.jump_if_false(exit)
                .load(0)
                .push_int(1)
                .binary(BinOp::Add)
                .store(0)
                .jump(head);
            m.load(0).ret();
        });
        assert_eq!(Harness::new(&program).run(), Ok(Value::Int(5)));
    }

    #[test]
    fn test_division_by_zero_faults() {
        let program = turn(|m| {
            m.push_int(1).push_int(0).binary(BinOp::Div).ret();
        });
        assert_eq!(
            Harness::new(&program).run(),
            Err(Stop::Fault(ProgramFault::DivisionByZero))
        );
    }

    #[test]
    fn test_team_calls_and_statics() {
        let program = ProgramBuilder::new("t")
            .class("Util", |c| {
                c.static_field("count");
                c.method("<clinit>", 0, 0, |m| {
                    m.push_int(10).put_static("Util", "count").ret();
                });
                c.method("add", 2, 2, |m| {
                    m.load(0).load(1).binary(BinOp::Add).ret();
                });
            })
            .class("RobotPlayer", |c| {
                c.method("turn", 0, 0, |m| {
                    m.get_static("Util", "count")
                        .push_int(5)
                        .invoke("Util", "add", 2)
                        .ret();
                });
            })
            .build();

        let mut harness = Harness::new(&program);
        assert_eq!(harness.run(), Ok(Value::Int(15)));
        assert!(harness.state.is_initialized(&harness.program));
    }

    #[test]
    fn test_objects_and_arrays() {
        let program = ProgramBuilder::new("t")
            .class("Point", |_| {})
            .class("RobotPlayer", |c| {
                c.method("turn", 0, 2, |m| {
                    m.new_object("Point")
                        .store(0)
                        .load(0)
                        .push_int(3)
                        .put_field("x")
                        .push_int(4)
                        .new_array()
                        .store(1)
                        .load(1)
                        .push_int(2)
                        .load(0)
                        .get_field("x")
                        .instr(Instr::ArrayStore)
                        .load(1)
                        .push_int(2)
                        .instr(Instr::ArrayLoad)
                        .load(1)
                        .instr(Instr::ArrayLength)
                        .binary(BinOp::Add)
                        .ret();
                });
            })
            .build();

        assert_eq!(Harness::new(&program).run(), Ok(Value::Int(7)));
    }

    #[test]
    fn test_array_bounds() {
        let program = turn(|m| {
            m.push_int(2)
                .new_array()
                .push_int(2)
                .instr(Instr::ArrayLoad)
                .ret();
        });
        assert_eq!(
            Harness::new(&program).run(),
            Err(Stop::Fault(ProgramFault::IndexOutOfBounds { index: 2, len: 2 }))
        );
    }

    #[test]
    fn test_array_allocation_charges_its_length() {
        let program = turn(|m| {
            m.push_int(500).new_array().pop().ret();
        });
        let mut harness = Harness::new(&program);
        harness.run().unwrap();
        // Four instructions plus the deferred array length, applied at the block's charge
        assert_eq!(harness.budget.remaining(), 10_000 - 500 - 4);
    }

    #[test]
    fn test_closures_capture_and_apply() {
        let program = ProgramBuilder::new("t")
            .class("RobotPlayer", |c| {
                c.method("adder", 2, 2, |m| {
                    m.load(0).load(1).binary(BinOp::Add).ret();
                });
                c.method("turn", 0, 1, |m| {
                    m.push_int(40)
                        .make_closure("RobotPlayer", "adder", 1)
                        .store(0)
                        .load(0)
                        .push_int(2)
                        .invoke_closure(1)
                        .ret();
                });
            })
            .build();
        assert_eq!(Harness::new(&program).run(), Ok(Value::Int(42)));
    }

    #[test]
    fn test_closure_arity_mismatch() {
        let program = ProgramBuilder::new("t")
            .class("RobotPlayer", |c| {
                c.method("adder", 2, 2, |m| {
                    m.load(0).load(1).binary(BinOp::Add).ret();
                });
                c.method("turn", 0, 0, |m| {
                    m.make_closure("RobotPlayer", "adder", 0)
                        .push_int(2)
                        .invoke_closure(1)
                        .ret();
                });
            })
            .build();
        assert_eq!(
            Harness::new(&program).run(),
            Err(Stop::Fault(ProgramFault::ClosureArity {
                expected: 2,
                found: 1
            }))
        );
    }

    #[test]
    fn test_recursion_hits_call_depth() {
        let program = ProgramBuilder::new("t")
            .class("RobotPlayer", |c| {
                c.method("turn", 0, 0, |m| {
                    m.invoke("RobotPlayer", "turn", 0).ret();
                });
            })
            .build();
        assert_eq!(
            Harness::new(&program).run(),
            Err(Stop::Fault(ProgramFault::CallDepthExceeded))
        );
    }

    #[test]
    fn test_budget_exhaustion_stops_before_next_call() {
        let costs = CostTable::new(0, false)
            .with_cost("Test", "forty", 40)
            .with_cost("Test", "seventy", 70);
        let options = RewriteOptions {
            instruction_cost: 0,
            ..Default::default()
        };
        let program = turn(|m| {
            m.invoke("Test", "forty", 0)
                .pop()
                .invoke("Test", "seventy", 0)
                .pop()
                .ret();
        });

        let mut harness = Harness::with_costs(&program, &costs, options);
        harness.budget.reset(100);
        let mut host = ScriptedHost::new();
        assert_eq!(harness.run_with(&mut host), Err(Stop::Exhausted));
        assert_eq!(host.call_names(), vec!["Test.forty"]);
        assert_eq!(harness.budget.used(), 110);
    }

    #[test]
    fn test_denied_call_traps_before_anything_else_happens() {
        let program = turn(|m| {
            m.push_str("before")
                .invoke("System", "println", 1)
                .pop()
                .invoke("System", "nanoTime", 0)
                .ret();
        });
        let mut harness = Harness::new(&program);
        match harness.run() {
            Err(Stop::Violated(cause)) => {
                assert_eq!(cause.code, ViolationCode::NondeterministicClock);
                assert_eq!(cause.operation.to_string(), "System.nanoTime");
            }
            other => panic!("expected violation, got {:?}", other),
        }
        assert_eq!(harness.printed(), "before\n");
    }

    #[test]
    fn test_yield_ends_turn() {
        let program = turn(|m| {
            m.invoke("Clock", "yield", 0)
                .pop()
                .push_str("unreachable")
                .invoke("System", "print", 1)
                .ret();
        });
        let mut harness = Harness::new(&program);
        assert_eq!(harness.run(), Err(Stop::Yielded));
        assert_eq!(harness.printed(), "");
    }

    #[test]
    fn test_stdout_is_silenced_and_system_prints() {
        let program = turn(|m| {
            m.push_str("hidden")
                .invoke("Stdout", "println", 1)
                .pop()
                .push_str("a")
                .push_int(1)
                .invoke("String", "concat", 2)
                .invoke("System", "print", 1)
                .ret();
        });
        let mut harness = Harness::new(&program);
        harness.run().unwrap();
        assert_eq!(harness.printed(), "a1");
    }

    #[test]
    fn test_host_errors_become_faults() {
        let program = turn(|m| {
            m.push_int(3).invoke("RobotController", "move", 1).ret();
        });
        let mut host = ScriptedHost::new().fail("RobotController.move", "cannot move");
        let mut harness = Harness::new(&program);
        assert_eq!(
            harness.run_with(&mut host),
            Err(Stop::Fault(ProgramFault::Host {
                operation: "RobotController.move".to_string(),
                message: "cannot move".to_string()
            }))
        );
        assert_eq!(host.calls()[0].args, vec![Value::Int(3)]);
    }

    #[test]
    fn test_identity_hash_is_seeded() {
        let program = ProgramBuilder::new("t")
            .class("Marker", |_| {})
            .class("RobotPlayer", |c| {
                c.method("turn", 0, 0, |m| {
                    m.new_object("Marker").invoke("Object", "hashCode", 1).ret();
                });
            })
            .build();

        let first = Harness::new(&program).run().unwrap();
        let second = Harness::new(&program).run().unwrap();
        assert_eq!(first, second);
        assert!(first.as_int().unwrap() > 0);
    }

    #[test]
    fn test_string_doubling_hits_string_limit() {
        let program = turn(|m| {
            m.push_str("ab").store(0);
            let head = m.here();
            m.load(0)
                .load(0)
                .invoke("String", "concat", 2)
                .store(0)
                .jump(head);
        });
        let mut harness = Harness::new(&program);
        harness.limits.max_string_bytes = 1024;
        assert_eq!(
            harness.run(),
            Err(Stop::Fault(ProgramFault::StringTooLong {
                len: 1024,
                limit: 1024
            }))
        );
    }

    #[test]
    fn test_discarded_strings_do_not_count() {
        // 100 ten-byte strings against a 64-byte allowance, none kept
        let program = turn(|m| {
            m.push_int(0).store(0);
            let head = m.here();
            m.load(0).push_int(100).binary(BinOp::Lt);
            let exit = head + 13;
            m.jump_if_false(exit)
                .push_str("0123456789")
                .push_str("")
                .invoke("String", "concat", 2)
                .pop()
                .load(0)
                .push_int(1)
                .binary(BinOp::Add)
                .store(0)
                .jump(head);
            m.load(0).ret();
        });
        let mut harness = Harness::new(&program);
        harness.limits.max_string_bytes = 64;
        assert_eq!(harness.run(), Ok(Value::Int(100)));
        assert!(harness.state.string_bytes() <= 64);
    }

    #[test]
    fn test_string_building_charges_by_length() {
        let used_for = |text: &str| {
            let text = text.to_string();
            let program = turn(move |m| {
                m.push_str(text)
                    .push_str("")
                    .invoke("String", "concat", 2)
                    .pop()
                    .ret();
            });
            let mut harness = Harness::new(&program);
            harness.run().unwrap();
            harness.budget.used()
        };
        assert_eq!(used_for(&"x".repeat(320)) - used_for("x"), 10);
    }

    #[test]
    fn test_runaway_debug_method_is_capped() {
        let program = ProgramBuilder::new("t")
            .class("RobotPlayer", |c| {
                c.method("debug_spin", 0, 0, |m| {
                    m.push_unit().pop().jump(0);
                });
                c.method("turn", 0, 0, |m| {
                    m.invoke("RobotPlayer", "debug_spin", 0).pop().ret();
                });
            })
            .build();
        let options = RewriteOptions {
            debug_methods_enabled: true,
            ..Default::default()
        };
        let mut harness = Harness::with_costs(&program, &CostTable::with_defaults(), options);
        harness.limits.max_debug_ops = 500;
        assert_eq!(
            harness.run(),
            Err(Stop::Fault(ProgramFault::DebugLimitExceeded { limit: 500 }))
        );
        // Debug work stays free up to the cap
        assert!(harness.budget.used() < 100);
    }

    #[test]
    fn test_bytecode_counters() {
        let program = turn(|m| {
            m.filler(10)
                .invoke("Clock", "getBytecodeNum", 0)
                .ret();
        });
        let mut harness = Harness::new(&program);
        // The filler block is charged before the call runs
        assert_eq!(harness.run(), Ok(Value::Int(20)));
    }
}
