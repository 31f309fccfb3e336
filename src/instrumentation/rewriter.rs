// src/instrumentation/rewriter.rs
//! Instruction-level rewriter
//!
//! Walks every method of a team program once and emits metered [`Op`]s:
//!
//! - Plain instructions cost `instruction_cost` each, accumulated per basic
//!   block and charged with one `Charge` at the end of the block (before a
//!   jump, call or return, and at every jump target)
//! - External calls run the pre-call hooks first; the metering hook emits
//!   `Charge(cost)` from the cost table
//! - Denied calls become `Trap`, identity hashes become `IdentityHash`
//! - `NewArray` gets a deferred charge of its length
//! - Debug methods are stripped or bracketed with `DebugEnter`/`DebugExit`
//!
//! Anything that cannot be instrumented is a load failure.

use crate::cost::{CostGapReport, CostTable};
use crate::instrumentation::policy::{
    PolicyDecision, Redirect, SandboxPolicy, ViolationCause,
};
use crate::program::ir::{BinOp, ClassDef, Instr, MethodDef, OpRef, Program};
use crate::runtime::builtins::Builtin;
use crate::utils::config::SandboxSettings;
use crate::utils::errors::{LoadFailureKind, Result, SandboxError};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace};

pub type ClassId = usize;
pub type MethodId = usize;
pub type StaticId = usize;

/// One metered operation
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    PushInt(i64),
    PushStr(Arc<str>),
    PushUnit,
    Load(u16),
    Store(u16),
    GetStatic(StaticId),
    PutStatic(StaticId),
    Pop,
    Dup,
    Binary(BinOp),
    Not,
    Jump(usize),
    JumpIfFalse(usize),
    Call(MethodId),
    CallBuiltin(Builtin),
    /// Index into [`InstrumentedProgram::host_op`]
    CallHost { op: usize, argc: u8 },
    IdentityHash,
    New(ClassId),
    GetField(Arc<str>),
    PutField(Arc<str>),
    NewArray,
    ArrayLoad,
    ArrayStore,
    ArrayLength,
    MakeClosure { method: MethodId, captures: u8 },
    InvokeClosure(u8),
    Return,

    /// Decrement the budget, ending the turn if it runs out
    Charge(u32),
    /// Queue a charge of `max(1, length)` for the array length on the stack
    DeferArrayCharge,
    /// Index into [`InstrumentedProgram::violation`]
    Trap(usize),
    DebugEnter,
    DebugExit,
    /// Stripped call: pop `argc` arguments and push unit
    Discard(u8),
}

impl Op {
    fn ends_method(&self) -> bool {
        matches!(self, Op::Return | Op::Jump(_))
    }
}

#[derive(Debug, Clone)]
pub struct InstrumentedClass {
    pub name: Arc<str>,
    pub static_init: Option<MethodId>,
}

#[derive(Debug, Clone)]
pub struct InstrumentedMethod {
    pub class: ClassId,
    pub name: Arc<str>,
    pub params: u16,
    pub locals: u16,
    pub code: Vec<Op>,
}

#[derive(Debug, Clone)]
pub struct StaticSlot {
    pub class: ClassId,
    pub name: String,
}

/// A rewritten team program, shared read-only by every actor of the team
#[derive(Debug, Clone)]
pub struct InstrumentedProgram {
    pub package: String,
    classes: Vec<InstrumentedClass>,
    methods: Vec<InstrumentedMethod>,
    statics: Vec<StaticSlot>,
    host_ops: Vec<OpRef>,
    violations: Vec<ViolationCause>,
    class_index: HashMap<String, ClassId>,
    method_index: HashMap<(ClassId, String), MethodId>,
}

impl InstrumentedProgram {
    pub fn class_id(&self, name: &str) -> Option<ClassId> {
        self.class_index.get(name).copied()
    }

    pub fn method_id(&self, class: &str, method: &str) -> Option<MethodId> {
        let cid = self.class_id(class)?;
        self.method_index.get(&(cid, method.to_string())).copied()
    }

    pub fn class(&self, id: ClassId) -> &InstrumentedClass {
        &self.classes[id]
    }

    pub fn method(&self, id: MethodId) -> &InstrumentedMethod {
        &self.methods[id]
    }

    pub fn methods(&self) -> &[InstrumentedMethod] {
        &self.methods
    }

    pub fn host_op(&self, index: usize) -> &OpRef {
        &self.host_ops[index]
    }

    pub fn violation(&self, index: usize) -> &ViolationCause {
        &self.violations[index]
    }

    pub fn static_count(&self) -> usize {
        self.statics.len()
    }

    pub fn static_slot(&self, id: StaticId) -> &StaticSlot {
        &self.statics[id]
    }

    /// Static initializers in class declaration order
    pub fn static_initializers(&self) -> impl Iterator<Item = MethodId> + '_ {
        self.classes.iter().filter_map(|c| c.static_init)
    }

    pub fn op_count(&self) -> usize {
        self.methods.iter().map(|m| m.code.len()).sum()
    }
}

/// What a call site resolved to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Builtin,
    Host,
    IdentityHash,
}

/// An external call about to be emitted
#[derive(Debug)]
pub struct CallSite<'a> {
    pub op: &'a OpRef,
    pub cost: u32,
    pub kind: CallKind,
}

/// Hook run before every external call is emitted
pub trait PreCallHook: Send + Sync {
    fn before_call(&self, site: &CallSite<'_>, emit: &mut Vec<Op>);
}

/// Charges the tabulated cost of each external call
pub struct MeteringHook;

impl PreCallHook for MeteringHook {
    fn before_call(&self, site: &CallSite<'_>, emit: &mut Vec<Op>) {
        if site.cost > 0 {
            emit.push(Op::Charge(site.cost));
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RewriteOptions {
    pub instruction_cost: u32,
    pub debug_methods_enabled: bool,
}

impl Default for RewriteOptions {
    fn default() -> Self {
        Self {
            instruction_cost: 1,
            debug_methods_enabled: false,
        }
    }
}

impl From<&SandboxSettings> for RewriteOptions {
    fn from(settings: &SandboxSettings) -> Self {
        Self {
            instruction_cost: settings.instruction_cost,
            debug_methods_enabled: settings.debug_methods_enabled,
        }
    }
}

/// Name resolution for one team program
struct ProgramIndex<'p> {
    classes: HashMap<&'p str, ClassId>,
    methods: HashMap<(ClassId, &'p str), (MethodId, &'p MethodDef)>,
    statics: HashMap<(ClassId, &'p str), StaticId>,
}

impl<'p> ProgramIndex<'p> {
    fn build(program: &'p Program) -> Result<Self> {
        let mut classes = HashMap::new();
        let mut methods = HashMap::new();
        let mut statics = HashMap::new();
        let mut next_method = 0;

        for (cid, class) in program.classes.iter().enumerate() {
            if !SandboxPolicy::is_legal_class_name(&class.name)
                || Builtin::is_library_owner(&class.name)
            {
                return Err(SandboxError::load(
                    LoadFailureKind::Illegal,
                    format!("Illegal class name: {}", class.name),
                ));
            }
            if classes.insert(class.name.as_str(), cid).is_some() {
                return Err(SandboxError::load(
                    LoadFailureKind::Malformed,
                    format!("Duplicate class: {}", class.name),
                ));
            }

            for method in &class.methods {
                if methods
                    .insert((cid, method.name.as_str()), (next_method, method))
                    .is_some()
                {
                    return Err(SandboxError::load(
                        LoadFailureKind::Malformed,
                        format!("Duplicate method: {}.{}", class.name, method.name),
                    ));
                }
                next_method += 1;
            }

            for field in &class.statics {
                let id = statics.len();
                if statics.insert((cid, field.as_str()), id).is_some() {
                    return Err(SandboxError::load(
                        LoadFailureKind::Malformed,
                        format!("Duplicate static: {}.{}", class.name, field),
                    ));
                }
            }
        }

        Ok(Self {
            classes,
            methods,
            statics,
        })
    }

    fn class(&self, name: &str) -> Option<ClassId> {
        self.classes.get(name).copied()
    }

    fn method(&self, class: ClassId, name: &str) -> Option<(MethodId, &'p MethodDef)> {
        self.methods.get(&(class, name)).copied()
    }
}

/// Rewrites team programs into metered form
pub struct Rewriter<'a> {
    costs: &'a CostTable,
    policy: &'a SandboxPolicy,
    gaps: Option<&'a CostGapReport>,
    options: RewriteOptions,
    hooks: Vec<Box<dyn PreCallHook>>,
}

impl<'a> Rewriter<'a> {
    /// Rewriter with the metering hook installed
    pub fn new(costs: &'a CostTable, policy: &'a SandboxPolicy, options: RewriteOptions) -> Self {
        Self {
            costs,
            policy,
            gaps: None,
            options,
            hooks: vec![Box::new(MeteringHook)],
        }
    }

    pub fn with_gap_report(mut self, gaps: &'a CostGapReport) -> Self {
        self.gaps = Some(gaps);
        self
    }

    /// Add a hook run after the ones already installed
    pub fn with_hook(mut self, hook: Box<dyn PreCallHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn rewrite(&self, program: &Program) -> Result<InstrumentedProgram> {
        let index = ProgramIndex::build(program)?;

        let mut out = InstrumentedProgram {
            package: program.package.clone(),
            classes: Vec::with_capacity(program.classes.len()),
            methods: Vec::new(),
            statics: Vec::new(),
            host_ops: Vec::new(),
            violations: Vec::new(),
            class_index: HashMap::new(),
            method_index: HashMap::new(),
        };
        let mut host_ids: HashMap<OpRef, usize> = HashMap::new();

        for (cid, class) in program.classes.iter().enumerate() {
            out.class_index.insert(class.name.clone(), cid);
            for field in &class.statics {
                out.statics.push(StaticSlot {
                    class: cid,
                    name: field.clone(),
                });
            }

            let mut static_init = None;
            for method in &class.methods {
                let mid = out.methods.len();
                if method.name == MethodDef::STATIC_INIT {
                    if method.params != 0 {
                        return Err(SandboxError::load(
                            LoadFailureKind::Malformed,
                            format!("{}.{} cannot take parameters", class.name, method.name),
                        ));
                    }
                    static_init = Some(mid);
                }

                let code = MethodRewriter {
                    rewriter: self,
                    index: &index,
                    class,
                    method,
                    out: Vec::with_capacity(method.code.len() + 8),
                    pending: 0,
                    host_ops: &mut out.host_ops,
                    host_ids: &mut host_ids,
                    violations: &mut out.violations,
                }
                .rewrite()?;

                trace!(
                    "Rewrote {}.{}: {} -> {} ops",
                    class.name,
                    method.name,
                    method.code.len(),
                    code.len()
                );

                out.method_index.insert((cid, method.name.clone()), mid);
                out.methods.push(InstrumentedMethod {
                    class: cid,
                    name: Arc::from(method.name.as_str()),
                    params: method.params,
                    locals: method.locals,
                    code,
                });
            }

            out.classes.push(InstrumentedClass {
                name: Arc::from(class.name.as_str()),
                static_init,
            });
        }

        debug!(
            "Instrumented {}: {} classes, {} methods, {} ops, {} host ops, {} traps",
            out.package,
            out.classes.len(),
            out.methods.len(),
            out.op_count(),
            out.host_ops.len(),
            out.violations.len()
        );

        Ok(out)
    }
}

/// Rewrite state for a single method body
struct MethodRewriter<'r, 'a, 'p> {
    rewriter: &'r Rewriter<'a>,
    index: &'r ProgramIndex<'p>,
    class: &'p ClassDef,
    method: &'p MethodDef,
    out: Vec<Op>,
    /// Instruction cost accumulated since the last charge
    pending: u32,
    host_ops: &'r mut Vec<OpRef>,
    host_ids: &'r mut HashMap<OpRef, usize>,
    violations: &'r mut Vec<ViolationCause>,
}

impl<'r, 'a, 'p> MethodRewriter<'r, 'a, 'p> {
    fn rewrite(mut self) -> Result<Vec<Op>> {
        let method: &'p MethodDef = self.method;
        let code = &method.code;

        if self.method.locals < self.method.params {
            return Err(self.fail(
                LoadFailureKind::Malformed,
                None,
                "fewer locals than parameters".to_string(),
            ));
        }

        let mut leaders = HashSet::new();
        for (pc, instr) in code.iter().enumerate() {
            if let Some(target) = instr.jump_target() {
                if target >= code.len() {
                    return Err(self.fail(
                        LoadFailureKind::Malformed,
                        Some(pc),
                        format!("jump target {} out of range", target),
                    ));
                }
                leaders.insert(target);
            }
        }

        let debug_body = self.is_debug_body();
        if debug_body {
            self.out.push(Op::DebugEnter);
        }

        let mut map = vec![0usize; code.len()];
        for (pc, instr) in code.iter().enumerate() {
            if leaders.contains(&pc) {
                self.flush();
            }
            map[pc] = self.out.len();
            self.visit(pc, instr)?;
        }

        if self.out.last().map_or(true, |op| !op.ends_method()) {
            self.pending = self.pending.saturating_add(self.cost());
            self.emit_return();
        }

        // Jump targets point at the first op emitted for the target instruction
        for op in self.out.iter_mut() {
            match op {
                Op::Jump(target) | Op::JumpIfFalse(target) => *target = map[*target],
                _ => {}
            }
        }

        Ok(self.out)
    }

    fn visit(&mut self, pc: usize, instr: &Instr) -> Result<()> {
        match instr {
            Instr::PushInt { value } => self.plain(Op::PushInt(*value)),
            Instr::PushStr { value } => self.plain(Op::PushStr(Arc::from(value.as_str()))),
            Instr::PushUnit => self.plain(Op::PushUnit),
            Instr::Load { slot } => {
                self.check_slot(pc, *slot)?;
                self.plain(Op::Load(*slot))
            }
            Instr::Store { slot } => {
                self.check_slot(pc, *slot)?;
                self.plain(Op::Store(*slot))
            }
            Instr::GetStatic { class, field } => {
                let id = self.resolve_static(pc, class, field)?;
                self.plain(Op::GetStatic(id))
            }
            Instr::PutStatic { class, field } => {
                let id = self.resolve_static(pc, class, field)?;
                self.plain(Op::PutStatic(id))
            }
            Instr::Pop => self.plain(Op::Pop),
            Instr::Dup => self.plain(Op::Dup),
            Instr::Binary { op } => self.plain(Op::Binary(*op)),
            Instr::Not => self.plain(Op::Not),
            Instr::Jump { target } => {
                self.pending = self.pending.saturating_add(self.cost());
                self.flush();
                self.out.push(Op::Jump(*target));
            }
            Instr::JumpIfFalse { target } => {
                self.pending = self.pending.saturating_add(self.cost());
                self.flush();
                self.out.push(Op::JumpIfFalse(*target));
            }
            Instr::Invoke { owner, name, argc } => self.visit_invoke(pc, owner, name, *argc)?,
            Instr::New { class } => {
                let cid = self.resolve_team_class(pc, class)?;
                self.plain(Op::New(cid))
            }
            Instr::GetField { field } => self.plain(Op::GetField(Arc::from(field.as_str()))),
            Instr::PutField { field } => self.plain(Op::PutField(Arc::from(field.as_str()))),
            Instr::NewArray => {
                self.pending = self.pending.saturating_add(self.cost());
                self.out.push(Op::DeferArrayCharge);
                self.out.push(Op::NewArray);
            }
            Instr::ArrayLoad => self.plain(Op::ArrayLoad),
            Instr::ArrayStore => self.plain(Op::ArrayStore),
            Instr::ArrayLength => self.plain(Op::ArrayLength),
            Instr::MakeClosure {
                class,
                method,
                captures,
            } => {
                let mid = self.resolve_closure(pc, class, method, *captures)?;
                self.plain(Op::MakeClosure {
                    method: mid,
                    captures: *captures,
                })
            }
            Instr::InvokeClosure { argc } => {
                self.pending = self.pending.saturating_add(self.cost());
                self.flush();
                self.out.push(Op::InvokeClosure(*argc));
            }
            Instr::Return => {
                self.pending = self.pending.saturating_add(self.cost());
                self.emit_return();
            }
        }
        Ok(())
    }

    fn visit_invoke(&mut self, pc: usize, owner: &str, name: &str, argc: u8) -> Result<()> {
        // Team-internal call
        if let Some(cid) = self.index.class(owner) {
            let (mid, callee) = self.index.method(cid, name).ok_or_else(|| {
                self.fail(
                    LoadFailureKind::Missing,
                    Some(pc),
                    format!("no method {}.{}", owner, name),
                )
            })?;
            if callee.params != argc as u16 {
                return Err(self.fail(
                    LoadFailureKind::Malformed,
                    Some(pc),
                    format!(
                        "{}.{} takes {} arguments, called with {}",
                        owner, name, callee.params, argc
                    ),
                ));
            }

            if callee.is_debug() && !self.rewriter.options.debug_methods_enabled {
                // Removed calls cost nothing and keep the block open
                self.out.push(Op::Discard(argc));
                return Ok(());
            }

            self.pending = self.pending.saturating_add(self.cost());
            self.flush();
            self.out.push(Op::Call(mid));
            return Ok(());
        }

        if SandboxPolicy::is_reserved_owner(owner) {
            return Err(self.fail(
                LoadFailureKind::Illegal,
                Some(pc),
                format!("illegal reference to {}", owner),
            ));
        }

        let op = OpRef::new(owner, name);

        match self.rewriter.policy.classify(&op) {
            PolicyDecision::Deny(code) => {
                self.flush();
                let index = self.violations.len();
                self.violations.push(ViolationCause {
                    code,
                    operation: op,
                });
                self.out.push(Op::Trap(index));
                // Keeps stack shape for the (unreachable) code after the call
                self.out.push(Op::Discard(argc));
                return Ok(());
            }
            PolicyDecision::Redirect(Redirect::IdentityHash) => {
                self.check_arity(pc, &op, argc, 1)?;
                let cost = self.rewriter.costs.resolve(&op, self.rewriter.gaps)?;
                self.emit_call(&op, cost, CallKind::IdentityHash, Op::IdentityHash);
                return Ok(());
            }
            PolicyDecision::Allow => {}
        }

        if let Some(builtin) = Builtin::resolve(&op) {
            self.check_arity(pc, &op, argc, builtin.arity())?;
            let cost = self.rewriter.costs.resolve(&op, self.rewriter.gaps)?;
            self.emit_call(&op, cost, CallKind::Builtin, Op::CallBuiltin(builtin));
            return Ok(());
        }

        let cost = self
            .rewriter
            .costs
            .resolve(&op, self.rewriter.gaps)
            .map_err(|e| match e {
                SandboxError::LoadFailed { kind, message } => {
                    self.fail(kind, Some(pc), message)
                }
                other => other,
            })?;
        let id = match self.host_ids.get(&op) {
            Some(id) => *id,
            None => {
                let id = self.host_ops.len();
                self.host_ops.push(op.clone());
                self.host_ids.insert(op.clone(), id);
                id
            }
        };
        self.emit_call(&op, cost, CallKind::Host, Op::CallHost { op: id, argc });
        Ok(())
    }

    fn emit_call(&mut self, op: &OpRef, cost: u32, kind: CallKind, call: Op) {
        self.flush();
        let site = CallSite { op, cost, kind };
        for hook in &self.rewriter.hooks {
            hook.before_call(&site, &mut self.out);
        }
        self.out.push(call);
    }

    fn emit_return(&mut self) {
        self.flush();
        if self.is_debug_body() {
            self.out.push(Op::DebugExit);
        }
        self.out.push(Op::Return);
    }

    fn plain(&mut self, op: Op) {
        self.pending = self.pending.saturating_add(self.cost());
        self.out.push(op);
    }

    fn flush(&mut self) {
        if self.pending > 0 {
            self.out.push(Op::Charge(self.pending));
            self.pending = 0;
        }
    }

    fn cost(&self) -> u32 {
        self.rewriter.options.instruction_cost
    }

    fn is_debug_body(&self) -> bool {
        self.method.is_debug() && self.rewriter.options.debug_methods_enabled
    }

    fn check_slot(&self, pc: usize, slot: u16) -> Result<()> {
        if slot >= self.method.locals {
            return Err(self.fail(
                LoadFailureKind::Malformed,
                Some(pc),
                format!("local slot {} out of range", slot),
            ));
        }
        Ok(())
    }

    fn check_arity(&self, pc: usize, op: &OpRef, argc: u8, expected: u8) -> Result<()> {
        if argc != expected {
            return Err(self.fail(
                LoadFailureKind::Malformed,
                Some(pc),
                format!("{} takes {} arguments, called with {}", op, expected, argc),
            ));
        }
        Ok(())
    }

    fn resolve_team_class(&self, pc: usize, class: &str) -> Result<ClassId> {
        if let Some(cid) = self.index.class(class) {
            return Ok(cid);
        }
        let kind = if SandboxPolicy::is_reserved_owner(class) || Builtin::is_library_owner(class) {
            LoadFailureKind::Illegal
        } else {
            LoadFailureKind::Missing
        };
        Err(self.fail(kind, Some(pc), format!("cannot use class {}", class)))
    }

    fn resolve_static(&self, pc: usize, class: &str, field: &str) -> Result<StaticId> {
        let cid = self.resolve_team_class(pc, class)?;
        self.index
            .statics
            .get(&(cid, field))
            .copied()
            .ok_or_else(|| {
                self.fail(
                    LoadFailureKind::Missing,
                    Some(pc),
                    format!("no static {}.{}", class, field),
                )
            })
    }

    fn resolve_closure(&self, pc: usize, class: &str, method: &str, captures: u8) -> Result<MethodId> {
        let Some(cid) = self.index.class(class) else {
            return Err(self.fail(
                LoadFailureKind::Illegal,
                Some(pc),
                format!("closure over non-team operation {}.{}", class, method),
            ));
        };
        let (mid, target) = self.index.method(cid, method).ok_or_else(|| {
            self.fail(
                LoadFailureKind::Missing,
                Some(pc),
                format!("no method {}.{}", class, method),
            )
        })?;
        if captures as u16 > target.params {
            return Err(self.fail(
                LoadFailureKind::Malformed,
                Some(pc),
                format!(
                    "closure captures {} values but {}.{} takes {}",
                    captures, class, method, target.params
                ),
            ));
        }
        Ok(mid)
    }

    fn fail(&self, kind: LoadFailureKind, pc: Option<usize>, detail: String) -> SandboxError {
        let location = match pc {
            Some(pc) => format!("{}.{}@{}", self.class.name, self.method.name, pc),
            None => format!("{}.{}", self.class.name, self.method.name),
        };
        SandboxError::load(kind, format!("{}: {}", location, detail))
    }
}
