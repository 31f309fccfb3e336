// src/runtime/actor.rs
//! One robot's execution context
//!
//! A [`SandboxedActor`] owns everything that persists for a robot across
//! turns (statics, heap, seeded random streams) plus its budget counter and
//! output path. The simulation engine owns the robot itself; the sandbox only
//! runs its code one turn at a time.

use crate::instrumentation::policy::ViolationCause;
use crate::instrumentation::rewriter::{InstrumentedProgram, MethodId};
use crate::observability::metrics;
use crate::output::{ActorFramer, NullSink, OutputBinding, OutputWrapper, PrintTarget};
use crate::recording::profiler::Profiler;
use crate::runtime::budget::BudgetCounter;
use crate::runtime::fault::ProgramFault;
use crate::runtime::host::HostApi;
use crate::runtime::interpreter::{ActorState, ExecLimits, Interpreter, Outputs, Stop};
use crate::runtime::team::{RobotType, Team};
use crate::runtime::value::Value;
use crate::utils::errors::{Result, SandboxError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Host-side key for an actor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorHandle {
    pub team: Team,
    pub id: u32,
}

impl ActorHandle {
    pub fn new(team: Team, id: u32) -> Self {
        Self { team, id }
    }
}

impl fmt::Display for ActorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.team, self.id)
    }
}

/// Identity of the robot being run, as host operations see it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorInfo {
    pub team: Team,
    pub role: RobotType,
    pub id: u32,
    pub round: u32,
}

impl ActorInfo {
    pub fn handle(&self) -> ActorHandle {
        ActorHandle::new(self.team, self.id)
    }
}

/// Lifecycle of an actor's current (or last) turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Ready,
    Running,
    Completed,
    Yielded,
    Exhausted,
    Violated,
    Errored,
    Terminated,
}

/// How a turn ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum TurnOutcome {
    /// The entry point returned
    Completed,
    /// `Clock.yield` was called
    Yielded,
    /// The budget reached zero
    Exhausted,
    /// A denied operation was reached
    Violated(ViolationCause),
    /// The guest faulted
    Errored(ProgramFault),
}

impl TurnOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnOutcome::Completed => "completed",
            TurnOutcome::Yielded => "yielded",
            TurnOutcome::Exhausted => "exhausted",
            TurnOutcome::Violated(_) => "violated",
            TurnOutcome::Errored(_) => "errored",
        }
    }

    pub fn state(&self) -> TurnState {
        match self {
            TurnOutcome::Completed => TurnState::Completed,
            TurnOutcome::Yielded => TurnState::Yielded,
            TurnOutcome::Exhausted => TurnState::Exhausted,
            TurnOutcome::Violated(_) => TurnState::Violated,
            TurnOutcome::Errored(_) => TurnState::Errored,
        }
    }

    pub fn is_violation(&self) -> bool {
        matches!(self, TurnOutcome::Violated(_))
    }
}

impl From<Stop> for TurnOutcome {
    fn from(stop: Stop) -> Self {
        match stop {
            Stop::Yielded => TurnOutcome::Yielded,
            Stop::Exhausted => TurnOutcome::Exhausted,
            Stop::Violated(cause) => TurnOutcome::Violated(cause),
            Stop::Fault(fault) => TurnOutcome::Errored(fault),
        }
    }
}

/// Result of one `run_turn`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnReport {
    pub actor: ActorHandle,
    pub role: RobotType,
    pub round: u32,
    pub outcome: TurnOutcome,
    pub budget_limit: u32,
    /// May exceed `budget_limit` by the final charge
    pub budget_used: u64,
    pub ops_executed: u64,
}

/// Per-actor output plumbing
pub struct ActorOutput {
    framer: Arc<ActorFramer>,
    front: OutputWrapper,
    binding: OutputBinding,
}

impl ActorOutput {
    /// Route the actor's `System.print` through `framer`, or nowhere if silenced
    pub fn new(framer: Arc<ActorFramer>, silenced: bool) -> Self {
        let initial: Arc<dyn PrintTarget> = if silenced {
            NullSink::shared()
        } else {
            framer.clone()
        };
        let (front, binding) = OutputWrapper::new(initial);
        Self {
            framer,
            front,
            binding,
        }
    }

    pub fn binding(&self) -> &OutputBinding {
        &self.binding
    }

    pub fn framer(&self) -> &Arc<ActorFramer> {
        &self.framer
    }
}

/// Settings fixed for an actor's lifetime
#[derive(Debug, Clone, Copy)]
pub struct ActorConfig {
    pub budget_limit: u32,
    pub limits: ExecLimits,
    pub seed: u64,
}

pub struct SandboxedActor {
    info: ActorInfo,
    program: Arc<InstrumentedProgram>,
    entry: MethodId,
    state: ActorState,
    budget: BudgetCounter,
    config: ActorConfig,
    output: ActorOutput,
    turn_state: TurnState,
    turns: u64,
    profiler: Option<Profiler>,
}

impl SandboxedActor {
    pub fn new(
        info: ActorInfo,
        program: Arc<InstrumentedProgram>,
        entry: MethodId,
        config: ActorConfig,
        output: ActorOutput,
    ) -> Self {
        let state = ActorState::new(&program, config.seed, &config.limits);
        Self {
            info,
            program,
            entry,
            state,
            budget: BudgetCounter::new(config.budget_limit),
            config,
            output,
            turn_state: TurnState::Ready,
            turns: 0,
            profiler: None,
        }
    }

    /// Record method entries and exits into a team profile
    pub fn with_profiler(mut self, profiler: Profiler) -> Self {
        self.profiler = Some(profiler);
        self
    }

    pub fn handle(&self) -> ActorHandle {
        self.info.handle()
    }

    pub fn info(&self) -> &ActorInfo {
        &self.info
    }

    pub fn turn_state(&self) -> TurnState {
        self.turn_state
    }

    pub fn turns(&self) -> u64 {
        self.turns
    }

    pub fn is_terminated(&self) -> bool {
        self.turn_state == TurnState::Terminated
    }

    pub fn output(&self) -> &ActorOutput {
        &self.output
    }

    /// Value of a team static as this actor sees it
    pub fn static_value(&self, class: &str, field: &str) -> Option<&Value> {
        let id = (0..self.program.static_count()).find(|id| {
            let slot = self.program.static_slot(*id);
            slot.name == field && &*self.program.class(slot.class).name == class
        })?;
        self.state.statics.get(id)
    }

    /// Run one turn: reset the budget, finish any pending static
    /// initializers, then call the entry point on a fresh stack
    pub fn run_turn(&mut self, round: u32, host: &mut dyn HostApi) -> Result<TurnReport> {
        if self.is_terminated() {
            return Err(SandboxError::ActorTerminated(self.handle()));
        }

        self.info.round = round;
        self.output.framer.update_round(round);
        self.budget.reset(self.config.budget_limit);
        self.turn_state = TurnState::Running;

        let started = Instant::now();
        let entry = self.entry;
        let outputs = Outputs {
            system: &self.output.front,
            ambient: &NullSink,
        };
        let mut interp = Interpreter::new(
            &self.program,
            &mut self.state,
            &mut self.budget,
            host,
            &self.info,
            outputs,
            self.config.limits,
        )
        .with_profiler(self.profiler.as_mut());
        let result = interp
            .run_initializers()
            .and_then(|()| interp.call(entry, Vec::new()));
        let ops_executed = interp.executed();

        let outcome = match result {
            Ok(_) => TurnOutcome::Completed,
            Err(stop) => TurnOutcome::from(stop),
        };

        self.turn_state = outcome.state();
        self.turns += 1;
        let budget_used = self.budget.used();
        if let Some(profiler) = self.profiler.as_mut() {
            profiler.finish_turn(budget_used);
        }

        match &outcome {
            TurnOutcome::Violated(cause) => {
                warn!("Actor {} violated the sandbox in round {}: {}", self.handle(), round, cause);
                metrics::record_violation(cause.code.as_str());
            }
            TurnOutcome::Errored(fault) => {
                warn!("Actor {} faulted in round {}: {}", self.handle(), round, fault);
            }
            TurnOutcome::Exhausted => {
                debug!("Actor {} exhausted its budget in round {}", self.handle(), round);
            }
            _ => {}
        }
        metrics::record_turn(outcome.as_str(), budget_used);

        debug!(
            "Actor {} finished round {} as {} ({} units, {} ops, {:?})",
            self.handle(),
            round,
            outcome.as_str(),
            budget_used,
            ops_executed,
            started.elapsed()
        );

        Ok(TurnReport {
            actor: self.handle(),
            role: self.info.role,
            round,
            outcome,
            budget_limit: self.config.budget_limit,
            budget_used,
            ops_executed,
        })
    }

    /// Stop running this actor; later turns fail
    pub fn terminate(&mut self) {
        debug!("Terminating actor {}", self.handle());
        self.turn_state = TurnState::Terminated;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::CostTable;
    use crate::instrumentation::policy::{SandboxPolicy, ViolationCode};
    use crate::instrumentation::rewriter::{RewriteOptions, Rewriter};
    use crate::output::{LimitedWriter, MemorySink, OutputLedger, SharedSink};
    use crate::program::builder::ProgramBuilder;
    use crate::program::ir::{BinOp, Program};
    use crate::runtime::host::NullHost;
    use parking_lot::Mutex;

    fn actor_for(program: &Program, budget: u32) -> (SandboxedActor, Arc<Mutex<MemorySink>>) {
        let policy = SandboxPolicy::with_defaults();
        let costs = CostTable::with_defaults();
        let program = Arc::new(
            Rewriter::new(&costs, &policy, RewriteOptions::default())
                .rewrite(program)
                .unwrap(),
        );
        let entry = program.method_id("RobotPlayer", "turn").unwrap();

        let info = ActorInfo {
            team: Team::A,
            role: RobotType::Muckraker,
            id: 9,
            round: 0,
        };
        let sink = MemorySink::shared();
        let shared: SharedSink = sink.clone();
        let writer = LimitedWriter::new(Team::A, Arc::new(OutputLedger::unlimited()), shared);
        let framer = Arc::new(ActorFramer::new(&info, writer));
        let config = ActorConfig {
            budget_limit: budget,
            limits: ExecLimits::default(),
            seed: 1,
        };
        let actor = SandboxedActor::new(info, program, entry, config, ActorOutput::new(framer, false));
        (actor, sink)
    }

    fn counter_program() -> Program {
        ProgramBuilder::new("t")
            .class("RobotPlayer", |c| {
                c.static_field("count");
                c.method("turn", 0, 0, |m| {
                    m.get_static("RobotPlayer", "count")
                        .push_int(1)
                        .binary(BinOp::Add)
                        .dup()
                        .put_static("RobotPlayer", "count")
                        .invoke("System", "println", 1)
                        .pop()
                        .ret();
                });
            })
            .build()
    }

    #[test]
    fn test_statics_persist_across_turns() {
        let (mut actor, _) = actor_for(&counter_program(), 1_000);
        for round in 1..=3 {
            let report = actor.run_turn(round, &mut NullHost).unwrap();
            assert_eq!(report.outcome, TurnOutcome::Completed);
        }
        assert_eq!(actor.static_value("RobotPlayer", "count"), Some(&Value::Int(3)));
        assert_eq!(actor.turns(), 3);
    }

    #[test]
    fn test_output_is_framed_with_current_round() {
        let (mut actor, sink) = actor_for(&counter_program(), 1_000);
        actor.run_turn(1, &mut NullHost).unwrap();
        actor.run_turn(2, &mut NullHost).unwrap();
        assert_eq!(
            sink.lock().contents(),
            "[A:MUCKRAKER#9@1] 1\n[A:MUCKRAKER#9@2] 2\n"
        );
    }

    #[test]
    fn test_exhausted_turn_restarts_fresh() {
        // An infinite loop never completes but every turn ends
        let program = ProgramBuilder::new("t")
            .class("RobotPlayer", |c| {
                c.method("turn", 0, 0, |m| {
                    m.push_unit().pop().jump(0);
                });
            })
            .build();
        let (mut actor, _) = actor_for(&program, 50);

        for round in 1..=2 {
            let report = actor.run_turn(round, &mut NullHost).unwrap();
            assert_eq!(report.outcome, TurnOutcome::Exhausted);
            assert!(report.budget_used >= 50);
            assert_eq!(actor.turn_state(), TurnState::Exhausted);
        }
    }

    #[test]
    fn test_violation_is_reported_each_turn() {
        let program = ProgramBuilder::new("t")
            .class("RobotPlayer", |c| {
                c.method("turn", 0, 0, |m| {
                    m.invoke("Thread", "sleep", 0).ret();
                });
            })
            .build();
        let (mut actor, _) = actor_for(&program, 100);

        for round in 1..=2 {
            match actor.run_turn(round, &mut NullHost).unwrap().outcome {
                TurnOutcome::Violated(cause) => {
                    assert_eq!(cause.code, ViolationCode::ThreadBlocking);
                }
                other => panic!("expected violation, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_terminated_actor_refuses_turns() {
        let (mut actor, _) = actor_for(&counter_program(), 100);
        actor.terminate();
        let err = actor.run_turn(1, &mut NullHost).unwrap_err();
        assert!(matches!(err, SandboxError::ActorTerminated(h) if h == ActorHandle::new(Team::A, 9)));
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_string(&TurnOutcome::Exhausted).unwrap();
        assert_eq!(json, r#"{"outcome":"exhausted"}"#);
    }
}
