// src/runtime/sandbox.rs
//! Host-facing sandbox
//!
//! Owns everything one match needs:
//! - The team loader (cost table, policy, cost-gap report)
//! - One loaded program per team
//! - The output ledger and the sink framed output lands in
//! - Every actor's execution context
//! - The bounded event queue the host drains
//! - Per-team method profiles, when profiling is on

use crate::cost::{CostGapReport, CostTable};
use crate::instrumentation::loader::{LoadedTeam, TeamLoader};
use crate::instrumentation::policy::SandboxPolicy;
use crate::observability::metrics;
use crate::output::{ActorFramer, LimitedWriter, OutputLedger, PrintTarget, SharedSink};
use crate::program::codec;
use crate::program::ir::Program;
use crate::recording::{EventQueue, ProfileCollection, SandboxEvent, SpeedscopeFile};
use crate::runtime::actor::{ActorConfig, ActorHandle, ActorInfo, ActorOutput, SandboxedActor, TurnOutcome, TurnReport};
use crate::runtime::budget::BudgetLimits;
use crate::runtime::heap::actor_seed;
use crate::runtime::host::HostApi;
use crate::runtime::interpreter::ExecLimits;
use crate::runtime::team::{RobotType, Team};
use crate::utils::config::EngineConfig;
use crate::utils::errors::{LoadFailureKind, Result, SandboxError};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct Sandbox {
    config: EngineConfig,
    loader: TeamLoader,
    gaps: Arc<CostGapReport>,
    ledger: Arc<OutputLedger>,
    sink: SharedSink,
    events: Arc<EventQueue>,
    budgets: BudgetLimits,
    limits: ExecLimits,
    teams: [Option<LoadedTeam>; Team::COUNT],
    profiles: [Option<Arc<ProfileCollection>>; Team::COUNT],
    actors: HashMap<ActorHandle, SandboxedActor>,
    ids: HashSet<u32>,
}

impl Sandbox {
    /// Create a sandbox whose framed output goes to the process stdout
    pub fn new(config: EngineConfig) -> Result<Self> {
        let sink: SharedSink = Arc::new(Mutex::new(std::io::stdout()));
        Self::with_sink(config, sink)
    }

    /// Create a sandbox writing framed output to `sink`
    pub fn with_sink(config: EngineConfig, sink: SharedSink) -> Result<Self> {
        let costs = CostTable::from_settings(&config.costs)?;
        Self::with_parts(config, costs, SandboxPolicy::with_defaults(), sink)
    }

    /// Create a sandbox from explicit parts
    pub fn with_parts(
        config: EngineConfig,
        costs: CostTable,
        policy: SandboxPolicy,
        sink: SharedSink,
    ) -> Result<Self> {
        config.validate()?;
        let budgets = BudgetLimits::from_settings(&config.sandbox);
        budgets.validate().map_err(SandboxError::ConfigError)?;

        let gaps = Arc::new(CostGapReport::new());
        let loader = TeamLoader::new(Arc::new(costs), Arc::new(policy), gaps.clone(), &config.sandbox);

        info!(
            "Sandbox ready: seed {}, output limit {:?}, debug methods {}",
            config.sandbox.seed,
            config.output.per_team_limit_bytes,
            if config.sandbox.debug_methods_enabled { "on" } else { "off" }
        );

        let profiles = Team::ALL.map(|team| {
            config
                .sandbox
                .profiling_enabled
                .then(|| Arc::new(ProfileCollection::new(team, config.sandbox.profiler_max_events)))
        });

        Ok(Self {
            ledger: Arc::new(OutputLedger::new(config.output.per_team_limit_bytes)),
            events: Arc::new(EventQueue::new(config.events.queue_capacity)),
            limits: ExecLimits::from(&config.sandbox),
            budgets,
            loader,
            gaps,
            sink,
            teams: Default::default(),
            profiles,
            actors: HashMap::new(),
            ids: HashSet::new(),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Instrument and install a team's program
    ///
    /// A failure is reported once, as an error and as a `LoadFailed` event,
    /// and leaves any previously loaded program for the team in place.
    pub fn load_team(&mut self, team: Team, program: &Program) -> Result<()> {
        match self.loader.load(team, program) {
            Ok(loaded) => {
                if self.teams[team.index()].replace(loaded).is_some() {
                    warn!("Replaced program for team {}; existing actors keep the old one", team);
                }
                Ok(())
            }
            Err(err) => Err(self.report_load_failure(team, err)),
        }
    }

    /// Decode and load an encoded program
    pub fn load_team_bytes(&mut self, team: Team, data: &[u8]) -> Result<()> {
        let program = codec::decode_with_limit(data, self.config.sandbox.max_program_bytes).map_err(|e| {
            self.report_load_failure(
                team,
                SandboxError::load(LoadFailureKind::Malformed, format!("undecodable program: {}", e)),
            )
        })?;
        self.load_team(team, &program)
    }

    /// Read, decode and load a program file
    pub fn load_team_file(&mut self, team: Team, path: impl AsRef<Path>) -> Result<()> {
        let data = std::fs::read(path.as_ref())?;
        debug!("Read {} bytes from {}", data.len(), path.as_ref().display());
        self.load_team_bytes(team, &data)
    }

    fn report_load_failure(&self, team: Team, err: SandboxError) -> SandboxError {
        if let SandboxError::LoadFailed { kind, message } = &err {
            error!("Team {} failed to load ({}): {}", team, kind, message);
            metrics::record_load_failure();
            self.events.report(SandboxEvent::LoadFailed {
                team,
                kind: *kind,
                message: message.clone(),
            });
        }
        err
    }

    pub fn is_loaded(&self, team: Team) -> bool {
        self.teams[team.index()].is_some()
    }

    /// Create the execution context for a robot the engine just spawned
    pub fn create_actor(&mut self, team: Team, role: RobotType, id: u32) -> Result<ActorHandle> {
        let loaded = self.teams[team.index()]
            .as_ref()
            .ok_or(SandboxError::TeamNotLoaded(team))?;
        if !self.ids.insert(id) {
            return Err(SandboxError::DuplicateActor(id));
        }

        let info = ActorInfo {
            team,
            role,
            id,
            round: 0,
        };
        let writer = LimitedWriter::new(team, Arc::clone(&self.ledger), Arc::clone(&self.sink))
            .with_byte_counting(self.config.output.byte_counting);
        let framer = ActorFramer::new(&info, writer)
            .with_mirror(self.config.output.mirror_to_stdout)
            .with_events(Arc::clone(&self.events));
        let output = ActorOutput::new(Arc::new(framer), self.config.output.is_silenced(team));

        let config = ActorConfig {
            budget_limit: self.budgets.for_role(role),
            limits: self.limits,
            seed: actor_seed(self.config.sandbox.seed, team.index(), id),
        };

        let mut actor = loaded.instantiate(info, config, output);
        if let Some(profiles) = &self.profiles[team.index()] {
            actor = actor.with_profiler(profiles.create_profiler(id, role));
        }
        let handle = actor.handle();
        self.actors.insert(handle, actor);
        debug!("Created actor {} ({}) with budget {}", handle, role, config.budget_limit);
        Ok(handle)
    }

    /// Run one turn of one actor
    pub fn run_turn(&mut self, handle: ActorHandle, round: u32, host: &mut dyn HostApi) -> Result<TurnReport> {
        let actor = self
            .actors
            .get_mut(&handle)
            .ok_or(SandboxError::UnknownActor(handle))?;
        let report = actor.run_turn(round, host)?;

        let event = match &report.outcome {
            TurnOutcome::Violated(cause) => Some(SandboxEvent::SandboxViolation {
                team: handle.team,
                actor_id: handle.id,
                round,
                cause: cause.clone(),
            }),
            TurnOutcome::Exhausted => Some(SandboxEvent::BudgetExhausted {
                team: handle.team,
                actor_id: handle.id,
                round,
                budget: report.budget_limit,
            }),
            TurnOutcome::Errored(fault) => Some(SandboxEvent::RuntimeFault {
                team: handle.team,
                actor_id: handle.id,
                round,
                fault: fault.clone(),
            }),
            TurnOutcome::Completed | TurnOutcome::Yielded => None,
        };
        if let Some(event) = event {
            self.events.report(event);
        }

        Ok(report)
    }

    /// Run one turn for every live actor, in team then id order
    pub fn run_round(&mut self, round: u32, host: &mut dyn HostApi) -> Vec<TurnReport> {
        let mut order: Vec<ActorHandle> = self
            .actors
            .values()
            .filter(|a| !a.is_terminated())
            .map(|a| a.handle())
            .collect();
        order.sort();

        let mut reports = Vec::with_capacity(order.len());
        for handle in order {
            match self.run_turn(handle, round, host) {
                Ok(report) => reports.push(report),
                Err(e) => warn!("Skipping actor {} in round {}: {}", handle, round, e),
            }
        }
        reports
    }

    /// Stop running an actor; later `run_turn` calls fail
    pub fn terminate(&mut self, handle: ActorHandle) -> Result<()> {
        self.actors
            .get_mut(&handle)
            .ok_or(SandboxError::UnknownActor(handle))?
            .terminate();
        Ok(())
    }

    /// Drop an actor's context entirely, freeing its id
    pub fn remove_actor(&mut self, handle: ActorHandle) -> Result<()> {
        self.actors
            .remove(&handle)
            .ok_or(SandboxError::UnknownActor(handle))?;
        self.ids.remove(&handle.id);
        debug!("Removed actor {}", handle);
        Ok(())
    }

    pub fn actor(&self, handle: ActorHandle) -> Option<&SandboxedActor> {
        self.actors.get(&handle)
    }

    pub fn actor_count(&self) -> usize {
        self.actors.len()
    }

    /// Restore a team's output quota (`None` = unlimited) and re-arm its notice
    pub fn reset_output_quota(&self, team: Team, new_limit: Option<u64>) {
        self.ledger.reset(team, new_limit);
    }

    pub fn quota_remaining(&self, team: Team) -> Option<u64> {
        self.ledger.remaining(team)
    }

    pub fn ledger(&self) -> &Arc<OutputLedger> {
        &self.ledger
    }

    /// Point an actor's `System.print` somewhere else, returning the old target
    pub fn rebind_output(&self, handle: ActorHandle, target: Arc<dyn PrintTarget>) -> Result<Arc<dyn PrintTarget>> {
        let actor = self
            .actors
            .get(&handle)
            .ok_or(SandboxError::UnknownActor(handle))?;
        Ok(actor.output().binding().rebind(target))
    }

    pub fn events(&self) -> &Arc<EventQueue> {
        &self.events
    }

    pub fn drain_events(&self) -> Vec<SandboxEvent> {
        self.events.drain()
    }

    /// Events lost because the host drained too slowly
    pub fn dropped_events(&self) -> u64 {
        self.events.dropped()
    }

    /// The team's method profile so far, if profiling is on
    pub fn profile(&self, team: Team) -> Option<SpeedscopeFile> {
        self.profiles[team.index()].as_ref().map(|p| p.export())
    }

    /// External operations that were missing from the cost table
    pub fn cost_gaps(&self) -> &CostGapReport {
        &self.gaps
    }
}
