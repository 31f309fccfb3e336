// src/instrumentation/loader.rs
//! Team program loader
//!
//! Each team's program is instrumented on its own and resolves class names
//! only inside itself, so two teams may ship identically named classes.
//! Every actor then gets a private static store and heap on top of the
//! shared read-only program.

use crate::cost::{CostGapReport, CostTable};
use crate::instrumentation::policy::SandboxPolicy;
use crate::instrumentation::rewriter::{InstrumentedProgram, MethodId, RewriteOptions, Rewriter};
use crate::program::ir::Program;
use crate::runtime::actor::{ActorConfig, ActorInfo, ActorOutput, SandboxedActor};
use crate::runtime::team::Team;
use crate::utils::config::SandboxSettings;
use crate::utils::errors::{LoadFailureKind, Result, SandboxError};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Instruments team programs against one cost table and policy
pub struct TeamLoader {
    costs: Arc<CostTable>,
    policy: Arc<SandboxPolicy>,
    gaps: Arc<CostGapReport>,
    options: RewriteOptions,
    entry_class: String,
    entry_method: String,
}

impl TeamLoader {
    pub fn new(
        costs: Arc<CostTable>,
        policy: Arc<SandboxPolicy>,
        gaps: Arc<CostGapReport>,
        settings: &SandboxSettings,
    ) -> Self {
        Self {
            costs,
            policy,
            gaps,
            options: RewriteOptions::from(settings),
            entry_class: settings.entry_class.clone(),
            entry_method: settings.entry_method.clone(),
        }
    }

    /// Instrument `program` for `team` and resolve its entry point
    pub fn load(&self, team: Team, program: &Program) -> Result<LoadedTeam> {
        let started = Instant::now();
        debug!("Instrumenting package {} for team {}", program.package, team);

        let instrumented = Rewriter::new(&self.costs, &self.policy, self.options)
            .with_gap_report(&self.gaps)
            .rewrite(program)?;

        let entry = instrumented
            .method_id(&self.entry_class, &self.entry_method)
            .ok_or_else(|| {
                SandboxError::load(
                    LoadFailureKind::Missing,
                    format!("no entry point {}.{}", self.entry_class, self.entry_method),
                )
            })?;

        let params = instrumented.method(entry).params;
        if params != 0 {
            return Err(SandboxError::load(
                LoadFailureKind::Malformed,
                format!(
                    "entry point {}.{} must take no arguments, takes {}",
                    self.entry_class, self.entry_method, params
                ),
            ));
        }

        info!(
            "Loaded team {} package {} ({} methods, {} ops) in {:?}",
            team,
            instrumented.package,
            instrumented.methods().len(),
            instrumented.op_count(),
            started.elapsed()
        );

        Ok(LoadedTeam {
            team,
            program: Arc::new(instrumented),
            entry,
        })
    }

    pub fn options(&self) -> RewriteOptions {
        self.options
    }
}

/// A team's instrumented program, ready to run actors
#[derive(Debug, Clone)]
pub struct LoadedTeam {
    team: Team,
    program: Arc<InstrumentedProgram>,
    entry: MethodId,
}

impl LoadedTeam {
    pub fn team(&self) -> Team {
        self.team
    }

    pub fn program(&self) -> &Arc<InstrumentedProgram> {
        &self.program
    }

    pub fn entry(&self) -> MethodId {
        self.entry
    }

    /// Create an actor with its own statics and heap
    pub fn instantiate(&self, info: ActorInfo, config: ActorConfig, output: ActorOutput) -> SandboxedActor {
        debug_assert_eq!(info.team, self.team);
        SandboxedActor::new(info, Arc::clone(&self.program), self.entry, config, output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::builder::ProgramBuilder;

    fn loader_with(costs: CostTable, settings: &SandboxSettings) -> (TeamLoader, Arc<CostGapReport>) {
        let gaps = Arc::new(CostGapReport::new());
        let loader = TeamLoader::new(
            Arc::new(costs),
            Arc::new(SandboxPolicy::with_defaults()),
            gaps.clone(),
            settings,
        );
        (loader, gaps)
    }

    fn loader() -> TeamLoader {
        loader_with(CostTable::with_defaults(), &SandboxSettings::default()).0
    }

    fn player(body_argc: u16) -> Program {
        ProgramBuilder::new("examplefuncsplayer")
            .class("RobotPlayer", |c| {
                c.method("turn", body_argc, body_argc, |m| {
                    m.ret();
                });
            })
            .build()
    }

    #[test]
    fn test_load_resolves_entry() {
        let team = loader().load(Team::A, &player(0)).unwrap();
        assert_eq!(team.team(), Team::A);
        assert_eq!(
            team.program().method(team.entry()).name.as_ref(),
            "turn"
        );
    }

    #[test]
    fn test_missing_entry_point() {
        let program = ProgramBuilder::new("p")
            .class("Other", |c| {
                c.method("turn", 0, 0, |m| {
                    m.ret();
                });
            })
            .build();
        let err = loader().load(Team::B, &program).unwrap_err();
        assert_eq!(err.load_kind(), Some(LoadFailureKind::Missing));
    }

    #[test]
    fn test_entry_point_with_arguments_is_malformed() {
        let err = loader().load(Team::A, &player(1)).unwrap_err();
        assert_eq!(err.load_kind(), Some(LoadFailureKind::Malformed));
    }

    #[test]
    fn test_custom_entry_point() {
        let settings = SandboxSettings {
            entry_class: "Bot".to_string(),
            entry_method: "run".to_string(),
            ..Default::default()
        };
        let (loader, _) = loader_with(CostTable::with_defaults(), &settings);
        let program = ProgramBuilder::new("p")
            .class("Bot", |c| {
                c.method("run", 0, 0, |m| {
                    m.ret();
                });
            })
            .build();
        assert!(loader.load(Team::A, &program).is_ok());
    }

    #[test]
    fn test_reserved_owner_is_illegal() {
        let program = ProgramBuilder::new("p")
            .class("RobotPlayer", |c| {
                c.method("turn", 0, 0, |m| {
                    m.invoke("Sandbox", "reset", 0).ret();
                });
            })
            .build();
        let err = loader().load(Team::A, &program).unwrap_err();
        assert_eq!(err.load_kind(), Some(LoadFailureKind::Illegal));
    }

    #[test]
    fn test_unmapped_operation_in_strict_mode() {
        let program = ProgramBuilder::new("p")
            .class("RobotPlayer", |c| {
                c.method("turn", 0, 0, |m| {
                    m.invoke("RobotController", "teleport", 0).ret();
                });
            })
            .build();

        let (lenient, gaps) = loader_with(CostTable::with_defaults(), &SandboxSettings::default());
        assert!(lenient.load(Team::A, &program).is_ok());
        assert_eq!(gaps.len(), 1);

        let (strict, _) = loader_with(CostTable::with_defaults().strict(true), &SandboxSettings::default());
        let err = strict.load(Team::A, &program).unwrap_err();
        assert_eq!(err.load_kind(), Some(LoadFailureKind::UnmappedOperation));
    }

    #[test]
    fn test_teams_may_share_class_names() {
        let loader = loader();
        let a = loader.load(Team::A, &player(0)).unwrap();
        let b = loader.load(Team::B, &player(0)).unwrap();
        assert!(!Arc::ptr_eq(a.program(), b.program()));
        assert_eq!(a.program().class_id("RobotPlayer"), b.program().class_id("RobotPlayer"));
    }
}
