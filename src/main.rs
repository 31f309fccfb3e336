// src/main.rs
//! Arena Sandbox dry run
//!
//! Loads one or two team programs, runs a match against a host that answers
//! every robot-controller call with unit, and prints turn reports, events and
//! a closing summary as JSON lines followed by the captured output log.

use anyhow::{bail, Result};
use arena_sandbox::observability::{init_metrics, init_tracing};
use arena_sandbox::output::MemorySink;
use arena_sandbox::runtime::NullHost;
use arena_sandbox::utils::config::EngineConfig;
use arena_sandbox::{RobotType, Sandbox, Team, VERSION};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(
    name = "arena-sandbox",
    version,
    about = "Run team programs inside the deterministic sandbox"
)]
struct Cli {
    /// Team A program (JSON, optionally zstd-compressed)
    team_a: PathBuf,

    /// Team B program
    team_b: Option<PathBuf>,

    /// Configuration file; defaults to arena.toml or $ARENA_CONFIG
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Rounds to run
    #[arg(long, default_value_t = 10)]
    rounds: u32,

    /// Robots per team, cycling through the roles
    #[arg(long, default_value_t = 4)]
    robots: u32,

    /// Print Prometheus metrics after the run
    #[arg(long)]
    metrics: bool,

    /// Write a speedscope profile per loaded team into this directory
    #[arg(long, value_name = "DIR")]
    profile: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::load()?,
    };
    if cli.profile.is_some() {
        config.sandbox.profiling_enabled = true;
    }

    // Initialize observability (tracing, metrics)
    init_tracing(&config.logging)?;
    let metrics_handle = init_metrics()?;

    info!("Starting Arena Sandbox v{}", VERSION);

    let log = MemorySink::shared();
    let mut sandbox = Sandbox::with_sink(config, log.clone())?;

    let mut programs = vec![(Team::A, &cli.team_a)];
    if let Some(path) = &cli.team_b {
        programs.push((Team::B, path));
    }

    let mut loaded = Vec::new();
    for (team, path) in programs {
        match sandbox.load_team_file(team, path) {
            Ok(()) => loaded.push(team),
            Err(e) => error!("Team {} ({}) was not loaded: {}", team, path.display(), e),
        }
    }

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    if loaded.is_empty() {
        for event in sandbox.drain_events() {
            writeln!(out, "{}", serde_json::to_string(&event)?)?;
        }
        bail!("no team program could be loaded");
    }

    let mut next_id = 1;
    for team in &loaded {
        for i in 0..cli.robots {
            let role = RobotType::ALL[i as usize % RobotType::ALL.len()];
            sandbox.create_actor(*team, role, next_id)?;
            next_id += 1;
        }
    }
    info!("Running {} rounds with {} actors", cli.rounds, sandbox.actor_count());

    let mut host = NullHost;
    for round in 1..=cli.rounds {
        for report in sandbox.run_round(round, &mut host) {
            writeln!(out, "{}", serde_json::to_string(&report)?)?;
        }
        for event in sandbox.drain_events() {
            writeln!(out, "{}", serde_json::to_string(&event)?)?;
        }
    }

    let dropped = sandbox.dropped_events();
    if dropped > 0 {
        warn!("{} events were dropped because the event queue was full", dropped);
    }
    let summary = serde_json::json!({
        "summary": {
            "rounds": cli.rounds,
            "actors": sandbox.actor_count(),
            "events_dropped": dropped,
        }
    });
    writeln!(out, "{}", summary)?;

    if let Some(dir) = &cli.profile {
        std::fs::create_dir_all(dir)?;
        for team in &loaded {
            if let Some(profile) = sandbox.profile(*team) {
                let path = dir.join(format!("profile-{}.json", team));
                std::fs::write(&path, serde_json::to_vec(&profile)?)?;
                info!("Wrote profile for team {} to {}", team, path.display());
            }
        }
    }

    let gaps = sandbox.cost_gaps();
    if !gaps.is_empty() {
        warn!("Operations missing from the cost table:\n{}", gaps.render());
    }

    out.write_all(&log.lock().take())?;
    if cli.metrics {
        writeln!(out, "{}", metrics_handle.render())?;
    }
    Ok(())
}
