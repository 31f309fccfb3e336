// benches/interpreter_bench.rs
//! Instrumented interpreter throughput

use arena_sandbox::cost::CostTable;
use arena_sandbox::instrumentation::{Rewriter, RewriteOptions, SandboxPolicy};
use arena_sandbox::output::{MemorySink, SharedSink};
use arena_sandbox::program::ir::BinOp;
use arena_sandbox::runtime::NullHost;
use arena_sandbox::utils::config::EngineConfig;
use arena_sandbox::{Program, ProgramBuilder, RobotType, Sandbox, Team};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

/// Counts to `n` in a loop, printing nothing
fn counting_loop(n: i64) -> Program {
    ProgramBuilder::new("bench")
        .class("RobotPlayer", |c| {
            c.method("turn", 0, 1, |m| {
                m.push_int(0).store(0);
                // pc 2
                m.load(0)
                    .push_int(n)
                    .binary(BinOp::Lt)
                    .jump_if_false(11)
                    .load(0)
                    .push_int(1)
                    .binary(BinOp::Add)
                    .store(0)
                    .jump(2);
                // pc 11
                m.load(0).ret();
            });
        })
        .build()
}

fn bench_rewrite(c: &mut Criterion) {
    let costs = CostTable::with_defaults();
    let policy = SandboxPolicy::with_defaults();
    let program = counting_loop(1_000);

    c.bench_function("rewrite_counting_loop", |b| {
        b.iter(|| {
            Rewriter::new(&costs, &policy, RewriteOptions::default())
                .rewrite(black_box(&program))
                .unwrap()
        })
    });
}

fn bench_turns(c: &mut Criterion) {
    let mut group = c.benchmark_group("turn");

    for iterations in [100i64, 1_000, 10_000] {
        let mut config = EngineConfig::default();
        config.sandbox.politician_budget = u32::MAX;
        let sink: SharedSink = MemorySink::shared();
        let mut sandbox = Sandbox::with_sink(config, sink).unwrap();
        sandbox.load_team(Team::A, &counting_loop(iterations)).unwrap();
        let handle = sandbox.create_actor(Team::A, RobotType::Politician, 1).unwrap();

        group.throughput(Throughput::Elements(iterations as u64));
        group.bench_with_input(BenchmarkId::from_parameter(iterations), &iterations, |b, _| {
            let mut round = 0;
            b.iter(|| {
                round += 1;
                sandbox.run_turn(handle, round, &mut NullHost).unwrap()
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_rewrite, bench_turns);
criterion_main!(benches);
