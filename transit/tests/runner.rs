//! End-to-end runs through the benchmark runner.

use transit::harness::WARMUP_ITERATIONS;
use transit::{MitigationConfig, Operation, Runner, RunnerState};

fn scratch_path(name: &str) -> String {
    let mut p = std::env::temp_dir();
    p.push(format!("transit-runner-{}-{}", std::process::id(), name));
    p.to_string_lossy().into_owned()
}

fn warmed_runner(config: MitigationConfig, input_file: &str) -> Runner {
    let mut runner = Runner::new(config, input_file);
    runner.configure_environment().unwrap();
    runner.warm_up().unwrap();
    runner
}

#[test]
fn every_operation_produces_a_result() {
    let path = scratch_path("all-ops");
    std::fs::write(&path, vec![0x42u8; 4096]).unwrap();

    let mut runner = warmed_runner(MitigationConfig::none(), &path);
    runner.create_sealed_fixture(b"sealed fixture payload").unwrap();

    for op in [
        Operation::EmptyEntry,
        Operation::TriggeredExit,
        Operation::RoundTrip,
        Operation::UntrustedFetch,
        Operation::SealedFetch,
        Operation::Synthetic,
    ] {
        let iterations = 50;
        let res = runner.run(op, iterations).unwrap();
        assert!(res.wall_time_ms >= 0.0, "{:?}", op);
        assert_eq!(res.cycles_per_op, res.cycles as f64 / iterations as f64);
    }
    assert_eq!(runner.state(), RunnerState::Completed);

    let _ = std::fs::remove_file(runner.sealed_file());
    let _ = std::fs::remove_file(&path);
}

#[test]
fn warmup_count_is_stable() {
    // The warm-up length is part of the measurement protocol; changing it
    // invalidates comparisons against previously collected data.
    assert_eq!(WARMUP_ITERATIONS, 200);
}

#[test]
fn fetch_of_missing_file_still_completes() {
    let mut runner = warmed_runner(MitigationConfig::all(), "/definitely/not/here.txt");
    let res = runner.run(Operation::UntrustedFetch, 20).unwrap();
    assert!(res.cycles_per_op.is_finite());
    assert_eq!(runner.state(), RunnerState::Completed);
}

#[test]
fn sealed_fetch_without_fixture_still_completes() {
    let mut runner = warmed_runner(MitigationConfig::none(), "/definitely/not/here.txt");
    let res = runner.run(Operation::SealedFetch, 20).unwrap();
    assert!(res.cycles_per_op.is_finite());
}

#[test]
fn cost_scales_linearly_with_iterations() {
    let mut runner = warmed_runner(MitigationConfig::none(), "test.txt");
    let small = runner.run(Operation::EmptyEntry, 1000).unwrap();
    let large = runner.run(Operation::EmptyEntry, 10_000).unwrap();

    // Per-op cost is roughly constant, so 10x the iterations should land
    // near 10x the total. Generous bounds keep this robust to noisy CI.
    let ratio = large.cycles as f64 / small.cycles.max(1) as f64;
    assert!(ratio > 2.0, "ratio {}", ratio);
    assert!(ratio < 100.0, "ratio {}", ratio);
}

#[test]
fn timing_noise_increases_per_op_cost() {
    let mut quiet = warmed_runner(MitigationConfig::none(), "test.txt");
    let mut noisy_cfg = MitigationConfig::none();
    noisy_cfg.timing_noise = true;
    let mut noisy = warmed_runner(noisy_cfg, "test.txt");

    let iterations = 2000;
    let base = quiet.run(Operation::EmptyEntry, iterations).unwrap();
    let with_noise = noisy.run(Operation::EmptyEntry, iterations).unwrap();
    assert!(
        with_noise.cycles_per_op > base.cycles_per_op,
        "noise {} vs base {}",
        with_noise.cycles_per_op,
        base.cycles_per_op
    );
}

#[test]
fn sealed_fixture_is_created_next_to_the_input() {
    let path = scratch_path("fixture-input");
    let runner = {
        let mut r = Runner::new(MitigationConfig::none(), &path);
        r.configure_environment().unwrap();
        r
    };
    let sealed = runner.create_sealed_fixture(b"payload").unwrap();
    assert_eq!(sealed, format!("{}.sealed", path));
    assert!(std::path::Path::new(sealed).exists());
    let _ = std::fs::remove_file(sealed);
}
