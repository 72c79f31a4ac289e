//! Benchmark orchestration.
//!
//! The runner walks a strictly sequential state machine per process:
//! `Idle -> EnvironmentConfigured -> WarmedUp -> Running -> Completed`.
//! Environment setup and mitigation propagation happen once; after a run
//! completes, further runs re-enter `Running` directly.

use std::time::Instant;

use crate::config::MitigationConfig;
use crate::enclave::{Enclave, EnclaveError, FixtureError};
use crate::env::BenchEnv;
use crate::host::FsHost;
use crate::mitigations as mit;
use crate::timer;

/// Untimed boundary crossings executed before measurement so frequency
/// governors reach steady state.
pub const WARMUP_ITERATIONS: usize = 200;

/// Working-set size for the pre-run cache flush. Large enough to push the
/// last-level cache on current parts.
const FLUSH_BUF_LEN: usize = 32 * 1024 * 1024;

/// A measured boundary-crossing operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Operation {
    /// Entry call with no payload.
    EmptyEntry,
    /// Entry that immediately issues an exit call.
    TriggeredExit,
    /// Entry+exit round trip carrying the iteration index.
    RoundTrip,
    /// Entry that fetches an untrusted file through an exit call.
    UntrustedFetch,
    /// Entry that fetches and unseals a sealed fixture.
    SealedFetch,
    /// Synthetic data-processing workload inside the boundary.
    Synthetic,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::EmptyEntry => "empty-entry",
            Self::TriggeredExit => "triggered-exit",
            Self::RoundTrip => "round-trip",
            Self::UntrustedFetch => "untrusted-fetch",
            Self::SealedFetch => "sealed-fetch",
            Self::Synthetic => "synthetic",
        }
    }
}

/// Aggregated timing for one benchmark invocation.
#[derive(Clone, Copy, Debug)]
pub struct BenchmarkResult {
    pub wall_time_ms: f64,
    pub cycles: u64,
    /// The iteration count this result was measured over.
    pub iterations: u64,
    /// Always `cycles / iterations`; derived, never measured separately.
    pub cycles_per_op: f64,
}

impl BenchmarkResult {
    pub fn us_per_op(&self) -> f64 {
        self.wall_time_ms * 1000.0 / self.iterations as f64
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    EnvironmentConfigured,
    WarmedUp,
    Running,
    Completed,
}

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("benchmark requires at least one iteration")]
    ZeroIterations,
    #[error("environment already configured")]
    AlreadyConfigured,
    #[error("environment not configured (runner is {0:?})")]
    NotConfigured(RunnerState),
    #[error("warm-up has not run (runner is {0:?})")]
    NotWarmedUp(RunnerState),
    #[error("trusted context creation failed: {0}")]
    Setup(#[from] EnclaveError),
    #[error("sealed fixture setup failed: {0}")]
    Fixture(#[from] FixtureError),
}

/// Orchestrates environment setup, warm-up, and timed benchmark runs.
pub struct Runner {
    config: MitigationConfig,
    state: RunnerState,
    enclave: Option<Enclave>,
    host: FsHost,
    /// Input file for the untrusted-fetch operation; the sealed fixture
    /// lives next to it.
    input_file: String,
    sealed_file: String,
}

impl Runner {
    pub fn new(config: MitigationConfig, input_file: impl Into<String>) -> Self {
        let input_file = input_file.into();
        let sealed_file = format!("{}.sealed", input_file);
        Self {
            config,
            state: RunnerState::Idle,
            enclave: None,
            host: FsHost,
            input_file,
            sealed_file,
        }
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    pub fn config(&self) -> &MitigationConfig {
        &self.config
    }

    pub fn sealed_file(&self) -> &str {
        &self.sealed_file
    }

    /// One-shot environment setup: optional core pinning, then trusted
    /// context creation with the active config. Pinning failure is a
    /// warning; context creation failure is fatal.
    pub fn configure_environment(&mut self) -> Result<(), HarnessError> {
        if self.state != RunnerState::Idle {
            return Err(HarnessError::AlreadyConfigured);
        }

        if self.config.disable_hyperthreading {
            let cores = BenchEnv::physical_core_ids();
            let target = cores[0];
            match BenchEnv::pin_to_core(target) {
                Ok(()) => log::info!("pinned to physical core {}", target),
                Err(e) => log::warn!(
                    "couldn't pin to core {}: {} (continuing unpinned)",
                    target,
                    e
                ),
            }
        }

        self.enclave = Some(Enclave::create(self.config)?);
        self.state = RunnerState::EnvironmentConfigured;
        Ok(())
    }

    /// Untimed crossings letting frequency scaling settle. Never part of
    /// any result.
    pub fn warm_up(&mut self) -> Result<(), HarnessError> {
        if self.state != RunnerState::EnvironmentConfigured {
            return Err(HarnessError::NotConfigured(self.state));
        }
        let enclave = self
            .enclave
            .as_ref()
            .ok_or(HarnessError::NotConfigured(self.state))?;
        for _ in 0..WARMUP_ITERATIONS {
            enclave.entry_warmup();
        }
        self.state = RunnerState::WarmedUp;
        Ok(())
    }

    /// Create the sealed fixture consumed by the sealed-fetch operation,
    /// returning its path. Requires a configured environment.
    pub fn create_sealed_fixture(&self, payload: &[u8]) -> Result<&str, HarnessError> {
        let enclave = self
            .enclave
            .as_ref()
            .ok_or(HarnessError::NotConfigured(self.state))?;
        enclave.entry_seal_to_file(&self.sealed_file, payload, &self.host)?;
        Ok(&self.sealed_file)
    }

    /// Time `iterations` back-to-back executions of `op`.
    ///
    /// Caches are flushed before the timed section; the section itself is
    /// bracketed by serialized cycle samples and a wall-clock timer, with
    /// no per-iteration gap logic.
    pub fn run(&mut self, op: Operation, iterations: u64) -> Result<BenchmarkResult, HarnessError> {
        if iterations == 0 {
            return Err(HarnessError::ZeroIterations);
        }
        match self.state {
            RunnerState::WarmedUp | RunnerState::Completed => {}
            s => return Err(HarnessError::NotWarmedUp(s)),
        }
        let enclave = match &self.enclave {
            Some(e) => e,
            None => return Err(HarnessError::NotConfigured(self.state)),
        };

        self.state = RunnerState::Running;
        Self::flush_caches();

        let start_cycles = timer::cycles();
        let start_time = Instant::now();

        match op {
            Operation::EmptyEntry => {
                for _ in 0..iterations {
                    enclave.entry_empty();
                }
            }
            Operation::TriggeredExit => {
                for _ in 0..iterations {
                    enclave.entry_triggered_exit(&self.host);
                }
            }
            Operation::RoundTrip => {
                for i in 0..iterations {
                    enclave.entry_ping(i, &self.host);
                }
            }
            Operation::UntrustedFetch => {
                for _ in 0..iterations {
                    enclave.entry_untrusted_fetch(&self.input_file, &self.host);
                }
            }
            Operation::SealedFetch => {
                for _ in 0..iterations {
                    enclave.entry_sealed_fetch(&self.sealed_file, &self.host);
                }
            }
            Operation::Synthetic => {
                for _ in 0..iterations {
                    enclave.entry_synthetic();
                }
            }
        }

        let wall = start_time.elapsed();
        let end_cycles = timer::cycles();
        self.state = RunnerState::Completed;

        let cycles = end_cycles.saturating_sub(start_cycles);
        Ok(BenchmarkResult {
            wall_time_ms: wall.as_secs_f64() * 1e3,
            cycles,
            iterations,
            cycles_per_op: cycles as f64 / iterations as f64,
        })
    }

    /// Walk a buffer larger than the last-level cache so the timed
    /// section starts from a normalized cache state.
    fn flush_caches() {
        let mut buf = vec![0u8; FLUSH_BUF_LEN];
        let ptr = buf.as_mut_ptr();
        for i in (0..FLUSH_BUF_LEN).step_by(mit::CACHE_LINE_SIZE) {
            unsafe { core::ptr::write_volatile(ptr.add(i), (i & 0xFF) as u8) };
        }
        let mut sum: u64 = 0;
        for i in (0..FLUSH_BUF_LEN).step_by(mit::CACHE_LINE_SIZE) {
            sum = sum.wrapping_add(unsafe { core::ptr::read_volatile(ptr.add(i)) } as u64);
        }
        std::hint::black_box(sum);
        mit::order();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn run_before_configure_is_an_error() {
        let mut runner = Runner::new(MitigationConfig::none(), "test.txt");
        assert!(matches!(
            runner.run(Operation::EmptyEntry, 10),
            Err(HarnessError::NotWarmedUp(RunnerState::Idle))
        ));
    }

    #[test]
    fn warm_up_requires_configured_environment() {
        let mut runner = Runner::new(MitigationConfig::none(), "test.txt");
        assert!(matches!(
            runner.warm_up(),
            Err(HarnessError::NotConfigured(RunnerState::Idle))
        ));
    }

    #[test]
    fn double_configure_is_an_error() {
        let mut runner = Runner::new(MitigationConfig::none(), "test.txt");
        runner.configure_environment().unwrap();
        assert!(matches!(
            runner.configure_environment(),
            Err(HarnessError::AlreadyConfigured)
        ));
    }

    #[test]
    fn zero_iterations_fails_fast() {
        let mut runner = Runner::new(MitigationConfig::none(), "test.txt");
        runner.configure_environment().unwrap();
        runner.warm_up().unwrap();
        assert!(matches!(
            runner.run(Operation::EmptyEntry, 0),
            Err(HarnessError::ZeroIterations)
        ));
    }

    #[test]
    fn cycles_per_op_is_derived_exactly() {
        let mut runner = Runner::new(MitigationConfig::none(), "test.txt");
        runner.configure_environment().unwrap();
        runner.warm_up().unwrap();
        let iterations = 64;
        let res = runner.run(Operation::EmptyEntry, iterations).unwrap();
        assert_eq!(res.cycles_per_op, res.cycles as f64 / iterations as f64);
        assert!(res.cycles_per_op.is_finite());
    }

    #[test]
    fn per_op_figures_use_the_measured_iteration_count() {
        let mut runner = Runner::new(MitigationConfig::none(), "test.txt");
        runner.configure_environment().unwrap();
        runner.warm_up().unwrap();
        let res = runner.run(Operation::EmptyEntry, 32).unwrap();
        assert_eq!(res.iterations, 32);
        assert_eq!(res.us_per_op(), res.wall_time_ms * 1000.0 / 32.0);
    }

    #[test]
    fn repeated_runs_after_completion() {
        let mut runner = Runner::new(MitigationConfig::none(), "test.txt");
        runner.configure_environment().unwrap();
        runner.warm_up().unwrap();
        runner.run(Operation::EmptyEntry, 16).unwrap();
        assert_eq!(runner.state(), RunnerState::Completed);
        runner.run(Operation::Synthetic, 4).unwrap();
    }
}
