//! Mitigation-aware measurement of trust-boundary crossing costs.
//!
//! The library simulates the software-visible costs of crossing into and
//! out of a trusted execution context, with side-channel mitigations that
//! can be toggled individually so their overhead can be attributed.

pub mod config;
pub mod enclave;
pub mod env;
pub mod harness;
pub mod host;
pub mod mitigations;
pub mod seal;
pub mod timer;
pub mod workload;

pub use config::{MitigationConfig, MitigationKind};
pub use enclave::Enclave;
pub use env::BenchEnv;
pub use harness::{BenchmarkResult, HarnessError, Operation, Runner, RunnerState};
pub use host::{FsHost, Host};
