//! Mitigation configuration model.

use std::fmt;

/// One software side-channel mitigation, togglable at runtime.
///
/// This is the closed set of mitigations the harness knows about; the
/// command-line token grammar maps onto it via [`MitigationKind::from_token`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MitigationKind {
    /// LFENCE before/around boundary work (retire-before-issue).
    SerializingBarrier,
    /// MFENCE around boundary work (memory-operation ordering).
    OrderingBarrier,
    /// Explicit cache-line eviction of buffers touched by an operation.
    CacheFlushing,
    /// Pseudo-random busy delay decorrelating duration from data.
    TimingNoise,
    /// Constant-time copy/zero for sensitive buffers.
    ConstantTimeOps,
    /// Standalone memory barrier after the trusted-side workload.
    MemoryBarrier,
    /// Pin the benchmark thread to one logical CPU per physical core.
    DisableHyperthreading,
}

impl MitigationKind {
    pub const ALL: [Self; 7] = [
        Self::SerializingBarrier,
        Self::OrderingBarrier,
        Self::CacheFlushing,
        Self::TimingNoise,
        Self::ConstantTimeOps,
        Self::MemoryBarrier,
        Self::DisableHyperthreading,
    ];

    /// Map a command-line token to a mitigation kind.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "lfence" => Some(Self::SerializingBarrier),
            "mfence" => Some(Self::OrderingBarrier),
            "cache" => Some(Self::CacheFlushing),
            "timing" => Some(Self::TimingNoise),
            "constant" => Some(Self::ConstantTimeOps),
            "memory" => Some(Self::MemoryBarrier),
            "hyperthreading" => Some(Self::DisableHyperthreading),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SerializingBarrier => "serializing barrier",
            Self::OrderingBarrier => "ordering barrier",
            Self::CacheFlushing => "cache flushing",
            Self::TimingNoise => "timing noise",
            Self::ConstantTimeOps => "constant time ops",
            Self::MemoryBarrier => "memory barrier",
            Self::DisableHyperthreading => "disable hyperthreading",
        }
    }
}

/// The set of active mitigations for a benchmark run.
///
/// Copied by value onto each side of the trust boundary: the runner keeps
/// one copy, and the trusted context receives its own copy at creation
/// time. Never mutated while a benchmark is in flight.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MitigationConfig {
    pub serializing_barrier: bool,
    pub ordering_barrier: bool,
    pub cache_flushing: bool,
    pub timing_noise: bool,
    pub constant_time_ops: bool,
    pub memory_barrier: bool,
    pub disable_hyperthreading: bool,
}

impl MitigationConfig {
    /// The unmitigated baseline (every flag off).
    pub fn none() -> Self {
        Self::default()
    }

    /// Every mitigation enabled.
    pub fn all() -> Self {
        let mut cfg = Self::default();
        for kind in MitigationKind::ALL {
            cfg.set(kind);
        }
        cfg
    }

    pub fn set(&mut self, kind: MitigationKind) {
        match kind {
            MitigationKind::SerializingBarrier => self.serializing_barrier = true,
            MitigationKind::OrderingBarrier => self.ordering_barrier = true,
            MitigationKind::CacheFlushing => self.cache_flushing = true,
            MitigationKind::TimingNoise => self.timing_noise = true,
            MitigationKind::ConstantTimeOps => self.constant_time_ops = true,
            MitigationKind::MemoryBarrier => self.memory_barrier = true,
            MitigationKind::DisableHyperthreading => self.disable_hyperthreading = true,
        }
    }

    pub fn enabled(&self, kind: MitigationKind) -> bool {
        match kind {
            MitigationKind::SerializingBarrier => self.serializing_barrier,
            MitigationKind::OrderingBarrier => self.ordering_barrier,
            MitigationKind::CacheFlushing => self.cache_flushing,
            MitigationKind::TimingNoise => self.timing_noise,
            MitigationKind::ConstantTimeOps => self.constant_time_ops,
            MitigationKind::MemoryBarrier => self.memory_barrier,
            MitigationKind::DisableHyperthreading => self.disable_hyperthreading,
        }
    }

    /// Parse a comma-separated mitigation list.
    ///
    /// Empty input or `"none"` yields the baseline config, `"all"` enables
    /// everything. Unrecognized tokens are ignored so that stale flag names
    /// degrade gracefully instead of aborting a run.
    pub fn parse(list: &str) -> Self {
        let list = list.trim();
        if list.is_empty() || list == "none" {
            return Self::none();
        }
        if list == "all" {
            return Self::all();
        }
        let mut cfg = Self::none();
        for token in list.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            if let Some(kind) = MitigationKind::from_token(token) {
                cfg.set(kind);
            }
        }
        cfg
    }
}

impl fmt::Display for MitigationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Current mitigation configuration:")?;
        for kind in MitigationKind::ALL {
            let state = if self.enabled(kind) { "ON" } else { "OFF" };
            writeln!(f, "  {:<24}: {}", kind.name(), state)?;
        }
        Ok(())
    }
}
