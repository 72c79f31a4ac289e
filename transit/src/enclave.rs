//! The trusted-side context and its entry-call surface.
//!
//! This stands in for the trusted-execution runtime collaborator: a
//! context created once per process, holding its own copy of the
//! mitigation config and a context-bound sealing key. Entry calls are
//! synchronous; exit calls go back out through a [`Host`].

use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::config::MitigationConfig;
use crate::host::Host;
use crate::mitigations as mit;
use crate::seal::{self, SealError, PLAIN_CAP};
use crate::workload::busywork;

/// Fixed buffer size for the untrusted-fetch operation.
pub const FETCH_BUF_LEN: usize = 8192;

/// Capacity for a sealed blob holding a cap-sized plaintext.
const SEALED_BUF_LEN: usize = seal::sealed_size(PLAIN_CAP);

/// Seed for the synthetic workload's input buffer. The buffer must be
/// identical on every iteration so the mixing cost is data-independent.
const SYNTHETIC_SEED: u64 = 0x7472_616e_7369_74;

/// Stride (in bytes touched) between barrier injections while walking a
/// fetched buffer.
const BARRIER_STRIDE: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum EnclaveError {
    #[error("couldn't determine context identity: {0}")]
    Identity(std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum FixtureError {
    #[error(transparent)]
    Seal(#[from] SealError),
    #[error("couldn't persist sealed fixture")]
    Persist,
}

/// A simulated trusted execution context.
pub struct Enclave {
    config: MitigationConfig,
    key: seal::SealKey,
}

impl Enclave {
    /// Create the context, deriving a sealing key bound to the running
    /// binary's identity. The mitigation config is fixed here for the
    /// context's lifetime; there is no per-call override.
    pub fn create(config: MitigationConfig) -> Result<Self, EnclaveError> {
        let exe = std::env::current_exe().map_err(EnclaveError::Identity)?;
        let identity = Sha256::digest(exe.to_string_lossy().as_bytes());
        let key = seal::derive_key(seal::SEALING_ROOT, &identity);
        Ok(Self { config, key })
    }

    pub fn config(&self) -> &MitigationConfig {
        &self.config
    }

    /// Untimed trivial crossing used by the warm-up phase.
    pub fn entry_warmup(&self) {
        busywork();
    }

    /// Minimal entry call: barriers, fixed workload, barrier.
    pub fn entry_empty(&self) {
        mit::speculation_barriers(&self.config);
        mit::timing_noise(&self.config);
        busywork();
        mit::memory_barrier(&self.config);
    }

    /// Entry that immediately triggers an exit call, isolating exit
    /// overhead on top of entry overhead.
    pub fn entry_triggered_exit(&self, host: &dyn Host) {
        mit::speculation_barriers(&self.config);
        busywork();
        host.empty_exit();
        mit::speculation_barriers(&self.config);
        mit::timing_noise(&self.config);
    }

    /// Combined entry+exit round trip carrying the iteration index.
    pub fn entry_ping(&self, iteration: u64, host: &dyn Host) {
        mit::speculation_barriers(&self.config);
        mit::timing_noise(&self.config);
        host.pong(iteration);
        mit::timing_noise(&self.config);
    }

    /// Fetch attacker-visible data from the untrusted side and touch
    /// every byte. Returns the number of bytes read (0 on failure; the
    /// iteration still counts).
    pub fn entry_untrusted_fetch(&self, path: &str, host: &dyn Host) -> usize {
        let mut buf = [0u8; FETCH_BUF_LEN];
        self.fetch_into(path, host, &mut buf)
    }

    /// Untrusted-fetch body over a caller-provided buffer.
    ///
    /// Every hygiene step here is gated on the config, including the
    /// final scrub: the unmitigated baseline must not pay for a zeroing
    /// pass. Sealed-data hygiene in [`Self::entry_sealed_fetch`] is the
    /// deliberate opposite.
    fn fetch_into(&self, path: &str, host: &dyn Host, buf: &mut [u8]) -> usize {
        mit::speculation_barriers(&self.config);
        mit::timing_noise(&self.config);

        mit::flush(&self.config, buf);
        let n = host.read_file(path, buf);

        if n > 0 {
            let mut checksum: u32 = 0;
            for (i, b) in buf[..n].iter().enumerate() {
                checksum = checksum.wrapping_add(*b as u32);
                if i % BARRIER_STRIDE == 0 {
                    mit::speculation_barriers(&self.config);
                }
            }
            std::hint::black_box(checksum);

            mit::flush(&self.config, &buf[..n]);
            if self.config.constant_time_ops {
                mit::scrub(&self.config, buf);
            }
        }

        mit::timing_noise(&self.config);
        n
    }

    /// Fetch a sealed fixture's raw bytes from the untrusted side,
    /// unseal them here, and touch every plaintext byte. Returns the
    /// unsealed length, 0 when the fetch or unseal failed (the iteration
    /// still counts either way).
    pub fn entry_sealed_fetch(&self, path: &str, host: &dyn Host) -> usize {
        mit::speculation_barriers(&self.config);
        mit::timing_noise(&self.config);

        let mut sealed = [0u8; SEALED_BUF_LEN];
        mit::flush(&self.config, &sealed);
        let n = host.read_file(path, &mut sealed);

        let mut plain = [0u8; PLAIN_CAP];
        let mut unsealed = 0;
        if n > 0 {
            if let Ok(len) = seal::unseal(&self.key, &sealed[..n], &mut plain) {
                let mut checksum: u32 = 0;
                for (i, b) in plain[..len].iter().enumerate() {
                    checksum = checksum.wrapping_add(*b as u32);
                    if i % BARRIER_STRIDE == 0 {
                        mit::speculation_barriers(&self.config);
                    }
                }
                std::hint::black_box(checksum);
                unsealed = len;
            }
            // An unseal failure aborts this iteration's processing only.
        }

        // Sealed-data hygiene is unconditional: the plaintext buffer is
        // scrubbed and the sealed bytes evicted regardless of config.
        mit::ct_zero(&mut plain);
        mit::evict(&sealed);

        mit::timing_noise(&self.config);
        unsealed
    }

    /// Synthetic data-processing workload standing in for cryptographic
    /// cost: deterministic input, multi-round mixing, periodic barrier
    /// injection, then cleanup.
    pub fn entry_synthetic(&self) {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        mit::speculation_barriers(&self.config);
        mit::timing_noise(&self.config);

        let mut buf = [0u8; PLAIN_CAP];
        let mut rng = StdRng::seed_from_u64(SYNTHETIC_SEED);
        rng.fill(&mut buf[..]);

        let mut state: u32 = 0x1234_5678;
        for (i, b) in buf.iter().enumerate() {
            state = state
                .wrapping_shl(5)
                .wrapping_add(state)
                .wrapping_add(*b as u32);
            if i % 128 == 0 {
                mit::speculation_barriers(&self.config);
            }
        }

        let mut digest = [0u8; 32];
        for round in 0..100u32 {
            for (i, d) in digest.iter_mut().enumerate() {
                *d = (state >> (i as u32 % 32)) as u8 ^ round.wrapping_mul(i as u32) as u8;
            }
            state = state.wrapping_shl(3).wrapping_add(state) ^ round;
        }
        std::hint::black_box(&digest);

        mit::flush(&self.config, &buf);
        mit::flush(&self.config, &digest);
        mit::scrub(&self.config, &mut buf);

        mit::timing_noise(&self.config);
    }

    /// Seal `payload` and persist the blob through an exit call.
    /// Returns the sealed length. Nothing is written when sealing fails.
    ///
    /// TODO: the write is not read back for verification, so a torn write
    /// leaves a fixture that only fails at unseal time.
    pub fn entry_seal_to_file(
        &self,
        path: &str,
        payload: &[u8],
        host: &dyn Host,
    ) -> Result<usize, FixtureError> {
        mit::speculation_barriers(&self.config);

        let mut sealed = [0u8; SEALED_BUF_LEN];
        let n = seal::seal(&self.key, payload, &mut sealed)?;
        if !host.write_file(path, &sealed[..n]) {
            return Err(FixtureError::Persist);
        }
        Ok(n)
    }

    /// Seal `payload` into `out` with this context's key.
    pub fn seal_bytes(&self, payload: &[u8], out: &mut [u8]) -> Result<usize, SealError> {
        seal::seal(&self.key, payload, out)
    }

    /// Authenticate and decrypt a blob sealed by this context.
    pub fn unseal_bytes(&self, blob: &[u8], out: &mut [u8]) -> Result<usize, SealError> {
        seal::unseal(&self.key, blob, out)
    }
}

impl Drop for Enclave {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::host::FsHost;

    fn scratch_path(name: &str) -> String {
        let mut p = std::env::temp_dir();
        p.push(format!("transit-enclave-{}-{}", std::process::id(), name));
        p.to_string_lossy().into_owned()
    }

    #[test]
    fn create_succeeds_with_any_config() {
        assert!(Enclave::create(MitigationConfig::none()).is_ok());
        assert!(Enclave::create(MitigationConfig::all()).is_ok());
    }

    #[test]
    fn entry_calls_run_under_all_mitigations() {
        let enclave = Enclave::create(MitigationConfig::all()).unwrap();
        let host = FsHost;
        enclave.entry_empty();
        enclave.entry_triggered_exit(&host);
        enclave.entry_ping(3, &host);
        enclave.entry_synthetic();
    }

    #[test]
    fn baseline_fetch_skips_the_scrub() {
        let enclave = Enclave::create(MitigationConfig::none()).unwrap();
        let host = FsHost;
        let path = scratch_path("baseline-fetch");
        let data = vec![0xABu8; 512];
        assert!(host.write_file(&path, &data));

        let mut buf = [0u8; FETCH_BUF_LEN];
        let n = enclave.fetch_into(&path, &host, &mut buf);
        assert_eq!(n, data.len());
        // With every flag off the fetched bytes stay put; zeroing them
        // would charge the unmitigated baseline for hygiene it never
        // asked for.
        assert_eq!(&buf[..n], &data[..]);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn constant_time_fetch_scrubs_the_buffer() {
        let mut config = MitigationConfig::none();
        config.constant_time_ops = true;
        let enclave = Enclave::create(config).unwrap();
        let host = FsHost;
        let path = scratch_path("ct-fetch");
        assert!(host.write_file(&path, &[0xCDu8; 512]));

        let mut buf = [0u8; FETCH_BUF_LEN];
        let n = enclave.fetch_into(&path, &host, &mut buf);
        assert_eq!(n, 512);
        assert!(buf.iter().all(|b| *b == 0));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn untrusted_fetch_missing_file_reads_zero_bytes() {
        let enclave = Enclave::create(MitigationConfig::none()).unwrap();
        assert_eq!(
            enclave.entry_untrusted_fetch("/definitely/not/here", &FsHost),
            0
        );
    }

    #[test]
    fn sealed_fixture_round_trip() {
        let enclave = Enclave::create(MitigationConfig::none()).unwrap();
        let host = FsHost;
        let path = scratch_path("fixture");
        let payload = vec![0x5Au8; 1024];

        let sealed_len = enclave.entry_seal_to_file(&path, &payload, &host).unwrap();
        assert_eq!(sealed_len, seal::sealed_size(payload.len()));
        assert_eq!(enclave.entry_sealed_fetch(&path, &host), payload.len());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn sealed_fetch_survives_garbage_fixture() {
        let enclave = Enclave::create(MitigationConfig::none()).unwrap();
        let host = FsHost;
        let path = scratch_path("garbage");
        assert!(host.write_file(&path, &[0xFFu8; 200]));

        // Bad blob: the iteration processes nothing but must not fault.
        assert_eq!(enclave.entry_sealed_fetch(&path, &host), 0);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn sealed_fetch_missing_fixture_is_a_noop() {
        let enclave = Enclave::create(MitigationConfig::none()).unwrap();
        assert_eq!(
            enclave.entry_sealed_fetch("/definitely/not/here", &FsHost),
            0
        );
    }

    #[test]
    fn oversized_fixture_payload_is_rejected() {
        let enclave = Enclave::create(MitigationConfig::none()).unwrap();
        let path = scratch_path("oversized");
        let payload = vec![0u8; PLAIN_CAP + 1];
        assert!(matches!(
            enclave.entry_seal_to_file(&path, &payload, &FsHost),
            Err(FixtureError::Seal(SealError::PayloadTooLarge(_)))
        ));
        assert!(!std::path::Path::new(&path).exists());
    }
}
