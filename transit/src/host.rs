//! The untrusted-side exit-call surface.

use std::fs::File;
use std::io::Read;

use crate::workload::busywork;

/// Exit calls available to the trusted side.
///
/// Every call is synchronous: the trusted side blocks until the untrusted
/// side returns. Failures are reported in-band (zero bytes read, `false`
/// on write) so a bad path never faults the timed loop.
pub trait Host {
    /// Empty exit call; runs the fixed workload so "empty" still has a
    /// stable, non-elidable body.
    fn empty_exit(&self);

    /// Exit call carrying the round-trip iteration index.
    fn pong(&self, iteration: u64);

    /// Read up to `buf.len()` bytes of `path` into `buf`. Returns the
    /// number of bytes read, 0 on any failure.
    fn read_file(&self, path: &str, buf: &mut [u8]) -> usize;

    /// Persist `bytes` to `path`. Returns false on failure.
    fn write_file(&self, path: &str, bytes: &[u8]) -> bool;
}

/// Filesystem-backed host.
pub struct FsHost;

impl Host for FsHost {
    fn empty_exit(&self) {
        busywork();
    }

    fn pong(&self, _iteration: u64) {
        busywork();
    }

    fn read_file(&self, path: &str, buf: &mut [u8]) -> usize {
        let mut f = match File::open(path) {
            Ok(f) => f,
            Err(_) => return 0,
        };
        let mut total = 0;
        while total < buf.len() {
            match f.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(_) => return 0,
            }
        }
        total
    }

    fn write_file(&self, path: &str, bytes: &[u8]) -> bool {
        std::fs::write(path, bytes).is_ok()
    }
}
