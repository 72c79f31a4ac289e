//! Serialized sampling of the hardware cycle counter.

/// Sample the monotonic cycle counter, fenced on both sides.
///
/// The LFENCEs keep out-of-order execution from hoisting work across the
/// sample, so two calls bracketing a region give a cycle delta that only
/// covers the region itself. Stateless and safe to call from any thread.
///
/// On non-x86_64 targets this degrades to a monotonic nanosecond clock so
/// the crate still builds and tests elsewhere; deltas are then
/// nanoseconds, not cycles.
#[inline(always)]
pub fn cycles() -> u64 {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        core::arch::x86_64::_mm_lfence();
        let tsc = core::arch::x86_64::_rdtsc();
        core::arch::x86_64::_mm_lfence();
        tsc
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        fallback_ns()
    }
}

#[cfg(not(target_arch = "x86_64"))]
fn fallback_ns() -> u64 {
    use std::sync::OnceLock;
    use std::time::Instant;
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_nanos() as u64
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn samples_are_monotonic() {
        let a = cycles();
        let b = cycles();
        assert!(b >= a);
    }

    #[test]
    fn bracketing_work_yields_nonzero_delta() {
        let start = cycles();
        let mut acc: u64 = 0;
        for i in 0..10_000u64 {
            unsafe { core::ptr::write_volatile(&mut acc, acc.wrapping_add(i)) };
        }
        let end = cycles();
        assert!(end > start);
    }
}
