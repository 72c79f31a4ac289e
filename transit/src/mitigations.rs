//! Mitigation primitives.
//!
//! Two layers live here. The raw operations ([`serialize`], [`order`],
//! [`evict`], [`noise_delay`], [`ct_copy`], [`ct_zero`]) always run; the
//! config-gated wrappers below them are no-ops unless the corresponding
//! flag in the active [`MitigationConfig`] is set. None of these may
//! change the correctness of data they touch, only its timing and
//! cache/pipeline state, and all of them are callable from the hot timed
//! loop: no heap allocation, no fallible I/O.

use crate::config::MitigationConfig;

pub const CACHE_LINE_SIZE: usize = 64;

/// Spin count used for timing noise when the hardware random source
/// is unavailable.
const NOISE_FALLBACK: u32 = 100;

/// Serializing barrier: prior instructions retire before later ones issue.
#[inline(always)]
pub fn serialize() {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        core::arch::x86_64::_mm_lfence();
    }
}

/// Ordering barrier: globally order memory operations around this point.
#[inline(always)]
pub fn order() {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        core::arch::x86_64::_mm_mfence();
    }
}

/// Evict every cache line backing `buf` from all cache levels, then fence.
#[inline]
pub fn evict(buf: &[u8]) {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        let ptr = buf.as_ptr();
        let mut off = 0;
        while off < buf.len() {
            core::arch::x86_64::_mm_clflush(ptr.add(off));
            off += CACHE_LINE_SIZE;
        }
        core::arch::x86_64::_mm_mfence();
    }
    #[cfg(not(target_arch = "x86_64"))]
    let _ = buf;
}

/// Magnitude for one noise delay: RDRAND when available, mapped into
/// the 50..550 range, otherwise a fixed constant.
#[inline]
fn noise_magnitude() -> u32 {
    #[cfg(target_arch = "x86_64")]
    {
        let mut r: u32 = 0;
        if unsafe { core::arch::x86_64::_rdrand32_step(&mut r) } == 1 {
            return (r % 500) + 50;
        }
    }
    NOISE_FALLBACK
}

/// Pseudo-random busy delay. Intentionally increases measured latency.
#[inline]
pub fn noise_delay() {
    let iters = noise_magnitude();
    let mut dummy: u64 = 0;
    for i in 0..iters as u64 {
        // Volatile write keeps the loop from collapsing to a constant.
        unsafe { core::ptr::write_volatile(&mut dummy, dummy.wrapping_add(i)) };
    }
}

/// Byte-wise volatile copy: no early exit, no data-dependent branching.
///
/// `dst` and `src` must have the same length.
#[inline]
pub fn ct_copy(dst: &mut [u8], src: &[u8]) {
    assert_eq!(dst.len(), src.len());
    let d = dst.as_mut_ptr();
    let s = src.as_ptr();
    for i in 0..src.len() {
        unsafe { core::ptr::write_volatile(d.add(i), core::ptr::read_volatile(s.add(i))) };
    }
}

/// Byte-wise volatile zero-fill: no early exit, cannot be elided.
#[inline]
pub fn ct_zero(buf: &mut [u8]) {
    let p = buf.as_mut_ptr();
    for i in 0..buf.len() {
        unsafe { core::ptr::write_volatile(p.add(i), 0) };
    }
}

/// Conditionally apply the serializing and/or ordering barriers.
#[inline(always)]
pub fn speculation_barriers(cfg: &MitigationConfig) {
    if cfg.serializing_barrier {
        serialize();
    }
    if cfg.ordering_barrier {
        order();
    }
}

/// Conditionally apply a standalone memory barrier.
#[inline(always)]
pub fn memory_barrier(cfg: &MitigationConfig) {
    if cfg.memory_barrier {
        order();
    }
}

/// Conditionally evict the cache lines backing `buf`.
#[inline]
pub fn flush(cfg: &MitigationConfig, buf: &[u8]) {
    if cfg.cache_flushing {
        evict(buf);
    }
}

/// Conditionally inject a pseudo-random delay.
#[inline]
pub fn timing_noise(cfg: &MitigationConfig) {
    if cfg.timing_noise {
        noise_delay();
    }
}

/// Copy `src` into `dst`, in constant time when the flag is set.
#[inline]
pub fn copy(cfg: &MitigationConfig, dst: &mut [u8], src: &[u8]) {
    if cfg.constant_time_ops {
        ct_copy(dst, src);
    } else {
        dst.copy_from_slice(src);
    }
}

/// Clear `buf`.
///
/// With `constant_time_ops` set this evicts the buffer, zeroes it through
/// volatile writes, and evicts it again: a cleared-but-cached copy could
/// otherwise be recovered. Without the flag it is a plain zero-fill.
#[inline]
pub fn scrub(cfg: &MitigationConfig, buf: &mut [u8]) {
    if cfg.constant_time_ops {
        evict(buf);
        ct_zero(buf);
        evict(buf);
    } else {
        buf.fill(0);
    }
}
