//! Fixed, side-effect-free workloads run on both sides of the boundary.

/// The stable workload executed inside empty entry/exit calls.
///
/// Measuring a literally empty call would measure whatever the compiler
/// leaves behind; this gives every "empty" crossing the same small,
/// non-elidable body instead.
#[inline]
pub fn busywork() {
    let mut counter: u64 = 0;
    for i in 0..100u64 {
        unsafe { core::ptr::write_volatile(&mut counter, counter.wrapping_add(i % 123)) };
    }
}
