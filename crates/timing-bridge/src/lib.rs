//! Timing Bridge
//!
//! Lets the engine profiler read a monotonic tick count and tick frequency
//! from the host runtime's clock instead of owning a timer. Both queries are
//! forwarded verbatim; any failure to produce a value belongs to the host.

pub mod ffi;

/// Number of host ticks per second
pub fn ticks_per_second() -> u32 {
    unsafe { ffi::rust_ticks_per_second() }
}

/// Current host tick count
pub fn current_time_ticks() -> u32 {
    unsafe { ffi::rust_current_time_ticks() }
}

/// Convert a tick count into microseconds at the given frequency.
///
/// Returns 0 when the frequency is unknown (zero).
pub fn ticks_to_micros(ticks: u64, ticks_per_second: u32) -> u64 {
    if ticks_per_second == 0 {
        return 0;
    }
    ((ticks as u128 * 1_000_000) / ticks_per_second as u128) as u64
}

/// A source of ticks for profiling
pub trait TickSource {
    /// Ticks per second of this source
    fn ticks_per_second(&self) -> u32;

    /// Current tick count, monotonic within one profiling session
    fn current_time_ticks(&self) -> u32;
}

/// Tick source backed by the host-runtime primitives
#[derive(Debug, Clone, Copy, Default)]
pub struct HostClock;

impl TickSource for HostClock {
    fn ticks_per_second(&self) -> u32 {
        ticks_per_second()
    }

    fn current_time_ticks(&self) -> u32 {
        current_time_ticks()
    }
}

impl<T: TickSource + ?Sized> TickSource for &T {
    fn ticks_per_second(&self) -> u32 {
        (**self).ticks_per_second()
    }

    fn current_time_ticks(&self) -> u32 {
        (**self).current_time_ticks()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ticks_to_micros() {
        assert_eq!(ticks_to_micros(1_000_000, 1_000_000), 1_000_000);
        assert_eq!(ticks_to_micros(32_768, 32_768), 1_000_000);
        assert_eq!(ticks_to_micros(1, 1_000), 1_000);
        assert_eq!(ticks_to_micros(123, 0), 0);
    }

    #[cfg(not(feature = "ffi"))]
    #[test]
    fn test_dev_clock_is_monotonic() {
        assert_eq!(ticks_per_second(), ffi::DEV_TICKS_PER_SECOND);

        let clock = HostClock;
        let mut last = clock.current_time_ticks();
        for _ in 0..1000 {
            let now = clock.current_time_ticks();
            assert!(now >= last);
            last = now;
        }
    }

    proptest! {
        #[test]
        fn prop_micros_grow_with_ticks(
            a in 0u64..1_000_000_000,
            b in 0u64..1_000_000_000,
            hz in 1u32..,
        ) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(ticks_to_micros(lo, hz) <= ticks_to_micros(hi, hz));
        }
    }
}
