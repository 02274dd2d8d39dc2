//! Host clock
//!
//! A 1 MHz counter since first use, wrapping like a 32-bit hardware timer.
//! With the `ffi` feature it is exported as the two primitives the timing
//! bridge links against.

use std::sync::OnceLock;
use std::time::Instant;

pub const HOST_TICKS_PER_SECOND: u32 = 1_000_000;

static EPOCH: OnceLock<Instant> = OnceLock::new();

pub fn ticks_per_second() -> u32 {
    HOST_TICKS_PER_SECOND
}

pub fn current_time_ticks() -> u32 {
    EPOCH.get_or_init(Instant::now).elapsed().as_micros() as u32
}

#[cfg(feature = "ffi")]
#[no_mangle]
pub extern "C" fn rust_ticks_per_second() -> u32 {
    ticks_per_second()
}

#[cfg(feature = "ffi")]
#[no_mangle]
pub extern "C" fn rust_current_time_ticks() -> u32 {
    current_time_ticks()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advances() {
        let a = current_time_ticks();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = current_time_ticks();
        assert!(b.wrapping_sub(a) >= 1_000);
        assert_eq!(ticks_per_second(), HOST_TICKS_PER_SECOND);
    }
}
