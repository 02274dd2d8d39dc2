//! Host clock primitives
//!
//! The host runtime owns the timer. With the `ffi` feature the two
//! primitives are resolved at link time against symbols the host exports;
//! without it a development clock backed by `std::time::Instant` stands in.

// Extern C functions from the host runtime
// These are linked at build time, the host must define both symbols
#[cfg(feature = "ffi")]
extern "C" {
    pub fn rust_ticks_per_second() -> u32;
    pub fn rust_current_time_ticks() -> u32;
}

// Development clock for when the host runtime is not linked in
#[cfg(not(feature = "ffi"))]
mod dev_clock {
    use std::sync::OnceLock;
    use std::time::Instant;
    use tracing::debug;

    /// Development clock runs at 1 MHz
    pub const DEV_TICKS_PER_SECOND: u32 = 1_000_000;

    static EPOCH: OnceLock<Instant> = OnceLock::new();

    pub unsafe fn rust_ticks_per_second() -> u32 {
        DEV_TICKS_PER_SECOND
    }

    pub unsafe fn rust_current_time_ticks() -> u32 {
        let epoch = EPOCH.get_or_init(|| {
            debug!("Starting development clock at {} ticks/s", DEV_TICKS_PER_SECOND);
            Instant::now()
        });
        // Wraps like a 32-bit hardware counter
        epoch.elapsed().as_micros() as u32
    }
}

#[cfg(not(feature = "ffi"))]
pub use dev_clock::*;
