//! Per-operator latency profiler
//!
//! Events are timestamped through a [`TickSource`], normally the host clock
//! behind the timing bridge. Capacity is fixed; events past
//! [`MAX_EVENTS`] are dropped.

use serde::Serialize;
use timing_bridge::{TickSource, ticks_to_micros};
use tracing::{debug, info, warn};

/// Maximum number of events held by one profiler
pub const MAX_EVENTS: usize = 4096;

/// Handle returned for an event that could not be recorded
pub const DROPPED_EVENT: u32 = u32::MAX;

/// Instrumentation hook used by the interpreter
pub trait Profiler {
    /// Start an event and return its handle
    fn begin_event(&mut self, tag: &'static str) -> u32;

    /// Close the event opened with `handle`
    fn end_event(&mut self, handle: u32);
}

#[derive(Debug, Clone, Copy)]
struct Event {
    tag: &'static str,
    start: u32,
    end: u32,
}

impl Event {
    fn ticks(&self) -> u32 {
        // Host counters are 32-bit and may wrap
        self.end.wrapping_sub(self.start)
    }
}

/// One row of the latency table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyRow {
    pub tag: &'static str,
    pub ticks: u64,
    pub micros: u64,
    pub events: u32,
}

/// Ticks per tag for one profiling session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyReport {
    pub ticks_per_second: u32,
    pub rows: Vec<LatencyRow>,
    pub total_ticks: u64,
}

impl LatencyReport {
    /// Row for `tag`
    pub fn row(&self, tag: &str) -> Option<&LatencyRow> {
        self.rows.iter().find(|r| r.tag == tag)
    }

    /// Log as CSV with a header and a trailing total
    pub fn log_csv(&self) {
        info!(
            "\"Unique Tag\",\"Total ticks across all events with that tag.\",\"Total microseconds\""
        );
        for row in &self.rows {
            info!("{}, {}, {}", row.tag, row.ticks, row.micros);
        }
        info!(
            "\"total number of ticks\", {}, {}",
            self.total_ticks,
            ticks_to_micros(self.total_ticks, self.ticks_per_second)
        );
    }
}

/// Event profiler over a tick source
pub struct MicroProfiler<C: TickSource> {
    clock: C,
    events: Vec<Event>,
    dropped: u32,
}

impl<C: TickSource> MicroProfiler<C> {
    /// Create a profiler reading ticks from `clock`
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            events: Vec::with_capacity(MAX_EVENTS),
            dropped: 0,
        }
    }

    /// Number of recorded events
    pub fn num_events(&self) -> usize {
        self.events.len()
    }

    /// Events dropped because the profiler was full
    pub fn dropped_events(&self) -> u32 {
        self.dropped
    }

    /// Forget all events
    pub fn clear_events(&mut self) {
        self.events.clear();
        self.dropped = 0;
    }

    /// Sum of ticks over all events
    pub fn total_ticks(&self) -> u64 {
        self.events.iter().map(|e| e.ticks() as u64).sum()
    }

    /// Accumulate ticks per distinct tag, in first-seen order
    pub fn ticks_per_tag(&self) -> LatencyReport {
        let ticks_per_second = self.clock.ticks_per_second();
        let mut rows: Vec<LatencyRow> = Vec::new();
        for event in &self.events {
            match rows.iter_mut().find(|r| r.tag == event.tag) {
                Some(row) => {
                    row.ticks += event.ticks() as u64;
                    row.events += 1;
                }
                None => rows.push(LatencyRow {
                    tag: event.tag,
                    ticks: event.ticks() as u64,
                    micros: 0,
                    events: 1,
                }),
            }
        }
        for row in &mut rows {
            row.micros = ticks_to_micros(row.ticks, ticks_per_second);
        }

        LatencyReport {
            ticks_per_second,
            rows,
            total_ticks: self.total_ticks(),
        }
    }

    /// Log every event at debug level
    pub fn log(&self) {
        let hz = self.clock.ticks_per_second();
        for event in &self.events {
            debug!(
                "{} took {} ticks ({} us)",
                event.tag,
                event.ticks(),
                ticks_to_micros(event.ticks() as u64, hz)
            );
        }
    }

    /// Log ticks per tag as CSV
    pub fn log_ticks_per_tag_csv(&self) {
        self.ticks_per_tag().log_csv();
    }
}

impl<C: TickSource> Profiler for MicroProfiler<C> {
    fn begin_event(&mut self, tag: &'static str) -> u32 {
        if self.events.len() >= MAX_EVENTS {
            if self.dropped == 0 {
                warn!("MicroProfiler: max number of events ({}) exceeded, dropping", MAX_EVENTS);
            }
            self.dropped += 1;
            return DROPPED_EVENT;
        }
        let start = self.clock.current_time_ticks();
        self.events.push(Event {
            tag,
            start,
            end: start,
        });
        (self.events.len() - 1) as u32
    }

    fn end_event(&mut self, handle: u32) {
        if handle == DROPPED_EVENT {
            return;
        }
        let now = self.clock.current_time_ticks();
        if let Some(event) = self.events.get_mut(handle as usize) {
            event.end = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Advances by a fixed step on every read
    struct SteppingClock {
        now: Cell<u32>,
        step: u32,
    }

    impl TickSource for SteppingClock {
        fn ticks_per_second(&self) -> u32 {
            1000
        }

        fn current_time_ticks(&self) -> u32 {
            let t = self.now.get();
            self.now.set(t.wrapping_add(self.step));
            t
        }
    }

    #[test]
    fn test_ticks_per_tag() {
        let clock = SteppingClock { now: Cell::new(0), step: 5 };
        let mut profiler = MicroProfiler::new(&clock);

        for tag in ["ADD", "MUL", "ADD"] {
            let h = profiler.begin_event(tag);
            profiler.end_event(h);
        }

        let report = profiler.ticks_per_tag();
        assert_eq!(report.rows.len(), 2);
        assert_eq!(report.row("ADD").unwrap().ticks, 10);
        assert_eq!(report.row("ADD").unwrap().events, 2);
        assert_eq!(report.row("ADD").unwrap().micros, 10_000);
        assert_eq!(report.row("MUL").unwrap().ticks, 5);
        assert_eq!(report.total_ticks, 15);
    }

    #[test]
    fn test_wrapping_counter() {
        let clock = SteppingClock {
            now: Cell::new(u32::MAX - 1),
            step: 4,
        };
        let mut profiler = MicroProfiler::new(&clock);
        let h = profiler.begin_event("CONV_2D");
        profiler.end_event(h);
        assert_eq!(profiler.total_ticks(), 4);
    }

    #[test]
    fn test_drops_past_capacity() {
        let clock = SteppingClock { now: Cell::new(0), step: 1 };
        let mut profiler = MicroProfiler::new(&clock);
        for _ in 0..MAX_EVENTS {
            let h = profiler.begin_event("TANH");
            profiler.end_event(h);
        }
        assert_eq!(profiler.begin_event("TANH"), DROPPED_EVENT);
        profiler.end_event(DROPPED_EVENT);
        assert_eq!(profiler.num_events(), MAX_EVENTS);
        assert_eq!(profiler.dropped_events(), 1);

        profiler.clear_events();
        assert_eq!(profiler.num_events(), 0);
    }
}
