//! Timing facts the renderer queries but does not own.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

/// Device-reported progress and latency.
///
/// Implementations are read from the real-time thread, so every method must be lock-free.
pub trait DeviceTiming: Send + Sync {
    /// Cumulative frames handed to the device since the stream was created.
    fn frames_written(&self) -> i64;

    /// Delay between writing a frame and hearing it, or `None` when the device cannot tell.
    fn output_latency_ms(&self) -> Option<f64>;
}

/// Source of "now" for the wall-clock side of the sync equation.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// Monotonic milliseconds since the clock was created.
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_millis(&self) -> i64 {
        i64::try_from(self.origin.elapsed().as_millis()).unwrap_or(i64::MAX)
    }
}

/// Clock advanced by hand; drives simulations and tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::Release);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now_ms.load(Ordering::Acquire)
    }
}

const LATENCY_UNAVAILABLE: i64 = -1;

/// Timing facts set by hand, for simulated devices.
///
/// Latency is stored in microseconds; a negative value means "unavailable".
#[derive(Debug)]
pub struct ManualTiming {
    frames_written: AtomicI64,
    latency_us: AtomicI64,
}

impl ManualTiming {
    pub fn new(latency_ms: Option<f64>) -> Self {
        let timing = Self {
            frames_written: AtomicI64::new(0),
            latency_us: AtomicI64::new(LATENCY_UNAVAILABLE),
        };
        timing.set_latency_ms(latency_ms);
        timing
    }

    pub fn add_frames(&self, frames: i64) {
        self.frames_written.fetch_add(frames, Ordering::AcqRel);
    }

    pub fn set_latency_ms(&self, latency_ms: Option<f64>) {
        let us = latency_ms
            .filter(|ms| ms.is_finite() && *ms >= 0.0)
            .map(|ms| (ms * 1000.0) as i64)
            .unwrap_or(LATENCY_UNAVAILABLE);
        self.latency_us.store(us, Ordering::Release);
    }
}

impl DeviceTiming for ManualTiming {
    fn frames_written(&self) -> i64 {
        self.frames_written.load(Ordering::Acquire)
    }

    fn output_latency_ms(&self) -> Option<f64> {
        let us = self.latency_us.load(Ordering::Acquire);
        (us >= 0).then(|| us as f64 / 1000.0)
    }
}
