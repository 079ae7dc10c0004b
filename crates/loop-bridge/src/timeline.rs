//! Shared loop timeline.
//!
//! Every listener plays the same loop against a common epoch, so the offset to start from is
//! derived from wall-clock time rather than chosen locally. Corrections to the local clock
//! estimate that arrive after playback started become a playback shift.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use loop_player::renderer::LoopControl;

/// Milliseconds since the Unix epoch, `0` if the system clock is before it.
pub fn unix_now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Position of the shared timeline at `now_ms`.
///
/// Wrapped into `[0, loop_size_ms)` when looping; otherwise the elapsed time since the epoch.
pub fn loop_offset_ms(now_ms: i64, time_offset_ms: i64, epoch_ms: i64, loop_size_ms: i64) -> i64 {
    let elapsed = now_ms
        .saturating_add(time_offset_ms)
        .saturating_sub(epoch_ms);
    if loop_size_ms > 0 {
        elapsed.rem_euclid(loop_size_ms)
    } else {
        elapsed
    }
}

/// Tracks the local clock correction and turns later changes into a playback shift.
#[derive(Debug, Default)]
pub struct TimeOffsetTracker {
    current_ms: AtomicI64,
    at_start_ms: AtomicI64,
    started: AtomicBool,
}

impl TimeOffsetTracker {
    pub fn new(offset_ms: i64) -> Self {
        Self {
            current_ms: AtomicI64::new(offset_ms),
            at_start_ms: AtomicI64::new(offset_ms),
            started: AtomicBool::new(false),
        }
    }

    pub fn current_ms(&self) -> i64 {
        self.current_ms.load(Ordering::Acquire)
    }

    /// Remember the offset playback started with.
    pub fn mark_started(&self) {
        self.at_start_ms
            .store(self.current_ms(), Ordering::Release);
        self.started.store(true, Ordering::Release);
    }

    pub fn mark_stopped(&self) {
        self.started.store(false, Ordering::Release);
    }

    /// Record a new offset estimate. Returns the shift to apply when playback is running.
    pub fn update(&self, offset_ms: i64) -> Option<i64> {
        self.current_ms.store(offset_ms, Ordering::Release);
        if !self.started.load(Ordering::Acquire) {
            return None;
        }
        Some(offset_ms - self.at_start_ms.load(Ordering::Acquire))
    }
}

/// Epoch, loop length and clock correction for one bridge instance.
#[derive(Debug)]
pub struct Timeline {
    epoch_ms: i64,
    loop_size_ms: i64,
    offset: TimeOffsetTracker,
}

impl Timeline {
    pub fn new(epoch_ms: i64, loop_size_ms: i64, time_offset_ms: i64) -> Self {
        Self {
            epoch_ms,
            loop_size_ms,
            offset: TimeOffsetTracker::new(time_offset_ms),
        }
    }

    pub fn loop_size_ms(&self) -> i64 {
        self.loop_size_ms
    }

    pub fn offset_tracker(&self) -> &TimeOffsetTracker {
        &self.offset
    }

    pub fn offset_at(&self, now_ms: i64) -> i64 {
        loop_offset_ms(now_ms, self.offset.current_ms(), self.epoch_ms, self.loop_size_ms)
    }

    pub fn offset_now(&self) -> i64 {
        self.offset_at(unix_now_ms())
    }

    /// Adopt a new clock correction; while playing, the change becomes `control`'s shift.
    pub fn apply_offset(&self, offset_ms: i64, control: &LoopControl) -> Option<i64> {
        let shift_ms = self.offset.update(offset_ms)?;
        if shift_ms != control.playback_shift_ms() {
            tracing::info!(offset_ms, shift_ms, "time offset changed");
            control.set_playback_shift(shift_ms);
        }
        Some(shift_ms)
    }
}
