/// Drift-correction tuning shared by the renderer and its control handle.
#[derive(Clone, Debug, PartialEq)]
pub struct SyncConfig {
    /// Offsets strictly above this (ms) are corrected with a single cursor jump.
    pub hard_sync_threshold_ms: f64,
    /// Offsets strictly above this (ms) and not above the hard threshold are nudged.
    pub soft_sync_threshold_ms: f64,
    /// One nudge step is applied every this many rendered frames.
    pub soft_sync_interval_frames: u32,
    /// Latency substituted when the device cannot report one.
    pub default_latency_ms: f64,
    /// Capacity of the render-thread diagnostics queue (events beyond it are dropped).
    pub event_queue_capacity: usize,
}

impl Default for SyncConfig {
    /// Defaults tuned for a 16-bit stereo stream on phone-class hardware.
    fn default() -> Self {
        Self {
            hard_sync_threshold_ms: 200.0,
            soft_sync_threshold_ms: 2.0,
            soft_sync_interval_frames: 50,
            default_latency_ms: 120.0,
            event_queue_capacity: 64,
        }
    }
}

impl SyncConfig {
    /// Clamp values that would make the render loop degenerate.
    pub fn sanitized(mut self) -> Self {
        if !self.hard_sync_threshold_ms.is_finite() || self.hard_sync_threshold_ms < 0.0 {
            self.hard_sync_threshold_ms = Self::default().hard_sync_threshold_ms;
        }
        if !self.soft_sync_threshold_ms.is_finite() || self.soft_sync_threshold_ms < 0.0 {
            self.soft_sync_threshold_ms = Self::default().soft_sync_threshold_ms;
        }
        if self.soft_sync_threshold_ms > self.hard_sync_threshold_ms {
            self.soft_sync_threshold_ms = self.hard_sync_threshold_ms;
        }
        if !self.default_latency_ms.is_finite() || self.default_latency_ms < 0.0 {
            self.default_latency_ms = Self::default().default_latency_ms;
        }
        self.soft_sync_interval_frames = self.soft_sync_interval_frames.max(1);
        self.event_queue_capacity = self.event_queue_capacity.max(1);
        self
    }
}
