use serde::{Deserialize, Serialize};

/// Point-in-time view of a loop player, reported by status endpoints and the monitor.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SyncStatus {
    /// `true` while the renderer is producing audio from the buffer.
    pub playing: bool,
    /// Identifier of the active `play` request (`0` before the first one).
    pub session_id: u64,
    /// Device-derived position in milliseconds (wrapped when looping).
    pub position_ms: i64,
    /// Wall-clock-derived position the output should be at, if a session exists.
    pub target_ms: Option<i64>,
    /// Last `target - position` offset seen by the sync policy.
    pub drift_ms: f64,
    /// Loop-relative start point of the session.
    pub start_offset_ms: i64,
    /// Loop length; zero or negative means linear playback.
    pub loop_size_ms: i64,
    /// External offset added to the target position.
    pub playback_shift_ms: i64,
    /// Cumulative correction applied since the session started.
    pub total_patch_ms: f64,
    /// Output latency used for position accounting.
    pub latency_ms: f64,
    /// `true` when `latency_ms` is the fallback constant.
    pub latency_estimated: bool,
    /// Number of hard syncs since the session started.
    pub hard_syncs: u64,
    /// Number of soft-sync steps since the session started.
    pub soft_sync_steps: u64,
    /// Frames emitted as silence while not playing.
    pub empty_frames: i64,
    /// Read cursor in samples.
    pub position_samples: i64,
    /// Loop (or buffer) length in samples.
    pub size_samples: i64,
    /// Stream sample rate (Hz).
    pub sample_rate: u32,
    /// Stream channel count.
    pub channels: u16,
}

/// Start or restart a session. Missing fields fall back to the host's timeline.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayRequest {
    /// Loop-relative start point in milliseconds.
    pub offset_ms: Option<i64>,
    /// Loop length in milliseconds (zero for linear playback).
    pub loop_size_ms: Option<i64>,
}

/// Replace the playback shift.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShiftRequest {
    pub shift_ms: i64,
}

/// Report a new estimate of the offset between the local clock and the shared timeline.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeOffsetRequest {
    pub offset_ms: i64,
}
