//! Periodic status reporting and stream recovery.
//!
//! Runs on the thread that owns the [`SyncEngine`]. Every tick it restarts a failed stream
//! and logs where playback is relative to the shared timeline.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use loop_player::renderer::LoopControl;
use loop_player::sync::normalized_offset_ms;

use crate::engine::SyncEngine;
use crate::timeline::Timeline;

/// One status line.
#[derive(Clone, Debug, PartialEq)]
pub struct MonitorReport {
    pub position_ms: i64,
    pub timeline_ms: i64,
    /// `timeline - position`, shortest way around the loop.
    pub timeline_drift_ms: i64,
    pub latency_ms: f64,
    pub latency_estimated: bool,
    pub total_patch_ms: f64,
    pub playback_shift_ms: i64,
}

pub fn report(control: &LoopControl, timeline: &Timeline, now_unix_ms: i64) -> MonitorReport {
    let status = control.status();
    let loop_size_ms = if status.session_id == 0 {
        timeline.loop_size_ms()
    } else {
        status.loop_size_ms
    };
    let timeline_ms = timeline.offset_at(now_unix_ms);
    let drift = normalized_offset_ms(
        timeline_ms as f64,
        status.position_ms as f64,
        loop_size_ms,
    );
    MonitorReport {
        position_ms: status.position_ms,
        timeline_ms,
        timeline_drift_ms: drift.round() as i64,
        latency_ms: status.latency_ms,
        latency_estimated: status.latency_estimated,
        total_patch_ms: status.total_patch_ms,
        playback_shift_ms: status.playback_shift_ms,
    }
}

/// Tick until `shutdown` fires or every sender is dropped.
pub fn run(
    engine: &mut SyncEngine,
    timeline: &Timeline,
    interval: Duration,
    shutdown: &Receiver<()>,
) {
    let control = engine.control();
    loop {
        match shutdown.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        if engine.has_stream_error() || !engine.is_running() {
            if let Err(e) = engine.restart() {
                tracing::warn!("stream restart failed: {e:#}");
                continue;
            }
        }

        if !control.is_playing() {
            continue;
        }
        let r = report(&control, timeline, crate::timeline::unix_now_ms());
        tracing::info!(
            position_ms = r.position_ms,
            timeline_ms = r.timeline_ms,
            drift_ms = r.timeline_drift_ms,
            latency_ms = r.latency_ms,
            latency_estimated = r.latency_estimated,
            total_patch_ms = r.total_patch_ms,
            shift_ms = r.playback_shift_ms,
            "playback status"
        );
    }
    tracing::info!("status monitor stopped");
}
