//! Diagnostics emitted by the render thread.
//!
//! The callback never logs directly. It `try_send`s small `Copy` events into a bounded
//! channel (no allocation, never blocks, drops on overflow) and a regular thread turns them
//! into `tracing` output.

use crossbeam_channel::{Receiver, Sender, TrySendError};

/// Something worth reporting that happened inside a render callback.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SyncEvent {
    /// The renderer picked up a new `play` request.
    SessionStarted {
        offset_ms: i64,
        loop_size_ms: i64,
        position_samples: i64,
    },
    /// The cursor jumped by `patch_samples` to cancel `offset_ms` of drift.
    HardSync {
        offset_ms: f64,
        patch_samples: i64,
        latency_ms: f64,
        latency_estimated: bool,
    },
    /// Drift left the tolerance band; the cursor is being nudged.
    SoftSyncStarted { offset_ms: f64, direction: i64 },
    /// Drift is back within tolerance.
    SoftSyncSettled { offset_ms: f64 },
    /// Linear playback reached the end of the buffer.
    BufferExhausted { position_samples: i64 },
}

pub fn event_channel(capacity: usize) -> (Sender<SyncEvent>, Receiver<SyncEvent>) {
    crossbeam_channel::bounded(capacity.max(1))
}

/// Queue an event without blocking. Returns `false` when the event was dropped.
pub(crate) fn emit(tx: &Sender<SyncEvent>, event: SyncEvent) -> bool {
    match tx.try_send(event) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
    }
}

/// Drain `rx` into log lines until every sender is gone.
pub fn spawn_event_logger(rx: Receiver<SyncEvent>) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        while let Ok(event) = rx.recv() {
            log_event(&event);
        }
        tracing::debug!("sync event logger finished");
    })
}

fn log_event(event: &SyncEvent) {
    match *event {
        SyncEvent::SessionStarted {
            offset_ms,
            loop_size_ms,
            position_samples,
        } => tracing::info!(offset_ms, loop_size_ms, position_samples, "playback session started"),
        SyncEvent::HardSync {
            offset_ms,
            patch_samples,
            latency_ms,
            latency_estimated,
        } => tracing::info!(
            offset_ms,
            patch_samples,
            latency_ms,
            latency_estimated,
            "hard sync"
        ),
        SyncEvent::SoftSyncStarted {
            offset_ms,
            direction,
        } => tracing::debug!(
            offset_ms,
            direction,
            "soft sync engaged"
        ),
        SyncEvent::SoftSyncSettled { offset_ms } => {
            tracing::debug!(offset_ms, "soft sync settled")
        }
        SyncEvent::BufferExhausted { position_samples } => {
            tracing::info!(position_samples, "end of buffer reached")
        }
    }
}
