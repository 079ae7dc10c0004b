//! State shared between the control handle and the render callback.
//!
//! Every field is an atomic. The three values describing a session start
//! (`start_offset_ms`, `loop_size_ms`, `start_timestamp_ms`) must be observed together, so
//! they are published behind a sequence counter: odd while a writer is mid-update, even
//! once stable. The render thread makes a single read attempt per callback and keeps its
//! previous session when the attempt races a writer; it never waits.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering, fence};
use std::sync::{Mutex, PoisonError};

/// Parameters of one `play` request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionParams {
    pub start_offset_ms: i64,
    /// Loop length; zero or negative means linear playback.
    pub loop_size_ms: i64,
    /// Clock reading taken when `play` was issued.
    pub start_timestamp_ms: i64,
}

impl SessionParams {
    pub fn is_looping(&self) -> bool {
        self.loop_size_ms > 0
    }
}

/// Identifier of a published session; `0` means nothing was ever published.
pub type SessionId = u64;

#[derive(Debug, Default)]
pub(crate) struct SharedState {
    seq: AtomicU64,
    start_offset_ms: AtomicI64,
    loop_size_ms: AtomicI64,
    start_timestamp_ms: AtomicI64,
    writer: Mutex<()>,

    pub(crate) playback_shift_ms: AtomicI64,
    pub(crate) playing: AtomicBool,

    pub(crate) position_samples: AtomicI64,
    pub(crate) size_samples: AtomicI64,
    pub(crate) total_patch_samples: AtomicI64,
    pub(crate) empty_frames: AtomicI64,
    /// Frames already played when the render side adopted the current session.
    pub(crate) session_base_frames: AtomicI64,
    /// Session the render side is playing; lags `seq` until the next callback.
    pub(crate) adopted_session: AtomicU64,

    pub(crate) hard_syncs: AtomicU64,
    pub(crate) soft_sync_steps: AtomicU64,
    /// Last offset the policy saw, as `f64` bits.
    pub(crate) last_offset_bits: AtomicU64,
}

impl SharedState {
    /// Publish a new session. Writers are serialized by a control-side mutex.
    pub(crate) fn publish_session(&self, params: SessionParams) -> SessionId {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let start = self.seq.load(Ordering::Relaxed);
        self.seq.store(start.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        self.start_offset_ms
            .store(params.start_offset_ms, Ordering::Relaxed);
        self.loop_size_ms.store(params.loop_size_ms, Ordering::Relaxed);
        self.start_timestamp_ms
            .store(params.start_timestamp_ms, Ordering::Relaxed);

        let id = start.wrapping_add(2);
        self.seq.store(id, Ordering::Release);
        id
    }

    /// One non-blocking read attempt. `None` if nothing is published or a writer is active.
    pub(crate) fn try_read_session(&self) -> Option<(SessionId, SessionParams)> {
        let before = self.seq.load(Ordering::Acquire);
        if before == 0 || before & 1 == 1 {
            return None;
        }
        let params = SessionParams {
            start_offset_ms: self.start_offset_ms.load(Ordering::Relaxed),
            loop_size_ms: self.loop_size_ms.load(Ordering::Relaxed),
            start_timestamp_ms: self.start_timestamp_ms.load(Ordering::Relaxed),
        };
        fence(Ordering::Acquire);
        let after = self.seq.load(Ordering::Relaxed);
        (before == after).then_some((before, params))
    }

    /// Control-side read; retries until a consistent snapshot is seen.
    pub(crate) fn read_session(&self) -> Option<(SessionId, SessionParams)> {
        loop {
            if self.seq.load(Ordering::Acquire) == 0 {
                return None;
            }
            if let Some(read) = self.try_read_session() {
                return Some(read);
            }
            std::hint::spin_loop();
        }
    }

    pub(crate) fn current_session_id(&self) -> SessionId {
        self.seq.load(Ordering::Acquire)
    }

    /// Whether the render side has picked up session `id` yet.
    pub(crate) fn is_adopted(&self, id: SessionId) -> bool {
        self.adopted_session.load(Ordering::Acquire) == id
    }

    /// Frames that do not count toward the current session's elapsed playback.
    pub(crate) fn excluded_frames(&self) -> i64 {
        self.empty_frames.load(Ordering::Acquire) + self.session_base_frames.load(Ordering::Acquire)
    }

    pub(crate) fn last_offset_ms(&self) -> f64 {
        f64::from_bits(self.last_offset_bits.load(Ordering::Relaxed))
    }

    pub(crate) fn set_last_offset_ms(&self, offset_ms: f64) {
        self.last_offset_bits
            .store(offset_ms.to_bits(), Ordering::Relaxed);
    }
}
