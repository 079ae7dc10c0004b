//! Loop renderer and its control handle.
//!
//! [`LoopControl`] is the thread-safe side: `play`, `stop`, `set_playback_shift` and the
//! position getters. [`LoopRenderer`] is the real-time side: it owns the PCM buffer and the
//! read cursor and is driven once per device period through [`RenderSource::render`].
//!
//! ## Real-time constraints
//! `render` never blocks, never allocates and never takes a lock. Anything worth logging is
//! queued as a [`SyncEvent`] and written out by another thread.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use crossbeam_channel::{Receiver, Sender};
use loop_sync_types::SyncStatus;

use crate::buffer::PcmBuffer;
use crate::config::SyncConfig;
use crate::convert::StreamFormat;
use crate::events::{self, SyncEvent};
use crate::session::{SessionId, SessionParams, SharedState};
use crate::sync::{self, SyncDecision};
use crate::timing::{Clock, DeviceTiming};

/// Anything the output stream can pull interleaved frames from.
pub trait RenderSource: Send {
    /// Fill `frame_count` frames of `out`. Slots beyond `frame_count` are silenced.
    fn render<T>(&mut self, out: &mut [T], frame_count: usize)
    where
        T: cpal::Sample + cpal::FromSample<i16>;
}

/// Position derived from device feedback.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Observation {
    position_ms: f64,
    latency_ms: f64,
    latency_estimated: bool,
}

/// `start_offset + written + patch`, wrapped when looping.
///
/// `written` counts frames the device has consumed for this session: everything written,
/// minus frames emitted as silence while stopped, minus frames played before the session
/// was adopted, minus the frames still in the output pipeline (latency).
fn observe(
    format: &StreamFormat,
    config: &SyncConfig,
    timing: &dyn DeviceTiming,
    params: &SessionParams,
    excluded_frames: i64,
    total_patch_samples: i64,
) -> Observation {
    let (latency_ms, latency_estimated) = match timing.output_latency_ms() {
        Some(ms) if ms.is_finite() && ms >= 0.0 => (ms, false),
        _ => (config.default_latency_ms, true),
    };
    let latency_frames = format.millis_to_frames(latency_ms);
    let written_frames = timing.frames_written() - excluded_frames - latency_frames;
    let played_ms = params.start_offset_ms as f64
        + format.frames_to_millis(written_frames)
        + format.samples_to_millis(total_patch_samples);
    let position_ms = if params.is_looping() {
        played_ms.rem_euclid(params.loop_size_ms as f64)
    } else {
        played_ms
    };
    Observation {
        position_ms,
        latency_ms,
        latency_estimated,
    }
}

/// Position of a session the render side has not picked up yet: its start offset.
fn pending_position_ms(params: &SessionParams) -> f64 {
    if params.is_looping() {
        params.start_offset_ms.rem_euclid(params.loop_size_ms) as f64
    } else {
        params.start_offset_ms as f64
    }
}

/// Thread-safe control surface of a loop player.
#[derive(Clone)]
pub struct LoopControl {
    shared: Arc<SharedState>,
    format: StreamFormat,
    config: SyncConfig,
    timing: Arc<dyn DeviceTiming>,
    clock: Arc<dyn Clock>,
    events_tx: Sender<SyncEvent>,
    events_rx: Receiver<SyncEvent>,
}

impl LoopControl {
    pub fn new(
        format: StreamFormat,
        config: SyncConfig,
        timing: Arc<dyn DeviceTiming>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let config = config.sanitized();
        let (events_tx, events_rx) = events::event_channel(config.event_queue_capacity);
        Self {
            shared: Arc::new(SharedState::default()),
            format,
            config,
            timing,
            clock,
            events_tx,
            events_rx,
        }
    }

    /// Create a render side attached to this control state, with an empty buffer.
    ///
    /// A fresh renderer adopts the currently published session on its first callback and
    /// hard-syncs to it, which is what a restarted stream needs.
    pub fn renderer(&self) -> LoopRenderer {
        LoopRenderer {
            shared: self.shared.clone(),
            format: self.format,
            config: self.config.clone(),
            timing: self.timing.clone(),
            clock: self.clock.clone(),
            events: self.events_tx.clone(),
            buffer: PcmBuffer::default(),
            session_id: 0,
            session: SessionParams::default(),
            cursor: ReadCursor::default(),
            just_started: false,
            soft_active: false,
            frames_since_step: 0,
            exhausted_reported: false,
        }
    }

    /// Start (or restart) looped playback at `offset_ms` within a loop of `loop_size_ms`.
    ///
    /// `loop_size_ms <= 0` plays the buffer linearly. The next callback hard-syncs.
    pub fn play(&self, offset_ms: i64, loop_size_ms: i64) -> SessionId {
        let id = self.shared.publish_session(SessionParams {
            start_offset_ms: offset_ms,
            loop_size_ms,
            start_timestamp_ms: self.clock.now_millis(),
        });
        self.shared.playing.store(true, Ordering::Release);
        tracing::debug!(session_id = id, offset_ms, loop_size_ms, "play requested");
        id
    }

    /// Silence the output from the next callback on.
    pub fn stop(&self) {
        self.shared.playing.store(false, Ordering::Release);
    }

    pub fn set_playback_shift(&self, shift_ms: i64) {
        self.shared
            .playback_shift_ms
            .store(shift_ms, Ordering::Release);
    }

    pub fn playback_shift_ms(&self) -> i64 {
        self.shared.playback_shift_ms.load(Ordering::Acquire)
    }

    pub fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::Acquire)
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Receiver for render-thread diagnostics (see [`events::spawn_event_logger`]).
    pub fn events(&self) -> Receiver<SyncEvent> {
        self.events_rx.clone()
    }

    fn observation(&self) -> Option<(SessionId, SessionParams, Observation)> {
        let (id, params) = self.shared.read_session()?;
        let mut obs = observe(
            &self.format,
            &self.config,
            self.timing.as_ref(),
            &params,
            self.shared.excluded_frames(),
            self.shared.total_patch_samples.load(Ordering::Acquire),
        );
        if !self.shared.is_adopted(id) {
            // Counters still describe the previous session until the next callback.
            obs.position_ms = pending_position_ms(&params);
        }
        Some((id, params, obs))
    }

    /// Where the output actually is, in milliseconds. `0` before the first `play`.
    pub fn current_position_millis(&self) -> i64 {
        self.observation()
            .map(|(_, _, obs)| obs.position_ms.floor() as i64)
            .unwrap_or(0)
    }

    /// Where the output should be according to the wall clock, if a session exists.
    pub fn target_position_millis(&self) -> Option<i64> {
        let (_, params) = self.shared.read_session()?;
        let elapsed = self.clock.now_millis() - params.start_timestamp_ms;
        let target = sync::estimated_target_ms(
            params.start_offset_ms,
            elapsed,
            self.playback_shift_ms(),
            params.loop_size_ms,
        );
        Some(target as i64)
    }

    /// Cumulative correction applied since the session started.
    pub fn total_patch_millis(&self) -> f64 {
        match self.shared.read_session() {
            Some((id, _)) if !self.shared.is_adopted(id) => 0.0,
            _ => self
                .format
                .samples_to_millis(self.shared.total_patch_samples.load(Ordering::Acquire)),
        }
    }

    pub fn status(&self) -> SyncStatus {
        let observation = self.observation();
        let (session_id, params, obs) = match observation {
            Some(found) => (found.0, found.1, Some(found.2)),
            None => (0, SessionParams::default(), None),
        };
        SyncStatus {
            playing: self.is_playing(),
            session_id,
            position_ms: obs.map(|o| o.position_ms.floor() as i64).unwrap_or(0),
            target_ms: self.target_position_millis(),
            drift_ms: self.shared.last_offset_ms(),
            start_offset_ms: params.start_offset_ms,
            loop_size_ms: params.loop_size_ms,
            playback_shift_ms: self.playback_shift_ms(),
            total_patch_ms: self.total_patch_millis(),
            latency_ms: obs.map(|o| o.latency_ms).unwrap_or(0.0),
            latency_estimated: obs.map(|o| o.latency_estimated).unwrap_or(false),
            hard_syncs: self.shared.hard_syncs.load(Ordering::Relaxed),
            soft_sync_steps: self.shared.soft_sync_steps.load(Ordering::Relaxed),
            empty_frames: self.shared.empty_frames.load(Ordering::Acquire),
            position_samples: self.shared.position_samples.load(Ordering::Acquire),
            size_samples: self.shared.size_samples.load(Ordering::Acquire),
            sample_rate: self.format.sample_rate(),
            channels: self.format.channels(),
        }
    }
}

/// Read position into the buffer, in samples.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct ReadCursor {
    position: i64,
    /// Loop length (looping) or buffer length (linear).
    size: i64,
    looping: bool,
}

impl ReadCursor {
    fn for_session(params: &SessionParams, format: &StreamFormat, buffer_len: i64) -> Self {
        let loop_samples = if params.is_looping() {
            format.millis_to_samples(params.loop_size_ms as f64)
        } else {
            0
        };
        let mut cursor = if loop_samples > 0 {
            Self {
                position: 0,
                size: loop_samples,
                looping: true,
            }
        } else {
            Self {
                position: 0,
                size: buffer_len,
                looping: false,
            }
        };
        cursor.shift(format.millis_to_samples(params.start_offset_ms as f64));
        cursor
    }

    /// Move by `delta` samples: modulo the loop, or clamped to the buffer when linear.
    ///
    /// Returns the movement actually made, which is less than `delta` when a linear cursor
    /// hits either end of the buffer.
    fn shift(&mut self, delta: i64) -> i64 {
        let moved = self.position.saturating_add(delta);
        if self.looping {
            self.position = moved.rem_euclid(self.size);
            delta
        } else {
            let clamped = moved.clamp(0, self.size.max(0));
            let applied = clamped - self.position;
            self.position = clamped;
            applied
        }
    }

    #[inline]
    fn advance(&mut self) {
        if self.looping {
            self.position += 1;
            if self.position >= self.size {
                self.position = 0;
            }
        } else if self.position < self.size {
            self.position += 1;
        }
    }

    fn at_end(&self) -> bool {
        !self.looping && self.position >= self.size
    }
}

/// Real-time side of a loop player. Move it into the device callback.
pub struct LoopRenderer {
    shared: Arc<SharedState>,
    format: StreamFormat,
    config: SyncConfig,
    timing: Arc<dyn DeviceTiming>,
    clock: Arc<dyn Clock>,
    events: Sender<SyncEvent>,
    buffer: PcmBuffer,
    session_id: SessionId,
    session: SessionParams,
    cursor: ReadCursor,
    just_started: bool,
    soft_active: bool,
    /// Frames rendered since the last soft step slot; carried across callbacks.
    frames_since_step: usize,
    exhausted_reported: bool,
}

impl LoopRenderer {
    /// Install the PCM buffer to play.
    ///
    /// Needs `&mut self`, so it cannot race a running callback: the stream owning this
    /// renderer has to be stopped (or not yet built) first. The active session, if any, is
    /// re-adopted on the next callback.
    pub fn prepare(&mut self, buffer: PcmBuffer) {
        self.buffer = buffer;
        self.session_id = 0;
    }

    pub fn buffer(&self) -> &PcmBuffer {
        &self.buffer
    }

    /// Adopt a newly published session, if there is one.
    fn refresh_session(&mut self) {
        if self.shared.current_session_id() == self.session_id {
            return;
        }
        let Some((id, params)) = self.shared.try_read_session() else {
            return;
        };
        let buffer_len = i64::try_from(self.buffer.len_samples()).unwrap_or(i64::MAX);
        self.session_id = id;
        self.session = params;
        self.cursor = ReadCursor::for_session(&params, &self.format, buffer_len);
        self.just_started = true;
        self.soft_active = false;
        self.frames_since_step = 0;
        self.exhausted_reported = false;
        let base = self.timing.frames_written() - self.shared.empty_frames.load(Ordering::Acquire);
        self.shared
            .session_base_frames
            .store(base, Ordering::Release);
        self.shared.total_patch_samples.store(0, Ordering::Release);
        self.shared.hard_syncs.store(0, Ordering::Relaxed);
        self.shared.soft_sync_steps.store(0, Ordering::Relaxed);
        self.shared
            .size_samples
            .store(self.cursor.size, Ordering::Release);
        self.shared.adopted_session.store(id, Ordering::Release);
        events::emit(
            &self.events,
            SyncEvent::SessionStarted {
                offset_ms: params.start_offset_ms,
                loop_size_ms: params.loop_size_ms,
                position_samples: self.cursor.position,
            },
        );
    }

    /// Run the sync policy for this callback. Returns the per-step soft nudge in samples.
    fn apply_sync(&mut self) -> i64 {
        let obs = observe(
            &self.format,
            &self.config,
            self.timing.as_ref(),
            &self.session,
            self.shared.excluded_frames(),
            self.shared.total_patch_samples.load(Ordering::Acquire),
        );
        let elapsed_ms = self.clock.now_millis() - self.session.start_timestamp_ms;
        let target_ms = sync::estimated_target_ms(
            self.session.start_offset_ms,
            elapsed_ms,
            self.shared.playback_shift_ms.load(Ordering::Acquire),
            self.session.loop_size_ms,
        );
        let offset_ms =
            sync::normalized_offset_ms(target_ms, obs.position_ms, self.session.loop_size_ms);
        self.shared.set_last_offset_ms(offset_ms);

        match sync::decide(offset_ms, self.just_started, &self.config) {
            SyncDecision::Hard { offset_ms } => {
                let patch = self.cursor.shift(self.format.millis_to_samples(offset_ms));
                self.shared
                    .total_patch_samples
                    .fetch_add(patch, Ordering::AcqRel);
                self.shared.hard_syncs.fetch_add(1, Ordering::Relaxed);
                self.just_started = false;
                self.soft_active = false;
                self.frames_since_step = 0;
                events::emit(
                    &self.events,
                    SyncEvent::HardSync {
                        offset_ms,
                        patch_samples: patch,
                        latency_ms: obs.latency_ms,
                        latency_estimated: obs.latency_estimated,
                    },
                );
                0
            }
            SyncDecision::Soft {
                offset_ms,
                direction,
            } => {
                if !self.soft_active {
                    self.soft_active = true;
                    events::emit(
                        &self.events,
                        SyncEvent::SoftSyncStarted {
                            offset_ms,
                            direction,
                        },
                    );
                }
                // One step moves every channel of a frame together.
                direction * i64::from(self.format.channels())
            }
            SyncDecision::InSync { offset_ms } => {
                if self.soft_active {
                    self.soft_active = false;
                    events::emit(&self.events, SyncEvent::SoftSyncSettled { offset_ms });
                }
                0
            }
        }
    }
}

impl RenderSource for LoopRenderer {
    fn render<T>(&mut self, out: &mut [T], frame_count: usize)
    where
        T: cpal::Sample + cpal::FromSample<i16>,
    {
        let channels = usize::from(self.format.channels());
        let available_frames = out.len() / channels;

        if !self.shared.playing.load(Ordering::Acquire) {
            out.fill(T::EQUILIBRIUM);
            self.shared
                .empty_frames
                .fetch_add(available_frames as i64, Ordering::AcqRel);
            return;
        }

        self.refresh_session();
        if self.session_id == 0 {
            out.fill(T::EQUILIBRIUM);
            return;
        }

        let nudge = self.apply_sync();
        let frames = frame_count.min(available_frames);
        let interval = self.config.soft_sync_interval_frames as usize;
        let samples = self.buffer.samples();
        let mut patch = 0i64;
        let mut steps = 0u64;

        let (active, rest) = out.split_at_mut(frames * channels);
        for frame in active.chunks_exact_mut(channels) {
            for slot in frame.iter_mut() {
                *slot = usize::try_from(self.cursor.position)
                    .ok()
                    .and_then(|i| samples.get(i))
                    .map(|&s| T::from_sample(s))
                    .unwrap_or(T::EQUILIBRIUM);
                self.cursor.advance();
            }
            self.frames_since_step += 1;
            if self.frames_since_step >= interval {
                self.frames_since_step = 0;
                if nudge != 0 {
                    let applied = self.cursor.shift(nudge);
                    if applied != 0 {
                        patch += applied;
                        steps += 1;
                    }
                }
            }
        }
        rest.fill(T::EQUILIBRIUM);

        if patch != 0 {
            self.shared
                .total_patch_samples
                .fetch_add(patch, Ordering::AcqRel);
            self.shared
                .soft_sync_steps
                .fetch_add(steps, Ordering::Relaxed);
        }
        self.shared
            .position_samples
            .store(self.cursor.position, Ordering::Release);

        if self.cursor.at_end() && !self.exhausted_reported {
            self.exhausted_reported = true;
            events::emit(
                &self.events,
                SyncEvent::BufferExhausted {
                    position_samples: self.cursor.position,
                },
            );
        }
    }
}
