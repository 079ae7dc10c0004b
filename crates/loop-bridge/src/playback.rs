//! Playback stage (CPAL output stream).
//!
//! Builds the CPAL output stream around a [`RenderSource`] and records the timing facts the
//! sync policy needs. The callback:
//! - lets the renderer fill the device buffer (converting `i16` to the device format)
//! - counts frames handed to the device
//! - records the callback-to-playback latency CPAL reports

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow};
use cpal::traits::DeviceTrait;
use loop_player::renderer::RenderSource;
use loop_player::timing::DeviceTiming;

const LATENCY_UNAVAILABLE: i64 = -1;

/// Device progress as observed from inside the output callback.
#[derive(Debug)]
pub struct CallbackTiming {
    frames_written: AtomicI64,
    latency_us: AtomicI64,
}

impl CallbackTiming {
    pub fn new() -> Self {
        Self {
            frames_written: AtomicI64::new(0),
            latency_us: AtomicI64::new(LATENCY_UNAVAILABLE),
        }
    }

    /// Account for one callback that produced `frames` frames.
    pub fn record(&self, frames: i64, latency: Option<Duration>) {
        self.frames_written.fetch_add(frames, Ordering::AcqRel);
        let us = latency
            .and_then(|d| i64::try_from(d.as_micros()).ok())
            .unwrap_or(LATENCY_UNAVAILABLE);
        self.latency_us.store(us, Ordering::Release);
    }
}

impl Default for CallbackTiming {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceTiming for CallbackTiming {
    fn frames_written(&self) -> i64 {
        self.frames_written.load(Ordering::Acquire)
    }

    fn output_latency_ms(&self) -> Option<f64> {
        let us = self.latency_us.load(Ordering::Acquire);
        (us >= 0).then(|| us as f64 / 1000.0)
    }
}

/// Build a CPAL output stream that plays whatever `source` renders.
///
/// ## Real-time constraints
/// The callback only touches atomics and the renderer, which never blocks. Stream errors
/// are logged by CPAL's error thread and raise `stream_error`.
pub fn build_output_stream<R>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    source: R,
    timing: Arc<CallbackTiming>,
    stream_error: Arc<AtomicBool>,
) -> Result<cpal::Stream>
where
    R: RenderSource + 'static,
{
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32, R>(device, config, source, timing, stream_error),
        cpal::SampleFormat::I16 => build_stream::<i16, R>(device, config, source, timing, stream_error),
        cpal::SampleFormat::I32 => build_stream::<i32, R>(device, config, source, timing, stream_error),
        cpal::SampleFormat::U16 => build_stream::<u16, R>(device, config, source, timing, stream_error),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

/// Type-specialized stream builder for CPAL sample formats.
fn build_stream<T, R>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut source: R,
    timing: Arc<CallbackTiming>,
    stream_error: Arc<AtomicBool>,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample + cpal::FromSample<i16>,
    R: RenderSource + 'static,
{
    let channels = usize::from(config.channels.max(1));

    let err_fn = move |err: cpal::StreamError| {
        tracing::warn!("stream error: {err}");
        stream_error.store(true, Ordering::Release);
    };

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], info: &cpal::OutputCallbackInfo| {
            let frames = data.len() / channels;
            source.render(data, frames);
            let stamp = info.timestamp();
            timing.record(frames as i64, stamp.playback.duration_since(&stamp.callback));
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}
