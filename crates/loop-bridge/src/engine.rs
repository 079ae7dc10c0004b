//! Stream lifecycle around a loop player.
//!
//! The engine owns the CPAL stream (which is not `Send`, so the engine stays on the thread
//! that created it) and the buffer being looped. Control goes through the [`LoopControl`]
//! handle, which outlives any individual stream: restarting the stream re-attaches a fresh
//! renderer to the same control state and the active session resumes with a hard sync.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, StreamTrait};
use loop_player::buffer::PcmBuffer;
use loop_player::config::SyncConfig;
use loop_player::convert::StreamFormat;
use loop_player::renderer::LoopControl;
use loop_player::timing::Clock;

use crate::playback::{self, CallbackTiming};

pub struct SyncEngine {
    device: cpal::Device,
    stream_config: cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    control: LoopControl,
    timing: Arc<CallbackTiming>,
    buffer: PcmBuffer,
    stream: Option<cpal::Stream>,
    stream_error: Arc<AtomicBool>,
}

impl SyncEngine {
    pub fn new(
        device: cpal::Device,
        supported: &cpal::SupportedStreamConfig,
        buffer_size: Option<cpal::BufferSize>,
        sync: SyncConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let mut stream_config: cpal::StreamConfig = supported.clone().into();
        if let Some(buf) = buffer_size {
            stream_config.buffer_size = buf;
        }
        let format = StreamFormat::pcm16(stream_config.sample_rate, stream_config.channels)
            .context("output stream format")?;
        let timing = Arc::new(CallbackTiming::new());
        let control = LoopControl::new(format, sync, timing.clone(), clock);

        tracing::info!(
            rate_hz = stream_config.sample_rate,
            channels = stream_config.channels,
            sample_format = ?supported.sample_format(),
            buffer_size = ?stream_config.buffer_size,
            "device output config"
        );

        Ok(Self {
            device,
            stream_config,
            sample_format: supported.sample_format(),
            control,
            timing,
            buffer: PcmBuffer::default(),
            stream: None,
            stream_error: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn control(&self) -> LoopControl {
        self.control.clone()
    }

    /// Install `buffer` and (re)start the stream.
    ///
    /// The running stream is torn down first, so the old renderer is never reading while its
    /// buffer is replaced.
    pub fn prepare(&mut self, buffer: PcmBuffer) -> Result<()> {
        self.stop();
        self.buffer = buffer;
        self.start()
    }

    /// Build and start a stream with a fresh renderer over the current buffer.
    pub fn start(&mut self) -> Result<()> {
        let mut renderer = self.control.renderer();
        renderer.prepare(self.buffer.clone());
        self.stream_error.store(false, Ordering::Release);

        let stream = playback::build_output_stream(
            &self.device,
            &self.stream_config,
            self.sample_format,
            renderer,
            self.timing.clone(),
            self.stream_error.clone(),
        )
        .context("build output stream")?;
        stream.play().context("start output stream")?;
        self.stream = Some(stream);
        if let Ok(desc) = self.device.description() {
            tracing::info!(device = %desc, samples = self.buffer.len_samples(), "output stream running");
        }
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                tracing::debug!("stream pause failed: {e}");
            }
        }
    }

    pub fn restart(&mut self) -> Result<()> {
        tracing::info!("restarting output stream");
        self.stop();
        self.start()
    }

    pub fn is_running(&self) -> bool {
        self.stream.is_some()
    }

    /// `true` once the current stream reported an error.
    pub fn has_stream_error(&self) -> bool {
        self.stream_error.load(Ordering::Acquire)
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.control.stop();
        self.stop();
    }
}
