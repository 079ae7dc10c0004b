//! Load the loop into memory as interleaved `i16`.
//!
//! Two sources are supported:
//! - raw little-endian 16-bit PCM (`.raw` / `.pcm`), layout given on the command line
//! - anything Symphonia can probe, decoded up front
//!
//! The renderer never decodes; everything is converted before the stream starts.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use loop_player::buffer::PcmBuffer;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::io::MediaSource;
use symphonia::core::{
    codecs::DecoderOptions, formats::FormatOptions, io::MediaSourceStream,
    meta::MetadataOptions, probe::Hint,
};

/// Layout of a headerless PCM file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawPcmSpec {
    pub sample_rate: u32,
    pub channels: u16,
}

/// A decoded buffer plus the layout it was decoded in.
#[derive(Clone, Debug)]
pub struct LoadedAudio {
    pub buffer: PcmBuffer,
    pub sample_rate: u32,
    pub channels: u16,
}

impl LoadedAudio {
    /// Length of the buffer in milliseconds, rounded down.
    pub fn duration_ms(&self) -> i64 {
        let frames = self.buffer.len_samples() as i64 / i64::from(self.channels.max(1));
        frames * 1000 / i64::from(self.sample_rate.max(1))
    }
}

fn is_raw_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("raw") || e.eq_ignore_ascii_case("pcm"))
        .unwrap_or(false)
}

/// Load `path`, treating `.raw`/`.pcm` files as headerless PCM laid out as `raw`.
pub fn load(path: &Path, raw: RawPcmSpec) -> Result<LoadedAudio> {
    if is_raw_path(path) {
        let bytes = std::fs::read(path).with_context(|| format!("read {:?}", path))?;
        return load_raw(&bytes, raw);
    }

    let file = File::open(path).with_context(|| format!("open {:?}", path))?;
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }
    decode_media_source(Box::new(file), hint).with_context(|| format!("decode {:?}", path))
}

pub fn load_raw(bytes: &[u8], spec: RawPcmSpec) -> Result<LoadedAudio> {
    if spec.sample_rate == 0 {
        return Err(anyhow!("raw sample rate must be non-zero"));
    }
    let buffer = PcmBuffer::from_le_bytes(bytes, spec.channels)?;
    Ok(LoadedAudio {
        buffer,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}

/// Decode every packet of the default track into one interleaved `i16` buffer.
pub fn decode_media_source(source: Box<dyn MediaSource>, hint: Hint) -> Result<LoadedAudio> {
    let mss = MediaSourceStream::new(source, Default::default());
    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| anyhow!("No default audio track"))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let channels = codec_params
        .channels
        .ok_or_else(|| anyhow!("Unknown channels"))?
        .count();
    let sample_rate = codec_params
        .sample_rate
        .ok_or_else(|| anyhow!("Unknown sample rate"))?;
    let channels = u16::try_from(channels).context("channel count out of range")?;

    let mut decoder =
        symphonia::default::get_codecs().make(&codec_params, &DecoderOptions::default())?;

    let mut samples: Vec<i16> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(_) => break, // EOF
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(e) => {
                tracing::debug!(error = %e, "skipping undecodable packet");
                continue;
            }
        };

        let mut sample_buf = SampleBuffer::<i16>::new(decoded.frames() as u64, *decoded.spec());
        sample_buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(sample_buf.samples());
    }

    if samples.is_empty() {
        return Err(anyhow!("decoded no audio"));
    }
    tracing::info!(
        sample_rate,
        channels,
        samples = samples.len(),
        "decoded loop into memory"
    );
    Ok(LoadedAudio {
        buffer: PcmBuffer::from_samples(samples),
        sample_rate,
        channels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn wav_bytes(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let data_len = (samples.len() * 2) as u32;
        let block_align = channels * 2;
        let mut out = Vec::with_capacity(44 + data_len as usize);
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&channels.to_le_bytes());
        out.extend_from_slice(&sample_rate.to_le_bytes());
        out.extend_from_slice(&(sample_rate * u32::from(block_align)).to_le_bytes());
        out.extend_from_slice(&block_align.to_le_bytes());
        out.extend_from_slice(&16u16.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        for s in samples {
            out.extend_from_slice(&s.to_le_bytes());
        }
        out
    }

    #[test]
    fn decodes_wav_to_interleaved_i16() {
        let samples: Vec<i16> = (0..2_000).map(|i| (i * 7 - 5_000) as i16).collect();
        let bytes = wav_bytes(8_000, 2, &samples);
        let mut hint = Hint::new();
        hint.with_extension("wav");

        let loaded = decode_media_source(Box::new(Cursor::new(bytes)), hint).unwrap();
        assert_eq!(loaded.sample_rate, 8_000);
        assert_eq!(loaded.channels, 2);
        assert_eq!(loaded.buffer.samples(), samples.as_slice());
        assert_eq!(loaded.duration_ms(), 125);
    }

    #[test]
    fn raw_load_uses_given_layout() {
        let bytes = [0x10, 0x00, 0x20, 0x00, 0x30, 0x00, 0x40, 0x00];
        let loaded = load_raw(
            &bytes,
            RawPcmSpec {
                sample_rate: 1_000,
                channels: 2,
            },
        )
        .unwrap();
        assert_eq!(loaded.buffer.samples(), &[16, 32, 48, 64]);
        assert_eq!(loaded.duration_ms(), 2);
    }

    #[test]
    fn raw_load_rejects_zero_rate() {
        let spec = RawPcmSpec {
            sample_rate: 0,
            channels: 2,
        };
        assert!(load_raw(&[0, 0, 0, 0], spec).is_err());
    }

    #[test]
    fn raw_extension_is_case_insensitive() {
        assert!(is_raw_path(Path::new("loop.RAW")));
        assert!(is_raw_path(Path::new("/tmp/loop.pcm")));
        assert!(!is_raw_path(Path::new("loop.flac")));
        assert!(!is_raw_path(Path::new("loop")));
    }
}
