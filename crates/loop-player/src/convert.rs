//! Time/sample conversion.
//!
//! All positions inside the renderer are kept in **samples** (one channel value), while the
//! control surface speaks milliseconds. The helpers here map between the two, always landing
//! on whole-frame boundaries so a conversion never splits a frame across channels.

use anyhow::{Result, anyhow};

/// Layout of the interleaved PCM stream handed to the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamFormat {
    sample_rate: u32,
    channels: u16,
    bytes_per_sample: u16,
}

impl StreamFormat {
    /// Validate and build a stream layout.
    pub fn new(sample_rate: u32, channels: u16, bytes_per_sample: u16) -> Result<Self> {
        if sample_rate == 0 {
            return Err(anyhow!("sample rate must be non-zero"));
        }
        if channels == 0 {
            return Err(anyhow!("channel count must be non-zero"));
        }
        if bytes_per_sample == 0 {
            return Err(anyhow!("bytes per sample must be non-zero"));
        }
        Ok(Self {
            sample_rate,
            channels,
            bytes_per_sample,
        })
    }

    /// Interleaved signed 16-bit layout, the format [`crate::buffer::PcmBuffer`] stores.
    pub fn pcm16(sample_rate: u32, channels: u16) -> Result<Self> {
        Self::new(sample_rate, channels, 2)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn bytes_per_sample(&self) -> u16 {
        self.bytes_per_sample
    }

    pub fn bytes_per_frame(&self) -> i64 {
        i64::from(self.channels) * i64::from(self.bytes_per_sample)
    }

    fn bytes_per_second(&self) -> f64 {
        (self.bytes_per_frame() * i64::from(self.sample_rate)) as f64
    }

    /// Bytes covered by `millis`, truncated toward zero to a whole frame.
    pub fn millis_to_bytes(&self, millis: f64) -> i64 {
        let bytes = (millis * self.bytes_per_second() / 1000.0) as i64;
        let frame = self.bytes_per_frame();
        bytes / frame * frame
    }

    pub fn millis_to_samples(&self, millis: f64) -> i64 {
        self.millis_to_bytes(millis) / i64::from(self.bytes_per_sample)
    }

    pub fn millis_to_frames(&self, millis: f64) -> i64 {
        self.millis_to_bytes(millis) / self.bytes_per_frame()
    }

    pub fn samples_to_millis(&self, samples: i64) -> f64 {
        let bytes = samples * i64::from(self.bytes_per_sample);
        bytes as f64 * 1000.0 / self.bytes_per_second()
    }

    pub fn frames_to_millis(&self, frames: i64) -> f64 {
        frames as f64 * 1000.0 / f64::from(self.sample_rate)
    }

    /// Duration of a single frame; the precision bound of every conversion above.
    pub fn frame_millis(&self) -> f64 {
        1000.0 / f64::from(self.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo_48k() -> StreamFormat {
        StreamFormat::pcm16(48_000, 2).unwrap()
    }

    #[test]
    fn new_rejects_zero_parameters() {
        assert!(StreamFormat::new(0, 2, 2).is_err());
        assert!(StreamFormat::new(48_000, 0, 2).is_err());
        assert!(StreamFormat::new(48_000, 2, 0).is_err());
    }

    #[test]
    fn millis_to_bytes_matches_stream_rate() {
        let fmt = stereo_48k();
        assert_eq!(fmt.bytes_per_frame(), 4);
        assert_eq!(fmt.millis_to_bytes(1.0), 192);
        assert_eq!(fmt.millis_to_bytes(500.0), 96_000);
        assert_eq!(fmt.millis_to_samples(500.0), 48_000);
        assert_eq!(fmt.millis_to_frames(500.0), 24_000);
    }

    #[test]
    fn millis_to_bytes_never_splits_a_frame() {
        let fmt = StreamFormat::pcm16(44_100, 2).unwrap();
        for tenth in 0..5_000 {
            let ms = f64::from(tenth) / 10.0;
            assert_eq!(fmt.millis_to_bytes(ms) % fmt.bytes_per_frame(), 0);
            assert_eq!(fmt.millis_to_samples(ms) % 2, 0);
        }
    }

    #[test]
    fn negative_millis_truncate_toward_zero() {
        let fmt = stereo_48k();
        assert_eq!(fmt.millis_to_samples(-250.0), -24_000);
        assert_eq!(fmt.millis_to_bytes(-0.01), 0);
        assert_eq!(
            fmt.millis_to_samples(-12.345),
            -fmt.millis_to_samples(12.345)
        );
    }

    #[test]
    fn samples_round_trip_within_one_frame() {
        for fmt in [
            stereo_48k(),
            StreamFormat::pcm16(44_100, 2).unwrap(),
            StreamFormat::pcm16(22_050, 1).unwrap(),
        ] {
            for ms in (0..3_000).step_by(7) {
                let ms = f64::from(ms) + 0.37;
                let back = fmt.samples_to_millis(fmt.millis_to_samples(ms));
                assert!((ms - back).abs() <= fmt.frame_millis(), "{ms} vs {back}");
            }
        }
    }

    #[test]
    fn frames_to_millis_uses_sample_rate_only() {
        let fmt = StreamFormat::pcm16(48_000, 6).unwrap();
        assert_eq!(fmt.frames_to_millis(48_000), 1000.0);
        assert_eq!(fmt.frames_to_millis(-4_800), -100.0);
    }
}
