//! Immutable PCM storage played by the renderer.

use std::sync::Arc;

use anyhow::{Result, anyhow};

/// Interleaved signed 16-bit samples, shared without copying.
#[derive(Clone, Debug, Default)]
pub struct PcmBuffer {
    samples: Arc<[i16]>,
}

impl PcmBuffer {
    pub fn from_samples(samples: Vec<i16>) -> Self {
        Self {
            samples: samples.into(),
        }
    }

    /// Parse raw little-endian 16-bit PCM.
    ///
    /// The byte length must be a whole number of frames for `channels`.
    pub fn from_le_bytes(bytes: &[u8], channels: u16) -> Result<Self> {
        if channels == 0 {
            return Err(anyhow!("channel count must be non-zero"));
        }
        let frame_bytes = 2 * usize::from(channels);
        if bytes.len() % frame_bytes != 0 {
            return Err(anyhow!(
                "PCM length {} is not a multiple of the {frame_bytes}-byte frame",
                bytes.len()
            ));
        }
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect::<Vec<_>>();
        Ok(Self::from_samples(samples))
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_le_bytes_decodes_samples() {
        let bytes = [0x01, 0x00, 0xff, 0xff, 0x00, 0x80, 0xff, 0x7f];
        let buf = PcmBuffer::from_le_bytes(&bytes, 2).unwrap();
        assert_eq!(buf.samples(), &[1, -1, i16::MIN, i16::MAX]);
        assert_eq!(buf.len_samples(), 4);
    }

    #[test]
    fn from_le_bytes_rejects_partial_frames() {
        assert!(PcmBuffer::from_le_bytes(&[0, 0, 0], 1).is_err());
        assert!(PcmBuffer::from_le_bytes(&[0, 0, 0, 0, 0, 0], 2).is_err());
        assert!(PcmBuffer::from_le_bytes(&[0, 0], 0).is_err());
    }

    #[test]
    fn default_is_empty() {
        assert!(PcmBuffer::default().is_empty());
    }
}
