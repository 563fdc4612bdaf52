//! PCM reconstruction from the audio tail of a transfer

use crate::audio::SAMPLE_SIZE_16;
use crate::video::FRAME_SIZE_RGB;

/// A run of interleaved samples plus the playback cursor into it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleChunk {
    samples: Vec<i16>,
    offset: usize,
}

impl SampleChunk {
    /// Wrap decoded samples
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples, offset: 0 }
    }

    /// Total samples in the chunk
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the chunk holds no samples at all
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples not yet played
    pub fn remaining(&self) -> usize {
        self.samples.len() - self.offset
    }

    /// Whether every sample has been played
    pub fn is_drained(&self) -> bool {
        self.offset >= self.samples.len()
    }

    /// Copy as many samples as fit into `out`, scaled by `gain`.
    ///
    /// Returns the number of samples written and advances the cursor.
    pub fn drain_into(&mut self, out: &mut [i16], gain: f32) -> usize {
        let count = out.len().min(self.remaining());
        let src = &self.samples[self.offset..self.offset + count];

        for (dst, &sample) in out[..count].iter_mut().zip(src) {
            *dst = (sample as f32 * gain) as i16;
        }

        self.offset += count;
        count
    }
}

/// Pack little-endian byte pairs into 16-bit samples.
///
/// A trailing odd byte is ignored.
pub fn unpack_pcm(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Extract the audio chunk that follows the video frame in a transfer.
///
/// Returns `None` when the transfer carries no audio beyond the frame.
pub fn audio_payload(transfer: &[u8]) -> Option<SampleChunk> {
    if transfer.len() <= FRAME_SIZE_RGB {
        return None;
    }

    let mut samples = unpack_pcm(&transfer[FRAME_SIZE_RGB..]);
    samples.truncate(SAMPLE_SIZE_16);
    Some(SampleChunk::new(samples))
}
