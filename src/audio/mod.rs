//! Audio demultiplexing, queueing and playback

mod demux;
mod output;
mod player;
mod volume;

pub use demux::{audio_payload, unpack_pcm, SampleChunk};
pub use output::{CpalOutput, NullOutput, OutputDevice, PlaybackSource};
pub use player::{AudioConsumer, AudioPlayer, Enqueue, QueueLimits};
pub use volume::VolumeControl;

/// Output sample rate of the capture board
pub const SAMPLE_RATE: u32 = 32734;

/// Interleaved channels
pub const AUDIO_CHANNELS: u16 = 2;

/// Audio bytes trailing each video frame
pub const SAMPLE_SIZE_8: usize = 2192;

/// Samples per audio chunk
pub const SAMPLE_SIZE_16: usize = SAMPLE_SIZE_8 / 2;

/// Queued chunks tolerated before new ones are dropped
pub const SAMPLE_LIMIT: usize = 3;

/// Consecutive drops tolerated before the player resets
pub const DROP_LIMIT: u32 = 3;

/// Audio format information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl AudioFormat {
    /// Format delivered by the capture board
    pub const fn device() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            channels: AUDIO_CHANNELS,
            bits_per_sample: 16,
        }
    }

    /// Calculate bytes per second
    pub fn bytes_per_second(&self) -> u32 {
        self.sample_rate * self.channels as u32 * (self.bits_per_sample as u32 / 8)
    }

    /// Milliseconds of audio in `samples` interleaved samples
    pub fn samples_to_ms(&self, samples: usize) -> f64 {
        samples as f64 * 1000.0 / (self.sample_rate as f64 * self.channels as f64)
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}Hz {}ch {}bit",
            self.sample_rate, self.channels, self.bits_per_sample
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_format() {
        let format = AudioFormat::device();
        assert_eq!(format.to_string(), "32734Hz 2ch 16bit");
        assert_eq!(format.bytes_per_second(), 32734 * 4);
    }

    #[test]
    fn test_chunk_duration() {
        // One chunk is a little over one 60 fps frame
        let ms = AudioFormat::device().samples_to_ms(SAMPLE_SIZE_16);
        assert!(ms > 16.0 && ms < 17.5, "{ms}");
    }
}
