//! Audio output devices pulling samples from the player queue

use crate::audio::{AudioFormat, SampleChunk, VolumeControl};
use crate::error::{CaptureError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, Stream, StreamConfig};
use crossbeam_channel::Receiver;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Pull side of the sample queue, owned by the output callback.
///
/// `pending` counts chunks not yet fully played, including the one in
/// progress. The source decrements it when a chunk's last sample is out.
pub struct PlaybackSource {
    queue: Receiver<SampleChunk>,
    current: Option<SampleChunk>,
    pending: Arc<AtomicUsize>,
    volume: Arc<VolumeControl>,
}

impl PlaybackSource {
    /// Create a source draining `queue` at the given volume
    pub fn new(
        queue: Receiver<SampleChunk>,
        pending: Arc<AtomicUsize>,
        volume: Arc<VolumeControl>,
    ) -> Self {
        Self {
            queue,
            current: None,
            pending,
            volume,
        }
    }

    /// Fill `out` with queued samples, padding the shortfall with silence.
    ///
    /// Never blocks. Returns the number of queued samples written.
    pub fn fill(&mut self, out: &mut [i16]) -> usize {
        let gain = self.volume.gain();
        let mut written = 0;

        while written < out.len() {
            if self.current.is_none() {
                match self.queue.try_recv() {
                    Ok(chunk) => self.current = Some(chunk),
                    Err(_) => break,
                }
            }

            let Some(chunk) = self.current.as_mut() else {
                break;
            };

            written += chunk.drain_into(&mut out[written..], gain);

            if chunk.is_drained() {
                self.current = None;
                self.pending.fetch_sub(1, Ordering::AcqRel);
            }
        }

        out[written..].fill(0);
        written
    }
}

/// An audio sink that can be (re)opened on a fresh sample queue
pub trait OutputDevice {
    /// Start playing from `source`, replacing any previous stream
    fn open(&mut self, source: PlaybackSource) -> Result<()>;

    /// Stop and release the current stream
    fn close(&mut self);

    /// Whether a stream is currently open
    fn is_open(&self) -> bool;
}

/// Default host output device through cpal
pub struct CpalOutput {
    format: AudioFormat,
    stream: Option<Stream>,
}

impl CpalOutput {
    /// Create an output for the capture board's format; nothing is opened yet
    pub fn new() -> Self {
        Self {
            format: AudioFormat::device(),
            stream: None,
        }
    }

    fn build_stream(&self, mut source: PlaybackSource) -> Result<Stream> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| CaptureError::AudioOutput("No audio output device found".into()))?;

        debug!(
            "Opening audio output {} ({})",
            device.name().unwrap_or_else(|_| "unknown".to_string()),
            self.format
        );

        let config = StreamConfig {
            channels: self.format.channels,
            sample_rate: SampleRate(self.format.sample_rate),
            buffer_size: BufferSize::Default,
        };

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    // Real-time thread: no blocking, no rendezvous
                    source.fill(data);
                },
                move |err| {
                    error!("Audio output stream error: {}", err);
                },
                None,
            )
            .map_err(|e| CaptureError::AudioOutput(e.to_string()))?;

        stream
            .play()
            .map_err(|e| CaptureError::AudioOutput(e.to_string()))?;

        Ok(stream)
    }
}

impl Default for CpalOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputDevice for CpalOutput {
    fn open(&mut self, source: PlaybackSource) -> Result<()> {
        self.close();
        let stream = self.build_stream(source)?;
        self.stream = Some(stream);
        info!("Audio output opened: {}", self.format);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
            debug!("Audio output closed");
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

/// Output that plays nothing; the caller pulls samples by hand.
///
/// Used headless and in tests to observe exactly what a callback would get.
#[derive(Default)]
pub struct NullOutput {
    source: Option<PlaybackSource>,
    opens: usize,
}

impl NullOutput {
    /// Create a closed output
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times the output was (re)opened
    pub fn opens(&self) -> usize {
        self.opens
    }

    /// Emulate one device callback. Returns queued samples written, or
    /// `None` while closed.
    pub fn pull(&mut self, out: &mut [i16]) -> Option<usize> {
        self.source.as_mut().map(|source| source.fill(out))
    }
}

impl OutputDevice for NullOutput {
    fn open(&mut self, source: PlaybackSource) -> Result<()> {
        self.source = Some(source);
        self.opens += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.source = None;
    }

    fn is_open(&self) -> bool {
        self.source.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    fn source(chunks: &[&[i16]], volume: Arc<VolumeControl>) -> PlaybackSource {
        let (tx, rx) = unbounded();
        for chunk in chunks {
            tx.send(SampleChunk::new(chunk.to_vec())).unwrap();
        }
        PlaybackSource::new(rx, Arc::new(AtomicUsize::new(chunks.len())), volume)
    }

    #[test]
    fn test_fill_spans_chunks_and_pads_silence() {
        let mut source = source(&[&[1, 2, 3], &[4, 5]], Arc::new(VolumeControl::new()));
        let mut out = [9i16; 8];

        assert_eq!(source.fill(&mut out), 5);
        assert_eq!(out, [1, 2, 3, 4, 5, 0, 0, 0]);
    }

    #[test]
    fn test_fill_keeps_partial_chunk() {
        let mut source = source(&[&[10, 20, 30, 40]], Arc::new(VolumeControl::new()));
        let mut out = [0i16; 3];

        assert_eq!(source.fill(&mut out), 3);
        assert_eq!(out, [10, 20, 30]);
        assert_eq!(source.fill(&mut out), 1);
        assert_eq!(out, [40, 0, 0]);
    }

    #[test]
    fn test_pending_released_only_when_chunk_finishes() {
        let mut source = source(&[&[1, 2, 3], &[4]], Arc::new(VolumeControl::new()));
        let pending = source.pending.clone();

        source.fill(&mut [0i16; 2]);
        assert_eq!(pending.load(Ordering::Acquire), 2);

        source.fill(&mut [0i16; 1]);
        assert_eq!(pending.load(Ordering::Acquire), 1);

        source.fill(&mut [0i16; 4]);
        assert_eq!(pending.load(Ordering::Acquire), 0);
    }

    #[test]
    fn test_fill_applies_gain() {
        let volume = Arc::new(VolumeControl::with_volume(50, false));
        let mut source = source(&[&[1000, -1000]], volume.clone());
        let mut out = [0i16; 2];

        source.fill(&mut out);
        assert_eq!(out, [250, -250]);
    }

    #[test]
    fn test_fill_muted_still_consumes() {
        let volume = Arc::new(VolumeControl::with_volume(100, true));
        let mut source = source(&[&[1000, 1000], &[7]], volume.clone());
        let mut out = [5i16; 2];

        assert_eq!(source.fill(&mut out), 2);
        assert_eq!(out, [0, 0]);

        volume.set_muted(false);
        assert_eq!(source.fill(&mut out), 1);
        assert_eq!(out, [7, 0]);
    }

    #[test]
    fn test_fill_empty_queue_is_silence() {
        let mut source = source(&[], Arc::new(VolumeControl::new()));
        let mut out = [3i16; 4];
        assert_eq!(source.fill(&mut out), 0);
        assert_eq!(out, [0; 4]);
    }

    #[test]
    fn test_null_output_reopen() {
        let mut output = NullOutput::new();
        assert!(!output.is_open());
        assert_eq!(output.pull(&mut [0i16; 4]), None);

        output
            .open(source(&[&[1]], Arc::new(VolumeControl::new())))
            .unwrap();
        assert!(output.is_open());
        assert_eq!(output.opens(), 1);
        assert_eq!(output.pull(&mut [0i16; 4]), Some(1));

        output.close();
        assert!(!output.is_open());
    }
}
