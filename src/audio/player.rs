//! Audio player: bounded sample queue with drop/reset policy, and the audio
//! consumer loop feeding it

use crate::audio::{
    audio_payload, AudioFormat, OutputDevice, PlaybackSource, SampleChunk, VolumeControl,
    DROP_LIMIT, SAMPLE_LIMIT, SAMPLE_SIZE_16,
};
use crate::pipeline::{Shared, Wake};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Backlog limits of the sample queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueLimits {
    /// Pending chunks tolerated before new chunks are dropped
    pub sample_limit: usize,
    /// Consecutive drops tolerated before the player resets
    pub drop_limit: u32,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            sample_limit: SAMPLE_LIMIT,
            drop_limit: DROP_LIMIT,
        }
    }
}

/// Result of handing a chunk to the player
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    /// Chunk queued for playback
    Queued,
    /// Queue backlogged, chunk dropped
    Dropped,
    /// Backlog persisted; player reset and chunk queued on the fresh queue
    Reset,
}

/// Queues sample chunks for an output device.
///
/// Latency is bounded: once more than `sample_limit` chunks are pending,
/// new chunks are dropped. A backlog that outlasts `drop_limit` drops is
/// treated as a desynchronised output and the player starts over with an
/// empty queue and a freshly opened device.
pub struct AudioPlayer<O: OutputDevice> {
    output: O,
    volume: Arc<VolumeControl>,
    limits: QueueLimits,
    tx: Sender<SampleChunk>,
    rx: Receiver<SampleChunk>,
    pending: Arc<AtomicUsize>,
    drops: u32,
    resets: u64,
}

impl<O: OutputDevice> AudioPlayer<O> {
    /// Create a player and open its output
    pub fn new(output: O, volume: Arc<VolumeControl>, limits: QueueLimits) -> Self {
        let (tx, rx) = unbounded();
        let mut player = Self {
            output,
            volume,
            limits,
            tx,
            rx,
            pending: Arc::new(AtomicUsize::new(0)),
            drops: 0,
            resets: 0,
        };
        player.open_output();
        player
    }

    fn open_output(&mut self) {
        let source = PlaybackSource::new(
            self.rx.clone(),
            self.pending.clone(),
            self.volume.clone(),
        );
        if let Err(e) = self.output.open(source) {
            // Keep going without sound; the next reset tries again
            error!("Failed to open audio output: {}", e);
        }
    }

    /// Chunks not yet fully played, the one in progress included
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Current run of consecutive drops
    pub fn drops(&self) -> u32 {
        self.drops
    }

    /// Resets performed so far
    pub fn resets(&self) -> u64 {
        self.resets
    }

    /// The output device
    pub fn output(&self) -> &O {
        &self.output
    }

    /// The output device, mutably
    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }

    /// Queue a chunk, applying the drop/reset policy
    pub fn enqueue(&mut self, chunk: SampleChunk) -> Enqueue {
        let mut outcome = Enqueue::Queued;

        if self.pending() > self.limits.sample_limit {
            self.drops += 1;
            if self.drops <= self.limits.drop_limit {
                trace!("Audio backlog, dropping chunk ({} in a row)", self.drops);
                return Enqueue::Dropped;
            }

            let queued = self.pending() * SAMPLE_SIZE_16;
            warn!(
                "Audio backlog persisted for {} chunks ({:.0} ms queued), resetting output",
                self.drops,
                AudioFormat::device().samples_to_ms(queued)
            );
            self.reset();
            outcome = Enqueue::Reset;
        }

        self.drops = 0;
        // Count before sending; the callback may finish it at once
        self.pending.fetch_add(1, Ordering::AcqRel);
        // Receiver is held by self, send cannot fail
        let _ = self.tx.send(chunk);
        outcome
    }

    /// Flush the queue and reopen the output on a fresh one
    pub fn reset(&mut self) {
        self.output.close();

        let (tx, rx) = unbounded();
        self.tx = tx;
        self.rx = rx;
        self.pending = Arc::new(AtomicUsize::new(0));
        self.drops = 0;
        self.resets += 1;

        self.open_output();
        debug!("Audio player reset (#{})", self.resets);
    }
}

impl<O: OutputDevice> Drop for AudioPlayer<O> {
    fn drop(&mut self) {
        self.output.close();
    }
}

/// Audio consumer loop: waits for ready slots and feeds the player
pub struct AudioConsumer<O: OutputDevice> {
    shared: Arc<Shared>,
    player: AudioPlayer<O>,
}

impl<O: OutputDevice> AudioConsumer<O> {
    /// Create a consumer around a player
    pub fn new(shared: Arc<Shared>, player: AudioPlayer<O>) -> Self {
        Self { shared, player }
    }

    /// The player
    pub fn player(&self) -> &AudioPlayer<O> {
        &self.player
    }

    /// The player, mutably
    pub fn player_mut(&mut self) -> &mut AudioPlayer<O> {
        &mut self.player
    }

    /// Run until the pipeline stops
    pub fn run(&mut self) {
        info!("Audio consumer started");

        while self.shared.is_running() {
            self.step();
        }

        self.player.output.close();
        info!("Audio consumer stopped ({} resets)", self.player.resets);
    }

    /// One wait-and-enqueue cycle. Returns the enqueue outcome if a chunk
    /// was handed to the player.
    pub fn step(&mut self) -> Option<Enqueue> {
        let index = match self.shared.audio().begin_wait() {
            Wake::Abort => return None,
            Wake::Slot(index) => index,
        };

        // Stale pre-reconnect audio must never reach the speakers
        if self.shared.is_resyncing() {
            self.player.reset();
            return None;
        }

        let chunk = self
            .shared
            .slots()
            .with_slot(index, audio_payload)
            .flatten()?;

        Some(self.player.enqueue(chunk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::NullOutput;

    fn player() -> AudioPlayer<NullOutput> {
        AudioPlayer::new(
            NullOutput::new(),
            Arc::new(VolumeControl::new()),
            QueueLimits::default(),
        )
    }

    fn chunk(value: i16) -> SampleChunk {
        SampleChunk::new(vec![value; 4])
    }

    #[test]
    fn test_opens_output_on_creation() {
        let player = player();
        assert!(player.output().is_open());
        assert_eq!(player.output().opens(), 1);
    }

    #[test]
    fn test_drop_then_reset_policy() {
        let mut player = player();

        // Four chunks fit (queue checked before each push)
        for i in 0..4 {
            assert_eq!(player.enqueue(chunk(i)), Enqueue::Queued);
        }
        assert_eq!(player.pending(), 4);

        // The next three are dropped
        for expected_drops in 1..=3 {
            assert_eq!(player.enqueue(chunk(9)), Enqueue::Dropped);
            assert_eq!(player.drops(), expected_drops);
        }
        assert_eq!(player.pending(), 4);

        // The fourth consecutive drop resets and starts a fresh queue
        assert_eq!(player.enqueue(chunk(42)), Enqueue::Reset);
        assert_eq!(player.drops(), 0);
        assert_eq!(player.resets(), 1);
        assert_eq!(player.pending(), 1);
        assert_eq!(player.output().opens(), 2);

        // Only the chunk that triggered the reset is played
        let mut out = [0i16; 8];
        assert_eq!(player.output_mut().pull(&mut out), Some(4));
        assert_eq!(out, [42, 42, 42, 42, 0, 0, 0, 0]);
    }

    #[test]
    fn test_successful_enqueue_clears_drop_run() {
        let mut player = player();
        for i in 0..4 {
            player.enqueue(chunk(i));
        }
        assert_eq!(player.enqueue(chunk(0)), Enqueue::Dropped);
        assert_eq!(player.drops(), 1);

        // Callback drains one chunk, making room
        player.output_mut().pull(&mut [0i16; 4]);
        assert_eq!(player.enqueue(chunk(0)), Enqueue::Queued);
        assert_eq!(player.drops(), 0);
    }

    #[test]
    fn test_partly_played_chunk_still_counts_as_pending() {
        let mut player = player();
        for i in 0..4 {
            assert_eq!(player.enqueue(chunk(i)), Enqueue::Queued);
        }

        // Callback started on the first chunk but has not finished it
        player.output_mut().pull(&mut [0i16; 1]);
        assert_eq!(player.pending(), 4);
        assert_eq!(player.enqueue(chunk(5)), Enqueue::Dropped);

        // Finishing it frees the room
        player.output_mut().pull(&mut [0i16; 3]);
        assert_eq!(player.pending(), 3);
        assert_eq!(player.enqueue(chunk(6)), Enqueue::Queued);
    }

    #[test]
    fn test_reset_flushes_queue() {
        let mut player = player();
        player.enqueue(chunk(1));
        player.enqueue(chunk(2));

        player.reset();

        assert_eq!(player.pending(), 0);
        let mut out = [5i16; 4];
        assert_eq!(player.output_mut().pull(&mut out), Some(0));
        assert_eq!(out, [0; 4]);
    }
}
