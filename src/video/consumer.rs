//! Video consumer loop: waits for ready slots and hands frames to the renderer

use crate::pipeline::{Shared, Wake};
use crate::video::{demux_frame, VideoFrame};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, trace};

/// Longest single wait for a slot before the connection state is re-checked
const WAIT_TIMEOUT: Duration = Duration::from_millis(250);

/// Receiver of demuxed frames (the rendering collaborator)
pub trait FrameSink {
    /// Show a freshly demuxed frame
    fn present(&mut self, frame: &VideoFrame);

    /// Show the "no signal" placeholder
    fn present_placeholder(&mut self);
}

/// Outcome of one consumer iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoEvent {
    /// Device not streaming, placeholder shown
    Idle,
    /// Woken by the abort sentinel
    Aborted,
    /// No slot arrived within the wait timeout
    TimedOut,
    /// Stream still warming up, placeholder shown
    Resyncing(usize),
    /// Slot too short or overwritten while reading
    Discarded(usize),
    /// Frame demuxed and presented
    Presented(usize),
}

/// Pulls ready slots from the capture thread and demuxes them.
///
/// Usually driven on the main thread, which also owns rendering.
pub struct VideoConsumer {
    shared: Arc<Shared>,
    frame: VideoFrame,
    idle_poll: Duration,
    presented: u64,
    discarded: u64,
}

impl VideoConsumer {
    /// Create a consumer; `idle_poll` is the pause between placeholder
    /// refreshes while disconnected
    pub fn new(shared: Arc<Shared>, idle_poll: Duration) -> Self {
        Self {
            shared,
            frame: VideoFrame::new(),
            idle_poll,
            presented: 0,
            discarded: 0,
        }
    }

    /// Frames presented so far
    pub fn presented(&self) -> u64 {
        self.presented
    }

    /// Slots discarded so far
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Last demuxed frame
    pub fn frame(&self) -> &VideoFrame {
        &self.frame
    }

    /// Run until the pipeline stops
    pub fn run<S: FrameSink + ?Sized>(&mut self, sink: &mut S) {
        info!("Video consumer started");

        while self.shared.is_running() {
            self.step(sink);
        }

        info!(
            "Video consumer stopped ({} presented, {} discarded)",
            self.presented, self.discarded
        );
    }

    /// One wait-and-present cycle
    pub fn step<S: FrameSink + ?Sized>(&mut self, sink: &mut S) -> VideoEvent {
        // Nothing is published while disconnected, so do not block
        if !self.shared.is_connected() {
            sink.present_placeholder();
            thread::sleep(self.idle_poll);
            return VideoEvent::Idle;
        }

        // Bounded: an abort published just before arming would be lost
        let index = match self.shared.video().begin_wait_timeout(WAIT_TIMEOUT) {
            None => return VideoEvent::TimedOut,
            Some(Wake::Abort) => {
                debug!("Video wait aborted");
                return VideoEvent::Aborted;
            }
            Some(Wake::Slot(index)) => index,
        };

        if self.shared.is_resyncing() {
            sink.present_placeholder();
            return VideoEvent::Resyncing(index);
        }

        let frame = &mut self.frame;
        let demuxed = self
            .shared
            .slots()
            .with_slot(index, |bytes| demux_frame(bytes, frame.pixels_mut()));

        match demuxed {
            Some(Ok(())) => {
                sink.present(&self.frame);
                self.presented += 1;
                VideoEvent::Presented(index)
            }
            Some(Err(e)) => {
                trace!("Slot {} discarded: {}", index, e);
                self.discarded += 1;
                VideoEvent::Discarded(index)
            }
            None => {
                debug!("Slot {} overwritten while demuxing, discarded", index);
                self.discarded += 1;
                VideoEvent::Discarded(index)
            }
        }
    }
}
