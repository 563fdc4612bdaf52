//! Pipeline - owner of the capture and audio threads

use crate::audio::{AudioConsumer, AudioPlayer, OutputDevice, QueueLimits, VolumeControl};
use crate::device::DeviceLink;
use crate::error::{CaptureError, Result};
use crate::pipeline::{CaptureLoop, CaptureTiming, ConnectionState, Shared, SlotPool, Wake};
use crate::video::{FrameSink, VideoConsumer};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info};

/// Abort publish interval when the audio thread has to be released without
/// a capture thread
const RELEASE_POLL: Duration = Duration::from_millis(5);

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Reconnect automatically after a lost or failed connection
    pub auto_connect: bool,
    /// Initial volume, 0-100
    pub volume: u32,
    /// Start muted
    pub muted: bool,
    /// Capture loop sleep intervals
    pub timing: CaptureTiming,
    /// Pause between placeholder refreshes while disconnected
    pub video_idle_poll: Duration,
    /// Audio backlog limits
    pub limits: QueueLimits,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            auto_connect: false,
            volume: 100,
            muted: false,
            timing: CaptureTiming::default(),
            video_idle_poll: Duration::from_millis(16),
            limits: QueueLimits::default(),
        }
    }
}

/// Pipeline lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Created, threads not started
    Idle,
    /// Capture (and audio) threads running
    Running,
    /// Shutdown in progress
    ShuttingDown,
    /// Threads joined; cannot be restarted
    Stopped,
}

/// Cloneable control surface for other threads (signal handlers, UI)
#[derive(Clone)]
pub struct PipelineHandle {
    shared: Arc<Shared>,
}

impl PipelineHandle {
    /// Enable or disable automatic reconnection
    pub fn set_auto_connect(&self, enabled: bool) {
        info!("Auto-connect {}", if enabled { "enabled" } else { "disabled" });
        self.shared.set_auto_connect(enabled);
    }

    /// Whether automatic reconnection is enabled
    pub fn auto_connect(&self) -> bool {
        self.shared.auto_connect()
    }

    /// Make one connect attempt while disconnected. While streaming this
    /// disconnects, unless auto-connect is on.
    pub fn toggle_connection(&self) {
        self.shared.request_toggle();
    }

    /// Ask the pipeline to stop; the owner still has to call
    /// [`Pipeline::shutdown`]
    pub fn stop(&self) {
        self.shared.stop();
    }

    /// Whether the pipeline is still running
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Current connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.shared.connection_state()
    }

    /// Playback volume and mute
    pub fn volume(&self) -> &Arc<VolumeControl> {
        self.shared.volume()
    }
}

/// Capture pipeline: device link, slot pool and both consumers.
///
/// Lifecycle is `new` -> `start` -> `run_video` -> `shutdown`. The capture
/// thread and the audio thread are owned here; video runs on the caller's
/// thread because rendering usually has to.
pub struct Pipeline {
    config: PipelineConfig,
    shared: Arc<Shared>,
    state: Mutex<PipelineState>,
    capture_handle: Option<JoinHandle<()>>,
    audio_handle: Option<JoinHandle<()>>,
}

impl Pipeline {
    /// Allocate the slot pool and shared state
    pub fn new(config: PipelineConfig) -> Self {
        let volume = Arc::new(VolumeControl::with_volume(config.volume, config.muted));
        let shared = Arc::new(Shared::new(SlotPool::new(), volume, config.auto_connect));
        Self {
            config,
            shared,
            state: Mutex::new(PipelineState::Idle),
            capture_handle: None,
            audio_handle: None,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> PipelineState {
        *self.state.lock()
    }

    /// Shared state, for inspection
    pub fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// A control handle usable from other threads
    pub fn handle(&self) -> PipelineHandle {
        PipelineHandle {
            shared: self.shared.clone(),
        }
    }

    /// Start capturing with audio playback.
    ///
    /// `output` runs on the audio thread, so the device itself need not be
    /// `Send`.
    pub fn start<L, O, F>(&mut self, link: L, output: F) -> Result<()>
    where
        L: DeviceLink + 'static,
        O: OutputDevice + 'static,
        F: FnOnce() -> O + Send + 'static,
    {
        self.begin_start()?;

        let shared = self.shared.clone();
        let limits = self.config.limits;
        let spawned = thread::Builder::new()
            .name("audio".into())
            .spawn(move || {
                let player = AudioPlayer::new(output(), shared.volume().clone(), limits);
                AudioConsumer::new(shared, player).run();
            });
        match spawned {
            Ok(handle) => self.audio_handle = Some(handle),
            Err(e) => {
                *self.state.lock() = PipelineState::Idle;
                return Err(e.into());
            }
        }

        self.spawn_capture(link)
    }

    /// Start capturing without an audio consumer
    pub fn start_video_only<L>(&mut self, link: L) -> Result<()>
    where
        L: DeviceLink + 'static,
    {
        self.begin_start()?;
        self.spawn_capture(link)
    }

    fn begin_start(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state != PipelineState::Idle {
            return Err(CaptureError::AlreadyRunning);
        }
        *state = PipelineState::Running;
        info!("Starting capture pipeline...");
        Ok(())
    }

    fn spawn_capture<L>(&mut self, link: L) -> Result<()>
    where
        L: DeviceLink + 'static,
    {
        // First attempt happens regardless of auto-connect
        self.shared.request_toggle();

        let shared = self.shared.clone();
        let timing = self.config.timing;
        let spawned = thread::Builder::new()
            .name("capture".into())
            .spawn(move || CaptureLoop::new(shared, link, timing).run());

        match spawned {
            Ok(handle) => {
                self.capture_handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                error!("Failed to spawn capture thread: {}", e);
                self.release_audio();
                Err(e.into())
            }
        }
    }

    /// Stop and join the audio thread with no capture thread to wake it
    fn release_audio(&mut self) {
        self.shared.stop();
        if let Some(handle) = self.audio_handle.take() {
            while !handle.is_finished() {
                self.shared.audio().publish(Wake::Abort);
                thread::sleep(RELEASE_POLL);
            }
            let _ = handle.join();
        }
        self.shared.mark_finished();
        *self.state.lock() = PipelineState::Stopped;
    }

    /// Run the video consumer on the calling thread until the pipeline
    /// stops. Returns the consumer for its last frame and counters.
    ///
    /// Shutdown borrows the pipeline mutably, so it can only begin once
    /// this has returned.
    pub fn run_video<S: FrameSink + ?Sized>(&self, sink: &mut S) -> VideoConsumer {
        let mut consumer = VideoConsumer::new(self.shared.clone(), self.config.video_idle_poll);
        consumer.run(sink);
        consumer
    }

    /// Stop every thread and wait for them.
    ///
    /// The capture thread keeps waking consumers until they are all gone,
    /// so a consumer blocked in a wait cannot hang shutdown.
    pub fn shutdown(&mut self) -> Result<()> {
        {
            let mut state = self.state.lock();
            match *state {
                PipelineState::Running => *state = PipelineState::ShuttingDown,
                PipelineState::Idle => {
                    *state = PipelineState::Stopped;
                    self.shared.stop();
                    return Ok(());
                }
                PipelineState::ShuttingDown | PipelineState::Stopped => return Ok(()),
            }
        }

        info!("Stopping capture pipeline...");
        self.shutdown_threads();
        info!("Capture pipeline stopped");
        Ok(())
    }

    fn shutdown_threads(&mut self) {
        self.shared.stop();

        if let Some(handle) = self.audio_handle.take() {
            if handle.join().is_err() {
                error!("Audio thread panicked");
            }
            debug!("Audio thread joined");
        }

        self.shared.mark_finished();

        if let Some(handle) = self.capture_handle.take() {
            if handle.join().is_err() {
                error!("Capture thread panicked");
            }
            debug!("Capture thread joined");
        }

        *self.state.lock() = PipelineState::Stopped;
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::NullOutput;
    use crate::device::SimulatedDevice;

    #[test]
    fn test_config_defaults() {
        let config = PipelineConfig::default();
        assert!(!config.auto_connect);
        assert_eq!(config.volume, 100);
        assert_eq!(config.timing.reconnect_cooldown, Duration::from_secs(5));
        assert_eq!(config.limits, QueueLimits::default());
    }

    #[test]
    fn test_start_twice_rejected() {
        let mut pipeline = Pipeline::new(PipelineConfig::default());
        pipeline.start_video_only(SimulatedDevice::new()).unwrap();
        assert_eq!(pipeline.state(), PipelineState::Running);

        let again = pipeline.start(SimulatedDevice::new(), NullOutput::new);
        assert!(matches!(again, Err(CaptureError::AlreadyRunning)));

        pipeline.shutdown().unwrap();
        assert_eq!(pipeline.state(), PipelineState::Stopped);
    }

    #[test]
    fn test_shutdown_before_start() {
        let mut pipeline = Pipeline::new(PipelineConfig::default());
        pipeline.shutdown().unwrap();
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert!(!pipeline.handle().is_running());
    }

    #[test]
    fn test_handle_controls_shared_state() {
        let pipeline = Pipeline::new(PipelineConfig {
            volume: 40,
            muted: true,
            ..Default::default()
        });
        let handle = pipeline.handle();

        assert_eq!(handle.volume().volume(), 40);
        assert!(handle.volume().is_muted());
        assert_eq!(handle.connection_state(), ConnectionState::Disconnected);

        handle.set_auto_connect(true);
        assert!(pipeline.shared().auto_connect());

        handle.stop();
        assert!(!pipeline.shared().is_running());
    }
}
