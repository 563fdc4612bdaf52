//! Flags and hand-off points shared by the capture thread and its consumers

use crate::audio::VolumeControl;
use crate::pipeline::{Rendezvous, SlotPool};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

/// Connection state of the capture device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// No device session
    Disconnected = 0,
    /// Handshake in progress
    Connecting = 1,
    /// Transfers armed and being reaped
    Streaming = 2,
    /// Tearing down the device session
    Disconnecting = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Streaming,
            3 => ConnectionState::Disconnecting,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Streaming => "streaming",
            ConnectionState::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}

/// State shared across the pipeline threads.
///
/// Every flag has a single writer. Readers may observe a value one cycle
/// late, which costs at most a dropped or repeated frame.
pub struct Shared {
    slots: SlotPool,
    video: Rendezvous,
    audio: Rendezvous,
    volume: Arc<VolumeControl>,
    running: AtomicBool,
    finished: AtomicBool,
    starting: AtomicBool,
    state: AtomicU8,
    auto_connect: AtomicBool,
    toggle_requested: AtomicBool,
}

impl Shared {
    /// Create shared state around a slot pool
    pub fn new(slots: SlotPool, volume: Arc<VolumeControl>, auto_connect: bool) -> Self {
        Self {
            slots,
            video: Rendezvous::new("video"),
            audio: Rendezvous::new("audio"),
            volume,
            running: AtomicBool::new(true),
            finished: AtomicBool::new(false),
            starting: AtomicBool::new(true),
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            auto_connect: AtomicBool::new(auto_connect),
            toggle_requested: AtomicBool::new(false),
        }
    }

    /// Transfer buffers
    pub fn slots(&self) -> &SlotPool {
        &self.slots
    }

    /// Wake point of the video consumer
    pub fn video(&self) -> &Rendezvous {
        &self.video
    }

    /// Wake point of the audio consumer
    pub fn audio(&self) -> &Rendezvous {
        &self.audio
    }

    /// Playback volume
    pub fn volume(&self) -> &Arc<VolumeControl> {
        &self.volume
    }

    /// Whether the pipeline should keep going
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ask every thread to wind down
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Whether the owner confirmed that all consumers have exited
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Confirm that all consumers have exited; lets the capture thread return
    pub fn mark_finished(&self) {
        self.finished.store(true, Ordering::Release);
    }

    /// Whether delivered slots are still warm-up data to be discarded
    pub fn is_resyncing(&self) -> bool {
        self.starting.load(Ordering::Acquire)
    }

    pub(crate) fn set_resyncing(&self, starting: bool) {
        self.starting.store(starting, Ordering::Release);
    }

    /// Current connection state
    pub fn connection_state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_connection_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Whether the device is streaming
    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Streaming
    }

    /// Whether lost connections are retried automatically
    pub fn auto_connect(&self) -> bool {
        self.auto_connect.load(Ordering::Acquire)
    }

    /// Enable or disable automatic reconnection
    pub fn set_auto_connect(&self, enabled: bool) {
        self.auto_connect.store(enabled, Ordering::Release);
    }

    /// Request one connect attempt when disconnected, or a disconnect when
    /// streaming with auto-connect off
    pub fn request_toggle(&self) {
        self.toggle_requested.store(true, Ordering::Release);
    }

    pub(crate) fn take_toggle_request(&self) -> bool {
        self.toggle_requested.swap(false, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared() -> Shared {
        Shared::new(
            SlotPool::with_capacity(2, 8),
            Arc::new(VolumeControl::new()),
            false,
        )
    }

    #[test]
    fn test_initial_state() {
        let shared = shared();
        assert!(shared.is_running());
        assert!(!shared.is_finished());
        assert!(shared.is_resyncing());
        assert_eq!(shared.connection_state(), ConnectionState::Disconnected);
        assert!(!shared.is_connected());
    }

    #[test]
    fn test_toggle_request_consumed_once() {
        let shared = shared();
        shared.request_toggle();
        assert!(shared.take_toggle_request());
        assert!(!shared.take_toggle_request());
    }

    #[test]
    fn test_state_round_trip() {
        let shared = shared();
        for state in [
            ConnectionState::Connecting,
            ConnectionState::Streaming,
            ConnectionState::Disconnecting,
            ConnectionState::Disconnected,
        ] {
            shared.set_connection_state(state);
            assert_eq!(shared.connection_state(), state);
        }
    }
}
