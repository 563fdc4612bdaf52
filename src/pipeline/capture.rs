//! Capture loop: reaps transfers slot by slot and wakes waiting consumers

use crate::device::DeviceLink;
use crate::pipeline::{ConnectionState, Shared, Wake};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Granularity at which a cooldown notices shutdown
const PAUSE_SLICE: Duration = Duration::from_millis(50);

/// Sleep intervals of the capture loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureTiming {
    /// Pause after a failed automatic connect
    pub reconnect_cooldown: Duration,
    /// Pause per iteration while disconnected with auto-connect off
    pub idle_poll: Duration,
    /// Interval between abort publishes while waiting for consumers to exit
    pub drain_poll: Duration,
}

impl Default for CaptureTiming {
    fn default() -> Self {
        Self {
            reconnect_cooldown: Duration::from_secs(5),
            idle_poll: Duration::from_millis(5),
            drain_poll: Duration::from_millis(5),
        }
    }
}

/// Outcome of one capture iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStep {
    /// Disconnected and nothing to do
    Idle,
    /// Device connected and streaming
    Connected,
    /// Connect attempt failed
    ConnectFailed,
    /// Slot reaped and published
    Delivered(usize),
    /// Session ended by request or by a transfer failure
    Disconnected,
}

/// Producer side of the pipeline.
///
/// Owns the device link and is the only writer of the slot buffers, the
/// connection state and the resync flag.
pub struct CaptureLoop<L: DeviceLink> {
    shared: Arc<Shared>,
    link: L,
    timing: CaptureTiming,
    index: usize,
    delivered: u64,
    sessions: u64,
}

impl<L: DeviceLink> CaptureLoop<L> {
    /// Create a loop around a link; nothing is opened yet
    pub fn new(shared: Arc<Shared>, link: L, timing: CaptureTiming) -> Self {
        Self {
            shared,
            link,
            timing,
            index: 0,
            delivered: 0,
            sessions: 0,
        }
    }

    /// Slot the next reap targets
    pub fn index(&self) -> usize {
        self.index
    }

    /// Slots published so far
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Successful connects so far
    pub fn sessions(&self) -> u64 {
        self.sessions
    }

    /// The device link
    pub fn link(&self) -> &L {
        &self.link
    }

    /// Run until the pipeline stops, then drain the consumers
    pub fn run(&mut self) {
        info!("Capture thread started ({})", self.link.name());

        while self.shared.is_running() {
            self.step();
        }

        self.drain();
        info!(
            "Capture thread stopped ({} slots delivered, {} sessions)",
            self.delivered, self.sessions
        );
    }

    /// One iteration of the capture state machine
    pub fn step(&mut self) -> CaptureStep {
        if !self.shared.is_connected() {
            return self.step_disconnected();
        }

        // Auto-connect would bring the session straight back
        if self.shared.take_toggle_request() {
            if self.shared.auto_connect() {
                debug!("Disconnect ignored while auto-connect is on");
            } else {
                info!("Disconnect requested");
                self.end_session();
                return CaptureStep::Disconnected;
            }
        }

        let slot = self.index;
        if let Err(e) = self.link.reap_or_abort(slot, self.shared.slots()) {
            warn!("Transfer on slot {} failed: {}", slot, e);
            self.end_session();
            return CaptureStep::Disconnected;
        }

        self.shared.video().publish(Wake::Slot(slot));
        self.shared.audio().publish(Wake::Slot(slot));
        self.delivered += 1;
        trace!("Slot {} delivered", slot);

        self.index = (self.index + 1) % self.shared.slots().len();
        if self.index == 0 && self.shared.is_resyncing() {
            self.shared.set_resyncing(false);
            debug!("Stream in sync");
        }

        CaptureStep::Delivered(slot)
    }

    fn step_disconnected(&mut self) -> CaptureStep {
        let requested = self.shared.take_toggle_request();
        let auto = self.shared.auto_connect();

        if !requested && !auto {
            thread::sleep(self.timing.idle_poll);
            return CaptureStep::Idle;
        }

        if self.connect() {
            return CaptureStep::Connected;
        }

        if auto {
            self.pause(self.timing.reconnect_cooldown);
        }
        CaptureStep::ConnectFailed
    }

    fn connect(&mut self) -> bool {
        self.shared.set_connection_state(ConnectionState::Connecting);

        match self.link.connect(self.shared.slots()) {
            Ok(()) => {
                self.index = 0;
                self.sessions += 1;
                self.shared.set_resyncing(true);
                self.shared.set_connection_state(ConnectionState::Streaming);
                info!("Connected to capture board ({})", self.link.name());
                true
            }
            Err(e) => {
                self.shared.set_connection_state(ConnectionState::Disconnected);
                if e.is_recoverable() {
                    debug!("Connect failed: {}", e);
                } else {
                    warn!("Connect failed: {}", e);
                }
                false
            }
        }
    }

    fn end_session(&mut self) {
        self.shared.set_connection_state(ConnectionState::Disconnecting);
        self.link.disconnect();
        self.shared.set_connection_state(ConnectionState::Disconnected);

        // Audio is left waiting; it is only released on shutdown
        self.shared.video().publish(Wake::Abort);

        self.shared.set_resyncing(true);
        self.index = 0;
        info!("Disconnected from capture board");
    }

    /// Sleep for `duration`, cut short when the pipeline stops
    fn pause(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while self.shared.is_running() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(PAUSE_SLICE));
        }
    }

    /// Close the session and keep waking both consumers until the owner
    /// confirms they have exited
    pub fn drain(&mut self) {
        if self.shared.connection_state() != ConnectionState::Disconnected {
            self.shared.set_connection_state(ConnectionState::Disconnecting);
            self.link.disconnect();
            self.shared.set_connection_state(ConnectionState::Disconnected);
        }

        debug!("Draining consumers");
        while !self.shared.is_finished() {
            self.shared.audio().publish(Wake::Abort);
            self.shared.video().publish(Wake::Abort);
            thread::sleep(self.timing.drain_poll);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::VolumeControl;
    use crate::device::SimulatedDevice;
    use crate::pipeline::{SlotPool, SLOT_COUNT};

    fn timing() -> CaptureTiming {
        CaptureTiming {
            reconnect_cooldown: Duration::from_millis(10),
            idle_poll: Duration::from_millis(1),
            drain_poll: Duration::from_millis(1),
        }
    }

    fn capture(auto_connect: bool) -> (Arc<Shared>, CaptureLoop<SimulatedDevice>) {
        let shared = Arc::new(Shared::new(
            SlotPool::new(),
            Arc::new(VolumeControl::new()),
            auto_connect,
        ));
        let capture = CaptureLoop::new(shared.clone(), SimulatedDevice::new(), timing());
        (shared, capture)
    }

    #[test]
    fn test_idle_without_request() {
        let (shared, mut capture) = capture(false);
        assert_eq!(capture.step(), CaptureStep::Idle);
        assert_eq!(shared.connection_state(), ConnectionState::Disconnected);
        assert_eq!(capture.link().control().connects(), 0);
    }

    #[test]
    fn test_toggle_connects_once() {
        let (shared, mut capture) = capture(false);
        shared.request_toggle();
        assert_eq!(capture.step(), CaptureStep::Connected);
        assert!(shared.is_connected());
        assert!(shared.is_resyncing());
        assert_eq!(capture.sessions(), 1);
    }

    #[test]
    fn test_resync_clears_after_full_cycle() {
        let (shared, mut capture) = capture(true);
        assert_eq!(capture.step(), CaptureStep::Connected);

        for slot in 0..SLOT_COUNT {
            assert!(shared.is_resyncing());
            assert_eq!(capture.step(), CaptureStep::Delivered(slot));
        }
        assert!(!shared.is_resyncing());
        assert_eq!(capture.index(), 0);

        assert_eq!(capture.step(), CaptureStep::Delivered(0));
        assert!(!shared.is_resyncing());
    }

    #[test]
    fn test_reap_failure_ends_session() {
        let (shared, mut capture) = capture(true);
        capture.step();
        capture.step();
        capture.step();
        assert_eq!(capture.index(), 2);

        capture.link().control().fail_next_reap();
        assert_eq!(capture.step(), CaptureStep::Disconnected);
        assert_eq!(shared.connection_state(), ConnectionState::Disconnected);
        assert!(shared.is_resyncing());
        assert_eq!(capture.index(), 0);
        assert_eq!(capture.link().control().disconnects(), 1);

        // Auto-connect brings it straight back
        assert_eq!(capture.step(), CaptureStep::Connected);
        assert_eq!(capture.sessions(), 2);
    }

    #[test]
    fn test_manual_toggle_disconnects() {
        let (shared, mut capture) = capture(false);
        shared.request_toggle();
        capture.step();
        capture.step();

        shared.request_toggle();
        assert_eq!(capture.step(), CaptureStep::Disconnected);
        assert_eq!(capture.step(), CaptureStep::Idle);
        assert_eq!(capture.link().control().connects(), 1);
    }

    #[test]
    fn test_toggle_ignored_with_auto_connect() {
        let (shared, mut capture) = capture(true);
        assert_eq!(capture.step(), CaptureStep::Connected);

        shared.request_toggle();
        assert_eq!(capture.step(), CaptureStep::Delivered(0));
        assert_eq!(shared.connection_state(), ConnectionState::Streaming);
        assert_eq!(capture.link().control().disconnects(), 0);

        // The request was consumed, not deferred
        shared.set_auto_connect(false);
        assert_eq!(capture.step(), CaptureStep::Delivered(1));
    }

    #[test]
    fn test_no_reconnect_without_auto_connect() {
        let (shared, mut capture) = capture(false);
        shared.request_toggle();
        capture.step();
        capture.link().control().fail_next_reap();
        assert_eq!(capture.step(), CaptureStep::Disconnected);

        for _ in 0..5 {
            assert_eq!(capture.step(), CaptureStep::Idle);
        }
        assert_eq!(capture.link().control().connects(), 1);
    }

    #[test]
    fn test_failed_auto_connect_retries() {
        let (shared, mut capture) = capture(true);
        capture.link().control().fail_next_connects(2);

        assert_eq!(capture.step(), CaptureStep::ConnectFailed);
        assert_eq!(capture.step(), CaptureStep::ConnectFailed);
        assert_eq!(shared.connection_state(), ConnectionState::Disconnected);
        assert_eq!(capture.step(), CaptureStep::Connected);
        assert_eq!(capture.link().control().connects(), 3);
    }

    #[test]
    fn test_drain_returns_once_finished() {
        let (shared, mut capture) = capture(true);
        capture.step();
        shared.stop();
        shared.mark_finished();

        capture.run();
        assert_eq!(shared.connection_state(), ConnectionState::Disconnected);
        assert_eq!(capture.link().control().disconnects(), 1);
    }
}
