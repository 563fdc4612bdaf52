//! One-shot wake hand-off between the capture thread and a consumer

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Value delivered to a waiting consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// Slot index whose transfer was just reaped
    Slot(usize),
    /// Stream aborted or shutting down; the consumer should re-check state
    Abort,
}

/// Single-producer single-consumer wake point for one consumer role.
///
/// A consumer arms the rendezvous and blocks in [`begin_wait`](Self::begin_wait).
/// The producer delivers a value with [`publish`](Self::publish) only if the
/// consumer is armed; otherwise the value is dropped and the producer moves
/// on. Each delivery disarms, so every wait receives at most one value.
pub struct Rendezvous {
    name: &'static str,
    waiting: AtomicBool,
    tx: Sender<Wake>,
    rx: Receiver<Wake>,
}

impl Rendezvous {
    /// Create an idle rendezvous for the named consumer role
    pub fn new(name: &'static str) -> Self {
        // One slot is enough: a value is only sent after disarming, and the
        // consumer drains it before it can arm again.
        let (tx, rx) = bounded(1);
        Self {
            name,
            waiting: AtomicBool::new(false),
            tx,
            rx,
        }
    }

    /// Consumer role name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether a consumer is currently armed
    pub fn is_waiting(&self) -> bool {
        self.waiting.load(Ordering::Acquire)
    }

    /// Arm and block until the producer delivers a value
    pub fn begin_wait(&self) -> Wake {
        self.waiting.store(true, Ordering::Release);
        match self.rx.recv() {
            Ok(wake) => wake,
            // Sender lives in self, cannot disconnect while we are borrowed
            Err(_) => Wake::Abort,
        }
    }

    /// Arm and block for at most `timeout`.
    ///
    /// On timeout the rendezvous is disarmed again. If the producer disarmed
    /// it concurrently, the value already on its way is taken instead.
    pub fn begin_wait_timeout(&self, timeout: Duration) -> Option<Wake> {
        self.waiting.store(true, Ordering::Release);
        match self.rx.recv_timeout(timeout) {
            Ok(wake) => Some(wake),
            Err(RecvTimeoutError::Timeout) => {
                if self.waiting.swap(false, Ordering::AcqRel) {
                    None
                } else {
                    self.rx.recv().ok()
                }
            }
            Err(RecvTimeoutError::Disconnected) => Some(Wake::Abort),
        }
    }

    /// Deliver `wake` if a consumer is armed. Never blocks.
    ///
    /// Returns whether the value was delivered.
    pub fn publish(&self, wake: Wake) -> bool {
        if !self.waiting.swap(false, Ordering::AcqRel) {
            return false;
        }

        self.tx.try_send(wake).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn wait_until_armed(rv: &Rendezvous) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !rv.is_waiting() {
            assert!(Instant::now() < deadline, "consumer never armed");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_publish_without_waiter_is_dropped() {
        let rv = Rendezvous::new("video");
        assert!(!rv.publish(Wake::Slot(3)));
        assert!(!rv.is_waiting());

        // Nothing was queued: a later wait times out
        assert_eq!(rv.begin_wait_timeout(Duration::from_millis(10)), None);
    }

    #[test]
    fn test_delivers_to_waiter_once() {
        let rv = Arc::new(Rendezvous::new("audio"));
        let consumer = {
            let rv = rv.clone();
            thread::spawn(move || rv.begin_wait())
        };

        wait_until_armed(&rv);
        assert!(rv.publish(Wake::Slot(5)));
        // Disarmed by the delivery, the second publish is dropped
        assert!(!rv.publish(Wake::Slot(6)));

        assert_eq!(consumer.join().unwrap(), Wake::Slot(5));
        assert!(!rv.is_waiting());
    }

    #[test]
    fn test_rearm_required_for_next_value() {
        let rv = Arc::new(Rendezvous::new("video"));
        let consumer = {
            let rv = rv.clone();
            thread::spawn(move || {
                let first = rv.begin_wait();
                let second = rv.begin_wait();
                (first, second)
            })
        };

        wait_until_armed(&rv);
        assert!(rv.publish(Wake::Slot(0)));
        wait_until_armed(&rv);
        assert!(rv.publish(Wake::Abort));

        assert_eq!(consumer.join().unwrap(), (Wake::Slot(0), Wake::Abort));
    }

    #[test]
    fn test_wait_timeout_disarms() {
        let rv = Rendezvous::new("video");
        assert_eq!(rv.begin_wait_timeout(Duration::from_millis(5)), None);
        assert!(!rv.is_waiting());
        assert!(!rv.publish(Wake::Slot(1)));
    }
}
