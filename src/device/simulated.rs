//! In-process stand-in for the capture board

use crate::audio::SAMPLE_SIZE_16;
use crate::device::protocol::{self, PRODUCT_DESCRIPTIONS};
use crate::device::DeviceLink;
use crate::error::{CaptureError, Result};
use crate::pipeline::{SlotPool, BUF_SIZE};
use crate::video::FRAME_SIZE_RGB;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Identification word the simulated board answers with by default
const SIM_IDENTIFICATION: u32 = 0x00c3_b5a1;

/// Knobs and counters of a [`SimulatedDevice`], shareable with a test while
/// the device is owned by the capture thread
pub struct SimControl {
    present: AtomicBool,
    fail_connects: AtomicU32,
    fail_next_reap: AtomicBool,
    identification: AtomicU32,
    payload_len: AtomicUsize,
    connects: AtomicU32,
    disconnects: AtomicU32,
    reaps: AtomicU64,
}

impl SimControl {
    fn new() -> Self {
        Self {
            present: AtomicBool::new(true),
            fail_connects: AtomicU32::new(0),
            fail_next_reap: AtomicBool::new(false),
            identification: AtomicU32::new(SIM_IDENTIFICATION),
            payload_len: AtomicUsize::new(BUF_SIZE),
            connects: AtomicU32::new(0),
            disconnects: AtomicU32::new(0),
            reaps: AtomicU64::new(0),
        }
    }

    /// Plug the board in
    pub fn plug(&self) {
        self.present.store(true, Ordering::SeqCst);
    }

    /// Pull the cable: connects fail and the next reap fails
    pub fn unplug(&self) {
        self.present.store(false, Ordering::SeqCst);
    }

    /// Make the next `count` connect attempts fail during the handshake
    pub fn fail_next_connects(&self, count: u32) {
        self.fail_connects.store(count, Ordering::SeqCst);
    }

    /// Make the next reap fail as if the abort had failed
    pub fn fail_next_reap(&self) {
        self.fail_next_reap.store(true, Ordering::SeqCst);
    }

    /// Identification word returned during the handshake
    pub fn set_identification(&self, id: u32) {
        self.identification.store(id, Ordering::SeqCst);
    }

    /// Bytes delivered per transfer (defaults to a full transfer)
    pub fn set_payload_len(&self, len: usize) {
        self.payload_len.store(len, Ordering::SeqCst);
    }

    /// Connect attempts so far
    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Disconnects of a live session so far
    pub fn disconnects(&self) -> u32 {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Successful reaps so far
    pub fn reaps(&self) -> u64 {
        self.reaps.load(Ordering::SeqCst)
    }
}

/// Simulated board producing a deterministic test pattern.
///
/// Transfer `n` (counted from 0 over the device's lifetime) carries
/// [`pattern_pixel`] pixels followed by [`pattern_sample`] samples.
pub struct SimulatedDevice {
    control: Arc<SimControl>,
    frame_interval: Option<Duration>,
    connected: bool,
    sequence: u64,
    last_reap: Option<Instant>,
}

impl SimulatedDevice {
    /// A board that delivers transfers as fast as they are reaped
    pub fn new() -> Self {
        Self {
            control: Arc::new(SimControl::new()),
            frame_interval: None,
            connected: false,
            sequence: 0,
            last_reap: None,
        }
    }

    /// A board that delivers `fps` transfers per second
    pub fn paced(fps: u32) -> Self {
        let mut device = Self::new();
        device.frame_interval = Some(Duration::from_secs(1) / fps.max(1));
        device
    }

    /// Shared handle for scripting failures and reading counters
    pub fn control(&self) -> Arc<SimControl> {
        self.control.clone()
    }

    fn pace(&mut self) {
        if let (Some(interval), Some(last)) = (self.frame_interval, self.last_reap) {
            let elapsed = last.elapsed();
            if elapsed < interval {
                thread::sleep(interval - elapsed);
            }
        }
        self.last_reap = Some(Instant::now());
    }

    fn write_transfer(&self, slots: &SlotPool, slot: usize) -> usize {
        let len = self
            .control
            .payload_len
            .load(Ordering::SeqCst)
            .min(slots.capacity());

        // SAFETY: the capture thread is the only writer and owns `slot` until
        // it is published; the pointer covers `capacity()` bytes.
        let buffer = unsafe { std::slice::from_raw_parts_mut(slots.buffer_ptr(slot), len) };

        let video_len = len.min(FRAME_SIZE_RGB);
        for (pixel, rgb) in buffer[..video_len].chunks_mut(3).enumerate() {
            let value = pattern_pixel(self.sequence, pixel);
            rgb.copy_from_slice(&value[..rgb.len()]);
        }

        if len > FRAME_SIZE_RGB {
            for (index, pair) in buffer[FRAME_SIZE_RGB..].chunks_mut(2).enumerate() {
                let bytes = pattern_sample(self.sequence, index).to_le_bytes();
                pair.copy_from_slice(&bytes[..pair.len()]);
            }
        }

        len
    }
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

/// Raw RGB value of `pixel` in transfer `sequence`
pub fn pattern_pixel(sequence: u64, pixel: usize) -> [u8; 3] {
    [
        (pixel as u64).wrapping_add(sequence) as u8,
        (pixel >> 8) as u8,
        sequence as u8,
    ]
}

/// Sample `index` of transfer `sequence`
pub fn pattern_sample(sequence: u64, index: usize) -> i16 {
    (sequence as usize)
        .wrapping_mul(SAMPLE_SIZE_16)
        .wrapping_add(index) as i16
}

impl DeviceLink for SimulatedDevice {
    fn name(&self) -> &str {
        "simulated"
    }

    fn connect(&mut self, slots: &SlotPool) -> Result<()> {
        self.control.connects.fetch_add(1, Ordering::SeqCst);

        if !self.control.present.load(Ordering::SeqCst) {
            return Err(CaptureError::DeviceNotFound(PRODUCT_DESCRIPTIONS.join(", ")));
        }

        let pending_failures = self.control.fail_connects.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.control
                .fail_connects
                .store(pending_failures - 1, Ordering::SeqCst);
            return Err(CaptureError::handshake("configure", "simulated write failure"));
        }

        let reply =
            protocol::identification_reply(self.control.identification.load(Ordering::SeqCst));
        let id = protocol::parse_identification(&reply)
            .ok_or_else(|| CaptureError::handshake("identify", "short reply"))?;
        if !protocol::identification_valid(id) {
            return Err(CaptureError::Identification(id));
        }

        slots.clear();
        self.connected = true;
        self.last_reap = None;
        info!("Simulated board connected (id 0x{:08x})", id);
        Ok(())
    }

    fn reap_or_abort(&mut self, slot: usize, slots: &SlotPool) -> Result<()> {
        if !self.connected {
            return Err(CaptureError::NotConnected);
        }
        if slot >= slots.len() {
            return Err(CaptureError::transfer(slot, "slot out of range"));
        }
        if !self.control.present.load(Ordering::SeqCst) {
            return Err(CaptureError::transfer(slot, "device removed"));
        }
        if self.control.fail_next_reap.swap(false, Ordering::SeqCst) {
            return Err(CaptureError::transfer(slot, "abort failed"));
        }

        self.pace();
        let len = self.write_transfer(slots, slot);
        slots.complete(slot, len);

        self.sequence += 1;
        self.control.reaps.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        self.control.disconnects.fetch_add(1, Ordering::SeqCst);
        debug!("Simulated board disconnected");
    }
}
