//! Device links: the I/O boundary between the capture loop and the board

#[cfg(feature = "ftd3xx")]
mod ftd3xx;
pub mod protocol;
mod simulated;

#[cfg(feature = "ftd3xx")]
pub use ftd3xx::Ftd3xxLink;
pub use simulated::{pattern_pixel, pattern_sample, SimControl, SimulatedDevice};

use crate::error::Result;
use crate::pipeline::SlotPool;

/// Connection to a capture board streaming into a [`SlotPool`].
///
/// The capture loop owns the link and is its only caller. Failures are
/// returned as values; a link never panics across the thread boundary.
pub trait DeviceLink: Send {
    /// Human-readable name for logs
    fn name(&self) -> &str;

    /// Open and validate the board, then arm one read per slot.
    ///
    /// On error nothing is left armed.
    fn connect(&mut self, slots: &SlotPool) -> Result<()>;

    /// Collect the transfer in flight on `slot`, record its byte count in
    /// the pool and re-arm the slot.
    ///
    /// A transfer still incomplete after the link's wait is aborted. Success
    /// means a new read is in flight on `slot` again.
    fn reap_or_abort(&mut self, slot: usize, slots: &SlotPool) -> Result<()>;

    /// Release all transfers and close the board. Tolerates a board that is
    /// already half gone.
    fn disconnect(&mut self);
}

impl<L: DeviceLink + ?Sized> DeviceLink for Box<L> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn connect(&mut self, slots: &SlotPool) -> Result<()> {
        (**self).connect(slots)
    }

    fn reap_or_abort(&mut self, slot: usize, slots: &SlotPool) -> Result<()> {
        (**self).reap_or_abort(slot, slots)
    }

    fn disconnect(&mut self) {
        (**self).disconnect()
    }
}
