//! FT601 link through FTDI's D3XX driver library

use crate::device::protocol::{
    self, BULK_IN, BULK_OUT, CMD_CONFIGURE, CMD_QUERY_ID, CMD_STREAM, FIFO_CHANNEL, ID_REPLY_LEN,
    PRODUCT_DESCRIPTIONS,
};
use crate::device::DeviceLink;
use crate::error::{CaptureError, Result};
use crate::pipeline::SlotPool;
use std::ffi::{c_void, CString};
use std::ptr;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

type FtHandle = *mut c_void;
type FtStatus = u32;

const FT_OK: FtStatus = 0;
const FT_IO_PENDING: FtStatus = 24;
const FT_IO_INCOMPLETE: FtStatus = 25;
const FT_OPEN_BY_DESCRIPTION: u32 = 2;

/// Settle time before releasing transfers on disconnect
const RELEASE_DELAY: Duration = Duration::from_millis(100);

/// Settle time between releasing transfers and closing the handle
const CLOSE_DELAY: Duration = Duration::from_millis(50);

/// One step of tearing a session down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseStep {
    AbortReads,
    Settle(Duration),
    Release,
    Close,
}

/// Teardown order. Reads left queued by a half-finished handshake are
/// aborted before their overlapped records are released.
fn close_steps(abort_reads: bool) -> Vec<CloseStep> {
    let mut steps = Vec::with_capacity(5);
    if abort_reads {
        steps.push(CloseStep::AbortReads);
    }
    steps.extend([
        CloseStep::Settle(RELEASE_DELAY),
        CloseStep::Release,
        CloseStep::Settle(CLOSE_DELAY),
        CloseStep::Close,
    ]);
    steps
}

#[repr(C)]
struct Overlapped {
    internal: usize,
    internal_high: usize,
    pointer: *mut c_void,
    h_event: *mut c_void,
}

impl Overlapped {
    fn zeroed() -> Self {
        Self {
            internal: 0,
            internal_high: 0,
            pointer: ptr::null_mut(),
            h_event: ptr::null_mut(),
        }
    }
}

#[link(name = "ftd3xx")]
extern "system" {
    fn FT_Create(arg: *mut c_void, flags: u32, handle: *mut FtHandle) -> FtStatus;
    fn FT_Close(handle: FtHandle) -> FtStatus;
    fn FT_AbortPipe(handle: FtHandle, pipe: u8) -> FtStatus;
    fn FT_FlushPipe(handle: FtHandle, pipe: u8) -> FtStatus;
    fn FT_ClearStreamPipe(handle: FtHandle, all_write: u8, all_read: u8, pipe: u8) -> FtStatus;
    fn FT_SetStreamPipe(
        handle: FtHandle,
        all_write: u8,
        all_read: u8,
        pipe: u8,
        stream_size: u32,
    ) -> FtStatus;
    fn FT_WritePipe(
        handle: FtHandle,
        pipe: u8,
        buffer: *mut u8,
        len: u32,
        transferred: *mut u32,
        overlapped: *mut Overlapped,
    ) -> FtStatus;
    fn FT_ReadPipe(
        handle: FtHandle,
        pipe: u8,
        buffer: *mut u8,
        len: u32,
        transferred: *mut u32,
        overlapped: *mut Overlapped,
    ) -> FtStatus;
    fn FT_ReadPipeAsync(
        handle: FtHandle,
        fifo: u8,
        buffer: *mut u8,
        len: u32,
        transferred: *mut u32,
        overlapped: *mut Overlapped,
    ) -> FtStatus;
    fn FT_InitializeOverlapped(handle: FtHandle, overlapped: *mut Overlapped) -> FtStatus;
    fn FT_ReleaseOverlapped(handle: FtHandle, overlapped: *mut Overlapped) -> FtStatus;
    fn FT_GetOverlappedResult(
        handle: FtHandle,
        overlapped: *mut Overlapped,
        transferred: *mut u32,
        wait: i32,
    ) -> FtStatus;
}

/// Live FT601 session: one async read in flight per slot.
///
/// The overlapped records and byte counters are boxed so their addresses stay
/// fixed while the driver holds them.
pub struct Ftd3xxLink {
    handle: FtHandle,
    overlapped: Box<[Overlapped]>,
    read: Box<[u32]>,
    initialized: usize,
}

// SAFETY: the handle and overlapped records are only touched by the thread
// that owns the link; the driver has no thread affinity.
unsafe impl Send for Ftd3xxLink {}

impl Ftd3xxLink {
    /// Create a closed link
    pub fn new() -> Self {
        Self {
            handle: ptr::null_mut(),
            overlapped: Box::new([]),
            read: Box::new([]),
            initialized: 0,
        }
    }

    fn is_open(&self) -> bool {
        !self.handle.is_null()
    }

    fn open(&mut self) -> Result<()> {
        for description in PRODUCT_DESCRIPTIONS {
            let name = CString::new(description)
                .map_err(|e| CaptureError::handshake("create", e.to_string()))?;
            let mut handle: FtHandle = ptr::null_mut();
            // SAFETY: name outlives the call; handle is a valid out pointer.
            let status = unsafe {
                FT_Create(
                    name.as_ptr() as *mut c_void,
                    FT_OPEN_BY_DESCRIPTION,
                    &mut handle,
                )
            };
            if status == FT_OK && !handle.is_null() {
                debug!("Opened {} board", description);
                self.handle = handle;
                return Ok(());
            }
        }
        Err(CaptureError::DeviceNotFound(PRODUCT_DESCRIPTIONS.join(", ")))
    }

    fn write_command(&mut self, step: &'static str, command: [u8; 4]) -> Result<()> {
        let mut buf = command;
        let mut written = 0u32;
        // SAFETY: buf is valid for 4 bytes for the duration of the call.
        let status = unsafe {
            FT_WritePipe(
                self.handle,
                BULK_OUT,
                buf.as_mut_ptr(),
                buf.len() as u32,
                &mut written,
                ptr::null_mut(),
            )
        };
        check(step, status)
    }

    fn read_identification(&mut self) -> Result<u32> {
        let mut reply = [0u8; ID_REPLY_LEN];
        let mut returned = 0u32;
        // SAFETY: reply is valid for ID_REPLY_LEN bytes for the call.
        let status = unsafe {
            FT_ReadPipe(
                self.handle,
                BULK_IN,
                reply.as_mut_ptr(),
                reply.len() as u32,
                &mut returned,
                ptr::null_mut(),
            )
        };
        check("identify", status)?;
        protocol::parse_identification(&reply)
            .ok_or_else(|| CaptureError::handshake("identify", "short reply"))
    }

    fn reset_pipes(&mut self) {
        // Best effort: stale state from a previous session is cleared if any
        // SAFETY: handle is open.
        unsafe {
            FT_AbortPipe(self.handle, BULK_OUT);
            FT_AbortPipe(self.handle, BULK_IN);
            FT_FlushPipe(self.handle, BULK_OUT);
            FT_FlushPipe(self.handle, BULK_IN);
            FT_ClearStreamPipe(self.handle, 0, 0, BULK_IN);
            FT_ClearStreamPipe(self.handle, 0, 0, BULK_OUT);
        }
    }

    fn arm(&mut self, slot: usize, slots: &SlotPool) -> Result<()> {
        // SAFETY: the slot buffer and the boxed overlapped/read entries stay
        // alive and unmoved until the transfer is reaped or released.
        let status = unsafe {
            FT_ReadPipeAsync(
                self.handle,
                FIFO_CHANNEL,
                slots.buffer_ptr(slot),
                slots.capacity() as u32,
                &mut self.read[slot],
                &mut self.overlapped[slot],
            )
        };
        if status != FT_IO_PENDING {
            return Err(CaptureError::transfer(
                slot,
                format!("read not queued (status {})", status),
            ));
        }
        Ok(())
    }

    fn handshake(&mut self, slots: &SlotPool) -> Result<()> {
        self.reset_pipes();

        self.write_command("configure", CMD_CONFIGURE)?;
        self.write_command("query id", CMD_QUERY_ID)?;
        let id = self.read_identification()?;
        if !protocol::identification_valid(id) {
            return Err(CaptureError::Identification(id));
        }
        self.write_command("stream", CMD_STREAM)?;

        // SAFETY: handle is open.
        let status =
            unsafe { FT_SetStreamPipe(self.handle, 0, 0, BULK_IN, slots.capacity() as u32) };
        check("stream pipe", status)?;

        let count = slots.len();
        self.overlapped = (0..count).map(|_| Overlapped::zeroed()).collect();
        self.read = vec![0u32; count].into_boxed_slice();
        self.initialized = 0;
        for slot in 0..count {
            // SAFETY: overlapped entry is boxed and outlives its registration.
            let status =
                unsafe { FT_InitializeOverlapped(self.handle, &mut self.overlapped[slot]) };
            check("initialize", status)?;
            self.initialized += 1;
        }

        slots.clear();
        for slot in 0..count {
            self.arm(slot, slots)?;
        }

        info!("Board identified (id 0x{:08x}), streaming", id);
        Ok(())
    }

    fn release(&mut self) {
        for slot in 0..self.initialized {
            // SAFETY: entry was initialized on this handle.
            let status =
                unsafe { FT_ReleaseOverlapped(self.handle, &mut self.overlapped[slot]) };
            if status != FT_OK {
                warn!("Failed to release transfer {} (status {})", slot, status);
            }
        }
        self.initialized = 0;
    }

    fn close(&mut self, abort_reads: bool) {
        if !self.is_open() {
            return;
        }

        for step in close_steps(abort_reads) {
            match step {
                CloseStep::AbortReads => {
                    // SAFETY: handle is open.
                    let status = unsafe { FT_AbortPipe(self.handle, BULK_IN) };
                    if status != FT_OK {
                        warn!("Failed to abort queued reads (status {})", status);
                    }
                }
                CloseStep::Settle(delay) => thread::sleep(delay),
                CloseStep::Release => self.release(),
                CloseStep::Close => {
                    // SAFETY: handle is open and no transfer references it any more.
                    let status = unsafe { FT_Close(self.handle) };
                    if status != FT_OK {
                        error!("Failed to close board (status {})", status);
                    }
                    self.handle = ptr::null_mut();
                }
            }
        }
    }
}

impl Default for Ftd3xxLink {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Ftd3xxLink {
    fn drop(&mut self) {
        self.close(false);
    }
}

fn check(step: &'static str, status: FtStatus) -> Result<()> {
    if status == FT_OK {
        Ok(())
    } else {
        Err(CaptureError::handshake(step, format!("status {}", status)))
    }
}

impl DeviceLink for Ftd3xxLink {
    fn name(&self) -> &str {
        "ftd3xx"
    }

    fn connect(&mut self, slots: &SlotPool) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }

        self.open()?;
        if let Err(e) = self.handshake(slots) {
            // Some reads may already be queued on the initialized records
            let armed = self.initialized > 0;
            self.close(armed);
            return Err(e);
        }
        Ok(())
    }

    fn reap_or_abort(&mut self, slot: usize, slots: &SlotPool) -> Result<()> {
        if !self.is_open() {
            return Err(CaptureError::NotConnected);
        }
        if slot >= self.read.len() {
            return Err(CaptureError::transfer(slot, "slot out of range"));
        }

        // SAFETY: entry belongs to an armed transfer on this handle.
        let status = unsafe {
            FT_GetOverlappedResult(
                self.handle,
                &mut self.overlapped[slot],
                &mut self.read[slot],
                1,
            )
        };
        if status == FT_IO_INCOMPLETE {
            // SAFETY: handle is open.
            let abort = unsafe { FT_AbortPipe(self.handle, BULK_IN) };
            if abort != FT_OK {
                return Err(CaptureError::transfer(
                    slot,
                    format!("abort failed (status {})", abort),
                ));
            }
        }

        slots.complete(slot, self.read[slot] as usize);
        self.arm(slot, slots)
    }

    fn disconnect(&mut self) {
        self.close(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_releases_then_closes() {
        assert_eq!(
            close_steps(false),
            vec![
                CloseStep::Settle(RELEASE_DELAY),
                CloseStep::Release,
                CloseStep::Settle(CLOSE_DELAY),
                CloseStep::Close,
            ]
        );
    }

    #[test]
    fn test_failed_handshake_aborts_reads_before_release() {
        let steps = close_steps(true);
        let abort = steps.iter().position(|s| *s == CloseStep::AbortReads);
        let release = steps.iter().position(|s| *s == CloseStep::Release);

        assert_eq!(abort, Some(0));
        assert!(release > abort);
        assert_eq!(steps.last(), Some(&CloseStep::Close));
    }

    #[test]
    fn test_closed_link_close_is_noop() {
        let mut link = Ftd3xxLink::new();
        link.close(true);
        assert!(!link.is_open());
    }
}
