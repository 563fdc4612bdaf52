//! Video demultiplexing and the video consumer loop

mod consumer;
mod demux;
mod frame;

pub use consumer::{FrameSink, VideoConsumer, VideoEvent};
pub use demux::demux_frame;
pub use frame::VideoFrame;

/// Pixels per device scan line
pub const CAP_WIDTH: usize = 240;

/// Scan lines of the top screen
pub const TOP_HEIGHT: usize = 400;

/// Scan lines of the bottom screen
pub const BOTTOM_HEIGHT: usize = 320;

/// Scan lines per capture
pub const CAP_HEIGHT: usize = TOP_HEIGHT + BOTTOM_HEIGHT;

/// Pixels per capture
pub const CAP_RES: usize = CAP_WIDTH * CAP_HEIGHT;

/// Pixels of the top screen
pub const TOP_RES: usize = TOP_HEIGHT * CAP_WIDTH;

/// Leading pixels that only carry the top screen
pub const DELTA_RES: usize = (TOP_HEIGHT - BOTTOM_HEIGHT) * CAP_WIDTH;

/// Raw frame size as sent by the device (RGB)
pub const FRAME_SIZE_RGB: usize = CAP_RES * 3;

/// Demuxed frame size (RGBA)
pub const FRAME_SIZE_RGBA: usize = CAP_RES * 4;
