//! n3dsxl-capture - N3DSXL USB capture pipeline
//!
//! Pulls composite audio/video transfers from an FT601-based capture board
//! and fans them out to a video demuxer and an audio player.

pub mod audio;
pub mod config;
pub mod device;
pub mod error;
pub mod pipeline;
pub mod video;

pub use error::{CaptureError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
