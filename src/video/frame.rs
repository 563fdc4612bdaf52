//! Packed RGBA frame handed to the renderer

use crate::error::{CaptureError, Result};
use crate::video::{CAP_HEIGHT, CAP_WIDTH, FRAME_SIZE_RGBA, TOP_HEIGHT};
use std::path::Path;
use tracing::debug;

/// Both screens of one capture as `CAP_WIDTH` x `CAP_HEIGHT` RGBA pixels.
///
/// Lines `0..TOP_HEIGHT` hold the top screen and the remaining lines the
/// bottom screen. The device scans the screens sideways, so lines run along
/// the short edge; rotating for display is up to the renderer.
#[derive(Clone)]
pub struct VideoFrame {
    pixels: Box<[u8]>,
}

impl VideoFrame {
    /// Create an all-black transparent frame
    pub fn new() -> Self {
        Self {
            pixels: vec![0u8; FRAME_SIZE_RGBA].into_boxed_slice(),
        }
    }

    /// Width in pixels (one device scan line)
    pub const fn width(&self) -> usize {
        CAP_WIDTH
    }

    /// Height in pixels (scan lines of both screens)
    pub const fn height(&self) -> usize {
        CAP_HEIGHT
    }

    /// Bytes per line
    pub const fn stride(&self) -> usize {
        CAP_WIDTH * 4
    }

    /// All pixels
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Mutable pixels, for the demuxer
    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    /// Top screen lines
    pub fn top(&self) -> &[u8] {
        &self.pixels[..TOP_HEIGHT * self.stride()]
    }

    /// Bottom screen lines
    pub fn bottom(&self) -> &[u8] {
        &self.pixels[TOP_HEIGHT * self.stride()..]
    }

    /// Reset to black
    pub fn clear(&mut self) {
        self.pixels.fill(0);
    }

    /// Load a placeholder image shown while no stream is available.
    ///
    /// The image must already be laid out like a capture (`CAP_WIDTH` x
    /// `CAP_HEIGHT`).
    pub fn load_png<P: AsRef<Path>>(path: P) -> Result<Self> {
        let image = image::open(path.as_ref())?.to_rgba8();
        let (width, height) = image.dimensions();

        if width as usize != CAP_WIDTH || height as usize != CAP_HEIGHT {
            return Err(CaptureError::ImageSize {
                width,
                height,
                expected_width: CAP_WIDTH as u32,
                expected_height: CAP_HEIGHT as u32,
            });
        }

        debug!("Loaded placeholder from {:?}", path.as_ref());

        Ok(Self {
            pixels: image.into_raw().into_boxed_slice(),
        })
    }

    /// Write the frame as a PNG
    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        image::save_buffer(
            path.as_ref(),
            &self.pixels,
            CAP_WIDTH as u32,
            CAP_HEIGHT as u32,
            image::ColorType::Rgba8,
        )?;
        Ok(())
    }
}

impl Default for VideoFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoFrame")
            .field("width", &CAP_WIDTH)
            .field("height", &CAP_HEIGHT)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::BOTTOM_HEIGHT;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("n3dsxl-{}-{}", std::process::id(), name))
    }

    #[test]
    fn test_screen_split() {
        let frame = VideoFrame::new();
        assert_eq!(frame.pixels().len(), FRAME_SIZE_RGBA);
        assert_eq!(frame.top().len(), TOP_HEIGHT * CAP_WIDTH * 4);
        assert_eq!(frame.bottom().len(), BOTTOM_HEIGHT * CAP_WIDTH * 4);
    }

    #[test]
    fn test_snapshot_loads_back_as_placeholder() {
        let path = temp_path("snapshot.png");
        let mut frame = VideoFrame::new();
        for (i, px) in frame.pixels_mut().chunks_exact_mut(4).enumerate() {
            px.copy_from_slice(&[(i % 256) as u8, 0x10, 0x20, 0xff]);
        }

        frame.save_png(&path).unwrap();
        let loaded = VideoFrame::load_png(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded.pixels(), frame.pixels());
    }

    #[test]
    fn test_placeholder_wrong_size_rejected() {
        let path = temp_path("small.png");
        image::save_buffer(&path, &[0u8; 4 * 4 * 4], 4, 4, image::ColorType::Rgba8).unwrap();

        let err = VideoFrame::load_png(&path).unwrap_err();
        let _ = std::fs::remove_file(&path);

        assert!(matches!(err, CaptureError::ImageSize { width: 4, height: 4, .. }));
    }
}
