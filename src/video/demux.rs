//! Scan-line reassembly of the device's interleaved RGB layout

use crate::error::{CaptureError, Result};
use crate::video::{CAP_RES, CAP_WIDTH, DELTA_RES, FRAME_SIZE_RGB, FRAME_SIZE_RGBA, TOP_RES};

/// Convert one raw RGB capture into the packed RGBA layout.
///
/// The device sends `CAP_HEIGHT` lines of `CAP_WIDTH` pixels. The first
/// `DELTA_RES` pixels belong to the top screen only. Past that point the
/// two screens share the transfer line by line: odd lines continue the top
/// screen, even lines build the bottom screen. Each screen has its own
/// output cursor, so `out` ends up holding the top screen followed by the
/// bottom screen, both contiguous.
pub fn demux_frame(raw: &[u8], out: &mut [u8]) -> Result<()> {
    if raw.len() < FRAME_SIZE_RGB {
        return Err(CaptureError::ShortPayload {
            received: raw.len(),
            expected: FRAME_SIZE_RGB,
        });
    }
    if out.len() < FRAME_SIZE_RGBA {
        return Err(CaptureError::ShortPayload {
            received: out.len(),
            expected: FRAME_SIZE_RGBA,
        });
    }

    let mut top = DELTA_RES;
    let mut bottom = TOP_RES;

    for (i, rgb) in raw[..FRAME_SIZE_RGB].chunks_exact(3).enumerate() {
        let dst = if i < DELTA_RES {
            i
        } else if (i / CAP_WIDTH) & 1 == 1 {
            top += 1;
            top - 1
        } else {
            bottom += 1;
            bottom - 1
        };

        let px = &mut out[dst * 4..dst * 4 + 4];
        px[..3].copy_from_slice(rgb);
        px[3] = 0xff;
    }

    debug_assert_eq!(top, TOP_RES);
    debug_assert_eq!(bottom, CAP_RES);

    Ok(())
}
