//! Playback volume and mute shared with the audio callback

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Volume step used by `step_up` / `step_down`
const VOLUME_STEP: u32 = 5;

/// Volume in percent (0-100) plus a mute flag.
///
/// Lock-free so the real-time callback can read it on every buffer and the
/// control side can change it at any time without resetting playback.
pub struct VolumeControl {
    percent: AtomicU32,
    muted: AtomicBool,
}

impl VolumeControl {
    /// Full volume, not muted
    pub fn new() -> Self {
        Self::with_volume(100, false)
    }

    /// Create with an initial volume (clamped to 0-100) and mute state
    pub fn with_volume(percent: u32, muted: bool) -> Self {
        Self {
            percent: AtomicU32::new(percent.min(100)),
            muted: AtomicBool::new(muted),
        }
    }

    /// Current volume in percent
    pub fn volume(&self) -> u32 {
        self.percent.load(Ordering::Relaxed)
    }

    /// Set volume in percent (clamped to 0-100)
    pub fn set_volume(&self, percent: u32) {
        self.percent.store(percent.min(100), Ordering::Relaxed);
    }

    /// Raise by one step, snapping to the step grid
    pub fn step_up(&self) -> u32 {
        let next = (self.volume() / VOLUME_STEP * VOLUME_STEP + VOLUME_STEP).min(100);
        self.set_volume(next);
        next
    }

    /// Lower by one step, snapping to the step grid
    pub fn step_down(&self) -> u32 {
        let current = self.volume();
        let next = if current > VOLUME_STEP {
            current / VOLUME_STEP * VOLUME_STEP - VOLUME_STEP
        } else {
            0
        };
        self.set_volume(next);
        next
    }

    /// Whether output is muted
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    /// Mute or unmute
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    /// Flip mute, returning the new state
    pub fn toggle_mute(&self) -> bool {
        !self.muted.fetch_xor(true, Ordering::Relaxed)
    }

    /// Linear gain applied to samples.
    ///
    /// Squared so that volume steps sound even. Muting keeps the stream
    /// running with zero gain, which avoids a pop when unmuting.
    pub fn gain(&self) -> f32 {
        if self.is_muted() {
            return 0.0;
        }
        let level = self.volume() as f32 / 100.0;
        level * level
    }
}

impl Default for VolumeControl {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gain_is_squared() {
        let volume = VolumeControl::with_volume(50, false);
        assert!((volume.gain() - 0.25).abs() < f32::EPSILON);

        volume.set_volume(100);
        assert_eq!(volume.gain(), 1.0);
    }

    #[test]
    fn test_mute_zeroes_gain_and_keeps_volume() {
        let volume = VolumeControl::with_volume(80, false);
        assert!(volume.toggle_mute());
        assert_eq!(volume.gain(), 0.0);
        assert_eq!(volume.volume(), 80);
        assert!(!volume.toggle_mute());
        assert!(volume.gain() > 0.6);
    }

    #[test]
    fn test_clamped() {
        let volume = VolumeControl::with_volume(250, false);
        assert_eq!(volume.volume(), 100);
        volume.set_volume(101);
        assert_eq!(volume.volume(), 100);
    }

    #[test]
    fn test_steps_snap_to_grid() {
        let volume = VolumeControl::with_volume(97, false);
        assert_eq!(volume.step_up(), 100);
        assert_eq!(volume.step_up(), 100);

        volume.set_volume(42);
        assert_eq!(volume.step_down(), 35);
        volume.set_volume(4);
        assert_eq!(volume.step_down(), 0);
        volume.set_volume(42);
        assert_eq!(volume.step_up(), 45);
    }
}
