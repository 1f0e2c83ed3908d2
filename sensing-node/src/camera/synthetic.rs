use watchpost_common::PixelBuffer;

use super::CameraDriver;

const SQUARE: u32 = 160;
const STRIPE_PERIOD: u32 = 16;
const STRIPE_DARK: u32 = 4;
const STEP: u64 = 4;
const BACKGROUND: u8 = 16;
const FOREGROUND: u8 = 235;

/// Deterministic stand-in for a webcam: a bright, vertically striped square
/// sweeping left to right over a dark background. The stripes give the motion
/// gate enough moving edges. Only the indices in `available` open.
pub struct SyntheticCamera {
    available: Vec<u32>,
    width: u32,
    height: u32,
    tick: u64,
    opened: bool,
}

impl SyntheticCamera {
    pub fn new(available: Vec<u32>) -> Self {
        Self {
            available,
            width: 640,
            height: 480,
            tick: 0,
            opened: false,
        }
    }

    fn render(&self) -> PixelBuffer {
        let mut image = PixelBuffer::blank(self.width, self.height);
        image.data.fill(BACKGROUND);

        let size = SQUARE.min(self.width).min(self.height);
        let span = u64::from((self.width - size).max(1));
        let x0 = (self.tick * STEP % span) as u32;
        let y0 = (self.height - size) / 2;

        let stride = self.width as usize * PixelBuffer::CHANNELS;
        for y in y0..y0 + size {
            let row = y as usize * stride;
            for dx in (0..size).filter(|dx| dx % STRIPE_PERIOD < STRIPE_PERIOD - STRIPE_DARK) {
                let start = row + (x0 + dx) as usize * PixelBuffer::CHANNELS;
                image.data[start..start + PixelBuffer::CHANNELS].fill(FOREGROUND);
            }
        }
        image
    }
}

impl CameraDriver for SyntheticCamera {
    fn open(&mut self, device_index: u32) -> bool {
        self.opened = self.available.contains(&device_index);
        self.opened
    }

    fn configure(&mut self, width: u32, height: u32, _fps: u32) {
        self.width = width.max(1);
        self.height = height.max(1);
    }

    fn read(&mut self) -> Option<PixelBuffer> {
        if !self.opened {
            return None;
        }
        self.tick += 1;
        Some(self.render())
    }

    fn release(&mut self) {
        self.opened = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_available_indices_open() {
        let mut camera = SyntheticCamera::new(vec![0]);
        assert!(!camera.open(1));
        assert!(camera.read().is_none());
        assert!(camera.open(0));
        camera.configure(160, 120, 30);
        let image = camera.read().unwrap();
        assert!(image.is_well_formed());
        assert_eq!((image.width, image.height), (160, 120));
    }

    #[test]
    fn test_square_moves_between_frames() {
        let mut camera = SyntheticCamera::new(vec![0]);
        camera.open(0);
        camera.configure(200, 100, 30);
        let a = camera.read().unwrap();
        let b = camera.read().unwrap();
        assert_ne!(a, b);
        assert_eq!(a.pixel(0, 0), Some([BACKGROUND; 3]));
    }

    #[test]
    fn test_tiny_resolution_does_not_panic() {
        let mut camera = SyntheticCamera::new(vec![0]);
        camera.open(0);
        camera.configure(8, 8, 30);
        for _ in 0..10 {
            assert!(camera.read().unwrap().is_well_formed());
        }
    }

    #[test]
    fn test_default_scene_triggers_motion_gate() {
        use crate::config::AgentConfig;
        use crate::detection::MotionGate;
        use crate::settings::SettingsSnapshot;
        use std::time::Instant;

        let settings = SettingsSnapshot::from_config(&AgentConfig::default());
        let mut camera = SyntheticCamera::new(vec![0]);
        camera.open(0);
        camera.configure(640, 480, 30);
        let mut gate = MotionGate::new();
        let now = Instant::now();
        assert!(!gate.check(&camera.read().unwrap(), &settings, now));
        assert!(gate.check(&camera.read().unwrap(), &settings, now));
    }
}
