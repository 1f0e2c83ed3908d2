//! Edge-based motion gate in front of the detector.
//!
//! Consecutive frames are reduced to edge maps (gradient magnitude with
//! `canny_low`/`canny_high` hysteresis) and compared pixel by pixel. Edges hold
//! up better than raw intensity under lighting drift. A frame counts as motion
//! when more than `pixel_threshold` percent of its edge pixels flipped and the
//! `cooldown_secs` since the last motion have elapsed.

use std::time::Instant;
use tracing::{debug, info};
use watchpost_common::PixelBuffer;

use crate::settings::SettingsSnapshot;

#[derive(Debug, Clone, PartialEq)]
struct EdgeMap {
    width: u32,
    height: u32,
    edges: Vec<bool>,
}

impl EdgeMap {
    fn detect(image: &PixelBuffer, low: u32, high: u32) -> Self {
        let (w, h) = (image.width as usize, image.height as usize);
        let mut edges = vec![false; w * h];
        if !image.is_well_formed() || w < 3 || h < 3 {
            return Self {
                width: image.width,
                height: image.height,
                edges,
            };
        }

        let luma: Vec<i32> = image
            .data
            .chunks_exact(PixelBuffer::CHANNELS)
            .map(|p| ((299 * u32::from(p[0]) + 587 * u32::from(p[1]) + 114 * u32::from(p[2])) / 1000) as i32)
            .collect();

        let mut gradient = vec![0u32; w * h];
        for y in 1..h - 1 {
            for x in 1..w - 1 {
                let i = y * w + x;
                let gx = (luma[i + 1] - luma[i - 1]).unsigned_abs();
                let gy = (luma[i + w] - luma[i - w]).unsigned_abs();
                gradient[i] = gx + gy;
            }
        }

        let (low, high) = (low.min(high), low.max(high));
        let strong = |g: u32| g > 0 && g >= high;
        for y in 1..h - 1 {
            for x in 1..w - 1 {
                let i = y * w + x;
                let g = gradient[i];
                edges[i] = strong(g)
                    || (g > 0
                        && g >= low
                        && [i - 1, i + 1, i - w, i + w]
                            .iter()
                            .any(|&n| strong(gradient[n])));
            }
        }

        Self {
            width: image.width,
            height: image.height,
            edges,
        }
    }

    /// Percent of pixels whose edge state differs. `None` when the
    /// resolutions do not match.
    fn changed_percent(&self, other: &EdgeMap) -> Option<f32> {
        if self.width != other.width || self.height != other.height || self.edges.is_empty() {
            return None;
        }
        let changed = self
            .edges
            .iter()
            .zip(&other.edges)
            .filter(|(a, b)| a != b)
            .count();
        Some(changed as f32 * 100.0 / self.edges.len() as f32)
    }
}

#[derive(Debug, Default)]
pub struct MotionGate {
    reference: Option<EdgeMap>,
    last_motion: Option<Instant>,
}

impl MotionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when `image` moved against the previous frame and the
    /// cooldown has elapsed. The reference is refreshed on every call,
    /// cooldown frames included.
    pub fn check(&mut self, image: &PixelBuffer, settings: &SettingsSnapshot, now: Instant) -> bool {
        let edges = EdgeMap::detect(image, settings.canny_low, settings.canny_high);
        let Some(previous) = self.reference.take() else {
            self.reference = Some(edges);
            debug!("Motion reference initialised");
            return false;
        };
        let changed = previous.changed_percent(&edges);
        self.reference = Some(edges);

        let cooling_down = self
            .last_motion
            .map_or(false, |last| now.saturating_duration_since(last) < settings.motion_cooldown());
        if cooling_down {
            return false;
        }
        let Some(changed) = changed else {
            debug!("Frame size changed; motion reference reset");
            return false;
        };

        let moving = changed > settings.pixel_threshold;
        if moving {
            info!(
                "Motion detected! Change: {:.2}% (threshold {}%)",
                changed, settings.pixel_threshold
            );
            self.last_motion = Some(now);
        }
        moving
    }
}
