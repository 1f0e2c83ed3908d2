use watchpost_common::{BBox, Frame, RawDetection};

use super::Detector;
use crate::error::Result;
use crate::settings::SettingsSnapshot;

const LUMA_THRESHOLD: u32 = 200;
const SAMPLE_STEP: u32 = 2;
const DEFAULT_MIN_AREA_PERCENT: f32 = 0.5;

/// Reports the bounding box of bright pixels as a single tracked "object".
///
/// Fires only when the sampled bright area covers at least `min_area_percent`
/// of the frame.
pub struct BlobDetector {
    label: String,
    tracker_id: u64,
    min_area_percent: f32,
}

impl BlobDetector {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            tracker_id: 1,
            min_area_percent: DEFAULT_MIN_AREA_PERCENT,
        }
    }

    pub fn with_min_area(mut self, percent: f32) -> Self {
        self.min_area_percent = percent;
        self
    }
}

impl Default for BlobDetector {
    fn default() -> Self {
        Self::new("object")
    }
}

impl Detector for BlobDetector {
    fn detect(&mut self, frame: &Frame, _settings: &SettingsSnapshot) -> Result<Vec<RawDetection>> {
        let image = &frame.image;
        let (mut x1, mut y1, mut x2, mut y2) = (u32::MAX, u32::MAX, 0u32, 0u32);
        let mut bright = 0u64;
        let mut sampled = 0u64;

        for y in (0..image.height).step_by(SAMPLE_STEP as usize) {
            for x in (0..image.width).step_by(SAMPLE_STEP as usize) {
                let Some([r, g, b]) = image.pixel(x, y) else {
                    continue;
                };
                sampled += 1;
                let luma = (299 * u32::from(r) + 587 * u32::from(g) + 114 * u32::from(b)) / 1000;
                if luma >= LUMA_THRESHOLD {
                    bright += 1;
                    x1 = x1.min(x);
                    y1 = y1.min(y);
                    x2 = x2.max(x);
                    y2 = y2.max(y);
                }
            }
        }

        if bright == 0 || sampled == 0 {
            return Ok(vec![]);
        }
        let percent = bright as f32 * 100.0 / sampled as f32;
        if percent < self.min_area_percent {
            return Ok(vec![]);
        }

        let bbox = BBox::new(
            x1 as f32,
            y1 as f32,
            (x2 + SAMPLE_STEP) as f32,
            (y2 + SAMPLE_STEP) as f32,
        );
        let box_samples = (bbox.area() / (SAMPLE_STEP * SAMPLE_STEP) as f32).max(1.0);
        let confidence = (bright as f32 / box_samples).clamp(0.0, 1.0);

        Ok(vec![RawDetection::new(
            self.label.clone(),
            confidence,
            bbox,
            Some(self.tracker_id),
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use watchpost_common::PixelBuffer;

    fn frame_with_square(x0: u32, y0: u32, size: u32) -> Frame {
        let mut image = PixelBuffer::blank(64, 64);
        for y in y0..y0 + size {
            for x in x0..x0 + size {
                let idx = ((y * 64 + x) * 3) as usize;
                image.data[idx..idx + 3].fill(250);
            }
        }
        Frame::new(1, image)
    }

    #[test]
    fn test_finds_bright_square() {
        let settings = SettingsSnapshot::from_config(&AgentConfig::default());
        let mut detector = BlobDetector::default();
        let found = detector.detect(&frame_with_square(10, 20, 16), &settings).unwrap();
        assert_eq!(found.len(), 1);
        let d = &found[0];
        assert_eq!(d.tracker_id, Some(1));
        assert!(d.validate().is_ok());
        assert!(d.bbox.x1 >= 10.0 && d.bbox.x2 <= 28.0);
        assert!(d.confidence > 0.8);
    }

    #[test]
    fn test_dark_frame_yields_nothing() {
        let settings = SettingsSnapshot::from_config(&AgentConfig::default());
        let mut detector = BlobDetector::default();
        let frame = Frame::new(1, PixelBuffer::blank(32, 32));
        assert!(detector.detect(&frame, &settings).unwrap().is_empty());
    }

    #[test]
    fn test_small_blob_under_min_area_ignored() {
        let settings = SettingsSnapshot::from_config(&AgentConfig::default());
        let mut detector = BlobDetector::default().with_min_area(50.0);
        assert!(detector
            .detect(&frame_with_square(0, 0, 8), &settings)
            .unwrap()
            .is_empty());
    }
}
