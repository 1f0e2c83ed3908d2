/// Detection seam (Detection System)
///
/// The node treats object detection as a black box: a [`Detector`] turns a
/// frame into raw detections, optionally tagged with a persistent tracker id.
/// - Detector:   external engine interface
/// - BlobDetector: luminance blob finder used with the synthetic camera
/// - MotionGate: edge-diff trigger that decides when the detector runs
pub mod blob;
pub mod motion;

pub use blob::BlobDetector;
pub use motion::MotionGate;

use watchpost_common::{Frame, RawDetection};

use crate::error::Result;
use crate::settings::SettingsSnapshot;

pub trait Detector: Send {
    fn detect(&mut self, frame: &Frame, settings: &SettingsSnapshot) -> Result<Vec<RawDetection>>;
}

/// Drops detections under the confidence floor or outside the enabled classes.
///
/// Malformed detections are passed through untouched so the stabilizer can
/// count them.
pub fn apply_filters(raw: Vec<RawDetection>, settings: &SettingsSnapshot) -> Vec<RawDetection> {
    raw.into_iter()
        .filter(|d| {
            d.validate().is_err()
                || (d.confidence >= settings.confidence && settings.is_class_enabled(&d.label))
        })
        .collect()
}
