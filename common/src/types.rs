use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Packed RGB8 image, row-major.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl PixelBuffer {
    pub const CHANNELS: usize = 3;

    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self { width, height, data }
    }

    pub fn blank(width: u32, height: u32) -> Self {
        let len = width as usize * height as usize * Self::CHANNELS;
        Self::new(width, height, vec![0; len])
    }

    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * Self::CHANNELS
    }

    pub fn is_well_formed(&self) -> bool {
        self.width > 0 && self.height > 0 && self.data.len() == self.expected_len()
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * Self::CHANNELS;
        self.data
            .get(idx..idx + Self::CHANNELS)
            .map(|px| [px[0], px[1], px[2]])
    }
}

/// A captured frame. Sequence numbers come from the frame source and strictly increase.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Frame {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub image: PixelBuffer,
}

impl Frame {
    pub fn new(sequence: u64, image: PixelBuffer) -> Self {
        Self {
            sequence,
            timestamp: Utc::now(),
            image,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width
    }

    pub fn height(&self) -> u32 {
        self.image.height
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn is_valid(&self) -> bool {
        [self.x1, self.y1, self.x2, self.y2]
            .iter()
            .all(|v| v.is_finite())
            && self.x2 > self.x1
            && self.y2 > self.y1
    }
}

/// Detector output for one object in one frame, before stabilization.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RawDetection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BBox,
    /// Persistent identity assigned by the upstream tracker, if it runs one.
    pub tracker_id: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedDetection {
    MissingLabel,
    InvalidConfidence,
    InvalidBBox,
}

impl fmt::Display for MalformedDetection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingLabel => write!(f, "missing class label"),
            Self::InvalidConfidence => write!(f, "confidence outside [0, 1]"),
            Self::InvalidBBox => write!(f, "degenerate or non-finite bounding box"),
        }
    }
}

impl RawDetection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BBox, tracker_id: Option<u64>) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
            tracker_id,
        }
    }

    pub fn validate(&self) -> Result<(), MalformedDetection> {
        if self.label.trim().is_empty() {
            return Err(MalformedDetection::MissingLabel);
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(MalformedDetection::InvalidConfidence);
        }
        if !self.bbox.is_valid() {
            return Err(MalformedDetection::InvalidBBox);
        }
        Ok(())
    }
}

/// Identity of a track.
///
/// Upstream tokens pair the tracker id with the class label, so one id reported
/// under two labels is two tracks. Synthetic tokens are handed out from a
/// counter that never repeats within a process.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TrackToken {
    Upstream { id: u64, label: String },
    Synthetic(u64),
}

impl fmt::Display for TrackToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upstream { id, label } => write!(f, "{}#{}", label, id),
            Self::Synthetic(n) => write!(f, "~{}", n),
        }
    }
}

/// A confirmed detection as emitted by the stabilizer.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Detection {
    pub token: TrackToken,
    pub label: String,
    pub confidence: f32,
    pub bbox: BBox,
    pub consecutive_hits: u32,
    pub first_seen: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct StabilizedDetections {
    pub sequence: u64,
    /// Confirmed tracks seen in this frame, ascending by token.
    pub detections: Vec<Detection>,
    /// Tracks promoted to confirmed by this frame.
    pub newly_confirmed: Vec<TrackToken>,
    /// Raw detections dropped as malformed in this frame.
    pub malformed: usize,
}

impl StabilizedDetections {
    pub fn empty(sequence: u64) -> Self {
        Self {
            sequence,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.detections.iter().map(|d| d.label.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HistoryEntry {
    pub recorded_at: DateTime<Utc>,
    pub detections: StabilizedDetections,
}

impl HistoryEntry {
    pub fn new(detections: StabilizedDetections) -> Self {
        Self {
            recorded_at: Utc::now(),
            detections,
        }
    }
}
