//! State handed from the capture loop to the remote-control loop.
//!
//! One mutex guards the latest frame, the latest detections and the history.
//! Writes move the caller's values in; every read hands out a fresh copy.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use watchpost_common::{Frame, HistoryEntry, StabilizedDetections};

use crate::camera::SourceState;
use crate::fifo::BoundedFifo;
use crate::lock_unpoisoned;

#[derive(Debug, Clone, Serialize)]
pub struct StateStats {
    pub started_at: DateTime<Utc>,
    pub uptime: Duration,
    pub total_events: u64,
    pub class_counts: BTreeMap<String, u64>,
    pub last_detection: Option<DateTime<Utc>>,
    pub latest_sequence: Option<u64>,
    pub source_state: SourceState,
    pub history_len: usize,
}

struct StateInner {
    latest_frame: Option<Frame>,
    latest_detections: Option<StabilizedDetections>,
    history: BoundedFifo<HistoryEntry>,
    class_counts: BTreeMap<String, u64>,
    last_detection: Option<DateTime<Utc>>,
    source_state: SourceState,
    source_reset_requested: bool,
}

pub struct SharedState {
    inner: Mutex<StateInner>,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl SharedState {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(StateInner {
                latest_frame: None,
                latest_detections: None,
                history: BoundedFifo::with_capacity(history_capacity),
                class_counts: BTreeMap::new(),
                last_detection: None,
                source_state: SourceState::Active,
                source_reset_requested: false,
            }),
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn update_frame(&self, frame: Frame) {
        lock_unpoisoned(&self.inner).latest_frame = Some(frame);
    }

    pub fn latest_frame(&self) -> Option<Frame> {
        lock_unpoisoned(&self.inner).latest_frame.clone()
    }

    pub fn update_detections(&self, detections: StabilizedDetections) {
        let mut inner = lock_unpoisoned(&self.inner);
        Self::record_detections(&mut inner, detections);
    }

    /// Publishes a frame and its detections atomically.
    pub fn update_frame_with_detections(&self, frame: Frame, detections: StabilizedDetections) {
        let mut inner = lock_unpoisoned(&self.inner);
        inner.latest_frame = Some(frame);
        Self::record_detections(&mut inner, detections);
    }

    fn record_detections(inner: &mut StateInner, detections: StabilizedDetections) {
        if !detections.newly_confirmed.is_empty() {
            inner.last_detection = Some(Utc::now());
            for detection in &detections.detections {
                if detections.newly_confirmed.contains(&detection.token) {
                    *inner.class_counts.entry(detection.label.clone()).or_insert(0) += 1;
                }
            }
        }
        inner.latest_detections = Some(detections);
    }

    /// The latest frame paired with its own detections.
    ///
    /// When the newest detections belong to another frame, the pair carries an
    /// empty result for the frame's sequence instead.
    pub fn latest_frame_with_detections(&self) -> Option<(Frame, StabilizedDetections)> {
        let inner = lock_unpoisoned(&self.inner);
        let frame = inner.latest_frame.as_ref()?.clone();
        let detections = match &inner.latest_detections {
            Some(d) if d.sequence == frame.sequence => d.clone(),
            _ => StabilizedDetections::empty(frame.sequence),
        };
        Some((frame, detections))
    }

    /// Returns the entry evicted to make room, if any.
    pub fn append_history(&self, entry: HistoryEntry) -> Option<HistoryEntry> {
        lock_unpoisoned(&self.inner).history.push(entry)
    }

    pub fn history_snapshot(&self) -> Vec<HistoryEntry> {
        lock_unpoisoned(&self.inner).history.to_vec()
    }

    pub fn set_history_capacity(&self, capacity: usize) {
        let mut inner = lock_unpoisoned(&self.inner);
        if inner.history.capacity() != capacity.max(1) {
            inner.history.set_capacity(capacity);
        }
    }

    pub fn reset_history(&self) {
        let mut inner = lock_unpoisoned(&self.inner);
        inner.history.clear();
        inner.class_counts.clear();
        inner.last_detection = None;
    }

    pub fn set_source_state(&self, state: SourceState) {
        lock_unpoisoned(&self.inner).source_state = state;
    }

    pub fn source_state(&self) -> SourceState {
        lock_unpoisoned(&self.inner).source_state
    }

    /// Asks the capture loop to re-arm its frame source on its next turn.
    pub fn request_source_reset(&self) {
        lock_unpoisoned(&self.inner).source_reset_requested = true;
    }

    /// Returns and clears a pending re-arm request.
    pub fn take_source_reset_request(&self) -> bool {
        std::mem::take(&mut lock_unpoisoned(&self.inner).source_reset_requested)
    }

    pub fn stats(&self) -> StateStats {
        let inner = lock_unpoisoned(&self.inner);
        StateStats {
            started_at: self.started_at,
            uptime: self.started.elapsed(),
            total_events: inner.class_counts.values().sum(),
            class_counts: inner.class_counts.clone(),
            last_detection: inner.last_detection,
            latest_sequence: inner.latest_frame.as_ref().map(|f| f.sequence),
            source_state: inner.source_state,
            history_len: inner.history.len(),
        }
    }
}
