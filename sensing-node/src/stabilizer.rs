//! Multi-frame detection stabilizer.
//!
//! Raw detections become tracks keyed by [`TrackToken`]. A track is reported
//! only once it has been seen in `stability_frames` consecutive calls, keeps
//! being reported while it stays within the miss-gap, and is purged once it
//! has been absent for more than `max_misses` consecutive calls.
//!
//! Detections without an upstream tracker id get a fresh synthetic token on
//! every call, so they never accumulate hits across frames.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument};
use watchpost_common::{Detection, RawDetection, StabilizedDetections, TrackToken};

use crate::lock_unpoisoned;
use crate::settings::RuntimeSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Pending,
    Confirmed,
    Stale,
}

#[derive(Debug, Clone)]
pub struct Track {
    pub token: TrackToken,
    pub label: String,
    pub consecutive_hits: u32,
    pub misses: u32,
    pub first_seen: u64,
    pub last_seen: u64,
    pub state: TrackState,
    pub latest: RawDetection,
}

impl Track {
    fn new(token: TrackToken, detection: RawDetection, sequence: u64) -> Self {
        Self {
            token,
            label: detection.label.clone(),
            consecutive_hits: 1,
            misses: 0,
            first_seen: sequence,
            last_seen: sequence,
            state: TrackState::Pending,
            latest: detection,
        }
    }

    fn hit(&mut self, detection: RawDetection, sequence: u64) {
        if self.last_seen + 1 == sequence {
            self.consecutive_hits += 1;
        } else {
            self.consecutive_hits = 1;
        }
        self.misses = 0;
        self.last_seen = sequence;
        self.latest = detection;
    }

    fn miss(&mut self, max_misses: u32) {
        self.consecutive_hits = 0;
        self.misses += 1;
        if self.misses > max_misses {
            self.state = TrackState::Stale;
        }
    }

    fn to_detection(&self) -> Detection {
        Detection {
            token: self.token.clone(),
            label: self.label.clone(),
            confidence: self.latest.confidence,
            bbox: self.latest.bbox,
            consecutive_hits: self.consecutive_hits,
            first_seen: self.first_seen,
        }
    }
}

#[derive(Default)]
struct StabilizerState {
    sequence: u64,
    tracks: HashMap<TrackToken, Track>,
    next_synthetic: u64,
    malformed_total: u64,
}

impl StabilizerState {
    fn resolve_token(&mut self, detection: &RawDetection) -> TrackToken {
        match detection.tracker_id {
            Some(id) => TrackToken::Upstream {
                id,
                label: detection.label.clone(),
            },
            None => {
                self.next_synthetic += 1;
                TrackToken::Synthetic(self.next_synthetic)
            }
        }
    }
}

pub struct DetectionStabilizer {
    settings: Arc<RuntimeSettings>,
    state: Mutex<StabilizerState>,
}

impl DetectionStabilizer {
    pub fn new(settings: Arc<RuntimeSettings>) -> Self {
        Self {
            settings,
            state: Mutex::new(StabilizerState::default()),
        }
    }

    /// Advances one frame. Calls are serialized on the internal mutex.
    #[instrument(skip(self, raw), level = "debug", fields(raw = raw.len()))]
    pub fn filter(&self, raw: Vec<RawDetection>) -> StabilizedDetections {
        let (min_hits, max_misses) = self.settings.stability_thresholds();

        let mut state = lock_unpoisoned(&self.state);
        state.sequence += 1;
        let sequence = state.sequence;

        let mut seen: HashSet<TrackToken> = HashSet::with_capacity(raw.len());
        let mut newly_confirmed = Vec::new();
        let mut malformed = 0;

        for detection in raw {
            if let Err(reason) = detection.validate() {
                malformed += 1;
                debug!("Dropping malformed detection at frame {}: {}", sequence, reason);
                continue;
            }

            let token = state.resolve_token(&detection);
            if !seen.insert(token.clone()) {
                debug!("Duplicate detection for {} in frame {}, keeping first", token, sequence);
                continue;
            }

            let track = match state.tracks.entry(token.clone()) {
                Entry::Occupied(entry) => {
                    let track = entry.into_mut();
                    track.hit(detection, sequence);
                    track
                }
                Entry::Vacant(entry) => entry.insert(Track::new(token.clone(), detection, sequence)),
            };

            if track.state == TrackState::Pending && track.consecutive_hits >= min_hits {
                track.state = TrackState::Confirmed;
                info!(
                    "Confirmed {} ({:.2}) after {} frames",
                    token, track.latest.confidence, track.consecutive_hits
                );
                newly_confirmed.push(token);
            }
        }

        for track in state.tracks.values_mut() {
            if track.last_seen != sequence {
                track.miss(max_misses);
            }
        }

        let before = state.tracks.len();
        state.tracks.retain(|_, track| track.state != TrackState::Stale);
        let purged = before - state.tracks.len();
        if purged > 0 {
            debug!("Purged {} stale tracks at frame {}", purged, sequence);
        }

        state.malformed_total += malformed as u64;

        let mut detections: Vec<Detection> = state
            .tracks
            .values()
            .filter(|t| t.last_seen == sequence && t.state == TrackState::Confirmed)
            .map(Track::to_detection)
            .collect();
        detections.sort_by(|a, b| a.token.cmp(&b.token));
        newly_confirmed.sort();

        StabilizedDetections {
            sequence,
            detections,
            newly_confirmed,
            malformed,
        }
    }

    pub fn reset(&self) {
        lock_unpoisoned(&self.state).tracks.clear();
    }

    pub fn sequence(&self) -> u64 {
        lock_unpoisoned(&self.state).sequence
    }

    pub fn track_count(&self) -> usize {
        lock_unpoisoned(&self.state).tracks.len()
    }

    pub fn malformed_total(&self) -> u64 {
        lock_unpoisoned(&self.state).malformed_total
    }

    pub fn track(&self, token: &TrackToken) -> Option<Track> {
        lock_unpoisoned(&self.state).tracks.get(token).cloned()
    }
}
