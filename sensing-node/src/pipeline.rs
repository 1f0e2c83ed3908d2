//! Capture loop: frame source -> motion gate -> detector -> stabilizer -> shared state.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};
use watchpost_common::{HistoryEntry, StabilizedDetections};

use crate::camera::{FrameSource, SourceState};
use crate::clock::Clock;
use crate::detection::{apply_filters, Detector, MotionGate};
use crate::settings::RuntimeSettings;
use crate::stabilizer::DetectionStabilizer;
use crate::state::SharedState;
use crate::Shutdown;

const NO_FRAME_PAUSE: Duration = Duration::from_millis(100);
const DISABLED_PAUSE: Duration = Duration::from_secs(1);
const STATUS_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Processed(StabilizedDetections),
    NoFrame(SourceState),
}

pub struct CaptureLoop {
    source: FrameSource,
    detector: Box<dyn Detector>,
    motion: Option<MotionGate>,
    stabilizer: Arc<DetectionStabilizer>,
    shared: Arc<SharedState>,
    settings: Arc<RuntimeSettings>,
    clock: Arc<dyn Clock>,
    frames_processed: u64,
    last_status: Instant,
}

impl CaptureLoop {
    pub fn new(
        source: FrameSource,
        detector: Box<dyn Detector>,
        stabilizer: Arc<DetectionStabilizer>,
        shared: Arc<SharedState>,
        settings: Arc<RuntimeSettings>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let last_status = clock.now();
        Self {
            source,
            detector,
            motion: None,
            stabilizer,
            shared,
            settings,
            clock,
            frames_processed: 0,
            last_status,
        }
    }

    /// Runs the detector only on frames the gate reports as motion. Other
    /// frames are published with no detections and leave the tracks untouched.
    pub fn with_motion_gate(mut self, gate: MotionGate) -> Self {
        self.motion = Some(gate);
        self
    }

    /// Runs until `shutdown` is triggered, then releases the camera.
    pub fn run(mut self, shutdown: Shutdown) {
        if let Err(e) = self.source.start() {
            warn!("{}; will keep retrying from the capture loop", e);
        }
        self.shared.set_source_state(self.source.state());
        info!("Capture loop started");

        while !shutdown.is_triggered() {
            let started = self.clock.now();
            let interval = self.settings.snapshot().frame_interval();

            match self.step() {
                StepOutcome::Processed(_) => {
                    let elapsed = self.clock.now().saturating_duration_since(started);
                    if elapsed < interval {
                        self.clock.sleep(interval - elapsed);
                    }
                }
                StepOutcome::NoFrame(SourceState::Disabled) => self.clock.sleep(DISABLED_PAUSE),
                StepOutcome::NoFrame(_) => self.clock.sleep(NO_FRAME_PAUSE),
            }

            self.log_status_if_due();
        }

        self.source.stop();
        self.shared.set_source_state(self.source.state());
        info!("Capture loop stopped after {} frames", self.frames_processed);
    }

    /// One iteration without pacing.
    #[instrument(skip(self), level = "debug")]
    pub fn step(&mut self) -> StepOutcome {
        if self.shared.take_source_reset_request() {
            self.source.reset();
        }

        let snapshot = self.settings.snapshot();
        self.shared.set_history_capacity(snapshot.history_capacity);

        let frame = self.source.get_frame();
        let source_state = self.source.state();
        self.shared.set_source_state(source_state);
        let Some(frame) = frame else {
            return StepOutcome::NoFrame(source_state);
        };

        let moving = match self.motion.as_mut() {
            Some(gate) => gate.check(&frame.image, &snapshot, self.clock.now()),
            None => true,
        };
        if !moving {
            let detections = StabilizedDetections::empty(frame.sequence);
            self.shared
                .update_frame_with_detections(frame, detections.clone());
            self.frames_processed += 1;
            return StepOutcome::Processed(detections);
        }

        let raw = match self.detector.detect(&frame, &snapshot) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Detection failed on frame {}: {}", frame.sequence, e);
                Vec::new()
            }
        };
        let raw = apply_filters(raw, &snapshot);

        let mut detections = self.stabilizer.filter(raw);
        // The stabilizer numbers its own calls; tag the result with its frame.
        detections.sequence = frame.sequence;

        for detection in &detections.detections {
            if detections.newly_confirmed.contains(&detection.token) {
                info!(
                    "ALERT: {} detected ({:.2}) at frame {}",
                    detection.label, detection.confidence, frame.sequence
                );
            }
        }

        if !detections.is_empty() {
            self.shared.append_history(HistoryEntry::new(detections.clone()));
        }
        self.shared
            .update_frame_with_detections(frame, detections.clone());
        self.frames_processed += 1;
        debug!("Frame processed: {} confirmed", detections.len());

        StepOutcome::Processed(detections)
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    pub fn source(&self) -> &FrameSource {
        &self.source
    }

    fn log_status_if_due(&mut self) {
        let now = self.clock.now();
        if now.saturating_duration_since(self.last_status) < STATUS_INTERVAL {
            return;
        }
        self.last_status = now;

        let stats = self.shared.stats();
        info!(
            "Status: frames={}, camera={}, tracks={}, events={}, malformed={}",
            self.frames_processed,
            stats.source_state,
            self.stabilizer.track_count(),
            stats.total_events,
            self.stabilizer.malformed_total()
        );
    }
}
