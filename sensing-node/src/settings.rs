//! Runtime-mutable thresholds shared by the capture and remote-control loops.
//!
//! Writers clamp into range instead of rejecting, bump the version and drop
//! the cached summary. The summary is rebuilt lazily on the next read.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::lock_unpoisoned;

const STABILITY_FRAMES: (u32, u32) = (1, 30);
const MAX_MISSES: (u32, u32) = (1, 100);
const CONFIDENCE: (f32, f32) = (0.0, 1.0);
const CANNY: (u32, u32) = (0, 255);
const PIXEL_THRESHOLD: (f32, f32) = (0.0, 100.0);
const COOLDOWN_SECS: (f32, f32) = (0.0, 3600.0);
const TARGET_FPS: (u32, u32) = (1, 60);
const HISTORY_CAPACITY: (usize, usize) = (1, 100_000);
const RATE_LIMIT_WINDOW_SECS: (f32, f32) = (0.0, 3600.0);
const BACKOFF_BASE_SECS: (u64, u64) = (1, 3600);
const BACKOFF_CAP_SECS: (u64, u64) = (1, 86_400);
const BACKOFF_MAX_ATTEMPTS: (u32, u32) = (1, 1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    StabilityFrames,
    MaxMisses,
    Confidence,
    CannyLow,
    CannyHigh,
    PixelThreshold,
    CooldownSecs,
    TargetFps,
    HistoryCapacity,
    RateLimitWindowSecs,
    BackoffBaseSecs,
    BackoffCapSecs,
    BackoffMaxAttempts,
    Classes,
}

impl SettingKey {
    pub const ALL: [SettingKey; 14] = [
        SettingKey::StabilityFrames,
        SettingKey::MaxMisses,
        SettingKey::Confidence,
        SettingKey::CannyLow,
        SettingKey::CannyHigh,
        SettingKey::PixelThreshold,
        SettingKey::CooldownSecs,
        SettingKey::TargetFps,
        SettingKey::HistoryCapacity,
        SettingKey::RateLimitWindowSecs,
        SettingKey::BackoffBaseSecs,
        SettingKey::BackoffCapSecs,
        SettingKey::BackoffMaxAttempts,
        SettingKey::Classes,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SettingKey::StabilityFrames => "stability_frames",
            SettingKey::MaxMisses => "max_misses",
            SettingKey::Confidence => "confidence",
            SettingKey::CannyLow => "canny_low",
            SettingKey::CannyHigh => "canny_high",
            SettingKey::PixelThreshold => "pixel_threshold",
            SettingKey::CooldownSecs => "cooldown_secs",
            SettingKey::TargetFps => "target_fps",
            SettingKey::HistoryCapacity => "history_capacity",
            SettingKey::RateLimitWindowSecs => "rate_limit_window_secs",
            SettingKey::BackoffBaseSecs => "backoff_base_secs",
            SettingKey::BackoffCapSecs => "backoff_cap_secs",
            SettingKey::BackoffMaxAttempts => "backoff_max_attempts",
            SettingKey::Classes => "classes",
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SettingKey {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        SettingKey::ALL
            .into_iter()
            .find(|key| key.name() == wanted)
            .ok_or_else(|| AgentError::SettingsError(format!("unknown setting '{}'", s.trim())))
    }
}

/// Copy of every runtime threshold at one version.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettingsSnapshot {
    pub version: u64,
    pub stability_frames: u32,
    pub max_misses: u32,
    pub confidence: f32,
    pub canny_low: u32,
    pub canny_high: u32,
    pub pixel_threshold: f32,
    pub cooldown_secs: f32,
    pub target_fps: u32,
    pub history_capacity: usize,
    pub rate_limit_window_secs: f32,
    pub backoff_base_secs: u64,
    pub backoff_cap_secs: u64,
    pub backoff_max_attempts: u32,
    /// Empty means every class is enabled.
    pub enabled_classes: BTreeSet<String>,
}

impl SettingsSnapshot {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            version: 0,
            stability_frames: config.detection.stability_frames,
            max_misses: config.detection.max_misses,
            confidence: config.detection.confidence,
            canny_low: config.motion.canny_low,
            canny_high: config.motion.canny_high,
            pixel_threshold: config.motion.pixel_threshold,
            cooldown_secs: config.motion.cooldown_secs,
            target_fps: config.detection.target_fps,
            history_capacity: config.detection.history_capacity,
            rate_limit_window_secs: config.remote.rate_limit_window_secs,
            backoff_base_secs: config.remote.backoff_base_secs,
            backoff_cap_secs: config.remote.backoff_cap_secs,
            backoff_max_attempts: config.remote.backoff_max_attempts,
            enabled_classes: config
                .detection
                .enabled_classes
                .iter()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect(),
        }
    }

    pub fn is_class_enabled(&self, class_name: &str) -> bool {
        self.enabled_classes.is_empty() || self.enabled_classes.contains(class_name)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.target_fps.max(1)))
    }

    pub fn motion_cooldown(&self) -> Duration {
        Duration::from_secs_f32(self.cooldown_secs.max(COOLDOWN_SECS.0).min(COOLDOWN_SECS.1))
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs_f32(self.rate_limit_window_secs.max(0.0))
    }

    fn clamp_all(&mut self) {
        self.stability_frames = clamp_value(self.stability_frames, STABILITY_FRAMES).0;
        self.max_misses = clamp_value(self.max_misses, MAX_MISSES).0;
        self.confidence = clamp_value(self.confidence, CONFIDENCE).0;
        self.canny_low = clamp_value(self.canny_low, CANNY).0;
        self.canny_high = clamp_value(self.canny_high, CANNY).0;
        self.pixel_threshold = clamp_value(self.pixel_threshold, PIXEL_THRESHOLD).0;
        self.cooldown_secs = clamp_value(self.cooldown_secs, COOLDOWN_SECS).0;
        self.target_fps = clamp_value(self.target_fps, TARGET_FPS).0;
        self.history_capacity = clamp_value(self.history_capacity, HISTORY_CAPACITY).0;
        self.rate_limit_window_secs =
            clamp_value(self.rate_limit_window_secs, RATE_LIMIT_WINDOW_SECS).0;
        self.backoff_base_secs = clamp_value(self.backoff_base_secs, BACKOFF_BASE_SECS).0;
        self.backoff_cap_secs = clamp_value(self.backoff_cap_secs, BACKOFF_CAP_SECS).0;
        self.backoff_max_attempts = clamp_value(self.backoff_max_attempts, BACKOFF_MAX_ATTEMPTS).0;
    }

    fn render_summary(&self) -> String {
        let classes = if self.enabled_classes.is_empty() {
            "All".to_string()
        } else {
            self.enabled_classes
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        };

        format!(
            "Runtime Settings (v{})\n\n\
             Motion Detection:\n\
             - Canny Low: {}\n\
             - Canny High: {}\n\
             - Pixel Threshold: {}%\n\
             - Cooldown: {}s\n\n\
             Object Detection:\n\
             - Confidence: {:.2}\n\
             - Target FPS: {}\n\n\
             Detection Stability:\n\
             - Min Frames: {}\n\
             - Max Misses: {}\n\
             - History Capacity: {}\n\n\
             Remote Control:\n\
             - Rate Limit Window: {}s\n\
             - Backoff: {}s base, {}s cap, {} attempts\n\n\
             Enabled Classes:\n{}",
            self.version,
            self.canny_low,
            self.canny_high,
            self.pixel_threshold,
            self.cooldown_secs,
            self.confidence,
            self.target_fps,
            self.stability_frames,
            self.max_misses,
            self.history_capacity,
            self.rate_limit_window_secs,
            self.backoff_base_secs,
            self.backoff_cap_secs,
            self.backoff_max_attempts,
            classes,
        )
    }
}

/// Outcome of a setter: the value actually stored and whether the request was out of range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Applied<T> {
    pub value: T,
    pub clamped: bool,
}

/// NaN and anything below `lo` land on `lo`.
fn clamp_value<T: PartialOrd + Copy>(value: T, (lo, hi): (T, T)) -> (T, bool) {
    if !(value >= lo) {
        (lo, true)
    } else if value > hi {
        (hi, true)
    } else {
        (value, false)
    }
}

struct SettingsInner {
    values: SettingsSnapshot,
    summary: Option<Arc<str>>,
}

pub struct RuntimeSettings {
    inner: Mutex<SettingsInner>,
}

impl RuntimeSettings {
    pub fn new(mut initial: SettingsSnapshot) -> Self {
        initial.clamp_all();
        initial.version = 0;
        Self {
            inner: Mutex::new(SettingsInner {
                values: initial,
                summary: None,
            }),
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(SettingsSnapshot::from_config(config))
    }

    pub fn snapshot(&self) -> SettingsSnapshot {
        lock_unpoisoned(&self.inner).values.clone()
    }

    pub fn version(&self) -> u64 {
        lock_unpoisoned(&self.inner).values.version
    }

    pub fn stability_frames(&self) -> u32 {
        lock_unpoisoned(&self.inner).values.stability_frames
    }

    pub fn max_misses(&self) -> u32 {
        lock_unpoisoned(&self.inner).values.max_misses
    }

    /// Both stabilizer thresholds read under one lock acquisition.
    pub fn stability_thresholds(&self) -> (u32, u32) {
        let inner = lock_unpoisoned(&self.inner);
        (inner.values.stability_frames, inner.values.max_misses)
    }

    pub fn is_class_enabled(&self, class_name: &str) -> bool {
        lock_unpoisoned(&self.inner).values.is_class_enabled(class_name)
    }

    /// Cached until the next mutation; repeated reads return the same allocation.
    pub fn summary(&self) -> Arc<str> {
        let mut inner = lock_unpoisoned(&self.inner);
        if let Some(summary) = &inner.summary {
            return Arc::clone(summary);
        }
        let summary: Arc<str> = Arc::from(inner.values.render_summary());
        debug!(version = inner.values.version, "Settings summary recomputed");
        inner.summary = Some(Arc::clone(&summary));
        summary
    }

    fn update<T>(
        &self,
        key: SettingKey,
        requested: T,
        bounds: (T, T),
        field: fn(&mut SettingsSnapshot) -> &mut T,
    ) -> Applied<T>
    where
        T: PartialOrd + Copy + fmt::Display,
    {
        let (value, clamped) = clamp_value(requested, bounds);
        if clamped {
            warn!(
                "Setting {} = {} out of range [{}, {}], clamped to {}",
                key, requested, bounds.0, bounds.1, value
            );
        }

        let mut inner = lock_unpoisoned(&self.inner);
        *field(&mut inner.values) = value;
        Self::mark_changed(&mut inner);
        Applied { value, clamped }
    }

    fn mark_changed(inner: &mut SettingsInner) {
        inner.values.version += 1;
        inner.summary = None;
    }

    pub fn set_stability_frames(&self, value: u32) -> Applied<u32> {
        self.update(SettingKey::StabilityFrames, value, STABILITY_FRAMES, |s| &mut s.stability_frames)
    }

    pub fn set_max_misses(&self, value: u32) -> Applied<u32> {
        self.update(SettingKey::MaxMisses, value, MAX_MISSES, |s| &mut s.max_misses)
    }

    pub fn set_confidence(&self, value: f32) -> Applied<f32> {
        self.update(SettingKey::Confidence, value, CONFIDENCE, |s| &mut s.confidence)
    }

    pub fn set_canny_low(&self, value: u32) -> Applied<u32> {
        self.update(SettingKey::CannyLow, value, CANNY, |s| &mut s.canny_low)
    }

    pub fn set_canny_high(&self, value: u32) -> Applied<u32> {
        self.update(SettingKey::CannyHigh, value, CANNY, |s| &mut s.canny_high)
    }

    pub fn set_pixel_threshold(&self, value: f32) -> Applied<f32> {
        self.update(SettingKey::PixelThreshold, value, PIXEL_THRESHOLD, |s| &mut s.pixel_threshold)
    }

    pub fn set_cooldown_secs(&self, value: f32) -> Applied<f32> {
        self.update(SettingKey::CooldownSecs, value, COOLDOWN_SECS, |s| &mut s.cooldown_secs)
    }

    pub fn set_target_fps(&self, value: u32) -> Applied<u32> {
        self.update(SettingKey::TargetFps, value, TARGET_FPS, |s| &mut s.target_fps)
    }

    pub fn set_history_capacity(&self, value: usize) -> Applied<usize> {
        self.update(SettingKey::HistoryCapacity, value, HISTORY_CAPACITY, |s| &mut s.history_capacity)
    }

    pub fn set_rate_limit_window_secs(&self, value: f32) -> Applied<f32> {
        self.update(
            SettingKey::RateLimitWindowSecs,
            value,
            RATE_LIMIT_WINDOW_SECS,
            |s| &mut s.rate_limit_window_secs,
        )
    }

    pub fn set_backoff_base_secs(&self, value: u64) -> Applied<u64> {
        self.update(SettingKey::BackoffBaseSecs, value, BACKOFF_BASE_SECS, |s| &mut s.backoff_base_secs)
    }

    pub fn set_backoff_cap_secs(&self, value: u64) -> Applied<u64> {
        self.update(SettingKey::BackoffCapSecs, value, BACKOFF_CAP_SECS, |s| &mut s.backoff_cap_secs)
    }

    pub fn set_backoff_max_attempts(&self, value: u32) -> Applied<u32> {
        self.update(
            SettingKey::BackoffMaxAttempts,
            value,
            BACKOFF_MAX_ATTEMPTS,
            |s| &mut s.backoff_max_attempts,
        )
    }

    pub fn set_enabled_classes<I, S>(&self, classes: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let classes: BTreeSet<String> = classes
            .into_iter()
            .map(|c| c.as_ref().trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        let mut inner = lock_unpoisoned(&self.inner);
        inner.values.enabled_classes = classes;
        Self::mark_changed(&mut inner);
    }

    pub fn enable_class(&self, class_name: &str) {
        let mut inner = lock_unpoisoned(&self.inner);
        inner.values.enabled_classes.insert(class_name.trim().to_string());
        Self::mark_changed(&mut inner);
    }

    pub fn disable_class(&self, class_name: &str) {
        let mut inner = lock_unpoisoned(&self.inner);
        inner.values.enabled_classes.remove(class_name.trim());
        Self::mark_changed(&mut inner);
    }

    /// Textual entry point for remote `/set <key> <value>`.
    ///
    /// Parse failures leave the settings untouched. `classes` takes a
    /// comma-separated list, or `all` to clear the filter.
    pub fn set_from_str(&self, key: &str, value: &str) -> Result<String> {
        let key: SettingKey = key.parse()?;
        let value = value.trim();

        fn parse<T: FromStr>(key: SettingKey, value: &str) -> Result<T> {
            value.parse::<T>().map_err(|_| {
                AgentError::SettingsError(format!("invalid value '{}' for {}", value, key))
            })
        }

        fn describe<T: fmt::Display>(key: SettingKey, applied: Applied<T>) -> String {
            if applied.clamped {
                format!("{} = {} (clamped)", key, applied.value)
            } else {
                format!("{} = {}", key, applied.value)
            }
        }

        let message = match key {
            SettingKey::StabilityFrames => describe(key, self.set_stability_frames(parse(key, value)?)),
            SettingKey::MaxMisses => describe(key, self.set_max_misses(parse(key, value)?)),
            SettingKey::Confidence => describe(key, self.set_confidence(parse(key, value)?)),
            SettingKey::CannyLow => describe(key, self.set_canny_low(parse(key, value)?)),
            SettingKey::CannyHigh => describe(key, self.set_canny_high(parse(key, value)?)),
            SettingKey::PixelThreshold => describe(key, self.set_pixel_threshold(parse(key, value)?)),
            SettingKey::CooldownSecs => describe(key, self.set_cooldown_secs(parse(key, value)?)),
            SettingKey::TargetFps => describe(key, self.set_target_fps(parse(key, value)?)),
            SettingKey::HistoryCapacity => describe(key, self.set_history_capacity(parse(key, value)?)),
            SettingKey::RateLimitWindowSecs => {
                describe(key, self.set_rate_limit_window_secs(parse(key, value)?))
            }
            SettingKey::BackoffBaseSecs => describe(key, self.set_backoff_base_secs(parse(key, value)?)),
            SettingKey::BackoffCapSecs => describe(key, self.set_backoff_cap_secs(parse(key, value)?)),
            SettingKey::BackoffMaxAttempts => {
                describe(key, self.set_backoff_max_attempts(parse(key, value)?))
            }
            SettingKey::Classes => {
                if value.is_empty() || value.eq_ignore_ascii_case("all") {
                    self.set_enabled_classes(std::iter::empty::<&str>());
                    format!("{} = All", key)
                } else {
                    self.set_enabled_classes(value.split(','));
                    format!("{} = {}", key, value)
                }
            }
        };
        Ok(message)
    }
}
