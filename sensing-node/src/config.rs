use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{AgentError, Result};

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AgentConfig {
    pub camera: CameraConfig,
    pub detection: DetectionConfig,
    pub motion: MotionConfig,
    pub remote: RemoteConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CameraConfig {
    pub source: CameraSource,
    pub device_id: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub warmup_frames: u32,
    pub prefer_external: bool,
    /// Indices `1..probe_limit` are probed when `prefer_external` is set.
    pub probe_limit: u32,
    pub probe_timeout_ms: u64,
    pub reconnect_max_attempts: u32,
    pub reconnect_delay_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CameraSource {
    Synthetic,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DetectionConfig {
    pub stability_frames: u32,
    pub max_misses: u32,
    pub confidence: f32,
    pub history_capacity: usize,
    pub target_fps: u32,
    pub enabled_classes: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MotionConfig {
    pub canny_low: u32,
    pub canny_high: u32,
    /// Percent of changed pixels that counts as motion.
    pub pixel_threshold: f32,
    pub cooldown_secs: f32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RemoteConfig {
    pub enabled: bool,
    pub bot_token: String,
    pub authorized_user_id: Option<i64>,
    pub api_base: String,
    pub poll_timeout_secs: u64,
    pub rate_limit_window_secs: f32,
    pub backoff_base_secs: u64,
    pub backoff_cap_secs: u64,
    pub backoff_max_attempts: u32,
    pub encode_workers: usize,
    pub jpeg_quality: u8,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(AgentError::ConfigError(format!(
                "camera resolution must be non-zero, got {}x{}",
                self.camera.width, self.camera.height
            )));
        }
        if self.remote.enabled && self.remote.bot_token.trim().is_empty() {
            return Err(AgentError::ConfigError(
                "remote.enabled is set but remote.bot_token is empty".to_string(),
            ));
        }
        if self.remote.encode_workers == 0 {
            return Err(AgentError::ConfigError(
                "remote.encode_workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl CameraConfig {
    pub fn probe_candidates(&self) -> Vec<u32> {
        (1..self.probe_limit).collect()
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl RemoteConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: CameraSource::Synthetic,
            device_id: 0,
            width: 640,
            height: 480,
            fps: 30,
            warmup_frames: 5,
            prefer_external: true,
            probe_limit: 3,
            probe_timeout_ms: 2000,
            reconnect_max_attempts: 5,
            reconnect_delay_ms: 1000,
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            stability_frames: 2,
            max_misses: 2,
            confidence: 0.5,
            history_capacity: 1000,
            target_fps: 10,
            enabled_classes: vec![],
        }
    }
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            canny_low: 50,
            canny_high: 150,
            pixel_threshold: 0.5,
            cooldown_secs: 2.0,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bot_token: String::new(),
            authorized_user_id: None,
            api_base: "https://api.telegram.org".to_string(),
            poll_timeout_secs: 30,
            rate_limit_window_secs: 2.0,
            backoff_base_secs: 5,
            backoff_cap_secs: 300,
            backoff_max_attempts: 10,
            encode_workers: 2,
            jpeg_quality: 60,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
