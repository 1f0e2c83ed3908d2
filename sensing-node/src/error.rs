use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Camera error: {0}")]
    CameraError(String),

    #[error("Detection error: {0}")]
    DetectionError(String),

    #[error("Messaging error: {0}")]
    MessagingError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Settings error: {0}")]
    SettingsError(String),

    #[error("Encode error: {0}")]
    EncodeError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Timeout: {0}")]
    Timeout(String),
}

impl From<reqwest::Error> for AgentError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            AgentError::Timeout(error.to_string())
        } else {
            AgentError::MessagingError(error.to_string())
        }
    }
}

impl From<image::ImageError> for AgentError {
    fn from(error: image::ImageError) -> Self {
        AgentError::EncodeError(error.to_string())
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(error: serde_json::Error) -> Self {
        AgentError::SerializationError(error.to_string())
    }
}

impl From<config::ConfigError> for AgentError {
    fn from(error: config::ConfigError) -> Self {
        AgentError::ConfigError(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
