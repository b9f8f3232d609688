//! Errors for T1000 ingestion
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("MQTT connection failed")]
    MqttConnectionError(#[from] rumqttc::ConnectionError),

    #[error("MQTT client error")]
    MqttClientError(#[from] rumqttc::ClientError),

    #[error("Serialization error")]
    SerdeError(#[from] serde_json::Error),

    #[error("Configuration error")]
    ConfigError(#[from] config::ConfigError),

    #[error("Store connection target is not configured")]
    MissingStoreTarget,

    #[error("Unsupported store target: {0}")]
    UnsupportedStoreTarget(String),

    #[error("Payload error: {0}")]
    PayloadError(#[from] PayloadError),

    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),
}

/// Failures while unpacking the base64/JSON layers of a message
#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("invalid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("outer payload is not a JSON object")]
    NotAnObject,

    #[error("device payload is not a base64 string")]
    NotAString,
}

/// Frame decoding failures; both carry the offending hex text
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameError {
    #[error("invalid_hex: {source}")]
    InvalidHex {
        hex: String,
        #[source]
        source: hex::FromHexError,
    },

    #[error("empty")]
    Empty { hex: String },
}

impl FrameError {
    /// The input that failed to decode
    pub fn hex(&self) -> &str {
        match self {
            FrameError::InvalidHex { hex, .. } | FrameError::Empty { hex } => hex,
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Database migration error")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("Invalid store path: {0:?}")]
    InvalidPath(String),

    #[error("Update at {0} is not a JSON object")]
    InvalidUpdate(String),

    #[error("Field {field} at {path} is not an integer")]
    NotACounter { path: String, field: String },
}
