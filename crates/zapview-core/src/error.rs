use std::time::Duration;

/// Errors surfaced by the zap pipeline.
///
/// Only `Configuration` and `Decode` ever leave the coordinator's public entry
/// points; the remaining variants are produced inside leaf components, logged,
/// and converted into null/empty results there.
#[derive(Debug, thiserror::Error)]
pub enum ZapError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },
    #[error("Failed to decode identifier: {identifier}")]
    Decode { identifier: String },
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Relay error: {message}")]
    Relay { message: String },
    #[error("Malformed event {event_id}: {reason}")]
    MalformedEvent { event_id: String, reason: String },
}

impl ZapError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ZapError>;
