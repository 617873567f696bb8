//! Error types for whipcast

use thiserror::Error;

use crate::types::SourceKind;

/// Result type alias using WhipcastError
pub type Result<T> = std::result::Result<T, WhipcastError>;

/// Main error type for whipcast operations
#[derive(Debug, Error)]
pub enum WhipcastError {
    /// User declined a capture prompt
    #[error("Permission denied for {0}")]
    PermissionDenied(SourceKind),

    /// No matching capture hardware or capability
    #[error("{0} unavailable: {1}")]
    DeviceUnavailable(SourceKind, String),

    /// Non-success signaling response or malformed answer
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// Error during the stop sequence (logged, never fatal)
    #[error("Teardown error: {0}")]
    Teardown(String),

    /// HTTP transport error talking to an ingest or collaborator endpoint
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// Peer connection error
    #[error("WebRTC error: {0}")]
    WebRtc(String),

    /// Media encoder missing or failing
    #[error("Encoder error: {0}")]
    Encoder(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Session identifier is empty after normalization
    #[error("Invalid session id: {0:?}")]
    InvalidSessionId(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<WhipcastError>,
    },
}

impl WhipcastError {
    /// Create a negotiation error
    pub fn negotiation(msg: impl Into<String>) -> Self {
        Self::Negotiation(msg.into())
    }

    /// Create a teardown error
    pub fn teardown(msg: impl Into<String>) -> Self {
        Self::Teardown(msg.into())
    }

    /// Create a signaling error
    pub fn signaling(msg: impl Into<String>) -> Self {
        Self::Signaling(msg.into())
    }

    /// Create a WebRTC error
    pub fn webrtc(msg: impl Into<String>) -> Self {
        Self::WebRtc(msg.into())
    }

    /// Create an encoder error
    pub fn encoder(msg: impl Into<String>) -> Self {
        Self::Encoder(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error ends the current publish attempt
    pub fn is_fatal_to_publish(&self) -> bool {
        match self {
            Self::Negotiation(_) | Self::Signaling(_) | Self::WebRtc(_) => true,
            Self::WithContext { source, .. } => source.is_fatal_to_publish(),
            _ => false,
        }
    }

    /// A short hint for the user on how to fix the problem
    pub fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::PermissionDenied(_) => {
                Some("Grant capture access to this application and request the source again")
            }
            Self::DeviceUnavailable(..) => Some("Check that the capture device is connected"),
            Self::Negotiation(_) | Self::Signaling(_) => {
                Some("Check that the ingest server is running and the ingest URL is correct")
            }
            Self::WebRtc(_) => Some("Check ICE server settings in config.toml"),
            Self::Encoder(_) => Some("Install FFmpeg built with libx264 and libopus"),
            Self::Config(_) => Some("Run `whipcast config sample` and compare with your config.toml"),
            Self::InvalidSessionId(_) => Some("Enter a non-empty session id"),
            Self::WithContext { source, .. } => source.user_hint(),
            Self::Teardown(_) | Self::Io(_) => None,
        }
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

// Conversions from external error types

impl From<reqwest::Error> for WhipcastError {
    fn from(err: reqwest::Error) -> Self {
        Self::Signaling(err.to_string())
    }
}

impl From<url::ParseError> for WhipcastError {
    fn from(err: url::ParseError) -> Self {
        Self::Config(format!("Invalid URL: {}", err))
    }
}

impl From<webrtc::Error> for WhipcastError {
    fn from(err: webrtc::Error) -> Self {
        Self::WebRtc(err.to_string())
    }
}
