//! Error handling for the telemetry stream client.

use std::time::Duration;

use http::StatusCode;
use thiserror::Error;

/// The main result type used throughout the crate.
pub type TransportResult<T> = Result<T, TransportError>;

/// Outcome of a failed credential exchange.
///
/// Cloneable so a single failed attempt can be handed to every caller that
/// was waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    /// The session endpoint answered with a non-success status.
    #[error("session rejected with status {status}")]
    Rejected { status: StatusCode },

    /// The session endpoint could not be reached.
    #[error("session endpoint unreachable: {message}")]
    Unreachable { message: String },
}

/// Coarse failure classes surfaced to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Credentials rejected or session endpoint unreachable.
    Negotiation,
    /// Streaming connection failed to open or failed mid-stream.
    Transport,
    /// A single inbound frame was not valid structured data.
    Decode,
    /// The configuration cannot be used as given.
    Misconfiguration,
}

/// Error type for all stream client operations.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Session negotiation failed.
    #[error("Negotiation error: {0}")]
    Negotiation(#[from] NegotiationError),

    /// WebSocket errors
    #[error("WebSocket error: {message}")]
    WebSocket { message: String },

    /// The streaming handshake was refused by the upstream.
    #[error("WebSocket handshake rejected with status {status}")]
    HandshakeRejected { status: StatusCode },

    /// A frame could not be decoded.
    #[error("Decode error: {message}")]
    Decode {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Timeout errors
    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode {
            message: e.to_string(),
            source: Some(e),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        match e {
            tokio_tungstenite::tungstenite::Error::Http(response) => Self::HandshakeRejected {
                status: response.status(),
            },
            other => Self::WebSocket {
                message: other.to_string(),
            },
        }
    }
}

impl TransportError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a WebSocket error.
    pub fn websocket(message: impl Into<String>) -> Self {
        Self::WebSocket {
            message: message.into(),
        }
    }

    /// Create a decode error without an underlying parser error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
            source: None,
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Which failure class this error belongs to.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Negotiation(_) => ErrorClass::Negotiation,
            Self::WebSocket { .. }
            | Self::HandshakeRejected { .. }
            | Self::Timeout { .. } => ErrorClass::Transport,
            Self::Decode { .. } => ErrorClass::Decode,
            Self::Config { .. } => ErrorClass::Misconfiguration,
        }
    }

    /// Whether the supervisor recovers from this error by reconnecting.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Negotiation | ErrorClass::Transport
        )
    }

    /// Whether the upstream refused the session carried by the handshake.
    pub fn is_session_rejection(&self) -> bool {
        matches!(
            self,
            Self::HandshakeRejected { status }
                if *status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = TransportError::config("Invalid URL");
        assert!(matches!(err, TransportError::Config { .. }));

        let err = TransportError::timeout(Duration::from_secs(5));
        assert!(matches!(err, TransportError::Timeout { .. }));

        let err = TransportError::decode("not json");
        assert!(matches!(err, TransportError::Decode { source: None, .. }));
    }

    #[test]
    fn test_classification() {
        let err: TransportError = NegotiationError::Rejected {
            status: StatusCode::UNAUTHORIZED,
        }
        .into();
        assert_eq!(err.class(), ErrorClass::Negotiation);
        assert!(err.is_retryable());

        let err = TransportError::websocket("reset by peer");
        assert_eq!(err.class(), ErrorClass::Transport);
        assert!(err.is_retryable());

        let err: TransportError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert_eq!(err.class(), ErrorClass::Decode);
        assert!(!err.is_retryable());

        assert_eq!(
            TransportError::config("bad").class(),
            ErrorClass::Misconfiguration
        );
    }

    #[test]
    fn test_session_rejection() {
        let err = TransportError::HandshakeRejected {
            status: StatusCode::UNAUTHORIZED,
        };
        assert!(err.is_session_rejection());

        let err = TransportError::HandshakeRejected {
            status: StatusCode::BAD_GATEWAY,
        };
        assert!(!err.is_session_rejection());
    }

    #[test]
    fn test_negotiation_display() {
        let err = NegotiationError::Rejected {
            status: StatusCode::UNAUTHORIZED,
        };
        assert_eq!(err.to_string(), "session rejected with status 401 Unauthorized");
    }
}
