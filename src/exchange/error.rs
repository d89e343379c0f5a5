//! Error taxonomy for exchange communication.

/// Failures surfaced by the exchange layer.
///
/// Only [`ExchangeError::Transport`] is retried by the connection manager;
/// every other class is reported to the caller on the first occurrence.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// Timeout, refused connection, TLS failure or a retryable HTTP status.
    #[error("transport failure after {attempts} attempt(s): {message}")]
    Transport { attempts: u32, message: String },
    /// Non-JSON body or a response with an unexpected shape.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// A required field (price, size, ...) is missing or unusable.
    #[error("invalid market data: {0}")]
    Domain(String),
    /// Invalid asset symbol, missing account address and similar setup issues.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The connection manager was closed; no further I/O is issued.
    #[error("connection closed")]
    Closed,
}

impl ExchangeError {
    /// Whether the failure class is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExchangeError::Transport { .. })
    }

    pub(crate) fn transport(message: impl Into<String>) -> Self {
        ExchangeError::Transport {
            attempts: 1,
            message: message.into(),
        }
    }

    /// Short class label for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ExchangeError::Transport { .. } => "transport",
            ExchangeError::Protocol(_) => "protocol",
            ExchangeError::Domain(_) => "domain",
            ExchangeError::Configuration(_) => "configuration",
            ExchangeError::Closed => "closed",
        }
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ExchangeError::Protocol(err.to_string())
        } else if err.is_builder() {
            ExchangeError::Configuration(err.to_string())
        } else {
            ExchangeError::transport(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ExchangeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => ExchangeError::Closed,
            WsError::Url(e) => ExchangeError::Configuration(e.to_string()),
            WsError::Protocol(e) => ExchangeError::Protocol(e.to_string()),
            other => ExchangeError::transport(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transport_is_retryable() {
        assert!(ExchangeError::transport("timed out").is_retryable());
        assert!(!ExchangeError::Protocol("not json".into()).is_retryable());
        assert!(!ExchangeError::Domain("missing px".into()).is_retryable());
        assert!(!ExchangeError::Configuration("bad coin".into()).is_retryable());
        assert!(!ExchangeError::Closed.is_retryable());
    }

    #[test]
    fn test_display_includes_attempts() {
        let err = ExchangeError::Transport {
            attempts: 3,
            message: "timed out".into(),
        };
        assert_eq!(
            err.to_string(),
            "transport failure after 3 attempt(s): timed out"
        );
        assert_eq!(err.kind(), "transport");
    }
}
