use thiserror::Error;

/// Errors surfaced by the hub client.
///
/// Transport and parsing failures are converted into one of these kinds at
/// the lowest layer; raw I/O errors never reach callers.
#[derive(Error, Debug)]
pub enum HubError {
    /// No hub URL is configured, or the socket could not be opened.
    #[error("hub connection unavailable: {0}")]
    ConnectionUnavailable(String),

    /// The hub rejected the access token (`auth_invalid`).
    ///
    /// Terminal for the socket; new credentials are needed before retrying.
    #[error("hub authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The auth ceiling or a per-request timeout elapsed.
    #[error("request timed out")]
    Timeout,

    /// The socket closed while the request was waiting for its response.
    #[error("hub connection lost")]
    ConnectionLost,

    /// The hub acknowledged a subscribe request with a failure.
    #[error("subscription rejected by hub: {0}")]
    SubscriptionRejected(String),

    /// A request was issued without an active connection.
    #[error("not connected: {0}")]
    NotConnected(String),

    /// The client has been shut down.
    #[error("hub client shut down")]
    Shutdown,

    /// A caller-supplied payload could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A caller-supplied payload has the wrong shape (e.g. not a JSON object).
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Builder or configuration misuse.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An inbound frame could not be understood.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

impl HubError {
    /// Whether the recovery loop should try again after this error.
    pub fn is_retryable(&self) -> bool {
        // ---
        matches!(
            self,
            HubError::ConnectionUnavailable(_)
                | HubError::Timeout
                | HubError::ConnectionLost
                | HubError::NotConnected(_)
        )
    }
}

/// Result type alias for hub operations
pub type Result<T> = std::result::Result<T, HubError>;

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        // ---
        assert!(HubError::ConnectionUnavailable("refused".into()).is_retryable());
        assert!(HubError::Timeout.is_retryable());
        assert!(HubError::ConnectionLost.is_retryable());
        assert!(HubError::NotConnected("closed".into()).is_retryable());
    }

    #[test]
    fn test_terminal_kinds() {
        // ---
        assert!(!HubError::AuthenticationFailed("bad token".into()).is_retryable());
        assert!(!HubError::Shutdown.is_retryable());
        assert!(!HubError::SubscriptionRejected("unknown command".into()).is_retryable());
    }
}
