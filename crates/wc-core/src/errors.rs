/// Errors surfaced by the relay capability and the adapter wrapping it.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed {event} payload: {reason}")]
    MalformedPayload { event: &'static str, reason: String },

    // Precondition violations
    #[error("no session request is pending")]
    NoPendingSession,
    #[error("no pending call request with id {0}")]
    UnknownRequest(u64),
    #[error("relay connection already closed")]
    Closed,
}

impl RelayError {
    /// Responding to something that is not (or no longer) pending.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::NoPendingSession | Self::UnknownRequest(_) | Self::Closed
        )
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::ConnectionFailed(_) => "connection_failed",
            Self::Transport(_) => "transport",
            Self::MalformedPayload { .. } => "malformed_payload",
            Self::NoPendingSession => "no_pending_session",
            Self::UnknownRequest(_) => "unknown_request",
            Self::Closed => "closed",
        }
    }
}
