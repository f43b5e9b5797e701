use wc_core::{RelayError, UriError};
use wc_store::StoreError;

use crate::collaborators::ApprovalError;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid connection URI: {0}")]
    InvalidUri(#[from] UriError),

    #[error("no live relay connection")]
    NoActiveConnection,

    #[error("{0}")]
    AccountUnavailable(String),

    #[error("transaction approval is not supported")]
    ApprovalUnsupported,

    #[error(transparent)]
    Approval(#[from] ApprovalError),
}

impl SessionError {
    /// Responding at the wrong time: logged and otherwise ignored.
    pub fn is_precondition(&self) -> bool {
        match self {
            Self::Relay(e) => e.is_precondition(),
            Self::NoActiveConnection => true,
            _ => false,
        }
    }

    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Relay(e) => e.error_kind(),
            Self::Store(_) => "store",
            Self::InvalidUri(_) => "invalid_uri",
            Self::NoActiveConnection => "no_active_connection",
            Self::AccountUnavailable(_) => "account_unavailable",
            Self::ApprovalUnsupported => "approval_unsupported",
            Self::Approval(_) => "approval_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precondition_classification() {
        assert!(SessionError::NoActiveConnection.is_precondition());
        assert!(SessionError::from(RelayError::NoPendingSession).is_precondition());
        assert!(SessionError::from(RelayError::UnknownRequest(4)).is_precondition());
        assert!(!SessionError::from(RelayError::ConnectionFailed("x".into())).is_precondition());
        assert!(!SessionError::ApprovalUnsupported.is_precondition());
        assert!(!SessionError::from(UriError::EmptyTopic).is_precondition());
    }

    #[test]
    fn kinds() {
        assert_eq!(SessionError::NoActiveConnection.error_kind(), "no_active_connection");
        assert_eq!(SessionError::from(UriError::EmptyTopic).error_kind(), "invalid_uri");
        assert_eq!(
            SessionError::from(StoreError::Unavailable("down".into())).error_kind(),
            "store"
        );
    }
}
