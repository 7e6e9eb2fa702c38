/// Relay-level errors.
///
/// Every variant is local to a single call: the relay rejects or closes
/// that call and keeps serving the others.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("no peer available for service {service}")]
    NoPeerAvailable { service: String },

    #[error("invalid peer address: {0:?}")]
    InvalidPeerAddr(String),

    #[error("unexpected frame: {reason}")]
    UnexpectedFrame { reason: String },

    #[error("call {call_id} already completed")]
    CallCompleted { call_id: String },

    #[error("retries exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("retry rejected: {reason}")]
    RetryRejected { reason: String },
}

/// Misuse of a call-stats record after it was finalized.
///
/// Integration errors, not data errors: handles log and drop them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("call stats already ended")]
    AlreadyEnded,

    #[error("outcome marked after call stats ended")]
    MarkAfterEnd,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_no_peer() {
        let err = RelayError::NoPeerAvailable {
            service: "svc-b".into(),
        };
        assert_eq!(err.to_string(), "no peer available for service svc-b");
    }

    #[test]
    fn test_display_invalid_peer_addr() {
        let err = RelayError::InvalidPeerAddr(String::new());
        assert_eq!(err.to_string(), "invalid peer address: \"\"");
    }

    #[test]
    fn test_display_retries_exhausted() {
        let err = RelayError::RetriesExhausted { attempts: 5 };
        assert_eq!(err.to_string(), "retries exhausted after 5 attempts");
    }

    #[test]
    fn test_display_retry_rejected() {
        let err = RelayError::RetryRejected {
            reason: "response already streaming".into(),
        };
        assert_eq!(err.to_string(), "retry rejected: response already streaming");
    }

    #[test]
    fn test_display_lifecycle() {
        assert_eq!(
            LifecycleError::AlreadyEnded.to_string(),
            "call stats already ended"
        );
        assert_eq!(
            LifecycleError::MarkAfterEnd.to_string(),
            "outcome marked after call stats ended"
        );
    }
}
