/// Error surfaced at the UI boundary. Crate-level errors convert into this.
#[derive(Debug, thiserror::Error)]
pub enum ReelChatError {
    #[error("not found")]
    NotFound,

    #[error("forbidden")]
    Forbidden,

    #[error("validation error: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    /// The peer has not published a public key yet. Retry later.
    #[error("recipient has no published key")]
    RecipientKeyMissing,

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl ReelChatError {
    /// Whether retrying the same operation later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReelChatError::RecipientKeyMissing | ReelChatError::ServiceUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let err = ReelChatError::NotFound;
        assert_eq!(err.to_string(), "not found");
    }

    #[test]
    fn validation_contains_message() {
        let err = ReelChatError::Validation("bad input".into());
        assert_eq!(err.to_string(), "validation error: bad input");
    }

    #[test]
    fn service_unavailable_display() {
        let err = ReelChatError::ServiceUnavailable("backend down".into());
        assert_eq!(err.to_string(), "service unavailable: backend down");
    }

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(ReelChatError::RecipientKeyMissing.is_retryable());
        assert!(ReelChatError::ServiceUnavailable("x".into()).is_retryable());
        assert!(!ReelChatError::Crypto("x".into()).is_retryable());
        assert!(!ReelChatError::Forbidden.is_retryable());
    }

    #[test]
    fn all_variants_impl_error() {
        let errors: Vec<Box<dyn std::error::Error>> = vec![
            Box::new(ReelChatError::NotFound),
            Box::new(ReelChatError::Forbidden),
            Box::new(ReelChatError::Validation("x".into())),
            Box::new(ReelChatError::Internal("y".into())),
            Box::new(ReelChatError::Crypto("z".into())),
            Box::new(ReelChatError::RecipientKeyMissing),
            Box::new(ReelChatError::ServiceUnavailable("down".into())),
        ];
        for e in &errors {
            let _ = e.to_string();
        }
    }
}
