use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("request aborted")]
    Abort,
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },
    #[error("invalid endpoint url: {0}")]
    Url(#[from] url::ParseError),
    #[error("local storage error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl FeedError {
    /// Caller-initiated cancellation. Never reported as a load failure.
    pub fn is_abort(&self) -> bool {
        matches!(self, FeedError::Abort)
    }

    /// Failures worth retrying at the transport level.
    pub fn is_transient(&self) -> bool {
        match self {
            FeedError::Network(err) => err.is_timeout() || err.is_connect(),
            FeedError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_is_not_transient() {
        assert!(FeedError::Abort.is_abort());
        assert!(!FeedError::Abort.is_transient());
    }

    #[test]
    fn server_errors_are_transient_client_errors_are_not() {
        let server = FeedError::Status { status: 503, url: "http://e/feed".into() };
        let client = FeedError::Status { status: 404, url: "http://e/feed".into() };
        assert!(server.is_transient());
        assert!(!client.is_transient());
        assert!(!client.is_abort());
    }
}
