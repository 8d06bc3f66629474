use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("Not an RSS or Atom feed: {0}")]
    NotAFeed(String),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Access denied ({status}) for {url}")]
    AccessDenied { status: u16, url: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Feed registry error: {0}")]
    Registry(String),
}

impl FeedError {
    pub fn is_retryable(&self) -> bool {
        match self {
            FeedError::Network(e) => !e.is_builder() && !e.is_redirect(),
            FeedError::Status { status, .. } if *status >= 500 || *status == 429 => true,
            _ => false,
        }
    }

    pub fn is_access_denied(&self) -> bool {
        matches!(self, FeedError::AccessDenied { .. })
    }

    /// Classify a non-success HTTP status
    pub fn from_status(status: u16, url: impl Into<String>) -> Self {
        let url = url.into();
        match status {
            401 | 403 => FeedError::AccessDenied { status, url },
            _ => FeedError::Status { status, url },
        }
    }
}

pub type Result<T> = std::result::Result<T, FeedError>;
