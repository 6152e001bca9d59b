/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, LinkScoutError>;

/// Any failure fetching an external page: network, timeout or non-2xx.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("timeout fetching: {url}")]
    Timeout { url: String },

    #[error("HTTP {status} fetching: {url}")]
    Status { url: String, status: u16 },

    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },

    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },
}

impl FetchError {
    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout {
                url: url.to_string(),
            };
        }
        if let Some(status) = err.status() {
            return Self::Status {
                url: url.to_string(),
                status: status.as_u16(),
            };
        }
        Self::Network {
            url: url.to_string(),
            message: err.to_string(),
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Self::Timeout { url }
            | Self::Status { url, .. }
            | Self::Network { url, .. }
            | Self::InvalidUrl { url } => url,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum OracleError {
    #[error("oracle request failed: {0}")]
    Request(String),

    /// No decodable structured region, even after salvage.
    #[error("malformed oracle response: {excerpt}")]
    Malformed { excerpt: String },
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored row that does not decode into a domain value.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// Backend unreachable or refused the operation.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum LinkScoutError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(String),
}
