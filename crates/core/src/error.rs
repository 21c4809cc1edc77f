use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid rate limit '{0}': expected <max>/<window_secs> with both > 0")]
    InvalidRateLimit(String),

    #[error("record parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}
