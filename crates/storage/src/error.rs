use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("no connection slot free after {0}ms")]
    PoolTimeout(u64),

    #[error("connection pool is closed")]
    PoolClosed,

    #[error("flush task failed: {0}")]
    Join(String),

    #[error("{0}")]
    Other(String),
}
