//! Admission error types.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdmissionError {
    /// No tokens became available before the caller's deadline.
    #[error("admission for '{source_name}' timed out after {}ms", waited.as_millis())]
    Timeout { source_name: String, waited: Duration },

    /// More tokens requested than the bucket can ever hold.
    #[error("'{source_name}' asked for {tokens} tokens but its limit is {max}")]
    ExceedsCapacity { source_name: String, tokens: u32, max: u32 },

    #[error(transparent)]
    InvalidLimit(#[from] harvest_core::CoreError),
}

impl AdmissionError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, AdmissionError::Timeout { .. })
    }
}
