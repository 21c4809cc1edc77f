//! Wires dedup, admission, persistence and audit into one context object
//! shared by all fetch workers.

pub mod error;
pub mod pipeline;

pub use error::PipelineError;
pub use pipeline::{IngestOutcome, Pipeline, PipelineStats};
