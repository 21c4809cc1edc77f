//! Per-source admission control for fetch workers.
//!
//! Every fetch worker asks [`AdmissionControl`] before calling a job board.
//! Each source owns a sliding-window [`RateBucket`]; sources without an
//! explicit limit share the configured default.

pub mod bucket;
pub mod control;
pub mod error;

pub use bucket::RateBucket;
pub use control::{AdmissionControl, BucketStatus};
pub use error::AdmissionError;
