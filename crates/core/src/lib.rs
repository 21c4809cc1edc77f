pub mod canonical;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod record;

pub use canonical::normalize_url;
pub use config::{load_dotenv, PipelineConfig, RateLimit};
pub use error::*;
pub use fingerprint::{Fingerprint, FingerprintStrategy};
pub use record::JobRecord;
