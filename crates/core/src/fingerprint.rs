//! Deterministic record identity.
//!
//! Three strategies, tried in order: the board's external id, the normalized
//! URL, then a content digest over organization, title and the start of the
//! description. The digest is SHA-256 over a strategy-tagged preimage, so two
//! strategies can never collide on the same input text.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::canonical::normalize_url;
use crate::record::JobRecord;

/// Characters of the description that participate in the content digest.
pub const CONTENT_DESCRIPTION_CHARS: usize = 255;

/// Which identity source produced a fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintStrategy {
    ExternalId,
    Url,
    Content,
}

impl FingerprintStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FingerprintStrategy::ExternalId => "external_id",
            FingerprintStrategy::Url => "url",
            FingerprintStrategy::Content => "content",
        }
    }
}

impl fmt::Display for FingerprintStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 64-character lowercase hex SHA-256 digest identifying a logical job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint a record, discarding the strategy.
    pub fn of(record: &JobRecord) -> Self {
        Self::compute(record).0
    }

    /// Fingerprint a record and report which strategy was used.
    ///
    /// Never fails: a record with no usable identity falls through to the
    /// content strategy over empty strings.
    pub fn compute(record: &JobRecord) -> (Self, FingerprintStrategy) {
        if let Some(id) = record.external_id() {
            let preimage = format!("id:{}:{}", record.source.trim().to_lowercase(), id);
            return (Self::digest(&preimage), FingerprintStrategy::ExternalId);
        }

        if let Some(url) = record.url() {
            let preimage = format!("url:{}", normalize_url(url));
            return (Self::digest(&preimage), FingerprintStrategy::Url);
        }

        let description: String = record
            .description
            .chars()
            .take(CONTENT_DESCRIPTION_CHARS)
            .collect();
        let preimage = format!(
            "content:{}|{}|{}",
            record.organization.trim().to_lowercase(),
            record.title.trim().to_lowercase(),
            description,
        );
        (Self::digest(&preimage), FingerprintStrategy::Content)
    }

    /// Wrap an already-computed digest (e.g. read back from the store).
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn digest(preimage: &str) -> Self {
        let digest = Sha256::digest(preimage.as_bytes());
        Self(format!("{digest:x}"))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
