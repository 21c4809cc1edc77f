use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A job posting as produced by a fetch worker.
///
/// Only the fields the pipeline reads are typed. Everything else a scraper
/// picks up (salary text, location, tags, ...) rides along in `attributes`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Stable identifier assigned by the job board, when it has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub source: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub description: String,
    /// Relevance score assigned by the scoring layer.
    #[serde(default)]
    pub score: f64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, String>,
}

impl JobRecord {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Default::default()
        }
    }

    pub fn with_external_id(mut self, id: impl Into<String>) -> Self {
        self.external_id = Some(id.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_content(
        mut self,
        organization: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.organization = organization.into();
        self.title = title.into();
        self.description = description.into();
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Non-blank external identifier, if any.
    pub fn external_id(&self) -> Option<&str> {
        non_blank(self.external_id.as_deref())
    }

    /// Non-blank URL, if any.
    pub fn url(&self) -> Option<&str> {
        non_blank(self.url.as_deref())
    }

    /// Whether at least one identity source is usable for fingerprinting.
    ///
    /// Records failing this still fingerprint (on empty content), they just
    /// collapse together.
    pub fn has_identity(&self) -> bool {
        self.external_id().is_some()
            || self.url().is_some()
            || !(self.organization.trim().is_empty()
                && self.title.trim().is_empty()
                && self.description.trim().is_empty())
    }

    /// Parse one record from a JSON line.
    pub fn from_json_line(line: &str) -> Result<Self, CoreError> {
        Ok(serde_json::from_str(line)?)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
