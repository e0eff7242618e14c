//! Identifier types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable run identifier: `<category-slug>-<YYYYMMDD>`.
///
/// Deriving the id from the category and the creation day makes run
/// creation idempotent per category and day.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn derive(category: &str, created_at: DateTime<Utc>) -> Self {
        Self(format!(
            "{}-{}",
            slugify(category),
            created_at.format("%Y%m%d")
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is safe to use as a single path component
    pub fn is_path_safe(&self) -> bool {
        !self.0.is_empty()
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn slugify(category: &str) -> String {
    let mut slug = String::with_capacity(category.len());
    for c in category.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        "run".to_string()
    } else {
        slug
    }
}

/// Who is executing: the host and the worker process on it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerIdentity {
    pub host_id: String,
    pub worker_id: String,
}

impl WorkerIdentity {
    pub fn new(host_id: impl Into<String>, worker_id: impl Into<String>) -> Self {
        Self {
            host_id: host_id.into(),
            worker_id: worker_id.into(),
        }
    }

    /// Lease owner id: unique per worker across hosts
    pub fn owner_id(&self) -> String {
        format!("{}/{}", self.host_id, self.worker_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn run_id_from_category_and_day() {
        let at = Utc.with_ymd_and_hms(2026, 3, 14, 23, 59, 0).unwrap();
        assert_eq!(RunId::derive("audio", at).as_str(), "audio-20260314");
        assert_eq!(
            RunId::derive("  True Crime / Shorts ", at).as_str(),
            "true-crime-shorts-20260314"
        );
        assert_eq!(RunId::derive("!!!", at).as_str(), "run-20260314");
    }

    #[test]
    fn same_day_same_id() {
        let morning = Utc.with_ymd_and_hms(2026, 3, 14, 1, 0, 0).unwrap();
        let evening = Utc.with_ymd_and_hms(2026, 3, 14, 22, 0, 0).unwrap();
        assert_eq!(RunId::derive("audio", morning), RunId::derive("audio", evening));
    }

    #[test]
    fn path_safety() {
        assert!(RunId::new("audio-20260314").is_path_safe());
        assert!(!RunId::new("../etc").is_path_safe());
        assert!(!RunId::new("").is_path_safe());
    }
}
