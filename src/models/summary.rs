//! Run summary and failure accounting.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a record (or listing page) was lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Transient network errors outlived retries and the fallback
    Network,
    /// Non-retriable HTTP status
    HttpStatus,
    /// Payload had an unexpected shape
    Parse,
    /// Cleaning could not recover id, price or brand
    MandatoryFieldMissing,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Network => "network",
            Self::HttpStatus => "http_status",
            Self::Parse => "parse",
            Self::MandatoryFieldMissing => "mandatory_field_missing",
        };
        f.write_str(label)
    }
}

/// A failed ad or listing page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Ad id, or the page URL for listing failures
    pub id: String,
    pub kind: FailureKind,
    pub reason: String,
}

impl FailureRecord {
    pub fn new(id: impl Into<String>, kind: FailureKind, reason: impl fmt::Display) -> Self {
        Self {
            id: id.into(),
            kind,
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Complete,
    /// Cancelled before every stage finished; completed records were kept
    Partial,
}

/// Summary returned by a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub status: RunStatus,

    /// Raw data came from storage instead of the network
    pub reused_raw: bool,
    /// Listing refs came from the discovery checkpoint
    pub resumed_refs: bool,

    /// Listing URLs walked
    pub seeds: usize,
    pub refs_discovered: usize,
    pub pages_fetched: usize,
    pub pages_failed: usize,

    pub raw_count: usize,
    pub cleaned_count: usize,
    /// Records dropped because a mandatory field was unrecoverable
    pub dropped: usize,

    pub retries: usize,
    pub fallbacks: usize,

    pub lookups: usize,
    pub cache_hits: usize,
    pub unresolved_names: usize,

    /// Successful requests per transport name
    pub requests: BTreeMap<String, u64>,

    pub failures: Vec<FailureRecord>,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            status: RunStatus::Complete,
            reused_raw: false,
            resumed_refs: false,
            seeds: 0,
            refs_discovered: 0,
            pages_fetched: 0,
            pages_failed: 0,
            raw_count: 0,
            cleaned_count: 0,
            dropped: 0,
            retries: 0,
            fallbacks: 0,
            lookups: 0,
            cache_hits: 0,
            unresolved_names: 0,
            requests: BTreeMap::new(),
            failures: Vec::new(),
            started_at,
            finished_at: started_at,
        }
    }

    /// Records that made it into the cleaned dataset.
    pub fn succeeded(&self) -> usize {
        self.cleaned_count
    }

    pub fn is_partial(&self) -> bool {
        self.status == RunStatus::Partial
    }

    /// Failure counts grouped by kind.
    pub fn failure_counts(&self) -> BTreeMap<FailureKind, usize> {
        let mut counts = BTreeMap::new();
        for failure in &self.failures {
            *counts.entry(failure.kind).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_counts_by_kind() {
        let mut summary = RunSummary::new(Utc::now());
        summary.failures = vec![
            FailureRecord::new("1", FailureKind::Network, "timeout"),
            FailureRecord::new("2", FailureKind::Network, "reset"),
            FailureRecord::new("3", FailureKind::Parse, "no script"),
        ];

        let counts = summary.failure_counts();
        assert_eq!(counts[&FailureKind::Network], 2);
        assert_eq!(counts[&FailureKind::Parse], 1);
        assert!(!counts.contains_key(&FailureKind::HttpStatus));
    }
}
