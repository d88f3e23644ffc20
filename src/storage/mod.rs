//! Storage abstractions for the raw and cleaned datasets.
//!
//! ## Directory Structure
//!
//! ```text
//! storage/
//! ├── config.toml           # Crawler configuration
//! ├── raw_data.json         # Raw ads as fetched (with enrichment)
//! ├── cleaned_data.json     # Cleaned canonical ads
//! ├── listing_refs.json     # Refs from the last finished discovery, until a run completes
//! ├── raw.zip               # Optional deflate archive of raw_data.json
//! └── cleaned.zip           # Optional deflate archive of cleaned_data.json
//! ```

pub mod local;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{CleanedAd, ListingRef, RawAd};

// Re-export for convenience
pub use local::LocalStorage;

/// Contents of raw_data.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSnapshot {
    /// When the snapshot was written
    pub updated_at: DateTime<Utc>,
    /// False when the run that wrote it was cancelled
    pub complete: bool,
    pub count: usize,
    pub ads: Vec<RawAd>,
}

impl RawSnapshot {
    pub fn new(ads: Vec<RawAd>, complete: bool) -> Self {
        Self {
            updated_at: Utc::now(),
            complete,
            count: ads.len(),
            ads,
        }
    }

    /// Whether this snapshot can stand in for a fresh crawl.
    pub fn is_fresh(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.updated_at);
        self.complete && age.to_std().map(|age| age <= max_age).unwrap_or(true)
    }
}

/// Contents of cleaned_data.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanedSnapshot {
    pub updated_at: DateTime<Utc>,
    pub count: usize,
    pub ads: Vec<CleanedAd>,
}

impl CleanedSnapshot {
    pub fn new(ads: Vec<CleanedAd>) -> Self {
        Self {
            updated_at: Utc::now(),
            count: ads.len(),
            ads,
        }
    }
}

/// Refs from a finished listing discovery, kept so an interrupted run can
/// go straight to the detail stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefCheckpoint {
    pub updated_at: DateTime<Utc>,
    /// Listing URLs the refs were discovered from
    pub seeds: usize,
    pub count: usize,
    pub refs: Vec<ListingRef>,
}

impl RefCheckpoint {
    pub fn new(refs: Vec<ListingRef>, seeds: usize) -> Self {
        Self {
            updated_at: Utc::now(),
            seeds,
            count: refs.len(),
            refs,
        }
    }

    pub fn is_fresh(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.updated_at);
        age.to_std().map(|age| age <= max_age).unwrap_or(true)
    }
}

/// What a save call wrote.
#[derive(Debug, Clone, Default)]
pub struct SaveReport {
    /// Storage keys written, in order
    pub written: Vec<String>,
}

/// Trait for dataset storage backends.
#[async_trait]
pub trait AdStorage: Send + Sync {
    /// Raw snapshot, if one exists, was written by a complete run, and is
    /// younger than `max_age`.
    async fn load_raw_if_fresh(&self, max_age: Duration) -> Result<Option<RawSnapshot>>;

    /// Raw snapshot regardless of age or completeness.
    async fn load_raw(&self) -> Result<Option<RawSnapshot>>;

    /// Cleaned snapshot, if one exists.
    async fn load_cleaned(&self) -> Result<Option<CleanedSnapshot>>;

    /// Persist both datasets. `raw` is `None` when the raw data was reused
    /// and must not be rewritten.
    async fn save(
        &self,
        raw: Option<&[RawAd]>,
        cleaned: &[CleanedAd],
        complete: bool,
    ) -> Result<SaveReport>;

    /// Discovery checkpoint younger than `max_age`, if any.
    async fn load_checkpoint(&self, max_age: Duration) -> Result<Option<RefCheckpoint>>;

    async fn save_checkpoint(&self, checkpoint: &RefCheckpoint) -> Result<()>;

    /// Drop the checkpoint once a run has completed. Missing is fine.
    async fn clear_checkpoint(&self) -> Result<()>;
}
