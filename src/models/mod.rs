// src/models/mod.rs

//! Domain models for the crawler application.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod ad;
mod config;
mod listing;
mod names;
mod summary;

// Re-export all public types
pub use ad::{AdDetail, AdFields, AdImage, AdParam, CleanedAd, RawAd, RawScalar};
pub use config::{
    Config, CrawlerConfig, EnrichmentConfig, FallbackConfig, FreshnessConfig, ListingConfig,
    NormalizeConfig, OutputConfig, RetryConfig,
};
pub use listing::{CategoryLink, ListingEntry, ListingPage, ListingRef};
pub use names::{NameKind, NameTable, Resolution, ResolvedName};
pub use summary::{FailureKind, FailureRecord, RunStatus, RunSummary};
