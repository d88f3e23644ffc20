//! Service layer for the crawler application.
//!
//! This module contains the business logic for:
//! - Seed discovery from the category tree (`SeedFinder`)
//! - Listing discovery (`ListingFetcher`)
//! - Ad detail fetching (`DetailFetcher`)
//! - Name lookups (`EnrichmentResolver`)
//! - Cleaning (`Normalizer`)
//! - Retry and fallback around every request (`ResilientFetcher`)

mod details;
mod listings;
mod normalizer;
mod resolver;
mod retry;
mod seeds;

pub use details::{DetailFetcher, DetailReport};
pub use listings::{Discovery, ListingFetcher};
pub use normalizer::{MissingField, Normalizer, parse_mileage_km, parse_price, parse_year};
pub use resolver::{EnrichmentResolver, ResolverStats};
pub use retry::{
    FetchFailure, FetchOutcome, FetchState, ResilientFetcher, RetryPolicy, is_retriable_status,
};
pub use seeds::{SeedFinder, Seeds};
