//! Application configuration structures.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::NameKind;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Primary transport and worker pool settings
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Secondary (fallback) transport settings
    #[serde(default)]
    pub fallback: FallbackConfig,

    /// Retry and backoff policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Listing discovery
    #[serde(default)]
    pub listing: ListingConfig,

    /// Name lookup endpoints
    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    /// Field aliases used while cleaning
    #[serde(default)]
    pub normalize: NormalizeConfig,

    /// Raw data reuse
    #[serde(default)]
    pub freshness: FreshnessConfig,

    /// Output toggles
    #[serde(default)]
    pub output: OutputConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.crawler.user_agent.trim().is_empty() {
            return Err(AppError::validation("crawler.user_agent is empty"));
        }
        if self.crawler.timeout_secs == 0 {
            return Err(AppError::validation("crawler.timeout_secs must be > 0"));
        }
        if self.crawler.pool_size == 0 {
            return Err(AppError::validation("crawler.pool_size must be > 0"));
        }
        if self.fallback.timeout_secs == 0 {
            return Err(AppError::validation("fallback.timeout_secs must be > 0"));
        }
        if self.retry.max_retries == 0 {
            return Err(AppError::validation("retry.max_retries must be > 0"));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(AppError::validation(
                "retry.max_delay_ms must be >= retry.base_delay_ms",
            ));
        }
        if self.listing.start_urls.is_empty() && self.listing.root_url.is_none() {
            return Err(AppError::validation(
                "No listing start URLs defined and no listing.root_url to discover them from",
            ));
        }
        let seeds = self.listing.start_urls.iter().chain(&self.listing.root_url);
        for start in seeds.chain([&self.listing.category_base_url]) {
            url::Url::parse(start)
                .map_err(|e| AppError::validation(format!("listing URL {start}: {e}")))?;
        }
        if self.listing.page_cap == 0 {
            return Err(AppError::validation("listing.page_cap must be > 0"));
        }
        if self.listing.concurrency == 0 {
            return Err(AppError::validation("listing.concurrency must be > 0"));
        }
        if self.listing.max_failed_pages == 0 {
            return Err(AppError::validation("listing.max_failed_pages must be > 0"));
        }
        for kind in NameKind::ALL {
            if !self.enrichment.template(kind).contains("{id}") {
                return Err(AppError::validation(format!(
                    "enrichment {kind} URL must contain an {{id}} placeholder"
                )));
            }
        }
        Ok(())
    }

    /// Headers sent with every request.
    pub fn request_headers(&self) -> BTreeMap<String, String> {
        let mut headers = self.crawler.headers.clone();
        headers
            .entry("User-Agent".to_string())
            .or_insert_with(|| self.crawler.user_agent.clone());
        headers
    }
}

/// Primary HTTP transport and worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Extra headers for every request
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Number of ad detail fetches in flight at once
    #[serde(default = "defaults::pool_size")]
    pub pool_size: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            headers: BTreeMap::new(),
            timeout_secs: defaults::timeout(),
            pool_size: defaults::pool_size(),
        }
    }
}

/// Secondary transport: slower, one request at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    #[serde(default = "defaults::fallback_timeout")]
    pub timeout_secs: u64,

    /// Pause after each fallback request
    #[serde(default = "defaults::fallback_delay")]
    pub request_delay_ms: u64,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            timeout_secs: defaults::fallback_timeout(),
            request_delay_ms: defaults::fallback_delay(),
        }
    }
}

/// Retry policy for the primary transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Primary transport attempts per URL before falling back
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    #[serde(default = "defaults::base_delay")]
    pub base_delay_ms: u64,

    #[serde(default = "defaults::max_delay")]
    pub max_delay_ms: u64,

    /// Add up to 20% random delay on top of the backoff
    #[serde(default = "defaults::jitter")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: defaults::max_retries(),
            base_delay_ms: defaults::base_delay(),
            max_delay_ms: defaults::max_delay(),
            jitter: defaults::jitter(),
        }
    }
}

/// Listing discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingConfig {
    /// Category page whose brand/model tree yields the listings to walk.
    /// `None` walks `start_urls` only.
    #[serde(default = "defaults::root_url")]
    pub root_url: Option<String>,

    /// Prefix for the brand links published on the root page
    #[serde(default = "defaults::category_base_url")]
    pub category_base_url: String,

    /// Query added to every discovered listing URL
    #[serde(default = "defaults::sort_query")]
    pub sort_query: String,

    /// Extra listing URLs to walk as given (query strings are kept)
    #[serde(default)]
    pub start_urls: Vec<String>,

    /// Base URL used to resolve relative ad links
    #[serde(default = "defaults::base_url")]
    pub base_url: String,

    /// Query parameter carrying the page number
    #[serde(default = "defaults::page_param")]
    pub page_param: String,

    /// Walking past this many pages without an end marker is fatal
    #[serde(default = "defaults::page_cap")]
    pub page_cap: u32,

    /// Listing pages fetched at once
    #[serde(default = "defaults::listing_concurrency")]
    pub concurrency: usize,

    /// This many failed pages in a row means the listing is unreachable
    #[serde(default = "defaults::max_failed_pages")]
    pub max_failed_pages: u32,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            root_url: defaults::root_url(),
            category_base_url: defaults::category_base_url(),
            sort_query: defaults::sort_query(),
            start_urls: Vec::new(),
            base_url: defaults::base_url(),
            page_param: defaults::page_param(),
            page_cap: defaults::page_cap(),
            concurrency: defaults::listing_concurrency(),
            max_failed_pages: defaults::max_failed_pages(),
        }
    }
}

/// Name lookup URL templates. `{id}` is replaced with the identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(default = "defaults::category_url")]
    pub category_url: String,

    #[serde(default = "defaults::subcategory_url")]
    pub subcategory_url: String,

    #[serde(default = "defaults::model_url")]
    pub model_url: String,
}

impl EnrichmentConfig {
    /// Template for a given identifier kind.
    pub fn template(&self, kind: NameKind) -> &str {
        match kind {
            NameKind::Category => &self.category_url,
            NameKind::Subcategory => &self.subcategory_url,
            NameKind::Model => &self.model_url,
        }
    }

    /// Lookup URL for one identifier.
    pub fn lookup_url(&self, kind: NameKind, id: &str) -> String {
        self.template(kind).replace("{id}", id)
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            category_url: defaults::category_url(),
            subcategory_url: defaults::subcategory_url(),
            model_url: defaults::model_url(),
        }
    }
}

/// Param labels recognised by the normalizer (matched case-insensitively).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizeConfig {
    #[serde(default = "defaults::brand_params")]
    pub brand_params: Vec<String>,

    #[serde(default = "defaults::model_params")]
    pub model_params: Vec<String>,

    #[serde(default = "defaults::year_params")]
    pub year_params: Vec<String>,

    #[serde(default = "defaults::mileage_params")]
    pub mileage_params: Vec<String>,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            brand_params: defaults::brand_params(),
            model_params: defaults::model_params(),
            year_params: defaults::year_params(),
            mileage_params: defaults::mileage_params(),
        }
    }
}

/// When a previously saved raw dataset may be reused instead of refetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreshnessConfig {
    #[serde(default)]
    pub reuse_raw: bool,

    #[serde(default = "defaults::max_age_hours")]
    pub max_age_hours: u64,

    /// Save discovered listing refs so an interrupted run can skip
    /// discovery next time
    #[serde(default = "defaults::enabled")]
    pub checkpoint_refs: bool,
}

impl FreshnessConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_hours * 3600)
    }
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            reuse_raw: false,
            max_age_hours: defaults::max_age_hours(),
            checkpoint_refs: true,
        }
    }
}

/// Which files the storage backend writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "defaults::enabled")]
    pub save_raw: bool,

    #[serde(default = "defaults::enabled")]
    pub save_cleaned: bool,

    #[serde(default = "defaults::enabled")]
    pub zip_raw: bool,

    #[serde(default = "defaults::enabled")]
    pub zip_cleaned: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            save_raw: true,
            save_cleaned: true,
            zip_raw: true,
            zip_cleaned: true,
        }
    }
}

mod defaults {
    // Crawler defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
         (KHTML, like Gecko) Chrome/114.0.0.0 Safari/537.36"
            .into()
    }
    pub fn timeout() -> u64 {
        15
    }
    pub fn pool_size() -> usize {
        8
    }
    pub fn fallback_timeout() -> u64 {
        30
    }
    pub fn fallback_delay() -> u64 {
        250
    }

    // Retry defaults
    pub fn max_retries() -> u32 {
        5
    }
    pub fn base_delay() -> u64 {
        200
    }
    pub fn max_delay() -> u64 {
        5_000
    }
    pub fn jitter() -> bool {
        true
    }

    // Listing defaults
    pub fn root_url() -> Option<String> {
        Some("https://lalafo.kg/kyrgyzstan/avtomobili-s-probegom".into())
    }
    pub fn category_base_url() -> String {
        "https://lalafo.kg/kyrgyzstan".into()
    }
    pub fn sort_query() -> String {
        "sort_by=newest".into()
    }
    pub fn base_url() -> String {
        "https://lalafo.kg".into()
    }
    pub fn page_param() -> String {
        "page".into()
    }
    pub fn page_cap() -> u32 {
        500
    }
    pub fn listing_concurrency() -> usize {
        4
    }
    pub fn max_failed_pages() -> u32 {
        3
    }

    // Enrichment defaults
    pub fn category_url() -> String {
        "https://lalafo.kg/api/search/v3/categories/{id}".into()
    }
    pub fn subcategory_url() -> String {
        "https://lalafo.kg/api/search/v3/categories/{id}".into()
    }
    pub fn model_url() -> String {
        "https://lalafo.kg/api/search/v3/categories/{id}".into()
    }

    // Normalizer defaults
    pub fn brand_params() -> Vec<String> {
        vec!["Марка".into(), "brand".into(), "make".into()]
    }
    pub fn model_params() -> Vec<String> {
        vec!["Модель".into(), "model".into()]
    }
    pub fn year_params() -> Vec<String> {
        vec!["Год выпуска".into(), "Год".into(), "year".into()]
    }
    pub fn mileage_params() -> Vec<String> {
        vec!["Пробег".into(), "mileage".into()]
    }

    // Freshness / output defaults
    pub fn max_age_hours() -> u64 {
        24
    }
    pub fn enabled() -> bool {
        true
    }
}
