// src/services/seeds.rs

//! Listing seeds from the category tree.
//!
//! The root category page lists brands. Each brand page lists its models,
//! and every model listing becomes a seed. A brand without models, or whose
//! page cannot be read, is walked through its own listing instead.

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::{CategoryLink, ListingConfig};
use crate::parsers::PayloadParser;
use crate::services::retry::ResilientFetcher;
use crate::utils::{merge_query, resolve_url};

/// Listing URLs to walk.
#[derive(Debug, Default)]
pub struct Seeds {
    /// Unique listing URLs, configured ones first
    pub urls: Vec<String>,
    /// Brands found on the root page
    pub brands: usize,
    /// Brands walked as a whole because their model list was unavailable
    pub brands_without_models: usize,
    pub cancelled: bool,
}

impl Seeds {
    fn push(&mut self, url: String, seen: &mut HashSet<String>) {
        if seen.insert(url.clone()) {
            self.urls.push(url);
        }
    }
}

pub struct SeedFinder {
    fetcher: ResilientFetcher,
    parser: Arc<dyn PayloadParser>,
    config: ListingConfig,
}

impl SeedFinder {
    /// Category pages go through `fetcher`, fallback included.
    pub fn new(
        fetcher: &ResilientFetcher,
        parser: Arc<dyn PayloadParser>,
        config: ListingConfig,
    ) -> Self {
        Self {
            fetcher: fetcher.clone(),
            parser,
            config,
        }
    }

    /// Configured start URLs, then one seed per model (or brand) under the
    /// root category. A root page that cannot be fetched or read, or that
    /// lists no brands, is a structural failure.
    pub async fn find(&self, cancel: &CancellationToken) -> Result<Seeds> {
        let mut seeds = Seeds::default();
        let mut seen = HashSet::new();
        for url in &self.config.start_urls {
            seeds.push(url.clone(), &mut seen);
        }

        let Some(root) = self.config.root_url.as_deref() else {
            return Ok(seeds);
        };
        if cancel.is_cancelled() {
            seeds.cancelled = true;
            return Ok(seeds);
        }

        let body = self
            .fetcher
            .fetch(root)
            .await
            .map_err(|e| AppError::structural(format!("root category page {root}: {e}")))?;
        let brands = self
            .parser
            .parse_category_links(&body)
            .map_err(|e| AppError::structural(format!("root category page {root}: {e}")))?;
        if brands.is_empty() {
            return Err(AppError::structural(format!(
                "root category page {root} lists no brands"
            )));
        }
        seeds.brands = brands.len();
        log::info!("Found {} brands under {}", brands.len(), root);

        let lookups = stream::iter(brands)
            .map(|brand| async move {
                let models = self.models_of(&brand).await;
                (brand, models)
            })
            .buffered(self.config.concurrency.max(1))
            .collect::<Vec<_>>();

        let resolved = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                seeds.cancelled = true;
                return Ok(seeds);
            }
            resolved = lookups => resolved,
        };

        let category_base = url::Url::parse(&self.config.category_base_url)?;
        for (brand, models) in resolved {
            if models.is_empty() {
                seeds.brands_without_models += 1;
                let url = self.brand_url(&brand);
                seeds.push(self.sorted(&url), &mut seen);
                continue;
            }
            for model in &models {
                let url = resolve_url(&category_base, &model.href);
                seeds.push(self.sorted(&url), &mut seen);
            }
        }

        Ok(seeds)
    }

    /// Models of one brand. Failures are logged and give no models.
    async fn models_of(&self, brand: &CategoryLink) -> Vec<CategoryLink> {
        let url = self.brand_url(brand);
        let body = match self.fetcher.fetch(&url).await {
            Ok(body) => body,
            Err(e) => {
                log::warn!("Brand page for {} ({url}) failed: {e}", brand.name);
                return Vec::new();
            }
        };

        match self.parser.parse_model_links(&body) {
            Ok(models) => {
                log::debug!("{}: {} models", brand.name, models.len());
                models
            }
            Err(e) => {
                log::warn!("Brand page for {} ({url}) unreadable: {e}", brand.name);
                Vec::new()
            }
        }
    }

    /// Brand links are published relative to the category base.
    fn brand_url(&self, brand: &CategoryLink) -> String {
        if url::Url::parse(&brand.href).is_ok() {
            return brand.href.clone();
        }
        format!(
            "{}/{}",
            self.config.category_base_url.trim_end_matches('/'),
            brand.href.trim_start_matches('/')
        )
    }

    /// Seed URL with the configured sort query. Unparseable URLs are kept
    /// as they are.
    fn sorted(&self, url: &str) -> String {
        merge_query(url, &self.config.sort_query).unwrap_or_else(|e| {
            log::warn!("Keeping seed {url} without sort query: {e}");
            url.to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RetryConfig;
    use crate::parsers::NextDataParser;
    use crate::progress::NoProgress;
    use crate::services::retry::RetryPolicy;
    use crate::testing::{ScriptedTransport, next_data_html};
    use crate::transport::Headers;
    use serde_json::json;

    const ROOT: &str = "https://x.test/kg/cars";

    fn root_page() -> String {
        next_data_html(&json!({
            "props": {"initialState": {"listing": {"selectedCategory": {
                "ads_count": 10,
                "children": [
                    {"id": 1, "name": "Toyota", "url": "/cars/toyota"},
                    {"id": 2, "name": "Lada", "url": "/cars/lada"}
                ]
            }}}}
        }))
    }

    fn brand_page(models: &[(&str, &str)]) -> String {
        let items: Vec<_> = models
            .iter()
            .map(|(name, url)| json!({"name": name, "url": url}))
            .collect();
        next_data_html(&json!({
            "props": {"initialState": {"listing": {"listingLinkSection": {"items": items}}}}
        }))
    }

    fn finder(primary: Arc<ScriptedTransport>, secondary: Arc<ScriptedTransport>) -> SeedFinder {
        let policy = RetryPolicy::from_config(&RetryConfig {
            max_retries: 2,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter: false,
        });
        let fetcher = ResilientFetcher::new(primary, policy, Headers::new(), Arc::new(NoProgress))
            .with_fallback(secondary);
        let config = ListingConfig {
            root_url: Some(ROOT.into()),
            category_base_url: "https://x.test/kg".into(),
            start_urls: vec!["https://x.test/kg/cars/extra".into()],
            base_url: "https://x.test".into(),
            ..ListingConfig::default()
        };
        SeedFinder::new(
            &fetcher,
            Arc::new(NextDataParser::new("https://x.test").unwrap()),
            config,
        )
    }

    #[tokio::test]
    async fn test_models_become_seeds() {
        let primary = Arc::new(ScriptedTransport::new("primary"));
        primary.respond(ROOT, root_page());
        primary.respond(
            "https://x.test/kg/cars/toyota",
            brand_page(&[
                ("Camry", "/kg/cars/toyota/camry"),
                ("Corolla", "/kg/cars/toyota/corolla"),
            ]),
        );
        primary.respond("https://x.test/kg/cars/lada", brand_page(&[]));

        let seeds = finder(primary, Arc::new(ScriptedTransport::new("secondary")))
            .find(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            seeds.urls,
            vec![
                "https://x.test/kg/cars/extra",
                "https://x.test/kg/cars/toyota/camry?sort_by=newest",
                "https://x.test/kg/cars/toyota/corolla?sort_by=newest",
                "https://x.test/kg/cars/lada?sort_by=newest",
            ]
        );
        assert_eq!(seeds.brands, 2);
        assert_eq!(seeds.brands_without_models, 1);
    }

    #[tokio::test]
    async fn test_brand_page_recovered_by_secondary() {
        let primary = Arc::new(ScriptedTransport::new("primary"));
        primary.respond(ROOT, root_page());
        primary.fail_first("https://x.test/kg/cars/toyota", 5);
        primary.respond("https://x.test/kg/cars/lada", brand_page(&[]));
        let secondary = Arc::new(ScriptedTransport::new("secondary"));
        secondary.respond(
            "https://x.test/kg/cars/toyota",
            brand_page(&[("Camry", "/kg/cars/toyota/camry")]),
        );

        let seeds = finder(primary, secondary.clone())
            .find(&CancellationToken::new())
            .await
            .unwrap();

        assert!(
            seeds
                .urls
                .contains(&"https://x.test/kg/cars/toyota/camry?sort_by=newest".to_string())
        );
        assert_eq!(secondary.calls("https://x.test/kg/cars/toyota"), 1);
    }

    #[tokio::test]
    async fn test_root_without_brands_is_structural() {
        let primary = Arc::new(ScriptedTransport::new("primary"));
        primary.respond(
            ROOT,
            next_data_html(&json!({
                "props": {"initialState": {"listing": {"selectedCategory": {"children": []}}}}
            })),
        );

        let err = finder(primary, Arc::new(ScriptedTransport::new("secondary")))
            .find(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_structural());
    }
}
