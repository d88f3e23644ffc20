// src/services/listings.rs

//! Listing discovery.
//!
//! Walks the paginated listing of one or more start URLs and collects the
//! ad references on every page until the site signals the end.

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::{FailureKind, FailureRecord, ListingConfig, ListingPage, ListingRef};
use crate::parsers::PayloadParser;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::services::retry::ResilientFetcher;
use crate::utils::page_url;

/// Outcome of walking one or more listings.
#[derive(Debug, Default)]
pub struct Discovery {
    /// Unique refs in discovery order
    pub refs: Vec<ListingRef>,
    pub pages_fetched: usize,
    pub pages_failed: usize,
    pub failures: Vec<FailureRecord>,
    pub cancelled: bool,
}

impl Discovery {
    /// Fold another discovery in, keeping the first ref seen for each id.
    fn merge(&mut self, other: Discovery, seen: &mut HashSet<String>) {
        for listing_ref in other.refs {
            if seen.insert(listing_ref.id.clone()) {
                self.refs.push(listing_ref);
            }
        }
        self.pages_fetched += other.pages_fetched;
        self.pages_failed += other.pages_failed;
        self.failures.extend(other.failures);
        self.cancelled |= other.cancelled;
    }
}

pub struct ListingFetcher {
    fetcher: ResilientFetcher,
    parser: Arc<dyn PayloadParser>,
    config: ListingConfig,
    progress: Arc<dyn ProgressSink>,
}

impl ListingFetcher {
    /// Listing pages go through the primary transport only.
    pub fn new(
        fetcher: &ResilientFetcher,
        parser: Arc<dyn PayloadParser>,
        config: ListingConfig,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            fetcher: fetcher.without_fallback(),
            parser,
            config,
            progress,
        }
    }

    /// Walk every start URL and union the refs.
    pub async fn discover_all(
        &self,
        start_urls: &[String],
        cancel: &CancellationToken,
    ) -> Result<Discovery> {
        let mut all = Discovery::default();
        let mut seen = HashSet::new();

        for start_url in start_urls {
            let discovery = self.discover(start_url, cancel).await?;
            log::info!(
                "Listing {}: {} refs from {} pages",
                start_url,
                discovery.refs.len(),
                discovery.pages_fetched
            );
            all.merge(discovery, &mut seen);
            if all.cancelled {
                break;
            }
        }

        Ok(all)
    }

    /// Walk one listing in waves of `concurrency` pages.
    ///
    /// The first page in a wave that is empty, or whose page count says it
    /// is the last one, ends the walk; refs from pages after it are
    /// discarded. A failed page is recorded and skipped. Walking past
    /// `page_cap` without seeing the end, or `max_failed_pages` failed pages
    /// in a row, is a structural failure.
    pub async fn discover(&self, start_url: &str, cancel: &CancellationToken) -> Result<Discovery> {
        let concurrency = self.config.concurrency.max(1);
        let cap = self.config.page_cap;
        let max_failed = self.config.max_failed_pages.max(1);

        let mut discovery = Discovery::default();
        let mut seen = HashSet::new();
        let mut next_page = 1u32;
        let mut failed_in_row = 0u32;

        loop {
            if next_page > cap {
                return Err(AppError::structural(format!(
                    "listing {start_url} did not end within {cap} pages"
                )));
            }

            let wave_end = next_page
                .saturating_add(concurrency as u32 - 1)
                .min(cap);
            let fetch_wave = stream::iter(next_page..=wave_end)
                .map(|page| async move { (page, self.fetch_page(start_url, page).await) })
                .buffered(concurrency)
                .collect::<Vec<_>>();

            let wave = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    discovery.cancelled = true;
                    break;
                }
                wave = fetch_wave => wave,
            };

            let mut end = None;
            for (page, result) in wave {
                match result {
                    Ok(listing) => {
                        failed_in_row = 0;
                        discovery.pages_fetched += 1;
                        self.progress.on_event(&ProgressEvent::PageFetched {
                            page,
                            found: listing.entries.len(),
                        });

                        let last = listing.is_last(page);
                        for entry in listing.entries {
                            if seen.insert(entry.id.clone()) {
                                discovery.refs.push(entry.into_ref(page));
                            }
                        }
                        if last {
                            end = Some(page);
                            break;
                        }
                    }
                    Err(failure) => {
                        discovery.pages_failed += 1;
                        self.progress.on_event(&ProgressEvent::PageFailed {
                            url: failure.id.clone(),
                            page,
                            reason: failure.reason.clone(),
                        });
                        discovery.failures.push(failure);

                        failed_in_row += 1;
                        if failed_in_row >= max_failed {
                            return Err(AppError::structural(format!(
                                "listing {start_url}: {failed_in_row} pages in a row failed, \
                                 last at page {page}"
                            )));
                        }
                    }
                }
            }

            if let Some(page) = end {
                log::debug!("Listing {start_url} ends at page {page}");
                break;
            }
            next_page = wave_end + 1;
        }

        Ok(discovery)
    }

    async fn fetch_page(
        &self,
        start_url: &str,
        page: u32,
    ) -> std::result::Result<ListingPage, FailureRecord> {
        let url = page_url(start_url, &self.config.page_param, page)
            .map_err(|e| FailureRecord::new(start_url, FailureKind::Parse, e))?;

        let body = self
            .fetcher
            .fetch(&url)
            .await
            .map_err(|e| FailureRecord::new(&url, e.kind(), e))?;

        self.parser
            .parse_listing_page(&body)
            .map_err(|e| FailureRecord::new(&url, FailureKind::Parse, e))
    }
}
