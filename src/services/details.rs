// src/services/details.rs

//! Ad detail fetching.
//!
//! Every ref is fetched by exactly one future; a bounded pool keeps at most
//! `pool_size` of them in flight.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::models::{FailureKind, FailureRecord, ListingRef, NameKind, RawAd};
use crate::parsers::PayloadParser;
use crate::progress::{ProgressEvent, ProgressSink, Stage};
use crate::services::resolver::EnrichmentResolver;
use crate::services::retry::ResilientFetcher;

/// What a detail batch produced.
#[derive(Debug, Default)]
pub struct DetailReport {
    pub ads: Vec<RawAd>,
    pub failures: Vec<FailureRecord>,
    /// Stopped before every ref was processed
    pub cancelled: bool,
}

impl DetailReport {
    /// Refs that reached a terminal state.
    pub fn processed(&self) -> usize {
        self.ads.len() + self.failures.len()
    }
}

pub struct DetailFetcher {
    fetcher: ResilientFetcher,
    parser: Arc<dyn PayloadParser>,
    resolver: Arc<EnrichmentResolver>,
    pool_size: usize,
    progress: Arc<dyn ProgressSink>,
}

impl DetailFetcher {
    pub fn new(
        fetcher: ResilientFetcher,
        parser: Arc<dyn PayloadParser>,
        resolver: Arc<EnrichmentResolver>,
        pool_size: usize,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            fetcher,
            parser,
            resolver,
            pool_size: pool_size.max(1),
            progress,
        }
    }

    /// Fetch, parse and enrich every ref. Per-ref failures are collected,
    /// never raised.
    pub async fn fetch_all(&self, refs: Vec<ListingRef>, cancel: &CancellationToken) -> DetailReport {
        let total = refs.len();
        let mut report = DetailReport::default();

        let mut results = stream::iter(refs)
            .map(|listing_ref| self.fetch_one(listing_ref))
            .buffer_unordered(self.pool_size);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    report.cancelled = true;
                    self.progress.on_event(&ProgressEvent::Cancelled { stage: Stage::Details });
                    break;
                }
                next = results.next() => match next {
                    Some(Ok(ad)) => {
                        let id = ad.id.clone();
                        report.ads.push(ad);
                        self.progress.on_event(&ProgressEvent::AdFetched {
                            id,
                            done: report.processed(),
                            total,
                        });
                    }
                    Some(Err(failure)) => {
                        self.progress.on_event(&ProgressEvent::RecordFailed {
                            id: failure.id.clone(),
                            kind: failure.kind,
                            reason: failure.reason.clone(),
                        });
                        report.failures.push(failure);
                    }
                    None => break,
                },
            }
        }

        report
    }

    async fn fetch_one(&self, listing_ref: ListingRef) -> Result<RawAd, FailureRecord> {
        let body = self
            .fetcher
            .fetch(&listing_ref.url)
            .await
            .map_err(|e| FailureRecord::new(&listing_ref.id, e.kind(), e))?;

        let detail = self
            .parser
            .parse_ad_detail(&body)
            .map_err(|e| FailureRecord::new(&listing_ref.id, FailureKind::Parse, e))?;

        if let Some(payload_id) = detail.id.as_deref().filter(|id| *id != listing_ref.id) {
            log::debug!(
                "Ad {} reports id {} in its payload",
                listing_ref.id,
                payload_id
            );
        }

        let mut ad = RawAd {
            id: listing_ref.id,
            url: listing_ref.url,
            category_id: detail.category_id,
            subcategory_id: detail.subcategory_id,
            model_id: detail.model_id,
            fields: detail.fields,
            enrichment: BTreeMap::new(),
            fetched_at: Utc::now(),
        };

        let ids: Vec<(NameKind, String)> = NameKind::ALL
            .into_iter()
            .filter_map(|kind| ad.id_of(kind).map(|id| (kind, id.to_string())))
            .collect();
        ad.enrichment = self.resolver.resolve_all(ids).await.into_iter().collect();

        Ok(ad)
    }
}
