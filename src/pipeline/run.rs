// src/pipeline/run.rs

//! End-to-end crawl: find seeds, discover, fetch, enrich, clean, save.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::{
    CleanedAd, Config, FailureKind, FailureRecord, ListingRef, NameTable, RawAd, RunStatus,
    RunSummary,
};
use crate::parsers::{NextDataParser, PayloadParser};
use crate::progress::{Fanout, LogProgress, ProgressCounters, ProgressEvent, ProgressSink, Stage};
use crate::services::{
    DetailFetcher, EnrichmentResolver, ListingFetcher, Normalizer, ResilientFetcher, RetryPolicy,
    SeedFinder,
};
use crate::storage::{AdStorage, RawSnapshot, RefCheckpoint};
use crate::transport::{HttpTransport, Transport};
use crate::utils::log as report;

const STEPS: usize = 5;

/// The crawl pipeline with its collaborators injected.
pub struct Pipeline {
    config: Arc<Config>,
    primary: Arc<dyn Transport>,
    secondary: Arc<dyn Transport>,
    parser: Arc<dyn PayloadParser>,
    storage: Arc<dyn AdStorage>,
    progress: Arc<dyn ProgressSink>,
}

/// Raw ads ready for cleaning, with where they came from.
struct Collected {
    raw: Vec<RawAd>,
    names: NameTable,
    complete: bool,
}

impl Pipeline {
    pub fn new(
        config: Arc<Config>,
        primary: Arc<dyn Transport>,
        secondary: Arc<dyn Transport>,
        parser: Arc<dyn PayloadParser>,
        storage: Arc<dyn AdStorage>,
    ) -> Self {
        Self {
            config,
            primary,
            secondary,
            parser,
            storage,
            progress: Arc::new(LogProgress),
        }
    }

    /// Pipeline over real HTTP transports and the `__NEXT_DATA__` parser.
    pub fn from_config(config: Arc<Config>, storage: Arc<dyn AdStorage>) -> Result<Self> {
        let primary = Arc::new(HttpTransport::primary(&config.crawler)?);
        let secondary = Arc::new(HttpTransport::secondary(&config.crawler, &config.fallback)?);
        let parser = Arc::new(NextDataParser::new(&config.listing.base_url)?);
        Ok(Self::new(config, primary, secondary, parser, storage))
    }

    /// Replace the default logging progress sink.
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Run the whole pipeline.
    ///
    /// Only structural failures (no brands on the root page, no ads
    /// discovered, pagination without an end, a listing whose pages keep
    /// failing) and storage errors abort the run. Cancellation finishes with
    /// whatever was fetched and a `Partial` status.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunSummary> {
        report::header("lalafo crawler");

        let counters = Arc::new(ProgressCounters::new());
        let progress: Arc<dyn ProgressSink> = Arc::new(
            Fanout::new()
                .with(Arc::clone(&self.progress))
                .with(counters.clone()),
        );
        let mut summary = RunSummary::new(Utc::now());

        let reused = if self.config.freshness.reuse_raw {
            report::sub_item("Checking for reusable raw data");
            self.load_raw(&progress, true).await?
        } else {
            None
        };

        let collected = match reused {
            Some(snapshot) => {
                summary.reused_raw = true;
                let names = NameTable::from_ads(&snapshot.ads);
                Collected {
                    raw: snapshot.ads,
                    names,
                    complete: true,
                }
            }
            None => self.fetch(cancel, &progress, &mut summary).await?,
        };

        let fetched_in_full = collected.complete && !summary.reused_raw;
        self.finish(collected, &progress, &mut summary).await?;
        if fetched_in_full && self.config.freshness.checkpoint_refs {
            self.storage.clear_checkpoint().await?;
        }

        let counts = counters.snapshot();
        summary.retries = counts.retries;
        summary.fallbacks = counts.fallbacks;
        self.log_summary(&summary);
        Ok(summary)
    }

    /// Re-clean the stored raw data without touching the network.
    pub async fn clean_only(&self) -> Result<RunSummary> {
        report::header("lalafo crawler (clean only)");

        let progress = Arc::clone(&self.progress);
        let snapshot = self
            .load_raw(&progress, false)
            .await?
            .ok_or_else(|| AppError::config("No raw data stored yet, run a crawl first"))?;

        let mut summary = RunSummary::new(Utc::now());
        summary.reused_raw = true;

        let names = NameTable::from_ads(&snapshot.ads);
        let collected = Collected {
            raw: snapshot.ads,
            names,
            complete: snapshot.complete,
        };
        self.finish(collected, &progress, &mut summary).await?;

        self.log_summary(&summary);
        Ok(summary)
    }

    /// Listing discovery (or its checkpoint) and detail fetching.
    async fn fetch(
        &self,
        cancel: &CancellationToken,
        progress: &Arc<dyn ProgressSink>,
        summary: &mut RunSummary,
    ) -> Result<Collected> {
        let config = &self.config;
        let fetcher = ResilientFetcher::new(
            Arc::clone(&self.primary),
            RetryPolicy::from_config(&config.retry),
            config.request_headers(),
            Arc::clone(progress),
        )
        .with_fallback(Arc::clone(&self.secondary));

        let resolver = Arc::new(EnrichmentResolver::new(
            &fetcher,
            Arc::clone(&self.parser),
            config.enrichment.clone(),
            Arc::clone(progress),
        ));
        let details = DetailFetcher::new(
            fetcher.clone(),
            Arc::clone(&self.parser),
            Arc::clone(&resolver),
            config.crawler.pool_size,
            Arc::clone(progress),
        );

        let (refs, mut cancelled) = match self.resume_refs().await? {
            Some(checkpoint) => {
                summary.resumed_refs = true;
                summary.seeds = checkpoint.seeds;
                (checkpoint.refs, false)
            }
            None => self.discover(&fetcher, cancel, progress, summary).await?,
        };
        summary.refs_discovered = refs.len();

        // Step 3: details and enrichment
        let mut raw = Vec::new();
        if !cancelled {
            report::step(3, STEPS, "Fetching ad details");
            progress.on_event(&ProgressEvent::StageStarted {
                stage: Stage::Details,
                total: Some(refs.len()),
            });
            let fetched = details.fetch_all(refs, cancel).await;
            progress.on_event(&ProgressEvent::StageFinished {
                stage: Stage::Details,
                completed: fetched.ads.len(),
                failed: fetched.failures.len(),
            });

            cancelled = fetched.cancelled;
            summary.failures.extend(fetched.failures);
            raw = fetched.ads;
        }

        let stats = resolver.stats();
        summary.lookups = stats.lookups;
        summary.cache_hits = stats.cache_hits;
        summary.unresolved_names = stats.unresolved;

        summary.requests.insert(
            self.primary.name().to_string(),
            self.primary.request_count(),
        );
        summary.requests.insert(
            self.secondary.name().to_string(),
            self.secondary.request_count(),
        );

        Ok(Collected {
            raw,
            names: resolver.snapshot(),
            complete: !cancelled,
        })
    }

    /// Seed discovery and listing walk. Returns the refs and whether the
    /// run was cancelled meanwhile.
    async fn discover(
        &self,
        fetcher: &ResilientFetcher,
        cancel: &CancellationToken,
        progress: &Arc<dyn ProgressSink>,
        summary: &mut RunSummary,
    ) -> Result<(Vec<ListingRef>, bool)> {
        let config = &self.config;

        // Step 1: seeds
        report::step(1, STEPS, "Finding listing seeds");
        progress.on_event(&ProgressEvent::StageStarted {
            stage: Stage::Seeds,
            total: None,
        });
        let seeds = SeedFinder::new(fetcher, Arc::clone(&self.parser), config.listing.clone())
            .find(cancel)
            .await?;
        summary.seeds = seeds.urls.len();
        progress.on_event(&ProgressEvent::StageFinished {
            stage: Stage::Seeds,
            completed: seeds.urls.len(),
            failed: 0,
        });
        if seeds.cancelled {
            progress.on_event(&ProgressEvent::Cancelled { stage: Stage::Seeds });
            return Ok((Vec::new(), true));
        }

        // Step 2: listing discovery
        report::step(2, STEPS, "Discovering listing pages");
        progress.on_event(&ProgressEvent::StageStarted {
            stage: Stage::Listing,
            total: Some(seeds.urls.len()),
        });
        let listings = ListingFetcher::new(
            fetcher,
            Arc::clone(&self.parser),
            config.listing.clone(),
            Arc::clone(progress),
        );
        let discovery = listings.discover_all(&seeds.urls, cancel).await?;

        summary.pages_fetched = discovery.pages_fetched;
        summary.pages_failed = discovery.pages_failed;
        summary.failures.extend(discovery.failures);
        progress.on_event(&ProgressEvent::StageFinished {
            stage: Stage::Listing,
            completed: discovery.pages_fetched,
            failed: discovery.pages_failed,
        });

        if discovery.cancelled {
            progress.on_event(&ProgressEvent::Cancelled {
                stage: Stage::Listing,
            });
            return Ok((discovery.refs, true));
        }
        if discovery.refs.is_empty() {
            return Err(AppError::structural(
                "listing discovery found no ads; the listing layout may have changed",
            ));
        }

        if config.freshness.checkpoint_refs {
            let checkpoint = RefCheckpoint::new(discovery.refs.clone(), summary.seeds);
            self.storage.save_checkpoint(&checkpoint).await?;
        }
        Ok((discovery.refs, false))
    }

    /// Refs saved by an earlier run that stopped after discovery.
    async fn resume_refs(&self) -> Result<Option<RefCheckpoint>> {
        if !self.config.freshness.checkpoint_refs {
            return Ok(None);
        }
        self.storage
            .load_checkpoint(self.config.freshness.max_age())
            .await
    }

    /// Stored raw snapshot, fresh and complete only when `fresh_only`.
    async fn load_raw(
        &self,
        progress: &Arc<dyn ProgressSink>,
        fresh_only: bool,
    ) -> Result<Option<RawSnapshot>> {
        progress.on_event(&ProgressEvent::StageStarted {
            stage: Stage::LoadRaw,
            total: None,
        });
        let snapshot = if fresh_only {
            self.storage
                .load_raw_if_fresh(self.config.freshness.max_age())
                .await?
        } else {
            self.storage.load_raw().await?
        };
        progress.on_event(&ProgressEvent::StageFinished {
            stage: Stage::LoadRaw,
            completed: snapshot.as_ref().map_or(0, |snapshot| snapshot.count),
            failed: 0,
        });
        Ok(snapshot)
    }

    /// Normalize and save. Shared by every entry point.
    async fn finish(
        &self,
        collected: Collected,
        progress: &Arc<dyn ProgressSink>,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let Collected {
            raw,
            names,
            complete,
        } = collected;
        let raw = unique_by_id(raw);
        summary.raw_count = raw.len();
        if !complete {
            summary.status = RunStatus::Partial;
        }

        // Step 4: normalize
        report::step(4, STEPS, "Normalizing ads");
        progress.on_event(&ProgressEvent::StageStarted {
            stage: Stage::Normalize,
            total: Some(raw.len()),
        });
        let cleaned = self.normalize(&raw, &names, progress, summary);
        progress.on_event(&ProgressEvent::StageFinished {
            stage: Stage::Normalize,
            completed: cleaned.len(),
            failed: summary.dropped,
        });

        // Step 5: save
        report::step(5, STEPS, "Saving datasets");
        if !complete && raw.is_empty() {
            log::warn!("Cancelled before any ad was fetched, keeping stored datasets");
            summary.finished_at = Utc::now();
            return Ok(());
        }
        progress.on_event(&ProgressEvent::StageStarted {
            stage: Stage::Save,
            total: None,
        });
        let raw_to_save = (!summary.reused_raw).then_some(raw.as_slice());
        let saved = self.storage.save(raw_to_save, &cleaned, complete).await?;
        for key in &saved.written {
            report::sub_item(&format!("Wrote {key}"));
        }
        progress.on_event(&ProgressEvent::StageFinished {
            stage: Stage::Save,
            completed: saved.written.len(),
            failed: 0,
        });

        summary.finished_at = Utc::now();
        Ok(())
    }

    fn normalize(
        &self,
        raw: &[RawAd],
        names: &NameTable,
        progress: &Arc<dyn ProgressSink>,
        summary: &mut RunSummary,
    ) -> Vec<CleanedAd> {
        let normalizer = Normalizer::new(self.config.normalize.clone());
        let mut cleaned = Vec::with_capacity(raw.len());

        for ad in raw {
            match normalizer.normalize(ad, names) {
                Ok(ad) => cleaned.push(ad),
                Err(missing) => {
                    summary.dropped += 1;
                    let failure =
                        FailureRecord::new(&ad.id, FailureKind::MandatoryFieldMissing, missing);
                    progress.on_event(&ProgressEvent::RecordFailed {
                        id: failure.id.clone(),
                        kind: failure.kind,
                        reason: failure.reason.clone(),
                    });
                    summary.failures.push(failure);
                }
            }
        }

        summary.cleaned_count = cleaned.len();
        cleaned
    }

    fn log_summary(&self, summary: &RunSummary) {
        let elapsed = summary.finished_at - summary.started_at;
        let mut items = vec![
            ("Status", format!("{:?}", summary.status)),
            ("Reused raw data", summary.reused_raw.to_string()),
            ("Resumed refs", summary.resumed_refs.to_string()),
            ("Listing seeds", summary.seeds.to_string()),
            ("Refs discovered", summary.refs_discovered.to_string()),
            (
                "Listing pages",
                format!(
                    "{} fetched, {} failed",
                    summary.pages_fetched, summary.pages_failed
                ),
            ),
            ("Raw ads", summary.raw_count.to_string()),
            ("Cleaned ads", summary.cleaned_count.to_string()),
            ("Dropped", summary.dropped.to_string()),
            ("Retries", summary.retries.to_string()),
            ("Fallbacks", summary.fallbacks.to_string()),
            (
                "Name lookups",
                format!(
                    "{} issued, {} cached, {} unresolved",
                    summary.lookups, summary.cache_hits, summary.unresolved_names
                ),
            ),
        ];
        for (transport, count) in &summary.requests {
            items.push(("Requests", format!("{transport}: {count}")));
        }
        for (kind, count) in summary.failure_counts() {
            items.push(("Failures", format!("{kind}: {count}")));
        }
        items.push(("Duration", format!("{}s", elapsed.num_seconds())));

        report::summary("Run complete", &items);
    }
}

/// Keep the first ad for each id.
fn unique_by_id(raw: Vec<RawAd>) -> Vec<RawAd> {
    let mut seen = HashSet::new();
    let mut unique: Vec<RawAd> = raw
        .into_iter()
        .filter(|ad| seen.insert(ad.id.clone()))
        .collect();
    unique.sort_by(|a, b| a.id.cmp(&b.id));
    unique
}
