// src/services/resolver.rs

//! Category, subcategory and model name lookups.
//!
//! Each `(kind, id)` is looked up at most once per run. Concurrent callers
//! asking for the same key wait on the same cell instead of issuing their
//! own request.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;

use crate::models::{EnrichmentConfig, NameKind, NameTable, Resolution, ResolvedName};
use crate::parsers::PayloadParser;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::services::retry::ResilientFetcher;

type Key = (NameKind, String);

/// Lookup counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResolverStats {
    /// Lookups that went to the network
    pub lookups: usize,
    /// Requests answered from the cache (or an in-flight lookup)
    pub cache_hits: usize,
    pub unresolved: usize,
}

pub struct EnrichmentResolver {
    fetcher: ResilientFetcher,
    parser: Arc<dyn PayloadParser>,
    urls: EnrichmentConfig,
    progress: Arc<dyn ProgressSink>,
    cells: Mutex<HashMap<Key, Arc<OnceCell<Resolution>>>>,
    lookups: AtomicUsize,
    cache_hits: AtomicUsize,
    unresolved: AtomicUsize,
}

impl EnrichmentResolver {
    /// Lookups go through `fetcher`, fallback included: a key whose primary
    /// attempts run out gets one secondary attempt inside its cell.
    pub fn new(
        fetcher: &ResilientFetcher,
        parser: Arc<dyn PayloadParser>,
        urls: EnrichmentConfig,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            fetcher: fetcher.clone(),
            parser,
            urls,
            progress,
            cells: Mutex::new(HashMap::new()),
            lookups: AtomicUsize::new(0),
            cache_hits: AtomicUsize::new(0),
            unresolved: AtomicUsize::new(0),
        }
    }

    /// Name for an identifier. Failures resolve to `Unresolved` and are
    /// cached like any other answer.
    pub async fn resolve(&self, kind: NameKind, id: &str) -> Resolution {
        let cell = self.cell(kind, id);

        let mut issued = false;
        let resolution = cell
            .get_or_init(|| {
                issued = true;
                self.lookup(kind, id)
            })
            .await
            .clone();

        if !issued {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
        resolution
    }

    /// Resolve every identifier embedded in an ad, concurrently.
    pub async fn resolve_all(
        &self,
        ids: impl IntoIterator<Item = (NameKind, String)>,
    ) -> Vec<(NameKind, Resolution)> {
        let lookups = ids.into_iter().map(|(kind, id)| async move {
            let resolution = self.resolve(kind, &id).await;
            (kind, resolution)
        });
        futures::future::join_all(lookups).await
    }

    /// Current name table.
    pub fn snapshot(&self) -> NameTable {
        self.entries().into_iter().collect()
    }

    /// Cache entries that have an answer.
    pub fn entries(&self) -> Vec<ResolvedName> {
        let cells = self.lock();
        let entries = cells
            .iter()
            .filter_map(|((kind, id), cell)| {
                cell.get().map(|resolution| ResolvedName {
                    kind: *kind,
                    id: id.clone(),
                    resolution: resolution.clone(),
                })
            })
            .collect();
        entries
    }

    pub fn stats(&self) -> ResolverStats {
        ResolverStats {
            lookups: self.lookups.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            unresolved: self.unresolved.load(Ordering::Relaxed),
        }
    }

    fn cell(&self, kind: NameKind, id: &str) -> Arc<OnceCell<Resolution>> {
        let mut cells = self.lock();
        Arc::clone(
            cells
                .entry((kind, id.to_string()))
                .or_insert_with(|| Arc::new(OnceCell::new())),
        )
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Key, Arc<OnceCell<Resolution>>>> {
        self.cells
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn lookup(&self, kind: NameKind, id: &str) -> Resolution {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let url = self.urls.lookup_url(kind, id);

        let resolution = match self.fetcher.fetch(&url).await {
            Ok(body) => match self.parser.parse_name_lookup(&body) {
                Ok(name) => Resolution::Resolved(name),
                Err(err) => {
                    log::warn!("Name lookup for {kind} {id} returned an unexpected body: {err}");
                    Resolution::Unresolved
                }
            },
            Err(err) => {
                log::warn!("Name lookup for {kind} {id} failed: {err}");
                Resolution::Unresolved
            }
        };

        if !resolution.is_resolved() {
            self.unresolved.fetch_add(1, Ordering::Relaxed);
        }
        self.progress.on_event(&ProgressEvent::NameLookup {
            kind,
            id: id.to_string(),
            resolved: resolution.is_resolved(),
        });
        resolution
    }
}
