// src/progress.rs

//! Progress events emitted by the pipeline.
//!
//! Sinks are fire-and-forget: `on_event` must not block, and the pipeline
//! never waits on a sink.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::models::{FailureKind, NameKind};

/// Pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    LoadRaw,
    Seeds,
    Listing,
    Details,
    Normalize,
    Save,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::LoadRaw => "load raw",
            Self::Seeds => "seed discovery",
            Self::Listing => "listing discovery",
            Self::Details => "ad details",
            Self::Normalize => "normalize",
            Self::Save => "save",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    StageStarted {
        stage: Stage,
        total: Option<usize>,
    },
    StageFinished {
        stage: Stage,
        completed: usize,
        failed: usize,
    },
    PageFetched {
        page: u32,
        found: usize,
    },
    PageFailed {
        url: String,
        page: u32,
        reason: String,
    },
    AdFetched {
        id: String,
        done: usize,
        total: usize,
    },
    Retry {
        url: String,
        attempt: u32,
        delay: Duration,
        reason: String,
    },
    Fallback {
        url: String,
    },
    NameLookup {
        kind: NameKind,
        id: String,
        resolved: bool,
    },
    RecordFailed {
        id: String,
        kind: FailureKind,
        reason: String,
    },
    Cancelled {
        stage: Stage,
    },
}

/// Receiver of progress events.
pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: &ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_event(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Discards all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_event(&self, _event: &ProgressEvent) {}
}

/// Writes events through the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn on_event(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::StageStarted { stage, total } => match total {
                Some(total) => log::info!("Stage {stage} started ({total} items)"),
                None => log::info!("Stage {stage} started"),
            },
            ProgressEvent::StageFinished {
                stage,
                completed,
                failed,
            } => log::info!("Stage {stage} finished: {completed} ok, {failed} failed"),
            ProgressEvent::PageFetched { page, found } => {
                log::debug!("Listing page {page}: {found} ads")
            }
            ProgressEvent::PageFailed { url, page, reason } => {
                log::warn!("Skipping listing page {page} ({url}): {reason}")
            }
            ProgressEvent::AdFetched { done, total, .. } => {
                if *done == *total || *done % 50 == 0 {
                    log::info!("Fetched {done}/{total} ads");
                }
            }
            ProgressEvent::Retry {
                url,
                attempt,
                delay,
                reason,
            } => log::warn!(
                "Attempt {attempt} for {url} failed ({reason}), retrying in {}ms",
                delay.as_millis()
            ),
            ProgressEvent::Fallback { url } => {
                log::warn!("Primary transport exhausted for {url}, trying fallback")
            }
            ProgressEvent::NameLookup { kind, id, resolved } => {
                if *resolved {
                    log::debug!("Resolved {kind} {id}");
                } else {
                    log::warn!("Could not resolve {kind} {id}");
                }
            }
            ProgressEvent::RecordFailed { id, kind, reason } => {
                log::warn!("Ad {id} failed ({kind}): {reason}")
            }
            ProgressEvent::Cancelled { stage } => log::warn!("Cancelled during {stage}"),
        }
    }
}

/// Monotonic counters fed by progress events.
#[derive(Debug, Default)]
pub struct ProgressCounters {
    pages_fetched: AtomicUsize,
    pages_failed: AtomicUsize,
    ads_fetched: AtomicUsize,
    retries: AtomicUsize,
    fallbacks: AtomicUsize,
    lookups: AtomicUsize,
    unresolved: AtomicUsize,
    records_failed: AtomicUsize,
}

/// Point-in-time copy of `ProgressCounters`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub pages_fetched: usize,
    pub pages_failed: usize,
    pub ads_fetched: usize,
    pub retries: usize,
    pub fallbacks: usize,
    pub lookups: usize,
    pub unresolved: usize,
    pub records_failed: usize,
}

impl ProgressCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            pages_fetched: self.pages_fetched.load(Ordering::Relaxed),
            pages_failed: self.pages_failed.load(Ordering::Relaxed),
            ads_fetched: self.ads_fetched.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            lookups: self.lookups.load(Ordering::Relaxed),
            unresolved: self.unresolved.load(Ordering::Relaxed),
            records_failed: self.records_failed.load(Ordering::Relaxed),
        }
    }
}

impl ProgressSink for ProgressCounters {
    fn on_event(&self, event: &ProgressEvent) {
        let counter = match event {
            ProgressEvent::PageFetched { .. } => &self.pages_fetched,
            ProgressEvent::PageFailed { .. } => &self.pages_failed,
            ProgressEvent::AdFetched { .. } => &self.ads_fetched,
            ProgressEvent::Retry { .. } => &self.retries,
            ProgressEvent::Fallback { .. } => &self.fallbacks,
            ProgressEvent::NameLookup { resolved, .. } => {
                if !resolved {
                    self.unresolved.fetch_add(1, Ordering::Relaxed);
                }
                &self.lookups
            }
            ProgressEvent::RecordFailed { .. } => &self.records_failed,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Forwards every event to several sinks.
#[derive(Clone, Default)]
pub struct Fanout {
    sinks: Vec<Arc<dyn ProgressSink>>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl ProgressSink for Fanout {
    fn on_event(&self, event: &ProgressEvent) {
        for sink in &self.sinks {
            sink.on_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_track_events() {
        let counters = ProgressCounters::new();
        counters.on_event(&ProgressEvent::Retry {
            url: "u".into(),
            attempt: 1,
            delay: Duration::ZERO,
            reason: "timeout".into(),
        });
        counters.on_event(&ProgressEvent::Fallback { url: "u".into() });
        counters.on_event(&ProgressEvent::NameLookup {
            kind: NameKind::Model,
            id: "1".into(),
            resolved: false,
        });
        counters.on_event(&ProgressEvent::StageStarted {
            stage: Stage::Details,
            total: Some(3),
        });

        let snap = counters.snapshot();
        assert_eq!(snap.retries, 1);
        assert_eq!(snap.fallbacks, 1);
        assert_eq!(snap.lookups, 1);
        assert_eq!(snap.unresolved, 1);
        assert_eq!(snap.ads_fetched, 0);
    }

    #[test]
    fn test_fanout_reaches_all_sinks() {
        let a = Arc::new(ProgressCounters::new());
        let b = Arc::new(ProgressCounters::new());
        let fanout = Fanout::new().with(a.clone()).with(b.clone());

        fanout.on_event(&ProgressEvent::Fallback { url: "u".into() });

        assert_eq!(a.snapshot().fallbacks, 1);
        assert_eq!(b.snapshot().fallbacks, 1);
    }
}
