//! End-to-end pipeline runs over scripted transports.

use std::sync::{Arc, Mutex};

use lalafo_crawler::models::{
    Config, EnrichmentConfig, FailureKind, RetryConfig, RunStatus,
};
use lalafo_crawler::parsers::NextDataParser;
use lalafo_crawler::pipeline::Pipeline;
use lalafo_crawler::progress::{NoProgress, ProgressEvent, ProgressSink, Stage};
use lalafo_crawler::storage::local::{CHECKPOINT_FILE, CLEANED_FILE, RAW_FILE};
use lalafo_crawler::storage::{AdStorage, LocalStorage};
use lalafo_crawler::testing::{
    ScriptedTransport, detail_html, listing_html, name_json, next_data_html,
};
use lalafo_crawler::utils::page_url;
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const START: &str = "https://x.test/cars?sort_by=newest";

fn config() -> Config {
    let mut config = Config::default();
    config.listing.root_url = None;
    config.listing.start_urls = vec![START.into()];
    config.listing.base_url = "https://x.test".into();
    config.listing.concurrency = 1;
    config.listing.page_cap = 20;
    config.crawler.pool_size = 4;
    config.retry = RetryConfig {
        max_retries: 3,
        base_delay_ms: 0,
        max_delay_ms: 0,
        jitter: false,
    };
    config.enrichment = EnrichmentConfig {
        category_url: "https://x.test/api/categories/{id}".into(),
        subcategory_url: "https://x.test/api/subcategories/{id}".into(),
        model_url: "https://x.test/api/models/{id}".into(),
    };
    config
}

fn page(n: u32) -> String {
    page_url(START, "page", n).unwrap()
}

fn ad_url(id: &str) -> String {
    format!("https://x.test/ads/{id}")
}

fn car(brand: &str, price: serde_json::Value) -> serde_json::Value {
    json!({
        "title": format!("{brand} for sale"),
        "price": price,
        "currency": "USD",
        "category_id": 7,
        "params": [
            {"name": "Марка", "value": brand},
            {"name": "Год выпуска", "value": 2014}
        ]
    })
}

/// Three listing pages of 2, 2 and 1 ads; id 2 shows up twice.
fn scripted_site() -> Arc<ScriptedTransport> {
    let primary = scripted_ads();
    primary.respond(&page(1), listing_html(&["1", "2"], Some(3)));
    primary.respond(&page(2), listing_html(&["2", "3"], Some(3)));
    primary.respond(&page(3), listing_html(&["4"], Some(3)));
    primary
}

/// Ad pages 1 to 4 and the category lookup, without any listing.
fn scripted_ads() -> Arc<ScriptedTransport> {
    let primary = Arc::new(ScriptedTransport::new("primary"));
    for (id, brand) in [("1", "Toyota"), ("2", "Honda"), ("3", "Lexus"), ("4", "Mazda")] {
        primary.respond(&ad_url(id), detail_html(id, car(brand, json!(10_000))));
    }
    primary.respond("https://x.test/api/categories/7", name_json("cars"));
    primary
}

fn pipeline(
    config: Config,
    primary: Arc<ScriptedTransport>,
    secondary: Arc<ScriptedTransport>,
    dir: &TempDir,
) -> Pipeline {
    let parser = Arc::new(NextDataParser::new(&config.listing.base_url).unwrap());
    let storage = Arc::new(LocalStorage::new(dir.path()));
    Pipeline::new(Arc::new(config), primary, secondary, parser, storage)
        .with_progress(Arc::new(NoProgress))
}

#[tokio::test]
async fn test_full_run_with_one_transient_failure_per_ad() {
    let dir = TempDir::new().unwrap();
    let primary = scripted_site();
    for id in ["1", "2", "3", "4"] {
        primary.fail_first(&ad_url(id), 1);
    }
    let secondary = Arc::new(ScriptedTransport::new("secondary"));

    let summary = pipeline(config(), primary.clone(), secondary.clone(), &dir)
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.status, RunStatus::Complete);
    assert_eq!(summary.refs_discovered, 4);
    assert_eq!(summary.succeeded(), 4);
    assert_eq!(summary.dropped, 0);
    assert_eq!(summary.retries, 4);
    assert_eq!(summary.fallbacks, 0);
    assert_eq!(summary.lookups, 1);
    assert_eq!(summary.cache_hits, 3);
    assert_eq!(secondary.total_calls(), 0);
    assert_eq!(primary.calls(&ad_url("2")), 2);

    let storage = LocalStorage::new(dir.path());
    let cleaned = storage.load_cleaned().await.unwrap().unwrap();
    assert_eq!(cleaned.count, 4);
    assert!(
        cleaned
            .ads
            .iter()
            .all(|ad| ad.category.as_deref() == Some("cars"))
    );
    let raw = storage.load_raw().await.unwrap().unwrap();
    assert!(raw.complete);
    assert_eq!(raw.count, 4);
}

#[tokio::test]
async fn test_exhausted_primary_uses_fallback_once() {
    let dir = TempDir::new().unwrap();
    let primary = scripted_site();
    primary.fail_first(&ad_url("3"), 10);
    let secondary = Arc::new(ScriptedTransport::new("secondary"));
    secondary.respond(&ad_url("3"), detail_html("3", car("Lexus", json!(30_000))));

    let summary = pipeline(config(), primary.clone(), secondary.clone(), &dir)
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.succeeded(), 4);
    assert_eq!(summary.retries, 2);
    assert_eq!(summary.fallbacks, 1);
    assert_eq!(primary.calls(&ad_url("3")), 3);
    assert_eq!(secondary.calls(&ad_url("3")), 1);
    assert_eq!(summary.requests["secondary"], 1);
}

#[tokio::test]
async fn test_failures_and_drops_are_accounted() {
    let dir = TempDir::new().unwrap();
    let primary = scripted_site();
    primary.respond_status(&ad_url("1"), 404);
    primary.respond(&ad_url("4"), detail_html("4", car("Mazda", json!("Договорная"))));
    let secondary = Arc::new(ScriptedTransport::new("secondary"));

    let summary = pipeline(config(), primary, secondary, &dir)
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.raw_count, 3);
    assert_eq!(summary.cleaned_count + summary.dropped, summary.raw_count);
    assert_eq!(summary.dropped, 1);

    let counts = summary.failure_counts();
    assert_eq!(counts[&FailureKind::HttpStatus], 1);
    assert_eq!(counts[&FailureKind::MandatoryFieldMissing], 1);
}

#[tokio::test]
async fn test_cancellation_keeps_completed_ads() {
    let dir = TempDir::new().unwrap();
    let primary = scripted_site();
    let secondary = Arc::new(ScriptedTransport::new("secondary"));

    let mut config = config();
    config.crawler.pool_size = 1;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let stop_after_two = move |event: &ProgressEvent| {
        if let ProgressEvent::AdFetched { done, .. } = event {
            if *done == 2 {
                trigger.cancel();
            }
        }
    };
    let sink: Arc<dyn ProgressSink> = Arc::new(stop_after_two);

    let summary = pipeline(config, primary, secondary, &dir)
        .with_progress(sink)
        .run(&cancel)
        .await
        .unwrap();

    assert_eq!(summary.status, RunStatus::Partial);
    assert_eq!(summary.raw_count, 2);
    assert_eq!(summary.cleaned_count, 2);

    let storage = LocalStorage::new(dir.path());
    let raw = storage.load_raw().await.unwrap().unwrap();
    assert!(!raw.complete);
    assert!(
        storage
            .load_raw_if_fresh(std::time::Duration::from_secs(3600))
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_empty_listing_is_structural_failure() {
    let dir = TempDir::new().unwrap();
    let primary = Arc::new(ScriptedTransport::new("primary"));
    primary.respond(&page(1), listing_html(&[], None));
    let secondary = Arc::new(ScriptedTransport::new("secondary"));

    let err = pipeline(config(), primary, secondary, &dir)
        .run(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_structural());
}

#[tokio::test]
async fn test_fresh_raw_data_is_reused() {
    let dir = TempDir::new().unwrap();
    pipeline(
        config(),
        scripted_site(),
        Arc::new(ScriptedTransport::new("secondary")),
        &dir,
    )
    .run(&CancellationToken::new())
    .await
    .unwrap();

    let mut reuse = config();
    reuse.freshness.reuse_raw = true;
    let offline = Arc::new(ScriptedTransport::new("primary"));
    let stages = Arc::new(Mutex::new(Vec::new()));
    let seen = stages.clone();
    let record = move |event: &ProgressEvent| match event {
        ProgressEvent::StageStarted { stage, .. } => seen.lock().unwrap().push(("start", *stage)),
        ProgressEvent::StageFinished { stage, .. } => seen.lock().unwrap().push(("finish", *stage)),
        _ => {}
    };

    let summary = pipeline(
        reuse,
        offline.clone(),
        Arc::new(ScriptedTransport::new("secondary")),
        &dir,
    )
    .with_progress(Arc::new(record))
    .run(&CancellationToken::new())
    .await
    .unwrap();

    assert!(summary.reused_raw);
    assert_eq!(summary.cleaned_count, 4);
    assert_eq!(offline.total_calls(), 0);
    let stages = stages.lock().unwrap();
    assert_eq!(stages[0], ("start", Stage::LoadRaw));
    assert_eq!(stages[1], ("finish", Stage::LoadRaw));
    assert!(!stages.iter().any(|(_, stage)| *stage == Stage::Listing));
}

#[tokio::test]
async fn test_clean_only_reads_stored_raw() {
    let dir = TempDir::new().unwrap();
    let secondary = Arc::new(ScriptedTransport::new("secondary"));
    let crawl = pipeline(config(), scripted_site(), secondary.clone(), &dir);
    crawl.run(&CancellationToken::new()).await.unwrap();

    let offline = Arc::new(ScriptedTransport::new("primary"));
    let summary = pipeline(config(), offline.clone(), secondary, &dir)
        .clean_only()
        .await
        .unwrap();

    assert_eq!(summary.cleaned_count, 4);
    assert_eq!(offline.total_calls(), 0);
}

#[tokio::test]
async fn test_clean_only_without_raw_fails() {
    let dir = TempDir::new().unwrap();
    let result = pipeline(
        config(),
        Arc::new(ScriptedTransport::new("primary")),
        Arc::new(ScriptedTransport::new("secondary")),
        &dir,
    )
    .clean_only()
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_cancel_during_listing_keeps_stored_datasets() {
    let dir = TempDir::new().unwrap();
    pipeline(
        config(),
        scripted_site(),
        Arc::new(ScriptedTransport::new("secondary")),
        &dir,
    )
    .run(&CancellationToken::new())
    .await
    .unwrap();
    let raw_before = std::fs::read(dir.path().join(RAW_FILE)).unwrap();
    let cleaned_before = std::fs::read(dir.path().join(CLEANED_FILE)).unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let stop_on_first_page = move |event: &ProgressEvent| {
        if matches!(event, ProgressEvent::PageFetched { .. }) {
            trigger.cancel();
        }
    };
    let primary = scripted_site();

    let summary = pipeline(
        config(),
        primary.clone(),
        Arc::new(ScriptedTransport::new("secondary")),
        &dir,
    )
    .with_progress(Arc::new(stop_on_first_page))
    .run(&cancel)
    .await
    .unwrap();

    assert_eq!(summary.status, RunStatus::Partial);
    assert_eq!(summary.raw_count, 0);
    assert_eq!(primary.calls(&page(2)), 0);
    assert_eq!(primary.calls(&ad_url("1")), 0);
    assert_eq!(std::fs::read(dir.path().join(RAW_FILE)).unwrap(), raw_before);
    assert_eq!(
        std::fs::read(dir.path().join(CLEANED_FILE)).unwrap(),
        cleaned_before
    );
    assert!(!dir.path().join(CHECKPOINT_FILE).exists());
}

#[tokio::test]
async fn test_interrupted_run_resumes_from_checkpoint() {
    let dir = TempDir::new().unwrap();
    let mut first = config();
    first.crawler.pool_size = 1;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let stop_after_two = move |event: &ProgressEvent| {
        if matches!(event, ProgressEvent::AdFetched { done: 2, .. }) {
            trigger.cancel();
        }
    };
    let partial = pipeline(
        first,
        scripted_site(),
        Arc::new(ScriptedTransport::new("secondary")),
        &dir,
    )
    .with_progress(Arc::new(stop_after_two))
    .run(&cancel)
    .await
    .unwrap();
    assert!(partial.is_partial());
    assert!(dir.path().join(CHECKPOINT_FILE).exists());

    // no listing pages scripted this time
    let ads_only = scripted_ads();
    let summary = pipeline(
        config(),
        ads_only.clone(),
        Arc::new(ScriptedTransport::new("secondary")),
        &dir,
    )
    .run(&CancellationToken::new())
    .await
    .unwrap();

    assert!(summary.resumed_refs);
    assert_eq!(summary.status, RunStatus::Complete);
    assert_eq!(summary.refs_discovered, 4);
    assert_eq!(summary.cleaned_count, 4);
    assert_eq!(ads_only.calls(&page(1)), 0);
    assert!(!dir.path().join(CHECKPOINT_FILE).exists());
}

#[tokio::test]
async fn test_seeds_from_category_tree() {
    let dir = TempDir::new().unwrap();
    let mut config = config();
    config.listing.start_urls.clear();
    config.listing.root_url = Some("https://x.test/kg/cars".into());
    config.listing.category_base_url = "https://x.test/kg".into();

    let primary = scripted_ads();
    primary.respond(
        "https://x.test/kg/cars",
        next_data_html(&json!({
            "props": {"initialState": {"listing": {"selectedCategory": {
                "children": [{"id": 1501, "name": "Toyota", "url": "/cars/toyota"}]
            }}}}
        })),
    );
    primary.respond(
        "https://x.test/kg/cars/toyota",
        next_data_html(&json!({
            "props": {"initialState": {"listing": {"listingLinkSection": {"items": [
                {"id": 88, "name": "Camry", "url": "/kg/cars/toyota/camry"}
            ]}}}}
        })),
    );
    primary.respond(
        "https://x.test/kg/cars/toyota/camry?sort_by=newest",
        listing_html(&["1", "2"], Some(1)),
    );

    let summary = pipeline(
        config,
        primary,
        Arc::new(ScriptedTransport::new("secondary")),
        &dir,
    )
    .run(&CancellationToken::new())
    .await
    .unwrap();

    assert_eq!(summary.seeds, 1);
    assert_eq!(summary.refs_discovered, 2);
    assert_eq!(summary.cleaned_count, 2);
}
