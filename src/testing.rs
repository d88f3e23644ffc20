//! Scripted transports and page builders for tests.
//!
//! `ScriptedTransport` answers from a per-URL script, counts calls per URL
//! and can inject transport errors before the scripted answer.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::TransportError;
use crate::transport::{FetchResponse, Headers, Transport};

#[derive(Debug, Default)]
struct Script {
    failures_left: u32,
    response: Option<FetchResponse>,
    calls: u32,
}

/// In-memory transport driven by a script.
///
/// Unscripted URLs answer 404.
pub struct ScriptedTransport {
    name: String,
    scripts: Mutex<HashMap<String, Script>>,
    latency: Duration,
    requests: AtomicU64,
}

impl ScriptedTransport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scripts: Mutex::new(HashMap::new()),
            latency: Duration::ZERO,
            requests: AtomicU64::new(0),
        }
    }

    /// Sleep this long inside every fetch.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn respond(&self, url: &str, body: impl Into<String>) {
        self.script(url, |s| s.response = Some(FetchResponse::ok(body)));
    }

    pub fn respond_status(&self, url: &str, status: u16) {
        self.script(url, |s| {
            s.response = Some(FetchResponse {
                status,
                body: String::new(),
            })
        });
    }

    /// Fail the next `times` calls for `url` with a timeout.
    pub fn fail_first(&self, url: &str, times: u32) {
        self.script(url, |s| s.failures_left = times);
    }

    /// Calls made for one URL.
    pub fn calls(&self, url: &str) -> u32 {
        self.lock().get(url).map(|s| s.calls).unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.lock().values().map(|s| s.calls).sum()
    }

    fn script(&self, url: &str, apply: impl FnOnce(&mut Script)) {
        apply(self.lock().entry(url.to_string()).or_default());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Script>> {
        self.scripts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, url: &str, _headers: &Headers) -> Result<FetchResponse, TransportError> {
        let answer = {
            let mut scripts = self.lock();
            let script = scripts.entry(url.to_string()).or_default();
            script.calls += 1;
            if script.failures_left > 0 {
                script.failures_left -= 1;
                Err(TransportError::Timeout)
            } else {
                Ok(script.response.clone().unwrap_or(FetchResponse {
                    status: 404,
                    body: String::new(),
                }))
            }
        };

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if matches!(&answer, Ok(response) if response.is_success()) {
            self.requests.fetch_add(1, Ordering::Relaxed);
        }
        answer
    }

    fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

/// Wrap page state in an HTML document the way the site embeds it.
pub fn next_data_html(state: &Value) -> String {
    format!(
        r#"<!DOCTYPE html><html><head><title>lalafo</title></head><body><div id="__next"></div><script id="__NEXT_DATA__" type="application/json">{state}</script></body></html>"#
    )
}

/// Listing page with the given ad ids, each linked at `/ads/{id}`.
pub fn listing_html(ids: &[&str], page_count: Option<u32>) -> String {
    let items: Vec<Value> = ids
        .iter()
        .map(|id| json!({"id": id, "url": format!("/ads/{id}")}))
        .collect();
    let mut data = json!({"items": items});
    if let Some(count) = page_count {
        data["_meta"] = json!({"pageCount": count});
    }
    next_data_html(&json!({
        "props": {"initialState": {"listing": {"listingFeed": {"data": data}}}}
    }))
}

/// Ad detail page whose item is `item` with `id` filled in.
pub fn detail_html(id: &str, mut item: Value) -> String {
    item["id"] = json!(id);
    next_data_html(&json!({
        "props": {"initialState": {"feed": {"adDetails": {
            "currentAdId": id,
            id: {"item": item}
        }}}}
    }))
}

/// Plain JSON name lookup answer.
pub fn name_json(name: &str) -> String {
    json!({"name": name}).to_string()
}
