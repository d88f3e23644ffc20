// src/transport/http.rs

//! reqwest-backed transports.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::error::{Result, TransportError};
use crate::models::{CrawlerConfig, FallbackConfig};
use crate::transport::{FetchResponse, Headers, Transport};

/// HTTP transport over a reqwest client.
///
/// The primary flavour shares a pooled client across all workers. The
/// secondary flavour lets one request through at a time and pauses after
/// each one.
pub struct HttpTransport {
    name: &'static str,
    client: reqwest::Client,
    gate: Option<Semaphore>,
    delay: Duration,
    requests: AtomicU64,
}

impl HttpTransport {
    /// Fast transport for concurrent use.
    pub fn primary(config: &CrawlerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(config.pool_size)
            .build()?;

        Ok(Self {
            name: "primary",
            client,
            gate: None,
            delay: Duration::ZERO,
            requests: AtomicU64::new(0),
        })
    }

    /// Conservative transport used once per URL after the primary gave up.
    pub fn secondary(crawler: &CrawlerConfig, fallback: &FallbackConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(&crawler.user_agent)
            .timeout(Duration::from_secs(fallback.timeout_secs))
            .http1_only()
            .pool_max_idle_per_host(1)
            .build()?;

        Ok(Self {
            name: "secondary",
            client,
            gate: Some(Semaphore::new(1)),
            delay: Duration::from_millis(fallback.request_delay_ms),
            requests: AtomicU64::new(0),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        self.name
    }

    async fn fetch(&self, url: &str, headers: &Headers) -> std::result::Result<FetchResponse, TransportError> {
        let _permit = match &self.gate {
            Some(gate) => Some(
                gate.acquire()
                    .await
                    .map_err(|e| TransportError::Request(e.to_string()))?,
            ),
            None => None,
        };

        log::debug!("[{}] GET {}", self.name, url);

        let mut request = self.client.get(url);
        for (key, value) in headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        if (200..300).contains(&status) {
            self.requests.fetch_add(1, Ordering::Relaxed);
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        Ok(FetchResponse { status, body })
    }

    fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}
