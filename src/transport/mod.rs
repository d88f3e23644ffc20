//! Transports used to talk to the listing site.
//!
//! The pipeline never builds HTTP clients itself: a primary and a secondary
//! `Transport` are handed in, which keeps the fetch stages testable with
//! scripted transports.

mod http;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::TransportError;

pub use http::HttpTransport;

/// Request headers, sorted so request logs are stable.
pub type Headers = BTreeMap<String, String>;

/// Status and body of a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

impl FetchResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Something that can GET a URL.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name used in logs and request statistics.
    fn name(&self) -> &str;

    /// Fetch a URL. Non-2xx statuses are returned, not raised.
    async fn fetch(&self, url: &str, headers: &Headers) -> Result<FetchResponse, TransportError>;

    /// Number of successful requests made so far.
    fn request_count(&self) -> u64 {
        0
    }
}
