//! Utility functions and helpers.

pub mod log;

use url::Url;

use crate::error::Result;

/// Resolve a potentially relative URL against a base URL.
pub fn resolve_url(base: &Url, href: &str) -> String {
    base.join(href)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// URL of a listing page. Page 1 is the start URL itself; later pages set
/// `param` and keep every other query pair (`sort_by` and friends).
pub fn page_url(start_url: &str, param: &str, page: u32) -> Result<String> {
    let mut url = Url::parse(start_url)?;
    if page <= 1 {
        return Ok(url.to_string());
    }

    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != param)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    {
        let mut query = url.query_pairs_mut();
        query.clear();
        for (key, value) in &pairs {
            query.append_pair(key, value);
        }
        query.append_pair(param, &page.to_string());
    }

    Ok(url.to_string())
}

/// `url` with the pairs of `query` added. Keys already present are
/// replaced, other pairs are kept.
pub fn merge_query(url: &str, query: &str) -> Result<String> {
    let mut url = Url::parse(url)?;
    let extra: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();
    if extra.is_empty() {
        return Ok(url.to_string());
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !extra.iter().any(|(name, _)| *name == **key))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (key, value) in kept.iter().chain(&extra) {
            pairs.append_pair(key, value);
        }
    }

    Ok(url.to_string())
}
