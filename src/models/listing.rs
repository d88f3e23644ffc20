//! Listing page data structures.

use serde::{Deserialize, Serialize};

/// An ad reference discovered on a listing page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingRef {
    /// Ad identifier (unique across a discovery run)
    pub id: String,

    /// Absolute URL of the ad detail page
    pub url: String,

    /// 1-based listing page the ad was first seen on
    pub discovered_at: u32,
}

/// One entry as parsed from a listing page, before it is tied to a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub id: String,
    pub url: String,
}

impl ListingEntry {
    pub fn into_ref(self, page: u32) -> ListingRef {
        ListingRef {
            id: self.id,
            url: self.url,
            discovered_at: page,
        }
    }
}

/// Parsed listing page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingPage {
    pub entries: Vec<ListingEntry>,

    /// Total page count, when the page advertises one
    pub page_count: Option<u32>,
}

impl ListingPage {
    /// Whether this page marks the end of the listing.
    pub fn is_last(&self, page: u32) -> bool {
        self.entries.is_empty() || self.page_count.is_some_and(|count| page >= count)
    }
}

/// A child category link from the category tree: a brand on the root
/// page, or a model on a brand page. `href` is as published by the site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryLink {
    pub id: Option<String>,
    pub name: String,
    pub href: String,
    pub ads_count: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str) -> ListingEntry {
        ListingEntry {
            id: id.to_string(),
            url: format!("https://example.com/ad/{id}"),
        }
    }

    #[test]
    fn test_empty_page_is_last() {
        assert!(ListingPage::default().is_last(1));
    }

    #[test]
    fn test_page_count_marker() {
        let page = ListingPage {
            entries: vec![entry("1")],
            page_count: Some(3),
        };
        assert!(!page.is_last(2));
        assert!(page.is_last(3));
    }

    #[test]
    fn test_into_ref_keeps_page() {
        let listing_ref = entry("42").into_ref(5);
        assert_eq!(listing_ref.id, "42");
        assert_eq!(listing_ref.discovered_at, 5);
    }
}
