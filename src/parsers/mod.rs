//! Payload parsers.
//!
//! Parsers turn response bodies into typed records. They never fetch, and
//! any shape mismatch is reported as a `ParseError`.

mod next_data;

use crate::error::ParseError;
use crate::models::{AdDetail, CategoryLink, ListingPage};

pub use next_data::NextDataParser;

/// Parses the bodies the crawler sees.
pub trait PayloadParser: Send + Sync {
    /// Brands listed under the selected category of a category page.
    fn parse_category_links(&self, body: &str) -> Result<Vec<CategoryLink>, ParseError>;

    /// Models linked from a brand page. A page without a model section has
    /// none.
    fn parse_model_links(&self, body: &str) -> Result<Vec<CategoryLink>, ParseError>;

    fn parse_listing_page(&self, body: &str) -> Result<ListingPage, ParseError>;

    fn parse_ad_detail(&self, body: &str) -> Result<AdDetail, ParseError>;

    /// Display name from a category/subcategory/model lookup.
    fn parse_name_lookup(&self, body: &str) -> Result<String, ParseError>;
}
