// src/parsers/next_data.rs

//! Parser for pages that embed their state in `script#__NEXT_DATA__`.
//!
//! Bodies that are plain JSON (API responses) are accepted as well: they
//! are read as the inner object the page state would point to.

use scraper::{Html, Selector};
use serde_json::{Map, Value};
use url::Url;

use crate::error::{ParseError, Result};
use crate::models::{AdDetail, AdFields, CategoryLink, ListingEntry, ListingPage};
use crate::parsers::PayloadParser;
use crate::utils::resolve_url;

const NEXT_DATA_SELECTOR: &str = "script#__NEXT_DATA__";

const LISTING_FEED: &[&str] = &["props", "initialState", "listing", "listingFeed", "data"];
const AD_DETAILS: &[&str] = &["props", "initialState", "feed", "adDetails"];
const SELECTED_CATEGORY: &[&str] = &["props", "initialState", "listing", "selectedCategory"];
const LINK_SECTION: &[&str] = &["props", "initialState", "listing", "listingLinkSection"];

/// Keys lifted out of the detail item into typed fields.
const IDENTIFIER_KEYS: &[&str] = &["id", "category_id", "sub_category_id", "subcategory_id", "model_id"];

pub struct NextDataParser {
    base_url: Url,
}

impl NextDataParser {
    /// Create a parser resolving relative ad links against `base_url`.
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            base_url: Url::parse(base_url)?,
        })
    }

    /// Parse a body into JSON, either directly or from the embedded script.
    fn document(&self, body: &str) -> std::result::Result<Value, ParseError> {
        let trimmed = body.trim_start();
        if trimmed.starts_with('{') {
            return Ok(serde_json::from_str(trimmed)?);
        }

        let html = Html::parse_document(body);
        let selector = Selector::parse(NEXT_DATA_SELECTOR)
            .map_err(|e| ParseError::unexpected(NEXT_DATA_SELECTOR, format!("{e:?}")))?;
        let script = html
            .select(&selector)
            .next()
            .ok_or(ParseError::MissingScript(NEXT_DATA_SELECTOR))?;

        let text: String = script.text().collect();
        Ok(serde_json::from_str(&text)?)
    }

    fn resolve_link(&self, href: &str) -> String {
        resolve_url(&self.base_url, href)
    }
}

/// Walk an object path, failing with the dotted path on the first gap.
fn at<'a>(value: &'a Value, path: &[&str]) -> std::result::Result<&'a Value, ParseError> {
    let mut current = value;
    for (depth, key) in path.iter().enumerate() {
        current = current
            .get(key)
            .ok_or_else(|| ParseError::MissingField(path[..=depth].join(".")))?;
    }
    Ok(current)
}

/// Identifiers arrive as numbers or strings.
fn id_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

/// Category links from an array of `{id, name, url, ads_count}` objects.
fn category_links(items: &[Value]) -> Vec<CategoryLink> {
    items
        .iter()
        .filter_map(|item| {
            let href = item.get("url").and_then(Value::as_str)?.trim();
            if href.is_empty() {
                return None;
            }
            Some(CategoryLink {
                id: id_string(item.get("id")),
                name: item
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                href: href.to_string(),
                ads_count: item.get("ads_count").and_then(Value::as_u64),
            })
        })
        .collect()
}

impl PayloadParser for NextDataParser {
    fn parse_category_links(&self, body: &str) -> std::result::Result<Vec<CategoryLink>, ParseError> {
        let document = self.document(body)?;
        let category = if document.get("props").is_some() {
            at(&document, SELECTED_CATEGORY)?
        } else {
            &document
        };

        match category.get("children") {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(children)) => Ok(category_links(children)),
            Some(_) => Err(ParseError::unexpected("selectedCategory.children", "not an array")),
        }
    }

    fn parse_model_links(&self, body: &str) -> std::result::Result<Vec<CategoryLink>, ParseError> {
        let document = self.document(body)?;
        let section = if document.get("props").is_some() {
            match at(&document, LINK_SECTION) {
                Ok(section) => section,
                Err(_) => return Ok(Vec::new()),
            }
        } else {
            &document
        };

        Ok(section
            .get("items")
            .and_then(Value::as_array)
            .map(|items| category_links(items))
            .unwrap_or_default())
    }

    fn parse_listing_page(&self, body: &str) -> std::result::Result<ListingPage, ParseError> {
        let document = self.document(body)?;
        let feed = if document.get("props").is_some() {
            at(&document, LISTING_FEED)?
        } else {
            &document
        };

        let items = feed
            .get("items")
            .ok_or_else(|| ParseError::MissingField("items".into()))?
            .as_array()
            .ok_or_else(|| ParseError::unexpected("items", "not an array"))?;

        let mut entries = Vec::with_capacity(items.len());
        for item in items {
            let Some(id) = id_string(item.get("id")) else {
                log::warn!("Listing item without id skipped");
                continue;
            };
            let Some(href) = item.get("url").and_then(Value::as_str) else {
                log::warn!("Listing item {id} has no url, skipped");
                continue;
            };
            entries.push(ListingEntry {
                id,
                url: self.resolve_link(href),
            });
        }

        let page_count = feed
            .get("_meta")
            .and_then(|meta| meta.get("pageCount"))
            .and_then(Value::as_u64)
            .map(|count| count.min(u32::MAX as u64) as u32);

        Ok(ListingPage {
            entries,
            page_count,
        })
    }

    fn parse_ad_detail(&self, body: &str) -> std::result::Result<AdDetail, ParseError> {
        let document = self.document(body)?;
        let item = if document.get("props").is_some() {
            let details = at(&document, AD_DETAILS)?;
            let current = id_string(details.get("currentAdId"))
                .ok_or_else(|| ParseError::MissingField("adDetails.currentAdId".into()))?;
            details
                .get(&current)
                .and_then(|ad| ad.get("item"))
                .ok_or_else(|| ParseError::MissingField(format!("adDetails.{current}.item")))?
        } else {
            &document
        };

        let mut map: Map<String, Value> = item
            .as_object()
            .cloned()
            .ok_or_else(|| ParseError::unexpected("item", "not an object"))?;

        let id = id_string(map.get("id"));
        let category_id = id_string(map.get("category_id"));
        let subcategory_id =
            id_string(map.get("sub_category_id")).or_else(|| id_string(map.get("subcategory_id")));
        let model_id = id_string(map.get("model_id"));
        for key in IDENTIFIER_KEYS {
            map.remove(*key);
        }

        let fields: AdFields = serde_json::from_value(Value::Object(map))
            .map_err(|e| ParseError::unexpected("item", e))?;

        Ok(AdDetail {
            id,
            category_id,
            subcategory_id,
            model_id,
            fields,
        })
    }

    fn parse_name_lookup(&self, body: &str) -> std::result::Result<String, ParseError> {
        let document = self.document(body)?;
        let holder = if document.get("props").is_some() {
            at(&document, SELECTED_CATEGORY)?
        } else {
            &document
        };

        holder
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ParseError::MissingField("name".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parser() -> NextDataParser {
        NextDataParser::new("https://lalafo.kg").unwrap()
    }

    fn page(data: Value) -> String {
        format!(
            r#"<html><head></head><body><div id="__next"></div><script id="__NEXT_DATA__" type="application/json">{data}</script></body></html>"#
        )
    }

    #[test]
    fn test_listing_page_from_next_data() {
        let body = page(json!({
            "props": {"initialState": {"listing": {"listingFeed": {"data": {
                "items": [
                    {"id": 101, "url": "/bishkek/ads/toyota-camry-id-101"},
                    {"id": "102", "url": "https://lalafo.kg/bishkek/ads/honda-fit-id-102"},
                    {"title": "no id"}
                ],
                "_meta": {"pageCount": 7}
            }}}}}
        }));

        let parsed = parser().parse_listing_page(&body).unwrap();
        assert_eq!(parsed.entries.len(), 2);
        assert_eq!(parsed.entries[0].id, "101");
        assert_eq!(
            parsed.entries[0].url,
            "https://lalafo.kg/bishkek/ads/toyota-camry-id-101"
        );
        assert_eq!(parsed.page_count, Some(7));
    }

    #[test]
    fn test_missing_script_is_parse_error() {
        let err = parser()
            .parse_listing_page("<html><body>blocked</body></html>")
            .unwrap_err();
        assert_eq!(err, ParseError::MissingScript(NEXT_DATA_SELECTOR));
    }

    #[test]
    fn test_listing_path_change_is_reported() {
        let body = page(json!({"props": {"initialState": {"listing": {}}}}));
        let err = parser().parse_listing_page(&body).unwrap_err();
        assert_eq!(
            err,
            ParseError::MissingField("props.initialState.listing.listingFeed".into())
        );
    }

    #[test]
    fn test_ad_detail_lifts_identifiers() {
        let body = page(json!({
            "props": {"initialState": {"feed": {"adDetails": {
                "currentAdId": 101,
                "101": {"item": {
                    "id": 101,
                    "category_id": 7,
                    "sub_category_id": 1501,
                    "model_id": "88",
                    "title": "Toyota Camry",
                    "price": 12500,
                    "currency": "USD",
                    "is_vip": true
                }}
            }}}}
        }));

        let detail = parser().parse_ad_detail(&body).unwrap();
        assert_eq!(detail.id.as_deref(), Some("101"));
        assert_eq!(detail.category_id.as_deref(), Some("7"));
        assert_eq!(detail.subcategory_id.as_deref(), Some("1501"));
        assert_eq!(detail.model_id.as_deref(), Some("88"));
        assert_eq!(detail.fields.title.as_deref(), Some("Toyota Camry"));
        assert!(detail.fields.extra.contains_key("is_vip"));
        assert!(!detail.fields.extra.contains_key("category_id"));
    }

    #[test]
    fn test_ad_detail_from_plain_json() {
        let body = json!({"id": 5, "title": "Lada", "price": "4 500 $"}).to_string();
        let detail = parser().parse_ad_detail(&body).unwrap();
        assert_eq!(detail.id.as_deref(), Some("5"));
        assert_eq!(detail.category_id, None);
    }

    #[test]
    fn test_name_lookup_plain_and_embedded() {
        assert_eq!(
            parser().parse_name_lookup(r#"{"id": 7, "name": "cars"}"#).unwrap(),
            "cars"
        );

        let body = page(json!({
            "props": {"initialState": {"listing": {"selectedCategory": {"name": "Toyota"}}}}
        }));
        assert_eq!(parser().parse_name_lookup(&body).unwrap(), "Toyota");

        assert!(parser().parse_name_lookup(r#"{"name": "  "}"#).is_err());
    }

    #[test]
    fn test_category_links_from_root_page() {
        let body = page(json!({
            "props": {"initialState": {"listing": {"selectedCategory": {
                "name": "Автомобили с пробегом",
                "ads_count": 25000,
                "children": [
                    {"id": 1501, "name": "Toyota", "url": "/avtomobili-s-probegom/toyota", "ads_count": 4000},
                    {"id": 1502, "name": "Honda", "url": "/avtomobili-s-probegom/honda"},
                    {"id": 1503, "name": "No link"}
                ]
            }}}}
        }));

        let links = parser().parse_category_links(&body).unwrap();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].id.as_deref(), Some("1501"));
        assert_eq!(links[0].name, "Toyota");
        assert_eq!(links[0].href, "/avtomobili-s-probegom/toyota");
        assert_eq!(links[0].ads_count, Some(4000));
        assert_eq!(links[1].ads_count, None);
    }

    #[test]
    fn test_model_links_default_to_empty() {
        let body = page(json!({
            "props": {"initialState": {"listing": {"listingLinkSection": {"items": [
                {"id": 88, "name": "Camry", "url": "/kyrgyzstan/avtomobili-s-probegom/toyota/camry"}
            ]}}}}
        }));
        let links = parser().parse_model_links(&body).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].name, "Camry");

        let bare = page(json!({"props": {"initialState": {"listing": {}}}}));
        assert!(parser().parse_model_links(&bare).unwrap().is_empty());

        assert!(parser().parse_model_links("<html></html>").is_err());
    }
}
