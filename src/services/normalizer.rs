// src/services/normalizer.rs

//! Turns raw ads into the cleaned canonical schema.
//!
//! Pure: the same raw ad and name table always give the same output.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use thiserror::Error;

use crate::models::{AdFields, CleanedAd, NameKind, NameTable, NormalizeConfig, RawAd, RawScalar};

const KM_PER_MILE: f64 = 1.609_344;
const FIRST_CAR_YEAR: i32 = 1886;
const LAST_PLAUSIBLE_YEAR: i32 = 2100;

static DIGIT_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("hardcoded regex pattern is valid"));

static NUMBER_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d[\d\s\u{a0}.,]*").expect("hardcoded regex pattern is valid")
});

/// Mandatory field that could not be recovered.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingField {
    #[error("missing ad id")]
    Id,

    #[error("missing or non-positive price")]
    Price,

    #[error("missing brand")]
    Brand,
}

#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    config: NormalizeConfig,
}

impl Normalizer {
    pub fn new(config: NormalizeConfig) -> Self {
        Self { config }
    }

    pub fn normalize(&self, raw: &RawAd, names: &NameTable) -> Result<CleanedAd, MissingField> {
        let id = raw.id.trim();
        if id.is_empty() {
            return Err(MissingField::Id);
        }

        let fields = &raw.fields;
        let price = fields
            .price
            .as_ref()
            .and_then(parse_price)
            .ok_or(MissingField::Price)?;

        let name_of = |kind: NameKind| {
            raw.id_of(kind)
                .and_then(|id| names.name(kind, id))
                .map(str::to_string)
        };

        let brand = self
            .param_text(fields, &self.config.brand_params)
            .or_else(|| name_of(NameKind::Subcategory))
            .ok_or(MissingField::Brand)?;
        let model = self
            .param_text(fields, &self.config.model_params)
            .or_else(|| name_of(NameKind::Model));

        let year = self
            .param_text(fields, &self.config.year_params)
            .and_then(|text| parse_year(&text));
        let mileage_km = self
            .param_text(fields, &self.config.mileage_params)
            .and_then(|text| parse_mileage_km(&text));

        Ok(CleanedAd {
            id: id.to_string(),
            url: raw.url.clone(),
            title: non_empty(fields.title.as_deref()),
            description: non_empty(fields.description.as_deref()),
            price,
            currency: currency_of(fields),
            year,
            mileage_km,
            brand,
            model,
            category: name_of(NameKind::Category),
            subcategory: name_of(NameKind::Subcategory),
            city: non_empty(fields.city.as_deref()),
            images: image_urls(fields),
            params: param_map(fields),
            created_at: fields.created_time.and_then(timestamp),
            updated_at: fields.updated_time.and_then(timestamp),
        })
    }

    fn param_text(&self, fields: &AdFields, names: &[String]) -> Option<String> {
        fields
            .param(names)
            .and_then(|param| param.value.as_ref())
            .and_then(|value| non_empty(Some(value.as_text().as_str())))
    }
}

fn non_empty(text: Option<&str>) -> Option<String> {
    text.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

/// Price as a positive number.
pub fn parse_price(value: &RawScalar) -> Option<f64> {
    let price = match value {
        RawScalar::Number(n) => *n,
        RawScalar::Text(text) => parse_number(text)?,
        RawScalar::Bool(_) => return None,
    };
    (price.is_finite() && price > 0.0).then_some(price)
}

/// Parse a human-formatted number ("12 500 $", "1.250,50", "3,5").
///
/// Everything but digits and separators is dropped. When both `.` and `,`
/// appear, the last one is the decimal separator. A lone separator followed
/// by exactly three digits groups thousands.
fn parse_number(text: &str) -> Option<f64> {
    let kept: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    let kept = kept.trim_matches(|c| c == '.' || c == ',');
    if !kept.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let last_dot = kept.rfind('.');
    let last_comma = kept.rfind(',');
    let decimal = match (last_dot, last_comma) {
        (Some(dot), Some(comma)) => Some(dot.max(comma)),
        (Some(pos), None) | (None, Some(pos)) => {
            let separator = kept.as_bytes()[pos] as char;
            let repeated = kept.matches(separator).count() > 1;
            let digits_after = kept.len() - pos - 1;
            (!repeated && digits_after != 3).then_some(pos)
        }
        (None, None) => None,
    };

    let normalized: String = kept
        .char_indices()
        .filter_map(|(i, c)| match c {
            '.' | ',' if Some(i) == decimal => Some('.'),
            '.' | ',' => None,
            digit => Some(digit),
        })
        .collect();
    normalized.parse().ok()
}

/// First four-digit number that is a plausible model year.
pub fn parse_year(text: &str) -> Option<i32> {
    DIGIT_RUN
        .find_iter(text)
        .filter(|m| m.as_str().len() == 4)
        .filter_map(|m| m.as_str().parse().ok())
        .find(|year| (FIRST_CAR_YEAR..=LAST_PLAUSIBLE_YEAR).contains(year))
}

/// Mileage in whole kilometres. Values given in miles are converted.
pub fn parse_mileage_km(text: &str) -> Option<f64> {
    let raw = NUMBER_TEXT.find(text)?;
    let value = parse_number(raw.as_str())?;

    let lower = text.to_lowercase();
    let km = if lower.contains("mile") || lower.contains("миль") {
        value * KM_PER_MILE
    } else {
        value
    };
    Some(km.round())
}

/// ISO code from payload currency, symbol, or the price text.
fn currency_of(fields: &AdFields) -> Option<String> {
    let price_text = match &fields.price {
        Some(RawScalar::Text(text)) => Some(text.as_str()),
        _ => None,
    };
    [fields.currency.as_deref(), fields.symbol.as_deref(), price_text]
        .into_iter()
        .flatten()
        .find_map(currency_code)
}

fn currency_code(text: &str) -> Option<String> {
    let lower = text.trim().to_lowercase();
    if lower.is_empty() {
        return None;
    }
    if lower.contains('$') || lower.contains("usd") {
        return Some("USD".into());
    }
    if lower.contains('€') || lower.contains("eur") {
        return Some("EUR".into());
    }
    if lower.contains("сом") || lower.contains("kgs") {
        return Some("KGS".into());
    }
    let trimmed = text.trim();
    (trimmed.len() == 3 && trimmed.chars().all(|c| c.is_ascii_alphabetic()))
        .then(|| trimmed.to_ascii_uppercase())
}

fn image_urls(fields: &AdFields) -> Vec<String> {
    fields
        .images
        .iter()
        .filter_map(|image| {
            image
                .original_url
                .as_deref()
                .or(image.thumbnail_url.as_deref())
        })
        .map(str::to_string)
        .collect()
}

fn param_map(fields: &AdFields) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    for param in &fields.params {
        let Some(value) = param
            .value
            .as_ref()
            .and_then(|v| non_empty(Some(v.as_text().as_str())))
        else {
            continue;
        };
        params.entry(param.name.trim().to_string()).or_insert(value);
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AdParam, Resolution};

    fn param(name: &str, value: RawScalar) -> AdParam {
        AdParam {
            id: None,
            name: name.into(),
            value: Some(value),
            value_id: None,
            extra: BTreeMap::new(),
        }
    }

    fn raw(fields: AdFields) -> RawAd {
        RawAd {
            id: "101".into(),
            url: "https://lalafo.kg/ads/101".into(),
            category_id: Some("7".into()),
            subcategory_id: Some("1501".into()),
            model_id: Some("88".into()),
            fields,
            enrichment: BTreeMap::new(),
            fetched_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        }
    }

    fn names() -> NameTable {
        let mut table = NameTable::new();
        table.insert(NameKind::Category, "7", Resolution::Resolved("cars".into()));
        table.insert(NameKind::Subcategory, "1501", Resolution::Resolved("Toyota".into()));
        table.insert(NameKind::Model, "88", Resolution::Unresolved);
        table
    }

    #[test]
    fn test_parse_price_formats() {
        assert_eq!(parse_price(&RawScalar::Number(12500.0)), Some(12500.0));
        assert_eq!(parse_price(&RawScalar::Text("12 500 $".into())), Some(12500.0));
        assert_eq!(parse_price(&RawScalar::Text("1\u{a0}250 000 сом".into())), Some(1_250_000.0));
        assert_eq!(parse_price(&RawScalar::Text("1.250,50 €".into())), Some(1250.5));
        assert_eq!(parse_price(&RawScalar::Text("12,500".into())), Some(12500.0));
        assert_eq!(parse_price(&RawScalar::Text("3,5".into())), Some(3.5));
        assert_eq!(parse_price(&RawScalar::Text("Договорная".into())), None);
        assert_eq!(parse_price(&RawScalar::Number(0.0)), None);
        assert_eq!(parse_price(&RawScalar::Number(-5.0)), None);
    }

    #[test]
    fn test_parse_year() {
        assert_eq!(parse_year("2012"), Some(2012));
        assert_eq!(parse_year("выпуск 2008 г."), Some(2008));
        assert_eq!(parse_year("12345 then 1999"), Some(1999));
        assert_eq!(parse_year("1500"), None);
        assert_eq!(parse_year("новая"), None);
    }

    #[test]
    fn test_shared_patterns_build() {
        assert!(DIGIT_RUN.is_match("2012"));
        assert_eq!(
            NUMBER_TEXT.find("пробег 85\u{a0}000 км").map(|m| m.as_str().trim()),
            Some("85\u{a0}000")
        );
    }

    #[test]
    fn test_parse_mileage() {
        assert_eq!(parse_mileage_km("150 000 км"), Some(150_000.0));
        assert_eq!(parse_mileage_km("100000 miles"), Some(160_934.0));
        assert_eq!(parse_mileage_km("нет данных"), None);
    }

    #[test]
    fn test_currency_inference() {
        let fields = AdFields {
            price: Some(RawScalar::Text("5 000 $".into())),
            ..AdFields::default()
        };
        assert_eq!(currency_of(&fields).as_deref(), Some("USD"));

        let fields = AdFields {
            price: Some(RawScalar::Number(450000.0)),
            currency: Some("KGS".into()),
            ..AdFields::default()
        };
        assert_eq!(currency_of(&fields).as_deref(), Some("KGS"));

        let fields = AdFields {
            price: Some(RawScalar::Number(1.0)),
            symbol: Some("сом".into()),
            ..AdFields::default()
        };
        assert_eq!(currency_of(&fields).as_deref(), Some("KGS"));
    }

    #[test]
    fn test_normalize_full_record() {
        let fields = AdFields {
            title: Some("  Toyota Camry 2012 ".into()),
            description: Some("   ".into()),
            price: Some(RawScalar::Text("12 500 $".into())),
            city: Some("Бишкек".into()),
            params: vec![
                param("Год выпуска", RawScalar::Number(2012.0)),
                param("Пробег", RawScalar::Text("150 000 км".into())),
                param("Модель", RawScalar::Text("Camry".into())),
            ],
            created_time: Some(1_700_000_000),
            ..AdFields::default()
        };

        let cleaned = Normalizer::default().normalize(&raw(fields), &names()).unwrap();
        assert_eq!(cleaned.title.as_deref(), Some("Toyota Camry 2012"));
        assert_eq!(cleaned.description, None);
        assert_eq!(cleaned.price, 12500.0);
        assert_eq!(cleaned.currency.as_deref(), Some("USD"));
        assert_eq!(cleaned.year, Some(2012));
        assert_eq!(cleaned.mileage_km, Some(150_000.0));
        assert_eq!(cleaned.brand, "Toyota");
        assert_eq!(cleaned.model.as_deref(), Some("Camry"));
        assert_eq!(cleaned.category.as_deref(), Some("cars"));
        assert_eq!(cleaned.params["Пробег"], "150 000 км");
        assert!(cleaned.created_at.is_some());
    }

    #[test]
    fn test_unresolved_model_stays_none() {
        let fields = AdFields {
            price: Some(RawScalar::Number(100.0)),
            ..AdFields::default()
        };
        let cleaned = Normalizer::default().normalize(&raw(fields), &names()).unwrap();
        assert_eq!(cleaned.model, None);
        assert_eq!(cleaned.brand, "Toyota");
    }

    #[test]
    fn test_mandatory_fields() {
        let normalizer = Normalizer::default();

        let no_price = raw(AdFields::default());
        assert_eq!(normalizer.normalize(&no_price, &names()), Err(MissingField::Price));

        let mut no_brand = raw(AdFields {
            price: Some(RawScalar::Number(1.0)),
            ..AdFields::default()
        });
        no_brand.subcategory_id = None;
        assert_eq!(normalizer.normalize(&no_brand, &names()), Err(MissingField::Brand));

        let mut no_id = raw(AdFields::default());
        no_id.id = " ".into();
        assert_eq!(normalizer.normalize(&no_id, &names()), Err(MissingField::Id));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let fields = AdFields {
            title: Some("Honda Fit".into()),
            price: Some(RawScalar::Text("4 300 $".into())),
            params: vec![param("Марка", RawScalar::Text("Honda".into()))],
            ..AdFields::default()
        };
        let ad = raw(fields);
        let normalizer = Normalizer::default();

        let first = serde_json::to_string(&normalizer.normalize(&ad, &names()).unwrap()).unwrap();
        let second = serde_json::to_string(&normalizer.normalize(&ad, &names()).unwrap()).unwrap();
        assert_eq!(first, second);
    }
}
