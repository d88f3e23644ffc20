//! Ad records: raw payloads as fetched and the cleaned canonical form.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{NameKind, Resolution};

/// A scalar whose type varies between payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawScalar {
    Number(f64),
    Text(String),
    Bool(bool),
}

impl RawScalar {
    /// Text form of the value, as shown on the site.
    pub fn as_text(&self) -> String {
        match self {
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.clone(),
            Self::Bool(b) => b.to_string(),
        }
    }
}

/// A labelled attribute of an ad ("Марка", "Пробег", ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdParam {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub value: Option<RawScalar>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_id: Option<i64>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// An image attached to an ad.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdImage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Payload fields of an ad.
///
/// Known fields are typed; everything else lands in `extra` untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdFields {
    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub price: Option<RawScalar>,

    #[serde(default)]
    pub currency: Option<String>,

    #[serde(default)]
    pub symbol: Option<String>,

    #[serde(default)]
    pub city: Option<String>,

    #[serde(default)]
    pub params: Vec<AdParam>,

    #[serde(default)]
    pub images: Vec<AdImage>,

    /// Unix seconds
    #[serde(default)]
    pub created_time: Option<i64>,

    /// Unix seconds
    #[serde(default)]
    pub updated_time: Option<i64>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl AdFields {
    /// First param whose label matches one of `names` (case-insensitive).
    pub fn param(&self, names: &[String]) -> Option<&AdParam> {
        names.iter().find_map(|wanted| {
            let wanted = wanted.trim().to_lowercase();
            self.params
                .iter()
                .find(|p| p.name.trim().to_lowercase() == wanted)
        })
    }
}

/// Detail payload as returned by the parser, before enrichment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdDetail {
    pub id: Option<String>,
    pub category_id: Option<String>,
    pub subcategory_id: Option<String>,
    pub model_id: Option<String>,
    pub fields: AdFields,
}

/// An ad as fetched from the site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawAd {
    pub id: String,

    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,

    pub fields: AdFields,

    /// Lookup outcome for each embedded identifier
    #[serde(default)]
    pub enrichment: BTreeMap<NameKind, Resolution>,

    pub fetched_at: DateTime<Utc>,
}

impl RawAd {
    /// Embedded identifier of the given kind.
    pub fn id_of(&self, kind: NameKind) -> Option<&str> {
        match kind {
            NameKind::Category => self.category_id.as_deref(),
            NameKind::Subcategory => self.subcategory_id.as_deref(),
            NameKind::Model => self.model_id.as_deref(),
        }
    }

    /// Identifier kinds whose lookup failed.
    pub fn unresolved_kinds(&self) -> Vec<NameKind> {
        self.enrichment
            .iter()
            .filter(|(_, r)| !r.is_resolved())
            .map(|(kind, _)| *kind)
            .collect()
    }

    /// Whether any enrichment is missing.
    pub fn is_partial(&self) -> bool {
        self.enrichment.values().any(|r| !r.is_resolved())
    }
}

/// Canonical cleaned ad.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanedAd {
    pub id: String,
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub price: f64,
    pub currency: Option<String>,
    pub year: Option<i32>,
    pub mileage_km: Option<f64>,
    pub brand: String,
    pub model: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub city: Option<String>,
    pub images: Vec<String>,
    pub params: BTreeMap<String, String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}
