//! Identifier names resolved through secondary lookups.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::RawAd;

/// Kind of identifier embedded in an ad payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameKind {
    Category,
    Subcategory,
    Model,
}

impl NameKind {
    pub const ALL: [NameKind; 3] = [Self::Category, Self::Subcategory, Self::Model];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Category => "category",
            Self::Subcategory => "subcategory",
            Self::Model => "model",
        }
    }
}

impl fmt::Display for NameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a name lookup.
///
/// `Unresolved` is an explicit marker: the lookup failed and no name is
/// made up in its place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "name", rename_all = "snake_case")]
pub enum Resolution {
    Resolved(String),
    Unresolved,
}

impl Resolution {
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Resolved(name) => Some(name),
            Self::Unresolved => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }
}

/// A cache entry of the enrichment resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedName {
    pub kind: NameKind,
    pub id: String,
    pub resolution: Resolution,
}

/// Read-only name table handed to the normalizer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameTable {
    names: BTreeMap<(NameKind, String), Resolution>,
}

impl NameTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry. Existing entries are kept.
    pub fn insert(&mut self, kind: NameKind, id: impl Into<String>, resolution: Resolution) {
        self.names.entry((kind, id.into())).or_insert(resolution);
    }

    /// Name for an identifier, if it was resolved.
    pub fn name(&self, kind: NameKind, id: &str) -> Option<&str> {
        self.names
            .get(&(kind, id.to_string()))
            .and_then(Resolution::name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Rebuild a table from the enrichment embedded in raw ads.
    pub fn from_ads(ads: &[RawAd]) -> Self {
        let mut table = Self::new();
        for ad in ads {
            for kind in NameKind::ALL {
                if let (Some(id), Some(resolution)) = (ad.id_of(kind), ad.enrichment.get(&kind)) {
                    table.insert(kind, id, resolution.clone());
                }
            }
        }
        table
    }
}

impl FromIterator<ResolvedName> for NameTable {
    fn from_iter<I: IntoIterator<Item = ResolvedName>>(iter: I) -> Self {
        let mut table = Self::new();
        for entry in iter {
            table.insert(entry.kind, entry.id, entry.resolution);
        }
        table
    }
}
