//! Card catalog. Read-only card metadata, keyed by exact name.
//!
//! Loaded once at startup from a Scryfall-style JSON array and shared
//! read-only across every connection and stream.

use std::collections::HashMap;
use std::path::Path;

use rand::seq::SliceRandom;
use serde::Deserialize;

/// Layouts whose faces are printed as two separate images.
const MULTIFACE_LAYOUTS: &[&str] = &["transform", "art_series", "double_faced_token"];

/// Where a card's images live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardFaces {
    Single(String),
    Double { front: String, back: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub name: String,
    pub faces: CardFaces,
}

impl CatalogEntry {
    pub fn single(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            faces: CardFaces::Single(url.into()),
        }
    }

    pub fn double(name: impl Into<String>, front: impl Into<String>, back: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            faces: CardFaces::Double {
                front: front.into(),
                back: back.into(),
            },
        }
    }

    pub fn is_multiface(&self) -> bool {
        matches!(self.faces, CardFaces::Double { .. })
    }
}

// ── Source records ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CardRecord {
    name: String,
    #[serde(default)]
    layout: String,
    #[serde(default)]
    image_uris: Option<ImageUris>,
    #[serde(default)]
    card_faces: Option<Vec<FaceRecord>>,
}

#[derive(Debug, Deserialize)]
struct FaceRecord {
    #[serde(default)]
    image_uris: Option<ImageUris>,
}

#[derive(Debug, Deserialize)]
struct ImageUris {
    #[serde(default)]
    large: Option<String>,
}

fn large(uris: &Option<ImageUris>) -> Option<String> {
    uris.as_ref().and_then(|u| u.large.clone())
}

impl CardRecord {
    fn into_entry(self) -> Option<CatalogEntry> {
        if MULTIFACE_LAYOUTS.contains(&self.layout.as_str()) {
            let faces = self.card_faces.as_deref().unwrap_or_default();
            let front = faces.first().and_then(|f| large(&f.image_uris));
            let back = faces.get(1).and_then(|f| large(&f.image_uris));
            return match (front, back) {
                (Some(front), Some(back)) => Some(CatalogEntry::double(self.name, front, back)),
                _ => None,
            };
        }
        large(&self.image_uris).map(|url| CatalogEntry::single(self.name, url))
    }
}

// ── Catalog ───────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct CardCatalog {
    entries: Vec<CatalogEntry>,
    /// name -> index of the first entry with that name.
    by_name: HashMap<String, usize>,
    /// Indices of single-faced entries, for random draws that exclude
    /// multi-faced cards.
    single_faced: Vec<usize>,
}

impl CardCatalog {
    pub fn from_entries(entries: Vec<CatalogEntry>) -> Self {
        let mut by_name = HashMap::with_capacity(entries.len());
        let mut single_faced = Vec::new();
        for (i, entry) in entries.iter().enumerate() {
            by_name.entry(entry.name.clone()).or_insert(i);
            if !entry.is_multiface() {
                single_faced.push(i);
            }
        }
        Self {
            entries,
            by_name,
            single_faced,
        }
    }

    /// Parse a JSON array of card records.
    pub fn from_json(json: &[u8]) -> Result<Self, CatalogError> {
        let records: Vec<CardRecord> = serde_json::from_slice(json)?;
        let total = records.len();
        let entries: Vec<CatalogEntry> = records.into_iter().filter_map(CardRecord::into_entry).collect();
        let skipped = total - entries.len();
        if skipped > 0 {
            tracing::debug!(skipped, "card records without a usable image skipped");
        }
        Ok(Self::from_entries(entries))
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let bytes = std::fs::read(path).map_err(|e| CatalogError::Read(path.to_path_buf(), e))?;
        let catalog = Self::from_json(&bytes)?;
        tracing::info!(
            path = %path.display(),
            cards = catalog.len(),
            multiface = catalog.len() - catalog.single_faced.len(),
            "catalog loaded"
        );
        Ok(catalog)
    }

    /// Exact-name lookup. The first record wins on duplicate names.
    pub fn lookup(&self, name: &str) -> Option<&CatalogEntry> {
        self.by_name.get(name).map(|&i| &self.entries[i])
    }

    /// Uniform random draw. None if no entry qualifies.
    pub fn sample(&self, include_multiface: bool) -> Option<&CatalogEntry> {
        let mut rng = rand::thread_rng();
        if include_multiface {
            self.entries.choose(&mut rng)
        } else {
            self.single_faced.choose(&mut rng).map(|&i| &self.entries[i])
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read catalog {0}: {1}")]
    Read(std::path::PathBuf, std::io::Error),
    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
}
