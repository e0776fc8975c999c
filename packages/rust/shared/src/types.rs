//! Core domain types shared by the DocMuse crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DocMuseError;

// ---------------------------------------------------------------------------
// KnowledgeBase
// ---------------------------------------------------------------------------

/// A named partition of the document store and chunk index.
///
/// The set is closed: anything else is rejected at the boundary with a
/// validation error before a run starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeBase {
    Resumes,
    ApiDocs,
    Recipes,
    /// The product catalog. Sparse results here trigger a live product search.
    Supplements,
}

impl KnowledgeBase {
    /// Every recognized knowledge base, in display order.
    pub const ALL: [KnowledgeBase; 4] = [
        KnowledgeBase::Resumes,
        KnowledgeBase::ApiDocs,
        KnowledgeBase::Recipes,
        KnowledgeBase::Supplements,
    ];

    /// Stable identifier used on the wire and in storage.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Resumes => "resumes",
            Self::ApiDocs => "api_docs",
            Self::Recipes => "recipes",
            Self::Supplements => "supplements",
        }
    }

    /// Whether this knowledge base is backed by the live product catalog.
    pub fn is_product_catalog(self) -> bool {
        matches!(self, Self::Supplements)
    }
}

impl std::fmt::Display for KnowledgeBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for KnowledgeBase {
    type Err = DocMuseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kb| kb.as_str() == s)
            .ok_or_else(|| {
                DocMuseError::validation(format!(
                    "unknown knowledge base '{s}' (expected one of: resumes, api_docs, recipes, supplements)"
                ))
            })
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One chunk returned by an index query, best match first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkHit {
    /// Chunk identifier.
    pub id: String,
    /// Owning document.
    pub document_id: String,
    pub text: String,
    /// Free-form metadata attached at insert time.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Relevance distance; lower is closer.
    pub distance: f64,
}

/// A stored source document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub knowledge_base: KnowledgeBase,
    pub title: String,
    pub content: String,
    /// SHA-256 of `content`.
    pub content_hash: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A product scraped from the storefront.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    /// Deterministic id derived from the product URL.
    pub id: String,
    pub title: String,
    pub url: String,
    pub price: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub img_url: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub ingredients: Vec<String>,
    #[serde(default)]
    pub benefits: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directions: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scraped_at: Option<DateTime<Utc>>,
}

impl ProductRecord {
    /// Plain-text rendering indexed as the product's single chunk.
    pub fn to_index_text(&self) -> String {
        let mut text = format!(
            "Title: {}\nPrice: {}\nDescription: {}",
            self.title, self.price, self.description
        );
        if !self.ingredients.is_empty() {
            text.push_str(&format!("\nIngredients: {}", self.ingredients.join(", ")));
        }
        if !self.benefits.is_empty() {
            text.push_str(&format!("\nBenefits: {}", self.benefits.join(", ")));
        }
        if let Some(directions) = &self.directions {
            text.push_str(&format!("\nDirections: {directions}"));
        }
        text
    }

    /// Metadata attached to the product's document and chunk.
    pub fn index_metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "title": self.title,
            "url": self.url,
            "price": self.price,
            "img_url": self.img_url,
            "type": "product",
            "source": "cymbiotika",
        })
    }
}
