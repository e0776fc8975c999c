//! HTTP product search against the storefront.
//!
//! A search fetches the storefront's search page, extracts result cards, and
//! then visits up to `max_products` product pages for details. A product page
//! that fails to load still yields the card's basic fields.

use std::net::IpAddr;
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use url::Url;

use docmuse_shared::{DocMuseError, KnowledgeBase, ProductRecord, Result, ScraperConfig};
use docmuse_storage::Storage;

use crate::extract::{ProductCard, parse_product_page, parse_search_results};

/// User-Agent string for storefront requests.
const USER_AGENT: &str = concat!("DocMuse/", env!("CARGO_PKG_VERSION"));

/// Description used when a product page cannot be read.
/// Upper bound on detail pages visited by one catalog refresh.
const CATALOG_MAX_PRODUCTS: usize = 200;

const DETAILS_UNAVAILABLE: &str = "Product details could not be retrieved.";

// ---------------------------------------------------------------------------
// ProductSearchResult
// ---------------------------------------------------------------------------

/// Products found for one search query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductSearchResult {
    pub query: String,
    pub products: Vec<ProductRecord>,
    pub total: usize,
    pub scraped_at: chrono::DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// ProductScraper
// ---------------------------------------------------------------------------

/// Storefront search client.
pub struct ProductScraper {
    base_url: Url,
    max_products: usize,
    client: Client,
    /// Allow localhost/private IPs (for integration tests with mock servers).
    allow_localhost: bool,
}

impl ProductScraper {
    /// Create a scraper for the configured storefront.
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            DocMuseError::config(format!("invalid scraper base_url {:?}: {e}", config.base_url))
        })?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DocMuseError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            max_products: config.max_products,
            client,
            allow_localhost: false,
        })
    }

    /// Allow fetching localhost/private IPs (for integration tests).
    pub fn allow_localhost(mut self) -> Self {
        self.allow_localhost = true;
        self
    }

    /// The storefront search URL for `query`.
    pub fn search_url(&self, query: &str) -> Result<Url> {
        let mut url = self
            .base_url
            .join("/search")
            .map_err(|e| DocMuseError::config(format!("invalid search url: {e}")))?;
        url.query_pairs_mut().append_pair("q", query);
        Ok(url)
    }

    /// The storefront listing of every product.
    pub fn catalog_url(&self) -> Result<Url> {
        self.base_url
            .join("/collections/all")
            .map_err(|e| DocMuseError::config(format!("invalid catalog url: {e}")))
    }

    /// Search the storefront and return detailed product records.
    ///
    /// An empty result is not an error. Failure to load the search page is
    /// a retryable [`DocMuseError::Scraper`].
    #[instrument(skip_all, fields(query = %query))]
    pub async fn search(&self, query: &str) -> Result<ProductSearchResult> {
        let url = self.search_url(query)?;
        self.scrape_listing(&url, query, self.max_products).await
    }

    /// Walk the full catalog listing, for background refreshes.
    #[instrument(skip_all)]
    pub async fn catalog(&self) -> Result<ProductSearchResult> {
        let url = self.catalog_url()?;
        self.scrape_listing(&url, "", CATALOG_MAX_PRODUCTS).await
    }

    async fn scrape_listing(
        &self,
        url: &Url,
        query: &str,
        limit: usize,
    ) -> Result<ProductSearchResult> {
        let body = self.fetch(url).await?;
        let cards = parse_search_results(&body, &self.base_url)?;
        info!(cards = cards.len(), "parsed product listing");

        let mut products = Vec::new();
        for card in cards.into_iter().take(limit) {
            products.push(self.fetch_details(card).await);
        }

        Ok(ProductSearchResult {
            query: query.to_string(),
            total: products.len(),
            products,
            scraped_at: Utc::now(),
        })
    }

    /// Visit a product page; fall back to the card fields if it fails.
    async fn fetch_details(&self, card: ProductCard) -> ProductRecord {
        let page = match Url::parse(&card.url) {
            Ok(url) => match self.fetch(&url).await {
                Ok(body) => parse_product_page(&body),
                Err(e) => Err(e),
            },
            Err(e) => Err(DocMuseError::parse(format!("{}: {e}", card.url))),
        };

        let mut record = ProductRecord {
            id: card.id,
            title: card.title,
            url: card.url,
            price: card.price,
            img_url: card.img_url,
            scraped_at: Some(Utc::now()),
            ..Default::default()
        };

        match page {
            Ok(page) => {
                record.description = page.description;
                record.ingredients = page.ingredients;
                record.benefits = page.benefits;
                record.directions = page.directions;
            }
            Err(e) => {
                warn!(url = %record.url, error = %e, "product details unavailable");
                record.description = DETAILS_UNAVAILABLE.to_string();
            }
        }
        record
    }

    async fn fetch(&self, url: &Url) -> Result<String> {
        if !self.allow_localhost && is_ssrf_target(url) {
            warn!(%url, "SSRF protection: blocked");
            return Err(DocMuseError::Scraper(format!("{url}: blocked address")));
        }
        debug!(%url, "fetching");

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| DocMuseError::Scraper(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DocMuseError::Scraper(format!("{url}: HTTP {status}")));
        }

        response
            .text()
            .await
            .map_err(|e| DocMuseError::Scraper(format!("{url}: body read failed: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Save products not yet stored as `supplements` documents, each with one
/// indexed chunk. Returns the products that were new.
#[instrument(skip_all, fields(products = products.len()))]
pub async fn store_new_products(
    products: &[ProductRecord],
    storage: &Storage,
) -> Result<Vec<ProductRecord>> {
    let mut stored = Vec::new();
    for product in products {
        if storage.document_exists(&product.id).await? {
            debug!(id = %product.id, "product already stored");
            continue;
        }
        let ingested = storage
            .ingest_document(
                Some(&product.id),
                KnowledgeBase::Supplements,
                &product.title,
                &product.to_index_text(),
                &product.index_metadata(),
            )
            .await?;
        // another search may have stored it since the check above
        if ingested.created {
            stored.push(product.clone());
        }
    }
    info!(new = stored.len(), "stored products");
    Ok(stored)
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Check if a URL targets a potentially dangerous resource.
fn is_ssrf_target(url: &Url) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    if let Some(host) = url.host_str() {
        let bare = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = bare.parse::<IpAddr>() {
            return is_private_ip(&ip);
        }
        if host == "localhost" || host.ends_with(".local") || host.ends_with(".internal") {
            return true;
        }
    }

    false
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}
