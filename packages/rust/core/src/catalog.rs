//! Product catalog data source backed by the storefront scraper.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument};

use docmuse_scraper::{ProductScraper, store_new_products};
use docmuse_shared::{ProductRecord, Result};
use docmuse_storage::Storage;

use crate::contracts::DataSource;

/// Scrapes the storefront and stores whatever products are new.
pub struct CatalogSource {
    scraper: Arc<ProductScraper>,
    storage: Arc<Storage>,
}

impl CatalogSource {
    pub fn new(scraper: Arc<ProductScraper>, storage: Arc<Storage>) -> Self {
        Self { scraper, storage }
    }
}

#[async_trait]
impl DataSource for CatalogSource {
    #[instrument(skip_all, fields(query = %query))]
    async fn search(&self, query: &str) -> Result<Vec<ProductRecord>> {
        let result = self.scraper.search(query).await?;
        let new = store_new_products(&result.products, &self.storage).await?;
        info!(found = result.total, new = new.len(), "catalog search complete");
        Ok(new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::VectorIndex;
    use docmuse_shared::{KnowledgeBase, ScraperConfig};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SEARCH_PAGE: &str = r#"
        <div class="product-grid">
          <div class="product-card">
            <a href="/products/magnesium">
              <h3 class="product-card__title">Magnesium L-Threonate</h3>
            </a>
            <span class="price">$48.00</span>
          </div>
        </div>"#;

    const DETAIL_PAGE: &str = r#"
        <div class="product-single__description"><p>Supports restful sleep.</p></div>"#;

    async fn temp_storage() -> Arc<Storage> {
        let db = std::env::temp_dir().join(format!("docmuse_catalog_{}.db", uuid::Uuid::now_v7()));
        Arc::new(Storage::open(&db).await.unwrap())
    }

    #[tokio::test]
    async fn new_products_are_indexed_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "sleep"))
            .respond_with(ResponseTemplate::new(200).set_body_string(SEARCH_PAGE))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/products/magnesium"))
            .respond_with(ResponseTemplate::new(200).set_body_string(DETAIL_PAGE))
            .mount(&server)
            .await;

        let config = ScraperConfig {
            base_url: server.uri(),
            timeout_secs: 5,
            max_products: 5,
        };
        let scraper = Arc::new(ProductScraper::new(&config).unwrap().allow_localhost());
        let storage = temp_storage().await;
        let source = CatalogSource::new(scraper, storage.clone());

        let first = source.search("sleep").await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].title, "Magnesium L-Threonate");

        let second = source.search("sleep").await.unwrap();
        assert!(second.is_empty());

        let hits = storage
            .query("restful sleep", KnowledgeBase::Supplements, 5, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }
}
