//! Storefront product search and extraction.
//!
//! This crate provides:
//! - [`engine`]: the HTTP side ([`ProductScraper`]) plus persistence of newly
//!   discovered products into the `supplements` knowledge base
//! - [`extract`]: pure HTML extraction of search result cards and product pages

pub mod engine;
pub mod extract;

pub use engine::{ProductScraper, ProductSearchResult, store_new_products};
pub use extract::{ProductCard, ProductPage, parse_product_page, parse_search_results, product_id};
