//! HTML extraction for storefront search results and product pages.
//!
//! Storefront themes differ, so each field is looked up through a list of
//! selectors and the first match wins.

use docmuse_shared::{DocMuseError, Result};
use scraper::{ElementRef, Html, Selector};
use url::Url;
use uuid::Uuid;

/// Result-card containers, tried in order until one matches anything.
const CARD_SELECTORS: &[&str] = &[
    ".product-grid .product-card",
    ".grid-products .product",
    ".search-results .product",
    ".search-item",
    "[data-section-type='search'] .grid-product",
];

const TITLE_SELECTOR: &str = ".product-card__title, .product-title, .title";
const PRICE_SELECTOR: &str = ".product-card__price, .product-price, .price";
const LINK_SELECTOR: &str = "a.product-card__link, a.product-link, a[href*='products']";
const IMAGE_SELECTOR: &str = "img.product-card__image, img.product-image, img";
const DESCRIPTION_SELECTOR: &str = ".product-single__description";

/// Price shown when a card has none.
const MISSING_PRICE: &str = "N/A";

/// A product as listed on the search results page.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductCard {
    pub id: String,
    pub title: String,
    pub url: String,
    pub price: String,
    pub img_url: Option<String>,
}

/// Details extracted from a single product page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductPage {
    pub description: String,
    pub ingredients: Vec<String>,
    pub benefits: Vec<String>,
    pub directions: Option<String>,
}

/// Deterministic product id: UUID v5 of the product URL in the URL namespace.
pub fn product_id(url: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, url.as_bytes()).to_string()
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| DocMuseError::parse(format!("invalid selector {css:?}: {e}")))
}

/// Collapse an element's text into single-spaced words.
fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse product cards from a search results page.
///
/// Cards without a title or product link are skipped. Relative links and
/// image sources are resolved against `base_url`.
pub fn parse_search_results(html: &str, base_url: &Url) -> Result<Vec<ProductCard>> {
    let doc = Html::parse_document(html);
    let title_sel = selector(TITLE_SELECTOR)?;
    let price_sel = selector(PRICE_SELECTOR)?;
    let link_sel = selector(LINK_SELECTOR)?;
    let image_sel = selector(IMAGE_SELECTOR)?;

    let mut cards = Vec::new();
    for card_css in CARD_SELECTORS {
        let card_sel = selector(card_css)?;
        let elements: Vec<ElementRef<'_>> = doc.select(&card_sel).collect();
        if elements.is_empty() {
            continue;
        }
        tracing::debug!(selector = card_css, count = elements.len(), "matched product cards");

        for card in elements {
            let Some(title) = card.select(&title_sel).next().map(element_text) else {
                continue;
            };
            let Some(href) = card
                .select(&link_sel)
                .next()
                .and_then(|a| a.value().attr("href"))
            else {
                continue;
            };
            let Ok(url) = base_url.join(href) else {
                tracing::debug!(href, "skipping card with unresolvable link");
                continue;
            };
            if title.is_empty() {
                continue;
            }

            let price = card
                .select(&price_sel)
                .next()
                .map(element_text)
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| MISSING_PRICE.to_string());
            let img_url = card
                .select(&image_sel)
                .next()
                .and_then(|img| img.value().attr("src"))
                .and_then(|src| base_url.join(src).ok())
                .map(String::from);

            let url = url.to_string();
            cards.push(ProductCard {
                id: product_id(&url),
                title,
                url,
                price,
                img_url,
            });
        }
        break;
    }

    Ok(cards)
}

/// Extract description and the Ingredients/Benefits/Directions sections of a product page.
///
/// Sections are `h3` headings inside the description block; lists are read
/// from the next sibling element's `li` items.
pub fn parse_product_page(html: &str) -> Result<ProductPage> {
    let doc = Html::parse_document(html);
    let description_sel = selector(DESCRIPTION_SELECTOR)?;
    let heading_sel = selector("h3")?;
    let item_sel = selector("li")?;

    let Some(block) = doc.select(&description_sel).next() else {
        return Ok(ProductPage::default());
    };

    let mut page = ProductPage {
        description: element_text(block),
        ..Default::default()
    };

    for heading in block.select(&heading_sel) {
        let label = element_text(heading).to_lowercase();
        let Some(next) = heading.next_siblings().find_map(ElementRef::wrap) else {
            continue;
        };
        let items = || {
            next.select(&item_sel)
                .map(element_text)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
        };

        if label.contains("ingredients") {
            page.ingredients = items();
        } else if label.contains("benefits") {
            page.benefits = items();
        } else if label.contains("directions") {
            let text = element_text(next);
            if !text.is_empty() {
                page.directions = Some(text);
            }
        }
    }

    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://shop.test").unwrap()
    }

    const SEARCH_PAGE: &str = r#"<html><body>
        <div class="search-results">
          <div class="product">
            <a class="product-link" href="/products/magnesium">
              <span class="product-title">  Magnesium
                 L-Threonate </span>
            </a>
            <span class="price">$54.00</span>
            <img src="/cdn/mag.jpg">
          </div>
          <div class="product">
            <span class="product-title">No link here</span>
          </div>
          <div class="product">
            <a href="https://shop.test/products/sleep">
              <span class="title">Sleep Blend</span>
            </a>
          </div>
        </div>
    </body></html>"#;

    #[test]
    fn parses_cards_with_fallback_selectors() {
        let cards = parse_search_results(SEARCH_PAGE, &base()).unwrap();
        assert_eq!(cards.len(), 2);

        assert_eq!(cards[0].title, "Magnesium L-Threonate");
        assert_eq!(cards[0].url, "https://shop.test/products/magnesium");
        assert_eq!(cards[0].price, "$54.00");
        assert_eq!(cards[0].img_url.as_deref(), Some("https://shop.test/cdn/mag.jpg"));

        assert_eq!(cards[1].title, "Sleep Blend");
        assert_eq!(cards[1].price, "N/A");
        assert!(cards[1].img_url.is_none());
    }

    #[test]
    fn first_matching_card_selector_wins() {
        let html = r#"<div class="product-grid">
            <div class="product-card">
              <a class="product-card__link" href="/products/a"><p class="product-card__title">A</p></a>
            </div>
          </div>
          <div class="search-item">
            <a href="/products/b"><p class="title">B</p></a>
          </div>"#;
        let cards = parse_search_results(html, &base()).unwrap();
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].title, "A");
    }

    #[test]
    fn no_cards_is_empty() {
        let cards = parse_search_results("<html><body><p>No results</p></body></html>", &base())
            .unwrap();
        assert!(cards.is_empty());
    }

    #[test]
    fn product_id_is_stable() {
        let a = product_id("https://shop.test/products/magnesium");
        let b = product_id("https://shop.test/products/magnesium");
        let c = product_id("https://shop.test/products/zinc");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(Uuid::parse_str(&a).unwrap().get_version_num(), 5);
    }

    #[test]
    fn parses_product_sections() {
        let html = r#"<html><body>
          <div class="product-single__description">
            <p>Supports calm focus.</p>
            <h3>Ingredients</h3>
            <ul><li>Magnesium L-Threonate</li><li> Vitamin B6 </li></ul>
            <h3>Key Benefits</h3>
            <ul><li>Sleep quality</li></ul>
            <h3>Directions</h3>
            <p>Take two capsules
               before bed.</p>
          </div>
        </body></html>"#;

        let page = parse_product_page(html).unwrap();
        assert!(page.description.starts_with("Supports calm focus."));
        assert_eq!(page.ingredients, vec!["Magnesium L-Threonate", "Vitamin B6"]);
        assert_eq!(page.benefits, vec!["Sleep quality"]);
        assert_eq!(page.directions.as_deref(), Some("Take two capsules before bed."));
    }

    #[test]
    fn product_page_without_description_block() {
        let page = parse_product_page("<html><body><h1>Gone</h1></body></html>").unwrap();
        assert_eq!(page, ProductPage::default());
    }
}
