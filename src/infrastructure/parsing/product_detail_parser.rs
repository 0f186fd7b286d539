//! Single-product page parser

use scraper::Html;
use tracing::debug;

use super::config::ExtractionSelectors;
use super::context::ParseContext;
use super::selector_chain::SelectorChain;
use super::text::parse_price;
use super::StockDetector;
use crate::domain::{ConfigurationError, ExtractError, PageKind, Product};

/// Parser for product detail pages. The name is mandatory; price and stock
/// fall back to 0 and in-stock.
#[derive(Debug, Clone)]
pub struct ProductDetailParser {
    names: SelectorChain,
    prices: SelectorChain,
    stock: StockDetector,
}

impl ProductDetailParser {
    pub fn with_config(selectors: &ExtractionSelectors) -> Result<Self, ConfigurationError> {
        Ok(Self {
            names: SelectorChain::compile("extraction.detail_names", &selectors.detail_names)?,
            prices: SelectorChain::compile("extraction.detail_prices", &selectors.detail_prices)?,
            stock: StockDetector::with_config(selectors)?,
        })
    }

    pub fn parse(&self, document: &Html, context: &ParseContext) -> Result<Product, ExtractError> {
        let root = document.root_element();

        let name = self.names.first_text(root).ok_or_else(|| {
            ExtractError::layout_changed(PageKind::SingleProduct, "product name not found", &self.names.sources())
        })?;

        let price = self.prices.first_text(root).map_or(0, |text| parse_price(&text));
        let in_stock = !self.stock.is_sold_out(root);
        debug!("Parsed single product '{}' (price {}, in stock {})", name, price, in_stock);

        let mut url = context.base_url.clone();
        url.set_fragment(None);
        Ok(Product::observed(name, url.to_string(), price, in_stock))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(html: &str) -> Result<Product, ExtractError> {
        let parser = ProductDetailParser::with_config(&ExtractionSelectors::default()).unwrap();
        let context = ParseContext::new("https://item.example.jp/shop/gadget-7/#top").unwrap();
        parser.parse(&Html::parse_document(html), &context)
    }

    #[test]
    fn extracts_single_product() {
        let product = parse(
            r#"<h1 class="item_name">Gadget 7</h1><div class="item_price">価格 5,980円</div>"#,
        )
        .unwrap();
        assert_eq!(product.id, "gadget-7");
        assert_eq!(product.url, "https://item.example.jp/shop/gadget-7/");
        assert_eq!(product.price, 5980);
        assert!(product.in_stock);
    }

    #[test]
    fn sold_out_keyword_anywhere_on_page() {
        let product = parse(r#"<h1>Gadget 7</h1><p>Sorry, this item is SOLD OUT.</p>"#).unwrap();
        assert!(!product.in_stock);
        assert_eq!(product.price, 0);
    }

    #[test]
    fn missing_name_is_layout_change() {
        let err = parse(r#"<div class="item_price">5,980円</div>"#).unwrap_err();
        match err {
            ExtractError::LayoutChanged {
                page_kind,
                tried_selectors,
                ..
            } => {
                assert_eq!(page_kind, PageKind::SingleProduct);
                assert!(tried_selectors.contains(&"h1".to_string()));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
