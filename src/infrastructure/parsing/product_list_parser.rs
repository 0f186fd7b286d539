//! Listing page parser
//!
//! Locates product anchors with an ordered pattern list, then reads price and
//! stock from the enclosing item, found by walking a bounded number of
//! ancestor levels.

#![allow(clippy::uninlined_format_args)]

use std::collections::HashSet;

use scraper::{ElementRef, Html};
use tracing::{debug, warn};

use super::config::ExtractionSelectors;
use super::context::ParseContext;
use super::selector_chain::SelectorChain;
use super::text::{element_text, parse_price};
use super::StockDetector;
use crate::domain::{ConfigurationError, ExtractError, PageKind, Product};

/// Parser for listing (search result or category) pages
#[derive(Debug, Clone)]
pub struct ProductListParser {
    anchors: SelectorChain,
    containers: SelectorChain,
    prices: SelectorChain,
    stock: StockDetector,
    ancestor_depth: usize,
}

impl ProductListParser {
    pub fn with_config(selectors: &ExtractionSelectors) -> Result<Self, ConfigurationError> {
        Ok(Self {
            anchors: SelectorChain::compile("extraction.item_anchors", &selectors.item_anchors)?,
            containers: SelectorChain::compile("extraction.item_containers", &selectors.item_containers)?,
            prices: SelectorChain::compile("extraction.prices", &selectors.prices)?,
            stock: StockDetector::with_config(selectors)?,
            ancestor_depth: selectors.ancestor_depth.max(1),
        })
    }

    /// Extract every fully identified product on the page.
    ///
    /// Anchors missing a name or URL are skipped. When none remain the page is
    /// reported as a layout change.
    pub fn parse(&self, document: &Html, context: &ParseContext) -> Result<Vec<Product>, ExtractError> {
        let tried = self.anchors.sources();

        let Some((pattern, anchors)) = self.anchors.first_matching(document.root_element()) else {
            return Err(ExtractError::layout_changed(
                PageKind::Listing,
                "no product anchors matched",
                &tried,
            ));
        };
        debug!("Found {} product anchors using '{}'", anchors.len(), pattern);

        let mut seen = HashSet::new();
        let mut products = Vec::with_capacity(anchors.len());
        let mut skipped = 0_usize;

        for anchor in anchors {
            match self.extract_item(anchor, context) {
                Some(product) => {
                    if seen.insert(product.id.clone()) {
                        products.push(product);
                    } else {
                        debug!("Duplicate product {} on listing, keeping first", product.id);
                    }
                }
                None => skipped += 1,
            }
        }

        if skipped > 0 {
            warn!("Skipped {} listing anchors without name or URL", skipped);
        }

        if products.is_empty() {
            return Err(ExtractError::layout_changed(
                PageKind::Listing,
                format!("{} anchors matched '{}' but none had both name and URL", skipped, pattern),
                &tried,
            ));
        }

        Ok(products)
    }

    fn extract_item(&self, anchor: ElementRef<'_>, context: &ParseContext) -> Option<Product> {
        let url = anchor.value().attr("href").and_then(|href| context.resolve_url(href))?;

        let name = Some(element_text(anchor))
            .filter(|text| !text.is_empty())
            .or_else(|| anchor.value().attr("title").map(super::text::normalize_whitespace))
            .filter(|text| !text.is_empty())?;

        let scope = self.item_scope(anchor);
        let price = self.prices.first_text(scope).map_or(0, |text| parse_price(&text));
        let in_stock = !self.stock.is_sold_out(scope);

        Some(Product::observed(name, url, price, in_stock))
    }

    /// Nearest ancestor that is an item container, else the nearest one that
    /// holds a price, else the direct parent
    fn item_scope<'a>(&self, anchor: ElementRef<'a>) -> ElementRef<'a> {
        let ancestors: Vec<ElementRef<'a>> = anchor
            .ancestors()
            .filter_map(ElementRef::wrap)
            .take(self.ancestor_depth)
            .collect();

        ancestors
            .iter()
            .find(|element| self.containers.matches(element))
            .or_else(|| ancestors.iter().find(|element| self.prices.any_within(**element)))
            .or_else(|| ancestors.first())
            .copied()
            .unwrap_or(anchor)
    }
}
