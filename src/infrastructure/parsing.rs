//! HTML product extraction
//!
//! A page body is first classified as a listing or a single-product page,
//! then handed to the matching parser. A page that passed classification but
//! yields no usable product raises [`ExtractError::LayoutChanged`]; an empty
//! result is never returned.

#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod context;
pub mod product_detail_parser;
pub mod product_list_parser;
pub mod selector_chain;
pub mod text;

pub use config::ExtractionSelectors;
pub use context::ParseContext;
pub use product_detail_parser::ProductDetailParser;
pub use product_list_parser::ProductListParser;
pub use selector_chain::SelectorChain;

use scraper::{ElementRef, Html};
use tracing::debug;

use crate::domain::{ConfigurationError, ExtractError, PageKind, Product};
use text::{KeywordMatcher, element_text};

/// Stock exhaustion detection by class patterns and keywords
#[derive(Debug, Clone)]
pub struct StockDetector {
    classes: SelectorChain,
    keywords: KeywordMatcher,
}

impl StockDetector {
    pub fn with_config(selectors: &ExtractionSelectors) -> Result<Self, ConfigurationError> {
        Ok(Self {
            classes: SelectorChain::compile("extraction.sold_out_classes", &selectors.sold_out_classes)?,
            keywords: KeywordMatcher::new(&selectors.sold_out_keywords)?,
        })
    }

    /// Absence of every indicator means in stock
    pub fn is_sold_out(&self, scope: ElementRef<'_>) -> bool {
        self.classes.matches(&scope) || self.classes.any_within(scope) || self.keywords.is_match(&element_text(scope))
    }
}

/// Listing versus single-product classification
#[derive(Debug, Clone)]
pub struct PageClassifier {
    indicators: SelectorChain,
    threshold: usize,
}

impl PageClassifier {
    pub fn with_config(selectors: &ExtractionSelectors) -> Result<Self, ConfigurationError> {
        Ok(Self {
            indicators: SelectorChain::compile("extraction.listing_indicators", &selectors.listing_indicators)?,
            threshold: selectors.listing_threshold.max(1),
        })
    }

    pub fn classify(&self, document: &Html) -> PageKind {
        match self.indicators.first_reaching(document.root_element(), self.threshold) {
            Some((indicator, count)) => {
                debug!("Listing page: {} x '{}'", count, indicator);
                PageKind::Listing
            }
            None => PageKind::SingleProduct,
        }
    }
}

/// Turns a page body into normalized products
#[derive(Debug, Clone)]
pub struct ProductExtractor {
    classifier: PageClassifier,
    listing: ProductListParser,
    detail: ProductDetailParser,
}

impl ProductExtractor {
    pub fn new() -> Result<Self, ConfigurationError> {
        Self::with_config(&ExtractionSelectors::default())
    }

    pub fn with_config(selectors: &ExtractionSelectors) -> Result<Self, ConfigurationError> {
        Ok(Self {
            classifier: PageClassifier::with_config(selectors)?,
            listing: ProductListParser::with_config(selectors)?,
            detail: ProductDetailParser::with_config(selectors)?,
        })
    }

    /// Classify `body` and extract its products, resolving links against
    /// `base_url`
    pub fn extract(&self, body: &str, base_url: &str) -> Result<Vec<Product>, ExtractError> {
        let context = ParseContext::new(base_url)?;
        let document = Html::parse_document(body);

        let products = match self.classifier.classify(&document) {
            PageKind::Listing => self.listing.parse(&document, &context)?,
            PageKind::SingleProduct => vec![self.detail.parse(&document, &context)?],
        };

        debug!("Extracted {} products from {}", products.len(), base_url);
        Ok(products)
    }
}
