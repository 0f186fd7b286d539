//! Extraction configuration
//!
//! Centralized CSS selector lists for page classification and product
//! extraction. Every list is an ordered fallback chain: the first pattern that
//! matches wins.

use serde::{Deserialize, Serialize};

/// Ancestor levels searched around a listing anchor
pub const DEFAULT_ANCESTOR_DEPTH: usize = 4;

/// Repeated containers needed to classify a page as a listing
pub const DEFAULT_LISTING_THRESHOLD: usize = 1;

/// Selector lists and thresholds used by the extractor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSelectors {
    /// Structural indicators of a listing page, tested in order
    pub listing_indicators: Vec<String>,

    /// Minimum indicator matches for the listing classification
    pub listing_threshold: usize,

    /// Product anchor patterns on listing pages
    pub item_anchors: Vec<String>,

    /// Elements that enclose exactly one listing item
    pub item_containers: Vec<String>,

    /// Price element patterns
    pub prices: Vec<String>,

    /// Class-based stock exhaustion indicators
    pub sold_out_classes: Vec<String>,

    /// Text-based stock exhaustion indicators (matched case-insensitively)
    pub sold_out_keywords: Vec<String>,

    /// Name patterns on a single-product page
    pub detail_names: Vec<String>,

    /// Price patterns on a single-product page
    pub detail_prices: Vec<String>,

    /// How far up from an anchor price and stock are searched
    pub ancestor_depth: usize,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}

impl Default for ExtractionSelectors {
    fn default() -> Self {
        Self {
            listing_indicators: strings(&[
                ".searchresultitem",
                ".item-grid",
                "[data-automation-id=\"searchResultItem\"]",
                ".product-item",
                "a.category_itemnamelink",
            ]),
            listing_threshold: DEFAULT_LISTING_THRESHOLD,
            item_anchors: strings(&[
                "a.category_itemnamelink",
                ".item-name a",
                ".item-title a",
                "h3 a",
                "h2 a",
                ".product-name a",
                "a[title]",
            ]),
            item_containers: strings(&[
                ".searchresultitem",
                "[data-automation-id=\"searchResultItem\"]",
                ".product-item",
                "tr",
                "li",
                "article",
            ]),
            prices: strings(&[
                ".category_itemprice",
                ".item-price",
                ".price",
                ".item-tax-price",
                "[data-automation-id=\"itemPrice\"]",
                ".rs-price",
            ]),
            sold_out_classes: strings(&[
                ".soldout",
                ".soldOut",
                ".sold-out",
                ".iconSoldout",
                ".stock-out",
                "[data-automation-id=\"soldOut\"]",
                ".unavailable",
            ]),
            sold_out_keywords: strings(&["売り切れ", "在庫切れ", "完売", "販売終了", "sold out", "out of stock"]),
            detail_names: strings(&[
                "h1.item_name",
                "h1[data-automation-id=\"itemName\"]",
                "h1.product-title",
                ".item-name h1",
                "h1",
            ]),
            detail_prices: strings(&[
                ".item_price",
                "[data-automation-id=\"itemPrice\"]",
                ".price-value",
                ".item-tax-price",
                ".rs-price",
            ]),
            ancestor_depth: DEFAULT_ANCESTOR_DEPTH,
        }
    }
}
