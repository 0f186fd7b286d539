//! Product observations and persisted product state
//!
//! A [`Product`] is one observation taken from one snapshot. A
//! [`ProductState`] is the persisted record kept per identity across scrapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use url::Url;

/// Length of the hex prefix used for hash-derived identities
const HASH_IDENTITY_LEN: usize = 16;

/// Largest representable price; every backend stores it losslessly
pub const MAX_PRICE: u64 = i64::MAX.unsigned_abs();

/// Saturate a price at [`MAX_PRICE`]
pub const fn clamp_price(price: u64) -> u64 {
    if price > MAX_PRICE { MAX_PRICE } else { price }
}

/// Product observed in a single snapshot.
///
/// Equality and hashing only look at `id`; every other field is an
/// observation that may change between scrapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    /// Price in the smallest currency unit
    pub price: u64,
    pub url: String,
    pub in_stock: bool,
}

impl Product {
    /// Build an observation, deriving the identity from the URL
    pub fn observed(name: impl Into<String>, url: impl Into<String>, price: u64, in_stock: bool) -> Self {
        let name = name.into();
        let url = url.into();
        Self {
            id: derive_identity(&url, &name),
            name,
            price: clamp_price(price),
            url,
            in_stock,
        }
    }
}

impl PartialEq for Product {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Product {}

impl Hash for Product {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Derive the stable identity of a product.
///
/// Uses the last non-empty path segment of the canonical URL. Falls back to a
/// content hash of the URL (or of `fallback` when the URL is empty).
pub fn derive_identity(url: &str, fallback: &str) -> String {
    if let Ok(parsed) = Url::parse(url) {
        if let Some(segment) = parsed
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        {
            return segment.to_string();
        }
    }

    let source = if url.trim().is_empty() { fallback } else { url };
    hash_identity(source)
}

fn hash_identity(source: &str) -> String {
    let digest = blake3::hash(source.as_bytes()).to_hex();
    digest.as_str()[..HASH_IDENTITY_LEN].to_string()
}

/// Persisted state for one product identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductState {
    pub id: String,
    pub url: String,
    pub name: String,
    pub price: u64,
    pub in_stock: bool,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub stock_change_count: u32,
    pub price_change_count: u32,
}

/// Field-level changes produced by [`ProductState::observe`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Observation {
    /// Previous in-stock flag when it flipped
    pub stock_flipped_from: Option<bool>,
    /// Previous price when it differed
    pub previous_price: Option<u64>,
    pub name_changed: bool,
    pub url_changed: bool,
}

impl Observation {
    pub const fn restocked(&self) -> bool {
        matches!(self.stock_flipped_from, Some(false))
    }

    pub const fn sold_out(&self) -> bool {
        matches!(self.stock_flipped_from, Some(true))
    }

    pub const fn price_changed(&self) -> bool {
        self.previous_price.is_some()
    }

    /// Whether anything differs from the stored state
    pub const fn any(&self) -> bool {
        self.stock_flipped_from.is_some() || self.previous_price.is_some() || self.name_changed || self.url_changed
    }
}

impl ProductState {
    /// State for an identity seen for the first time
    pub fn first_observed(product: &Product, now: DateTime<Utc>) -> Self {
        Self {
            id: product.id.clone(),
            url: product.url.clone(),
            name: product.name.clone(),
            price: clamp_price(product.price),
            in_stock: product.in_stock,
            first_seen_at: now,
            last_seen_at: now,
            stock_change_count: 0,
            price_change_count: 0,
        }
    }

    /// Apply a new observation and report what changed.
    ///
    /// Comparisons happen against the values stored before this call. The
    /// last-seen timestamp always advances and never moves behind first-seen.
    pub fn observe(&mut self, product: &Product, now: DateTime<Utc>) -> Observation {
        let mut observation = Observation::default();

        if self.in_stock != product.in_stock {
            observation.stock_flipped_from = Some(self.in_stock);
            self.in_stock = product.in_stock;
            self.stock_change_count = self.stock_change_count.saturating_add(1);
        }

        let price = clamp_price(product.price);
        if self.price != price {
            observation.previous_price = Some(self.price);
            self.price = price;
            self.price_change_count = self.price_change_count.saturating_add(1);
        }

        if self.name != product.name {
            observation.name_changed = true;
            self.name.clone_from(&product.name);
        }

        if self.url != product.url {
            observation.url_changed = true;
            self.url.clone_from(&product.url);
        }

        self.last_seen_at = now.max(self.last_seen_at).max(self.first_seen_at);
        observation
    }

    /// Current stored values as a product snapshot
    pub fn snapshot(&self) -> Product {
        Product {
            id: self.id.clone(),
            name: self.name.clone(),
            price: self.price,
            url: self.url.clone(),
            in_stock: self.in_stock,
        }
    }
}
