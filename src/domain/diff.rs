//! Diff results produced by one extraction run

use serde::{Deserialize, Serialize};

use super::product::Product;

/// Old/new snapshot pair for a price change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceChange {
    pub old: Product,
    pub new: Product,
}

impl PriceChange {
    /// Signed difference `new - old` in the smallest currency unit
    pub fn delta(&self) -> i128 {
        i128::from(self.new.price) - i128::from(self.old.price)
    }

    pub fn is_increase(&self) -> bool {
        self.new.price > self.old.price
    }
}

/// Classified changes of one snapshot against the state store.
///
/// A product can be in both `restocked` and `price_changed`; a product in
/// `new_items` never appears in any other list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResult {
    /// First-seen products that are in stock
    pub new_items: Vec<Product>,
    pub restocked: Vec<Product>,
    pub out_of_stock: Vec<Product>,
    pub price_changed: Vec<PriceChange>,
    /// Every existing product whose stored fields differed
    pub updated: Vec<Product>,
}

impl DiffResult {
    /// Number of alert-worthy entries
    pub fn change_count(&self) -> usize {
        self.new_items.len() + self.restocked.len() + self.out_of_stock.len() + self.price_changed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.change_count() == 0 && self.updated.is_empty()
    }

    /// Append another result, keeping category order
    pub fn merge(&mut self, other: Self) {
        self.new_items.extend(other.new_items);
        self.restocked.extend(other.restocked);
        self.out_of_stock.extend(other.out_of_stock);
        self.price_changed.extend(other.price_changed);
        self.updated.extend(other.updated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(price: u64) -> Product {
        Product::observed("Widget", "https://x.jp/s/w1", price, true)
    }

    #[test]
    fn price_change_direction() {
        let up = PriceChange { old: product(1000), new: product(1500) };
        assert!(up.is_increase());
        assert_eq!(up.delta(), 500);

        let down = PriceChange { old: product(1500), new: product(1000) };
        assert!(!down.is_increase());
        assert_eq!(down.delta(), -500);
    }

    #[test]
    fn merge_and_counts() {
        let mut total = DiffResult::default();
        assert!(total.is_empty());

        total.merge(DiffResult {
            new_items: vec![product(1)],
            updated: vec![product(2)],
            ..DiffResult::default()
        });
        assert_eq!(total.change_count(), 1);
        assert!(!total.is_empty());
    }
}
