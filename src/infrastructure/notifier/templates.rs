//! Alert message templates

#![allow(clippy::uninlined_format_args)]

use super::{AlertMessage, RichAlert, Severity};
use crate::domain::{ExtractError, FailureCategory, PriceChange, Product};

/// Renders diff entries and failures into alert messages
#[derive(Debug, Clone)]
pub struct MessageRenderer {
    currency_symbol: String,
}

impl Default for MessageRenderer {
    fn default() -> Self {
        Self::new(crate::infrastructure::config::defaults::CURRENCY_SYMBOL)
    }
}

impl MessageRenderer {
    pub fn new(currency_symbol: impl Into<String>) -> Self {
        Self {
            currency_symbol: currency_symbol.into(),
        }
    }

    /// `¥12,345`
    pub fn price(&self, amount: u64) -> String {
        format!("{}{}", self.currency_symbol, group_thousands(amount))
    }

    fn product_alert(&self, title: &str, product: &Product, severity: Severity) -> AlertMessage {
        AlertMessage::Rich(
            RichAlert::new(title, format!("**{}**", product.name), severity)
                .with_url(&product.url)
                .with_field("価格", self.price(product.price))
                .with_field("商品コード", format!("`{}`", product.id)),
        )
    }

    pub fn new_item(&self, product: &Product) -> AlertMessage {
        self.product_alert("🆕 新商品発見", product, Severity::Info)
    }

    pub fn restock(&self, product: &Product) -> AlertMessage {
        self.product_alert("🔄 再販商品発見", product, Severity::Restock)
    }

    pub fn sold_out(&self, product: &Product) -> AlertMessage {
        self.product_alert("❌ 売り切れ", product, Severity::Warning)
    }

    pub fn price_change(&self, change: &PriceChange) -> AlertMessage {
        let (arrow, direction) = if change.is_increase() { ("📈", "値上げ") } else { ("📉", "値下げ") };
        let delta = change.delta();
        let signed_delta = format!(
            "{}{}",
            if delta >= 0 { "+" } else { "-" },
            self.price(u64::try_from(delta.unsigned_abs()).unwrap_or(u64::MAX))
        );

        AlertMessage::Rich(
            RichAlert::new(
                format!("{} 価格変更 ({})", arrow, direction),
                format!("**{}**", change.new.name),
                Severity::Price,
            )
            .with_url(&change.new.url)
            .with_field("変更前", self.price(change.old.price))
            .with_field("変更後", self.price(change.new.price))
            .with_field("差額", signed_delta),
        )
    }

    /// Critical alert for a page whose markup no longer matches
    pub fn site_structure_changed(&self, url: &str, error: &ExtractError) -> AlertMessage {
        AlertMessage::Rich(
            RichAlert::new(
                "🚨 ページ構造の変更を検出",
                "ページの構造が変更された可能性があります。ツールのメンテナンスが必要です。",
                Severity::Critical,
            )
            .with_url(url)
            .with_field("詳細", error.to_string()),
        )
    }

    /// Warning sent when most alerts of a run could not be delivered
    pub fn system_degraded(&self, failed: usize, total: usize) -> AlertMessage {
        AlertMessage::Text(format!(
            "⚠️ 通知システム劣化: {}/{} 件の通知が送信できませんでした。",
            failed, total
        ))
    }

    /// Generic failure alert by category
    pub fn failure(&self, category: FailureCategory, url: &str, detail: &str) -> AlertMessage {
        let (title, description, severity) = match category {
            FailureCategory::Storage => (
                "🛑 重大なエラー: データベース",
                "データベースに接続できません。システムを確認してください。",
                Severity::Critical,
            ),
            FailureCategory::Network => (
                "⚠️ 取得エラー",
                "ページを取得できませんでした。次回の実行で再試行します。",
                Severity::Warning,
            ),
            FailureCategory::Layout => (
                "🚨 ページ構造の変更を検出",
                "ページの構造が変更された可能性があります。ツールのメンテナンスが必要です。",
                Severity::Critical,
            ),
            FailureCategory::Notification | FailureCategory::Configuration => {
                ("⚠️ 監視エラー", "監視中にエラーが発生しました。", Severity::Warning)
            }
        };

        AlertMessage::Rich(
            RichAlert::new(title, description, severity)
                .with_url(url)
                .with_field("種別", category.as_str())
                .with_field("詳細", detail),
        )
    }
}

/// `1234567` → `1,234,567`
pub fn group_thousands(amount: u64) -> String {
    let digits = amount.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PageKind;
    use rstest::rstest;

    fn product(price: u64) -> Product {
        Product::observed("Widget", "https://item.example.jp/shop/w1/", price, true)
    }

    fn rich(message: AlertMessage) -> RichAlert {
        match message {
            AlertMessage::Rich(alert) => alert,
            AlertMessage::Text(text) => panic!("expected rich alert, got {}", text),
        }
    }

    #[rstest]
    #[case(0, "0")]
    #[case(999, "999")]
    #[case(1000, "1,000")]
    #[case(1_234_567, "1,234,567")]
    fn thousands(#[case] amount: u64, #[case] expected: &str) {
        assert_eq!(group_thousands(amount), expected);
    }

    #[test]
    fn price_change_shows_both_prices() {
        let renderer = MessageRenderer::default();
        let alert = rich(renderer.price_change(&PriceChange {
            old: product(1000),
            new: product(1500),
        }));

        assert!(alert.title.contains("値上げ"));
        assert_eq!(alert.severity, Severity::Price);
        let values: Vec<&str> = alert.fields.iter().map(|f| f.value.as_str()).collect();
        assert_eq!(values, vec!["¥1,000", "¥1,500", "+¥500"]);
    }

    #[test]
    fn price_drop_direction() {
        let alert = rich(MessageRenderer::new("$").price_change(&PriceChange {
            old: product(2000),
            new: product(1500),
        }));
        assert!(alert.title.contains("値下げ"));
        assert_eq!(alert.fields[2].value, "-$500");
    }

    #[test]
    fn severities_by_event() {
        let renderer = MessageRenderer::default();
        assert_eq!(rich(renderer.new_item(&product(1))).severity, Severity::Info);
        assert_eq!(rich(renderer.restock(&product(1))).severity, Severity::Restock);

        let layout = ExtractError::layout_changed(PageKind::Listing, "no anchors", &[]);
        let alert = rich(renderer.site_structure_changed("https://x.jp", &layout));
        assert_eq!(alert.severity, Severity::Critical);
        assert_eq!(alert.severity.color(), 0xFF0000);

        assert_eq!(
            rich(renderer.failure(FailureCategory::Network, "https://x.jp", "timeout")).severity,
            Severity::Warning
        );
    }
}
