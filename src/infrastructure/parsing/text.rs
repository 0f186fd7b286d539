//! Text normalization helpers shared by the parsers

use regex::{Regex, RegexBuilder};
use scraper::ElementRef;

use crate::domain::{ConfigurationError, MAX_PRICE};

/// Map full-width digits to ASCII so prices like `１，２８０円` parse
fn to_ascii_digit(c: char) -> char {
    match c {
        '０'..='９' => char::from_u32(u32::from(c) - u32::from('０') + u32::from('0')).unwrap_or(c),
        _ => c,
    }
}

const fn is_thousands_separator(c: char) -> bool {
    matches!(c, ',' | '，')
}

/// Parse a displayed price into the smallest currency unit.
///
/// Takes the first digit run, dropping thousands separators inside it.
/// Unparsable input yields 0; values beyond [`MAX_PRICE`] saturate.
pub fn parse_price(raw: &str) -> u64 {
    raw.chars()
        .map(to_ascii_digit)
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit() || is_thousands_separator(*c))
        .filter_map(|c| c.to_digit(10))
        .fold(0_u64, |acc, digit| acc.saturating_mul(10).saturating_add(u64::from(digit)).min(MAX_PRICE))
}

/// Collapse whitespace runs and trim
pub fn normalize_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalized text content of an element
pub fn element_text(element: ElementRef<'_>) -> String {
    normalize_whitespace(&element.text().collect::<String>())
}

/// Case-insensitive alternation over literal keywords
#[derive(Debug, Clone)]
pub struct KeywordMatcher {
    pattern: Option<Regex>,
}

impl KeywordMatcher {
    pub fn new(keywords: &[String]) -> Result<Self, ConfigurationError> {
        let alternatives: Vec<String> = keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(regex::escape)
            .collect();

        if alternatives.is_empty() {
            return Ok(Self { pattern: None });
        }

        let pattern = RegexBuilder::new(&alternatives.join("|"))
            .case_insensitive(true)
            .build()
            .map_err(|e| ConfigurationError::invalid("extraction.sold_out_keywords", e.to_string()))?;

        Ok(Self { pattern: Some(pattern) })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.pattern.as_ref().is_some_and(|p| p.is_match(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("1,280円", 1280)]
    #[case("¥12,800 (税込)", 12800)]
    #[case("価格 １，９８０円", 1980)]
    #[case("1,280円 送料500円", 1280)]
    #[case("価格未定", 0)]
    #[case("", 0)]
    #[case("99999999999999999999999", MAX_PRICE)]
    #[case("9223372036854775808円", MAX_PRICE)]
    fn price_parsing(#[case] raw: &str, #[case] expected: u64) {
        assert_eq!(parse_price(raw), expected);
    }

    #[test]
    fn keywords_are_case_insensitive() {
        let matcher = KeywordMatcher::new(&["sold out".to_string(), "売り切れ".to_string()]).unwrap();
        assert!(matcher.is_match("SOLD OUT now"));
        assert!(matcher.is_match("この商品は売り切れです"));
        assert!(!matcher.is_match("in stock"));
    }

    #[test]
    fn keywords_are_literal() {
        let matcher = KeywordMatcher::new(&["(sold)".to_string()]).unwrap();
        assert!(matcher.is_match("item (SOLD)"));
        assert!(!matcher.is_match("sold"));
        assert!(!KeywordMatcher::new(&[]).unwrap().is_match("anything"));
    }

    #[test]
    fn whitespace_is_collapsed() {
        assert_eq!(normalize_whitespace("  Limited\n   Edition \t Box "), "Limited Edition Box");
    }
}
