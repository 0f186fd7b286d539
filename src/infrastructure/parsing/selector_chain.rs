//! Ordered selector fallback chains
//!
//! A chain is a list of independent patterns. Lookups walk the list in order
//! and stop at the first pattern that yields a match.

#![allow(clippy::uninlined_format_args)]

use scraper::{ElementRef, Selector};
use tracing::{debug, warn};

use super::text::element_text;
use crate::domain::ConfigurationError;

/// Compiled pattern with its source text kept for diagnostics
#[derive(Debug, Clone)]
struct Pattern {
    source: String,
    selector: Selector,
}

#[derive(Debug, Clone)]
pub struct SelectorChain {
    patterns: Vec<Pattern>,
}

impl SelectorChain {
    /// Compile `sources`, skipping invalid patterns. Fails only when nothing
    /// compiles.
    pub fn compile(field: &str, sources: &[String]) -> Result<Self, ConfigurationError> {
        let mut patterns = Vec::with_capacity(sources.len());
        let mut errors = Vec::new();

        for source in sources {
            match Selector::parse(source) {
                Ok(selector) => patterns.push(Pattern {
                    source: source.clone(),
                    selector,
                }),
                Err(e) => {
                    warn!("Failed to compile selector '{}' for {}: {}", source, field, e);
                    errors.push(format!("'{}': {}", source, e));
                }
            }
        }

        if patterns.is_empty() {
            return Err(ConfigurationError::invalid(
                field,
                format!("no valid selectors compiled ({})", errors.join(", ")),
            ));
        }

        if !errors.is_empty() {
            debug!("Some {} selectors failed to compile: {}", field, errors.join(", "));
        }

        Ok(Self { patterns })
    }

    /// Pattern sources in order
    pub fn sources(&self) -> Vec<String> {
        self.patterns.iter().map(|p| p.source.clone()).collect()
    }

    /// All matches of the first pattern that matches anything under `scope`
    pub fn first_matching<'a>(&self, scope: ElementRef<'a>) -> Option<(&str, Vec<ElementRef<'a>>)> {
        self.patterns.iter().find_map(|pattern| {
            let matches: Vec<ElementRef<'a>> = scope.select(&pattern.selector).collect();
            (!matches.is_empty()).then_some((pattern.source.as_str(), matches))
        })
    }

    /// First element matched by the first matching pattern
    pub fn first_element<'a>(&self, scope: ElementRef<'a>) -> Option<ElementRef<'a>> {
        self.patterns
            .iter()
            .find_map(|pattern| scope.select(&pattern.selector).next())
    }

    /// First non-empty text found by walking patterns and their matches in order
    pub fn first_text(&self, scope: ElementRef<'_>) -> Option<String> {
        self.patterns.iter().find_map(|pattern| {
            scope
                .select(&pattern.selector)
                .map(element_text)
                .find(|text| !text.is_empty())
        })
    }

    /// First pattern whose match count reaches `threshold`, with that count
    pub fn first_reaching(&self, scope: ElementRef<'_>, threshold: usize) -> Option<(&str, usize)> {
        self.patterns.iter().find_map(|pattern| {
            let count = scope.select(&pattern.selector).count();
            (count >= threshold.max(1)).then_some((pattern.source.as_str(), count))
        })
    }

    /// Whether `element` itself matches any pattern
    pub fn matches(&self, element: &ElementRef<'_>) -> bool {
        self.patterns.iter().any(|pattern| pattern.selector.matches(element))
    }

    /// Whether anything under `scope` matches any pattern
    pub fn any_within(&self, scope: ElementRef<'_>) -> bool {
        self.patterns
            .iter()
            .any(|pattern| scope.select(&pattern.selector).next().is_some())
    }
}
