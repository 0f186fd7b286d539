//! Parsing context shared by the page parsers

use url::Url;

use crate::domain::ExtractError;

/// Context for one extraction call
#[derive(Debug, Clone)]
pub struct ParseContext {
    /// Base URL for resolving relative links
    pub base_url: Url,
}

impl ParseContext {
    pub fn new(base_url: &str) -> Result<Self, ExtractError> {
        let base_url = Url::parse(base_url).map_err(|e| ExtractError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { base_url })
    }

    /// Resolve `href` against the base URL, dropping the fragment.
    ///
    /// Returns `None` for empty, script and non-http(s) links.
    pub fn resolve_url(&self, href: &str) -> Option<String> {
        let href = href.trim();
        if href.is_empty() || href.starts_with('#') || href.to_ascii_lowercase().starts_with("javascript:") {
            return None;
        }

        let mut resolved = self.base_url.join(href).ok()?;
        if !matches!(resolved.scheme(), "http" | "https") {
            return None;
        }
        resolved.set_fragment(None);
        Some(resolved.to_string())
    }
}
