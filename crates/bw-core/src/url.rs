//! Request URL helpers
//!
//! Parsing goes through the `url` crate; the separator test works directly
//! on bytes of the string being matched.

use ::url::Url;

use crate::error::FilterError;

// =============================================================================
// Parsing
// =============================================================================

/// Parse a URL, mapping failure onto the filter error taxonomy.
pub fn parse_url(raw: &str) -> Result<Url, FilterError> {
    Url::parse(raw).map_err(|source| FilterError::RequestUrlUnparseable {
        url: raw.to_string(),
        source,
    })
}

/// Lowercased hostname of a parsed URL without a trailing root dot, empty
/// when the URL has no host.
#[inline]
pub fn hostname(url: &Url) -> String {
    url.host_str()
        .unwrap_or("")
        .trim_end_matches('.')
        .to_ascii_lowercase()
}

/// Hostname of a URL string, if it parses and has a host.
pub fn extract_host(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    let host = hostname(&url);
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

/// `pathname + search` of a parsed URL. An empty query contributes nothing.
pub fn path_and_query(url: &Url) -> String {
    let path = url.path();
    match url.query() {
        Some(query) if !query.is_empty() => {
            let mut out = String::with_capacity(path.len() + query.len() + 1);
            out.push_str(path);
            out.push('?');
            out.push_str(query);
            out
        }
        _ => path.to_string(),
    }
}

// =============================================================================
// Separator Check
// =============================================================================

/// Check if a byte is a `^` separator character.
/// Separators are anything except alphanumerics and `_ . % -`.
#[inline]
pub fn is_separator_char(c: u8) -> bool {
    !(c.is_ascii_alphanumeric() || c == b'_' || c == b'.' || c == b'%' || c == b'-')
}

/// Check if position in string is at a separator. End of string counts.
#[inline]
pub fn is_at_separator(s: &str, pos: usize) -> bool {
    match s.as_bytes().get(pos) {
        Some(&c) => is_separator_char(c),
        None => true,
    }
}
