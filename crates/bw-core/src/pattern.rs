//! `urlFilter` pattern language
//!
//! - `||host...` anchors on the request hostname (equal or subdomain); the
//!   remainder after the host token is matched against `pathname + search`.
//! - A leading `|` anchors to the start of the URL, a trailing `|` to the end.
//! - `*` matches any run of characters, `^` matches one separator character
//!   or the end of the string.
//!
//! Matching is case-insensitive. Patterns are parsed once into a `UrlFilter`
//! and never fail: a pattern whose regex translation does not build falls
//! back to a substring test with the special characters stripped.

use regex::{Regex, RegexBuilder};

use crate::domain::domain_matches;
use crate::url::{hostname, is_at_separator, path_and_query};

/// Regex fragment for the `^` separator.
const SEPARATOR_CLASS: &str = "(?:[^A-Za-z0-9_.%-]|$)";

/// Characters that end the host token of a `||` pattern.
const HOST_TOKEN_END: &[char] = &['^', '/', '*', '?'];

// =============================================================================
// UrlFilter
// =============================================================================

/// A parsed `urlFilter` pattern.
#[derive(Debug, Clone)]
pub struct UrlFilter {
    kind: FilterKind,
}

#[derive(Debug, Clone)]
enum FilterKind {
    /// `||domain` with an optional remainder matched against path + query
    HostAnchored {
        domain: String,
        remainder: Option<GenericPattern>,
    },
    /// Everything else, matched against the full URL
    Generic(GenericPattern),
}

impl UrlFilter {
    /// Parse a pattern string.
    pub fn parse(pattern: &str) -> Self {
        let kind = match pattern.strip_prefix("||") {
            Some(rest) => {
                let end = rest.find(HOST_TOKEN_END).unwrap_or(rest.len());
                let remainder = &rest[end..];
                FilterKind::HostAnchored {
                    domain: rest[..end].to_ascii_lowercase(),
                    remainder: if remainder.is_empty() {
                        None
                    } else {
                        Some(GenericPattern::compile(remainder))
                    },
                }
            }
            None => FilterKind::Generic(GenericPattern::compile(pattern)),
        };
        Self { kind }
    }

    /// Whether the pattern is anchored on the request hostname.
    pub fn is_host_anchored(&self) -> bool {
        matches!(self.kind, FilterKind::HostAnchored { .. })
    }

    /// Match against a request. `host` must be lowercase; `path_and_query`
    /// is only consulted for host-anchored patterns.
    pub fn matches(&self, url: &str, host: &str, path_and_query: &str) -> bool {
        match &self.kind {
            FilterKind::HostAnchored { domain, remainder } => {
                domain_matches(host, domain)
                    && remainder.as_ref().map_or(true, |p| p.is_match(path_and_query))
            }
            FilterKind::Generic(pattern) => pattern.is_match(url),
        }
    }

    /// Match against a URL string. Unparseable URLs never match.
    pub fn matches_url(&self, url: &str) -> bool {
        match ::url::Url::parse(url) {
            Ok(parsed) => self.matches(url, &hostname(&parsed), &path_and_query(&parsed)),
            Err(_) => false,
        }
    }
}

/// Test a single `urlFilter` pattern against a URL.
///
/// ```
/// use bw_core::match_filter_pattern;
///
/// assert!(match_filter_pattern("https://ads.example.com/x", "||example.com^"));
/// assert!(match_filter_pattern("https://x.com/ad?x=1", "ad^"));
/// assert!(!match_filter_pattern("https://x.com/adx", "ad^"));
/// ```
pub fn match_filter_pattern(url: &str, pattern: &str) -> bool {
    UrlFilter::parse(pattern).matches_url(url)
}

// =============================================================================
// Generic Patterns
// =============================================================================

#[derive(Debug, Clone)]
struct GenericPattern {
    matcher: PatternMatcher,
}

#[derive(Debug, Clone)]
enum PatternMatcher {
    /// No `*` or `^`: plain case-insensitive literal with optional anchors
    Literal {
        needle: String,
        left: bool,
        right: bool,
    },
    /// Literal followed by a single trailing `^`
    LiteralSeparator { needle: String, left: bool },
    /// Translated to a regular expression
    Regex(Regex),
    /// Regex translation failed: substring with special characters stripped
    Substring(String),
}

impl GenericPattern {
    fn compile(pattern: &str) -> Self {
        let (left, rest) = match pattern.strip_prefix('|') {
            Some(rest) => (true, rest),
            None => (false, pattern),
        };
        let (right, body) = match rest.strip_suffix('|') {
            Some(body) => (true, body),
            None => (false, rest),
        };

        if !body.contains(['*', '^']) {
            return Self {
                matcher: PatternMatcher::Literal {
                    needle: body.to_string(),
                    left,
                    right,
                },
            };
        }

        if !right && !body.contains('*') {
            if let Some(needle) = body.strip_suffix('^').filter(|n| !n.contains('^')) {
                return Self {
                    matcher: PatternMatcher::LiteralSeparator {
                        needle: needle.to_string(),
                        left,
                    },
                };
            }
        }

        let matcher = match build_regex(body, left, right) {
            Ok(regex) => PatternMatcher::Regex(regex),
            Err(e) => {
                log::warn!("urlFilter '{}' did not translate to a regex: {}", pattern, e);
                let stripped: String = pattern
                    .chars()
                    .filter(|c| !matches!(c, '*' | '^' | '|'))
                    .collect();
                PatternMatcher::Substring(stripped)
            }
        };
        Self { matcher }
    }

    fn is_match(&self, haystack: &str) -> bool {
        match &self.matcher {
            PatternMatcher::Literal { needle, left, right } => {
                let hay = haystack.as_bytes();
                let needle = needle.as_bytes();
                match (left, right) {
                    (true, true) => hay.eq_ignore_ascii_case(needle),
                    (true, false) => starts_with_ignore_case(hay, needle),
                    (false, true) => ends_with_ignore_case(hay, needle),
                    (false, false) => find_case_insensitive(hay, needle).is_some(),
                }
            }
            PatternMatcher::LiteralSeparator { needle, left } => {
                let len = needle.len();
                if *left {
                    starts_with_ignore_case(haystack.as_bytes(), needle.as_bytes())
                        && is_at_separator(haystack, len)
                } else {
                    find_all_case_insensitive(haystack.as_bytes(), needle.as_bytes())
                        .any(|i| is_at_separator(haystack, i + len))
                }
            }
            PatternMatcher::Regex(regex) => regex.is_match(haystack),
            PatternMatcher::Substring(needle) => {
                find_case_insensitive(haystack.as_bytes(), needle.as_bytes()).is_some()
            }
        }
    }
}

fn build_regex(body: &str, left: bool, right: bool) -> Result<Regex, regex::Error> {
    let mut source = String::with_capacity(body.len() * 2 + 2);
    if left {
        source.push('^');
    }
    let mut buf = [0u8; 4];
    for ch in body.chars() {
        match ch {
            '*' => source.push_str(".*"),
            '^' => source.push_str(SEPARATOR_CLASS),
            _ => source.push_str(&regex::escape(ch.encode_utf8(&mut buf))),
        }
    }
    if right {
        source.push('$');
    }
    RegexBuilder::new(&source).case_insensitive(true).build()
}

fn starts_with_ignore_case(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.len() >= needle.len() && haystack[..needle.len()].eq_ignore_ascii_case(needle)
}

fn ends_with_ignore_case(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.len() >= needle.len()
        && haystack[haystack.len() - needle.len()..].eq_ignore_ascii_case(needle)
}

fn find_case_insensitive(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    if needle.len() > haystack.len() {
        return None;
    }

    let last = haystack.len() - needle.len();
    (0..=last).find(|&i| haystack[i..i + needle.len()].eq_ignore_ascii_case(needle))
}

fn find_all_case_insensitive<'a>(
    haystack: &'a [u8],
    needle: &'a [u8],
) -> impl Iterator<Item = usize> + 'a {
    let last = haystack.len().checked_sub(needle.len());
    (0..last.map_or(0, |l| l + 1))
        .filter(move |&i| haystack[i..i + needle.len()].eq_ignore_ascii_case(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_anchor_matches_domain_and_subdomains() {
        let filter = UrlFilter::parse("||ads.example.com^");
        assert!(filter.is_host_anchored());
        assert!(filter.matches_url("https://ads.example.com/x"));
        assert!(filter.matches_url("https://sub.ads.example.com/y"));
        assert!(filter.matches_url("https://ads.example.com"));
        assert!(!filter.matches_url("https://notads.example.com"));
        assert!(!filter.matches_url("https://example.com/ads.example.com"));
    }

    #[test]
    fn host_anchor_remainder_matches_path_and_query() {
        let filter = UrlFilter::parse("||example.com/banner/*.gif");
        assert!(filter.matches_url("https://cdn.example.com/banner/top.gif"));
        assert!(!filter.matches_url("https://cdn.example.com/logo/top.gif"));
        assert!(!filter.matches_url("https://other.com/banner/top.gif"));

        let filter = UrlFilter::parse("||example.com?track=");
        assert!(filter.matches_url("https://example.com/?track=1"));
        assert!(!filter.matches_url("https://example.com/?other=1"));
    }

    #[test]
    fn wildcard_matches_any_run() {
        assert!(match_filter_pattern("https://x.com/a*b", "a*b"));
        assert!(match_filter_pattern("https://x.com/a123b", "a*b"));
        assert!(match_filter_pattern("https://x.com/path/ab", "a*b"));
        assert!(!match_filter_pattern("https://x.com/only-b", "q*z"));
    }

    #[test]
    fn separator_matches_non_word_or_end() {
        assert!(match_filter_pattern("https://x.com/ad?x=1", "ad^"));
        assert!(match_filter_pattern("https://x.com/ad", "ad^"));
        assert!(match_filter_pattern("https://x.com/ad/", "ad^"));
        assert!(!match_filter_pattern("https://x.com/adx", "ad^"));
        assert!(!match_filter_pattern("https://x.com/ad-x", "/ad^"));
        assert!(!match_filter_pattern("https://x.com/ad.js", "/ad^"));
    }

    #[test]
    fn left_and_right_anchors() {
        assert!(match_filter_pattern("https://example.com/a", "|https://"));
        assert!(!match_filter_pattern("http://x.com/?u=https://", "|https://"));
        assert!(match_filter_pattern("https://example.com/tracker.js", ".js|"));
        assert!(!match_filter_pattern("https://example.com/tracker.js?v=1", ".js|"));
        assert!(match_filter_pattern("https://example.com/ads/x.js", "|https://*/ads/*.js|"));
        assert!(!match_filter_pattern("https://example.com/ads/x.json", "|https://*/ads/*.js|"));
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert!(match_filter_pattern("https://example.com/AdServer/x", "/adserver/"));
        assert!(match_filter_pattern("https://ADS.Example.com/x", "||ads.example.com^"));
        assert!(match_filter_pattern("https://example.com/Banner_1", "banner*1"));
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        assert!(match_filter_pattern("https://x.com/a.b*c", "a.b"));
        assert!(!match_filter_pattern("https://x.com/axb", "a.b^"));
        assert!(match_filter_pattern("https://x.com/p(1)/q", "(1)*q"));
        assert!(match_filter_pattern("https://x.com/p?q=1+2", "q=1+2"));
    }

    #[test]
    fn trailing_separator_checks_every_occurrence() {
        assert!(match_filter_pattern("https://x.com/adx/ad/", "/ad^"));
        assert!(match_filter_pattern("https://x.com/AD", "/ad^"));
        assert!(!match_filter_pattern("https://x.com/adx/adz", "/ad^"));
        assert!(match_filter_pattern("https://x.com/", "|https://x.com^"));
        assert!(!match_filter_pattern("https://x.company/", "|https://x.com^"));
        assert!(match_filter_pattern("https://x.com/a^", "a^^"));
    }

    #[test]
    fn unparseable_url_never_matches() {
        assert!(!match_filter_pattern("not a url", "url"));
    }
}
