//! Domain utilities: base-domain extraction and suffix matching
//!
//! The base domain is a simplified eTLD+1: strip `www.`, keep the last two
//! labels, or the last three when the second-level label is one of a short
//! list of generic registry labels (`co.uk`, `com.au`, ...).
//!
//! This is NOT a Public Suffix List implementation. Hosts under private or
//! country-specific suffixes that are not in the list (`github.io`,
//! `ne.jp`, `blogspot.com`) are classified by their last two labels, so
//! two unrelated sites there compare as same-party.
//!
//! # Examples
//!
//! ```
//! use bw_core::domain::base_domain;
//!
//! assert_eq!(base_domain("sub.example.com"), "example.com");
//! assert_eq!(base_domain("sub.example.co.uk"), "example.co.uk");
//! ```

/// Second-level labels that need a three-label base domain.
const SECOND_LEVEL_LABELS: &[&str] = &["co", "com", "net", "org", "gov", "edu"];

// =============================================================================
// Base Domain Extraction
// =============================================================================

/// Get the simplified base domain (registrable domain) for a hostname.
pub fn base_domain(host: &str) -> String {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);

    let labels: Vec<&str> = host.split('.').collect();
    base_domain_from_labels(&labels)
}

fn base_domain_from_labels(labels: &[&str]) -> String {
    let n = labels.len();
    if n <= 2 {
        return labels.join(".");
    }

    if SECOND_LEVEL_LABELS.contains(&labels[n - 2]) {
        return labels[n - 3..].join(".");
    }

    labels[n - 2..].join(".")
}

/// Check if a request is third-party relative to its initiator.
///
/// A request without an initiator host is first-party.
pub fn is_third_party(request_host: &str, initiator_host: Option<&str>) -> bool {
    match initiator_host {
        Some(initiator) if !initiator.is_empty() => {
            base_domain(request_host) != base_domain(initiator)
        }
        _ => false,
    }
}

// =============================================================================
// Suffix Matching
// =============================================================================

/// Check whether `host` equals `domain` or is one of its subdomains.
///
/// Both sides are expected to be lowercase already.
#[inline]
pub fn domain_matches(host: &str, domain: &str) -> bool {
    if domain.is_empty() {
        return false;
    }
    if host.len() == domain.len() {
        return host == domain;
    }
    host.len() > domain.len()
        && host.ends_with(domain)
        && host.as_bytes()[host.len() - domain.len() - 1] == b'.'
}

/// Check whether `host` is covered by any domain in `list`.
#[inline]
pub fn matches_any(host: &str, list: &[String]) -> bool {
    list.iter().any(|domain| domain_matches(host, domain))
}

/// Get the parent domain (strip leftmost label).
pub fn get_parent_domain(host: &str) -> Option<&str> {
    match host.find('.') {
        Some(idx) if idx < host.len() - 1 => Some(&host[idx + 1..]),
        _ => None,
    }
}

/// Iterator for suffix-walking a host from the full name to its last label.
pub struct HostSuffixIter<'a> {
    current: Option<&'a str>,
}

impl<'a> Iterator for HostSuffixIter<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let result = self.current?;
        self.current = get_parent_domain(result);
        Some(result)
    }
}

/// Walk host suffixes from most specific to least specific.
///
/// `ads.example.com` yields `ads.example.com`, `example.com`, `com`.
pub fn walk_host_suffixes(host: &str) -> HostSuffixIter<'_> {
    HostSuffixIter {
        current: if host.is_empty() { None } else { Some(host) },
    }
}
