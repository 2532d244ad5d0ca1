//! Cosmetic Resolver
//!
//! Resolves the element-hiding CSS for a page from a catalog of generic
//! selectors, per-domain selectors, per-domain raw CSS and exception
//! domains. The catalog is an immutable snapshot behind an `ArcSwap`;
//! loading a list merges it into a copy and swaps the copy in.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::walk_host_suffixes;
use crate::error::FilterError;
use crate::url::hostname;

/// Maximum selectors per generated rule block.
pub const SELECTOR_CHUNK_SIZE: usize = 100;

/// Suffix marking a `specific` key that holds raw CSS instead of selectors.
pub const EXTRA_RULES_SUFFIX: &str = ":extraRules";

/// Comment emitted ahead of raw CSS in the generated stylesheet.
pub const EXTRA_RULES_MARKER: &str = "/* extra rules */";

const HIDE_DECLARATION: &str = "{ display: none !important; }";

// =============================================================================
// Selector Validation
// =============================================================================

/// Minimal syntactic check: non-empty after trimming and starting with one
/// of `. # [ * :` or a word character.
pub fn is_valid_selector(selector: &str) -> bool {
    match selector.trim().bytes().next() {
        Some(c) => {
            matches!(c, b'.' | b'#' | b'[' | b'*' | b':') || c.is_ascii_alphanumeric() || c == b'_'
        }
        None => false,
    }
}

// =============================================================================
// Catalog
// =============================================================================

/// Immutable set of cosmetic rules.
#[derive(Debug, Clone, Default)]
pub struct CosmeticCatalog {
    generic: BTreeSet<String>,
    specific: HashMap<String, BTreeSet<String>>,
    extra: HashMap<String, Vec<String>>,
    exceptions: HashSet<String>,
    invalid_selectors: usize,
    lists_loaded: usize,
}

/// On-disk shape of a cosmetic filter list.
#[derive(Debug, Default, Deserialize)]
struct FilterListFile {
    #[serde(default)]
    generic: Vec<Value>,
    #[serde(default)]
    specific: BTreeMap<String, Value>,
    #[serde(default)]
    exceptions: Vec<Value>,
}

impl CosmeticCatalog {
    /// Parse one filter list document into a standalone catalog.
    ///
    /// `origin` is only used in error messages.
    pub fn parse(text: &str, origin: &Path) -> Result<Self, FilterError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| FilterError::FilterListParseInvalid {
                path: origin.to_path_buf(),
                reason: e.to_string(),
            })?;
        if !value.is_object() {
            return Err(FilterError::FilterListParseInvalid {
                path: origin.to_path_buf(),
                reason: "top level must be an object".to_string(),
            });
        }
        let file: FilterListFile =
            serde_json::from_value(value).map_err(|e| FilterError::FilterListParseInvalid {
                path: origin.to_path_buf(),
                reason: e.to_string(),
            })?;

        let mut catalog = Self {
            lists_loaded: 1,
            ..Self::default()
        };

        for selector in file.generic {
            if let Some(selector) = catalog.accept_selector(&selector) {
                catalog.generic.insert(selector);
            }
        }

        for (key, entries) in file.specific {
            let Value::Array(entries) = entries else {
                log::warn!(
                    "Filter list {}: entry '{}' is not an array, skipped",
                    origin.display(),
                    key
                );
                continue;
            };

            if let Some(domain) = key.strip_suffix(EXTRA_RULES_SUFFIX) {
                let domain = normalize_domain(domain);
                if domain.is_empty() {
                    continue;
                }
                let css: Vec<&str> = entries
                    .iter()
                    .filter_map(Value::as_str)
                    .filter(|css| !css.trim().is_empty())
                    .collect();
                if !css.is_empty() {
                    let rules = catalog.extra.entry(domain).or_default();
                    for css in css {
                        push_unique(rules, css);
                    }
                }
                continue;
            }

            let domain = normalize_domain(&key);
            if domain.is_empty() {
                continue;
            }
            let mut selectors = BTreeSet::new();
            for entry in &entries {
                if let Some(selector) = catalog.accept_selector(entry) {
                    selectors.insert(selector);
                }
            }
            if !selectors.is_empty() {
                catalog.specific.entry(domain).or_default().extend(selectors);
            }
        }

        for domain in file.exceptions.iter().filter_map(Value::as_str) {
            let domain = normalize_domain(domain);
            if !domain.is_empty() {
                catalog.exceptions.insert(domain);
            }
        }

        Ok(catalog)
    }

    /// Read and parse a filter list file.
    pub fn from_file(path: &Path) -> Result<Self, FilterError> {
        let text = std::fs::read_to_string(path).map_err(|source| FilterError::FilterListRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    fn accept_selector(&mut self, entry: &Value) -> Option<String> {
        match entry.as_str() {
            Some(selector) if is_valid_selector(selector) => Some(selector.trim().to_string()),
            _ => {
                log::debug!("{}", FilterError::SelectorInvalid(entry.to_string()));
                self.invalid_selectors += 1;
                None
            }
        }
    }

    /// Merge another catalog into this one.
    pub fn merge(&mut self, other: &CosmeticCatalog) {
        self.generic.extend(other.generic.iter().cloned());
        for (domain, selectors) in &other.specific {
            self.specific
                .entry(domain.clone())
                .or_default()
                .extend(selectors.iter().cloned());
        }
        for (domain, css) in &other.extra {
            let rules = self.extra.entry(domain.clone()).or_default();
            for css in css {
                push_unique(rules, css);
            }
        }
        self.exceptions.extend(other.exceptions.iter().cloned());
        self.invalid_selectors += other.invalid_selectors;
        self.lists_loaded += other.lists_loaded;
    }

    /// Whether at least one list has been loaded since the last clear.
    pub fn is_loaded(&self) -> bool {
        self.lists_loaded > 0
    }

    /// Whether the host or one of its parent domains is an exception.
    pub fn is_exception(&self, host: &str) -> bool {
        walk_host_suffixes(host).any(|suffix| self.exceptions.contains(suffix))
    }

    /// Compute the hiding CSS for a lowercase hostname.
    pub fn resolve(&self, host: &str) -> CosmeticResult {
        let mut selectors: BTreeSet<&str> = BTreeSet::new();

        if !self.is_exception(host) {
            selectors.extend(self.generic.iter().map(String::as_str));
        }

        // Least specific domain first, so more specific raw CSS comes later.
        let suffixes: Vec<&str> = walk_host_suffixes(host).collect();
        let mut raw_css: Vec<&str> = Vec::new();
        for suffix in suffixes.iter().rev() {
            if let Some(specific) = self.specific.get(*suffix) {
                selectors.extend(specific.iter().map(String::as_str));
            }
            if let Some(extra) = self.extra.get(*suffix) {
                raw_css.extend(extra.iter().map(String::as_str));
            }
        }

        if selectors.is_empty() && raw_css.is_empty() {
            return CosmeticResult::default();
        }

        let ordered: Vec<&str> = selectors.into_iter().collect();
        let mut css = ordered
            .chunks(SELECTOR_CHUNK_SIZE)
            .map(|chunk| format!("{} {}", chunk.join(", "), HIDE_DECLARATION))
            .collect::<Vec<_>>()
            .join("\n\n");

        if !raw_css.is_empty() {
            if !css.is_empty() {
                css.push_str("\n\n");
            }
            css.push_str(EXTRA_RULES_MARKER);
            css.push('\n');
            css.push_str(&raw_css.join("\n"));
        }

        CosmeticResult {
            css,
            selector_count: ordered.len(),
        }
    }

    fn stats(&self) -> CatalogCounts {
        CatalogCounts {
            generic_selectors: self.generic.len(),
            specific_domains: self.specific.len(),
            specific_selectors: self.specific.values().map(BTreeSet::len).sum(),
            extra_rule_domains: self.extra.len(),
            extra_rules: self.extra.values().map(Vec::len).sum(),
            exception_domains: self.exceptions.len(),
            invalid_selectors: self.invalid_selectors,
            lists_loaded: self.lists_loaded,
        }
    }
}

/// Append raw CSS unless the same text is already present. Keeps load order.
fn push_unique(rules: &mut Vec<String>, css: &str) {
    if !rules.iter().any(|existing| existing == css) {
        rules.push(css.to_string());
    }
}

fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_end_matches('.').to_ascii_lowercase()
}

// =============================================================================
// Results and Stats
// =============================================================================

/// CSS to inject into a page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CosmeticResult {
    pub css: String,
    pub selector_count: usize,
}

impl CosmeticResult {
    pub fn is_empty(&self) -> bool {
        self.css.is_empty()
    }
}

struct CatalogCounts {
    generic_selectors: usize,
    specific_domains: usize,
    specific_selectors: usize,
    extra_rule_domains: usize,
    extra_rules: usize,
    exception_domains: usize,
    invalid_selectors: usize,
    lists_loaded: usize,
}

/// Resolver state and catalog sizes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CosmeticStats {
    pub enabled: bool,
    pub loaded: bool,
    pub lists_loaded: usize,
    pub generic_selectors: usize,
    pub specific_domains: usize,
    pub specific_selectors: usize,
    pub extra_rule_domains: usize,
    pub extra_rules: usize,
    pub exception_domains: usize,
    pub invalid_selectors: usize,
}

// =============================================================================
// Resolver
// =============================================================================

/// The cosmetic resolver.
pub struct CosmeticResolver {
    catalog: ArcSwap<CosmeticCatalog>,
    enabled: AtomicBool,
}

impl CosmeticResolver {
    /// Create an enabled resolver with an empty catalog.
    pub fn new() -> Self {
        Self {
            catalog: ArcSwap::new(Arc::new(CosmeticCatalog::default())),
            enabled: AtomicBool::new(true),
        }
    }

    /// Load a filter list file and merge it into the catalog.
    ///
    /// Returns `false` on failure, in which case the catalog is unchanged.
    pub fn load_filter_list(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        match self.try_load_filter_list(path) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("{}", e);
                false
            }
        }
    }

    /// Like `load_filter_list`, returning the failure.
    pub fn try_load_filter_list(&self, path: &Path) -> Result<(), FilterError> {
        let parsed = CosmeticCatalog::from_file(path)?;
        log::info!(
            "Loaded cosmetic list {} ({} generic, {} domains)",
            path.display(),
            parsed.generic.len(),
            parsed.specific.len() + parsed.extra.len()
        );
        self.merge(parsed);
        Ok(())
    }

    /// Parse a filter list document and merge it into the catalog.
    pub fn load_filter_list_str(&self, text: &str) -> Result<(), FilterError> {
        let parsed = CosmeticCatalog::parse(text, &PathBuf::from("<inline>"))?;
        self.merge(parsed);
        Ok(())
    }

    fn merge(&self, parsed: CosmeticCatalog) {
        self.catalog.rcu(|current| {
            let mut next = CosmeticCatalog::clone(current);
            next.merge(&parsed);
            next
        });
    }

    /// Replace the whole catalog with one built elsewhere.
    pub fn publish(&self, catalog: CosmeticCatalog) {
        self.catalog.store(Arc::new(catalog));
    }

    /// Current catalog snapshot.
    pub fn catalog(&self) -> Arc<CosmeticCatalog> {
        self.catalog.load_full()
    }

    /// Reset to the unloaded state.
    pub fn clear(&self) {
        self.catalog.store(Arc::new(CosmeticCatalog::default()));
    }

    /// Compute the hiding CSS for a page URL. Disabled resolver or
    /// unparseable URL yields an empty result.
    pub fn get_selectors_for_url(&self, url: &str) -> CosmeticResult {
        if !self.is_enabled() {
            return CosmeticResult::default();
        }
        match ::url::Url::parse(url) {
            Ok(parsed) => self.catalog.load().resolve(&hostname(&parsed)),
            Err(e) => {
                log::debug!("Page URL '{}' is unparseable: {}; no cosmetics", url, e);
                CosmeticResult::default()
            }
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        log::info!("Cosmetic filtering {}", if enabled { "enabled" } else { "disabled" });
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn is_loaded(&self) -> bool {
        self.catalog.load().is_loaded()
    }

    pub fn stats(&self) -> CosmeticStats {
        let catalog = self.catalog.load();
        let counts = catalog.stats();
        CosmeticStats {
            enabled: self.is_enabled(),
            loaded: catalog.is_loaded(),
            lists_loaded: counts.lists_loaded,
            generic_selectors: counts.generic_selectors,
            specific_domains: counts.specific_domains,
            specific_selectors: counts.specific_selectors,
            extra_rule_domains: counts.extra_rule_domains,
            extra_rules: counts.extra_rules,
            exception_domains: counts.exception_domains,
            invalid_selectors: counts.invalid_selectors,
        }
    }
}

impl Default for CosmeticResolver {
    fn default() -> Self {
        Self::new()
    }
}
