//! Error taxonomy for loading and matching.
//!
//! None of these are fatal. Loader and resolver failures are collected as
//! diagnostics and logged; query failures resolve to the fail-open default.

use std::path::PathBuf;

/// Error type for ruleset, rule, filter-list and query failures.
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("Ruleset '{id}' not found at {}", path.display())]
    RulesetNotFound { id: String, path: PathBuf },

    #[error("Failed to read ruleset '{id}': {source}")]
    RulesetRead {
        id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Ruleset '{id}' is invalid: {reason}")]
    RulesetParseInvalid { id: String, reason: String },

    #[error("Rule #{index} in ruleset '{id}' is malformed: {reason}")]
    RuleMalformed {
        id: String,
        index: usize,
        reason: String,
    },

    #[error("Rule {rule_id} from '{source_id}' has an invalid regexFilter: {reason}")]
    RuleRegexInvalid {
        rule_id: String,
        source_id: String,
        reason: String,
    },

    #[error("Rule {rule_id} from '{source_id}' has an unknown resource type '{name}'")]
    ResourceTypeUnknown {
        rule_id: String,
        source_id: String,
        name: String,
    },

    #[error("Request URL '{url}' is unparseable: {source}")]
    RequestUrlUnparseable {
        url: String,
        #[source]
        source: ::url::ParseError,
    },

    #[error("Failed to read filter list {}: {source}", path.display())]
    FilterListRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Filter list {} is invalid: {reason}", path.display())]
    FilterListParseInvalid { path: PathBuf, reason: String },

    #[error("Selector '{0}' is invalid")]
    SelectorInvalid(String),

    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),
}

impl FilterError {
    /// Short machine-readable kind, used for grouping diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RulesetNotFound { .. } => "ruleset_not_found",
            Self::RulesetRead { .. } => "ruleset_read",
            Self::RulesetParseInvalid { .. } => "ruleset_parse_invalid",
            Self::RuleMalformed { .. } => "rule_malformed",
            Self::RuleRegexInvalid { .. } => "rule_regex_invalid",
            Self::ResourceTypeUnknown { .. } => "resource_type_unknown",
            Self::RequestUrlUnparseable { .. } => "request_url_unparseable",
            Self::FilterListRead { .. } => "filter_list_read",
            Self::FilterListParseInvalid { .. } => "filter_list_parse_invalid",
            Self::SelectorInvalid(_) => "selector_invalid",
            Self::ConfigInvalid(_) => "config_invalid",
        }
    }
}
