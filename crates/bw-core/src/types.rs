//! Core type definitions for Blockwise
//!
//! The rule model follows the Declarative-Net-Request JSON shape. Rules are
//! deserialized once, compiled once, then shared immutably by the engine.

use std::fmt;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::FilterError;
use crate::pattern::UrlFilter;

// =============================================================================
// Rule Actions
// =============================================================================

/// Action to take for a matched rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    /// Exception rule - allows the request
    Allow,
    /// Block rule - cancels the request
    Block,
    /// Redirect rule - the target is passed through to the host untouched
    Redirect,
}

impl RuleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Block => "block",
            Self::Redirect => "redirect",
        }
    }
}

/// Redirect target carried by a redirect rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Redirect {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension_path: Option<String>,
}

// =============================================================================
// Request Types (bit mask for type filtering)
// =============================================================================

bitflags::bitflags! {
    /// Platform-neutral request type mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceType: u32 {
        const MAIN_FRAME = 1 << 0;
        const SUB_FRAME = 1 << 1;
        const STYLESHEET = 1 << 2;
        const SCRIPT = 1 << 3;
        const IMAGE = 1 << 4;
        const FONT = 1 << 5;
        const OBJECT = 1 << 6;
        const XMLHTTPREQUEST = 1 << 7;
        const PING = 1 << 8;
        const CSP_REPORT = 1 << 9;
        const MEDIA = 1 << 10;
        const WEBSOCKET = 1 << 11;
        const WEBTRANSPORT = 1 << 12;
        const WEBBUNDLE = 1 << 13;
        const OTHER = 1 << 14;

        /// All request types
        const ALL = 0x7FFF;
    }
}

impl ResourceType {
    /// Parse a neutral (DNR) resource type name as used in rule files.
    pub fn from_dnr_name(name: &str) -> Option<Self> {
        match name {
            "main_frame" => Some(Self::MAIN_FRAME),
            "sub_frame" => Some(Self::SUB_FRAME),
            "stylesheet" => Some(Self::STYLESHEET),
            "script" => Some(Self::SCRIPT),
            "image" => Some(Self::IMAGE),
            "font" => Some(Self::FONT),
            "object" => Some(Self::OBJECT),
            "xmlhttprequest" => Some(Self::XMLHTTPREQUEST),
            "ping" => Some(Self::PING),
            "csp_report" => Some(Self::CSP_REPORT),
            "media" => Some(Self::MEDIA),
            "websocket" => Some(Self::WEBSOCKET),
            "webtransport" => Some(Self::WEBTRANSPORT),
            "webbundle" => Some(Self::WEBBUNDLE),
            "other" => Some(Self::OTHER),
            _ => None,
        }
    }

    /// Map a host (platform) request type onto the neutral set.
    /// Unknown names map to `OTHER`.
    pub fn from_platform(name: &str) -> Self {
        match name {
            "mainFrame" | "main_frame" | "document" => Self::MAIN_FRAME,
            "subFrame" | "sub_frame" | "subdocument" => Self::SUB_FRAME,
            "stylesheet" => Self::STYLESHEET,
            "script" => Self::SCRIPT,
            "image" | "imageset" => Self::IMAGE,
            "font" => Self::FONT,
            "object" | "plugin" => Self::OBJECT,
            "xhr" | "xmlhttprequest" | "fetch" => Self::XMLHTTPREQUEST,
            "ping" | "beacon" => Self::PING,
            "cspReport" | "csp_report" => Self::CSP_REPORT,
            "media" => Self::MEDIA,
            "webSocket" | "websocket" => Self::WEBSOCKET,
            "webtransport" => Self::WEBTRANSPORT,
            "webbundle" => Self::WEBBUNDLE,
            _ => Self::OTHER,
        }
    }

    /// Neutral name of a single-bit type.
    pub fn name(&self) -> &'static str {
        const NAMES: &[(ResourceType, &str)] = &[
            (ResourceType::MAIN_FRAME, "main_frame"),
            (ResourceType::SUB_FRAME, "sub_frame"),
            (ResourceType::STYLESHEET, "stylesheet"),
            (ResourceType::SCRIPT, "script"),
            (ResourceType::IMAGE, "image"),
            (ResourceType::FONT, "font"),
            (ResourceType::OBJECT, "object"),
            (ResourceType::XMLHTTPREQUEST, "xmlhttprequest"),
            (ResourceType::PING, "ping"),
            (ResourceType::CSP_REPORT, "csp_report"),
            (ResourceType::MEDIA, "media"),
            (ResourceType::WEBSOCKET, "websocket"),
            (ResourceType::WEBTRANSPORT, "webtransport"),
            (ResourceType::WEBBUNDLE, "webbundle"),
        ];
        NAMES
            .iter()
            .find(|(ty, _)| ty == self)
            .map(|(_, name)| *name)
            .unwrap_or("other")
    }
}

// =============================================================================
// Party
// =============================================================================

/// First-party / third-party condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DomainType {
    FirstParty,
    ThirdParty,
}

impl DomainType {
    #[inline]
    pub fn accepts(&self, is_third_party: bool) -> bool {
        match self {
            Self::FirstParty => !is_third_party,
            Self::ThirdParty => is_third_party,
        }
    }
}

// =============================================================================
// Rule
// =============================================================================

/// Rule identifier, unique within its source list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleId {
    Number(i64),
    Text(String),
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

pub const DEFAULT_PRIORITY: i32 = 1;

/// Match predicate of a rule. Every present field must hold.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_type: Option<DomainType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_types: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_domains: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excluded_request_domains: Option<Vec<String>>,
    #[serde(default, alias = "domains", skip_serializing_if = "Option::is_none")]
    pub initiator_domains: Option<Vec<String>>,
    #[serde(default, alias = "excludedDomains", skip_serializing_if = "Option::is_none")]
    pub excluded_initiator_domains: Option<Vec<String>>,
}

/// Values derived from a rule's condition by `Rule::compile`.
#[derive(Debug, Clone, Default)]
struct CompiledCondition {
    done: bool,
    regex: Option<Regex>,
    url_filter: Option<UrlFilter>,
    resource_mask: Option<ResourceType>,
}

fn resource_mask_from_names(names: &[String]) -> (ResourceType, Vec<String>) {
    let mut mask = ResourceType::empty();
    let mut unknown = Vec::new();
    for name in names {
        match ResourceType::from_dnr_name(name.trim()) {
            Some(ty) => mask |= ty,
            None => unknown.push(name.clone()),
        }
    }
    (mask, unknown)
}

fn normalize_domain_list(list: &mut Option<Vec<String>>) {
    if let Some(domains) = list {
        for domain in domains.iter_mut() {
            let normalized = domain.trim().trim_end_matches('.').to_ascii_lowercase();
            *domain = normalized;
        }
        domains.retain(|d| !d.is_empty());
    }
}

/// One filtering directive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "RawRule")]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: RuleId,
    pub priority: i32,
    pub action: RuleAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<Redirect>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<RuleCondition>,
    /// Originating ruleset id, for diagnostics only.
    pub source: String,

    #[serde(skip)]
    compiled: CompiledCondition,
}

impl Rule {
    pub fn new(id: impl Into<RuleId>, action: RuleAction, condition: Option<RuleCondition>) -> Self {
        Self {
            id: id.into(),
            priority: DEFAULT_PRIORITY,
            action,
            redirect: None,
            condition,
            source: String::new(),
            compiled: CompiledCondition::default(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Whether `compile` has already run for this rule.
    pub fn is_compiled(&self) -> bool {
        self.condition.is_none() || self.compiled.done
    }

    /// Compiled `regexFilter`, if present and valid.
    #[inline]
    pub fn regex(&self) -> Option<&Regex> {
        self.compiled.regex.as_ref()
    }

    /// Pre-parsed `urlFilter`, once the rule has been compiled.
    #[inline]
    pub fn compiled_url_filter(&self) -> Option<&UrlFilter> {
        self.compiled.url_filter.as_ref()
    }

    /// Resource type mask, if the condition restricts resource types.
    pub fn resource_mask(&self) -> Option<ResourceType> {
        if self.compiled.done {
            return self.compiled.resource_mask;
        }
        self.condition
            .as_ref()
            .and_then(|c| c.resource_types.as_ref())
            .map(|names| resource_mask_from_names(names).0)
    }

    /// Normalize domain lists and pre-compile the expensive parts of the
    /// condition. Problems are returned as warnings; the rule stays usable
    /// and a rule whose regex did not compile simply never matches.
    pub fn compile(&mut self) -> Vec<FilterError> {
        let mut warnings = Vec::new();
        let Some(condition) = self.condition.as_mut() else {
            return warnings;
        };
        if self.compiled.done {
            return warnings;
        }

        normalize_domain_list(&mut condition.request_domains);
        normalize_domain_list(&mut condition.excluded_request_domains);
        normalize_domain_list(&mut condition.initiator_domains);
        normalize_domain_list(&mut condition.excluded_initiator_domains);

        let mut compiled = CompiledCondition {
            done: true,
            ..CompiledCondition::default()
        };

        if let Some(source) = condition.regex_filter.as_deref() {
            match RegexBuilder::new(source).case_insensitive(true).build() {
                Ok(regex) => compiled.regex = Some(regex),
                Err(e) => warnings.push(FilterError::RuleRegexInvalid {
                    rule_id: self.id.to_string(),
                    source_id: self.source.clone(),
                    reason: e.to_string(),
                }),
            }
        }

        if let Some(pattern) = condition.url_filter.as_deref() {
            compiled.url_filter = Some(UrlFilter::parse(pattern));
        }

        if let Some(names) = condition.resource_types.as_deref() {
            let (mask, unknown) = resource_mask_from_names(names);
            for name in unknown {
                warnings.push(FilterError::ResourceTypeUnknown {
                    rule_id: self.id.to_string(),
                    source_id: self.source.clone(),
                    name,
                });
            }
            compiled.resource_mask = Some(mask);
        }

        self.compiled = compiled;
        warnings
    }
}

impl From<i64> for RuleId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for RuleId {
    fn from(value: i32) -> Self {
        Self::Number(i64::from(value))
    }
}

impl From<&str> for RuleId {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Wire shape of a rule. `action` is accepted as a bare string or in
/// DNR object form.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRule {
    id: RuleId,
    #[serde(default)]
    priority: Option<i32>,
    action: RawAction,
    #[serde(default)]
    condition: Option<RuleCondition>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawAction {
    Kind(RuleAction),
    Object {
        #[serde(rename = "type")]
        kind: RuleAction,
        #[serde(default)]
        redirect: Option<Redirect>,
    },
}

impl From<RawRule> for Rule {
    fn from(raw: RawRule) -> Self {
        let (action, redirect) = match raw.action {
            RawAction::Kind(kind) => (kind, None),
            RawAction::Object { kind, redirect } => (kind, redirect),
        };
        Self {
            id: raw.id,
            priority: raw.priority.unwrap_or(DEFAULT_PRIORITY),
            action,
            redirect,
            condition: raw.condition,
            source: String::new(),
            compiled: CompiledCondition::default(),
        }
    }
}

// =============================================================================
// Request
// =============================================================================

/// Metadata for a request being matched, as supplied by the host's
/// interception hook.
#[derive(Debug, Clone, Copy)]
pub struct Request<'a> {
    /// Full request URL
    pub url: &'a str,
    /// Neutral request type
    pub resource_type: ResourceType,
    /// URL of the document or frame that initiated the request
    pub initiator: Option<&'a str>,
}

impl<'a> Request<'a> {
    pub fn new(url: &'a str, resource_type: ResourceType) -> Self {
        Self {
            url,
            resource_type,
            initiator: None,
        }
    }

    pub fn with_initiator(mut self, initiator: &'a str) -> Self {
        self.initiator = Some(initiator);
        self
    }
}

// =============================================================================
// Match Result
// =============================================================================

/// Final decision for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchDecision {
    Allow,
    Block,
    Redirect,
}

impl MatchDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Block => "block",
            Self::Redirect => "redirect",
        }
    }
}

/// Result of matching a request.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub decision: MatchDecision,
    /// Rule that determined the decision, if any
    pub matched_rule: Option<std::sync::Arc<Rule>>,
}

impl MatchResult {
    /// Default-open result with no matched rule.
    pub fn allow() -> Self {
        Self {
            decision: MatchDecision::Allow,
            matched_rule: None,
        }
    }

    /// Redirect target of the matched rule, if this is a redirect decision.
    pub fn redirect(&self) -> Option<&Redirect> {
        if self.decision != MatchDecision::Redirect {
            return None;
        }
        self.matched_rule.as_ref().and_then(|rule| rule.redirect.as_ref())
    }
}

impl Default for MatchResult {
    fn default() -> Self {
        Self::allow()
    }
}
