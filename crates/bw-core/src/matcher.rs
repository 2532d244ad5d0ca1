//! Request Filter Engine
//!
//! This is the hot path - every intercepted request goes through here.
//! Queries read one immutable `CompiledRuleSet` through an `ArcSwap` and
//! never lock; reloads build the next set off to the side and swap it in.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use regex::RegexBuilder;
use serde::Serialize;

use crate::domain::{is_third_party, matches_any};
use crate::error::FilterError;
use crate::pattern::UrlFilter;
use crate::types::{MatchDecision, MatchResult, Request, ResourceType, Rule, RuleAction};
use crate::url::{extract_host, hostname, parse_url, path_and_query};

// =============================================================================
// Compiled Rule Set
// =============================================================================

/// Immutable snapshot of the loaded rules, partitioned by action.
///
/// Each partition is sorted by descending priority; equal priorities keep
/// their load order.
#[derive(Debug, Default)]
pub struct CompiledRuleSet {
    allow: Vec<Arc<Rule>>,
    block: Vec<Arc<Rule>>,
    redirect: Vec<Arc<Rule>>,
}

impl CompiledRuleSet {
    /// Build a rule set. Rules that were not compiled by the loader are
    /// compiled here, so matching semantics never depend on that step.
    pub fn new(rules: Vec<Rule>) -> Self {
        let mut set = Self::default();

        for mut rule in rules {
            if !rule.is_compiled() {
                for warning in rule.compile() {
                    log::warn!("{}", warning);
                }
            }
            let target = match rule.action {
                RuleAction::Allow => &mut set.allow,
                RuleAction::Block => &mut set.block,
                RuleAction::Redirect => &mut set.redirect,
            };
            target.push(Arc::new(rule));
        }

        for partition in [&mut set.allow, &mut set.block, &mut set.redirect] {
            partition.sort_by(|a, b| b.priority.cmp(&a.priority));
        }

        set
    }

    /// Create an empty rule set.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn allow_rules(&self) -> &[Arc<Rule>] {
        &self.allow
    }

    pub fn block_rules(&self) -> &[Arc<Rule>] {
        &self.block
    }

    pub fn redirect_rules(&self) -> &[Arc<Rule>] {
        &self.redirect
    }

    pub fn len(&self) -> usize {
        self.allow.len() + self.block.len() + self.redirect.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evaluate the rule set against one request context.
    ///
    /// Allow rules always win over block rules, whatever their priorities.
    /// Block outranks redirect. Nothing matched means allow.
    pub fn evaluate(&self, ctx: &RequestContext<'_>) -> MatchResult {
        if let Some(rule) = first_match(&self.allow, ctx) {
            return MatchResult {
                decision: MatchDecision::Allow,
                matched_rule: Some(rule),
            };
        }

        if let Some(rule) = first_match(&self.block, ctx) {
            return MatchResult {
                decision: MatchDecision::Block,
                matched_rule: Some(rule),
            };
        }

        if let Some(rule) = first_match(&self.redirect, ctx) {
            return MatchResult {
                decision: MatchDecision::Redirect,
                matched_rule: Some(rule),
            };
        }

        MatchResult::allow()
    }
}

fn first_match(rules: &[Arc<Rule>], ctx: &RequestContext<'_>) -> Option<Arc<Rule>> {
    rules
        .iter()
        .find(|rule| match_rule_guarded(rule, ctx))
        .cloned()
}

/// Run `match_rule`, treating a panic inside one rule as a non-match.
fn match_rule_guarded(rule: &Rule, ctx: &RequestContext<'_>) -> bool {
    panic::catch_unwind(AssertUnwindSafe(|| match_rule(rule, ctx))).unwrap_or_else(|_| {
        log::warn!(
            "Rule {} from '{}' panicked during matching; treated as no match",
            rule.id,
            rule.source
        );
        false
    })
}

// =============================================================================
// Request Context
// =============================================================================

/// Per-request values derived once and shared by every rule test.
#[derive(Debug, Clone)]
pub struct RequestContext<'a> {
    /// Full request URL as supplied
    pub url: &'a str,
    /// Lowercased request hostname
    pub host: String,
    /// `pathname + search` of the request URL
    pub path_and_query: String,
    /// Lowercased initiator hostname, when the initiator parsed
    pub initiator_host: Option<String>,
    /// Is this a third-party request?
    pub is_third_party: bool,
    /// Request type
    pub resource_type: ResourceType,
}

impl<'a> RequestContext<'a> {
    /// Derive the context for a request. Fails only when the request URL
    /// itself does not parse; a bad initiator is treated as absent.
    pub fn from_request(request: &Request<'a>) -> Result<Self, FilterError> {
        let url = parse_url(request.url)?;
        let host = hostname(&url);

        let initiator_host = request.initiator.and_then(extract_host);

        let is_third_party = is_third_party(&host, initiator_host.as_deref());

        Ok(Self {
            url: request.url,
            path_and_query: path_and_query(&url),
            host,
            initiator_host,
            is_third_party,
            resource_type: request.resource_type,
        })
    }
}

// =============================================================================
// Rule Predicate
// =============================================================================

/// Check whether a rule matches a request.
///
/// Every present condition field must hold; absent fields are vacuously
/// true. A rule without a condition never matches.
pub fn match_rule(rule: &Rule, ctx: &RequestContext<'_>) -> bool {
    let Some(condition) = rule.condition.as_ref() else {
        return false;
    };

    if let Some(domain_type) = condition.domain_type {
        if !domain_type.accepts(ctx.is_third_party) {
            return false;
        }
    }

    if let Some(mask) = rule.resource_mask() {
        if !mask.intersects(ctx.resource_type) {
            return false;
        }
    }

    if let Some(domains) = &condition.request_domains {
        if !matches_any(&ctx.host, domains) {
            return false;
        }
    }

    if let Some(domains) = &condition.excluded_request_domains {
        if matches_any(&ctx.host, domains) {
            return false;
        }
    }

    if let Some(domains) = &condition.initiator_domains {
        match ctx.initiator_host.as_deref() {
            Some(initiator) if matches_any(initiator, domains) => {}
            _ => return false,
        }
    }

    if let Some(domains) = &condition.excluded_initiator_domains {
        if let Some(initiator) = ctx.initiator_host.as_deref() {
            if matches_any(initiator, domains) {
                return false;
            }
        }
    }

    if let Some(pattern) = condition.url_filter.as_deref() {
        let matched = match rule.compiled_url_filter() {
            Some(filter) => filter.matches(ctx.url, &ctx.host, &ctx.path_and_query),
            None => UrlFilter::parse(pattern).matches(ctx.url, &ctx.host, &ctx.path_and_query),
        };
        if !matched {
            return false;
        }
    }

    if let Some(source) = condition.regex_filter.as_deref() {
        let matched = match rule.regex() {
            Some(regex) => regex.is_match(ctx.url),
            None if !rule.is_compiled() => RegexBuilder::new(source)
                .case_insensitive(true)
                .build()
                .is_ok_and(|regex| regex.is_match(ctx.url)),
            None => false,
        };
        if !matched {
            return false;
        }
    }

    true
}

// =============================================================================
// Engine
// =============================================================================

/// Running counters and snapshot sizes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub enabled: bool,
    pub total: u64,
    pub blocked: u64,
    pub allowed: u64,
    pub redirected: u64,
    pub allow_rules: usize,
    pub block_rules: usize,
    pub redirect_rules: usize,
}

/// The request filter engine.
pub struct FilterEngine {
    rules: ArcSwap<CompiledRuleSet>,
    enabled: AtomicBool,
    total: AtomicU64,
    blocked: AtomicU64,
    allowed: AtomicU64,
    redirected: AtomicU64,
}

impl FilterEngine {
    /// Create an enabled engine with no rules.
    pub fn new() -> Self {
        Self::with_rule_set(CompiledRuleSet::empty())
    }

    /// Create an enabled engine serving the given rule set.
    pub fn with_rule_set(set: CompiledRuleSet) -> Self {
        Self {
            rules: ArcSwap::new(Arc::new(set)),
            enabled: AtomicBool::new(true),
            total: AtomicU64::new(0),
            blocked: AtomicU64::new(0),
            allowed: AtomicU64::new(0),
            redirected: AtomicU64::new(0),
        }
    }

    /// Build a new snapshot from `rules` and swap it in.
    pub fn load_rules(&self, rules: Vec<Rule>) {
        self.load_rule_set(CompiledRuleSet::new(rules));
    }

    /// Swap in an already built snapshot.
    pub fn load_rule_set(&self, set: CompiledRuleSet) {
        log::info!(
            "Loaded {} rules ({} allow, {} block, {} redirect)",
            set.len(),
            set.allow.len(),
            set.block.len(),
            set.redirect.len()
        );
        self.rules.store(Arc::new(set));
    }

    /// Current snapshot. Holding it keeps that snapshot alive across reloads.
    pub fn rule_set(&self) -> Arc<CompiledRuleSet> {
        self.rules.load_full()
    }

    /// Decide whether a request should be allowed, blocked or redirected.
    pub fn should_block(&self, request: &Request<'_>) -> MatchResult {
        if !self.is_enabled() {
            return MatchResult::allow();
        }

        self.total.fetch_add(1, Ordering::Relaxed);

        let result = match RequestContext::from_request(request) {
            Ok(ctx) => self.rules.load().evaluate(&ctx),
            Err(e) => {
                log::debug!("{}; allowing", e);
                MatchResult::allow()
            }
        };

        let counter = match result.decision {
            MatchDecision::Allow => &self.allowed,
            MatchDecision::Block => &self.blocked,
            MatchDecision::Redirect => &self.redirected,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if let Some(rule) = &result.matched_rule {
            log::debug!(
                "{} {} by rule {} from '{}'",
                result.decision.as_str(),
                request.url,
                rule.id,
                rule.source
            );
        }

        result
    }

    pub fn stats(&self) -> EngineStats {
        let set = self.rules.load();
        EngineStats {
            enabled: self.is_enabled(),
            total: self.total.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
            allowed: self.allowed.load(Ordering::Relaxed),
            redirected: self.redirected.load(Ordering::Relaxed),
            allow_rules: set.allow.len(),
            block_rules: set.block.len(),
            redirect_rules: set.redirect.len(),
        }
    }

    pub fn reset_stats(&self) {
        self.total.store(0, Ordering::Relaxed);
        self.blocked.store(0, Ordering::Relaxed);
        self.allowed.store(0, Ordering::Relaxed);
        self.redirected.store(0, Ordering::Relaxed);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        log::info!("Request filtering {}", if enabled { "enabled" } else { "disabled" });
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }
}

impl Default for FilterEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FilterEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterEngine")
            .field("stats", &self.stats())
            .finish()
    }
}
