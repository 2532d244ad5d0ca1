use std::collections::BTreeMap;

use bw_core::{Rule, RuleAction};
use serde::Serialize;

/// Counts of how many rules use each condition field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionCounts {
    pub url_filter: usize,
    pub regex_filter: usize,
    pub domain_type: usize,
    pub resource_types: usize,
    pub request_domains: usize,
    pub excluded_request_domains: usize,
    pub initiator_domains: usize,
    pub excluded_initiator_domains: usize,
}

/// Summary of a rule collection, for observability only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleStats {
    pub total: usize,
    pub allow: usize,
    pub block: usize,
    pub redirect: usize,
    pub by_source: BTreeMap<String, usize>,
    pub conditions: ConditionCounts,
    pub without_condition: usize,
}

pub fn get_rule_stats(rules: &[Rule]) -> RuleStats {
    let mut stats = RuleStats {
        total: rules.len(),
        ..RuleStats::default()
    };

    for rule in rules {
        match rule.action {
            RuleAction::Allow => stats.allow += 1,
            RuleAction::Block => stats.block += 1,
            RuleAction::Redirect => stats.redirect += 1,
        }
        *stats.by_source.entry(rule.source.clone()).or_insert(0) += 1;

        let Some(c) = &rule.condition else {
            stats.without_condition += 1;
            continue;
        };
        let counts = &mut stats.conditions;
        counts.url_filter += usize::from(c.url_filter.is_some());
        counts.regex_filter += usize::from(c.regex_filter.is_some());
        counts.domain_type += usize::from(c.domain_type.is_some());
        counts.resource_types += usize::from(c.resource_types.is_some());
        counts.request_domains += usize::from(c.request_domains.is_some());
        counts.excluded_request_domains += usize::from(c.excluded_request_domains.is_some());
        counts.initiator_domains += usize::from(c.initiator_domains.is_some());
        counts.excluded_initiator_domains += usize::from(c.excluded_initiator_domains.is_some());
    }

    stats
}
