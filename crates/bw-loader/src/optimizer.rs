use bw_core::{FilterError, Rule};

pub struct OptimizeStats {
    pub rules: usize,
    pub compiled: usize,
    pub already_compiled: usize,
    pub regex_invalid: usize,
    pub resource_types_unknown: usize,
    pub warnings: Vec<FilterError>,
}

/// Compile every rule in place: lower-case domain lists, compile
/// `regexFilter`, pre-parse `urlFilter` and build resource type masks.
///
/// Problems are logged and returned in `warnings`; no rule is removed.
pub fn optimize_rules(rules: &mut [Rule]) -> OptimizeStats {
    let mut compiled = 0usize;
    let mut already_compiled = 0usize;
    let mut warnings = Vec::new();

    for rule in rules.iter_mut() {
        if rule.condition.is_none() {
            continue;
        }
        if rule.is_compiled() {
            already_compiled += 1;
            continue;
        }
        let rule_warnings = rule.compile();
        for warning in &rule_warnings {
            log::warn!("{}", warning);
        }
        warnings.extend(rule_warnings);
        compiled += 1;
    }

    let regex_invalid = warnings
        .iter()
        .filter(|w| matches!(w, FilterError::RuleRegexInvalid { .. }))
        .count();
    let resource_types_unknown = warnings
        .iter()
        .filter(|w| matches!(w, FilterError::ResourceTypeUnknown { .. }))
        .count();

    OptimizeStats {
        rules: rules.len(),
        compiled,
        already_compiled,
        regex_invalid,
        resource_types_unknown,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bw_core::{RuleAction, RuleCondition};

    fn rule(id: i64, condition: RuleCondition) -> Rule {
        Rule::new(id, RuleAction::Block, Some(condition)).with_source("test")
    }

    #[test]
    fn compiles_and_normalizes() {
        let mut rules = vec![
            rule(
                1,
                RuleCondition {
                    regex_filter: Some("^https://ADS\\.".to_string()),
                    request_domains: Some(vec![" Example.COM. ".to_string(), "".to_string()]),
                    ..Default::default()
                },
            ),
            rule(
                2,
                RuleCondition {
                    url_filter: Some("||tracker.example^".to_string()),
                    resource_types: Some(vec!["script".to_string(), "image".to_string()]),
                    ..Default::default()
                },
            ),
            Rule::new(3, RuleAction::Allow, None),
        ];

        let stats = optimize_rules(&mut rules);
        assert_eq!(stats.rules, 3);
        assert_eq!(stats.compiled, 2);
        assert!(stats.warnings.is_empty());

        let first = rules[0].condition.as_ref().expect("condition");
        assert_eq!(first.request_domains, Some(vec!["example.com".to_string()]));
        assert!(rules[0]
            .regex()
            .is_some_and(|re| re.is_match("https://ads.example.com/")));

        assert!(rules[1].compiled_url_filter().is_some_and(|f| f.is_host_anchored()));
        assert!(rules[1].resource_mask().is_some());
    }

    #[test]
    fn invalid_regex_and_unknown_type_are_warnings() {
        let mut rules = vec![
            rule(
                1,
                RuleCondition {
                    regex_filter: Some("(unclosed".to_string()),
                    ..Default::default()
                },
            ),
            rule(
                2,
                RuleCondition {
                    resource_types: Some(vec!["script".to_string(), "hologram".to_string()]),
                    ..Default::default()
                },
            ),
        ];

        let stats = optimize_rules(&mut rules);
        assert_eq!(stats.regex_invalid, 1);
        assert_eq!(stats.resource_types_unknown, 1);
        assert_eq!(stats.warnings.len(), 2);
        assert!(rules[0].regex().is_none());
    }

    #[test]
    fn second_pass_is_a_no_op() {
        let mut rules = vec![rule(
            1,
            RuleCondition {
                url_filter: Some("/ads/".to_string()),
                ..Default::default()
            },
        )];
        optimize_rules(&mut rules);
        let stats = optimize_rules(&mut rules);
        assert_eq!(stats.compiled, 0);
        assert_eq!(stats.already_compiled, 1);
    }
}
