//! Ruleset files
//!
//! A ruleset is `<rules_dir>/<id>.json` holding a JSON array of rules.
//! Failures are isolated per file, and inside a file per rule.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use bw_core::{FilterError, Rule};
use serde_json::Value;

/// Rules gathered from a set of rulesets plus every problem met on the way.
#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub rules: Vec<Rule>,
    pub errors: Vec<FilterError>,
    /// Ids that contributed a parsed file (possibly with zero rules).
    pub loaded: Vec<String>,
    /// Ids that failed to load and contributed fallback rules instead.
    pub retained: Vec<String>,
}

impl LoadOutcome {
    /// Whether rulesets were requested and every one of them failed with
    /// nothing to fall back on.
    pub fn all_failed(&self) -> bool {
        self.loaded.is_empty() && self.retained.is_empty() && !self.errors.is_empty()
    }
}

/// Loads rulesets from one directory.
#[derive(Debug, Clone)]
pub struct RulesetLoader {
    rules_dir: PathBuf,
}

impl RulesetLoader {
    pub fn new(rules_dir: impl Into<PathBuf>) -> Self {
        Self {
            rules_dir: rules_dir.into(),
        }
    }

    pub fn rules_dir(&self) -> &Path {
        &self.rules_dir
    }

    /// Path of the file backing a ruleset id.
    pub fn ruleset_path(&self, id: &str) -> PathBuf {
        self.rules_dir.join(format!("{id}.json"))
    }

    /// Load one ruleset. Malformed elements are skipped and returned as
    /// diagnostics alongside the rules that did parse.
    pub fn load_ruleset(&self, id: &str) -> Result<(Vec<Rule>, Vec<FilterError>), FilterError> {
        let path = self.ruleset_path(id);
        let text = fs::read_to_string(&path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                FilterError::RulesetNotFound {
                    id: id.to_string(),
                    path: path.clone(),
                }
            } else {
                FilterError::RulesetRead {
                    id: id.to_string(),
                    source,
                }
            }
        })?;
        parse_ruleset(id, &text)
    }

    /// Load several rulesets. Nothing here fails as a whole; every problem
    /// ends up in `LoadOutcome::errors`.
    pub fn load_rulesets<S: AsRef<str>>(&self, ids: &[S]) -> LoadOutcome {
        self.load_rulesets_with(ids, |_| None)
    }

    /// Like `load_rulesets`, but a ruleset that fails to load is replaced by
    /// whatever `fallback` returns for its id.
    pub fn load_rulesets_with<S, F>(&self, ids: &[S], mut fallback: F) -> LoadOutcome
    where
        S: AsRef<str>,
        F: FnMut(&str) -> Option<Vec<Rule>>,
    {
        let mut per_set = Vec::with_capacity(ids.len());
        let mut outcome = LoadOutcome::default();

        for id in ids {
            let id = id.as_ref();
            match self.load_ruleset(id) {
                Ok((rules, skipped)) => {
                    log::info!("Loaded ruleset '{}': {} rules", id, rules.len());
                    for e in &skipped {
                        log::warn!("{}", e);
                    }
                    outcome.errors.extend(skipped);
                    outcome.loaded.push(id.to_string());
                    per_set.push(rules);
                }
                Err(e) => {
                    match fallback(id) {
                        Some(previous) => {
                            log::warn!("{}; keeping {} previously loaded rules", e, previous.len());
                            outcome.retained.push(id.to_string());
                            per_set.push(previous);
                        }
                        None => log::warn!("{}; ruleset skipped", e),
                    }
                    outcome.errors.push(e);
                }
            }
        }

        outcome.rules = merge_rulesets(per_set);
        outcome
    }
}

/// Load rulesets by id from `rules_dir`.
pub fn load_rulesets<S: AsRef<str>>(rules_dir: impl Into<PathBuf>, ids: &[S]) -> LoadOutcome {
    RulesetLoader::new(rules_dir).load_rulesets(ids)
}

/// Parse the text of a ruleset and tag each rule with `id`.
///
/// The document must be a JSON array. Elements that do not deserialize as
/// rules are reported as `RuleMalformed` and skipped.
pub fn parse_ruleset(id: &str, text: &str) -> Result<(Vec<Rule>, Vec<FilterError>), FilterError> {
    let value: Value = serde_json::from_str(text).map_err(|e| FilterError::RulesetParseInvalid {
        id: id.to_string(),
        reason: e.to_string(),
    })?;
    let Value::Array(elements) = value else {
        return Err(FilterError::RulesetParseInvalid {
            id: id.to_string(),
            reason: "top level must be an array".to_string(),
        });
    };

    let mut rules = Vec::with_capacity(elements.len());
    let mut skipped = Vec::new();
    for (index, element) in elements.into_iter().enumerate() {
        match serde_json::from_value::<Rule>(element) {
            Ok(rule) => rules.push(rule.with_source(id)),
            Err(e) => skipped.push(FilterError::RuleMalformed {
                id: id.to_string(),
                index,
                reason: e.to_string(),
            }),
        }
    }
    Ok((rules, skipped))
}

/// Concatenate rulesets in order and stable-sort by descending priority.
pub fn merge_rulesets(sets: Vec<Vec<Rule>>) -> Vec<Rule> {
    let mut merged: Vec<Rule> = sets.into_iter().flatten().collect();
    merged.sort_by(|a, b| b.priority.cmp(&a.priority));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use bw_core::{RuleAction, RuleId};

    const VALID: &str = r#"[
        {"id": 1, "action": "block", "condition": {"urlFilter": "||ads.example^"}},
        {"id": 2, "priority": 5, "action": {"type": "allow"}, "condition": {"urlFilter": "||ok.example^"}},
        {"id": "r3", "action": {"type": "redirect", "redirect": {"url": "https://x.test/blank"}},
         "condition": {"urlFilter": "/pixel.gif"}}
    ]"#;

    fn write(dir: &Path, id: &str, text: &str) {
        fs::write(dir.join(format!("{id}.json")), text).expect("write ruleset");
    }

    #[test]
    fn parse_tags_source_and_reads_both_action_forms() {
        let (rules, skipped) = parse_ruleset("base", VALID).expect("valid ruleset");
        assert!(skipped.is_empty());
        assert_eq!(rules.len(), 3);
        assert!(rules.iter().all(|r| r.source == "base"));
        assert_eq!(rules[1].action, RuleAction::Allow);
        assert_eq!(rules[1].priority, 5);
        assert_eq!(rules[2].id, RuleId::Text("r3".to_string()));
        assert_eq!(
            rules[2].redirect.as_ref().and_then(|r| r.url.as_deref()),
            Some("https://x.test/blank")
        );
    }

    #[test]
    fn parse_skips_malformed_elements() {
        let text = r#"[
            {"id": 1, "action": "block"},
            {"action": "block"},
            {"id": 3, "action": "explode"},
            "not a rule",
            {"id": 5, "action": "allow"}
        ]"#;
        let (rules, skipped) = parse_ruleset("mixed", text).expect("array parses");
        assert_eq!(rules.len(), 2);
        assert_eq!(skipped.len(), 3);
        assert!(skipped.iter().all(|e| e.kind() == "rule_malformed"));
        match &skipped[0] {
            FilterError::RuleMalformed { index, .. } => assert_eq!(*index, 1),
            other => panic!("unexpected diagnostic: {other}"),
        }
    }

    #[test]
    fn parse_rejects_non_array_documents() {
        for text in ["{\"id\": 1}", "42", "{not json"] {
            let err = parse_ruleset("bad", text).expect_err("must fail");
            assert_eq!(err.kind(), "ruleset_parse_invalid");
        }
    }

    #[test]
    fn valid_and_malformed_rulesets() {
        let dir = tempfile::tempdir().expect("temp dir");
        write(dir.path(), "good", VALID);
        write(dir.path(), "broken", "{ this is not json");

        let outcome = load_rulesets(dir.path(), &["good", "broken", "missing"]);
        assert_eq!(outcome.rules.len(), 3);
        assert!(outcome.rules.iter().all(|r| r.source == "good"));
        assert_eq!(outcome.loaded, vec!["good".to_string()]);
        assert!(!outcome.all_failed());

        let kinds: Vec<&str> = outcome.errors.iter().map(FilterError::kind).collect();
        assert_eq!(kinds, vec!["ruleset_parse_invalid", "ruleset_not_found"]);
    }

    #[test]
    fn all_failed_when_nothing_loads() {
        let dir = tempfile::tempdir().expect("temp dir");
        let outcome = load_rulesets(dir.path(), &["a", "b"]);
        assert!(outcome.rules.is_empty());
        assert!(outcome.all_failed());
        assert_eq!(outcome.errors.len(), 2);
    }

    #[test]
    fn fallback_stands_in_for_failed_rulesets() {
        let dir = tempfile::tempdir().expect("temp dir");
        write(dir.path(), "good", VALID);
        write(dir.path(), "broken", "[{");

        let loader = RulesetLoader::new(dir.path());
        let outcome = loader.load_rulesets_with(&["good", "broken", "missing"], |id| {
            (id == "broken").then(|| vec![Rule::new(7, RuleAction::Block, None).with_source("broken")])
        });
        assert_eq!(outcome.loaded, vec!["good".to_string()]);
        assert_eq!(outcome.retained, vec!["broken".to_string()]);
        assert_eq!(outcome.rules.len(), 4);
        assert_eq!(outcome.errors.len(), 2);

        let outcome = loader.load_rulesets_with(&["broken"], |_| Some(Vec::new()));
        assert!(!outcome.all_failed());
        let outcome = loader.load_rulesets_with(&["broken"], |_| None);
        assert!(outcome.all_failed());
        assert!(!loader.load_rulesets::<&str>(&[]).all_failed());
    }

    #[test]
    fn merged_rules_sorted_by_priority_stably() {
        let dir = tempfile::tempdir().expect("temp dir");
        write(
            dir.path(),
            "first",
            r#"[{"id": 1, "action": "block"}, {"id": 2, "priority": 3, "action": "block"}]"#,
        );
        write(
            dir.path(),
            "second",
            r#"[{"id": 3, "action": "block"}, {"id": 4, "priority": 3, "action": "allow"}]"#,
        );

        let outcome = load_rulesets(dir.path(), &["first", "second"]);
        let ids: Vec<String> = outcome.rules.iter().map(|r| r.id.to_string()).collect();
        assert_eq!(ids, vec!["2", "4", "1", "3"]);
    }

    #[test]
    fn read_error_on_directory() {
        let dir = tempfile::tempdir().expect("temp dir");
        fs::create_dir(dir.path().join("dir.json")).expect("create dir");
        let err = RulesetLoader::new(dir.path())
            .load_ruleset("dir")
            .expect_err("reading a directory fails");
        assert_eq!(err.kind(), "ruleset_read");
    }
}
