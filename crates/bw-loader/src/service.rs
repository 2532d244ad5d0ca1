//! Filter service
//!
//! Owns one `FilterEngine` and one `CosmeticResolver` built from a
//! `FilterConfig`. Reloads build complete snapshots off to the side and swap
//! them in. A ruleset or filter list that fails to load on reload keeps the
//! last version that did load.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bw_core::cosmetic::CosmeticCatalog;
use bw_core::{
    CompiledRuleSet, CosmeticResolver, CosmeticResult, EngineStats, FilterEngine, FilterError,
    MatchResult, Request, Rule,
};

use crate::config::FilterConfig;
use crate::loader::RulesetLoader;
use crate::optimizer::optimize_rules;
use crate::stats::{get_rule_stats, RuleStats};

/// What a reload did.
#[derive(Debug, Default)]
pub struct ReloadReport {
    /// Rules in the published snapshot
    pub rules: usize,
    /// Rulesets read fresh from disk
    pub rulesets_loaded: Vec<String>,
    /// Rulesets that failed and kept their previous rules
    pub rulesets_retained: Vec<String>,
    /// Filter lists read fresh from disk
    pub lists_loaded: Vec<PathBuf>,
    /// Filter lists that failed and kept their previous catalog
    pub lists_retained: Vec<PathBuf>,
    /// Every diagnostic met during the reload
    pub errors: Vec<FilterError>,
}

impl ReloadReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    fn absorb(&mut self, other: ReloadReport) {
        self.rulesets_loaded.extend(other.rulesets_loaded);
        self.rulesets_retained.extend(other.rulesets_retained);
        self.lists_loaded.extend(other.lists_loaded);
        self.lists_retained.extend(other.lists_retained);
        self.errors.extend(other.errors);
    }
}

struct ServiceState {
    config: FilterConfig,
    last_good_rules: HashMap<String, Vec<Rule>>,
    last_good_lists: HashMap<PathBuf, Arc<CosmeticCatalog>>,
    rule_stats: RuleStats,
}

/// Request and cosmetic filtering built from one configuration.
pub struct FilterService {
    engine: FilterEngine,
    cosmetic: CosmeticResolver,
    state: Mutex<ServiceState>,
}

impl FilterService {
    /// Build the service and load everything the configuration names.
    pub fn new(config: FilterConfig) -> Self {
        Self::open(config).0
    }

    /// Like `new`, also returning the diagnostics of the initial load.
    pub fn open(config: FilterConfig) -> (Self, ReloadReport) {
        let engine = FilterEngine::new();
        engine.set_enabled(config.enabled);
        let cosmetic = CosmeticResolver::new();
        cosmetic.set_enabled(config.cosmetic_enabled);

        let service = Self {
            engine,
            cosmetic,
            state: Mutex::new(ServiceState {
                config,
                last_good_rules: HashMap::new(),
                last_good_lists: HashMap::new(),
                rule_stats: RuleStats::default(),
            }),
        };
        let report = service.reload();
        (service, report)
    }

    fn state(&self) -> MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reload rulesets and filter lists from disk.
    pub fn reload(&self) -> ReloadReport {
        let mut state = self.state();
        let mut report = self.reload_rules(&mut state);
        report.absorb(self.reload_cosmetic(&mut state));
        log::info!(
            "Reload finished: {} rules, {} filter lists, {} diagnostics",
            report.rules,
            report.lists_loaded.len() + report.lists_retained.len(),
            report.errors.len()
        );
        report
    }

    /// Replace the enabled rulesets and reload the engine.
    pub fn set_enabled_rulesets(&self, ids: Vec<String>) -> ReloadReport {
        let mut state = self.state();
        state.config.enabled_rulesets = ids;
        self.reload_rules(&mut state)
    }

    fn reload_rules(&self, state: &mut ServiceState) -> ReloadReport {
        let loader = RulesetLoader::new(state.config.rules_dir.clone());
        let last_good = &state.last_good_rules;
        let mut outcome = loader.load_rulesets_with(&state.config.enabled_rulesets, |id| {
            last_good.get(id).cloned()
        });

        let mut report = ReloadReport {
            rulesets_loaded: outcome.loaded.clone(),
            rulesets_retained: outcome.retained.clone(),
            ..ReloadReport::default()
        };

        if outcome.all_failed() {
            log::warn!(
                "No enabled ruleset could be loaded; keeping the current {} rules",
                state.rule_stats.total
            );
            report.rules = state.rule_stats.total;
            report.errors = outcome.errors;
            return report;
        }

        let optimized = optimize_rules(&mut outcome.rules);
        report.errors = outcome.errors;
        report.errors.extend(optimized.warnings);

        let mut fresh: HashMap<String, Vec<Rule>> = outcome
            .loaded
            .iter()
            .chain(&outcome.retained)
            .map(|id| (id.clone(), Vec::new()))
            .collect();
        for rule in &outcome.rules {
            if let Some(rules) = fresh.get_mut(&rule.source) {
                rules.push(rule.clone());
            }
        }

        report.rules = outcome.rules.len();
        state.rule_stats = get_rule_stats(&outcome.rules);
        state.last_good_rules = fresh;
        self.engine.load_rule_set(CompiledRuleSet::new(outcome.rules));
        report
    }

    fn reload_cosmetic(&self, state: &mut ServiceState) -> ReloadReport {
        let mut report = ReloadReport::default();
        let mut catalog = CosmeticCatalog::default();
        let mut fresh = HashMap::new();

        for path in &state.config.filter_lists {
            let parsed = match CosmeticCatalog::from_file(path) {
                Ok(parsed) => {
                    report.lists_loaded.push(path.clone());
                    Arc::new(parsed)
                }
                Err(e) => {
                    let previous = state.last_good_lists.get(path).cloned();
                    match &previous {
                        Some(_) => log::warn!("{}; keeping previously loaded list", e),
                        None => log::warn!("{}; filter list skipped", e),
                    }
                    report.errors.push(e);
                    let Some(previous) = previous else {
                        continue;
                    };
                    report.lists_retained.push(path.clone());
                    previous
                }
            };
            catalog.merge(&parsed);
            fresh.insert(path.clone(), parsed);
        }

        state.last_good_lists = fresh;
        self.cosmetic.publish(catalog);
        report
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn should_block(&self, request: &Request<'_>) -> MatchResult {
        self.engine.should_block(request)
    }

    pub fn get_selectors_for_url(&self, url: &str) -> CosmeticResult {
        self.cosmetic.get_selectors_for_url(url)
    }

    pub fn engine(&self) -> &FilterEngine {
        &self.engine
    }

    pub fn cosmetic(&self) -> &CosmeticResolver {
        &self.cosmetic
    }

    pub fn stats(&self) -> EngineStats {
        self.engine.stats()
    }

    /// Statistics of the rules in the current snapshot.
    pub fn rule_stats(&self) -> RuleStats {
        self.state().rule_stats.clone()
    }

    pub fn config(&self) -> FilterConfig {
        self.state().config.clone()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.state().config.enabled = enabled;
        self.engine.set_enabled(enabled);
    }

    pub fn set_cosmetic_enabled(&self, enabled: bool) {
        self.state().config.cosmetic_enabled = enabled;
        self.cosmetic.set_enabled(enabled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bw_core::{MatchDecision, ResourceType};
    use std::fs;
    use std::path::Path;

    const ADS: &str = r#"[
        {"id": 1, "action": "block", "condition": {"urlFilter": "||ads.example^"}},
        {"id": 2, "action": "allow", "condition": {"urlFilter": "||ads.example/ok^"}}
    ]"#;
    const PRIVACY: &str = r#"[
        {"id": 1, "action": "block", "condition": {"urlFilter": "||tracker.test^", "domainType": "thirdParty"}}
    ]"#;
    const COSMETIC: &str = r#"{"generic": [".ad"], "specific": {"news.test": [".promo"]}}"#;

    fn setup(dir: &Path) -> FilterConfig {
        fs::write(dir.join("ads.json"), ADS).expect("write ads");
        fs::write(dir.join("privacy.json"), PRIVACY).expect("write privacy");
        fs::write(dir.join("cosmetic.json"), COSMETIC).expect("write cosmetic");
        FilterConfig {
            rules_dir: dir.to_path_buf(),
            enabled_rulesets: vec!["ads".to_string(), "privacy".to_string()],
            filter_lists: vec![dir.join("cosmetic.json")],
            ..FilterConfig::default()
        }
    }

    fn decision(service: &FilterService, url: &str, initiator: &str) -> MatchDecision {
        let request = Request::new(url, ResourceType::SCRIPT).with_initiator(initiator);
        service.should_block(&request).decision
    }

    #[test]
    fn loads_rules_and_cosmetics() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (service, report) = FilterService::open(setup(dir.path()));
        assert!(report.is_clean());
        assert_eq!(report.rules, 3);

        assert_eq!(decision(&service, "https://ads.example/x.js", "https://site.test/"), MatchDecision::Block);
        assert_eq!(decision(&service, "https://ads.example/ok/x.js", "https://site.test/"), MatchDecision::Allow);
        assert_eq!(decision(&service, "https://tracker.test/t.js", "https://site.test/"), MatchDecision::Block);
        assert_eq!(decision(&service, "https://tracker.test/t.js", "https://www.tracker.test/"), MatchDecision::Allow);

        let css = service.get_selectors_for_url("https://news.test/");
        assert_eq!(css.selector_count, 2);

        let stats = service.rule_stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_source.get("ads"), Some(&2));
    }

    #[test]
    fn broken_ruleset_is_isolated() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut config = setup(dir.path());
        fs::write(dir.path().join("broken.json"), "not json").expect("write broken");
        config.enabled_rulesets.push("broken".to_string());

        let (service, report) = FilterService::open(config);
        assert_eq!(report.rules, 3);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].kind(), "ruleset_parse_invalid");
        assert_eq!(decision(&service, "https://ads.example/x.js", "https://site.test/"), MatchDecision::Block);
    }

    #[test]
    fn failed_reload_keeps_previous_rules_and_lists() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (service, _) = FilterService::open(setup(dir.path()));

        fs::write(dir.path().join("ads.json"), "[{").expect("corrupt ads");
        fs::remove_file(dir.path().join("cosmetic.json")).expect("remove cosmetic");

        let report = service.reload();
        assert_eq!(report.rulesets_retained, vec!["ads".to_string()]);
        assert_eq!(report.rulesets_loaded, vec!["privacy".to_string()]);
        assert_eq!(report.lists_retained.len(), 1);
        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.rules, 3);

        assert_eq!(decision(&service, "https://ads.example/x.js", "https://site.test/"), MatchDecision::Block);
        assert_eq!(service.get_selectors_for_url("https://news.test/").selector_count, 2);
    }

    #[test]
    fn reload_picks_up_changes() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (service, _) = FilterService::open(setup(dir.path()));

        fs::write(
            dir.path().join("ads.json"),
            r#"[{"id": 9, "action": "block", "condition": {"urlFilter": "/banner/"}}]"#,
        )
        .expect("rewrite ads");
        let report = service.reload();
        assert!(report.is_clean());
        assert_eq!(report.rules, 2);
        assert_eq!(decision(&service, "https://ads.example/x.js", "https://site.test/"), MatchDecision::Allow);
        assert_eq!(decision(&service, "https://cdn.test/banner/a.js", "https://site.test/"), MatchDecision::Block);
    }

    #[test]
    fn set_enabled_rulesets_reloads_engine() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (service, _) = FilterService::open(setup(dir.path()));

        let report = service.set_enabled_rulesets(vec!["privacy".to_string()]);
        assert_eq!(report.rules, 1);
        assert_eq!(decision(&service, "https://ads.example/x.js", "https://site.test/"), MatchDecision::Allow);
        assert_eq!(service.config().enabled_rulesets, vec!["privacy".to_string()]);
        assert_eq!(service.get_selectors_for_url("https://news.test/").selector_count, 2);
    }

    #[test]
    fn all_rulesets_failing_keeps_current_snapshot() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (service, _) = FilterService::open(setup(dir.path()));

        let report = service.set_enabled_rulesets(vec!["missing".to_string()]);
        assert_eq!(report.rules, 3);
        assert!(report.rulesets_loaded.is_empty());
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].kind(), "ruleset_not_found");
        assert_eq!(decision(&service, "https://ads.example/x.js", "https://site.test/"), MatchDecision::Block);
        assert_eq!(service.rule_stats().total, 3);

        fs::write(dir.path().join("ads.json"), "[{").expect("corrupt ads");
        fs::write(dir.path().join("privacy.json"), "[{").expect("corrupt privacy");
        service.set_enabled_rulesets(vec!["ads".to_string(), "privacy".to_string()]);
        let report = service.reload();
        assert_eq!(report.rules, 3);
        assert_eq!(decision(&service, "https://tracker.test/t.js", "https://site.test/"), MatchDecision::Block);

        let report = service.set_enabled_rulesets(Vec::new());
        assert!(report.is_clean());
        assert_eq!(report.rules, 0);
        assert_eq!(decision(&service, "https://ads.example/x.js", "https://site.test/"), MatchDecision::Allow);
    }

    #[test]
    fn config_flags_apply() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = FilterConfig {
            enabled: false,
            cosmetic_enabled: false,
            ..setup(dir.path())
        };
        let service = FilterService::new(config);
        assert_eq!(decision(&service, "https://ads.example/x.js", "https://site.test/"), MatchDecision::Allow);
        assert!(service.get_selectors_for_url("https://news.test/").is_empty());

        service.set_enabled(true);
        service.set_cosmetic_enabled(true);
        assert_eq!(decision(&service, "https://ads.example/x.js", "https://site.test/"), MatchDecision::Block);
        assert!(!service.get_selectors_for_url("https://news.test/").is_empty());
    }
}
