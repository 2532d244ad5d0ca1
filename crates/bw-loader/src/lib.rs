//! Blockwise Ruleset Loader
//!
//! Reads DNR-style rulesets from disk, compiles them for the engine, and
//! owns the engine and cosmetic resolver through `FilterService`.

pub mod config;
pub mod loader;
pub mod optimizer;
pub mod service;
pub mod stats;

pub use config::FilterConfig;
pub use loader::{load_rulesets, merge_rulesets, parse_ruleset, LoadOutcome, RulesetLoader};
pub use optimizer::{optimize_rules, OptimizeStats};
pub use service::{FilterService, ReloadReport};
pub use stats::{get_rule_stats, RuleStats};
