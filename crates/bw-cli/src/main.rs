//! Blockwise CLI
//!
//! Loads rulesets and cosmetic lists the way the browser shell does and
//! answers queries against them from the command line.

mod budget;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use serde_json::json;

use bw_core::{Request, ResourceType};
use bw_loader::{FilterConfig, FilterService, ReloadReport};

#[derive(Parser)]
#[command(name = "bw-cli")]
#[command(about = "Blockwise request and cosmetic filtering tools")]
struct Cli {
    #[command(flatten)]
    source: SourceArgs,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SourceArgs {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory of `<id>.json` rulesets
    #[arg(long, global = true)]
    rules_dir: Option<PathBuf>,

    /// Ruleset id to enable (repeatable, replaces the configured set)
    #[arg(long = "ruleset", global = true)]
    rulesets: Vec<String>,

    /// Cosmetic filter list file (repeatable, added to the configured lists)
    #[arg(long = "filter-list", global = true)]
    filter_lists: Vec<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Decide a single request
    Check {
        /// Request URL
        #[arg(short, long)]
        url: String,

        /// Resource type (DNR or host name)
        #[arg(short = 't', long = "type", default_value = "other")]
        resource_type: String,

        /// Initiator (document) URL
        #[arg(short, long)]
        initiator: Option<String>,
    },

    /// Print rule statistics and load diagnostics
    Stats,

    /// Print the hiding CSS for a page
    Cosmetic {
        /// Page URL
        #[arg(short, long)]
        url: String,
    },

    /// Load everything and fail if any diagnostic was produced
    Validate,

    /// Check match latency against a budget
    Budget {
        /// Rounds over the request set
        #[arg(long, default_value_t = 2000)]
        iterations: usize,

        /// P99 latency limit in microseconds
        #[arg(long, default_value_t = budget::BUDGET_MATCH_P99_US)]
        p99_limit_us: f64,
    },
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let result = resolve_config(&cli.source).and_then(|config| match cli.command {
        Commands::Check {
            url,
            resource_type,
            initiator,
        } => cmd_check(config, &url, &resource_type, initiator.as_deref()),
        Commands::Stats => cmd_stats(config),
        Commands::Cosmetic { url } => cmd_cosmetic(config, &url),
        Commands::Validate => cmd_validate(config),
        Commands::Budget {
            iterations,
            p99_limit_us,
        } => budget::run_budget(budget::BudgetOptions {
            config,
            iterations,
            p99_limit_us,
        }),
    });

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn resolve_config(args: &SourceArgs) -> Result<FilterConfig, String> {
    let mut config = match &args.config {
        Some(path) => FilterConfig::from_file(path).map_err(|e| e.to_string())?,
        None => FilterConfig::default(),
    };
    if let Some(dir) = &args.rules_dir {
        config.rules_dir = dir.clone();
    }
    if !args.rulesets.is_empty() {
        config.enabled_rulesets = args.rulesets.clone();
    }
    config.filter_lists.extend(args.filter_lists.iter().cloned());
    Ok(config)
}

fn parse_resource_type(name: &str) -> ResourceType {
    ResourceType::from_dnr_name(name).unwrap_or_else(|| ResourceType::from_platform(name))
}

fn diagnostics(report: &ReloadReport) -> Vec<serde_json::Value> {
    report
        .errors
        .iter()
        .map(|e| json!({ "kind": e.kind(), "message": e.to_string() }))
        .collect()
}

fn print_json(value: &serde_json::Value) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{text}");
    Ok(())
}

fn cmd_check(
    config: FilterConfig,
    url: &str,
    resource_type: &str,
    initiator: Option<&str>,
) -> Result<(), String> {
    let service = FilterService::new(config);

    let mut request = Request::new(url, parse_resource_type(resource_type));
    if let Some(initiator) = initiator {
        request = request.with_initiator(initiator);
    }
    let result = service.should_block(&request);

    let rule = result.matched_rule.as_ref().map(|rule| {
        json!({
            "id": rule.id,
            "source": rule.source,
            "priority": rule.priority,
            "action": rule.action,
        })
    });
    print_json(&json!({
        "url": url,
        "resourceType": request.resource_type.name(),
        "decision": result.decision,
        "rule": rule,
        "redirect": result.redirect(),
    }))
}

fn cmd_stats(config: FilterConfig) -> Result<(), String> {
    let (service, report) = FilterService::open(config);
    let stats = service.rule_stats();
    let cosmetic = service.cosmetic().stats();
    print_json(&json!({
        "rules": stats,
        "cosmetic": cosmetic,
        "rulesetsLoaded": report.rulesets_loaded,
        "listsLoaded": report.lists_loaded,
        "diagnostics": diagnostics(&report),
    }))
}

fn cmd_cosmetic(config: FilterConfig, url: &str) -> Result<(), String> {
    let service = FilterService::new(config);
    let result = service.get_selectors_for_url(url);
    print_json(&json!({
        "url": url,
        "selectorCount": result.selector_count,
        "css": result.css,
    }))
}

fn cmd_validate(config: FilterConfig) -> Result<(), String> {
    let (service, report) = FilterService::open(config);

    println!(
        "Loaded {} rules from {} ruleset(s), {} filter list(s)",
        report.rules,
        report.rulesets_loaded.len(),
        report.lists_loaded.len()
    );
    let cosmetic = service.cosmetic().stats();
    println!(
        "  Cosmetic:    {} generic, {} domain selectors, {} exceptions",
        cosmetic.generic_selectors, cosmetic.specific_selectors, cosmetic.exception_domains
    );

    if report.is_clean() {
        println!("No problems found");
        return Ok(());
    }

    for e in &report.errors {
        println!("  [{}] {}", e.kind(), e);
    }
    Err(format!("{} problem(s) found", report.errors.len()))
}
