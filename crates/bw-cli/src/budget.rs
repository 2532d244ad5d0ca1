use std::time::Instant;

use bw_core::{MatchDecision, Request, ResourceType};
use bw_loader::{FilterConfig, FilterService};

pub struct BudgetOptions {
    pub config: FilterConfig,
    pub iterations: usize,
    pub p99_limit_us: f64,
}

struct BudgetRequest {
    url: &'static str,
    resource_type: ResourceType,
    initiator: Option<&'static str>,
}

const BUDGET_COLD_START_MS: f64 = 500.0;
pub const BUDGET_MATCH_P99_US: f64 = 1000.0;
const BUDGET_COSMETIC_P99_US: f64 = 2000.0;

const REQUESTS: &[BudgetRequest] = &[
    BudgetRequest {
        url: "https://pagead2.googlesyndication.com/pagead/js/adsbygoogle.js",
        resource_type: ResourceType::SCRIPT,
        initiator: Some("https://example.com"),
    },
    BudgetRequest {
        url: "https://www.google-analytics.com/analytics.js",
        resource_type: ResourceType::SCRIPT,
        initiator: Some("https://example.com"),
    },
    BudgetRequest {
        url: "https://example.com/style.css",
        resource_type: ResourceType::STYLESHEET,
        initiator: Some("https://example.com"),
    },
    BudgetRequest {
        url: "https://cdn.example.com/image.png",
        resource_type: ResourceType::IMAGE,
        initiator: Some("https://example.com"),
    },
    BudgetRequest {
        url: "https://api.example.com/data.json?session=1",
        resource_type: ResourceType::XMLHTTPREQUEST,
        initiator: Some("https://example.com"),
    },
    BudgetRequest {
        url: "https://example.com/",
        resource_type: ResourceType::MAIN_FRAME,
        initiator: None,
    },
];

const PAGES: &[&str] = &[
    "https://example.com/",
    "https://www.news.example.co.uk/world/today",
    "https://shop.example.org/cart",
];

pub fn run_budget(opts: BudgetOptions) -> Result<(), String> {
    println!("Performance Budget Check");
    println!("==================================================");

    let cold_start_begin = Instant::now();
    let (service, report) = FilterService::open(opts.config);
    let cold_start_ms = cold_start_begin.elapsed().as_secs_f64() * 1000.0;
    println!(
        "Loaded {} rules, {} diagnostics",
        report.rules,
        report.errors.len()
    );

    println!("Warming up...");
    for _ in 0..1000 {
        for req in REQUESTS {
            let _ = should_block(&service, req);
        }
    }

    println!("Measuring match latency...");
    let latencies = measure(opts.iterations, REQUESTS, |req| {
        let _ = should_block(&service, req);
    });
    let match_p50_us = percentile(&latencies, 0.50);
    let match_p99_us = percentile(&latencies, 0.99);

    println!("Measuring cosmetic latency...");
    let cosmetic_latencies = measure(opts.iterations / 10 + 1, PAGES, |page| {
        let _ = service.get_selectors_for_url(page);
    });
    let cosmetic_p99_us = percentile(&cosmetic_latencies, 0.99);

    let mut passed = true;
    println!();
    println!("Results");
    println!("--------------------------------------------------");
    println!("  Match P50 Latency: {:.2} μs", match_p50_us);

    passed &= report_budget("Cold Start", cold_start_ms, BUDGET_COLD_START_MS, "ms");
    passed &= report_budget("Match P99 Latency", match_p99_us, opts.p99_limit_us, "μs");
    passed &= report_budget("Cosmetic P99 Latency", cosmetic_p99_us, BUDGET_COSMETIC_P99_US, "μs");

    println!();
    println!("==================================================");

    if passed {
        println!("✓ All performance budgets passed");
        Ok(())
    } else {
        Err("Performance budget exceeded".to_string())
    }
}

fn report_budget(name: &str, actual: f64, limit: f64, unit: &str) -> bool {
    let passed = actual <= limit;
    let status = if passed { "✓" } else { "✗" };
    println!(
        "{} {}: {:.2} {} (limit: {:.2} {})",
        status, name, actual, unit, limit, unit
    );
    passed
}

/// Time `op` over every item, `rounds` times. Returns sorted microseconds.
fn measure<T>(rounds: usize, items: &[T], mut op: impl FnMut(&T)) -> Vec<f64> {
    let mut latencies = Vec::with_capacity(rounds * items.len());

    for _ in 0..rounds {
        for item in items {
            let start = Instant::now();
            op(item);
            latencies.push(start.elapsed().as_secs_f64() * 1_000_000.0);
        }
    }

    latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    latencies
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64) * p).ceil() as usize;
    let idx = idx.saturating_sub(1).min(sorted.len() - 1);
    sorted[idx]
}

fn should_block(service: &FilterService, req: &BudgetRequest) -> bool {
    let mut request = Request::new(req.url, req.resource_type);
    if let Some(initiator) = req.initiator {
        request = request.with_initiator(initiator);
    }
    service.should_block(&request).decision == MatchDecision::Block
}
