use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use bw_core::{
    CompiledRuleSet, CosmeticResolver, DomainType, FilterEngine, Request, ResourceType, Rule,
    RuleAction, RuleCondition,
};

fn url_rule(id: i64, action: RuleAction, filter: String) -> Rule {
    Rule::new(
        id,
        action,
        Some(RuleCondition {
            url_filter: Some(filter),
            ..Default::default()
        }),
    )
}

fn build_rules(count: usize) -> Vec<Rule> {
    let mut rules = Vec::with_capacity(count + 3);
    for i in 0..count {
        let filter = match i % 4 {
            0 => format!("||tracker{i}.example^"),
            1 => format!("/ads/slot{i}/*"),
            2 => format!("||cdn{i}.example/banner^"),
            _ => format!("pixel{i}.gif|"),
        };
        rules.push(url_rule(i as i64 + 1, RuleAction::Block, filter));
    }
    rules.push(
        Rule::new(
            count as i64 + 1,
            RuleAction::Block,
            Some(RuleCondition {
                regex_filter: Some(r"^https?://[^/]+/collect\?v=\d+".to_string()),
                domain_type: Some(DomainType::ThirdParty),
                ..Default::default()
            }),
        )
        .with_priority(2),
    );
    rules.push(url_rule(count as i64 + 2, RuleAction::Allow, "||tracker0.example/ok^".to_string()));
    rules
}

fn requests() -> Vec<(String, ResourceType, Option<&'static str>)> {
    vec![
        ("https://tracker0.example/pixel".to_string(), ResourceType::IMAGE, Some("https://news.test/")),
        ("https://tracker0.example/ok/x".to_string(), ResourceType::SCRIPT, Some("https://news.test/")),
        ("https://static.news.test/app.js".to_string(), ResourceType::SCRIPT, Some("https://news.test/")),
        ("https://stats.other.test/collect?v=2".to_string(), ResourceType::XMLHTTPREQUEST, Some("https://news.test/")),
        ("https://news.test/".to_string(), ResourceType::MAIN_FRAME, None),
        ("https://img.test/ads/slot1/a.png".to_string(), ResourceType::IMAGE, Some("https://img.test/")),
    ]
}

fn bench_should_block(c: &mut Criterion) {
    let mut group = c.benchmark_group("should_block");
    let reqs = requests();
    group.throughput(Throughput::Elements(reqs.len() as u64));

    for size in [100usize, 1_000, 10_000] {
        let engine = FilterEngine::with_rule_set(CompiledRuleSet::new(build_rules(size)));
        group.bench_function(format!("{size}-rules"), |b| {
            b.iter(|| {
                let mut blocked = 0;
                for (url, ty, initiator) in &reqs {
                    let mut req = Request::new(url, *ty);
                    if let Some(initiator) = initiator {
                        req = req.with_initiator(initiator);
                    }
                    if engine.should_block(black_box(&req)).decision.as_str() == "block" {
                        blocked += 1;
                    }
                }
                blocked
            })
        });
    }
    group.finish();
}

fn bench_cosmetic(c: &mut Criterion) {
    let generic: Vec<String> = (0..2_000).map(|i| format!(".ad-{i}")).collect();
    let specific: serde_json::Map<String, serde_json::Value> = (0..500)
        .map(|i| (format!("site{i}.test"), serde_json::json!([format!("#promo-{i}")])))
        .collect();
    let list = serde_json::json!({
        "generic": generic,
        "specific": specific,
        "exceptions": ["site7.test"],
    })
    .to_string();

    let resolver = CosmeticResolver::new();
    if let Err(e) = resolver.load_filter_list_str(&list) {
        panic!("bench list failed to load: {e}");
    }

    c.bench_function("cosmetic/get_selectors_for_url", |b| {
        b.iter(|| resolver.get_selectors_for_url(black_box("https://www.site42.test/article")))
    });
}

criterion_group!(benches, bench_should_block, bench_cosmetic);
criterion_main!(benches);
