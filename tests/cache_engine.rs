//! End-to-end behavior of the cache and budget engine.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

use tokenwise::budget::{BudgetConfig, Priority, TokenBudgetAllocator};
use tokenwise::cache::index::jaccard;
use tokenwise::cache::normalize::signature_of;
use tokenwise::cache::strategy::{Condition, ConditionField, ConditionOperator, Strategy};
use tokenwise::cache::{CachePersistence, HitKind, ResponseCache, StoreOptions, StrategyRegistry};
use tokenwise::clock::ManualClock;
use tokenwise::config::CacheConfig;

const START: u64 = 1_700_000_000_000;

fn command_strategy(threshold: f64) -> Strategy {
    Strategy {
        id: "simple_commands".into(),
        display_name: "Short commands".into(),
        enabled: true,
        max_age_secs: 12 * 3600,
        max_size: 50,
        similarity_threshold: threshold,
        priority: 0,
        conditions: vec![Condition::new(
            ConditionField::RequestType,
            ConditionOperator::Equals,
            "command",
        )],
        tags: ["cmd".to_string()].into_iter().collect(),
    }
}

fn cache_with_threshold(threshold: f64) -> (ResponseCache, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(START));
    let registry = StrategyRegistry::new(vec![command_strategy(threshold)]).unwrap();
    (
        ResponseCache::with_clock(CacheConfig::default(), registry, clock.clone()),
        clock,
    )
}

#[test]
fn test_near_match_respects_strategy_threshold() {
    let (strict, _) = cache_with_threshold(0.98);
    strict.store("list files", "ls -la", StoreOptions::default().with_context("fs context"));
    assert!(strict.lookup("list files please", "fs context", &[]).is_none());

    let (loose, _) = cache_with_threshold(0.5);
    loose.store("list files", "ls -la", StoreOptions::default().with_context("fs context"));
    let hit = loose.lookup("list files please", "fs context", &[]).unwrap();
    assert_eq!(hit.kind, HitKind::Approximate);
    assert_eq!(hit.response, "ls -la");
    assert!(hit.confidence >= 0.5 && hit.confidence < 1.0);
}

#[test]
fn test_exact_lookup_returns_what_was_stored() {
    let (cache, _) = cache_with_threshold(0.85);
    cache.store("git status", "On branch main", StoreOptions::default().with_context("repo"));
    let hit = cache.lookup("git status", "repo", &[]).unwrap();
    assert_eq!(hit.response, "On branch main");
    assert_eq!(hit.confidence, 1.0);
}

#[test]
fn test_expired_entries_are_never_served() {
    let (cache, clock) = cache_with_threshold(0.5);
    cache.store("list files", "ls -la", StoreOptions::default());
    clock.advance_secs(12 * 3600 + 1);
    assert!(cache.lookup("list files", "", &[]).is_none());
    assert!(cache.lookup("list files please", "", &[]).is_none());
    cache.verify_consistency().unwrap();
}

#[test]
fn test_similarity_properties() {
    let a = signature_of("deploy the staging cluster", 20);
    let b = signature_of("restart staging cluster nodes", 20);
    let c = signature_of("banana smoothie recipe", 20);
    assert_eq!(jaccard(&a, &b), jaccard(&b, &a));
    assert_eq!(jaccard(&a, &a), 1.0);
    assert_eq!(jaccard(&a, &c), 0.0);
}

#[test]
fn test_concurrent_writes_and_reads_stay_consistent() {
    let (cache, _) = cache_with_threshold(0.5);
    let cache = Arc::new(cache);
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for i in 0..200 {
                    let prompt = format!("run job{} on worker{}", i % 40, t);
                    if i % 3 == 0 {
                        cache.lookup(&prompt, "", &[]);
                    } else {
                        cache.store(&prompt, "done", StoreOptions::default());
                    }
                    if i % 50 == 0 {
                        cache.sweep();
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    cache.verify_consistency().unwrap();
    assert!(cache.count_for("simple_commands") <= 50);
}

#[test]
fn test_capacity_bound_holds_after_every_write() {
    let (cache, clock) = cache_with_threshold(0.9);
    for i in 0..500 {
        clock.advance_millis(100);
        cache.store(&format!("build target{i}"), "ok", StoreOptions::default());
        assert!(cache.count_for("simple_commands") <= 50);
    }
    cache.verify_consistency().unwrap();
}

#[test]
fn test_tags_are_merged_from_caller_and_strategy() {
    let (cache, _) = cache_with_threshold(0.85);
    cache.store(
        "list files",
        "ls",
        StoreOptions::default().with_tags(["Shell"]),
    );
    let entry = &cache.entries()[0];
    let expected: BTreeSet<String> = ["cmd", "shell"].iter().map(|s| s.to_string()).collect();
    assert_eq!(entry.tags, expected);
}

#[tokio::test]
async fn test_snapshot_round_trip_preserves_hits() {
    let persistence = CachePersistence::memory();
    let (source, _) = cache_with_threshold(0.5);
    source.store("list files", "ls -la", StoreOptions::default());
    source.lookup("list files", "", &[]);
    persistence.save(&source).await.unwrap();

    let (target, _) = cache_with_threshold(0.5);
    assert_eq!(persistence.load(&target).await, 1);
    assert_eq!(target.entries()[0].hit_count, 1);
    assert!(target.lookup("list files please", "", &[]).is_some());
}

#[test]
fn test_budget_scenario_and_conservation() {
    let budget = TokenBudgetAllocator::new(BudgetConfig::default());
    assert_eq!(budget.allocate("agent", "t", 9, Priority::Critical), 8000);
    assert!(budget.track_usage("t", 1500));
    assert_eq!(budget.get_available("t"), 6500);
    assert!(!budget.track_usage("t", 7000));
    assert_eq!(budget.get_available("t"), 6500);

    let entry = budget.entry("t").unwrap();
    assert_eq!(entry.allocated, entry.used + entry.remaining);

    let before = budget.stats().global_used;
    budget.release("t");
    assert_eq!(budget.stats().global_used, before - 1500);
}

#[test]
fn test_budget_concurrent_tasks_never_overdraw() {
    let budget = Arc::new(TokenBudgetAllocator::new(BudgetConfig::default()));
    let handles: Vec<_> = (0..16)
        .map(|t| {
            let budget = Arc::clone(&budget);
            thread::spawn(move || {
                let id = format!("task-{t}");
                budget.allocate("agent", &id, (t % 11) as u8, Priority::High);
                while budget.track_usage(&id, 250) {}
                let e = budget.entry(&id).unwrap();
                assert_eq!(e.allocated, e.used + e.remaining);
                assert!(e.remaining < 250);
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    let used: u64 = (0..16)
        .map(|t| budget.entry(&format!("task-{t}")).unwrap().used)
        .sum();
    assert_eq!(budget.stats().global_used, used);
}
