//! Single-flight gating, retry queue handling and sweep bookkeeping.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Datelike;
use pretty_assertions::assert_eq;

use finreports::models::StatementKind;
use finreports::scheduler::PRIORITY_SYMBOLS;

use common::{annual_balance, scheduler_for, setup, MockFallback, MockProvider, MockResponse};

#[tokio::test]
async fn concurrent_manual_triggers_get_rejected() {
    let provider =
        Arc::new(MockProvider::always(MockResponse::Empty).with_delay(Duration::from_millis(150)));
    let fallback = Arc::new(MockFallback::yielding(1));
    let env = setup(provider, fallback).await;
    let scheduler = scheduler_for(&env);

    let first = {
        let scheduler = scheduler.clone();
        tokio::spawn(
            async move { scheduler.trigger_manual(Some(vec!["AAA".to_string()])).await },
        )
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    let second = scheduler.trigger_manual(Some(vec!["BBB".to_string()])).await;
    assert!(!second.success);
    assert_eq!(second.message, "already running");
    assert!(second.results.is_empty());

    let first = first.await.unwrap();
    assert!(first.success);
    assert!(first.results[0].success);
}

#[tokio::test]
async fn gate_is_released_after_a_failed_update() {
    let provider = Arc::new(MockProvider::always(MockResponse::Error));
    let fallback = Arc::new(MockFallback::failing());
    let env = setup(provider, fallback).await;
    let scheduler = scheduler_for(&env);

    let first = scheduler.trigger_manual(Some(vec!["AAA".to_string()])).await;
    assert!(first.success);
    assert!(!first.results[0].success);
    assert!(!scheduler.status().await.is_job_running);

    // The gate must admit the next caller
    let second = scheduler.trigger_manual(Some(vec!["BBB".to_string()])).await;
    assert_ne!(second.message, "already running");
}

#[tokio::test]
async fn rate_limit_queues_symbol_and_arms_drain() {
    let provider = Arc::new(MockProvider::always(MockResponse::RateLimited));
    let fallback = Arc::new(MockFallback::yielding(1));
    let env = setup(provider, fallback.clone()).await;
    let scheduler = scheduler_for(&env);

    let response = scheduler.trigger_manual(Some(vec!["ABC".to_string()])).await;
    assert!(response.results[0].rate_limited);
    assert_eq!(fallback.calls(), 0);

    let status = scheduler.status().await;
    assert_eq!(status.retry_queue.size, 1);
    assert_eq!(status.retry_queue.entries[0].symbol, "ABC");
    assert_eq!(status.retry_queue.entries[0].attempts, 1);
    assert!(status.jobs.iter().any(|job| job.id == "retry-drain"));
}

#[tokio::test]
async fn drain_replays_queued_symbol_and_clears_it() {
    let year = chrono::Utc::now().year();
    let provider = Arc::new(MockProvider::scripted(vec![
        MockResponse::RateLimited,
        MockResponse::Records(vec![annual_balance(year, 750.0)]),
    ]));
    let fallback = Arc::new(MockFallback::empty());
    let env = setup(provider, fallback).await;
    let scheduler = scheduler_for(&env);

    let response = scheduler.trigger_manual(Some(vec!["ABC".to_string()])).await;
    assert!(response.results[0].rate_limited);

    // Let the armed drain fire and replay
    tokio::time::sleep(Duration::from_millis(300)).await;

    let status = scheduler.status().await;
    assert_eq!(status.retry_queue.size, 0);

    let stock = env.db.get_stock_by_symbol("ABC").await.unwrap().unwrap();
    assert_eq!(
        env.db
            .count_statements(stock.id.unwrap(), StatementKind::BalanceSheet)
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn persistent_rate_limit_evicts_after_retry_budget() {
    let provider = Arc::new(MockProvider::always(MockResponse::RateLimited));
    let fallback = Arc::new(MockFallback::empty());
    let env = setup(provider.clone(), fallback).await;
    let scheduler = scheduler_for(&env);

    let response = scheduler.trigger_manual(Some(vec!["ABC".to_string()])).await;
    assert!(response.results[0].rate_limited);

    // Initial attempt plus two throttled replays, then eviction
    tokio::time::sleep(Duration::from_millis(500)).await;

    let status = scheduler.status().await;
    assert_eq!(status.retry_queue.size, 0);
    assert_eq!(provider.fetches(), 3);
}

#[tokio::test]
async fn manual_trigger_without_list_covers_all_known_symbols() {
    let provider = Arc::new(MockProvider::always(MockResponse::Empty));
    let fallback = Arc::new(MockFallback::yielding(1));
    let env = setup(provider, fallback.clone()).await;
    env.db.insert_stock("AAA", None, None).await.unwrap();
    env.db.insert_stock("BBB", None, None).await.unwrap();
    let scheduler = scheduler_for(&env);

    let response = scheduler.trigger_manual(None).await;
    assert!(response.success);
    assert_eq!(response.results.len(), 2);
    assert_eq!(fallback.calls(), 2);
}

#[tokio::test]
async fn sweep_covers_every_known_symbol() {
    let provider = Arc::new(MockProvider::always(MockResponse::Empty));
    let fallback = Arc::new(MockFallback::yielding(1));
    let env = setup(provider, fallback.clone()).await;
    env.db.insert_stock("AAA", None, None).await.unwrap();
    env.db.insert_stock("BBB", None, None).await.unwrap();
    let scheduler = scheduler_for(&env);

    scheduler.run_sweep().await;

    assert_eq!(fallback.calls(), 2);
    let status = scheduler.status().await;
    assert!(status.last_run.is_some());
    let sweep = status.last_sweep.unwrap();
    assert_eq!(sweep.symbols, 2);
    assert_eq!(sweep.succeeded, 2);
    assert_eq!(sweep.failed, 0);
    assert!(sweep.error.is_none());
}

#[tokio::test]
async fn failed_sweep_records_the_error_and_releases_the_gate() {
    let provider = Arc::new(MockProvider::always(MockResponse::Empty));
    let fallback = Arc::new(MockFallback::empty());
    let env = setup(provider, fallback).await;
    let scheduler = scheduler_for(&env);

    // Knock the stock table out from under the sweep
    let pool = sqlx::SqlitePool::connect(&format!("sqlite:{}", env.config.database_path))
        .await
        .unwrap();
    sqlx::query("DROP TABLE stocks").execute(&pool).await.unwrap();

    scheduler.run_sweep().await;

    let status = scheduler.status().await;
    assert!(!status.is_job_running);
    assert!(status.last_run.is_some());
    let sweep = status.last_sweep.unwrap();
    assert_eq!(sweep.symbols, 0);
    assert_eq!(sweep.succeeded, 0);
    assert!(sweep.error.is_some());

    // The gate must admit the next caller
    let next = scheduler.trigger_manual(Some(Vec::new())).await;
    assert_ne!(next.message, "already running");
}

#[tokio::test]
async fn initial_sync_seeds_priority_symbols_once() {
    let provider = Arc::new(MockProvider::always(MockResponse::Empty));
    let fallback = Arc::new(MockFallback::yielding(1));
    let env = setup(provider, fallback.clone()).await;
    let scheduler = scheduler_for(&env);

    scheduler.sync_initial_batch().await;
    assert_eq!(fallback.calls(), env.config.initial_sync_limit);
    for symbol in &PRIORITY_SYMBOLS[..env.config.initial_sync_limit] {
        assert!(env.db.get_stock_by_symbol(symbol).await.unwrap().is_some());
    }

    // Runs at most once per process
    scheduler.sync_initial_batch().await;
    assert_eq!(fallback.calls(), env.config.initial_sync_limit);
}

#[tokio::test]
async fn initial_sync_defers_remaining_symbols_on_rate_limit() {
    let provider = Arc::new(MockProvider::always(MockResponse::RateLimited));
    let fallback = Arc::new(MockFallback::empty());
    let env = setup(provider, fallback).await;
    let scheduler = scheduler_for(&env);

    scheduler.sync_initial_batch().await;

    let status = scheduler.status().await;
    assert_eq!(status.retry_queue.size, env.config.initial_sync_limit);
    assert!(status.jobs.iter().any(|job| job.id == "retry-drain"));
}

#[tokio::test]
async fn start_is_idempotent_and_shutdown_clears_timers() {
    let provider = Arc::new(MockProvider::always(MockResponse::Empty));
    let fallback = Arc::new(MockFallback::empty());
    let env = setup(provider, fallback).await;
    let scheduler = scheduler_for(&env);

    scheduler.start().await;
    scheduler.start().await;
    let status = scheduler.status().await;
    assert!(status.is_running);
    assert!(status.jobs.iter().any(|job| job.id == "daily-sweep"));

    scheduler.shutdown().await;
    let status = scheduler.status().await;
    assert!(!status.is_running);
    assert!(status.jobs.is_empty());
}
