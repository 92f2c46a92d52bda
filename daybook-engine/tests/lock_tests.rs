//! Advisory lock across independent connection pools
//!
//! Two pools on one database file stand in for two scheduler processes.

mod helpers;

use daybook_engine::db::outputs::count_outputs_for_run;
use daybook_engine::services::{compute_lock_key, AdvisoryLockService};
use daybook_engine::{Engine, FakeClock};
use helpers::*;
use std::sync::Arc;
use std::time::Duration;

const TTL: Duration = Duration::from_secs(3600);

#[tokio::test]
async fn test_second_process_is_refused_until_release() {
    let (dir, pool_a) = create_test_db().await.unwrap();
    let pool_b = daybook_common::db::init_database(&dir.path().join("test_daybook.db"))
        .await
        .unwrap();

    let scheduler_a = AdvisoryLockService::new(pool_a, TTL);
    let scheduler_b = AdvisoryLockService::new(pool_b, TTL);

    let guard = scheduler_a.try_acquire("run-42").await.unwrap().unwrap();
    assert_eq!(guard.lock_key(), compute_lock_key("run-42"));
    assert!(scheduler_b.try_acquire("run-42").await.unwrap().is_none());
    assert!(scheduler_b.is_locked("run-42").await.unwrap());

    guard.release().await.unwrap();
    let guard_b = scheduler_b.try_acquire("run-42").await.unwrap();
    assert!(guard_b.is_some());
    guard_b.unwrap().release().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_ticks_on_one_run_do_not_double_process() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let mut atoms = make_atoms("2024-03-01", "chatgpt", 3);
    atoms.extend(make_atoms("2024-03-02", "chatgpt", 3));
    let batch_id = seed_batch(&pool, &atoms).await.unwrap();

    let engine = Engine::builder(pool.clone())
        .with_settings(test_settings())
        .with_clock(Arc::new(FakeClock::new()))
        .build();
    let run = engine
        .create_run(&batch_id, &run_config("openai", "gpt-4o-mini", &["chatgpt"]), None)
        .await
        .unwrap();

    let (a, b) = tokio::join!(engine.tick(&run.id, 10), engine.tick(&run.id, 10));

    // Either one tick did everything and the other was refused or found
    // nothing left, or they serialized; jobs are never processed twice
    let processed: u32 = [&a, &b]
        .iter()
        .filter_map(|r| r.as_ref().ok())
        .map(|r| r.jobs_processed)
        .sum();
    assert_eq!(processed, 2);
    for result in [&a, &b] {
        if let Err(e) = result {
            assert_eq!(e.code(), "TICK_IN_PROGRESS");
        }
    }

    let outputs = count_outputs_for_run(&pool, &run.id).await.unwrap();
    assert_eq!(outputs, 2);
}
