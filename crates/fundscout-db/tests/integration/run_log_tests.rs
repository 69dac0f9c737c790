use fundscout_core::models::{RunCounts, RunStatus, ScraperRunLog};
use fundscout_core::traits::RunLogStore;
use fundscout_db::RunLogRepository;

use crate::integration::common::setup_test_db;

#[tokio::test]
#[ignore = "requires Docker"]
async fn run_log_is_created_running_then_completed() {
    let (pool, _container) = setup_test_db().await;
    let repo = RunLogRepository::new(pool);

    let mut log = ScraperRunLog::start("grants_gov_au");
    repo.create_run_log(&log).await.unwrap();

    let stored = repo.get(log.id).await.unwrap().expect("log should exist");
    assert_eq!(stored.status, RunStatus::Running);
    assert!(stored.end_time.is_none());

    log.complete(
        RunStatus::Partial,
        RunCounts {
            found: 5,
            added: 3,
            updated: 2,
        },
        serde_json::json!({"endpoints_failed": 1}),
    );
    repo.complete_run_log(&log).await.unwrap();

    let stored = repo.get(log.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Partial);
    assert_eq!(
        (stored.grants_found, stored.grants_added, stored.grants_updated),
        (5, 3, 2)
    );
    assert!(stored.end_time.is_some());
    assert_eq!(stored.metadata["endpoints_failed"], 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn completing_twice_is_rejected() {
    let (pool, _container) = setup_test_db().await;
    let repo = RunLogRepository::new(pool);

    let mut log = ScraperRunLog::start("arts_gov_au");
    repo.create_run_log(&log).await.unwrap();
    log.fail("all endpoints failed", RunCounts::default());
    repo.complete_run_log(&log).await.unwrap();

    let err = repo.complete_run_log(&log).await.unwrap_err();
    assert!(err.to_string().contains("already completed"));

    let stored = repo.get(log.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Error);
    assert_eq!(stored.error_message.as_deref(), Some("all endpoints failed"));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn recent_runs_filters_and_orders() {
    let (pool, _container) = setup_test_db().await;
    let repo = RunLogRepository::new(pool);

    for source in ["grants_gov_au", "arts_gov_au", "grants_gov_au"] {
        repo.create_run_log(&ScraperRunLog::start(source)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    let all = repo.recent_runs(None, 10).await.unwrap();
    assert_eq!(all.len(), 3);
    assert!(all[0].start_time >= all[1].start_time);

    let grants = repo.recent_runs(Some("grants_gov_au"), 10).await.unwrap();
    assert_eq!(grants.len(), 2);
    assert!(grants.iter().all(|r| r.source_name == "grants_gov_au"));
}
