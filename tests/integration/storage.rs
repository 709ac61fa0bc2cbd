//! Durable storage tests.
//!
//! Records written through one scheduler survive its shutdown and are
//! picked up by the next scheduler opened over the same database.

use kronos::{
    Filter, NoCache, PollMode, ScheduleRequest, Scheduler, SchedulerConfig, SchedulerError,
    SqliteStore, Start, StorageConfig, testing::RecordingJob,
};
use std::sync::Arc;
use std::time::Duration;

use crate::common::{minutes_after, tick_at, top_of_hour};

fn sqlite_config(path: &std::path::Path, namespace: &str) -> SchedulerConfig {
    SchedulerConfig {
        storage: StorageConfig::Sqlite {
            path: path.to_string_lossy().into_owned(),
        },
        ..SchedulerConfig::default()
    }
    .with_namespace(namespace)
    .with_poll_mode(PollMode::Manual)
}

#[tokio::test]
async fn test_records_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("jobs.db");
    let top = top_of_hour();

    let first = Scheduler::new();
    first.init_from_config(sqlite_config(&db, "jobsDb")).await.unwrap();
    first
        .register(Arc::new(RecordingJob::new("report")))
        .unwrap();
    let id = first
        .schedule(
            ScheduleRequest::new("report")
                .with_start(Start::At(top))
                .with_interval(Duration::from_secs(3600))
                .with_param("recipient", "ops"),
        )
        .await
        .unwrap();
    first.shutdown().await.unwrap();

    let second = Scheduler::new();
    second.init_from_config(sqlite_config(&db, "jobsDb")).await.unwrap();
    let job = Arc::new(RecordingJob::new("report"));
    second.register(job.clone()).unwrap();

    let records = second.records(&Filter::All).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, id);
    assert_eq!(records[0].interval, Some(Duration::from_secs(3600)));

    tick_at(&second, top).await;
    assert_eq!(job.executions(), 1);
    assert_eq!(job.log().last_params.unwrap().get("recipient"), Some("ops"));

    let records = second.records(&Filter::All).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_ne!(records[0].id, id);
    assert_eq!(records[0].params.cycle_number(), 2);
    assert_eq!(records[0].locks, 0);
    assert_eq!(
        records[0].start_time,
        minutes_after(top, 60).timestamp_millis()
    );
    second.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_namespaces_share_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("jobs.db");

    let billing = Scheduler::new();
    billing
        .init_from_config(sqlite_config(&db, "billing"))
        .await
        .unwrap();
    let reports = Scheduler::new();
    reports
        .init_from_config(sqlite_config(&db, "reports"))
        .await
        .unwrap();

    billing
        .register(Arc::new(RecordingJob::new("invoice")))
        .unwrap();
    reports
        .register(Arc::new(RecordingJob::new("invoice")))
        .unwrap();

    billing
        .schedule(ScheduleRequest::new("invoice"))
        .await
        .unwrap();

    assert_eq!(billing.records(&Filter::All).await.unwrap().len(), 1);
    assert!(reports.records(&Filter::All).await.unwrap().is_empty());

    assert!(reports.drop_all().await.unwrap());
    assert_eq!(billing.records(&Filter::All).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_injected_store_namespace_is_checked() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::new(dir.path().join("jobs.db"), "billing")
        .await
        .unwrap();

    let scheduler = Scheduler::new();
    let config = sqlite_config(&dir.path().join("jobs.db"), "reports");
    let result = scheduler
        .init(Arc::new(store), Arc::new(NoCache), config)
        .await;
    assert!(matches!(result, Err(SchedulerError::InvalidRequest(_))));
}

#[tokio::test]
async fn test_sqlite_drop_job_by_name() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = Scheduler::new();
    scheduler
        .init_from_config(sqlite_config(&dir.path().join("jobs.db"), "jobsDb"))
        .await
        .unwrap();
    scheduler
        .register(Arc::new(RecordingJob::new("report")))
        .unwrap();
    scheduler
        .register(Arc::new(RecordingJob::new("cleanup")))
        .unwrap();

    scheduler
        .schedule(ScheduleRequest::new("report"))
        .await
        .unwrap();
    scheduler
        .schedule(ScheduleRequest::new("cleanup"))
        .await
        .unwrap();

    assert!(scheduler.drop_job("report").await.unwrap());
    let remaining = scheduler.records(&Filter::All).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].job_name, "cleanup");
}
