//! Scheduler lifecycle and management API tests.

use kronos::{
    Filter, InMemoryStore, JobRecord, LruCache, Periodic, PollMode, RegistryError,
    ScheduleRequest, Scheduler, SchedulerConfig, SchedulerError, SchedulerState, Start,
    testing::RecordingJob,
};
use std::sync::Arc;
use std::time::Duration;

use crate::common::{manual_config, manual_scheduler, tick_at, top_of_hour, wait_until};

#[tokio::test]
async fn test_operations_require_init() {
    let scheduler = Scheduler::new();
    assert!(!scheduler.is_initialized());

    let result = scheduler.schedule(ScheduleRequest::new("any")).await;
    assert!(matches!(result, Err(SchedulerError::NotInitialized)));

    let result = scheduler.drop_all().await;
    assert!(matches!(result, Err(SchedulerError::NotInitialized)));
    assert_eq!(scheduler.state().await, SchedulerState::Stopped);
}

#[tokio::test]
async fn test_double_init_fails_until_shutdown() {
    let scheduler = Scheduler::new();
    scheduler.init_from_config(manual_config()).await.unwrap();

    let result = scheduler.init_from_config(manual_config()).await;
    assert!(matches!(result, Err(SchedulerError::AlreadyInitialized)));

    scheduler.shutdown().await.unwrap();
    assert!(!scheduler.is_initialized());
    scheduler.init_from_config(manual_config()).await.unwrap();
    assert!(scheduler.is_initialized());
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let scheduler = Scheduler::new();
    let config = manual_config().with_namespace("");
    let result = scheduler.init_from_config(config).await;
    assert!(matches!(result, Err(SchedulerError::Config(_))));
    assert!(!scheduler.is_initialized());
}

#[tokio::test]
async fn test_backend_namespace_must_match_config() {
    let scheduler = Scheduler::new();
    let result = scheduler
        .init(
            Arc::new(InMemoryStore::new()),
            Arc::new(LruCache::new("billing", 8)),
            manual_config().with_namespace("reports"),
        )
        .await;
    assert!(matches!(result, Err(SchedulerError::InvalidRequest(_))));
    assert!(!scheduler.is_initialized());

    scheduler
        .init(
            Arc::new(InMemoryStore::new()),
            Arc::new(LruCache::new("reports", 8)),
            manual_config().with_namespace("reports"),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_shutdown_clears_registry() {
    let (scheduler, _store) = manual_scheduler().await;
    scheduler
        .register(Arc::new(RecordingJob::new("report")))
        .unwrap();

    scheduler.shutdown().await.unwrap();
    scheduler.shutdown().await.unwrap();

    scheduler.init_from_config(manual_config()).await.unwrap();
    scheduler
        .register(Arc::new(RecordingJob::new("report")))
        .unwrap();
}

#[tokio::test]
async fn test_duplicate_registration_fails() {
    let (scheduler, _store) = manual_scheduler().await;
    scheduler
        .register(Arc::new(RecordingJob::new("report")))
        .unwrap();

    let result = scheduler.register(Arc::new(RecordingJob::new("report")));
    assert!(matches!(
        result,
        Err(SchedulerError::Registry(RegistryError::DuplicateJob(name))) if name == "report"
    ));
}

#[tokio::test]
async fn test_scheduling_unregistered_job_fails() {
    let (scheduler, _store) = manual_scheduler().await;

    let result = scheduler.schedule(ScheduleRequest::new("missing")).await;
    assert!(matches!(
        result,
        Err(SchedulerError::Registry(RegistryError::UnregisteredJob(name))) if name == "missing"
    ));
    assert!(scheduler.records(&Filter::All).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_periodic_request_rejects_interval() {
    let (scheduler, _store) = manual_scheduler().await;
    scheduler
        .register(Arc::new(RecordingJob::new("report")))
        .unwrap();

    let request = ScheduleRequest::new("report").with_interval(Duration::from_secs(60));
    let result = scheduler
        .schedule_periodic(request, Periodic::every_minute())
        .await;
    assert!(matches!(result, Err(SchedulerError::InvalidRequest(_))));
}

#[tokio::test]
async fn test_drop_job_id_is_idempotent() {
    let (scheduler, _store) = manual_scheduler().await;
    scheduler
        .register(Arc::new(RecordingJob::new("report")))
        .unwrap();
    let id = scheduler
        .schedule(ScheduleRequest::new("report"))
        .await
        .unwrap();

    assert!(scheduler.drop_job_id(&id).await.unwrap());
    assert!(!scheduler.drop_job_id(&id).await.unwrap());
    assert!(scheduler.check_job(&id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_drop_job_by_name() {
    let (scheduler, _store) = manual_scheduler().await;
    scheduler
        .register(Arc::new(RecordingJob::new("report")))
        .unwrap();
    scheduler
        .register(Arc::new(RecordingJob::new("cleanup")))
        .unwrap();

    for _ in 0..3 {
        scheduler
            .schedule(ScheduleRequest::new("report"))
            .await
            .unwrap();
    }
    let kept = scheduler
        .schedule(ScheduleRequest::new("cleanup"))
        .await
        .unwrap();

    assert!(scheduler.drop_job("report").await.unwrap());
    let remaining = scheduler.records(&Filter::All).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, kept);

    // nothing left to drop still reports success
    assert!(scheduler.drop_job("report").await.unwrap());
}

#[tokio::test]
async fn test_drop_all_empties_store() {
    let (scheduler, store) = manual_scheduler().await;
    scheduler
        .register(Arc::new(RecordingJob::new("report")))
        .unwrap();
    for minutes in 1..=4 {
        scheduler
            .schedule(
                ScheduleRequest::new("report")
                    .with_start(Start::After(Duration::from_secs(minutes * 60))),
            )
            .await
            .unwrap();
    }

    assert!(scheduler.drop_all().await.unwrap());
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_check_job_returns_record_json() {
    let (scheduler, _store) = manual_scheduler().await;
    scheduler
        .register(Arc::new(RecordingJob::new("report").with_retries(2)))
        .unwrap();

    let start = top_of_hour();
    let id = scheduler
        .schedule(
            ScheduleRequest::new("report")
                .with_start(Start::At(start))
                .with_param("recipient", "ops"),
        )
        .await
        .unwrap();

    let json = scheduler.check_job(&id).await.unwrap().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["jobName"], "report");
    assert_eq!(value["retries"], 2);
    assert_eq!(value["startTime"], start.timestamp_millis());
    assert_eq!(value["params"]["recipient"], "ops");
    assert_eq!(value["params"]["cycleNumber"], "1");

    let record: JobRecord = serde_json::from_str(&json).unwrap();
    assert_eq!(record.id, id);
}

#[tokio::test]
async fn test_records_filter_by_param() {
    let (scheduler, _store) = manual_scheduler().await;
    scheduler
        .register(Arc::new(RecordingJob::new("report")))
        .unwrap();
    for region in ["eu", "us", "eu"] {
        scheduler
            .schedule(ScheduleRequest::new("report").with_param("region", region))
            .await
            .unwrap();
    }

    let eu = scheduler
        .records(&Filter::eq("params.region", "eu"))
        .await
        .unwrap();
    assert_eq!(eu.len(), 2);
}

#[tokio::test]
async fn test_manual_mode_has_no_pause() {
    let (scheduler, _store) = manual_scheduler().await;
    assert_eq!(scheduler.state().await, SchedulerState::Running);

    let result = scheduler.pause().await;
    assert!(matches!(result, Err(SchedulerError::InvalidRequest(_))));
    let result = scheduler.resume().await;
    assert!(matches!(result, Err(SchedulerError::InvalidRequest(_))));

    scheduler.shutdown().await.unwrap();
    assert_eq!(scheduler.state().await, SchedulerState::Stopped);
}

#[tokio::test]
async fn test_manual_tick_after_shutdown_fails() {
    let (scheduler, _store) = manual_scheduler().await;
    scheduler.shutdown().await.unwrap();

    let result = scheduler.tick(top_of_hour()).await;
    assert!(matches!(result, Err(SchedulerError::NotInitialized)));
}

#[tokio::test]
async fn test_two_schedulers_are_independent() {
    let (first, _first_store) = manual_scheduler().await;
    let (second, _second_store) = manual_scheduler().await;
    let job = Arc::new(RecordingJob::new("report"));
    first.register(job.clone()).unwrap();
    second
        .register(Arc::new(RecordingJob::new("report")))
        .unwrap();

    let top = top_of_hour();
    first
        .schedule(ScheduleRequest::new("report").with_start(Start::At(top)))
        .await
        .unwrap();

    tick_at(&second, top).await;
    assert_eq!(job.executions(), 0);
    tick_at(&first, top).await;
    assert_eq!(job.executions(), 1);
}

#[tokio::test]
async fn test_background_loop_runs_and_pauses() {
    let scheduler = Scheduler::new();
    let config = SchedulerConfig::default()
        .with_poll_mode(PollMode::Background)
        .with_poll_interval(Duration::from_millis(20));
    scheduler.init_from_config(config).await.unwrap();

    let job = Arc::new(RecordingJob::new("background"));
    scheduler.register(job.clone()).unwrap();
    scheduler
        .schedule(ScheduleRequest::new("background"))
        .await
        .unwrap();

    wait_until(Duration::from_secs(5), || job.executions() == 1).await;
    assert_eq!(scheduler.state().await, SchedulerState::Running);

    scheduler.pause().await.unwrap();
    assert_eq!(scheduler.state().await, SchedulerState::Paused);

    scheduler.resume().await.unwrap();
    assert_eq!(scheduler.state().await, SchedulerState::Running);

    scheduler.shutdown().await.unwrap();
    assert_eq!(scheduler.state().await, SchedulerState::Stopped);
    assert!(!scheduler.is_initialized());
}
