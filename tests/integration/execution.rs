//! Execution tests: overshoot policies, retries, renewal limits, vetoes
//! and claim contention between schedulers sharing one store.

use chrono::Duration;
use kronos::{
    Event, Filter, InMemoryStore, JobStore, OvershotAction, Periodic, ScheduleRequest, Start,
    testing::{FlakyJob, RecordingJob},
};
use std::sync::Arc;

use crate::common::{
    RecordingHandler, manual_scheduler, manual_scheduler_over, minutes_after, tick_at,
    tick_minutes, top_of_hour,
};

#[tokio::test]
async fn test_one_time_job_runs_in_its_minute() {
    let (scheduler, store) = manual_scheduler().await;
    let job = Arc::new(RecordingJob::new("once"));
    scheduler.register(job.clone()).unwrap();

    let top = top_of_hour();
    scheduler
        .schedule(
            ScheduleRequest::new("once")
                .with_start(Start::At(top + Duration::seconds(30)))
                .with_param("region", "eu"),
        )
        .await
        .unwrap();

    tick_at(&scheduler, minutes_after(top, -1)).await;
    assert_eq!(job.executions(), 0);

    tick_at(&scheduler, top).await;
    assert_eq!(job.executions(), 1);
    assert_eq!(job.successes(), vec![1]);

    let params = job.log().last_params.unwrap();
    assert_eq!(params.get("region"), Some("eu"));
    assert_eq!(params.cycle_number(), 1);
    assert!(store.find_all(&Filter::All).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_overshot_fire_runs_once() {
    let (scheduler, _store) = manual_scheduler().await;
    let handler = RecordingHandler::new();
    scheduler.event_bus().register(handler.clone()).await;
    let job = Arc::new(RecordingJob::new("fire"));
    scheduler.register(job.clone()).unwrap();

    let top = top_of_hour();
    scheduler
        .schedule(ScheduleRequest::new("fire").with_start(Start::At(top)))
        .await
        .unwrap();

    tick_at(&scheduler, minutes_after(top, 5)).await;
    tick_at(&scheduler, minutes_after(top, 6)).await;

    assert_eq!(job.executions(), 1);
    assert!(scheduler.records(&Filter::All).await.unwrap().is_empty());
    assert_eq!(
        handler
            .count(|e| matches!(e, Event::JobOvershot { action: OvershotAction::Fire, .. }))
            .await,
        1
    );
}

#[tokio::test]
async fn test_overshot_fire_does_not_renew_past_end_time() {
    let (scheduler, _store) = manual_scheduler().await;
    let job = Arc::new(RecordingJob::new("ended"));
    scheduler.register(job.clone()).unwrap();

    let top = top_of_hour();
    let id = scheduler
        .schedule(
            ScheduleRequest::new("ended")
                .with_start(Start::At(top))
                .with_interval(std::time::Duration::from_secs(60))
                .with_end_time(minutes_after(top, 2)),
        )
        .await
        .unwrap();

    tick_at(&scheduler, minutes_after(top, 10)).await;

    assert_eq!(job.executions(), 1);
    assert!(job.loaded().is_empty());
    assert_eq!(job.drops(), vec![(id, true)]);
    assert!(scheduler.records(&Filter::All).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_overshot_drop_removes_without_running() {
    let (scheduler, _store) = manual_scheduler().await;
    let job = Arc::new(RecordingJob::new("stale"));
    scheduler.register(job.clone()).unwrap();

    let top = top_of_hour();
    let id = scheduler
        .schedule(
            ScheduleRequest::new("stale")
                .with_start(Start::At(top))
                .with_overshot_action(OvershotAction::Drop),
        )
        .await
        .unwrap();

    tick_at(&scheduler, minutes_after(top, 3)).await;

    assert_eq!(job.executions(), 0);
    assert_eq!(job.drops(), vec![(id, true)]);
    assert!(scheduler.records(&Filter::All).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_overshot_nothing_leaves_record() {
    let (scheduler, _store) = manual_scheduler().await;
    let job = Arc::new(RecordingJob::new("kept"));
    scheduler.register(job.clone()).unwrap();

    let top = top_of_hour();
    let id = scheduler
        .schedule(
            ScheduleRequest::new("kept")
                .with_start(Start::At(top))
                .with_overshot_action(OvershotAction::Nothing),
        )
        .await
        .unwrap();

    tick_minutes(&scheduler, minutes_after(top, 1), 5).await;

    assert_eq!(job.executions(), 0);
    assert!(job.drops().is_empty());
    assert!(scheduler.check_job(&id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_failed_job_is_retried_then_dropped() {
    let (scheduler, _store) = manual_scheduler().await;
    let job = Arc::new(RecordingJob::new("report").failing().with_retries(2));
    scheduler.register(job.clone()).unwrap();

    let top = top_of_hour();
    scheduler
        .schedule(ScheduleRequest::new("report").with_start(Start::At(top)))
        .await
        .unwrap();

    tick_at(&scheduler, top).await;

    let log = job.log();
    assert_eq!(log.executions.len(), 3);
    assert_eq!(log.failures, vec![1]);
    assert_eq!(log.retry_failures, vec![(0, 1), (1, 1)]);
    assert!(log.successes.is_empty());
    assert!(scheduler.records(&Filter::All).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_request_retries_override_job_default() {
    let (scheduler, _store) = manual_scheduler().await;
    let job = Arc::new(RecordingJob::new("report").failing().with_retries(5));
    scheduler.register(job.clone()).unwrap();

    let top = top_of_hour();
    scheduler
        .schedule(
            ScheduleRequest::new("report")
                .with_start(Start::At(top))
                .with_retries(0),
        )
        .await
        .unwrap();

    tick_at(&scheduler, top).await;
    assert_eq!(job.executions(), 1);
    assert!(job.retry_failures().is_empty());
}

#[tokio::test]
async fn test_retry_success_reports_success() {
    let (scheduler, _store) = manual_scheduler().await;
    let job = Arc::new(FlakyJob::new("flaky", 1));
    scheduler.register(job.clone()).unwrap();

    let top = top_of_hour();
    scheduler
        .schedule(
            ScheduleRequest::new("flaky")
                .with_start(Start::At(top))
                .with_retries(3),
        )
        .await
        .unwrap();

    tick_at(&scheduler, top).await;
    assert_eq!(job.attempts(), 2);
    assert!(job.succeeded());
}

#[tokio::test]
async fn test_max_cycles_limits_chain() {
    let (scheduler, _store) = manual_scheduler().await;
    let job = Arc::new(RecordingJob::new("capped"));
    scheduler.register(job.clone()).unwrap();

    let top = top_of_hour();
    scheduler
        .schedule(
            ScheduleRequest::new("capped")
                .with_start(Start::At(top))
                .with_interval(std::time::Duration::from_secs(60))
                .with_max_cycles(3),
        )
        .await
        .unwrap();

    tick_minutes(&scheduler, top, 10).await;

    assert_eq!(job.log().executions, vec![1, 2, 3]);
    assert_eq!(job.loaded().len(), 2);
    assert_eq!(job.drops().len(), 1);
    assert!(scheduler.records(&Filter::All).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_end_time_limits_chain() {
    let (scheduler, _store) = manual_scheduler().await;
    let job = Arc::new(RecordingJob::new("bounded"));
    scheduler.register(job.clone()).unwrap();

    let top = top_of_hour();
    scheduler
        .schedule_periodic(
            ScheduleRequest::new("bounded")
                .with_start(Start::At(minutes_after(top, -1)))
                .with_end_time(minutes_after(top, 3)),
            Periodic::every_minute(),
        )
        .await
        .unwrap();

    tick_minutes(&scheduler, top, 10).await;

    // the run in the end minute is the last one and does not renew
    assert_eq!(job.executions(), 4);
    assert_eq!(job.drops().len(), 1);
    assert!(scheduler.records(&Filter::All).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_veto_skips_run_and_keeps_record() {
    let (scheduler, _store) = manual_scheduler().await;
    let handler = RecordingHandler::new();
    scheduler.event_bus().register(handler.clone()).await;
    let job = Arc::new(RecordingJob::new("gated").with_veto(true));
    scheduler.register(job.clone()).unwrap();

    let top = top_of_hour();
    let id = scheduler
        .schedule(ScheduleRequest::new("gated").with_start(Start::At(top)))
        .await
        .unwrap();

    tick_at(&scheduler, top).await;
    assert_eq!(job.executions(), 0);
    assert_eq!(job.vetoes(), 1);
    let records = scheduler.records(&Filter::All).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, id);
    assert_eq!(records[0].locks, 0);

    job.set_veto(false);
    tick_at(&scheduler, top + Duration::seconds(30)).await;
    assert_eq!(job.executions(), 1);
    assert_eq!(
        handler
            .count(|e| matches!(e, Event::JobVetoed { .. }))
            .await,
        1
    );
}

#[tokio::test]
async fn test_lifecycle_events_in_order() {
    let (scheduler, _store) = manual_scheduler().await;
    let handler = RecordingHandler::new();
    scheduler.event_bus().register(handler.clone()).await;
    scheduler
        .register(Arc::new(RecordingJob::new("evented")))
        .unwrap();

    let top = top_of_hour();
    scheduler
        .schedule(
            ScheduleRequest::new("evented")
                .with_start(Start::At(top))
                .with_interval(std::time::Duration::from_secs(300)),
        )
        .await
        .unwrap();

    tick_at(&scheduler, top).await;

    let events = handler.events().await;
    assert_eq!(events.len(), 3);
    assert!(matches!(events[0], Event::JobRescheduled { .. }));
    assert!(matches!(events[1], Event::JobStarted { cycle_number: 1, .. }));
    assert!(matches!(
        events[2],
        Event::JobCompleted {
            success: true,
            attempts: 1,
            ..
        }
    ));
}

#[tokio::test]
async fn test_shared_store_runs_record_once() {
    let store: Arc<dyn JobStore> = Arc::new(InMemoryStore::new());
    let first = manual_scheduler_over(Arc::clone(&store), true).await;
    let second = manual_scheduler_over(Arc::clone(&store), true).await;

    let delay = std::time::Duration::from_millis(50);
    let job_a = Arc::new(RecordingJob::new("shared").with_delay(delay));
    let job_b = Arc::new(RecordingJob::new("shared").with_delay(delay));
    first.register(job_a.clone()).unwrap();
    second.register(job_b.clone()).unwrap();

    let top = top_of_hour();
    for _ in 0..5 {
        first
            .schedule(ScheduleRequest::new("shared").with_start(Start::At(top)))
            .await
            .unwrap();
    }

    let (a, b) = tokio::join!(first.tick(top), second.tick(top));
    tokio::join!(a.unwrap().join(), b.unwrap().join());

    assert_eq!(job_a.executions() + job_b.executions(), 5);
    assert!(store.find_all(&Filter::All).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unregistered_job_record_waits() {
    let (scheduler, store) = manual_scheduler().await;
    let job = Arc::new(RecordingJob::new("later"));
    scheduler.register(job.clone()).unwrap();

    let top = top_of_hour();
    scheduler
        .schedule(
            ScheduleRequest::new("later")
                .with_start(Start::At(top))
                .with_interval(std::time::Duration::from_secs(60)),
        )
        .await
        .unwrap();

    // a second scheduler over the same store without the job registered
    let other = manual_scheduler_over(store.clone(), false).await;
    tick_at(&other, top).await;

    let records = store.find_all(&Filter::All).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].locks, 0);
    assert_eq!(job.executions(), 0);
}
