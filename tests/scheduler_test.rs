use chrono::{Duration as ChronoDuration, NaiveTime, TimeZone, Utc};
use oxinews::agent::MockAgent;
use oxinews::clock::FixedClock;
use oxinews::reddit::StaticSource;
use oxinews::store::MemoryStore;
use oxinews::types::{
    Discussion, PipelineConfig, PipelineError, RawItem, Result, RunnerConfig, ScheduleKind,
};
use oxinews::{PipelineRunner, Scheduler};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .try_init();
}

fn config(
    pipeline_id: &str,
    schedule: ScheduleKind,
    last_delivered: Option<chrono::DateTime<Utc>>,
) -> PipelineConfig {
    PipelineConfig {
        pipeline_id: pipeline_id.to_string(),
        pipeline_name: format!("{} brief", pipeline_id),
        user_id: "user-1".to_string(),
        subreddits: vec!["rust".to_string()],
        schedule,
        delivery_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        focus: "Rust".to_string(),
        delivery_count: 0,
        last_delivered,
        is_active: true,
    }
}

fn post(id: &str) -> RawItem {
    RawItem {
        source: "rust".to_string(),
        id: id.to_string(),
        text: format!("Post {}\nBody", id),
        num_comments: 10,
        score: 42,
        permalink: format!("/r/rust/comments/{}/post/", id.trim_start_matches("t3_")),
        created_utc: 1_741_000_000.0,
    }
}

fn healthy_source() -> StaticSource {
    StaticSource::new()
        .with_items("rust", vec![post("t3_a"), post("t3_b")])
        .with_discussion(
            "t3_a",
            Discussion {
                text: "- comment".to_string(),
                permalink: "https://www.reddit.com/r/rust/comments/a/post/".to_string(),
            },
        )
        .with_discussion(
            "t3_b",
            Discussion {
                text: "- comment".to_string(),
                permalink: "https://www.reddit.com/r/rust/comments/b/post/".to_string(),
            },
        )
}

struct Fixture {
    store: Arc<MemoryStore>,
    clock: FixedClock,
    scheduler: Scheduler,
}

fn fixture(source: StaticSource, now: chrono::DateTime<Utc>) -> Fixture {
    fixture_with_tick(source, now, Duration::from_millis(50))
}

fn fixture_with_tick(source: StaticSource, now: chrono::DateTime<Utc>, tick: Duration) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let clock = FixedClock::new(now);
    let runner = Arc::new(PipelineRunner::new(
        Arc::new(source),
        Arc::new(MockAgent::new()),
        store.clone(),
        Arc::new(clock.clone()),
        RunnerConfig::default(),
    ));
    let scheduler = Scheduler::new(
        store.clone(),
        runner,
        Arc::new(clock.clone()),
        tick,
        ChronoDuration::minutes(30),
    );
    Fixture {
        store,
        clock,
        scheduler,
    }
}

#[tokio::test]
async fn test_pass_runs_only_due_active_pipelines() -> Result<()> {
    init_tracing();
    info!("Testing one evaluation pass over mixed candidates");

    let now = Utc.with_ymd_and_hms(2025, 3, 10, 8, 31, 0).unwrap();
    let fx = fixture(healthy_source(), now);

    let yesterday = Utc.with_ymd_and_hms(2025, 3, 9, 8, 31, 0).unwrap();
    let today = Utc.with_ymd_and_hms(2025, 3, 10, 8, 30, 0).unwrap();

    let mut due = config("due", ScheduleKind::Daily, Some(yesterday));
    due.delivery_count = 3;
    fx.store.insert_config(due).await;
    fx.store
        .insert_config(config("not-due", ScheduleKind::Daily, Some(today)))
        .await;
    let mut inactive = config("paused", ScheduleKind::Daily, Some(yesterday));
    inactive.is_active = false;
    fx.store.insert_config(inactive).await;

    let results = fx.scheduler.run_due_pipelines().await?;
    assert_eq!(results.len(), 1, "exactly one pipeline should run");
    assert_eq!(results[0].pipeline_id, "due");
    assert!(results[0].success, "{:?}", results[0].error);

    assert_eq!(fx.store.config("due").await.unwrap().delivery_count, 4);
    assert_eq!(fx.store.config("not-due").await.unwrap().delivery_count, 0);
    assert_eq!(fx.store.config("paused").await.unwrap().delivery_count, 0);
    Ok(())
}

#[tokio::test]
async fn test_never_delivered_pipeline_is_due_immediately() -> Result<()> {
    init_tracing();

    // Well before the run instant; a fresh pipeline runs anyway.
    let now = Utc.with_ymd_and_hms(2025, 3, 10, 3, 0, 0).unwrap();
    let fx = fixture(healthy_source(), now);
    fx.store
        .insert_config(config("fresh", ScheduleKind::Weekly, None))
        .await;

    let results = fx.scheduler.run_due_pipelines().await?;
    assert_eq!(results.len(), 1);
    assert!(results[0].success, "{:?}", results[0].error);
    assert_eq!(fx.store.config("fresh").await.unwrap().delivery_count, 1);
    Ok(())
}

#[tokio::test]
async fn test_one_pipeline_failing_does_not_stop_the_pass() -> Result<()> {
    init_tracing();
    info!("Testing failure isolation across a pass");

    let now = Utc.with_ymd_and_hms(2025, 3, 10, 8, 31, 0).unwrap();
    let source = healthy_source().with_failing_source("broken");
    let fx = fixture(source, now);

    let yesterday = Utc.with_ymd_and_hms(2025, 3, 9, 8, 31, 0).unwrap();
    let mut doomed = config("a-doomed", ScheduleKind::Daily, Some(yesterday));
    doomed.subreddits = vec!["broken".to_string()];
    fx.store.insert_config(doomed).await;
    fx.store
        .insert_config(config("b-healthy", ScheduleKind::Daily, Some(yesterday)))
        .await;

    let results = fx.scheduler.run_due_pipelines().await?;
    assert_eq!(results.len(), 2, "both pipelines should be attempted");

    let doomed = results.iter().find(|r| r.pipeline_id == "a-doomed").unwrap();
    assert!(!doomed.success);
    assert!(doomed
        .error
        .as_deref()
        .unwrap_or("")
        .contains("no posts retrieved"));

    let healthy = results.iter().find(|r| r.pipeline_id == "b-healthy").unwrap();
    assert!(healthy.success, "{:?}", healthy.error);

    assert_eq!(fx.store.config("a-doomed").await.unwrap().delivery_count, 0);
    assert_eq!(fx.store.config("b-healthy").await.unwrap().delivery_count, 1);
    Ok(())
}

#[tokio::test]
async fn test_unknown_schedule_kind_is_skipped() -> Result<()> {
    init_tracing();

    let now = Utc.with_ymd_and_hms(2025, 3, 10, 8, 31, 0).unwrap();
    let fx = fixture(healthy_source(), now);
    fx.store
        .insert_config(config("mystery", ScheduleKind::Unknown, None))
        .await;

    let results = fx.scheduler.run_due_pipelines().await?;
    assert!(results.is_empty(), "unknown schedules must never run");
    assert_eq!(fx.store.config("mystery").await.unwrap().delivery_count, 0);
    Ok(())
}

#[tokio::test]
async fn test_daily_cycle_across_days() -> Result<()> {
    init_tracing();
    info!("Testing the full daily due cycle");

    // Target 09:00 with a 30 minute lead: the run instant is 08:30.
    let now = Utc.with_ymd_and_hms(2025, 3, 10, 8, 31, 0).unwrap();
    let fx = fixture(healthy_source(), now);

    let mut daily = config(
        "cycle",
        ScheduleKind::Daily,
        Some(Utc.with_ymd_and_hms(2025, 3, 9, 8, 0, 0).unwrap()),
    );
    daily.delivery_count = 7;
    fx.store.insert_config(daily).await;

    // 08:31, one minute past the run instant: due.
    let results = fx.scheduler.run_due_pipelines().await?;
    assert_eq!(results.len(), 1);
    assert!(results[0].success, "{:?}", results[0].error);
    let after_first = fx.store.config("cycle").await.unwrap();
    assert_eq!(after_first.delivery_count, 8);
    assert_eq!(after_first.last_delivered, Some(now));

    // Same instant again: already delivered today.
    let results = fx.scheduler.run_due_pipelines().await?;
    assert!(results.is_empty(), "a second pass must not double-deliver");

    // Next day just before the run instant: not yet.
    fx.clock
        .set(Utc.with_ymd_and_hms(2025, 3, 11, 8, 29, 0).unwrap());
    let results = fx.scheduler.run_due_pipelines().await?;
    assert!(results.is_empty());

    // At the run instant: due again.
    fx.clock
        .set(Utc.with_ymd_and_hms(2025, 3, 11, 8, 30, 0).unwrap());
    let results = fx.scheduler.run_due_pipelines().await?;
    assert_eq!(results.len(), 1);
    assert_eq!(fx.store.config("cycle").await.unwrap().delivery_count, 9);
    Ok(())
}

#[tokio::test]
async fn test_weekly_pipeline_waits_out_its_interval() -> Result<()> {
    init_tracing();

    let now = Utc.with_ymd_and_hms(2025, 3, 10, 9, 30, 0).unwrap();
    let fx = fixture(healthy_source(), now);
    fx.store
        .insert_config(config(
            "weekly",
            ScheduleKind::Weekly,
            Some(Utc.with_ymd_and_hms(2025, 3, 5, 9, 0, 0).unwrap()),
        ))
        .await;

    let results = fx.scheduler.run_due_pipelines().await?;
    assert!(results.is_empty(), "five days is inside the weekly interval");

    fx.clock.advance(ChronoDuration::days(2));
    let results = fx.scheduler.run_due_pipelines().await?;
    assert_eq!(results.len(), 1, "seven days since delivery makes it due");
    Ok(())
}

#[tokio::test]
async fn test_background_loop_runs_due_pipeline_once() -> Result<()> {
    init_tracing();
    info!("Testing the background tick loop");

    let now = Utc.with_ymd_and_hms(2025, 3, 10, 8, 31, 0).unwrap();
    let fx = fixture(healthy_source(), now);
    fx.store
        .insert_config(config(
            "bg",
            ScheduleKind::Daily,
            Some(Utc.with_ymd_and_hms(2025, 3, 9, 8, 0, 0).unwrap()),
        ))
        .await;

    fx.scheduler.start().await?;
    assert!(fx.scheduler.is_running().await);

    // A 50ms tick interval gives several passes; the clock never moves, so
    // after the first delivery the pipeline stays not-due.
    tokio::time::sleep(Duration::from_millis(300)).await;
    fx.scheduler.stop().await;
    assert!(!fx.scheduler.is_running().await);

    let delivered = fx.store.config("bg").await.unwrap();
    assert_eq!(
        delivered.delivery_count, 1,
        "the loop should deliver exactly once"
    );
    assert_eq!(delivered.last_delivered, Some(now));
    Ok(())
}

#[tokio::test]
async fn test_zero_tick_interval_is_rejected_at_start() -> Result<()> {
    init_tracing();

    let now = Utc.with_ymd_and_hms(2025, 3, 10, 8, 31, 0).unwrap();
    let fx = fixture_with_tick(healthy_source(), now, Duration::from_secs(0));
    fx.store
        .insert_config(config(
            "zero-tick",
            ScheduleKind::Daily,
            Some(Utc.with_ymd_and_hms(2025, 3, 9, 8, 0, 0).unwrap()),
        ))
        .await;

    let started = fx.scheduler.start().await;
    assert!(
        matches!(started, Err(PipelineError::Config(_))),
        "a zero interval must fail start, not kill the loop later"
    );
    assert!(!fx.scheduler.is_running().await);

    // No loop was spawned, so the due pipeline stays untouched.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(fx.store.config("zero-tick").await.unwrap().delivery_count, 0);
    Ok(())
}

#[tokio::test]
async fn test_start_twice_is_rejected() -> Result<()> {
    init_tracing();

    let now = Utc.with_ymd_and_hms(2025, 3, 10, 8, 31, 0).unwrap();
    let fx = fixture(StaticSource::new(), now);

    fx.scheduler.start().await?;
    let second = fx.scheduler.start().await;
    assert!(
        matches!(second, Err(PipelineError::Config(_))),
        "a second start must be refused while the loop runs"
    );
    fx.scheduler.stop().await;
    Ok(())
}
