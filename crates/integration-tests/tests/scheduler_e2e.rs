// End-to-end scenarios: firing, retries, pause semantics, restart recovery

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cronloom_core::application::RetryConfig;
use cronloom_core::domain::JobStatus;
use cronloom_integration_tests::{fast_config, open_scheduler, open_temp_scheduler};
use parking_lot::Mutex;
use tokio::time::{sleep, Instant};

fn counting_handler(
    counter: &Arc<AtomicU32>,
) -> impl Fn() -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>>
       + Send
       + Sync
       + 'static {
    let counter = Arc::clone(counter);
    move || {
        let counter = Arc::clone(&counter);
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

#[tokio::test]
async fn one_shot_fires_exactly_once() {
    let (scheduler, _store, _dir) = open_temp_scheduler(fast_config()).await;
    let fire_at = Utc::now().timestamp_millis() + 150;
    let invocations = Arc::new(AtomicU32::new(0));

    scheduler
        .schedule(fire_at, "os1", counting_handler(&invocations))
        .await
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if scheduler.job_status("os1").await.unwrap() == Some(JobStatus::Completed) {
            break;
        }
        assert!(Instant::now() < deadline, "one-shot never completed");
        sleep(Duration::from_millis(25)).await;
    }
    // settle, then confirm it fired exactly once
    sleep(Duration::from_millis(250)).await;
    assert_eq!(invocations.load(Ordering::SeqCst), 1);

    let job = scheduler.get("os1").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.run_count, 1);
    assert_eq!(job.next_run, fire_at); // audit value
    assert!(job.last_run.unwrap() >= fire_at);

    scheduler.destroy().await;
}

#[tokio::test]
async fn recurring_fires_on_cadence() {
    let (scheduler, _store, _dir) = open_temp_scheduler(fast_config()).await;
    let invocations = Arc::new(AtomicU32::new(0));

    scheduler
        .schedule("*/1 * * * * *", "r1", counting_handler(&invocations))
        .await
        .unwrap();

    sleep(Duration::from_millis(3_600)).await;
    scheduler.stop().await;
    // let any in-flight post-execution update land
    sleep(Duration::from_millis(200)).await;

    // ~3 firings in 3.6s, give or take tick phase
    let fired = invocations.load(Ordering::SeqCst);
    assert!((2..=5).contains(&fired), "expected ~3 firings, got {fired}");

    let job = scheduler.get("r1").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Active);
    assert_eq!(job.run_count as u32, fired);
    assert!(job.next_run > job.last_run.unwrap());

    scheduler.destroy().await;
}

#[tokio::test]
async fn retry_then_succeed_with_backoff_gaps() {
    let mut config = fast_config();
    config.retry = RetryConfig {
        max_attempts: 3,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(1),
    };
    let (scheduler, _store, _dir) = open_temp_scheduler(config).await;

    let attempts: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));
    let error_hits = Arc::new(AtomicU32::new(0));
    let hits = Arc::clone(&error_hits);
    scheduler.set_error_callback(move |_, _| {
        hits.fetch_add(1, Ordering::SeqCst);
    });

    let log = Arc::clone(&attempts);
    let fire_at = Utc::now().timestamp_millis() + 100;
    scheduler
        .schedule(fire_at, "flaky", move || {
            let log = Arc::clone(&log);
            async move {
                let mut log = log.lock();
                log.push(Instant::now());
                if log.len() < 3 {
                    anyhow::bail!("transient failure {}", log.len());
                }
                Ok(())
            }
        })
        .await
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if scheduler.job_status("flaky").await.unwrap() == Some(JobStatus::Completed) {
            break;
        }
        assert!(Instant::now() < deadline, "job never completed");
        sleep(Duration::from_millis(25)).await;
    }

    let timestamps = attempts.lock().clone();
    assert_eq!(timestamps.len(), 3);
    let gap1 = timestamps[1].duration_since(timestamps[0]);
    let gap2 = timestamps[2].duration_since(timestamps[1]);
    assert!(gap1 >= Duration::from_millis(95) && gap1 < Duration::from_millis(500), "gap1 = {gap1:?}");
    assert!(gap2 >= Duration::from_millis(190) && gap2 < Duration::from_millis(800), "gap2 = {gap2:?}");

    assert_eq!(error_hits.load(Ordering::SeqCst), 0);
    assert_eq!(scheduler.job_run_count("flaky").await.unwrap(), Some(1));

    scheduler.destroy().await;
}

#[tokio::test]
async fn retry_exhausted_routes_final_error_once() {
    let mut config = fast_config();
    config.retry = RetryConfig {
        max_attempts: 3,
        base_delay: Duration::from_millis(50),
        max_delay: Duration::from_secs(1),
    };
    let (scheduler, _store, _dir) = open_temp_scheduler(config).await;

    let failures: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&failures);
    scheduler.set_error_callback(move |identifier, error| {
        sink.lock().push(format!("{identifier}: {error}"));
    });

    let invocations = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&invocations);
    let fire_at = Utc::now().timestamp_millis() + 100;
    scheduler
        .schedule(fire_at, "doomed", move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("permanent failure")
            }
        })
        .await
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if scheduler.job_status("doomed").await.unwrap() == Some(JobStatus::Completed) {
            break;
        }
        assert!(Instant::now() < deadline, "firing never finished");
        sleep(Duration::from_millis(25)).await;
    }

    assert_eq!(invocations.load(Ordering::SeqCst), 3);
    let failures = failures.lock().clone();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].starts_with("doomed:"));
    assert!(failures[0].contains("permanent failure"));
    // the firing still advanced the record
    assert_eq!(scheduler.job_run_count("doomed").await.unwrap(), Some(1));

    scheduler.destroy().await;
}

#[tokio::test]
async fn exhausted_recurring_job_still_advances() {
    let mut config = fast_config();
    config.retry = RetryConfig {
        max_attempts: 2,
        base_delay: Duration::from_millis(50),
        max_delay: Duration::from_secs(1),
    };
    let (scheduler, _store, _dir) = open_temp_scheduler(config).await;

    let invocations = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&invocations);
    scheduler.set_error_callback(|_, _| {});
    scheduler
        .schedule("*/1 * * * * *", "always-down", move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("still broken")
            }
        })
        .await
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(8);
    loop {
        let run_count = scheduler.job_run_count("always-down").await.unwrap().unwrap();
        if run_count >= 1 {
            break;
        }
        assert!(Instant::now() < deadline, "recurring job never fired");
        sleep(Duration::from_millis(50)).await;
    }
    scheduler.stop().await;

    let job = scheduler.get("always-down").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Active);
    assert!(job.run_count >= 1);
    // two attempts per firing
    assert!(invocations.load(Ordering::SeqCst) >= 2);
    assert!(job.next_run > job.last_run.unwrap());

    scheduler.destroy().await;
}

#[tokio::test]
async fn pause_mid_flight_is_honored() {
    let (scheduler, _store, _dir) = open_temp_scheduler(fast_config()).await;

    let handler_finished = Arc::new(AtomicU32::new(0));
    let finished = Arc::clone(&handler_finished);
    let fire_at = Utc::now().timestamp_millis() + 100;
    scheduler
        .schedule(fire_at, "slow", move || {
            let finished = Arc::clone(&finished);
            async move {
                sleep(Duration::from_millis(500)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .unwrap();

    // land the pause while the handler is sleeping
    sleep(Duration::from_millis(300)).await;
    assert!(scheduler.pause("slow").await.unwrap());

    sleep(Duration::from_millis(600)).await;
    assert_eq!(handler_finished.load(Ordering::SeqCst), 1, "handler should finish normally");

    let job = scheduler.get("slow").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Paused);
    assert_eq!(job.run_count, 0);
    assert_eq!(job.last_run, None);

    scheduler.destroy().await;
}

#[tokio::test]
async fn restart_recovers_the_schedule() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("scheduler.db");
    let db = db_path.to_str().unwrap();

    let before_restart;
    {
        let (scheduler, _store) = open_scheduler(db, fast_config()).await;
        let invocations = Arc::new(AtomicU32::new(0));
        scheduler
            .schedule("*/1 * * * * *", "rs1", counting_handler(&invocations))
            .await
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(8);
        loop {
            let run_count = scheduler.job_run_count("rs1").await.unwrap().unwrap();
            if run_count >= 1 {
                before_restart = run_count;
                break;
            }
            assert!(Instant::now() < deadline, "job never fired before restart");
            sleep(Duration::from_millis(50)).await;
        }
        scheduler.destroy().await;
    }

    // a fresh engine against the same store: the record survived, the
    // handler did not and must be re-registered
    let (scheduler, _store) = open_scheduler(db, fast_config()).await;
    let invocations = Arc::new(AtomicU32::new(0));
    assert!(scheduler
        .register_handler("rs1", counting_handler(&invocations))
        .await
        .unwrap());
    scheduler.start().await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let run_count = scheduler.job_run_count("rs1").await.unwrap().unwrap();
        if run_count > before_restart {
            break;
        }
        assert!(Instant::now() < deadline, "job never fired after restart");
        sleep(Duration::from_millis(100)).await;
    }
    assert!(invocations.load(Ordering::SeqCst) >= 1);

    scheduler.destroy().await;
}
