use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use planner_sync::{
    ConnectivityMonitor, RemoteSave, SaveError, SyncEngine, SyncOptions, SyncStatus,
};
use tokio::time::Instant;

/// Records every save call and answers from a script, falling back to success.
#[derive(Clone)]
struct ScriptedSaver {
    calls: Arc<Mutex<Vec<(u32, Instant)>>>,
    script: Arc<Mutex<Vec<Result<(), SaveError>>>>,
    latency: Duration,
}

impl ScriptedSaver {
    fn new(script: Vec<Result<(), SaveError>>) -> Self {
        Self {
            calls: Arc::default(),
            script: Arc::new(Mutex::new(script)),
            latency: Duration::ZERO,
        }
    }

    fn slow(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::new(Vec::new())
        }
    }

    fn payloads(&self) -> Vec<u32> {
        self.calls.lock().unwrap().iter().map(|(v, _)| *v).collect()
    }

    fn times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }
}

#[async_trait::async_trait]
impl RemoteSave<u32> for ScriptedSaver {
    async fn save(&self, data: u32) -> Result<(), SaveError> {
        self.calls.lock().unwrap().push((data, Instant::now()));
        let next = {
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                Ok(())
            } else {
                script.remove(0)
            }
        };
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        next
    }
}

fn options(debounce_ms: u64) -> SyncOptions {
    SyncOptions::default().with_debounce(Duration::from_millis(debounce_ms))
}

#[tokio::test(start_paused = true)]
async fn debounced_edits_coalesce_into_one_save() {
    let saver = ScriptedSaver::new(Vec::new());
    let engine = SyncEngine::builder(saver.clone())
        .options(options(100))
        .build()
        .unwrap();
    let mut transitions = engine.transitions();
    let start = Instant::now();

    engine.sync(1).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    engine.sync(2).await;

    tokio::time::sleep(Duration::from_millis(99)).await;
    assert!(saver.payloads().is_empty(), "no save before the quiet period ends");

    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(saver.payloads(), vec![2]);
    assert_eq!(saver.times()[0] - start, Duration::from_millis(110));

    tokio::time::sleep(Duration::from_millis(3100)).await;
    assert_eq!(engine.status(), SyncStatus::Idle);
    assert_eq!(saver.payloads(), vec![2]);

    let mut sequence = Vec::new();
    let mut idle_at = None;
    while let Ok(t) = transitions.try_recv() {
        sequence.push(t.to);
        if t.to == SyncStatus::Idle {
            idle_at = Some(t.at - start);
        }
    }
    assert_eq!(
        sequence,
        vec![
            SyncStatus::Pending,
            SyncStatus::Saving,
            SyncStatus::Saved,
            SyncStatus::Idle
        ]
    );
    assert_eq!(idle_at, Some(Duration::from_millis(3110)));

    let metrics = engine.metrics();
    assert_eq!(metrics.sync_calls, 2);
    assert_eq!(metrics.coalesced_payloads, 1);
    assert_eq!(metrics.save_attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn persistent_failure_exhausts_retries_and_reports_once() {
    let saver = ScriptedSaver::new(
        (0..10)
            .map(|_| Err(SaveError::from_message("network down")))
            .collect(),
    );
    let errors = Arc::new(AtomicU32::new(0));
    let error_counter = Arc::clone(&errors);

    let engine = SyncEngine::builder(saver.clone())
        .options(
            options(100)
                .with_max_retries(3)
                .with_retry_delay(Duration::from_millis(50)),
        )
        .on_error(move |err| {
            assert_eq!(err.message, "network down");
            error_counter.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .unwrap();

    engine.sync(1).await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(saver.payloads().len(), 4);
    assert_eq!(errors.load(Ordering::SeqCst), 1);

    let snap = engine.snapshot();
    assert_eq!(snap.status, SyncStatus::Error);
    assert_eq!(snap.retry_count, 3);
    assert!(snap.is_failed());
    assert!(snap.has_pending_changes);

    let times = saver.times();
    for pair in times.windows(2) {
        assert_eq!(pair[1] - pair[0], Duration::from_millis(50));
    }

    let metrics = engine.metrics();
    assert_eq!(metrics.save_failures, 4);
    assert_eq!(metrics.retries_exhausted, 1);
}

#[tokio::test(start_paused = true)]
async fn rate_limit_waits_for_server_and_does_not_count_as_retry() {
    let saver = ScriptedSaver::new(vec![Err(SaveError::from_message(
        "429 Too many requests retry_after:5",
    ))]);
    let engine = SyncEngine::builder(saver.clone())
        .options(options(100))
        .build()
        .unwrap();

    engine.sync_now(1).await;
    let snap = engine.snapshot();
    assert_eq!(snap.status, SyncStatus::Pending);
    assert_eq!(snap.retry_count, 0);
    assert!(snap.is_rate_limited());
    assert_eq!(snap.label(), "Waiting to save…");

    tokio::time::sleep(Duration::from_secs(8)).await;

    let times = saver.times();
    assert_eq!(times.len(), 2);
    assert_eq!(times[1] - times[0], Duration::from_secs(7));

    let snap = engine.snapshot();
    assert_eq!(snap.status, SyncStatus::Saved);
    assert_eq!(snap.retry_count, 0);
    assert!(snap.rate_limited_until.is_none());
    assert_eq!(engine.metrics().rate_limited, 1);
}

#[tokio::test(start_paused = true)]
async fn rate_limit_without_retry_after_uses_default_wait() {
    let saver = ScriptedSaver::new(vec![Err(SaveError::rate_limited(None))]);
    let engine = SyncEngine::builder(saver.clone())
        .options(options(100))
        .build()
        .unwrap();

    engine.sync_now(1).await;
    tokio::time::sleep(Duration::from_secs(21)).await;
    assert_eq!(saver.payloads().len(), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    let times = saver.times();
    assert_eq!(times.len(), 2);
    assert_eq!(times[1] - times[0], Duration::from_secs(22));
}

#[tokio::test(start_paused = true)]
async fn oversized_retry_after_is_capped_at_one_hour() {
    let saver = ScriptedSaver::new(vec![
        Err(SaveError::from_message("429 retry_after: 18446744073709551615")),
        Err(SaveError::rate_limited(Some(Duration::MAX))),
    ]);
    let engine = SyncEngine::builder(saver.clone())
        .options(options(100))
        .build()
        .unwrap();

    engine.sync_now(1).await;
    let snap = engine.snapshot();
    assert_eq!(snap.status, SyncStatus::Pending);
    assert!(snap.is_rate_limited());

    // One hour plus the 2s buffer, twice.
    tokio::time::sleep(Duration::from_secs(3601)).await;
    assert_eq!(saver.payloads().len(), 1);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(saver.payloads().len(), 2);

    tokio::time::sleep(Duration::from_secs(3603)).await;
    let times = saver.times();
    assert_eq!(times.len(), 3);
    assert_eq!(times[2] - times[1], Duration::from_secs(3602));
    assert_eq!(engine.status(), SyncStatus::Saved);
    assert_eq!(engine.metrics().rate_limited, 2);
}

#[tokio::test(start_paused = true)]
async fn sync_during_rate_limit_is_pushed_past_expiry() {
    let saver = ScriptedSaver::new(vec![Err(SaveError::rate_limited(Some(
        Duration::from_secs(5),
    )))]);
    let engine = SyncEngine::builder(saver.clone())
        .options(options(100))
        .build()
        .unwrap();

    engine.sync_now(1).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    engine.sync(2).await;

    // Remaining 4s plus the 2s buffer.
    tokio::time::sleep(Duration::from_millis(5900)).await;
    assert_eq!(saver.payloads(), vec![1]);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(saver.payloads(), vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn cancel_when_idle_is_a_noop() {
    let saver = ScriptedSaver::new(Vec::new());
    let engine = SyncEngine::builder(saver.clone())
        .options(options(100))
        .build()
        .unwrap();
    let mut transitions = engine.transitions();

    engine.cancel().await;
    engine.cancel().await;

    assert_eq!(engine.status(), SyncStatus::Idle);
    assert!(transitions.try_recv().is_err());
    assert!(saver.payloads().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancel_keeps_last_synced() {
    let saver = ScriptedSaver::new(Vec::new());
    let engine = SyncEngine::builder(saver.clone())
        .options(options(100))
        .build()
        .unwrap();

    engine.sync_now(1).await;
    let synced = engine.snapshot().last_synced;
    assert!(synced.is_some());

    engine.sync(2).await;
    engine.cancel().await;
    assert_eq!(engine.snapshot().last_synced, synced);
    assert_eq!(engine.status(), SyncStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn going_offline_mid_save_then_reconnecting_saves_once() {
    let saver = ScriptedSaver::slow(Duration::from_secs(1));
    let monitor = ConnectivityMonitor::new(true);
    let engine = SyncEngine::builder(saver.clone())
        .options(options(100))
        .connectivity(monitor.clone())
        .build()
        .unwrap();

    engine.sync(1).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(engine.status(), SyncStatus::Saving);

    monitor.set_online(false);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(engine.status(), SyncStatus::Offline);

    // The in-flight save lands while offline; status holds.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(engine.status(), SyncStatus::Offline);
    assert!(engine.snapshot().has_pending_changes);
    assert_eq!(saver.payloads(), vec![1]);

    monitor.set_online(true);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(saver.payloads(), vec![1, 1]);
    assert_eq!(engine.status(), SyncStatus::Saved);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(saver.payloads().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn reconnect_with_nothing_unsynced_does_not_save() {
    let saver = ScriptedSaver::new(Vec::new());
    let monitor = ConnectivityMonitor::new(true);
    let engine = SyncEngine::builder(saver.clone())
        .options(options(100))
        .connectivity(monitor.clone())
        .build()
        .unwrap();

    engine.sync_now(1).await;
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(engine.status(), SyncStatus::Idle);
    assert!(!engine.snapshot().has_pending_changes);

    for _ in 0..3 {
        monitor.set_online(false);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.status(), SyncStatus::Offline);

        monitor.set_online(true);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(engine.status(), SyncStatus::Idle);
    }

    assert_eq!(saver.payloads(), vec![1]);
    assert_eq!(engine.metrics().save_attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn offline_edits_flush_latest_payload_on_reconnect() {
    let saver = ScriptedSaver::new(Vec::new());
    let monitor = ConnectivityMonitor::new(false);
    let engine = SyncEngine::builder(saver.clone())
        .options(options(100))
        .connectivity(monitor.clone())
        .build()
        .unwrap();

    for v in 1..=3 {
        engine.sync(v).await;
    }
    assert_eq!(engine.status(), SyncStatus::Offline);
    assert!(engine.snapshot().has_pending_changes);
    assert_eq!(engine.metrics().offline_deferrals, 3);

    monitor.set_online(true);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(saver.payloads(), vec![3]);
    assert_eq!(engine.status(), SyncStatus::Saved);
}

#[tokio::test(start_paused = true)]
async fn going_offline_cancels_pending_retry() {
    let saver = ScriptedSaver::new(vec![Err(SaveError::transient("timeout"))]);
    let monitor = ConnectivityMonitor::new(true);
    let engine = SyncEngine::builder(saver.clone())
        .options(options(100).with_retry_delay(Duration::from_millis(500)))
        .connectivity(monitor.clone())
        .build()
        .unwrap();

    engine.sync_now(1).await;
    assert!(engine.snapshot().retry_scheduled);

    monitor.set_online(false);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(saver.payloads().len(), 1);
    assert_eq!(engine.status(), SyncStatus::Offline);
    assert!(!engine.snapshot().retry_scheduled);
}

#[tokio::test(start_paused = true)]
async fn sync_now_during_in_flight_save_runs_one_follow_up() {
    let saver = ScriptedSaver::slow(Duration::from_secs(1));
    let engine = Arc::new(
        SyncEngine::builder(saver.clone())
            .options(options(100))
            .build()
            .unwrap(),
    );

    let first = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.sync_now(1).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.status(), SyncStatus::Saving);

    engine.sync_now(2).await;
    engine.sync_now(3).await;
    assert_eq!(saver.payloads(), vec![1]);

    first.await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(saver.payloads(), vec![1, 3]);
    assert!(!engine.snapshot().has_pending_changes);
}

#[tokio::test(start_paused = true)]
async fn edit_during_save_keeps_changes_pending() {
    let saver = ScriptedSaver::slow(Duration::from_secs(1));
    let engine = SyncEngine::builder(saver.clone())
        .options(options(100))
        .build()
        .unwrap();

    engine.sync(1).await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    engine.sync(2).await;

    // The first save lands at 1.1s with payload 2 already waiting, so the
    // follow-up starts straight away.
    tokio::time::sleep(Duration::from_millis(650)).await;
    let snap = engine.snapshot();
    assert_eq!(snap.status, SyncStatus::Saving);
    assert!(snap.has_pending_changes);
    assert!(snap.last_synced.is_some());
    assert_eq!(saver.payloads(), vec![1, 2]);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(saver.payloads(), vec![1, 2]);
    assert!(!engine.snapshot().has_pending_changes);
}

#[tokio::test(start_paused = true)]
async fn subscribers_observe_snapshots() {
    let saver = ScriptedSaver::new(Vec::new());
    let engine = SyncEngine::builder(saver.clone())
        .options(options(100))
        .resource("weekly-plan")
        .build()
        .unwrap();
    let mut rx = engine.subscribe();

    engine.sync(7).await;
    rx.changed().await.unwrap();
    assert_eq!(rx.borrow_and_update().status, SyncStatus::Pending);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(rx.has_changed().unwrap());
    assert_eq!(rx.borrow_and_update().status, SyncStatus::Saved);
}

#[tokio::test(start_paused = true)]
async fn success_hook_runs_per_successful_save() {
    let saver = ScriptedSaver::new(Vec::new());
    let successes = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&successes);

    let engine = SyncEngine::builder(saver.clone())
        .options(options(100))
        .on_success(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .unwrap();

    engine.sync_now(1).await;
    engine.sync_now(2).await;
    assert_eq!(successes.load(Ordering::SeqCst), 2);
}
