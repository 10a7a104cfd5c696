//! Debounced single-item sync engine.
//!
//! One [`SyncEngine`] owns one logical "unsaved data" slot. Callers hand it the
//! latest payload on every edit; the engine coalesces edits (last write wins),
//! saves after a quiet period, retries transient failures on a fixed delay,
//! backs off when the server rate-limits, and parks in `Offline` while the
//! connectivity monitor reports no network.
//!
//! All mutable state lives behind one `tokio::sync::Mutex`. The lock is never
//! held across the remote call, and hooks run after it is released.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::capabilities::RemoteSave;
use crate::config::SyncOptions;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{ConfigError, SaveError, SaveErrorKind};
use crate::metrics::{SyncMetrics, SyncMetricsSnapshot};
use crate::model::{StatusTransition, SyncSnapshot, SyncStatus, UnixTimeMs};
use crate::scheduler::DelayedTask;
use crate::MAX_RETRY_AFTER_SECS;

const TRANSITION_CHANNEL_CAPACITY: usize = 64;

type SuccessHook = Box<dyn Fn() + Send + Sync>;
type ErrorHook = Box<dyn Fn(&SaveError) + Send + Sync>;
type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

// ============================================================================
// Job state
// ============================================================================

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Timer {
    Debounce,
    Retry,
    Settle,
}

struct JobState<T> {
    payload: Option<T>,
    status: SyncStatus,
    retry_count: u32,
    last_synced: Option<UnixTimeMs>,
    rate_limited_until: Option<Instant>,
    in_flight: bool,
    /// Payload holds changes no successful save has confirmed yet.
    dirty: bool,
    /// Bumped on every new payload so a settling save can tell whether it
    /// was superseded.
    revision: u64,
    flush_after_in_flight: bool,
    debounce: DelayedTask,
    retry: DelayedTask,
    settle: DelayedTask,
}

impl<T> JobState<T> {
    fn new() -> Self {
        Self {
            payload: None,
            status: SyncStatus::Idle,
            retry_count: 0,
            last_synced: None,
            rate_limited_until: None,
            in_flight: false,
            dirty: false,
            revision: 0,
            flush_after_in_flight: false,
            debounce: DelayedTask::new(),
            retry: DelayedTask::new(),
            settle: DelayedTask::new(),
        }
    }

    fn slot(&mut self, timer: Timer) -> &mut DelayedTask {
        match timer {
            Timer::Debounce => &mut self.debounce,
            Timer::Retry => &mut self.retry,
            Timer::Settle => &mut self.settle,
        }
    }

    fn cancel_timers(&mut self) {
        self.debounce.cancel();
        self.retry.cancel();
        self.settle.cancel();
    }

    fn store(&mut self, data: T) -> bool {
        let replaced_unsaved = self.dirty && self.payload.is_some();
        self.payload = Some(data);
        self.dirty = true;
        self.revision = self.revision.wrapping_add(1);
        replaced_unsaved
    }

    fn rate_limit_remaining(&self) -> Option<Duration> {
        self.rate_limited_until
            .and_then(|until| until.checked_duration_since(Instant::now()))
            .filter(|remaining| !remaining.is_zero())
    }

    fn snapshot(&self) -> SyncSnapshot {
        SyncSnapshot {
            status: self.status,
            retry_count: self.retry_count,
            last_synced: self.last_synced,
            rate_limited_until: self.rate_limited_until,
            has_pending_changes: self.dirty,
            retry_scheduled: self.retry.is_scheduled(),
        }
    }
}

enum Hook {
    Success,
    Failed(SaveError),
}

// ============================================================================
// Shared engine internals
// ============================================================================

struct Inner<T> {
    id: Uuid,
    resource: String,
    job: Mutex<JobState<T>>,
    status_tx: watch::Sender<SyncSnapshot>,
    transitions_tx: broadcast::Sender<StatusTransition>,
    saver: Arc<dyn RemoteSave<T>>,
    options: SyncOptions,
    on_success: Option<SuccessHook>,
    on_error: Option<ErrorHook>,
    monitor: ConnectivityMonitor,
    metrics: SyncMetrics,
}

impl<T: Clone + Send + 'static> Inner<T> {
    fn transition(&self, job: &mut JobState<T>, to: SyncStatus) {
        let from = job.status;
        if from == to {
            return;
        }
        job.status = to;
        debug!(engine = %self.id, resource = %self.resource, %from, %to, "sync status changed");
        // No receivers is fine.
        let _ = self.transitions_tx.send(StatusTransition {
            from,
            to,
            at: Instant::now(),
        });
    }

    fn publish(&self, job: &JobState<T>) {
        let next = job.snapshot();
        self.status_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn schedule(self: &Arc<Self>, job: &mut JobState<T>, timer: Timer, delay: Duration) {
        let weak = Arc::downgrade(self);
        job.slot(timer)
            .schedule(delay, move |ticket| Self::fire(weak, timer, ticket));
    }

    fn fire(weak: Weak<Self>, timer: Timer, ticket: u64) -> TaskFuture {
        Box::pin(async move {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match timer {
                Timer::Settle => inner.settle(ticket).await,
                Timer::Debounce | Timer::Retry => {
                    inner.perform_save(Some((timer, ticket))).await;
                }
            }
        })
    }

    fn save_task(self: Arc<Self>) -> TaskFuture {
        Box::pin(async move { self.perform_save(None).await })
    }

    async fn settle(&self, ticket: u64) {
        let mut job = self.job.lock().await;
        if !job.settle.claim(ticket) {
            return;
        }
        if job.status == SyncStatus::Saved {
            self.transition(&mut job, SyncStatus::Idle);
            self.publish(&job);
        }
    }

    #[instrument(skip_all, fields(engine = %self.id, resource = %self.resource))]
    async fn perform_save(self: &Arc<Self>, claim: Option<(Timer, u64)>) {
        let (payload, revision) = {
            let mut job = self.job.lock().await;

            if let Some((timer, ticket)) = claim {
                if !job.slot(timer).claim(ticket) {
                    return;
                }
            }

            if job.in_flight {
                debug!("save already in flight, flushing after it settles");
                job.flush_after_in_flight = true;
                return;
            }

            let Some(payload) = job.payload.clone() else {
                return;
            };

            if !self.monitor.is_online() {
                debug!("offline, deferring save until reconnect");
                SyncMetrics::incr(&self.metrics.offline_deferrals);
                job.debounce.cancel();
                job.retry.cancel();
                self.transition(&mut job, SyncStatus::Offline);
                self.publish(&job);
                return;
            }

            if let Some(remaining) = job.rate_limit_remaining() {
                let delay = remaining.saturating_add(self.options.rate_limit_buffer());
                debug!(delay_ms = %delay.as_millis(), "rate limited, postponing save");
                self.transition(&mut job, SyncStatus::Pending);
                self.schedule(&mut job, Timer::Retry, delay);
                self.publish(&job);
                return;
            }

            // This save carries the latest payload, so pending timers
            // would only repeat it.
            job.in_flight = true;
            job.cancel_timers();
            self.transition(&mut job, SyncStatus::Saving);
            self.publish(&job);
            (payload, job.revision)
        };

        SyncMetrics::incr(&self.metrics.save_attempts);
        let result = self.saver.save(payload).await;

        let (hook, follow_up) = {
            let mut job = self.job.lock().await;
            job.in_flight = false;
            let online = self.monitor.is_online();

            let hook = match result {
                Ok(()) => Some(self.on_saved(&mut job, revision, online)),
                Err(err) => self.on_failed(&mut job, err, online),
            };

            let follow_up = std::mem::take(&mut job.flush_after_in_flight)
                && online
                && job.dirty
                && job.payload.is_some();
            if follow_up {
                job.retry.cancel();
            }

            self.publish(&job);
            (hook, follow_up)
        };

        match hook {
            Some(Hook::Success) => {
                if let Some(on_success) = &self.on_success {
                    on_success();
                }
            }
            Some(Hook::Failed(err)) => {
                if let Some(on_error) = &self.on_error {
                    on_error(&err);
                }
            }
            None => {}
        }

        if follow_up {
            debug!("running follow-up save with latest payload");
            tokio::spawn(Arc::clone(self).save_task());
        }
    }

    fn on_saved(self: &Arc<Self>, job: &mut JobState<T>, revision: u64, online: bool) -> Hook {
        SyncMetrics::incr(&self.metrics.save_successes);
        job.retry_count = 0;
        job.last_synced = Some(UnixTimeMs::now());
        job.rate_limited_until = None;

        // A save that lands while offline stays unconfirmed until reconnect.
        let superseded = job.revision != revision;
        if !superseded && online {
            job.dirty = false;
        }

        if !online {
            self.transition(job, SyncStatus::Offline);
        } else if superseded && job.payload.is_some() {
            self.transition(job, SyncStatus::Pending);
        } else {
            self.transition(job, SyncStatus::Saved);
            self.schedule(job, Timer::Settle, self.options.saved_display());
        }

        info!(superseded, "save succeeded");
        Hook::Success
    }

    fn on_failed(
        self: &Arc<Self>,
        job: &mut JobState<T>,
        err: SaveError,
        online: bool,
    ) -> Option<Hook> {
        SyncMetrics::incr(&self.metrics.save_failures);

        if job.payload.is_none() {
            debug!(error = %err, "save failed after cancel, ignoring");
            self.transition(job, SyncStatus::Idle);
            return None;
        }

        if !online {
            warn!(error = %err, "save failed while offline, waiting for reconnect");
            self.transition(job, SyncStatus::Offline);
            return None;
        }

        match err.kind {
            SaveErrorKind::RateLimited { retry_after } => {
                SyncMetrics::incr(&self.metrics.rate_limited);
                let wait = retry_after
                    .unwrap_or_else(|| self.options.default_rate_limit())
                    .min(Duration::from_secs(MAX_RETRY_AFTER_SECS));
                job.rate_limited_until = Instant::now().checked_add(wait);
                self.transition(job, SyncStatus::Pending);
                self.schedule(
                    job,
                    Timer::Retry,
                    wait.saturating_add(self.options.rate_limit_buffer()),
                );
                warn!(wait_ms = %wait.as_millis(), "rate limited by server");
                None
            }
            SaveErrorKind::Transient if job.retry_count < self.options.max_retries => {
                job.retry_count += 1;
                self.transition(job, SyncStatus::Error);
                self.schedule(job, Timer::Retry, self.options.retry_delay());
                warn!(
                    error = %err,
                    attempt = job.retry_count,
                    max_retries = self.options.max_retries,
                    "save failed, retrying"
                );
                None
            }
            SaveErrorKind::Transient => {
                SyncMetrics::incr(&self.metrics.retries_exhausted);
                self.transition(job, SyncStatus::Error);
                error!(error = %err, retries = job.retry_count, "save failed, retries exhausted");
                Some(Hook::Failed(err))
            }
            SaveErrorKind::Fatal => {
                self.transition(job, SyncStatus::Error);
                error!(error = %err, "save failed permanently");
                Some(Hook::Failed(err))
            }
        }
    }

    async fn on_connectivity(self: &Arc<Self>, online: bool) {
        let mut job = self.job.lock().await;

        if !online {
            job.cancel_timers();
            self.transition(&mut job, SyncStatus::Offline);
            self.publish(&job);
            return;
        }

        if job.status != SyncStatus::Offline {
            return;
        }

        if job.dirty && job.payload.is_some() {
            self.transition(&mut job, SyncStatus::Pending);
            self.publish(&job);
            if job.in_flight {
                job.flush_after_in_flight = true;
            } else {
                info!(engine = %self.id, resource = %self.resource, "reconnected, flushing payload");
                tokio::spawn(Arc::clone(self).save_task());
            }
        } else {
            debug!("reconnected with nothing unsynced");
            self.transition(&mut job, SyncStatus::Idle);
            self.publish(&job);
        }
    }
}

async fn watch_connectivity<T: Clone + Send + 'static>(
    weak: Weak<Inner<T>>,
    mut rx: watch::Receiver<bool>,
) {
    while rx.changed().await.is_ok() {
        let online = *rx.borrow_and_update();
        let Some(inner) = weak.upgrade() else {
            break;
        };
        inner.on_connectivity(online).await;
    }
}

// ============================================================================
// Public handle
// ============================================================================

pub struct SyncEngine<T> {
    inner: Arc<Inner<T>>,
    listener: JoinHandle<()>,
}

impl<T: Clone + Send + 'static> SyncEngine<T> {
    pub fn builder<S>(saver: S) -> SyncEngineBuilder<T>
    where
        S: RemoteSave<T> + 'static,
    {
        SyncEngineBuilder::new(Arc::new(saver))
    }

    /// Stores `data` and saves it once no newer payload has arrived for the
    /// debounce period. Each call restarts the timer.
    pub async fn sync(&self, data: T) {
        let inner = &self.inner;
        let mut job = inner.job.lock().await;

        SyncMetrics::incr(&inner.metrics.sync_calls);
        if job.store(data) {
            SyncMetrics::incr(&inner.metrics.coalesced_payloads);
        }
        job.debounce.cancel();
        job.settle.cancel();

        if !inner.monitor.is_online() {
            SyncMetrics::incr(&inner.metrics.offline_deferrals);
            inner.transition(&mut job, SyncStatus::Offline);
            inner.publish(&job);
            return;
        }

        let debounce = inner.options.debounce();
        let delay = job
            .rate_limit_remaining()
            .map_or(debounce, |remaining| {
                debounce.max(remaining.saturating_add(inner.options.rate_limit_buffer()))
            });

        inner.transition(&mut job, SyncStatus::Pending);
        inner.schedule(&mut job, Timer::Debounce, delay);
        inner.publish(&job);
    }

    /// Stores `data` and saves it right away, resetting the retry budget.
    ///
    /// Resolves when the save settles. If another save is in flight, the
    /// payload is queued and saved once that one settles; the call then
    /// returns without waiting.
    pub async fn sync_now(&self, data: T) {
        let inner = &self.inner;
        {
            let mut job = inner.job.lock().await;

            SyncMetrics::incr(&inner.metrics.sync_calls);
            if job.store(data) {
                SyncMetrics::incr(&inner.metrics.coalesced_payloads);
            }
            job.debounce.cancel();
            job.retry.cancel();
            job.retry_count = 0;

            if job.in_flight {
                debug!(engine = %inner.id, "sync_now during in-flight save, queued follow-up");
                job.flush_after_in_flight = true;
                inner.publish(&job);
                return;
            }
        }

        inner.perform_save(None).await;
    }

    /// Drops the payload and every pending timer and returns to `Idle`.
    ///
    /// A save already in flight still completes. `last_synced` and any
    /// server rate limit are kept.
    pub async fn cancel(&self) {
        let inner = &self.inner;
        let mut job = inner.job.lock().await;

        job.cancel_timers();
        job.payload = None;
        job.dirty = false;
        job.retry_count = 0;
        job.flush_after_in_flight = false;

        inner.transition(&mut job, SyncStatus::Idle);
        inner.publish(&job);
    }

    #[must_use]
    pub fn snapshot(&self) -> SyncSnapshot {
        self.inner.status_tx.borrow().clone()
    }

    #[must_use]
    pub fn status(&self) -> SyncStatus {
        self.inner.status_tx.borrow().status
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.inner.status_tx.subscribe()
    }

    #[must_use]
    pub fn transitions(&self) -> broadcast::Receiver<StatusTransition> {
        self.inner.transitions_tx.subscribe()
    }

    #[must_use]
    pub fn metrics(&self) -> SyncMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    #[must_use]
    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.inner.monitor
    }

    #[must_use]
    pub fn options(&self) -> &SyncOptions {
        &self.inner.options
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.inner.id
    }
}

impl<T> Drop for SyncEngine<T> {
    fn drop(&mut self) {
        self.listener.abort();
        if let Ok(mut job) = self.inner.job.try_lock() {
            job.cancel_timers();
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

pub struct SyncEngineBuilder<T> {
    saver: Arc<dyn RemoteSave<T>>,
    options: SyncOptions,
    monitor: Option<ConnectivityMonitor>,
    resource: String,
    on_success: Option<SuccessHook>,
    on_error: Option<ErrorHook>,
}

impl<T: Clone + Send + 'static> SyncEngineBuilder<T> {
    fn new(saver: Arc<dyn RemoteSave<T>>) -> Self {
        Self {
            saver,
            options: SyncOptions::default(),
            monitor: None,
            resource: "default".to_string(),
            on_success: None,
            on_error: None,
        }
    }

    #[must_use]
    pub fn options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    /// Shares a monitor with other engines. Without one, the engine gets its
    /// own monitor that starts online.
    #[must_use]
    pub fn connectivity(mut self, monitor: ConnectivityMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Name used in log fields.
    #[must_use]
    pub fn resource(mut self, name: impl Into<String>) -> Self {
        self.resource = name.into();
        self
    }

    #[must_use]
    pub fn on_success(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_success = Some(Box::new(hook));
        self
    }

    /// Called once per permanent failure: retries exhausted or a fatal error.
    #[must_use]
    pub fn on_error(mut self, hook: impl Fn(&SaveError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(hook));
        self
    }

    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> Result<SyncEngine<T>, ConfigError> {
        self.options.validate()?;

        let monitor = self.monitor.unwrap_or_default();
        let rx = monitor.subscribe();
        let (status_tx, _) = watch::channel(SyncSnapshot::default());
        let (transitions_tx, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);

        let inner = Arc::new(Inner {
            id: Uuid::new_v4(),
            resource: self.resource,
            job: Mutex::new(JobState::new()),
            status_tx,
            transitions_tx,
            saver: self.saver,
            options: self.options,
            on_success: self.on_success,
            on_error: self.on_error,
            monitor,
            metrics: SyncMetrics::new(),
        });

        let listener = tokio::spawn(watch_connectivity(Arc::downgrade(&inner), rx));

        debug!(engine = %inner.id, resource = %inner.resource, "sync engine started");
        Ok(SyncEngine { inner, listener })
    }
}
