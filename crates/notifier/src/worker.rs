use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use herald_common::HeraldError;
use herald_common::config::AppConfig;
use herald_common::types::{NotificationRecord, NotificationStatus};
use herald_queue::{DEFAULT_BATCH_SIZE, NotificationQueue};

use crate::dispatcher::Dispatcher;

/// Upper bound on the sleep after consecutive poll failures.
pub const MAX_POLL_BACKOFF: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub poll_interval: Duration,
    pub batch_size: usize,
    pub max_poll_backoff: Duration,
    /// Upper bound on a single delivery attempt.
    pub delivery_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            batch_size: DEFAULT_BATCH_SIZE,
            max_poll_backoff: MAX_POLL_BACKOFF,
            delivery_timeout: Duration::from_secs(60),
        }
    }
}

impl From<&AppConfig> for WorkerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            batch_size: config.batch_size,
            max_poll_backoff: MAX_POLL_BACKOFF,
            delivery_timeout: Duration::from_secs(config.delivery_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    ShuttingDown,
    Stopped,
}

/// Counters reported when the worker stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub polls: u64,
    pub poll_failures: u64,
    pub delivered: u64,
    /// Failed attempts that left the record pending for another try.
    pub retried: u64,
    pub permanently_failed: u64,
    /// Outcomes that could not be recorded in the queue.
    pub bookkeeping_errors: u64,
}

/// Background delivery loop.
///
/// Each cycle fetches the due notifications, delivers them one at a time and
/// records every outcome. A failure in one record never affects the others,
/// and nothing escapes the loop except a shutdown request.
pub struct NotificationWorker {
    queue: Arc<NotificationQueue>,
    dispatcher: Arc<Dispatcher>,
    config: WorkerConfig,
    shutdown: CancellationToken,
    state: watch::Sender<WorkerState>,
}

impl NotificationWorker {
    pub fn new(
        queue: Arc<NotificationQueue>,
        dispatcher: Arc<Dispatcher>,
        config: WorkerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(WorkerState::Running);
        Self {
            queue,
            dispatcher,
            config,
            shutdown,
            state,
        }
    }

    /// Observe lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Run until the shutdown token is cancelled.
    ///
    /// Shutdown is observed between records and during sleeps. A delivery in
    /// flight is allowed to finish (bounded by the delivery timeout) and its
    /// outcome is recorded before the loop exits.
    pub async fn run(self) -> WorkerStats {
        let mut stats = WorkerStats::default();
        let mut consecutive_failures: u32 = 0;

        tracing::info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            max_retries = self.queue.policy().max_retries(),
            "Notification worker started"
        );

        while !self.shutdown.is_cancelled() {
            stats.polls += 1;

            let delay = match self.queue.fetch_ready(self.config.batch_size).await {
                Ok(batch) => {
                    consecutive_failures = 0;
                    if !batch.is_empty() {
                        tracing::info!(count = batch.len(), "Processing due notifications");
                    }
                    self.process_batch(batch, &mut stats).await;
                    self.config.poll_interval
                }
                Err(e) => {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    stats.poll_failures += 1;
                    let backoff = poll_backoff(
                        self.config.poll_interval,
                        consecutive_failures,
                        self.config.max_poll_backoff,
                    );
                    tracing::error!(
                        error = %e,
                        consecutive_failures,
                        backoff_secs = backoff.as_secs(),
                        "Failed to fetch due notifications"
                    );
                    backoff
                }
            };

            if !self.sleep(delay).await {
                break;
            }
        }

        self.begin_shutdown();
        self.state.send_replace(WorkerState::Stopped);
        tracing::info!(
            polls = stats.polls,
            poll_failures = stats.poll_failures,
            delivered = stats.delivered,
            retried = stats.retried,
            permanently_failed = stats.permanently_failed,
            bookkeeping_errors = stats.bookkeeping_errors,
            "Notification worker stopped"
        );
        stats
    }

    async fn process_batch(&self, batch: Vec<NotificationRecord>, stats: &mut WorkerStats) {
        for record in batch {
            if self.shutdown.is_cancelled() {
                self.begin_shutdown();
                tracing::info!("Leaving rest of batch pending");
                break;
            }
            self.process_one(&record, stats).await;
        }
    }

    async fn process_one(&self, record: &NotificationRecord, stats: &mut WorkerStats) {
        let delivery =
            tokio::time::timeout(self.config.delivery_timeout, self.dispatcher.dispatch(record));
        tokio::pin!(delivery);

        // A shutdown request does not abort the attempt in flight.
        let result = tokio::select! {
            result = &mut delivery => result,
            _ = self.shutdown.cancelled() => {
                self.begin_shutdown();
                delivery.await
            }
        };
        let outcome = result.unwrap_or_else(|_| {
            Err(HeraldError::Delivery(format!(
                "Delivery timed out after {}s",
                self.config.delivery_timeout.as_secs()
            )))
        });

        match outcome {
            Ok(()) => match self.queue.mark_delivered(record.id).await {
                Ok(_) => stats.delivered += 1,
                Err(e) => {
                    stats.bookkeeping_errors += 1;
                    tracing::error!(
                        notification_id = %record.id,
                        error = %e,
                        "Delivered notification could not be marked delivered"
                    );
                }
            },
            Err(delivery_error) => {
                tracing::warn!(
                    notification_id = %record.id,
                    notification_type = %record.notification_type,
                    target = %record.target,
                    error = %delivery_error,
                    "Notification delivery failed"
                );
                match self
                    .queue
                    .mark_failed(record.id, &delivery_error.to_string())
                    .await
                {
                    Ok(updated) if updated.status == NotificationStatus::Failed => {
                        stats.permanently_failed += 1;
                    }
                    Ok(_) => stats.retried += 1,
                    Err(e) => {
                        stats.bookkeeping_errors += 1;
                        tracing::error!(
                            notification_id = %record.id,
                            error = %e,
                            "Failed delivery could not be recorded"
                        );
                    }
                }
            }
        }
    }

    /// Sleep for `delay`, waking early on shutdown. Returns `false` if
    /// shutdown was requested.
    async fn sleep(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => {
                self.begin_shutdown();
                false
            }
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Move from `Running` to `ShuttingDown` the first time cancellation is seen.
    fn begin_shutdown(&self) {
        let changed = self.state.send_if_modified(|state| {
            if *state == WorkerState::Running {
                *state = WorkerState::ShuttingDown;
                true
            } else {
                false
            }
        });
        if changed {
            tracing::info!("Shutdown requested, notification worker stopping");
        }
    }
}

/// `min(interval * 2^failures, cap)`.
fn poll_backoff(interval: Duration, consecutive_failures: u32, cap: Duration) -> Duration {
    2u32.checked_pow(consecutive_failures)
        .and_then(|factor| interval.checked_mul(factor))
        .map_or(cap, |backoff| backoff.min(cap))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use herald_common::HeraldResult;
    use herald_common::clock::{Clock, FixedClock};
    use herald_common::mutation_log::MemoryMutationSink;
    use herald_common::types::{NotificationType, Payload, QueueCounts};
    use herald_queue::{InMemoryStore, NotificationStore, RetryPolicy};
    use std::sync::Mutex;
    use tokio::time::Instant;
    use uuid::Uuid;

    use crate::handler::DeliveryHandler;

    /// Wall clock that follows tokio's (paused) test clock.
    struct TokioClock {
        base: DateTime<Utc>,
        start: Instant,
    }

    impl TokioClock {
        fn new() -> Self {
            Self {
                base: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
                start: Instant::now(),
            }
        }
    }

    impl Clock for TokioClock {
        fn now(&self) -> DateTime<Utc> {
            self.base + chrono::Duration::from_std(self.start.elapsed()).unwrap()
        }
    }

    /// Fails deliveries whose payload has `"fail": true`.
    struct ScriptedHandler {
        delivered: Mutex<Vec<Uuid>>,
        cancel_on_first: Option<CancellationToken>,
    }

    impl ScriptedHandler {
        fn new() -> Self {
            Self {
                delivered: Mutex::new(Vec::new()),
                cancel_on_first: None,
            }
        }
    }

    #[async_trait]
    impl DeliveryHandler for ScriptedHandler {
        async fn deliver(&self, record: &NotificationRecord) -> HeraldResult<()> {
            if let Some(token) = &self.cancel_on_first {
                token.cancel();
            }
            if record.payload.get("fail") == Some(&serde_json::json!(true)) {
                return Err(HeraldError::Delivery("webhook returned 500".to_string()));
            }
            if let Some(secs) = record.payload.get("sleep_secs").and_then(|v| v.as_u64()) {
                tokio::time::sleep(Duration::from_secs(secs)).await;
            }
            self.delivered.lock().unwrap().push(record.id);
            Ok(())
        }
    }

    /// In-memory store with injected faults: the first `failures_left`
    /// fetches error, and updates to `reject_updates_for` always error.
    struct FaultyStore {
        inner: InMemoryStore,
        failures_left: Mutex<u32>,
        reject_updates_for: Mutex<Option<Uuid>>,
        fetched_at: Mutex<Vec<Instant>>,
    }

    impl FaultyStore {
        fn new(fetch_failures: u32) -> Self {
            Self {
                inner: InMemoryStore::new(),
                failures_left: Mutex::new(fetch_failures),
                reject_updates_for: Mutex::new(None),
                fetched_at: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl NotificationStore for FaultyStore {
        async fn insert(&self, record: &NotificationRecord) -> HeraldResult<()> {
            self.inner.insert(record).await
        }

        async fn get(&self, id: Uuid) -> HeraldResult<Option<NotificationRecord>> {
            self.inner.get(id).await
        }

        async fn fetch_ready(
            &self,
            now: DateTime<Utc>,
            limit: usize,
        ) -> HeraldResult<Vec<NotificationRecord>> {
            self.fetched_at.lock().unwrap().push(Instant::now());
            {
                let mut left = self.failures_left.lock().unwrap();
                if *left > 0 {
                    *left -= 1;
                    return Err(HeraldError::Delivery("connection refused".to_string()));
                }
            }
            self.inner.fetch_ready(now, limit).await
        }

        async fn update_pending(&self, record: &NotificationRecord) -> HeraldResult<bool> {
            if *self.reject_updates_for.lock().unwrap() == Some(record.id) {
                return Err(HeraldError::Delivery("connection reset".to_string()));
            }
            self.inner.update_pending(record).await
        }

        async fn counts(&self) -> HeraldResult<QueueCounts> {
            self.inner.counts().await
        }
    }

    fn queue_with(
        store: Arc<dyn NotificationStore>,
        clock: Arc<dyn Clock>,
        max_retries: u32,
    ) -> Arc<NotificationQueue> {
        Arc::new(NotificationQueue::new(
            store,
            RetryPolicy::with_max_retries(max_retries).unwrap(),
            clock,
            Arc::new(MemoryMutationSink::new()),
        ))
    }

    fn dispatcher_with(handler: Arc<dyn DeliveryHandler>) -> Arc<Dispatcher> {
        let mut dispatcher = Dispatcher::new();
        dispatcher
            .register(NotificationType::ChatMessage, handler)
            .unwrap();
        Arc::new(dispatcher)
    }

    fn config(poll_interval_secs: u64) -> WorkerConfig {
        WorkerConfig {
            poll_interval: Duration::from_secs(poll_interval_secs),
            delivery_timeout: Duration::from_secs(5),
            ..WorkerConfig::default()
        }
    }

    fn fixed_clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        ))
    }

    fn payload(fail: bool) -> Payload {
        let mut payload = Payload::new();
        payload.insert("fail".to_string(), serde_json::json!(fail));
        payload
    }

    /// Run the worker for `run_for` of (paused) time, then shut it down.
    async fn run_for(
        worker: NotificationWorker,
        token: CancellationToken,
        run_for: Duration,
    ) -> WorkerStats {
        let handle = tokio::spawn(worker.run());
        tokio::time::sleep(run_for).await;
        token.cancel();
        handle.await.unwrap()
    }

    #[test]
    fn test_poll_backoff_doubles_and_caps() {
        let interval = Duration::from_secs(30);
        let cap = Duration::from_secs(300);
        assert_eq!(poll_backoff(interval, 1, cap), Duration::from_secs(60));
        assert_eq!(poll_backoff(interval, 2, cap), Duration::from_secs(120));
        assert_eq!(poll_backoff(interval, 3, cap), Duration::from_secs(240));
        assert_eq!(poll_backoff(interval, 4, cap), cap);
        assert_eq!(poll_backoff(interval, 64, cap), cap);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_in_batch_does_not_affect_others() {
        let clock = fixed_clock();
        let queue = queue_with(Arc::new(InMemoryStore::new()), clock, 10);
        let first = queue.enqueue("chat_message", "#a", payload(false)).await.unwrap();
        let second = queue.enqueue("chat_message", "#b", payload(true)).await.unwrap();
        let third = queue.enqueue("chat_message", "#c", payload(false)).await.unwrap();

        let handler = Arc::new(ScriptedHandler::new());
        let token = CancellationToken::new();
        let worker = NotificationWorker::new(
            queue.clone(),
            dispatcher_with(handler.clone()),
            config(30),
            token.clone(),
        );
        let stats = run_for(worker, token, Duration::from_secs(1)).await;

        assert_eq!(stats.polls, 1);
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.retried, 1);
        assert_eq!(*handler.delivered.lock().unwrap(), vec![first.id, third.id]);

        assert_eq!(queue.get(first.id).await.unwrap().status, NotificationStatus::Delivered);
        assert_eq!(queue.get(third.id).await.unwrap().status, NotificationStatus::Delivered);
        let failed = queue.get(second.id).await.unwrap();
        assert_eq!(failed.status, NotificationStatus::Pending);
        assert_eq!(failed.retry_count, 1);
        assert_eq!(failed.error_message.as_deref(), Some("webhook returned 500"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_notification_fails_permanently() {
        let clock = Arc::new(TokioClock::new());
        let queue = queue_with(Arc::new(InMemoryStore::new()), clock, 3);
        let record = queue.enqueue("chat_message", "#general", payload(true)).await.unwrap();

        let token = CancellationToken::new();
        let worker = NotificationWorker::new(
            queue.clone(),
            dispatcher_with(Arc::new(ScriptedHandler::new())),
            config(30),
            token.clone(),
        );
        // Attempts at t=0, t=30 (30s backoff) and t=90 (60s backoff).
        let stats = run_for(worker, token, Duration::from_secs(200)).await;

        assert_eq!(stats.retried, 2);
        assert_eq!(stats.permanently_failed, 1);
        assert_eq!(stats.delivered, 0);

        let stored = queue.get(record.id).await.unwrap();
        assert_eq!(stored.status, NotificationStatus::Failed);
        assert_eq!(stored.retry_count, 3);
        assert!(stored.next_retry_at.is_none());
        assert_eq!(stored.error_message.as_deref(), Some("webhook returned 500"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_failures_back_off_exponentially() {
        let store = Arc::new(FaultyStore::new(4));
        let queue = queue_with(store.clone(), Arc::new(TokioClock::new()), 10);
        let record = queue.enqueue("chat_message", "#ops", payload(false)).await.unwrap();

        let token = CancellationToken::new();
        let worker = NotificationWorker::new(
            queue.clone(),
            dispatcher_with(Arc::new(ScriptedHandler::new())),
            config(30),
            token.clone(),
        );
        let stats = run_for(worker, token, Duration::from_secs(800)).await;
        assert_eq!(stats.poll_failures, 4);
        assert_eq!(stats.delivered, 1);

        // Fetch failures never count against the record itself.
        let stored = queue.get(record.id).await.unwrap();
        assert_eq!(stored.status, NotificationStatus::Delivered);
        assert_eq!(stored.retry_count, 0);
        assert!(stored.error_message.is_none());

        let fetched_at = store.fetched_at.lock().unwrap().clone();
        let gaps: Vec<u64> = fetched_at
            .windows(2)
            .map(|w| (w[1] - w[0]).as_secs())
            .take(5)
            .collect();
        // 30*2, 30*4, 30*8, capped at 300, then back to the normal interval.
        assert_eq!(gaps, vec![60, 120, 240, 300, 30]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_sleep() {
        let queue = queue_with(
            Arc::new(InMemoryStore::new()),
            Arc::new(TokioClock::new()),
            10,
        );
        let token = CancellationToken::new();
        let worker = NotificationWorker::new(
            queue,
            dispatcher_with(Arc::new(ScriptedHandler::new())),
            config(3600),
            token.clone(),
        );
        let mut state = worker.subscribe();
        assert_eq!(*state.borrow(), WorkerState::Running);

        let handle = tokio::spawn(worker.run());
        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();

        let stats = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker should stop without waiting out the poll interval")
            .unwrap();
        assert_eq!(stats.polls, 1);

        state.changed().await.ok();
        assert_eq!(*state.borrow_and_update(), WorkerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_between_records_leaves_rest_pending() {
        let clock = fixed_clock();
        let queue = queue_with(Arc::new(InMemoryStore::new()), clock, 10);
        let first = queue.enqueue("chat_message", "#a", payload(false)).await.unwrap();
        let second = queue.enqueue("chat_message", "#b", payload(false)).await.unwrap();

        let token = CancellationToken::new();
        let handler = Arc::new(ScriptedHandler {
            delivered: Mutex::new(Vec::new()),
            cancel_on_first: Some(token.clone()),
        });
        let worker =
            NotificationWorker::new(queue.clone(), dispatcher_with(handler), config(30), token);
        let stats = worker.run().await;

        assert_eq!(stats.delivered, 1);
        assert_eq!(queue.get(first.id).await.unwrap().status, NotificationStatus::Delivered);
        let untouched = queue.get(second.id).await.unwrap();
        assert_eq!(untouched.status, NotificationStatus::Pending);
        assert_eq!(untouched.retry_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery_timeout_counts_as_failure() {
        let clock = fixed_clock();
        let queue = queue_with(Arc::new(InMemoryStore::new()), clock, 10);
        let mut slow = Payload::new();
        slow.insert("sleep_secs".to_string(), serde_json::json!(120));
        let record = queue.enqueue("chat_message", "#slow", slow).await.unwrap();

        let token = CancellationToken::new();
        let worker = NotificationWorker::new(
            queue.clone(),
            dispatcher_with(Arc::new(ScriptedHandler::new())),
            config(30),
            token.clone(),
        );
        let stats = run_for(worker, token, Duration::from_secs(10)).await;

        assert_eq!(stats.retried, 1);
        let stored = queue.get(record.id).await.unwrap();
        assert_eq!(stored.status, NotificationStatus::Pending);
        assert_eq!(stored.error_message.as_deref(), Some("Delivery timed out after 5s"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unhandled_type_goes_through_mark_failed() {
        let clock = fixed_clock();
        let queue = queue_with(Arc::new(InMemoryStore::new()), clock, 10);
        let record = queue
            .enqueue("page_publish", "bucket/index.html", Payload::new())
            .await
            .unwrap();

        let token = CancellationToken::new();
        let worker = NotificationWorker::new(
            queue.clone(),
            dispatcher_with(Arc::new(ScriptedHandler::new())),
            config(30),
            token.clone(),
        );
        let stats = run_for(worker, token, Duration::from_secs(1)).await;

        assert_eq!(stats.retried, 1);
        let stored = queue.get(record.id).await.unwrap();
        assert_eq!(stored.retry_count, 1);
        assert_eq!(
            stored.error_message.as_deref(),
            Some("Unknown notification type: 'page_publish'")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecorded_outcome_does_not_stop_batch() {
        let store = Arc::new(FaultyStore::new(0));
        let queue = queue_with(store.clone(), fixed_clock(), 10);
        let first = queue.enqueue("chat_message", "#a", payload(false)).await.unwrap();
        let second = queue.enqueue("chat_message", "#b", payload(false)).await.unwrap();
        let third = queue.enqueue("chat_message", "#c", payload(false)).await.unwrap();
        *store.reject_updates_for.lock().unwrap() = Some(second.id);

        let handler = Arc::new(ScriptedHandler::new());
        let token = CancellationToken::new();
        let worker = NotificationWorker::new(
            queue.clone(),
            dispatcher_with(handler.clone()),
            config(30),
            token.clone(),
        );
        let stats = run_for(worker, token, Duration::from_secs(1)).await;

        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.bookkeeping_errors, 1);
        assert_eq!(handler.delivered.lock().unwrap().len(), 3);
        assert_eq!(queue.get(first.id).await.unwrap().status, NotificationStatus::Delivered);
        assert_eq!(queue.get(third.id).await.unwrap().status, NotificationStatus::Delivered);
        // Delivered but not recorded: stays pending and is tried again next cycle.
        assert_eq!(queue.get(second.id).await.unwrap().status, NotificationStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutting_down_while_delivery_in_flight() {
        let queue = queue_with(Arc::new(InMemoryStore::new()), fixed_clock(), 10);
        let mut slow = Payload::new();
        slow.insert("sleep_secs".to_string(), serde_json::json!(10));
        let record = queue.enqueue("chat_message", "#slow", slow).await.unwrap();

        let token = CancellationToken::new();
        let worker = NotificationWorker::new(
            queue.clone(),
            dispatcher_with(Arc::new(ScriptedHandler::new())),
            WorkerConfig {
                delivery_timeout: Duration::from_secs(60),
                ..config(30)
            },
            token.clone(),
        );
        let mut state = worker.subscribe();
        let handle = tokio::spawn(worker.run());

        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();
        state.changed().await.unwrap();
        assert_eq!(*state.borrow_and_update(), WorkerState::ShuttingDown);
        assert!(!handle.is_finished());

        let stats = handle.await.unwrap();
        assert_eq!(stats.delivered, 1);
        assert_eq!(*state.borrow(), WorkerState::Stopped);
        assert_eq!(queue.get(record.id).await.unwrap().status, NotificationStatus::Delivered);
    }
}
