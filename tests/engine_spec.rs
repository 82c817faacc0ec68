//! Engine behaviour against a scripted in-process notification service.
//!
//! Every test runs on a paused tokio clock, so throttle spacing, retry
//! backoff and batch pacing are observed exactly without real waiting.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;

use notify_sync::engine::RetryPolicy;
use notify_sync::models::{Notification, NotificationType, Priority};
use notify_sync::{
    EngineConfig, NotificationApi, NotificationEngine, StaticCredential, SyncError,
};

#[derive(Default)]
struct Calls {
    fetches: Vec<Instant>,
    marks: Vec<(String, Instant)>,
}

/// Fake service: fetches pop scripted results (falling back to `feed`),
/// mark-as-read fails for ids listed in `mark_failures`.
#[derive(Clone, Default)]
struct FakeApi {
    feed: Arc<Mutex<Vec<Notification>>>,
    fetch_script: Arc<Mutex<VecDeque<Result<Vec<Notification>, SyncError>>>>,
    mark_failures: Arc<Mutex<HashMap<String, SyncError>>>,
    latency: Duration,
    calls: Arc<Mutex<Calls>>,
}

impl FakeApi {
    fn with_feed(feed: Vec<Notification>) -> Self {
        Self {
            feed: Arc::new(Mutex::new(feed)),
            ..Self::default()
        }
    }

    fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn script_fetch(&self, result: Result<Vec<Notification>, SyncError>) {
        self.fetch_script.lock().unwrap().push_back(result);
    }

    fn fail_mark(&self, id: &str, err: SyncError) {
        self.mark_failures.lock().unwrap().insert(id.to_string(), err);
    }

    fn fetch_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().fetches.clone()
    }

    fn mark_calls(&self) -> Vec<(String, Instant)> {
        self.calls.lock().unwrap().marks.clone()
    }
}

#[async_trait]
impl NotificationApi for FakeApi {
    async fn fetch_notifications(&self, _token: &str) -> Result<Vec<Notification>, SyncError> {
        self.calls.lock().unwrap().fetches.push(Instant::now());
        tokio::time::sleep(self.latency).await;
        let scripted = self.fetch_script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(self.feed.lock().unwrap().clone()))
    }

    async fn mark_read(&self, id: &str, _token: &str) -> Result<(), SyncError> {
        self.calls
            .lock()
            .unwrap()
            .marks
            .push((id.to_string(), Instant::now()));
        tokio::time::sleep(self.latency).await;
        match self.mark_failures.lock().unwrap().get(id) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

fn notification(id: &str, read: bool) -> Notification {
    Notification {
        id: id.to_string(),
        kind: NotificationType::Reminder,
        title: format!("Notification {}", id),
        message: "Your lesson starts soon".to_string(),
        timestamp: Utc::now(),
        read,
        priority: Priority::Low,
        avatar: None,
        action: None,
    }
}

fn unread_feed(count: usize) -> Vec<Notification> {
    (1..=count).map(|i| notification(&format!("n{}", i), false)).collect()
}

fn server_error() -> SyncError {
    SyncError::Server {
        status: 500,
        message: "Internal Server Error".to_string(),
    }
}

fn engine_with(api: &FakeApi, config: EngineConfig) -> NotificationEngine {
    NotificationEngine::new(api.clone(), StaticCredential::new("token"), config)
}

fn engine(api: &FakeApi) -> NotificationEngine {
    engine_with(api, EngineConfig::default())
}

fn gaps(times: &[Instant]) -> Vec<Duration> {
    times.windows(2).map(|w| w[1] - w[0]).collect()
}

fn assert_close(actual: Duration, expected: Duration) {
    assert!(
        actual >= expected && actual < expected + Duration::from_millis(10),
        "expected ~{:?}, got {:?}",
        expected,
        actual
    );
}

// ============================================================
// Fetch
// ============================================================

mod fetch {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn populates_an_empty_cache() {
        let api = FakeApi::with_feed(vec![notification("n1", false)]);
        let engine = engine(&api);
        assert!(engine.snapshot().last_fetch_at.is_none());

        let snapshot = engine.fetch(false).await.expect("fetch failed");

        assert_eq!(snapshot.notifications.len(), 1);
        assert_eq!(engine.snapshot().notifications.len(), 1);
        assert!(engine.snapshot().last_fetch_at.is_some());
        assert_eq!(engine.status().last_error, None);
        assert!(!engine.status().is_loading);
    }

    #[tokio::test(start_paused = true)]
    async fn serves_fresh_cache_without_a_request() {
        let api = FakeApi::with_feed(unread_feed(2));
        let engine = engine(&api);

        engine.fetch(false).await.unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        let snapshot = engine.fetch(false).await.unwrap();

        assert_eq!(snapshot.notifications.len(), 2);
        assert_eq!(api.fetch_times().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refetches_once_the_fresh_window_passes() {
        let api = FakeApi::with_feed(unread_feed(1));
        let engine = engine(&api);

        engine.fetch(false).await.unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;
        engine.fetch(false).await.unwrap();

        assert_eq!(api.fetch_times().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_keeps_data_and_forces_next_fetch() {
        let api = FakeApi::with_feed(unread_feed(3));
        let engine = engine(&api);
        engine.fetch(false).await.unwrap();

        engine.invalidate();
        let stale = engine.snapshot();
        assert!(stale.is_stale);
        assert_eq!(stale.notifications.len(), 3);

        let refreshed = engine.fetch(false).await.unwrap();
        assert!(!refreshed.is_stale);
        assert_eq!(api.fetch_times().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn force_bypasses_fresh_cache_but_not_spacing() {
        let api = FakeApi::with_feed(unread_feed(1));
        let engine = engine(&api);

        engine.fetch(true).await.unwrap();
        engine.fetch(true).await.unwrap();

        let times = api.fetch_times();
        assert_eq!(times.len(), 2);
        assert!(times[1] - times[0] >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_credential_dispatches_nothing() {
        let api = FakeApi::with_feed(unread_feed(1));
        let engine = NotificationEngine::new(api.clone(), StaticCredential::none(), EngineConfig::default());

        let result = engine.fetch(true).await;

        assert_eq!(result, Err(SyncError::MissingCredential));
        assert!(api.fetch_times().is_empty());
        assert_eq!(engine.status().last_error, Some(SyncError::MissingCredential));
    }

    #[tokio::test(start_paused = true)]
    async fn drops_duplicate_ids_keeping_feed_order() {
        let api = FakeApi::with_feed(vec![
            notification("a", false),
            notification("b", false),
            notification("a", true),
        ]);
        let engine = engine(&api);

        let snapshot = engine.fetch(false).await.unwrap();
        let ids: Vec<_> = snapshot.notifications.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(!snapshot.get("a").unwrap().read);
    }
}

// ============================================================
// Rate limiting
// ============================================================

mod rate_limiting {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn rate_limited_fetch_is_not_retried() {
        let api = FakeApi::with_feed(unread_feed(2));
        let engine = engine(&api);
        engine.fetch(false).await.unwrap();
        let before = engine.snapshot();

        api.script_fetch(Err(SyncError::RateLimited {
            status: Some(429),
            message: "Too Many Requests".to_string(),
        }));
        let snapshot = engine.fetch(true).await.expect("rate limit must degrade to cache");

        assert_eq!(snapshot, before);
        assert_eq!(api.fetch_times().len(), 2);
        let status = engine.status();
        assert!(status.is_rate_limited);
        assert_eq!(status.retry_count, 0);
        assert!(!status.is_loading);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(api.fetch_times().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn server_503_counts_as_rate_limited() {
        let api = FakeApi::default();
        let engine = engine(&api);
        api.script_fetch(Err(SyncError::Server {
            status: 503,
            message: "Service Unavailable".to_string(),
        }));

        engine.fetch(false).await.unwrap();

        assert!(engine.status().is_rate_limited);
        assert_eq!(api.fetch_times().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_refresh_clears_the_flag() {
        let api = FakeApi::with_feed(unread_feed(1));
        let engine = engine(&api);
        api.script_fetch(Err(SyncError::RateLimited {
            status: Some(429),
            message: String::new(),
        }));
        engine.fetch(false).await.unwrap();
        assert!(engine.status().is_rate_limited);

        engine.invalidate();
        let snapshot = engine.fetch(false).await.unwrap();

        assert_eq!(snapshot.notifications.len(), 1);
        assert!(!engine.status().is_rate_limited);
        assert_eq!(engine.status().last_error, None);
    }
}

// ============================================================
// Retry / backoff
// ============================================================

mod retry {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn follows_the_backoff_schedule_then_gives_up() {
        let api = FakeApi::default();
        let engine = engine_with(&api, EngineConfig::default().with_min_interval(Duration::ZERO));
        for _ in 0..4 {
            api.script_fetch(Err(server_error()));
        }

        let snapshot = engine.fetch(false).await.expect("exhausted retries degrade to cache");

        let times = api.fetch_times();
        assert_eq!(times.len(), 4, "initial attempt plus three retries");
        let observed = gaps(&times);
        assert_close(observed[0], Duration::from_millis(1000));
        assert_close(observed[1], Duration::from_millis(2000));
        assert_close(observed[2], Duration::from_millis(5000));

        assert!(snapshot.notifications.is_empty());
        let status = engine.status();
        assert_eq!(status.retry_count, 3);
        assert_eq!(status.last_error, Some(server_error()));
        assert!(!status.is_rate_limited);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(api.fetch_times().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_keep_last_good_cache() {
        let api = FakeApi::with_feed(unread_feed(2));
        let engine = engine(&api);
        engine.fetch(false).await.unwrap();

        for _ in 0..4 {
            api.script_fetch(Err(SyncError::Transport("operation timed out".to_string())));
        }
        let snapshot = engine.fetch(true).await.unwrap();

        assert_eq!(snapshot.notifications.len(), 2);
        assert_eq!(api.fetch_times().len(), 5);
        assert!(matches!(engine.status().last_error, Some(SyncError::Transport(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_wait_for_the_minimum_interval() {
        let api = FakeApi::default();
        let engine = engine(&api);
        for _ in 0..4 {
            api.script_fetch(Err(server_error()));
        }

        engine.fetch(false).await.unwrap();

        // The 1s backoff is stretched to the 2s spacing; longer delays win.
        let observed = gaps(&api.fetch_times());
        assert_eq!(observed.len(), 3);
        assert_close(observed[0], Duration::from_millis(2000));
        assert_close(observed[1], Duration::from_millis(2000));
        assert_close(observed[2], Duration::from_millis(5000));
        assert_eq!(engine.status().retry_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_the_lineage() {
        let api = FakeApi::with_feed(unread_feed(1));
        let engine = engine_with(&api, EngineConfig::default().with_min_interval(Duration::ZERO));
        api.script_fetch(Err(server_error()));
        api.script_fetch(Err(server_error()));

        let snapshot = engine.fetch(false).await.unwrap();

        assert_eq!(snapshot.notifications.len(), 1);
        assert_eq!(api.fetch_times().len(), 3);
        let status = engine.status();
        assert_eq!(status.last_error, None);
        assert_eq!(status.retry_count, 0);
        assert!(!status.is_loading);
    }

    #[tokio::test(start_paused = true)]
    async fn each_lineage_counts_from_zero() {
        let api = FakeApi::default();
        let engine = engine_with(&api, EngineConfig::default().with_min_interval(Duration::ZERO));
        for _ in 0..4 {
            api.script_fetch(Err(server_error()));
        }
        engine.fetch(false).await.unwrap();
        assert_eq!(engine.status().retry_count, 3);

        api.script_fetch(Err(server_error()));
        let handle = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.fetch(true).await })
        };
        let mut status = engine.subscribe_status();
        status.wait_for(|s| s.retry_count == 1).await.unwrap();

        handle.await.unwrap().unwrap();
        assert_eq!(engine.status().retry_count, 0);
        assert_eq!(api.fetch_times().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_policy_fails_over_immediately() {
        let api = FakeApi::default();
        let engine = engine_with(&api, EngineConfig::default().with_retry(RetryPolicy::disabled()));
        api.script_fetch(Err(server_error()));

        engine.fetch(false).await.unwrap();

        assert_eq!(api.fetch_times().len(), 1);
        assert_eq!(engine.status().last_error, Some(server_error()));
    }

    #[tokio::test(start_paused = true)]
    async fn status_reports_loading_while_retrying() {
        let api = FakeApi::default();
        let engine = engine_with(&api, EngineConfig::default().with_min_interval(Duration::ZERO));
        api.script_fetch(Err(server_error()));

        let handle = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.fetch(false).await })
        };
        let mut status = engine.subscribe_status();
        status
            .wait_for(|s| s.retry_count == 1)
            .await
            .expect("status channel closed");
        assert!(engine.status().is_loading);

        handle.await.unwrap().unwrap();
        assert!(!engine.status().is_loading);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_fetches_stay_loading_until_the_last_settles() {
        let api = FakeApi::with_feed(unread_feed(1)).with_latency(Duration::from_millis(500));
        let engine = engine(&api);

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.fetch(true).await })
        };
        while api.fetch_times().is_empty() {
            tokio::task::yield_now().await;
        }
        let second = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.fetch(true).await })
        };
        while engine.status().queue_depth == 0 {
            tokio::task::yield_now().await;
        }

        first.await.unwrap().unwrap();
        let status = engine.status();
        assert!(status.is_loading, "second fetch is still queued");
        assert_eq!(status.queue_depth, 1);

        second.await.unwrap().unwrap();
        assert!(!engine.status().is_loading);
        assert_eq!(api.fetch_times().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_fetch_releases_loading() {
        let api = FakeApi::with_feed(unread_feed(1)).with_latency(Duration::from_secs(5));
        let engine = engine(&api);

        let pending = tokio::time::timeout(Duration::from_secs(1), engine.fetch(true)).await;

        assert!(pending.is_err());
        assert!(!engine.status().is_loading);
    }
}

// ============================================================
// Throttle: spacing, coalescing, queueing
// ============================================================

mod throttling {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn concurrent_marks_for_one_id_send_one_request() {
        let api = FakeApi::with_feed(unread_feed(1)).with_latency(Duration::from_millis(500));
        let engine = engine_with(&api, EngineConfig::default().with_min_interval(Duration::ZERO));
        engine.fetch(false).await.unwrap();

        let (first, second, third) = tokio::join!(
            engine.mark_one("n1"),
            engine.mark_one("n1"),
            engine.mark_one("n1")
        );

        assert!(first.is_ok() && second.is_ok() && third.is_ok());
        assert_eq!(api.mark_calls().len(), 1);
        assert!(engine.snapshot().get("n1").unwrap().read);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_mark_is_still_coalesced() {
        let api = FakeApi::with_feed(unread_feed(1));
        let engine = engine(&api);
        engine.fetch(false).await.unwrap();

        // The fetch just used the interval, so both marks wait in line.
        let (first, second) = tokio::join!(engine.mark_one("n1"), engine.mark_one("n1"));

        assert!(first.is_ok() && second.is_ok());
        assert_eq!(api.mark_calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_marks_stay_read() {
        let api = FakeApi::with_feed(unread_feed(1));
        let engine = engine(&api);
        engine.fetch(false).await.unwrap();

        engine.mark_one("n1").await.unwrap();
        engine.mark_one("n1").await.unwrap();

        assert!(engine.snapshot().get("n1").unwrap().read);
        assert!(api.mark_calls().len() <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dispatches_are_spaced_by_the_minimum_interval() {
        let api = FakeApi::with_feed(unread_feed(4)).with_latency(Duration::from_millis(100));
        let engine = engine(&api);
        engine.fetch(false).await.unwrap();

        tokio::join!(
            engine.mark_one("n1"),
            engine.mark_one("n2"),
            engine.mark_one("n3"),
            engine.mark_one("n4"),
        );

        let mut times: Vec<Instant> = api.fetch_times();
        times.extend(api.mark_calls().into_iter().map(|(_, at)| at));
        assert_eq!(times.len(), 5);
        for gap in gaps(&times) {
            assert!(gap >= Duration::from_secs(2), "dispatches only {:?} apart", gap);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn queued_requests_settle_in_submission_order() {
        let api = FakeApi::with_feed(unread_feed(4));
        let engine = engine(&api);
        engine.fetch(false).await.unwrap();
        let settled = Arc::new(Mutex::new(Vec::new()));

        let mark = |id: &'static str| {
            let engine = engine.clone();
            let settled = Arc::clone(&settled);
            async move {
                engine.mark_one(id).await.unwrap();
                settled.lock().unwrap().push(id);
            }
        };
        tokio::join!(mark("n3"), mark("n1"), mark("n4"), mark("n2"));

        assert_eq!(*settled.lock().unwrap(), vec!["n3", "n1", "n4", "n2"]);
        let dispatched: Vec<_> = api.mark_calls().into_iter().map(|(id, _)| id).collect();
        assert_eq!(dispatched, vec!["n3", "n1", "n4", "n2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn queue_depth_is_observable() {
        let api = FakeApi::with_feed(unread_feed(3));
        let engine = engine(&api);
        engine.fetch(false).await.unwrap();

        let handles: Vec<_> = ["n1", "n2", "n3"]
            .into_iter()
            .map(|id| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.mark_one(id).await })
            })
            .collect();

        let mut status = engine.subscribe_status();
        status.wait_for(|s| s.queue_depth == 3).await.unwrap();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(engine.status().queue_depth, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_queue_cancels_waiting_requests() {
        let api = FakeApi::with_feed(unread_feed(3));
        let engine = engine(&api);
        engine.fetch(false).await.unwrap();

        let handles: Vec<_> = ["n1", "n2"]
            .into_iter()
            .map(|id| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.mark_one(id).await })
            })
            .collect();
        while engine.status().queue_depth < 2 {
            tokio::task::yield_now().await;
        }

        assert_eq!(engine.clear_queue(), 2);

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Err(SyncError::Cancelled));
        }
        assert!(api.mark_calls().is_empty());
        assert_eq!(engine.status().queue_depth, 0);
        // Optimistic: cancelled acknowledgments still leave the items read.
        assert!(engine.snapshot().get("n1").unwrap().read);
        assert!(engine.snapshot().get("n2").unwrap().read);
        assert!(!engine.snapshot().get("n3").unwrap().read);

        // The throttle keeps working after a clear.
        engine.mark_one("n3").await.unwrap();
        assert_eq!(api.mark_calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn queue_keeps_draining_after_a_failure() {
        let api = FakeApi::with_feed(unread_feed(2));
        api.fail_mark("n1", server_error());
        let engine = engine(&api);
        engine.fetch(false).await.unwrap();

        let (first, second) = tokio::join!(engine.mark_one("n1"), engine.mark_one("n2"));

        assert_eq!(first, Err(server_error()));
        assert!(second.is_ok());
        assert_eq!(api.mark_calls().len(), 2);
    }
}

// ============================================================
// Optimistic mutations
// ============================================================

mod mutations {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn mark_one_applies_even_when_the_service_fails() {
        let api = FakeApi::with_feed(unread_feed(2));
        api.fail_mark("n1", server_error());
        let engine = engine(&api);
        engine.fetch(false).await.unwrap();

        let result = engine.mark_one("n1").await;

        assert_eq!(result, Err(server_error()));
        assert!(engine.snapshot().get("n1").unwrap().read);
        assert!(!engine.snapshot().get("n2").unwrap().read);
        assert_eq!(engine.unread_count(), 1);
        assert_eq!(engine.status().last_error, Some(server_error()));
    }

    #[tokio::test(start_paused = true)]
    async fn mark_one_rate_limited_sets_flag_and_keeps_read() {
        let api = FakeApi::with_feed(unread_feed(1));
        api.fail_mark(
            "n1",
            SyncError::RateLimited {
                status: Some(429),
                message: String::new(),
            },
        );
        let engine = engine(&api);
        engine.fetch(false).await.unwrap();

        assert!(engine.mark_one("n1").await.is_err());
        assert!(engine.status().is_rate_limited);
        assert!(engine.snapshot().get("n1").unwrap().read);
    }

    #[tokio::test(start_paused = true)]
    async fn mark_one_without_credential_changes_nothing() {
        let api = FakeApi::with_feed(unread_feed(1));
        let token = Arc::new(Mutex::new(Some("token".to_string())));
        let source = {
            let token = Arc::clone(&token);
            move || token.lock().unwrap().clone()
        };
        let engine = NotificationEngine::new(api.clone(), source, EngineConfig::default());
        engine.fetch(false).await.unwrap();

        *token.lock().unwrap() = None;
        let result = engine.mark_one("n1").await;

        assert_eq!(result, Err(SyncError::MissingCredential));
        assert!(api.mark_calls().is_empty());
        assert!(!engine.snapshot().get("n1").unwrap().read);
    }

    #[tokio::test(start_paused = true)]
    async fn mark_one_for_unknown_id_is_harmless() {
        let api = FakeApi::with_feed(unread_feed(1));
        let engine = engine(&api);
        engine.fetch(false).await.unwrap();

        let snapshot = engine.mark_one("ghost").await.unwrap();

        assert_eq!(snapshot.unread_count(), 1);
        assert_eq!(api.mark_calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_subscribers_see_optimistic_updates() {
        let api = FakeApi::with_feed(unread_feed(1));
        let engine = engine(&api);
        engine.fetch(false).await.unwrap();
        let mut feed = engine.subscribe_snapshot();
        feed.borrow_and_update();

        engine.mark_one("n1").await.unwrap();

        assert!(feed.has_changed().unwrap());
        assert_eq!(feed.borrow_and_update().unread_count(), 0);
    }
}

// ============================================================
// Bulk mark-as-read
// ============================================================

mod mark_all {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn paces_twelve_items_in_chunks_of_five() {
        let api = FakeApi::with_feed(unread_feed(12));
        let engine = engine(&api);
        engine.fetch(false).await.unwrap();

        let report = engine.mark_all().await.unwrap();

        assert_eq!(report.attempted, 12);
        assert_eq!(report.acknowledged, 12);
        assert!(report.failed.is_empty());
        assert_eq!(engine.unread_count(), 0);

        let calls = api.mark_calls();
        let mut chunk_starts: Vec<Instant> = Vec::new();
        let mut chunk_sizes: Vec<usize> = Vec::new();
        for (_, at) in &calls {
            if chunk_starts.last() == Some(at) {
                *chunk_sizes.last_mut().unwrap() += 1;
            } else {
                chunk_starts.push(*at);
                chunk_sizes.push(1);
            }
        }
        assert_eq!(chunk_sizes, vec![5, 5, 2]);
        for gap in gaps(&chunk_starts) {
            assert!(gap >= Duration::from_millis(1000));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failures_do_not_stop_the_bulk_update() {
        let mut feed = unread_feed(6);
        feed[0].read = true;
        let api = FakeApi::with_feed(feed);
        api.fail_mark("n2", server_error());
        api.fail_mark("n6", SyncError::Transport("connection reset".to_string()));
        let engine = engine(&api);
        engine.fetch(false).await.unwrap();

        let report = engine.mark_all().await.unwrap();

        assert_eq!(report.attempted, 5, "already-read items are skipped");
        assert_eq!(report.acknowledged, 3);
        let failed: Vec<_> = report.failed.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(failed, vec!["n2", "n6"]);
        assert_eq!(engine.unread_count(), 0);
        assert_eq!(api.mark_calls().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn skips_items_already_in_flight() {
        let api = FakeApi::with_feed(unread_feed(2)).with_latency(Duration::from_millis(500));
        let engine = engine_with(&api, EngineConfig::default().with_min_interval(Duration::ZERO));
        engine.fetch(false).await.unwrap();

        let (single, bulk) = tokio::join!(engine.mark_one("n1"), engine.mark_all());

        assert!(single.is_ok());
        let report = bulk.unwrap();
        assert_eq!(report.attempted, 2);
        assert_eq!(report.coalesced, 1);
        assert_eq!(report.acknowledged, 1);
        let dispatched: Vec<_> = api.mark_calls().into_iter().map(|(id, _)| id).collect();
        assert_eq!(dispatched, vec!["n1", "n2"]);
        assert_eq!(engine.unread_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_unread_sends_nothing() {
        let api = FakeApi::with_feed(vec![notification("n1", true)]);
        let engine = engine(&api);
        engine.fetch(false).await.unwrap();

        let report = engine.mark_all().await.unwrap();

        assert_eq!(report.attempted, 0);
        assert!(api.mark_calls().is_empty());
    }
}
