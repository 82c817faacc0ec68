//! Outbound request throttling.
//!
//! Every request to the notification service goes through a [`Throttle`]:
//!
//! - requests carrying a logical id that is already tracked are coalesced
//!   and never dispatched;
//! - dispatches are spaced at least `min_interval` apart;
//! - requests arriving too early are queued and drained strictly FIFO, one
//!   at a time, by a background task.
//!
//! The ledger lock is never held across an `.await`.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::SyncError;

/// Minimum spacing between two dispatched requests.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(2);

/// Result of a throttled submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission<T> {
    /// The operation ran and produced a value.
    Dispatched(T),
    /// A request with the same logical id was already in flight.
    Coalesced,
}

type Job = Box<dyn FnOnce(Throttle) -> BoxFuture<'static, ()> + Send>;
type DepthHook = Box<dyn Fn(usize) + Send + Sync>;

struct Queued {
    logical_id: Option<String>,
    job: Job,
}

#[derive(Default)]
struct Ledger {
    last_request_at: Option<Instant>,
    /// Ids submitted and not yet settled, queued or executing.
    in_flight: HashSet<String>,
    pending: VecDeque<Queued>,
    draining: bool,
}

struct Shared {
    min_interval: Duration,
    ledger: Mutex<Ledger>,
    on_depth_change: Option<DepthHook>,
}

enum Admission<F, T> {
    Coalesced,
    Dispatch(F),
    Queued {
        rx: oneshot::Receiver<Result<T, SyncError>>,
        start_drainer: bool,
        depth: usize,
    },
}

enum DrainStep {
    Idle,
    Wait(Duration),
    Run(Queued, usize),
}

/// Cloneable handle to a shared throttle ledger.
#[derive(Clone)]
pub struct Throttle {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Throttle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ledger = self.ledger();
        f.debug_struct("Throttle")
            .field("min_interval", &self.shared.min_interval)
            .field("in_flight", &ledger.in_flight.len())
            .field("queue_depth", &ledger.pending.len())
            .field("draining", &ledger.draining)
            .finish()
    }
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self::build(min_interval, None)
    }

    /// Like [`Throttle::new`], calling `hook` with the queue depth whenever
    /// it changes.
    pub fn with_depth_hook(
        min_interval: Duration,
        hook: impl Fn(usize) + Send + Sync + 'static,
    ) -> Self {
        Self::build(min_interval, Some(Box::new(hook)))
    }

    fn build(min_interval: Duration, on_depth_change: Option<DepthHook>) -> Self {
        Self {
            shared: Arc::new(Shared {
                min_interval,
                ledger: Mutex::new(Ledger::default()),
                on_depth_change,
            }),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.shared.min_interval
    }

    pub fn queue_depth(&self) -> usize {
        self.ledger().pending.len()
    }

    pub fn is_in_flight(&self, logical_id: &str) -> bool {
        self.ledger().in_flight.contains(logical_id)
    }

    /// Submit `operation` for dispatch.
    ///
    /// Resolves once the operation has run, either immediately or after
    /// waiting its turn in the queue. Resolves to [`Submission::Coalesced`]
    /// without running anything if `logical_id` is already in flight, and to
    /// [`SyncError::Cancelled`] if the queue is cleared first.
    pub async fn submit<T, F, Fut>(
        &self,
        logical_id: Option<&str>,
        operation: F,
    ) -> Result<Submission<T>, SyncError>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
    {
        let admission = {
            let mut ledger = self.ledger();

            if logical_id.is_some_and(|id| ledger.in_flight.contains(id)) {
                Admission::Coalesced
            } else {
                if let Some(id) = logical_id {
                    ledger.in_flight.insert(id.to_owned());
                }

                if !ledger.draining && self.remaining_wait(&ledger).is_none() {
                    ledger.last_request_at = Some(Instant::now());
                    Admission::Dispatch(operation)
                } else {
                    let (tx, rx) = oneshot::channel();
                    let owned_id = logical_id.map(str::to_owned);
                    let release_id = owned_id.clone();
                    let job: Job = Box::new(move |throttle: Throttle| {
                        async move {
                            let result = operation().await;
                            throttle.release(release_id.as_deref());
                            // The waiter may have gone away; the work still counts.
                            let _ = tx.send(result);
                        }
                        .boxed()
                    });
                    ledger.pending.push_back(Queued {
                        logical_id: owned_id,
                        job,
                    });
                    let start_drainer = !ledger.draining;
                    ledger.draining = true;
                    Admission::Queued {
                        rx,
                        start_drainer,
                        depth: ledger.pending.len(),
                    }
                }
            }
        };

        match admission {
            Admission::Coalesced => {
                tracing::debug!(logical_id, "coalesced with in-flight request");
                Ok(Submission::Coalesced)
            }
            Admission::Dispatch(operation) => {
                tracing::debug!(logical_id, "dispatching request");
                let guard = InFlightGuard {
                    throttle: self,
                    logical_id,
                };
                let result = operation().await;
                drop(guard);
                result.map(Submission::Dispatched)
            }
            Admission::Queued {
                rx,
                start_drainer,
                depth,
            } => {
                tracing::debug!(logical_id, depth, "request throttled, queued");
                self.notify_depth(depth);
                if start_drainer {
                    let throttle = self.clone();
                    tokio::spawn(async move { throttle.drain().await });
                }
                match rx.await {
                    Ok(result) => result.map(Submission::Dispatched),
                    Err(_) => Err(SyncError::Cancelled),
                }
            }
        }
    }

    /// Run `operation` right away unless `logical_id` is already in flight.
    ///
    /// Skips the spacing rule and the queue; callers pace themselves. The
    /// dispatch still counts as the most recent request.
    pub async fn run_coalesced<T, F, Fut>(
        &self,
        logical_id: &str,
        operation: F,
    ) -> Result<Submission<T>, SyncError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        {
            let mut ledger = self.ledger();
            if !ledger.in_flight.insert(logical_id.to_owned()) {
                tracing::debug!(logical_id, "coalesced with in-flight request");
                return Ok(Submission::Coalesced);
            }
            ledger.last_request_at = Some(Instant::now());
        }

        let guard = InFlightGuard {
            throttle: self,
            logical_id: Some(logical_id),
        };
        let result = operation().await;
        drop(guard);
        result.map(Submission::Dispatched)
    }

    /// Drop every queued request. Their callers receive
    /// [`SyncError::Cancelled`]; requests already executing are unaffected.
    pub fn clear_queue(&self) -> usize {
        let cancelled: Vec<Queued> = {
            let mut ledger = self.ledger();
            let cancelled: Vec<Queued> = ledger.pending.drain(..).collect();
            for queued in &cancelled {
                if let Some(id) = &queued.logical_id {
                    ledger.in_flight.remove(id);
                }
            }
            cancelled
        };

        let count = cancelled.len();
        // Dropping the jobs drops their senders, which rejects the waiters.
        drop(cancelled);
        if count > 0 {
            tracing::info!(count, "cleared throttle queue");
            self.notify_depth(0);
        }
        count
    }

    async fn drain(&self) {
        loop {
            let step = {
                let mut ledger = self.ledger();
                let wait = self.remaining_wait(&ledger);
                if ledger.pending.is_empty() {
                    ledger.draining = false;
                    DrainStep::Idle
                } else if let Some(wait) = wait {
                    DrainStep::Wait(wait)
                } else if let Some(next) = ledger.pending.pop_front() {
                    ledger.last_request_at = Some(Instant::now());
                    DrainStep::Run(next, ledger.pending.len())
                } else {
                    DrainStep::Idle
                }
            };

            match step {
                DrainStep::Idle => return,
                DrainStep::Wait(wait) => tokio::time::sleep(wait).await,
                DrainStep::Run(next, depth) => {
                    self.notify_depth(depth);
                    tracing::debug!(
                        logical_id = next.logical_id.as_deref(),
                        depth,
                        "dispatching queued request"
                    );
                    (next.job)(self.clone()).await;
                }
            }
        }
    }

    fn remaining_wait(&self, ledger: &Ledger) -> Option<Duration> {
        let elapsed = ledger.last_request_at?.elapsed();
        self.shared.min_interval.checked_sub(elapsed).filter(|d| !d.is_zero())
    }

    fn release(&self, logical_id: Option<&str>) {
        if let Some(id) = logical_id {
            self.ledger().in_flight.remove(id);
        }
    }

    fn notify_depth(&self, depth: usize) {
        if let Some(hook) = &self.shared.on_depth_change {
            hook(depth);
        }
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.shared
            .ledger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Untracks an id when an immediate dispatch settles or its caller gives up.
struct InFlightGuard<'a> {
    throttle: &'a Throttle,
    logical_id: Option<&'a str>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.throttle.release(self.logical_id);
    }
}
