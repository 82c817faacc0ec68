//! Paced bulk dispatch.
//!
//! Bulk operations are split into fixed-size chunks. Members of a chunk run
//! concurrently and all settle before the next chunk starts; a pacing delay
//! separates consecutive chunks so the service never sees more than one
//! chunk's worth of requests at once.

use std::future::Future;
use std::time::Duration;

use futures::future::join_all;

pub const DEFAULT_BATCH_SIZE: usize = 5;
pub const DEFAULT_BATCH_PACING: Duration = Duration::from_millis(1000);

/// Run `action` over `items` in chunks of `batch_size`.
///
/// Individual failures never abort a chunk or the chunks after it. Results
/// are returned in item order. A `batch_size` of zero is treated as one.
pub async fn run_in_batches<T, F, Fut>(
    items: Vec<T>,
    batch_size: usize,
    pacing: Duration,
    mut action: F,
) -> Vec<Fut::Output>
where
    F: FnMut(T) -> Fut,
    Fut: Future,
{
    let batch_size = batch_size.max(1);
    let total = items.len();
    let mut results = Vec::with_capacity(total);
    let mut remaining = items.into_iter().peekable();
    let mut chunk = 0usize;

    while remaining.peek().is_some() {
        if chunk > 0 {
            tracing::debug!(chunk, pacing_ms = pacing.as_millis() as u64, "pacing before next batch");
            tokio::time::sleep(pacing).await;
        }

        let pending: Vec<Fut> = remaining.by_ref().take(batch_size).map(&mut action).collect();
        tracing::debug!(chunk, size = pending.len(), total, "dispatching batch");
        results.extend(join_all(pending).await);
        chunk += 1;
    }

    results
}
