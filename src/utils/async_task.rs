use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tracing::error;

use crate::Result;

/// Spawns a named background task; a failure is logged, never propagated.
pub(crate) fn spawn_task<F, Fut>(
    name: &str,
    task_fn: F,
) -> JoinHandle<()>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    // Clone the name so it can be safely moved into the async block
    let name = name.to_string();
    tokio::spawn(async move {
        if let Err(e) = task_fn().await {
            error!(task = %name, error = ?e, "spawned task stopped with an error");
        }
    })
}

/// Doubles `current` up to `max`.
pub(crate) fn next_backoff(
    current: Duration,
    max: Duration,
) -> Duration {
    current.saturating_mul(2).min(max)
}

/// Adds up to 20% random jitter so instances polling the same lock drift apart.
pub(crate) fn with_jitter(delay: Duration) -> Duration {
    let max_jitter = delay.as_micros() as u64 / 5;
    if max_jitter == 0 {
        return delay;
    }
    let jitter = rand::thread_rng().gen_range(0..=max_jitter);
    delay + Duration::from_micros(jitter)
}
