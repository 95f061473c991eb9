//! Observed background tasks.
//!
//! Fire-and-forget work (fire recording, invalidation notifies, slow
//! subscriber delivery) must never drop its errors silently: every spawn
//! goes through [`spawn_logged`], which logs failures with the task name
//! on completion.

use std::future::Future;

use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Spawn a background task whose completion is always observed.
///
/// The future's `Err` is logged at ERROR with the task name; success is
/// logged at DEBUG. The task is detached from the caller; inbound RPC
/// cancellation does not cancel it.
pub fn spawn_logged<F, E>(name: &'static str, fut: F) -> JoinHandle<()>
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    tokio::spawn(async move {
        match fut.await {
            Ok(()) => debug!(task = name, "background task completed"),
            Err(err) => error!(task = name, error = %err, "background task failed"),
        }
    })
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn spawned_task_runs_to_completion() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let handle = spawn_logged("test_task", async move {
            flag.store(true, Ordering::SeqCst);
            Ok::<(), std::io::Error>(())
        });
        handle.await.unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn failing_task_does_not_panic_the_runtime() {
        let handle = spawn_logged("failing_task", async move {
            Err::<(), _>(std::io::Error::other("boom"))
        });
        // The join handle resolves cleanly; the error went to the log.
        handle.await.unwrap();
    }
}
