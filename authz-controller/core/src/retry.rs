use crate::error::Result;
use std::future::Future;
use tokio::time;

/// Bounds retries of an operation that may conflict with concurrent writers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Backoff {
    /// Total attempts, including the first.
    pub attempts: usize,
    pub initial: time::Duration,
    pub max: time::Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial: time::Duration::from_millis(10),
            max: time::Duration::from_secs(1),
        }
    }
}

/// Runs a read-modify-write operation, retrying it while it fails with a
/// conflict.
///
/// The operation must re-read the current state on every attempt. Errors
/// other than conflicts are returned immediately, as is the last conflict
/// once attempts are exhausted.
pub async fn retry_on_conflict<T, F, Fut>(backoff: Backoff, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = backoff.initial;
    let mut attempt = 1;
    loop {
        match op().await {
            Err(error) if error.is_conflict() && attempt < backoff.attempts => {
                tracing::debug!(%error, attempt, "Conflict; retrying");
                time::sleep(delay).await;
                delay = (delay * 2).min(backoff.max);
                attempt += 1;
            }
            res => return res,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retries_conflicts_until_success() {
        let calls = &AtomicUsize::new(0);
        let res = retry_on_conflict(Backoff::default(), move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                return Err(Error::conflict("RoleBinding ns/rb", "stale"));
            }
            Ok("done")
        })
        .await;
        assert_eq!(res.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_attempts() {
        let calls = &AtomicUsize::new(0);
        let backoff = Backoff {
            attempts: 3,
            ..Backoff::default()
        };
        let res: Result<()> = retry_on_conflict(backoff, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::conflict("RoleBinding ns/rb", "stale"))
        })
        .await;
        assert!(res.unwrap_err().is_conflict());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn other_errors_are_not_retried() {
        let calls = &AtomicUsize::new(0);
        let res: Result<()> = retry_on_conflict(Backoff::default(), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::not_found("RoleBinding", "rb"))
        })
        .await;
        assert!(res.unwrap_err().is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
