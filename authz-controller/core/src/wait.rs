use crate::error::{Error, Result};
use std::future::Future;
use tokio::time;

/// Polls `check` every `interval` until it yields a value, failing with
/// [`Error::Timeout`] once `timeout` elapses.
pub async fn poll_until<T, F, Fut>(
    interval: time::Duration,
    timeout: time::Duration,
    mut check: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let poll = async {
        loop {
            if let Some(value) = check().await {
                return value;
            }
            time::sleep(interval).await;
        }
    };
    time::timeout(timeout, poll)
        .await
        .map_err(|_| Error::Timeout(timeout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio_test::{assert_pending, assert_ready_ok, task};

    #[tokio::test(start_paused = true)]
    async fn returns_first_value() {
        let polls = &AtomicUsize::new(0);
        let n = poll_until(
            time::Duration::from_millis(10),
            time::Duration::from_secs(1),
            move || async move {
                let n = polls.fetch_add(1, Ordering::SeqCst);
                (n == 3).then_some(n)
            },
        )
        .await
        .unwrap();
        assert_eq!(n, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out() {
        let error = poll_until(
            time::Duration::from_millis(10),
            time::Duration::from_millis(100),
            || async { None::<()> },
        )
        .await
        .unwrap_err();
        assert!(matches!(error, Error::Timeout(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn pending_until_ready() {
        let ready = &AtomicBool::new(false);
        let mut poll = task::spawn(poll_until(
            time::Duration::from_millis(10),
            time::Duration::from_secs(1),
            move || async move { ready.load(Ordering::SeqCst).then_some(()) },
        ));
        assert_pending!(poll.poll());

        ready.store(true, Ordering::SeqCst);
        time::advance(time::Duration::from_millis(10)).await;
        assert_ready_ok!(poll.poll());
    }
}
