use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use authz_controller_core::ObjectId;
use parking_lot::Mutex;
use std::{collections::VecDeque, sync::Arc};
use tokio::{sync::Notify, time};

/// A deduplicating work queue of object keys.
///
/// A key is handed to at most one worker at a time. Keys added while being
/// processed are marked dirty and queued again once the worker is done.
#[derive(Debug)]
pub struct Queue {
    state: Mutex<State>,
    notify: Notify,
    backoff: RequeueBackoff,
}

/// Bounds the delay before a failed key is processed again.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RequeueBackoff {
    pub initial: time::Duration,
    pub max: time::Duration,
}

#[derive(Debug, Default)]
struct State {
    pending: VecDeque<ObjectId>,
    queued: HashSet<ObjectId>,
    processing: HashSet<ObjectId>,
    dirty: HashSet<ObjectId>,
    failures: HashMap<ObjectId, u32>,
    closed: bool,
}

// === impl RequeueBackoff ===

impl Default for RequeueBackoff {
    fn default() -> Self {
        Self {
            initial: time::Duration::from_millis(100),
            max: time::Duration::from_secs(60),
        }
    }
}

impl RequeueBackoff {
    /// The delay after `failures` consecutive failures.
    pub fn delay(&self, failures: u32) -> time::Duration {
        let factor = 1u32.checked_shl(failures.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

// === impl Queue ===

impl Queue {
    pub fn new(backoff: RequeueBackoff) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            backoff,
        })
    }

    pub fn add(&self, id: ObjectId) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        if state.processing.contains(&id) {
            state.dirty.insert(id);
            return;
        }
        if state.queued.insert(id.clone()) {
            state.pending.push_back(id);
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Waits for a key to process. Returns `None` once the queue is closed.
    pub async fn next(&self) -> Option<ObjectId> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.state.lock();
                if let Some(id) = state.pending.pop_front() {
                    state.queued.remove(&id);
                    state.processing.insert(id.clone());
                    let more = !state.pending.is_empty();
                    drop(state);
                    if more {
                        self.notify.notify_one();
                    }
                    return Some(id);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Releases a key handed out by [`Queue::next`].
    pub fn done(&self, id: &ObjectId) {
        let mut state = self.state.lock();
        state.processing.remove(id);
        if state.dirty.remove(id) && !state.closed && state.queued.insert(id.clone()) {
            state.pending.push_back(id.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Clears the failure history of a key.
    pub fn forget(&self, id: &ObjectId) {
        self.state.lock().failures.remove(id);
    }

    /// Adds the key again after a delay that grows with each consecutive
    /// failure. Returns the delay.
    pub fn requeue(self: &Arc<Self>, id: ObjectId) -> time::Duration {
        let delay = {
            let mut state = self.state.lock();
            let failures = state.failures.entry(id.clone()).or_default();
            *failures = failures.saturating_add(1);
            self.backoff.delay(*failures)
        };
        let queue = Arc::downgrade(self);
        tokio::spawn(async move {
            time::sleep(delay).await;
            if let Some(queue) = queue.upgrade() {
                queue.add(id);
            }
        });
        delay
    }

    /// Stops handing out keys. Workers waiting on [`Queue::next`] return.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn id(name: &str) -> ObjectId {
        ObjectId::role_binding("ns-0", name)
    }

    #[tokio::test]
    async fn keys_are_deduplicated() {
        let queue = Queue::new(RequeueBackoff::default());
        queue.add(id("a"));
        queue.add(id("b"));
        queue.add(id("a"));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.next().await, Some(id("a")));
        assert_eq!(queue.next().await, Some(id("b")));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn keys_added_while_processing_are_deferred() {
        let queue = Queue::new(RequeueBackoff::default());
        queue.add(id("a"));
        let a = queue.next().await.unwrap();

        queue.add(id("a"));
        queue.add(id("a"));
        assert!(queue.is_empty(), "a key is never handed out twice at once");

        queue.done(&a);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next().await, Some(id("a")));
    }

    #[tokio::test]
    async fn close_releases_waiters() {
        let queue = Queue::new(RequeueBackoff::default());
        let waiter = tokio::spawn({
            let queue = queue.clone();
            async move { queue.next().await }
        });
        tokio::task::yield_now().await;
        queue.close();
        assert_eq!(waiter.await.unwrap(), None);

        queue.add(id("a"));
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_keys_are_requeued_with_backoff() {
        let queue = Queue::new(RequeueBackoff::default());
        queue.add(id("a"));
        let a = queue.next().await.unwrap();
        queue.done(&a);

        assert_eq!(queue.requeue(a.clone()), time::Duration::from_millis(100));
        assert!(queue.is_empty());
        time::sleep(time::Duration::from_millis(101)).await;
        assert_eq!(queue.next().await, Some(a.clone()));
        queue.done(&a);

        assert_eq!(queue.requeue(a.clone()), time::Duration::from_millis(200));
        queue.forget(&a);
        assert_eq!(queue.requeue(a), time::Duration::from_millis(100));
    }

    #[rstest]
    #[case(1, 100)]
    #[case(2, 200)]
    #[case(4, 800)]
    #[case(10, 51_200)]
    #[case(11, 60_000)]
    #[case(64, 60_000)]
    fn backoff_is_capped(#[case] failures: u32, #[case] millis: u64) {
        assert_eq!(
            RequeueBackoff::default().delay(failures),
            time::Duration::from_millis(millis)
        );
    }
}
