use crate::{
    binding::MirrorObject, index::SharedSourceIndex, metrics::ControllerMetrics, queue::Queue,
};
use authz_controller_core::{
    retry::{self, Backoff},
    BindingStore, ObjectId, Result, Versioned,
};
use kubert::lease::Claim;
use std::{marker::PhantomData, sync::Arc};
use tokio::{sync::watch, task::JoinSet};
use tracing::{info_span, Instrument};

#[derive(Clone, Debug)]
pub struct ControllerConfig {
    pub workers: usize,
    /// Bounds the conflict retries of a single write.
    pub retry: Backoff,
}

/// Mirrors objects of type `S` into a store of objects of type `D`.
///
/// Only the instance holding the write lease writes to the destination. Other
/// instances keep indexing and drop the keys they are handed; the new leader
/// enqueues every key when it acquires the lease.
pub struct Controller<S, D> {
    name: &'static str,
    source: SharedSourceIndex<S>,
    store: Arc<dyn BindingStore<D>>,
    queue: Arc<Queue>,
    claims: watch::Receiver<Arc<Claim>>,
    hostname: String,
    config: ControllerConfig,
    metrics: ControllerMetrics,
    _marker: PhantomData<fn(S) -> D>,
}

// === impl ControllerConfig ===

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            retry: Backoff::default(),
        }
    }
}

// === impl Controller ===

impl<S, D> Controller<S, D>
where
    S: MirrorObject + PartialEq,
    D: MirrorObject,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &'static str,
        source: SharedSourceIndex<S>,
        store: Arc<dyn BindingStore<D>>,
        queue: Arc<Queue>,
        claims: watch::Receiver<Arc<Claim>>,
        hostname: impl ToString,
        config: ControllerConfig,
        metrics: ControllerMetrics,
    ) -> Self {
        Self {
            name,
            source,
            store,
            queue,
            claims,
            hostname: hostname.to_string(),
            config,
            metrics,
            _marker: PhantomData,
        }
    }

    /// Processes keys until the lease manager stops publishing claims.
    pub async fn run(self) {
        let controller = Arc::new(self);
        let mut workers = JoinSet::new();
        for worker in 0..controller.config.workers.max(1) {
            let c = controller.clone();
            workers.spawn(
                c.work()
                    .instrument(info_span!("worker", controller = controller.name, worker)),
            );
        }

        let mut claims = controller.claims.clone();
        let mut leader = controller.is_leader();
        if leader {
            controller.source.read().resync();
        }
        while claims.changed().await.is_ok() {
            let current = controller.is_leader();
            if current && !leader {
                tracing::info!(controller = controller.name, "Acquired the write lease");
                controller.source.read().resync();
            } else if leader && !current {
                tracing::info!(controller = controller.name, "Lost the write lease");
            }
            leader = current;
        }

        tracing::debug!(controller = controller.name, "Claims closed; stopping");
        controller.queue.close();
        while let Some(res) = workers.join_next().await {
            if let Err(error) = res {
                tracing::warn!(%error, "Worker failed");
            }
        }
    }

    fn is_leader(&self) -> bool {
        self.claims.borrow().is_current_for(&self.hostname)
    }

    async fn work(self: Arc<Self>) {
        while let Some(id) = self.queue.next().await {
            self.metrics.reconciles.inc();
            let res = self.reconcile(&id).await;
            self.queue.done(&id);
            match res {
                Ok(()) => self.queue.forget(&id),
                Err(error) => {
                    self.metrics.requeues.inc();
                    let delay = self.queue.requeue(id.clone());
                    tracing::warn!(%id, %error, ?delay, "Failed to mirror; requeueing");
                }
            }
        }
    }

    /// Brings the destination counterpart of `id` in line with the current
    /// source object.
    #[tracing::instrument(skip(self), fields(%id))]
    async fn reconcile(&self, id: &ObjectId) -> Result<()> {
        if !self.is_leader() {
            tracing::debug!("Not the lease holder; skipping");
            self.metrics.skipped.inc();
            return Ok(());
        }

        let source = self.source.read().get(id).cloned();
        let Some(source) = source else {
            self.store.delete(id).await?;
            tracing::debug!("Deleted");
            self.metrics.deletes.inc();
            return Ok(());
        };

        let desired = match source.to_binding() {
            Ok(binding) => D::from_binding(&binding),
            Err(error) => {
                tracing::warn!(%error, "Skipping binding that cannot be mirrored");
                self.metrics.invalid.inc();
                return Ok(());
            }
        };

        let written = retry::retry_on_conflict(self.config.retry, || self.write(&desired)).await?;
        if written {
            tracing::debug!("Written");
            self.metrics.writes.inc();
        }
        Ok(())
    }

    /// Writes `desired` over the current destination object unless it
    /// already holds the same content. Returns whether a write happened.
    async fn write(&self, desired: &D) -> Result<bool> {
        let current = self.store.get(&desired.id()).await?;
        let mut obj = desired.clone();
        if let Some(current) = current {
            if current.same_content(desired) {
                return Ok(false);
            }
            obj.set_resource_version(current.resource_version().map(Into::into));
        }

        match self.store.upsert(obj).await {
            Ok(_) => Ok(true),
            Err(error) => {
                if error.is_conflict() {
                    self.metrics.conflicts.inc();
                }
                Err(error)
            }
        }
    }
}
