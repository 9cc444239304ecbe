use prometheus_client::{metrics::counter::Counter, registry::Registry};

#[derive(Clone, Debug, Default)]
pub struct ControllerMetrics {
    pub(crate) reconciles: Counter,
    pub(crate) writes: Counter,
    pub(crate) deletes: Counter,
    pub(crate) conflicts: Counter,
    pub(crate) requeues: Counter,
    pub(crate) skipped: Counter,
    pub(crate) invalid: Counter,
}

// === impl ControllerMetrics ===

impl ControllerMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let metrics = Self::default();
        prom.register(
            "reconciles",
            "Count of keys processed",
            metrics.reconciles.clone(),
        );
        prom.register(
            "writes",
            "Count of objects created or replaced in the destination",
            metrics.writes.clone(),
        );
        prom.register(
            "deletes",
            "Count of keys whose destination object was deleted",
            metrics.deletes.clone(),
        );
        prom.register(
            "conflicts",
            "Count of destination writes rejected by a concurrent update",
            metrics.conflicts.clone(),
        );
        prom.register(
            "requeues",
            "Count of keys requeued after a failure",
            metrics.requeues.clone(),
        );
        prom.register(
            "skipped",
            "Count of keys dropped because this instance does not hold the lease",
            metrics.skipped.clone(),
        );
        prom.register(
            "invalid",
            "Count of source objects that could not be translated",
            metrics.invalid.clone(),
        );
        metrics
    }
}
