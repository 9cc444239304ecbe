use kube::Resource;
use kubert::index::{
    ClusterRemoved, IndexClusterResource, IndexNamespacedResource, NamespacedRemoved,
};
use parking_lot::RwLock;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};
use std::sync::Arc;

/// Wraps an index to count the updates applied to it.
pub struct IndexMetrics<T> {
    inner: Arc<RwLock<T>>,

    index_size: Family<NamespacedIndexLabels, Gauge>,
    index_applies: Family<IndexLabels, Counter>,
    index_deletes: Family<IndexLabels, Counter>,
    index_resets: Family<IndexLabels, Counter>,
}

/// Counts access index refreshes.
#[derive(Clone, Debug, Default)]
pub struct AccessMetrics {
    pub(crate) refreshes: Counter,
    pub(crate) coalesced: Counter,
    pub(crate) failures: Counter,
    pub(crate) entries: Gauge,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct NamespacedIndexLabels {
    namespace: String,
    kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct IndexLabels {
    kind: String,
}

pub trait SizedIndex {
    /// The number of resources held for a namespace.
    fn size(&self, namespace: &str) -> usize;
}

// === impl IndexMetrics ===

impl<T> IndexMetrics<T> {
    pub fn register(inner: Arc<RwLock<T>>, prom: &mut Registry) -> Self {
        let index_size = Family::default();
        prom.register(
            "index_size",
            "Gauge of the number of resources in the index",
            index_size.clone(),
        );

        let index_applies = Family::default();
        prom.register(
            "index_applies",
            "Count of applies to the index",
            index_applies.clone(),
        );

        let index_deletes = Family::default();
        prom.register(
            "index_deletes",
            "Count of deletes to the index",
            index_deletes.clone(),
        );

        let index_resets = Family::default();
        prom.register(
            "index_resets",
            "Count of resets to the index",
            index_resets.clone(),
        );

        Self {
            inner,
            index_size,
            index_applies,
            index_deletes,
            index_resets,
        }
    }

    pub fn shared(self) -> Arc<RwLock<Self>> {
        Arc::new(RwLock::new(self))
    }

    fn labels<R: Resource<DynamicType = ()>>() -> IndexLabels {
        IndexLabels {
            kind: R::kind(&()).to_string(),
        }
    }
}

impl<T: SizedIndex> IndexMetrics<T> {
    fn observe_size<R: Resource<DynamicType = ()>>(&self, namespace: String) {
        let size = self.inner.read().size(&namespace);
        self.index_size
            .get_or_create(&NamespacedIndexLabels {
                namespace,
                kind: R::kind(&()).to_string(),
            })
            .set(size as i64);
    }
}

impl<R, T> IndexNamespacedResource<R> for IndexMetrics<T>
where
    T: SizedIndex + IndexNamespacedResource<R>,
    R: Resource<DynamicType = ()>,
{
    fn apply(&mut self, resource: R) {
        let namespace = resource.meta().namespace.clone().unwrap_or_default();
        self.index_applies.get_or_create(&Self::labels::<R>()).inc();
        IndexNamespacedResource::apply(&mut *self.inner.write(), resource);
        self.observe_size::<R>(namespace);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.index_deletes.get_or_create(&Self::labels::<R>()).inc();
        IndexNamespacedResource::delete(&mut *self.inner.write(), namespace.clone(), name);
        self.observe_size::<R>(namespace);
    }

    fn reset(&mut self, resources: Vec<R>, removed: NamespacedRemoved) {
        let namespaces = resources
            .iter()
            .flat_map(|r| r.meta().namespace.clone())
            .chain(removed.keys().cloned())
            .collect::<Vec<_>>();
        self.index_resets.get_or_create(&Self::labels::<R>()).inc();
        IndexNamespacedResource::reset(&mut *self.inner.write(), resources, removed);
        for ns in namespaces {
            self.observe_size::<R>(ns);
        }
    }
}

impl<R, T> IndexClusterResource<R> for IndexMetrics<T>
where
    T: IndexClusterResource<R>,
    R: Resource<DynamicType = ()>,
{
    fn apply(&mut self, resource: R) {
        self.index_applies.get_or_create(&Self::labels::<R>()).inc();
        IndexClusterResource::apply(&mut *self.inner.write(), resource);
    }

    fn delete(&mut self, name: String) {
        self.index_deletes.get_or_create(&Self::labels::<R>()).inc();
        IndexClusterResource::delete(&mut *self.inner.write(), name);
    }

    fn reset(&mut self, resources: Vec<R>, removed: ClusterRemoved) {
        self.index_resets.get_or_create(&Self::labels::<R>()).inc();
        IndexClusterResource::reset(&mut *self.inner.write(), resources, removed);
    }
}

// === impl AccessMetrics ===

impl AccessMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let metrics = Self::default();
        prom.register(
            "refreshes",
            "Count of namespace access entries rebuilt",
            metrics.refreshes.clone(),
        );
        prom.register(
            "coalesced",
            "Count of refresh triggers absorbed by an in-flight refresh",
            metrics.coalesced.clone(),
        );
        prom.register(
            "failures",
            "Count of refreshes that failed to evaluate",
            metrics.failures.clone(),
        );
        prom.register(
            "entries",
            "Gauge of the number of namespaces in the access index",
            metrics.entries.clone(),
        );
        metrics
    }
}
