use crate::{
    binding::{LegacyBinding, NativeBinding},
    queue::Queue,
};
use ahash::AHashMap as HashMap;
use authz_controller_core::{ObjectId, Versioned};
use authz_controller_k8s_api::{self as k8s, legacy};
use authz_controller_k8s_index::SizedIndex;
use kubert::index::{IndexClusterResource, IndexNamespacedResource};
use parking_lot::RwLock;
use std::sync::Arc;

pub type SharedSourceIndex<T> = Arc<RwLock<SourceIndex<T>>>;

/// Holds the latest state of every source object and enqueues the key of
/// each object that changes.
#[derive(Debug)]
pub struct SourceIndex<T> {
    objects: HashMap<ObjectId, T>,
    queue: Arc<Queue>,
}

// === impl SourceIndex ===

impl<T: Versioned + PartialEq> SourceIndex<T> {
    pub fn shared(queue: Arc<Queue>) -> SharedSourceIndex<T> {
        Arc::new(RwLock::new(Self {
            objects: HashMap::default(),
            queue,
        }))
    }

    pub fn get(&self, id: &ObjectId) -> Option<&T> {
        self.objects.get(id)
    }

    /// Enqueues every known object.
    pub fn resync(&self) {
        for id in self.objects.keys() {
            self.queue.add(id.clone());
        }
    }

    fn insert(&mut self, obj: T) {
        let id = obj.id();
        if self.objects.get(&id) == Some(&obj) {
            return;
        }
        tracing::trace!(%id, "Updated");
        self.objects.insert(id.clone(), obj);
        self.queue.add(id);
    }

    /// The key is enqueued even when the object was never seen, so that a
    /// counterpart left behind by an earlier run is removed.
    fn remove(&mut self, id: ObjectId) {
        tracing::trace!(%id, "Removed");
        self.objects.remove(&id);
        self.queue.add(id);
    }
}

impl<T> SizedIndex for SourceIndex<T> {
    fn size(&self, namespace: &str) -> usize {
        self.objects
            .keys()
            .filter(|id| id.namespace.as_deref() == Some(namespace))
            .count()
    }
}

impl IndexNamespacedResource<legacy::RoleBinding> for SourceIndex<LegacyBinding> {
    fn apply(&mut self, binding: legacy::RoleBinding) {
        self.insert(LegacyBinding::RoleBinding(binding));
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.remove(ObjectId::role_binding(namespace, name));
    }
}

impl IndexClusterResource<legacy::ClusterRoleBinding> for SourceIndex<LegacyBinding> {
    fn apply(&mut self, binding: legacy::ClusterRoleBinding) {
        self.insert(LegacyBinding::ClusterRoleBinding(binding));
    }

    fn delete(&mut self, name: String) {
        self.remove(ObjectId::cluster_role_binding(name));
    }
}

impl IndexNamespacedResource<k8s::RoleBinding> for SourceIndex<NativeBinding> {
    fn apply(&mut self, binding: k8s::RoleBinding) {
        self.insert(NativeBinding::RoleBinding(binding));
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.remove(ObjectId::role_binding(namespace, name));
    }
}

impl IndexClusterResource<k8s::ClusterRoleBinding> for SourceIndex<NativeBinding> {
    fn apply(&mut self, binding: k8s::ClusterRoleBinding) {
        self.insert(NativeBinding::ClusterRoleBinding(binding));
    }

    fn delete(&mut self, name: String) {
        self.remove(ObjectId::cluster_role_binding(name));
    }
}
