//! Indexes native RBAC resources into policy snapshots.
//!
//! The index is updated by a single task per watched resource type. After
//! every effective change it publishes a new snapshot and then emits a
//! [`Change`], so that any consumer reacting to a change observes a snapshot
//! that includes it.

use crate::{metrics::SizedIndex, rbac};
use ahash::AHashSet as HashSet;
use authz_controller_core::{BootstrapPolicy, Change, ChangeKind, Event, PolicySnapshot, RoleRef};
use authz_controller_k8s_api::{self as k8s, ResourceExt};
use kubert::index::{IndexClusterResource, IndexNamespacedResource};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

pub type SharedIndex = Arc<RwLock<Index>>;

pub type SnapshotRx = watch::Receiver<Arc<PolicySnapshot>>;

pub struct Index {
    snapshot: PolicySnapshot,
    namespaces: HashSet<String>,
    snapshot_tx: watch::Sender<Arc<PolicySnapshot>>,
    changes: mpsc::UnboundedSender<Change>,
}

// === impl Index ===

impl Index {
    pub fn shared(
        bootstrap: Arc<BootstrapPolicy>,
        changes: mpsc::UnboundedSender<Change>,
    ) -> (SharedIndex, SnapshotRx) {
        let snapshot = PolicySnapshot::new(bootstrap);
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(snapshot.clone()));
        let index = Self {
            snapshot,
            namespaces: HashSet::default(),
            snapshot_tx,
            changes,
        };
        (Arc::new(RwLock::new(index)), snapshot_rx)
    }

    pub fn snapshot(&self) -> &PolicySnapshot {
        &self.snapshot
    }

    pub fn contains_namespace(&self, namespace: &str) -> bool {
        self.namespaces.contains(namespace)
    }

    fn publish(&mut self, kind: ChangeKind, namespace: Option<String>, name: String, event: Event) {
        tracing::debug!(?kind, ?namespace, %name, ?event, "Publishing policy update");
        self.snapshot_tx.send_replace(Arc::new(self.snapshot.clone()));
        if self
            .changes
            .send(Change::new(kind, namespace, name, event))
            .is_err()
        {
            tracing::debug!("Change receiver dropped");
        }
    }
}

fn event(existed: bool) -> Event {
    if existed {
        Event::Modified
    } else {
        Event::Added
    }
}

impl IndexNamespacedResource<k8s::Role> for Index {
    fn apply(&mut self, role: k8s::Role) {
        let namespace = role.namespace().unwrap_or_default();
        let name = role.name_unchecked();
        let existed = self
            .snapshot
            .contains_role(&RoleRef::role(namespace.clone(), name.clone()));

        match rbac::role(role) {
            Ok(role) => {
                if self.snapshot.apply_role(role) {
                    self.publish(ChangeKind::Role, Some(namespace), name, event(existed));
                }
            }
            Err(error) => {
                tracing::warn!(%namespace, %name, %error, "Ignoring invalid Role");
                IndexNamespacedResource::<k8s::Role>::delete(self, namespace, name);
            }
        }
    }

    fn delete(&mut self, namespace: String, name: String) {
        if self.snapshot.delete_role(&namespace, &name) {
            self.publish(ChangeKind::Role, Some(namespace), name, Event::Deleted);
        }
    }
}

impl IndexNamespacedResource<k8s::RoleBinding> for Index {
    fn apply(&mut self, binding: k8s::RoleBinding) {
        let namespace = binding.namespace().unwrap_or_default();
        let name = binding.name_unchecked();
        let existed = self.snapshot.contains_binding(Some(&namespace), &name);

        match rbac::role_binding(binding) {
            Ok(binding) => {
                if self.snapshot.apply_role_binding(binding) {
                    self.publish(ChangeKind::RoleBinding, Some(namespace), name, event(existed));
                }
            }
            Err(error) => {
                tracing::warn!(%namespace, %name, %error, "Ignoring invalid RoleBinding");
                IndexNamespacedResource::<k8s::RoleBinding>::delete(self, namespace, name);
            }
        }
    }

    fn delete(&mut self, namespace: String, name: String) {
        if self.snapshot.delete_role_binding(&namespace, &name) {
            self.publish(ChangeKind::RoleBinding, Some(namespace), name, Event::Deleted);
        }
    }
}

impl IndexClusterResource<k8s::ClusterRole> for Index {
    fn apply(&mut self, role: k8s::ClusterRole) {
        let role = rbac::cluster_role(role);
        let name = role.name.clone();
        let existed = self
            .snapshot
            .contains_role(&RoleRef::cluster_role(name.clone()));
        if self.snapshot.apply_cluster_role(role) {
            self.publish(ChangeKind::ClusterRole, None, name, event(existed));
        }
    }

    fn delete(&mut self, name: String) {
        if self.snapshot.delete_cluster_role(&name) {
            self.publish(ChangeKind::ClusterRole, None, name, Event::Deleted);
        }
    }
}

impl IndexClusterResource<k8s::ClusterRoleBinding> for Index {
    fn apply(&mut self, binding: k8s::ClusterRoleBinding) {
        let name = binding.name_unchecked();
        let existed = self.snapshot.contains_binding(None, &name);

        match rbac::cluster_role_binding(binding) {
            Ok(binding) => {
                if self.snapshot.apply_cluster_role_binding(binding) {
                    self.publish(ChangeKind::ClusterRoleBinding, None, name, event(existed));
                }
            }
            Err(error) => {
                tracing::warn!(%name, %error, "Ignoring invalid ClusterRoleBinding");
                IndexClusterResource::<k8s::ClusterRoleBinding>::delete(self, name);
            }
        }
    }

    fn delete(&mut self, name: String) {
        if self.snapshot.delete_cluster_role_binding(&name) {
            self.publish(ChangeKind::ClusterRoleBinding, None, name, Event::Deleted);
        }
    }
}

impl IndexClusterResource<k8s::Namespace> for Index {
    fn apply(&mut self, ns: k8s::Namespace) {
        let name = ns.name_unchecked();
        if self.namespaces.insert(name.clone()) {
            self.publish(ChangeKind::Namespace, None, name, Event::Added);
        }
    }

    fn delete(&mut self, name: String) {
        let known = self.namespaces.remove(&name);
        let dropped = self.snapshot.delete_namespace(&name);
        if known || dropped {
            self.publish(ChangeKind::Namespace, None, name, Event::Deleted);
        }
    }
}

impl SizedIndex for Index {
    fn size(&self, namespace: &str) -> usize {
        self.snapshot.size(namespace)
    }
}
