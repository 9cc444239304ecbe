/// Describes a mutation observed in the policy store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Change {
    pub kind: ChangeKind,
    pub namespace: Option<String>,
    pub name: String,
    pub event: Event,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Namespace,
    Role,
    ClusterRole,
    RoleBinding,
    ClusterRoleBinding,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    Added,
    Modified,
    Deleted,
}

impl Change {
    pub fn new(kind: ChangeKind, namespace: Option<String>, name: String, event: Event) -> Self {
        Self {
            kind,
            namespace,
            name,
            event,
        }
    }

    /// Cluster-scoped policy changes may affect every namespace.
    pub fn is_cluster_scoped(&self) -> bool {
        matches!(
            self.kind,
            ChangeKind::ClusterRole | ChangeKind::ClusterRoleBinding
        )
    }
}
