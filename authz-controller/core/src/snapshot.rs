use crate::{
    binding::{AnyRole, Binding, ClusterRole, ClusterRoleBinding, Role, RoleBinding, RoleRef},
    bootstrap::BootstrapPolicy,
    error::Result,
    lister::BindingLister,
};
use ahash::AHashMap as HashMap;
use std::{collections::BTreeMap, sync::Arc};

/// An immutable view of every role and binding.
///
/// Updates are copy-on-write: cloning a snapshot shares all per-namespace
/// state, and a mutation only copies the namespace (or the cluster-scoped
/// policy) it touches. Published snapshots are never modified.
///
/// Bootstrap roles and bindings are always present. A live object with the
/// same name replaces the bootstrap object until it is deleted.
#[derive(Clone, Debug, Default)]
pub struct PolicySnapshot {
    bootstrap: Arc<BootstrapPolicy>,
    cluster: Arc<ClusterPolicy>,
    namespaces: HashMap<String, Arc<NamespacePolicy>>,
}

#[derive(Clone, Debug, Default)]
struct ClusterPolicy {
    roles: HashMap<String, Arc<ClusterRole>>,
    bindings: BTreeMap<String, Binding>,
}

#[derive(Clone, Debug, Default)]
struct NamespacePolicy {
    roles: HashMap<String, Arc<Role>>,
    bindings: BTreeMap<String, Binding>,
}

// === impl PolicySnapshot ===

impl PolicySnapshot {
    pub fn new(bootstrap: Arc<BootstrapPolicy>) -> Self {
        let mut cluster = ClusterPolicy::default();
        for role in &bootstrap.cluster_roles {
            cluster
                .roles
                .insert(role.name.clone(), Arc::new(role.clone()));
        }
        for binding in &bootstrap.cluster_role_bindings {
            cluster
                .bindings
                .insert(binding.name.clone(), binding.clone().into());
        }

        Self {
            bootstrap,
            cluster: Arc::new(cluster),
            namespaces: HashMap::default(),
        }
    }

    /// Returns the namespaces that hold at least one role or binding.
    pub fn namespaces(&self) -> impl Iterator<Item = &str> + '_ {
        self.namespaces.keys().map(String::as_str)
    }

    pub fn cluster_role(&self, name: &str) -> Option<Arc<ClusterRole>> {
        self.cluster.roles.get(name).cloned()
    }

    pub fn contains_role(&self, role_ref: &RoleRef) -> bool {
        match role_ref {
            RoleRef::ClusterRole { name } => self.cluster.roles.contains_key(name),
            RoleRef::Role { namespace, name } => self
                .namespaces
                .get(namespace)
                .is_some_and(|ns| ns.roles.contains_key(name)),
        }
    }

    /// Looks up a role binding when `namespace` is set, and a cluster role
    /// binding otherwise.
    pub fn contains_binding(&self, namespace: Option<&str>, name: &str) -> bool {
        match namespace {
            None => self.cluster.bindings.contains_key(name),
            Some(ns) => self
                .namespaces
                .get(ns)
                .is_some_and(|ns| ns.bindings.contains_key(name)),
        }
    }

    /// The number of roles and bindings in a namespace.
    pub fn size(&self, namespace: &str) -> usize {
        self.namespaces
            .get(namespace)
            .map(|ns| ns.roles.len() + ns.bindings.len())
            .unwrap_or(0)
    }

    /// Returns true if the snapshot changed.
    pub fn apply_cluster_role(&mut self, role: ClusterRole) -> bool {
        if self.cluster.roles.get(&role.name).map(|r| &**r) == Some(&role) {
            return false;
        }
        Arc::make_mut(&mut self.cluster)
            .roles
            .insert(role.name.clone(), Arc::new(role));
        true
    }

    pub fn delete_cluster_role(&mut self, name: &str) -> bool {
        let bootstrap = self.bootstrap.cluster_role(name).cloned();
        let cluster = Arc::make_mut(&mut self.cluster);
        match bootstrap {
            Some(role) => {
                let role = Arc::new(role);
                cluster.roles.insert(name.to_string(), role.clone()).as_ref() != Some(&role)
            }
            None => cluster.roles.remove(name).is_some(),
        }
    }

    pub fn apply_cluster_role_binding(&mut self, binding: ClusterRoleBinding) -> bool {
        let binding = Binding::from(binding);
        if self.cluster.bindings.get(binding.name()) == Some(&binding) {
            return false;
        }
        Arc::make_mut(&mut self.cluster)
            .bindings
            .insert(binding.name().to_string(), binding);
        true
    }

    pub fn delete_cluster_role_binding(&mut self, name: &str) -> bool {
        let bootstrap = self
            .bootstrap
            .cluster_role_binding(name)
            .cloned()
            .map(Binding::from);
        let cluster = Arc::make_mut(&mut self.cluster);
        match bootstrap {
            Some(binding) => {
                cluster.bindings.insert(name.to_string(), binding.clone()) != Some(binding)
            }
            None => cluster.bindings.remove(name).is_some(),
        }
    }

    pub fn apply_role(&mut self, role: Role) -> bool {
        if let Some(ns) = self.namespaces.get(&role.namespace) {
            if ns.roles.get(&role.name).map(|r| &**r) == Some(&role) {
                return false;
            }
        }
        self.namespace_mut(&role.namespace)
            .roles
            .insert(role.name.clone(), Arc::new(role));
        true
    }

    pub fn delete_role(&mut self, namespace: &str, name: &str) -> bool {
        if !self
            .namespaces
            .get(namespace)
            .is_some_and(|ns| ns.roles.contains_key(name))
        {
            return false;
        }
        self.namespace_mut(namespace).roles.remove(name);
        self.prune(namespace);
        true
    }

    pub fn apply_role_binding(&mut self, binding: RoleBinding) -> bool {
        let namespace = binding.namespace.clone();
        let binding = Binding::from(binding);
        if let Some(ns) = self.namespaces.get(&namespace) {
            if ns.bindings.get(binding.name()) == Some(&binding) {
                return false;
            }
        }
        self.namespace_mut(&namespace)
            .bindings
            .insert(binding.name().to_string(), binding);
        true
    }

    pub fn delete_role_binding(&mut self, namespace: &str, name: &str) -> bool {
        if !self
            .namespaces
            .get(namespace)
            .is_some_and(|ns| ns.bindings.contains_key(name))
        {
            return false;
        }
        self.namespace_mut(namespace).bindings.remove(name);
        self.prune(namespace);
        true
    }

    /// Drops all roles and bindings in a namespace.
    pub fn delete_namespace(&mut self, namespace: &str) -> bool {
        self.namespaces.remove(namespace).is_some()
    }

    fn namespace_mut(&mut self, namespace: &str) -> &mut NamespacePolicy {
        let ns = self.namespaces.entry(namespace.to_string()).or_default();
        Arc::make_mut(ns)
    }

    fn prune(&mut self, namespace: &str) {
        if self
            .namespaces
            .get(namespace)
            .is_some_and(|ns| ns.roles.is_empty() && ns.bindings.is_empty())
        {
            self.namespaces.remove(namespace);
        }
    }
}

impl BindingLister for PolicySnapshot {
    fn list_bindings(&self, namespace: Option<&str>) -> Result<Vec<Binding>> {
        let mut bindings = self.cluster.bindings.values().cloned().collect::<Vec<_>>();
        if let Some(ns) = namespace.and_then(|ns| self.namespaces.get(ns)) {
            bindings.extend(ns.bindings.values().cloned());
        }
        Ok(bindings)
    }

    fn get_role(&self, role_ref: &RoleRef) -> Result<Option<AnyRole>> {
        let role = match role_ref {
            RoleRef::ClusterRole { name } => self
                .cluster
                .roles
                .get(name)
                .cloned()
                .map(AnyRole::ClusterRole),
            RoleRef::Role { namespace, name } => self
                .namespaces
                .get(namespace)
                .and_then(|ns| ns.roles.get(name))
                .cloned()
                .map(AnyRole::Role),
        };
        Ok(role)
    }
}
