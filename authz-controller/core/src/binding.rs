use crate::{rule::PolicyRule, subject::Subject};
use std::{fmt, sync::Arc};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Role {
    pub namespace: String,
    pub name: String,
    pub rules: Vec<PolicyRule>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterRole {
    pub name: String,
    pub rules: Vec<PolicyRule>,
}

/// A resolved role reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AnyRole {
    Role(Arc<Role>),
    ClusterRole(Arc<ClusterRole>),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RoleRef {
    Role { namespace: String, name: String },
    ClusterRole { name: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoleBinding {
    pub namespace: String,
    pub name: String,
    pub role_ref: RoleRef,
    pub subjects: Vec<Subject>,
}

/// Grants a cluster role in every namespace and at the cluster scope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterRoleBinding {
    pub name: String,
    pub cluster_role: String,
    pub subjects: Vec<Subject>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Binding {
    RoleBinding(Arc<RoleBinding>),
    ClusterRoleBinding(Arc<ClusterRoleBinding>),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BindingKind {
    RoleBinding,
    ClusterRoleBinding,
}

// === impl ClusterRole ===

impl ClusterRole {
    pub fn new(name: impl Into<String>, rules: impl IntoIterator<Item = PolicyRule>) -> Self {
        Self {
            name: name.into(),
            rules: rules.into_iter().collect(),
        }
    }
}

// === impl AnyRole ===

impl AnyRole {
    pub fn rules(&self) -> &[PolicyRule] {
        match self {
            Self::Role(role) => &role.rules,
            Self::ClusterRole(role) => &role.rules,
        }
    }
}

// === impl RoleRef ===

impl RoleRef {
    pub fn role(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Role {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn cluster_role(name: impl Into<String>) -> Self {
        Self::ClusterRole { name: name.into() }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Role { .. } => "Role",
            Self::ClusterRole { .. } => "ClusterRole",
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Role { name, .. } | Self::ClusterRole { name } => name,
        }
    }
}

impl fmt::Display for RoleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.kind(), self.name())
    }
}

// === impl RoleBinding ===

impl RoleBinding {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        role_ref: RoleRef,
        subjects: impl IntoIterator<Item = Subject>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            role_ref,
            subjects: subjects.into_iter().collect(),
        }
    }
}

// === impl ClusterRoleBinding ===

impl ClusterRoleBinding {
    pub fn new(
        name: impl Into<String>,
        cluster_role: impl Into<String>,
        subjects: impl IntoIterator<Item = Subject>,
    ) -> Self {
        Self {
            name: name.into(),
            cluster_role: cluster_role.into(),
            subjects: subjects.into_iter().collect(),
        }
    }
}

// === impl Binding ===

impl From<RoleBinding> for Binding {
    fn from(binding: RoleBinding) -> Self {
        Self::RoleBinding(Arc::new(binding))
    }
}

impl From<ClusterRoleBinding> for Binding {
    fn from(binding: ClusterRoleBinding) -> Self {
        Self::ClusterRoleBinding(Arc::new(binding))
    }
}

impl Binding {
    pub fn kind(&self) -> BindingKind {
        match self {
            Self::RoleBinding(_) => BindingKind::RoleBinding,
            Self::ClusterRoleBinding(_) => BindingKind::ClusterRoleBinding,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::RoleBinding(b) => &b.name,
            Self::ClusterRoleBinding(b) => &b.name,
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        match self {
            Self::RoleBinding(b) => Some(&b.namespace),
            Self::ClusterRoleBinding(_) => None,
        }
    }

    pub fn role_ref(&self) -> RoleRef {
        match self {
            Self::RoleBinding(b) => b.role_ref.clone(),
            Self::ClusterRoleBinding(b) => RoleRef::cluster_role(b.cluster_role.clone()),
        }
    }

    pub fn subjects(&self) -> &[Subject] {
        match self {
            Self::RoleBinding(b) => &b.subjects,
            Self::ClusterRoleBinding(b) => &b.subjects,
        }
    }

    /// Cluster role bindings apply everywhere; role bindings only apply to
    /// actions in their own namespace.
    pub fn applies_in(&self, namespace: Option<&str>) -> bool {
        match self {
            Self::RoleBinding(b) => namespace == Some(b.namespace.as_str()),
            Self::ClusterRoleBinding(_) => true,
        }
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RoleBinding(b) => write!(f, "{} \"{}/{}\"", self.kind(), b.name, b.namespace),
            Self::ClusterRoleBinding(b) => write!(f, "{} {:?}", self.kind(), b.name),
        }
    }
}

// === impl BindingKind ===

impl BindingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoleBinding => "RoleBinding",
            Self::ClusterRoleBinding => "ClusterRoleBinding",
        }
    }
}

impl fmt::Display for BindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
