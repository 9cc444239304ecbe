use crate::{binding::BindingKind, error::Result};
use std::fmt;

/// Identifies a binding across representations.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId {
    pub kind: BindingKind,
    pub namespace: Option<String>,
    pub name: String,
}

/// An object that carries an optimistic-concurrency version.
pub trait Versioned {
    fn id(&self) -> ObjectId;

    fn resource_version(&self) -> Option<&str>;

    fn set_resource_version(&mut self, version: Option<String>);

    /// Returns true if both objects have the same content, ignoring
    /// versions and other server-managed metadata.
    fn same_content(&self, other: &Self) -> bool;
}

/// A store of bindings supporting optimistic concurrency.
///
/// `upsert` fails with a conflict error when the object's resource version
/// does not match the stored version. An object without a resource version
/// is created and conflicts if it already exists.
#[async_trait::async_trait]
pub trait BindingStore<T>: Send + Sync {
    async fn get(&self, id: &ObjectId) -> Result<Option<T>>;

    async fn upsert(&self, obj: T) -> Result<T>;

    /// Deleting an absent object succeeds.
    async fn delete(&self, id: &ObjectId) -> Result<()>;
}

// === impl ObjectId ===

impl ObjectId {
    pub fn role_binding(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: BindingKind::RoleBinding,
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn cluster_role_binding(name: impl Into<String>) -> Self {
        Self {
            kind: BindingKind::ClusterRoleBinding,
            namespace: None,
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}
