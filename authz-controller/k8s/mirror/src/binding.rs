//! Legacy and native binding representations.
//!
//! Both representations translate through the policy [`Binding`] type, which
//! is also how their contents are compared: two objects hold the same content
//! when they grant the same role to the same set of subjects.

use anyhow::anyhow;
use authz_controller_core::{
    Binding, ClusterRoleBinding, ObjectId, RoleBinding, RoleRef, Subject, Versioned,
};
use authz_controller_k8s_api::{self as k8s, legacy, ObjectMeta, Resource, ResourceExt};
use authz_controller_k8s_index::rbac::{self, GROUP_KIND, SERVICE_ACCOUNT_KIND, USER_KIND};
use std::fmt;

/// A binding representation that may be mirrored into another.
pub trait MirrorObject: Versioned + Clone + fmt::Debug + Send + Sync + 'static {
    /// Interprets the object as a policy binding, with its subjects sorted
    /// and deduplicated.
    fn to_binding(&self) -> Result<Binding, TranslateError>;

    /// Builds an unversioned object granting `binding`.
    fn from_binding(binding: &Binding) -> Self;
}

#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("{id} references role {role:?} in another namespace {namespace:?}")]
    RoleNamespace {
        id: ObjectId,
        role: String,
        namespace: String,
    },

    #[error("{id} may only reference cluster roles")]
    ClusterScope { id: ObjectId },

    #[error("{id} is invalid: {error}")]
    Invalid {
        id: ObjectId,
        #[source]
        error: anyhow::Error,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub enum LegacyBinding {
    RoleBinding(legacy::RoleBinding),
    ClusterRoleBinding(legacy::ClusterRoleBinding),
}

#[derive(Clone, Debug, PartialEq)]
pub enum NativeBinding {
    RoleBinding(k8s::RoleBinding),
    ClusterRoleBinding(k8s::ClusterRoleBinding),
}

fn normalize(mut subjects: Vec<Subject>) -> Vec<Subject> {
    subjects.sort();
    subjects.dedup();
    subjects
}

fn metadata(namespace: Option<&str>, name: &str) -> ObjectMeta {
    ObjectMeta {
        namespace: namespace.map(Into::into),
        name: Some(name.to_string()),
        ..Default::default()
    }
}

fn same_binding<T: MirrorObject>(a: &T, b: &T) -> bool {
    matches!((a.to_binding(), b.to_binding()), (Ok(a), Ok(b)) if a == b)
}

// === impl TranslateError ===

impl TranslateError {
    fn invalid(id: &ObjectId, error: impl Into<anyhow::Error>) -> Self {
        Self::Invalid {
            id: id.clone(),
            error: error.into(),
        }
    }
}

// === impl LegacyBinding ===

impl LegacyBinding {
    fn meta(&self) -> &ObjectMeta {
        match self {
            Self::RoleBinding(b) => b.meta(),
            Self::ClusterRoleBinding(b) => b.meta(),
        }
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Self::RoleBinding(b) => b.meta_mut(),
            Self::ClusterRoleBinding(b) => b.meta_mut(),
        }
    }
}

/// Merges user names, group names and subject references. Service account
/// user names become service account subjects.
fn legacy_subjects(
    id: &ObjectId,
    user_names: &[String],
    group_names: &[String],
    subjects: &[legacy::SubjectRef],
    namespace: Option<&str>,
) -> Result<Vec<Subject>, TranslateError> {
    let mut merged = user_names
        .iter()
        .map(|u| Subject::from_user_name(u))
        .chain(group_names.iter().map(Subject::group))
        .collect::<Vec<_>>();
    for s in subjects {
        let subject = match s.kind.as_str() {
            USER_KIND => Subject::from_user_name(&s.name),
            GROUP_KIND => Subject::group(&s.name),
            SERVICE_ACCOUNT_KIND => {
                let ns = s
                    .namespace
                    .as_deref()
                    .filter(|ns| !ns.is_empty())
                    .or(namespace)
                    .ok_or_else(|| {
                        TranslateError::invalid(
                            id,
                            anyhow!("service account {} must have a namespace", s.name),
                        )
                    })?;
                Subject::service_account(ns, &s.name)
            }
            kind => {
                return Err(TranslateError::invalid(
                    id,
                    anyhow!("unsupported subject kind {kind}"),
                ))
            }
        };
        merged.push(subject);
    }
    Ok(normalize(merged))
}

/// Splits subjects into user names, group names and service account
/// references.
fn split_subjects(subjects: &[Subject]) -> (Vec<String>, Vec<String>, Vec<legacy::SubjectRef>) {
    let mut users = Vec::new();
    let mut groups = Vec::new();
    let mut refs = Vec::new();
    for subject in subjects {
        match subject {
            Subject::User(name) => users.push(name.clone()),
            Subject::Group(name) => groups.push(name.clone()),
            Subject::ServiceAccount { namespace, name } => refs.push(legacy::SubjectRef {
                kind: SERVICE_ACCOUNT_KIND.to_string(),
                name: name.clone(),
                namespace: Some(namespace.clone()),
            }),
        }
    }
    (users, groups, refs)
}

impl MirrorObject for LegacyBinding {
    fn to_binding(&self) -> Result<Binding, TranslateError> {
        let id = self.id();
        match self {
            Self::RoleBinding(b) => {
                let namespace = b
                    .namespace()
                    .ok_or_else(|| TranslateError::invalid(&id, anyhow!("missing namespace")))?;
                let spec = &b.spec;
                let role_ref = match spec.role_ref.namespace.as_deref().filter(|ns| !ns.is_empty())
                {
                    None => RoleRef::cluster_role(spec.role_ref.name.clone()),
                    Some(ns) if ns == namespace => {
                        RoleRef::role(namespace.clone(), spec.role_ref.name.clone())
                    }
                    Some(ns) => {
                        return Err(TranslateError::RoleNamespace {
                            role: spec.role_ref.name.clone(),
                            namespace: ns.to_string(),
                            id,
                        })
                    }
                };
                let subjects = legacy_subjects(
                    &id,
                    &spec.user_names,
                    &spec.group_names,
                    &spec.subjects,
                    Some(&namespace),
                )?;
                Ok(RoleBinding::new(namespace, b.name_unchecked(), role_ref, subjects).into())
            }

            Self::ClusterRoleBinding(b) => {
                let spec = &b.spec;
                if spec.role_ref.namespace.as_deref().is_some_and(|ns| !ns.is_empty()) {
                    return Err(TranslateError::ClusterScope { id });
                }
                let subjects = legacy_subjects(
                    &id,
                    &spec.user_names,
                    &spec.group_names,
                    &spec.subjects,
                    None,
                )?;
                Ok(ClusterRoleBinding::new(
                    b.name_unchecked(),
                    spec.role_ref.name.clone(),
                    subjects,
                )
                .into())
            }
        }
    }

    fn from_binding(binding: &Binding) -> Self {
        let (user_names, group_names, subjects) = split_subjects(binding.subjects());
        match binding {
            Binding::RoleBinding(b) => {
                let role_ref = match &b.role_ref {
                    RoleRef::Role { namespace, name } => legacy::RoleRef {
                        name: name.clone(),
                        namespace: Some(namespace.clone()),
                    },
                    RoleRef::ClusterRole { name } => legacy::RoleRef {
                        name: name.clone(),
                        namespace: None,
                    },
                };
                Self::RoleBinding(legacy::RoleBinding {
                    metadata: metadata(Some(&b.namespace), &b.name),
                    spec: legacy::RoleBindingSpec {
                        user_names,
                        group_names,
                        subjects,
                        role_ref,
                    },
                })
            }
            Binding::ClusterRoleBinding(b) => {
                Self::ClusterRoleBinding(legacy::ClusterRoleBinding {
                    metadata: metadata(None, &b.name),
                    spec: legacy::ClusterRoleBindingSpec {
                        user_names,
                        group_names,
                        subjects,
                        role_ref: legacy::RoleRef {
                            name: b.cluster_role.clone(),
                            namespace: None,
                        },
                    },
                })
            }
        }
    }
}

impl Versioned for LegacyBinding {
    fn id(&self) -> ObjectId {
        match self {
            Self::RoleBinding(b) => {
                ObjectId::role_binding(b.namespace().unwrap_or_default(), b.name_unchecked())
            }
            Self::ClusterRoleBinding(b) => ObjectId::cluster_role_binding(b.name_unchecked()),
        }
    }

    fn resource_version(&self) -> Option<&str> {
        self.meta().resource_version.as_deref()
    }

    fn set_resource_version(&mut self, version: Option<String>) {
        self.meta_mut().resource_version = version;
    }

    fn same_content(&self, other: &Self) -> bool {
        same_binding(self, other)
    }
}

// === impl NativeBinding ===

impl NativeBinding {
    fn meta(&self) -> &ObjectMeta {
        match self {
            Self::RoleBinding(b) => b.meta(),
            Self::ClusterRoleBinding(b) => b.meta(),
        }
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Self::RoleBinding(b) => b.meta_mut(),
            Self::ClusterRoleBinding(b) => b.meta_mut(),
        }
    }
}

impl MirrorObject for NativeBinding {
    fn to_binding(&self) -> Result<Binding, TranslateError> {
        let id = self.id();
        match self {
            Self::RoleBinding(b) => {
                let mut binding =
                    rbac::role_binding(b.clone()).map_err(|e| TranslateError::invalid(&id, e))?;
                binding.subjects = normalize(binding.subjects);
                Ok(binding.into())
            }
            Self::ClusterRoleBinding(b) => {
                if b.role_ref.kind != rbac::CLUSTER_ROLE_KIND {
                    return Err(TranslateError::ClusterScope { id });
                }
                let mut binding = rbac::cluster_role_binding(b.clone())
                    .map_err(|e| TranslateError::invalid(&id, e))?;
                binding.subjects = normalize(binding.subjects);
                Ok(binding.into())
            }
        }
    }

    fn from_binding(binding: &Binding) -> Self {
        let subjects = Some(binding.subjects().iter().map(rbac::to_subject).collect());
        let role_ref = rbac::to_role_ref(&binding.role_ref());
        match binding {
            Binding::RoleBinding(b) => Self::RoleBinding(k8s::RoleBinding {
                metadata: metadata(Some(&b.namespace), &b.name),
                role_ref,
                subjects,
            }),
            Binding::ClusterRoleBinding(b) => Self::ClusterRoleBinding(k8s::ClusterRoleBinding {
                metadata: metadata(None, &b.name),
                role_ref,
                subjects,
            }),
        }
    }
}

impl Versioned for NativeBinding {
    fn id(&self) -> ObjectId {
        match self {
            Self::RoleBinding(b) => {
                ObjectId::role_binding(b.namespace().unwrap_or_default(), b.name_unchecked())
            }
            Self::ClusterRoleBinding(b) => ObjectId::cluster_role_binding(b.name_unchecked()),
        }
    }

    fn resource_version(&self) -> Option<&str> {
        self.meta().resource_version.as_deref()
    }

    fn set_resource_version(&mut self, version: Option<String>) {
        self.meta_mut().resource_version = version;
    }

    fn same_content(&self, other: &Self) -> bool {
        same_binding(self, other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn legacy_role_binding(ns: &str, name: &str, spec: legacy::RoleBindingSpec) -> LegacyBinding {
        LegacyBinding::RoleBinding(legacy::RoleBinding {
            metadata: metadata(Some(ns), name),
            spec,
        })
    }

    #[test]
    fn legacy_subjects_are_merged() {
        let binding = legacy_role_binding(
            "hammer-project",
            "admin",
            legacy::RoleBindingSpec {
                user_names: vec![
                    "harold".to_string(),
                    "system:serviceaccount:hammer-project:deployer".to_string(),
                ],
                group_names: vec!["hammers".to_string()],
                subjects: vec![
                    legacy::SubjectRef {
                        kind: USER_KIND.to_string(),
                        name: "harold".to_string(),
                        namespace: None,
                    },
                    legacy::SubjectRef {
                        kind: SERVICE_ACCOUNT_KIND.to_string(),
                        name: "builder".to_string(),
                        namespace: None,
                    },
                ],
                role_ref: legacy::RoleRef {
                    name: "admin".to_string(),
                    namespace: None,
                },
            },
        );

        let expected = RoleBinding::new(
            "hammer-project",
            "admin",
            RoleRef::cluster_role("admin"),
            normalize(vec![
                Subject::user("harold"),
                Subject::group("hammers"),
                Subject::service_account("hammer-project", "builder"),
                Subject::service_account("hammer-project", "deployer"),
            ]),
        );
        assert_eq!(binding.to_binding().unwrap(), Binding::from(expected));
    }

    #[test]
    fn namespaced_role_refs_must_match() {
        let spec = |namespace: &str| legacy::RoleBindingSpec {
            user_names: vec!["harold".to_string()],
            role_ref: legacy::RoleRef {
                name: "builder".to_string(),
                namespace: Some(namespace.to_string()),
            },
            ..Default::default()
        };

        let local = legacy_role_binding("ns-0", "builders", spec("ns-0"));
        assert_eq!(
            local.to_binding().unwrap().role_ref(),
            RoleRef::role("ns-0", "builder")
        );

        let remote = legacy_role_binding("ns-0", "builders", spec("ns-1"));
        assert!(matches!(
            remote.to_binding(),
            Err(TranslateError::RoleNamespace { .. })
        ));

        let cluster = LegacyBinding::ClusterRoleBinding(legacy::ClusterRoleBinding {
            metadata: metadata(None, "builders"),
            spec: legacy::ClusterRoleBindingSpec {
                role_ref: legacy::RoleRef {
                    name: "builder".to_string(),
                    namespace: Some("ns-0".to_string()),
                },
                ..Default::default()
            },
        });
        assert!(matches!(
            cluster.to_binding(),
            Err(TranslateError::ClusterScope { .. })
        ));
    }

    #[test]
    fn mirrored_objects_hold_the_same_content() {
        let legacy = legacy_role_binding(
            "ns-0",
            "viewers",
            legacy::RoleBindingSpec {
                user_names: vec![
                    "system:serviceaccount:ns-0:robot".to_string(),
                    "harold".to_string(),
                ],
                group_names: vec!["hammers".to_string()],
                role_ref: legacy::RoleRef {
                    name: "view".to_string(),
                    namespace: None,
                },
                ..Default::default()
            },
        );
        let binding = legacy.to_binding().unwrap();

        let native = NativeBinding::from_binding(&binding);
        assert_eq!(native.id(), legacy.id());
        assert_eq!(native.to_binding().unwrap(), binding);

        // Translating back moves the service account into a subject reference
        // without changing what is granted.
        let back = LegacyBinding::from_binding(&native.to_binding().unwrap());
        assert_ne!(back, legacy);
        assert!(back.same_content(&legacy));

        let mut versioned = back.clone();
        versioned.set_resource_version(Some("7".to_string()));
        assert!(versioned.same_content(&back));
        assert_eq!(versioned.resource_version(), Some("7"));
    }
}
