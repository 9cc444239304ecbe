//! Conversions from the native RBAC resources to policy types.

use anyhow::{anyhow, bail, Result};
use authz_controller_core::{
    ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject,
};
use authz_controller_k8s_api::{self as k8s, rbac, ResourceExt};

pub const ROLE_KIND: &str = "Role";
pub const CLUSTER_ROLE_KIND: &str = "ClusterRole";
pub const USER_KIND: &str = "User";
pub const GROUP_KIND: &str = "Group";
pub const SERVICE_ACCOUNT_KIND: &str = "ServiceAccount";

pub fn role(role: k8s::Role) -> Result<Role> {
    let namespace = role
        .namespace()
        .ok_or_else(|| anyhow!("role must have a namespace"))?;
    Ok(Role {
        namespace,
        name: role.name_unchecked(),
        rules: role.rules.into_iter().flatten().map(rule).collect(),
    })
}

pub fn cluster_role(role: k8s::ClusterRole) -> ClusterRole {
    ClusterRole {
        name: role.name_unchecked(),
        rules: role.rules.into_iter().flatten().map(rule).collect(),
    }
}

pub fn rule(rule: rbac::PolicyRule) -> PolicyRule {
    PolicyRule {
        verbs: rule.verbs.into_iter().collect(),
        api_groups: rule.api_groups.into_iter().flatten().collect(),
        resources: rule.resources.into_iter().flatten().collect(),
        resource_names: rule.resource_names.into_iter().flatten().collect(),
        non_resource_urls: rule.non_resource_urls.into_iter().flatten().collect(),
    }
}

pub fn role_binding(binding: k8s::RoleBinding) -> Result<RoleBinding> {
    let namespace = binding
        .namespace()
        .ok_or_else(|| anyhow!("role binding must have a namespace"))?;
    let role_ref = match binding.role_ref.kind.as_str() {
        ROLE_KIND => RoleRef::role(namespace.clone(), binding.role_ref.name.clone()),
        CLUSTER_ROLE_KIND => RoleRef::cluster_role(binding.role_ref.name.clone()),
        kind => bail!("unsupported role kind {kind}"),
    };
    let subjects = subjects(binding.subjects.unwrap_or_default(), Some(&namespace))?;
    Ok(RoleBinding {
        name: binding.metadata.name.unwrap_or_default(),
        namespace,
        role_ref,
        subjects,
    })
}

pub fn cluster_role_binding(binding: k8s::ClusterRoleBinding) -> Result<ClusterRoleBinding> {
    if binding.role_ref.kind != CLUSTER_ROLE_KIND {
        bail!(
            "cluster role bindings may only reference cluster roles, not {}",
            binding.role_ref.kind
        );
    }
    Ok(ClusterRoleBinding {
        subjects: subjects(binding.subjects.unwrap_or_default(), None)?,
        name: binding.metadata.name.unwrap_or_default(),
        cluster_role: binding.role_ref.name,
    })
}

/// Converts subjects. Service accounts without a namespace default to
/// `namespace`, when one is given.
pub fn subjects(subjects: Vec<rbac::Subject>, namespace: Option<&str>) -> Result<Vec<Subject>> {
    subjects
        .into_iter()
        .map(|s| match s.kind.as_str() {
            USER_KIND => Ok(Subject::User(s.name)),
            GROUP_KIND => Ok(Subject::Group(s.name)),
            SERVICE_ACCOUNT_KIND => {
                let ns = s
                    .namespace
                    .filter(|ns| !ns.is_empty())
                    .or_else(|| namespace.map(Into::into))
                    .ok_or_else(|| anyhow!("service account {} must have a namespace", s.name))?;
                Ok(Subject::service_account(ns, s.name))
            }
            kind => Err(anyhow!("unsupported subject kind {kind}")),
        })
        .collect()
}

pub fn to_subject(subject: &Subject) -> rbac::Subject {
    match subject {
        Subject::User(name) => rbac::Subject {
            api_group: Some(rbac_api_group()),
            kind: USER_KIND.to_string(),
            name: name.clone(),
            namespace: None,
        },
        Subject::Group(name) => rbac::Subject {
            api_group: Some(rbac_api_group()),
            kind: GROUP_KIND.to_string(),
            name: name.clone(),
            namespace: None,
        },
        Subject::ServiceAccount { namespace, name } => rbac::Subject {
            api_group: None,
            kind: SERVICE_ACCOUNT_KIND.to_string(),
            name: name.clone(),
            namespace: Some(namespace.clone()),
        },
    }
}

pub fn to_role_ref(role_ref: &RoleRef) -> rbac::RoleRef {
    rbac::RoleRef {
        api_group: rbac_api_group(),
        kind: role_ref.kind().to_string(),
        name: role_ref.name().to_string(),
    }
}

fn rbac_api_group() -> String {
    authz_controller_core::bootstrap::RBAC_API_GROUP.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s::ObjectMeta;
    use pretty_assertions::assert_eq;

    fn subject(kind: &str, name: &str, namespace: Option<&str>) -> rbac::Subject {
        rbac::Subject {
            api_group: None,
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: namespace.map(Into::into),
        }
    }

    #[test]
    fn role_binding_defaults_service_account_namespace() {
        let binding = k8s::RoleBinding {
            metadata: ObjectMeta {
                namespace: Some("ns-0".to_string()),
                name: Some("builders".to_string()),
                ..Default::default()
            },
            role_ref: rbac::RoleRef {
                api_group: rbac_api_group(),
                kind: ROLE_KIND.to_string(),
                name: "builder".to_string(),
            },
            subjects: Some(vec![
                subject(SERVICE_ACCOUNT_KIND, "builder", None),
                subject(GROUP_KIND, "builders", None),
            ]),
        };
        assert_eq!(
            role_binding(binding).unwrap(),
            RoleBinding::new(
                "ns-0",
                "builders",
                RoleRef::role("ns-0", "builder"),
                [
                    Subject::service_account("ns-0", "builder"),
                    Subject::group("builders")
                ],
            )
        );
    }

    #[test]
    fn cluster_role_binding_rejects_roles() {
        let binding = k8s::ClusterRoleBinding {
            metadata: ObjectMeta {
                name: Some("bad".to_string()),
                ..Default::default()
            },
            role_ref: rbac::RoleRef {
                api_group: rbac_api_group(),
                kind: ROLE_KIND.to_string(),
                name: "builder".to_string(),
            },
            subjects: None,
        };
        assert!(cluster_role_binding(binding).is_err());
    }

    #[test]
    fn cluster_service_accounts_need_namespaces() {
        assert!(subjects(vec![subject(SERVICE_ACCOUNT_KIND, "builder", None)], None).is_err());
        assert!(subjects(vec![subject("Robot", "r2", None)], Some("ns-0")).is_err());
    }
}
