//! The legacy binding representation.
//!
//! Legacy bindings list user and group names directly and reference roles by
//! name, with a namespace when the role is namespaced.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const GROUP: &str = "legacy.authorization.io";

/// Grants a role within one namespace.
#[derive(CustomResource, Default, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "legacy.authorization.io",
    version = "v1",
    kind = "RoleBinding",
    namespaced,
    derive = "PartialEq",
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct RoleBindingSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_names: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_names: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subjects: Vec<SubjectRef>,

    pub role_ref: RoleRef,
}

/// Grants a cluster role everywhere.
#[derive(CustomResource, Default, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "legacy.authorization.io",
    version = "v1",
    kind = "ClusterRoleBinding",
    derive = "PartialEq",
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRoleBindingSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_names: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_names: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subjects: Vec<SubjectRef>,

    pub role_ref: RoleRef,
}

/// References a subject by kind: `User`, `Group`, or `ServiceAccount`.
///
/// A service account without a namespace is in the binding's namespace.
#[derive(Default, Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct SubjectRef {
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// References a role. A namespace selects a namespaced role; otherwise the
/// reference is to a cluster role.
#[derive(Default, Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct RoleRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_legacy_fields() {
        let binding: RoleBinding = serde_json::from_value(serde_json::json!({
            "apiVersion": "legacy.authorization.io/v1",
            "kind": "RoleBinding",
            "metadata": { "namespace": "hammer-project", "name": "admin" },
            "spec": {
                "userNames": ["harold"],
                "groupNames": ["hammers"],
                "roleRef": { "name": "admin" },
            },
        }))
        .expect("binding must deserialize");

        assert_eq!(binding.spec.user_names, vec!["harold".to_string()]);
        assert_eq!(binding.spec.group_names, vec!["hammers".to_string()]);
        assert!(binding.spec.subjects.is_empty());
        assert_eq!(
            binding.spec.role_ref,
            RoleRef {
                name: "admin".to_string(),
                namespace: None,
            }
        );
    }
}
