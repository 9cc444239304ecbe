#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod legacy;

pub use k8s_openapi::api::{
    self,
    core::v1::Namespace,
    rbac::v1::{self as rbac, ClusterRole, ClusterRoleBinding, Role, RoleBinding},
};
pub use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
pub use kube::{
    api::{Api, DeleteParams, ObjectMeta, Patch, PatchParams, PostParams, Resource, ResourceExt},
    Client, Error,
};

/// Returns the HTTP status code of an API error response, if any.
pub fn error_code(error: &Error) -> Option<u16> {
    match error {
        Error::Api(response) => Some(response.code),
        _ => None,
    }
}
