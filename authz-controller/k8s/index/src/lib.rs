//! Authorization Policy Index
//!
//! Native RBAC resources are watched and applied to a [`policy::Index`], which
//! converts them to policy types and publishes a fresh [`PolicySnapshot`]
//! after every effective change. Each change is then announced on a channel
//! consumed by the [`AccessIndex`], which keeps, per namespace, the set of
//! users and groups that may view the namespace's project.
//!
//! ```text
//! [ Role ] [ RoleBinding ] [ ClusterRole ] [ ClusterRoleBinding ] [ Namespace ]
//!                               |
//!                               v
//!                        [ policy::Index ] --snapshot--> [ Handle ]
//!                               |                            ^
//!                             Change                         |
//!                               v                            |
//!                        [ AccessIndex ] --------------------+
//! ```
//!
//! [`PolicySnapshot`]: authz_controller_core::PolicySnapshot

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod access;
mod handle;
pub mod metrics;
pub mod policy;
pub mod rbac;

#[cfg(test)]
mod tests;

pub use self::{
    access::{AccessEntry, AccessIndex},
    handle::Handle,
    metrics::{AccessMetrics, IndexMetrics, SizedIndex},
    policy::{Index, SharedIndex, SnapshotRx},
};
