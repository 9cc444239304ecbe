//! Default cluster roles and cluster role bindings.
//!
//! These are loaded once at start-up and are always present in a
//! [`PolicySnapshot`](crate::PolicySnapshot).

use crate::{
    binding::{ClusterRole, ClusterRoleBinding},
    rule::PolicyRule,
    subject::Subject,
};

pub const CORE_API_GROUP: &str = "";
pub const APPS_API_GROUP: &str = "apps";
pub const AUTHORIZATION_API_GROUP: &str = "authorization.k8s.io";
pub const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

pub const CLUSTER_ADMIN_ROLE: &str = "cluster-admin";
pub const ADMIN_ROLE: &str = "admin";
pub const EDIT_ROLE: &str = "edit";
pub const VIEW_ROLE: &str = "view";
pub const CLUSTER_READER_ROLE: &str = "cluster-reader";
pub const BASIC_USER_ROLE: &str = "basic-user";
pub const SELF_ACCESS_REVIEWER_ROLE: &str = "self-access-reviewer";

pub const SYSTEM_ADMIN_USER: &str = "system:admin";
pub const CLUSTER_ADMINS_GROUP: &str = "system:cluster-admins";
pub const MASTERS_GROUP: &str = "system:masters";
pub const CLUSTER_READERS_GROUP: &str = "system:cluster-readers";
pub const AUTHENTICATED_GROUP: &str = "system:authenticated";

/// Resources whose read access grants more than read access: credentials,
/// tokens, and interactive access to workloads.
pub const ESCALATING_RESOURCES: &[(&str, &str)] = &[
    (CORE_API_GROUP, "secrets"),
    (CORE_API_GROUP, "oauthaccesstokens"),
    (CORE_API_GROUP, "oauthauthorizetokens"),
    (CORE_API_GROUP, "oauthclients"),
    (CORE_API_GROUP, "imagestreams/secrets"),
    (CORE_API_GROUP, "pods/exec"),
    (CORE_API_GROUP, "pods/proxy"),
    (CORE_API_GROUP, "pods/portforward"),
    (CORE_API_GROUP, "nodes/proxy"),
    (CORE_API_GROUP, "services/proxy"),
];

const READ: [&str; 3] = ["get", "list", "watch"];
const WRITE: [&str; 5] = ["create", "update", "patch", "delete", "deletecollection"];

const NAMESPACED_CORE: &[&str] = &[
    "pods",
    "pods/log",
    "pods/status",
    "services",
    "endpoints",
    "configmaps",
    "events",
    "persistentvolumeclaims",
    "replicationcontrollers",
    "serviceaccounts",
    "limitranges",
    "resourcequotas",
    "deploymentconfigs",
    "buildconfigs",
    "builds",
    "builds/log",
    "imagestreams",
    "imagestreamtags",
    "routes",
    "templates",
];

const NAMESPACED_APPS: &[&str] = &["deployments", "replicasets", "statefulsets", "daemonsets"];

/// Escalating resources project editors may still use.
const EDITOR_ESCALATING: &[&str] = &[
    "secrets",
    "imagestreams/secrets",
    "pods/exec",
    "pods/proxy",
    "pods/portforward",
    "services/proxy",
];

const CLUSTER_CORE: &[&str] = &[
    "nodes",
    "nodes/status",
    "namespaces",
    "persistentvolumes",
    "projects",
    "users",
    "groups",
];

#[derive(Clone, Debug, Default)]
pub struct BootstrapPolicy {
    pub cluster_roles: Vec<ClusterRole>,
    pub cluster_role_bindings: Vec<ClusterRoleBinding>,
}

// === impl BootstrapPolicy ===

impl BootstrapPolicy {
    /// The standard cluster roles and the bindings that grant them to the
    /// system users and groups.
    pub fn standard() -> Self {
        Self {
            cluster_roles: vec![
                cluster_admin(),
                admin(),
                edit(),
                view(),
                cluster_reader(),
                basic_user(),
                self_access_reviewer(),
            ],
            cluster_role_bindings: vec![
                ClusterRoleBinding::new(
                    "cluster-admins",
                    CLUSTER_ADMIN_ROLE,
                    [
                        Subject::user(SYSTEM_ADMIN_USER),
                        Subject::group(CLUSTER_ADMINS_GROUP),
                        Subject::group(MASTERS_GROUP),
                    ],
                ),
                ClusterRoleBinding::new(
                    "cluster-readers",
                    CLUSTER_READER_ROLE,
                    [Subject::group(CLUSTER_READERS_GROUP)],
                ),
                ClusterRoleBinding::new(
                    "basic-users",
                    BASIC_USER_ROLE,
                    [Subject::group(AUTHENTICATED_GROUP)],
                ),
                ClusterRoleBinding::new(
                    "self-access-reviewers",
                    SELF_ACCESS_REVIEWER_ROLE,
                    [Subject::group(AUTHENTICATED_GROUP)],
                ),
            ],
        }
    }

    pub fn cluster_role(&self, name: &str) -> Option<&ClusterRole> {
        self.cluster_roles.iter().find(|r| r.name == name)
    }

    pub fn cluster_role_binding(&self, name: &str) -> Option<&ClusterRoleBinding> {
        self.cluster_role_bindings.iter().find(|b| b.name == name)
    }
}

pub fn is_escalating(api_group: &str, resource: &str) -> bool {
    ESCALATING_RESOURCES
        .iter()
        .any(|(g, r)| *g == api_group && *r == resource)
}

fn cluster_admin() -> ClusterRole {
    ClusterRole::new(
        CLUSTER_ADMIN_ROLE,
        [
            PolicyRule::verbs(["*"]).groups(["*"]).resources(["*"]),
            PolicyRule::verbs(["*"]).urls(["*"]),
        ],
    )
}

fn view_rules() -> Vec<PolicyRule> {
    vec![
        PolicyRule::verbs(READ)
            .groups([CORE_API_GROUP])
            .resources(NAMESPACED_CORE.iter().copied()),
        PolicyRule::verbs(READ)
            .groups([APPS_API_GROUP])
            .resources(NAMESPACED_APPS.iter().copied()),
        PolicyRule::verbs(["get"])
            .groups([CORE_API_GROUP])
            .resources(["projects", "namespaces"]),
    ]
}

fn edit_rules() -> Vec<PolicyRule> {
    let mut rules = view_rules();
    rules.extend([
        PolicyRule::verbs(WRITE)
            .groups([CORE_API_GROUP])
            .resources(NAMESPACED_CORE.iter().copied()),
        PolicyRule::verbs(WRITE)
            .groups([APPS_API_GROUP])
            .resources(NAMESPACED_APPS.iter().copied()),
        PolicyRule::verbs(READ.into_iter().chain(WRITE))
            .groups([CORE_API_GROUP])
            .resources(EDITOR_ESCALATING.iter().copied()),
    ]);
    rules
}

fn admin() -> ClusterRole {
    let mut rules = edit_rules();
    rules.extend([
        PolicyRule::verbs(READ.into_iter().chain(WRITE))
            .groups([RBAC_API_GROUP])
            .resources(["roles", "rolebindings"]),
        PolicyRule::verbs(["create"])
            .groups([AUTHORIZATION_API_GROUP])
            .resources(["localresourceaccessreviews", "localsubjectaccessreviews"]),
        PolicyRule::verbs(["update", "patch", "delete"])
            .groups([CORE_API_GROUP])
            .resources(["projects"]),
    ]);
    ClusterRole::new(ADMIN_ROLE, rules)
}

fn edit() -> ClusterRole {
    ClusterRole::new(EDIT_ROLE, edit_rules())
}

fn view() -> ClusterRole {
    ClusterRole::new(VIEW_ROLE, view_rules())
}

fn cluster_reader() -> ClusterRole {
    let mut rules = view_rules();
    rules.extend([
        PolicyRule::verbs(READ)
            .groups([CORE_API_GROUP])
            .resources(CLUSTER_CORE.iter().copied()),
        PolicyRule::verbs(READ)
            .groups([RBAC_API_GROUP])
            .resources(["roles", "rolebindings", "clusterroles", "clusterrolebindings"]),
        PolicyRule::verbs(["get"]).urls(["*"]),
    ]);
    ClusterRole::new(CLUSTER_READER_ROLE, rules)
}

fn basic_user() -> ClusterRole {
    ClusterRole::new(
        BASIC_USER_ROLE,
        [
            PolicyRule::verbs(["get"])
                .groups([CORE_API_GROUP])
                .resources(["users"])
                .names(["~"]),
            PolicyRule::verbs(["list", "watch"])
                .groups([CORE_API_GROUP])
                .resources(["projects"]),
            PolicyRule::verbs(["list"])
                .groups([RBAC_API_GROUP])
                .resources(["clusterroles"]),
        ],
    )
}

fn self_access_reviewer() -> ClusterRole {
    ClusterRole::new(
        SELF_ACCESS_REVIEWER_ROLE,
        [PolicyRule::verbs(["create"])
            .groups([AUTHORIZATION_API_GROUP])
            .resources(["selfsubjectaccessreviews", "selfsubjectrulesreviews"])],
    )
}
