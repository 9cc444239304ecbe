//! Restricted scopes an identity may present.
//!
//! A scoped identity can only do what both its RBAC bindings and its scopes
//! allow. Scopes also restrict which namespaces the identity may list.

use crate::{
    binding::RoleRef,
    bootstrap::{is_escalating, AUTHORIZATION_API_GROUP, CORE_API_GROUP},
    error::{Error, Result},
    lister::BindingLister,
    rule::{PolicyRule, WILDCARD},
};
use std::{collections::BTreeSet, str::FromStr};

pub const USER_FULL: &str = "user:full";
pub const USER_INFO: &str = "user:info";
pub const USER_CHECK_ACCESS: &str = "user:check-access";
pub const USER_LIST_PROJECTS: &str = "user:list-projects";

const ROLE_PREFIX: &str = "role:";
const ALL_NAMESPACES: &str = "*";
const ESCALATING_SUFFIX: &str = "!";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Scope {
    UserFull,
    UserInfo,
    UserCheckAccess,
    UserListProjects,
    /// Grants a cluster role's rules in one namespace, or in all namespaces
    /// when `namespace` is `None`.
    ClusterRole {
        role: String,
        namespace: Option<String>,
        escalating: bool,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ScopeError {
    #[error("no scope evaluator found for {0:?}")]
    Unknown(String),

    #[error("bad format for scope {0:?}")]
    Malformed(String),
}

/// A parsed list of scopes. Unparseable scopes are retained as errors.
#[derive(Clone, Debug, Default)]
pub struct Scopes {
    raw: Vec<String>,
    valid: Vec<Scope>,
    errors: Vec<ScopeError>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NamespaceFilter {
    All,
    Only(BTreeSet<String>),
}

// === impl Scope ===

impl FromStr for Scope {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            USER_FULL => return Ok(Self::UserFull),
            USER_INFO => return Ok(Self::UserInfo),
            USER_CHECK_ACCESS => return Ok(Self::UserCheckAccess),
            USER_LIST_PROJECTS => return Ok(Self::UserListProjects),
            _ => {}
        }

        let Some(rest) = s.strip_prefix(ROLE_PREFIX) else {
            return Err(ScopeError::Unknown(s.to_string()));
        };
        let malformed = || ScopeError::Malformed(s.to_string());
        let mut parts = rest.split(':');
        let role = parts.next().filter(|r| !r.is_empty()).ok_or_else(malformed)?;
        let namespace = parts.next().filter(|n| !n.is_empty()).ok_or_else(malformed)?;
        let escalating = match parts.next() {
            None => false,
            Some(ESCALATING_SUFFIX) => true,
            Some(_) => return Err(malformed()),
        };
        if parts.next().is_some() {
            return Err(malformed());
        }

        Ok(Self::ClusterRole {
            role: role.to_string(),
            namespace: (namespace != ALL_NAMESPACES).then(|| namespace.to_string()),
            escalating,
        })
    }
}

// === impl Scopes ===

impl Scopes {
    pub fn parse<S: AsRef<str>>(raw: &[S]) -> Self {
        let mut scopes = Self::default();
        for s in raw {
            let s = s.as_ref();
            scopes.raw.push(s.to_string());
            match s.parse() {
                Ok(scope) => scopes.valid.push(scope),
                Err(error) => scopes.errors.push(error),
            }
        }
        scopes
    }

    /// An identity without scopes is unrestricted.
    pub fn is_unrestricted(&self) -> bool {
        self.raw.is_empty()
    }

    /// Describes why the scopes prevent an action, including any parse
    /// errors.
    pub fn prevented_message(&self) -> String {
        let mut msg = format!("scopes [{}] prevent this action", self.raw.join(" "));
        if !self.errors.is_empty() {
            let errors = self
                .errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>();
            msg.push_str(", additionally the following non-fatal errors were reported: ");
            msg.push_str(&errors.join(", "));
        }
        msg
    }

    /// Fails when scopes were presented but none of them could be
    /// understood.
    fn ensure_valid(&self) -> Result<()> {
        if !self.raw.is_empty() && self.valid.is_empty() {
            return Err(Error::forbidden(self.prevented_message()));
        }
        Ok(())
    }

    /// Returns the namespaces these scopes may see.
    pub fn namespaces(&self) -> Result<NamespaceFilter> {
        if self.is_unrestricted() {
            return Ok(NamespaceFilter::All);
        }
        self.ensure_valid()?;

        let mut namespaces = BTreeSet::new();
        for scope in &self.valid {
            match scope {
                Scope::UserFull | Scope::UserListProjects => return Ok(NamespaceFilter::All),
                Scope::ClusterRole {
                    namespace: None, ..
                } => return Ok(NamespaceFilter::All),
                Scope::ClusterRole {
                    namespace: Some(ns),
                    ..
                } => {
                    namespaces.insert(ns.clone());
                }
                Scope::UserInfo | Scope::UserCheckAccess => {}
            }
        }
        Ok(NamespaceFilter::Only(namespaces))
    }

    /// Returns the rules these scopes grant for an action in `namespace`.
    ///
    /// Cluster roles are resolved through `lister`; scopes naming an unknown
    /// cluster role grant nothing.
    pub fn rules<L: BindingLister>(
        &self,
        namespace: Option<&str>,
        lister: &L,
    ) -> Result<Vec<PolicyRule>> {
        self.ensure_valid()?;
        self.granted_rules(namespace, lister)
    }

    /// Like [`Scopes::rules`], but scopes that could not be parsed are
    /// skipped rather than failing. With no valid scopes only discovery is
    /// granted.
    pub fn granted_rules<L: BindingLister>(
        &self,
        namespace: Option<&str>,
        lister: &L,
    ) -> Result<Vec<PolicyRule>> {
        let mut rules = vec![discovery_rule()];
        for scope in &self.valid {
            match scope {
                Scope::UserFull => {
                    rules.push(
                        PolicyRule::verbs([WILDCARD])
                            .groups([WILDCARD])
                            .resources([WILDCARD]),
                    );
                    rules.push(PolicyRule::verbs([WILDCARD]).urls([WILDCARD]));
                }
                Scope::UserInfo => rules.push(
                    PolicyRule::verbs(["get"])
                        .groups([CORE_API_GROUP])
                        .resources(["users"])
                        .names(["~"]),
                ),
                Scope::UserCheckAccess => rules.push(
                    PolicyRule::verbs(["create"])
                        .groups([AUTHORIZATION_API_GROUP])
                        .resources(["selfsubjectaccessreviews", "selfsubjectrulesreviews"]),
                ),
                Scope::UserListProjects => rules.push(
                    PolicyRule::verbs(["list", "watch"])
                        .groups([CORE_API_GROUP])
                        .resources(["projects"]),
                ),
                Scope::ClusterRole {
                    role,
                    namespace: scoped,
                    escalating,
                } => {
                    if scoped.is_some() && scoped.as_deref() != namespace {
                        continue;
                    }
                    match lister.get_role(&RoleRef::cluster_role(role.clone()))? {
                        Some(role) if *escalating => rules.extend(role.rules().iter().cloned()),
                        Some(role) => rules.extend(
                            role.rules()
                                .iter()
                                .filter(|r| !has_wildcard(r))
                                .filter_map(without_escalating),
                        ),
                        None => tracing::debug!(%role, "Scope references unknown cluster role"),
                    }
                }
            }
        }
        Ok(rules)
    }
}

// === impl NamespaceFilter ===

impl NamespaceFilter {
    pub fn allows(&self, namespace: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(namespaces) => namespaces.contains(namespace),
        }
    }
}

/// Discovery endpoints are always reachable with a scoped identity.
fn discovery_rule() -> PolicyRule {
    PolicyRule::verbs(["get"]).urls(["/api", "/api/*", "/apis", "/apis/*", "/version", "/healthz"])
}

/// Wildcard rules could reach escalating resources, so a non-escalating
/// scope never grants them.
fn has_wildcard(rule: &PolicyRule) -> bool {
    rule.verbs.contains(WILDCARD)
        || rule.api_groups.contains(WILDCARD)
        || rule.resources.contains(WILDCARD)
}

fn without_escalating(rule: &PolicyRule) -> Option<PolicyRule> {
    let mut rule = rule.clone();
    let PolicyRule {
        api_groups,
        resources,
        non_resource_urls,
        ..
    } = &mut rule;
    resources.retain(|resource| !api_groups.iter().any(|group| is_escalating(group, resource)));
    if resources.is_empty() && non_resource_urls.is_empty() {
        return None;
    }
    Some(rule)
}
