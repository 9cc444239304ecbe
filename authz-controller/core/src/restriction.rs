//! Deny rules consulted before RBAC.
//!
//! An access restriction names the actions it guards. A guarded action is
//! denied unless the user is one of the allowed subjects. A restriction
//! without allowed subjects instead denies only its denied subjects.

use crate::{
    action::Action,
    rule::PolicyRule,
    subject::{parse_service_account_user, UserInfo},
};
use std::collections::BTreeSet;

pub const DENIED_BY_RESTRICTION: &str = "denied by access restriction";

const SERVICE_ACCOUNTS_GROUP: &str = "system:serviceaccounts";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccessRestriction {
    pub name: String,
    pub match_attributes: Vec<PolicyRule>,
    pub allowed_subjects: Vec<SubjectMatcher>,
    /// Only consulted when `allowed_subjects` is empty.
    pub denied_subjects: Vec<SubjectMatcher>,
}

/// Matches users by name or by group membership.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubjectMatcher {
    pub users: BTreeSet<String>,
    pub groups: BTreeSet<String>,
}

// === impl AccessRestriction ===

impl AccessRestriction {
    pub fn new<I>(name: impl Into<String>, match_attributes: I) -> Self
    where
        I: IntoIterator<Item = PolicyRule>,
    {
        Self {
            name: name.into(),
            match_attributes: match_attributes.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn allow(mut self, subjects: SubjectMatcher) -> Self {
        self.allowed_subjects.push(subjects);
        self
    }

    pub fn deny(mut self, subjects: SubjectMatcher) -> Self {
        self.denied_subjects.push(subjects);
        self
    }

    pub fn denies(&self, action: &Action, user: &UserInfo) -> bool {
        if !self.match_attributes.iter().any(|r| r.matches(action)) {
            return false;
        }
        if !self.allowed_subjects.is_empty() {
            return !self.allowed_subjects.iter().any(|s| s.matches(user));
        }
        self.denied_subjects.iter().any(|s| s.matches(user))
    }

    pub(crate) fn denied_reason(&self) -> String {
        format!("{DENIED_BY_RESTRICTION} {:?}", self.name)
    }
}

// === impl SubjectMatcher ===

impl SubjectMatcher {
    pub fn users<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            users: users.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn groups<I, S>(groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            groups: groups.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn and_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.extend(groups.into_iter().map(Into::into));
        self
    }

    /// Service accounts are implicitly members of the service account groups.
    pub fn matches(&self, user: &UserInfo) -> bool {
        if self.users.contains(&user.name) || user.groups.iter().any(|g| self.groups.contains(g)) {
            return true;
        }
        match parse_service_account_user(&user.name) {
            Some((namespace, _)) => {
                self.groups.contains(SERVICE_ACCOUNTS_GROUP)
                    || self
                        .groups
                        .contains(&format!("{SERVICE_ACCOUNTS_GROUP}:{namespace}"))
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subject::service_account_user;
    use rstest::rstest;

    const AUTHENTICATED: &str = "system:authenticated";

    fn get_pods() -> PolicyRule {
        PolicyRule::verbs(["get"]).groups([""]).resources(["pods"])
    }

    fn pods_for_admins() -> AccessRestriction {
        AccessRestriction::new("pods", [get_pods()])
            .allow(SubjectMatcher::groups(["admins", SERVICE_ACCOUNTS_GROUP]))
            .deny(SubjectMatcher::groups([AUTHENTICATED]))
    }

    fn identities_for_sa3() -> AccessRestriction {
        AccessRestriction::new(
            "identities",
            [PolicyRule::verbs(["update"])
                .groups(["user.openshift.io"])
                .resources(["identities"])],
        )
        .allow(
            SubjectMatcher::users([service_account_user("ns3", "sa3")])
                .and_groups(["system:serviceaccounts:ns4"]),
        )
        .deny(SubjectMatcher::groups([AUTHENTICATED, SERVICE_ACCOUNTS_GROUP]))
    }

    fn update_identities() -> Action {
        Action::resource("update", "user.openshift.io", "identities")
            .in_namespace("non-empty")
            .named("github:bob")
    }

    #[rstest]
    #[case::not_allowed(UserInfo::new("bob").with_groups([AUTHENTICATED]), true)]
    #[case::allowed_group(UserInfo::new("bob").with_groups(["admins"]), false)]
    #[case::service_account(UserInfo::new(service_account_user("ns1", "sa1")), false)]
    fn allowed_subjects(#[case] user: UserInfo, #[case] denied: bool) {
        let action = Action::resource("get", "", "pods").in_namespace("non-empty");
        assert_eq!(pods_for_admins().denies(&action, &user), denied);
    }

    #[test]
    fn unmatched_actions_are_not_restricted() {
        let action = Action::resource("get", "", "secrets").in_namespace("non-empty");
        let user = UserInfo::new("bob").with_groups([AUTHENTICATED]);
        assert!(!pods_for_admins().denies(&action, &user));
    }

    #[rstest]
    #[case::named(service_account_user("ns3", "sa3"), false)]
    #[case::same_namespace_other_name(service_account_user("ns3", "sa3.1"), true)]
    #[case::namespace_group(service_account_user("ns4", "sa4"), false)]
    #[case::all_service_accounts(service_account_user("ns5", "sa5"), true)]
    fn service_accounts(#[case] name: String, #[case] denied: bool) {
        let user = UserInfo::new(name);
        assert_eq!(
            identities_for_sa3().denies(&update_identities(), &user),
            denied
        );
    }

    #[rstest]
    #[case::user(UserInfo::new("gopher"), true)]
    #[case::group(UserInfo::new("guido").with_groups(["pythons"]), true)]
    #[case::other(UserInfo::new("ferris").with_groups([AUTHENTICATED]), false)]
    fn denied_subjects_without_allowed_subjects(#[case] user: UserInfo, #[case] denied: bool) {
        let restriction = AccessRestriction::new(
            "serviceaccounts",
            [PolicyRule::verbs(["delete"])
                .groups([""])
                .resources(["serviceaccounts"])],
        )
        .deny(SubjectMatcher::users(["gopher"]).and_groups(["pythons"]));
        let action = Action::resource("delete", "", "serviceaccounts").in_namespace("ns");
        assert_eq!(restriction.denies(&action, &user), denied);
    }
}
