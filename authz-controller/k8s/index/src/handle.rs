use crate::{access::AccessIndex, policy::SnapshotRx};
use authz_controller_core::{
    AccessDecision, Action, ResourceAccess, Result, Reviewer, RulesReview, Scopes,
    SubjectAccessReview, SubjectRulesReview, UserInfo,
};
use std::{collections::BTreeSet, sync::Arc};

/// Answers review requests against the most recently published policy.
#[derive(Clone, Debug)]
pub struct Handle {
    snapshots: SnapshotRx,
    access: Arc<AccessIndex>,
}

// === impl Handle ===

impl Handle {
    pub fn new(snapshots: SnapshotRx, access: Arc<AccessIndex>) -> Self {
        Self { snapshots, access }
    }

    pub fn evaluate_subject_access(
        &self,
        caller: &UserInfo,
        review: &SubjectAccessReview,
    ) -> Result<AccessDecision> {
        self.reviewer().subject_access(caller, review)
    }

    pub fn evaluate_resource_access(
        &self,
        caller: &UserInfo,
        action: &Action,
    ) -> Result<ResourceAccess> {
        self.reviewer().resource_access(caller, action)
    }

    pub fn evaluate_rules(
        &self,
        caller: &UserInfo,
        review: &SubjectRulesReview,
    ) -> Result<RulesReview> {
        self.reviewer().rules_review(caller, review)
    }

    /// Lists the namespaces whose projects the user may get, restricted to
    /// the namespaces its scopes permit.
    pub fn list_visible_namespaces(&self, user: &UserInfo) -> Result<BTreeSet<String>> {
        let filter = Scopes::parse(&user.scopes).namespaces()?;
        let mut namespaces = self.access.lookup(&user.name, &user.groups);
        namespaces.retain(|ns| filter.allows(ns));
        Ok(namespaces)
    }

    fn reviewer(&self) -> Reviewer<Arc<authz_controller_core::PolicySnapshot>> {
        Reviewer::new(self.snapshots.borrow().clone())
    }
}
