use crate::error::EvaluationError;
use std::collections::BTreeSet;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: String,
    pub evaluation_errors: Vec<EvaluationError>,
}

/// The subjects that may perform an action.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceAccess {
    pub users: BTreeSet<String>,
    pub groups: BTreeSet<String>,
    pub evaluation_errors: Vec<EvaluationError>,
}

impl ResourceAccess {
    /// Returns true if the user's name or any of its groups is included.
    pub fn includes(&self, user: &str, groups: &[String]) -> bool {
        self.users.contains(user) || groups.iter().any(|g| self.groups.contains(g))
    }
}
