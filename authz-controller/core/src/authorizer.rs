use crate::{
    action::Action,
    binding::{AnyRole, Binding, RoleRef},
    decision::{AccessDecision, ResourceAccess},
    error::{Error, EvaluationError, Result},
    lister::BindingLister,
    restriction::AccessRestriction,
    rule::PolicyRule,
    scope::Scopes,
    subject::{service_account_user, Subject, UserInfo},
};
use std::collections::BTreeSet;

pub const MECHANISM: &str = "RBAC";
pub const NO_POLICY_MATCHED: &str = "no RBAC policy matched";

/// Evaluates actions against the bindings of one lister.
///
/// Callers that need consistent answers pass a single snapshot for the
/// duration of an evaluation. Access restrictions are consulted before any
/// binding.
#[derive(Clone, Debug)]
pub struct Authorizer<L> {
    lister: L,
    restrictions: Vec<AccessRestriction>,
}

// === impl Authorizer ===

impl<L: BindingLister> Authorizer<L> {
    pub fn new(lister: L) -> Self {
        Self {
            lister,
            restrictions: Vec::new(),
        }
    }

    pub(crate) fn lister(&self) -> &L {
        &self.lister
    }

    pub fn with_restrictions<I>(mut self, restrictions: I) -> Self
    where
        I: IntoIterator<Item = AccessRestriction>,
    {
        self.restrictions.extend(restrictions);
        self
    }

    /// Decides whether `user` may perform `action`.
    ///
    /// Every applicable binding is visited, so evaluation errors are reported
    /// even when an earlier binding already allowed the action. The first
    /// allowing binding determines the reason.
    #[tracing::instrument(skip_all, fields(user = %user.name, %action))]
    pub fn evaluate_subject_access(&self, action: &Action, user: &UserInfo) -> Result<AccessDecision> {
        if let Some(restriction) = self.restrictions.iter().find(|r| r.denies(action, user)) {
            tracing::debug!(restriction = %restriction.name, "Denied by access restriction");
            return Ok(AccessDecision {
                allowed: false,
                reason: restriction.denied_reason(),
                evaluation_errors: Vec::new(),
            });
        }

        let mut allowed_by = None;
        let evaluation_errors = self.visit(action.namespace(), |binding, role_ref, role| {
            if allowed_by.is_some() {
                return;
            }
            let Some(subject) = binding.subjects().iter().find(|s| s.applies_to(user)) else {
                return;
            };
            if role.rules().iter().any(|r| r.matches(action)) {
                allowed_by = Some(allowed_reason(binding, role_ref, subject));
            }
        })?;

        let mut decision = AccessDecision {
            allowed: allowed_by.is_some(),
            reason: allowed_by.unwrap_or_else(|| NO_POLICY_MATCHED.to_string()),
            evaluation_errors,
        };

        if !user.scopes.is_empty() {
            let scopes = Scopes::parse(&user.scopes);
            match scopes.rules(action.namespace(), &self.lister) {
                Ok(rules) if rules.iter().any(|r| r.matches(action)) => {}
                Ok(_) => {
                    decision.allowed = false;
                    decision.reason = scopes.prevented_message();
                }
                Err(Error::Forbidden { message }) => {
                    decision.allowed = false;
                    decision.reason = message;
                }
                Err(error) => return Err(error),
            }
        }

        tracing::debug!(
            allowed = decision.allowed,
            reason = %decision.reason,
            errors = decision.evaluation_errors.len(),
            "Evaluated"
        );
        Ok(decision)
    }

    /// Collects every subject that may perform `action`.
    #[tracing::instrument(skip_all, fields(%action))]
    pub fn evaluate_resource_access(&self, action: &Action) -> Result<ResourceAccess> {
        let mut users = BTreeSet::new();
        let mut groups = BTreeSet::new();
        let evaluation_errors = self.visit(action.namespace(), |binding, _, role| {
            if !role.rules().iter().any(|r| r.matches(action)) {
                return;
            }
            for subject in binding.subjects() {
                match subject {
                    Subject::User(name) => {
                        users.insert(name.clone());
                    }
                    Subject::Group(name) => {
                        groups.insert(name.clone());
                    }
                    Subject::ServiceAccount { namespace, name } => {
                        users.insert(service_account_user(namespace, name));
                    }
                }
            }
        })?;
        Ok(ResourceAccess {
            users,
            groups,
            evaluation_errors,
        })
    }

    /// Collects the rules granted to `user` in `namespace` by its RBAC
    /// bindings, ignoring scopes.
    pub fn rules_for(
        &self,
        user: &UserInfo,
        namespace: Option<&str>,
    ) -> Result<(Vec<PolicyRule>, Vec<EvaluationError>)> {
        let mut rules = Vec::<PolicyRule>::new();
        let evaluation_errors = self.visit(namespace, |binding, _, role| {
            if !binding.subjects().iter().any(|s| s.applies_to(user)) {
                return;
            }
            for rule in role.rules() {
                if !rules.contains(rule) {
                    rules.push(rule.clone());
                }
            }
        })?;
        Ok((rules, evaluation_errors))
    }

    /// Invokes `f` for each binding that applies in `namespace` and whose
    /// role resolves. Returns an error for each binding that does not
    /// resolve.
    fn visit<F>(&self, namespace: Option<&str>, mut f: F) -> Result<Vec<EvaluationError>>
    where
        F: FnMut(&Binding, &RoleRef, &AnyRole),
    {
        let mut errors = Vec::new();
        for binding in self.lister.list_bindings(namespace)? {
            if !binding.applies_in(namespace) {
                continue;
            }
            let role_ref = binding.role_ref();
            match self.lister.get_role(&role_ref)? {
                Some(role) => f(&binding, &role_ref, &role),
                None => {
                    tracing::debug!(%binding, role = %role_ref, "Binding references a missing role");
                    errors.push(EvaluationError::missing_role(&binding, role_ref));
                }
            }
        }
        Ok(errors)
    }
}

fn allowed_reason(binding: &Binding, role_ref: &RoleRef, subject: &Subject) -> String {
    format!("{MECHANISM}: allowed by {binding} of {role_ref} to {subject}")
}
