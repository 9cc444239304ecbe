use crate::{
    action::Action,
    authorizer::Authorizer,
    bootstrap::AUTHORIZATION_API_GROUP,
    decision::{AccessDecision, ResourceAccess},
    error::{Error, EvaluationError, Result},
    lister::BindingLister,
    restriction::AccessRestriction,
    rule::PolicyRule,
    scope::Scopes,
    subject::UserInfo,
};

pub const SUBJECT_ACCESS_REVIEWS: &str = "subjectaccessreviews";
pub const LOCAL_SUBJECT_ACCESS_REVIEWS: &str = "localsubjectaccessreviews";
pub const RESOURCE_ACCESS_REVIEWS: &str = "resourceaccessreviews";
pub const LOCAL_RESOURCE_ACCESS_REVIEWS: &str = "localresourceaccessreviews";
pub const SUBJECT_RULES_REVIEWS: &str = "subjectrulesreviews";

/// Asks whether a user may perform an action. When `user` is unset the
/// review is about the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubjectAccessReview {
    pub action: Action,
    pub user: Option<UserInfo>,
}

/// Asks which rules a user holds in a namespace. When `user` is unset the
/// review is about the caller. Non-empty `scopes` replace the user's own.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubjectRulesReview {
    pub namespace: String,
    pub user: Option<UserInfo>,
    pub scopes: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RulesReview {
    pub rules: Vec<PolicyRule>,
    pub evaluation_errors: Vec<EvaluationError>,
}

/// Authorizes callers before evaluating reviews on their behalf.
///
/// Denials are always [`Error::Forbidden`] and never depend on whether the
/// reviewed namespace exists.
#[derive(Clone, Debug)]
pub struct Reviewer<L> {
    authorizer: Authorizer<L>,
}

// === impl SubjectAccessReview ===

impl SubjectAccessReview {
    pub fn of_self(action: Action) -> Self {
        Self { action, user: None }
    }

    pub fn of_user(action: Action, user: UserInfo) -> Self {
        Self {
            action,
            user: Some(user),
        }
    }
}

// === impl SubjectRulesReview ===

impl SubjectRulesReview {
    pub fn of_self(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            user: None,
            scopes: Vec::new(),
        }
    }

    pub fn of_user(namespace: impl Into<String>, user: UserInfo) -> Self {
        Self {
            user: Some(user),
            ..Self::of_self(namespace)
        }
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes.extend(scopes.into_iter().map(Into::into));
        self
    }
}

// === impl Reviewer ===

impl<L: BindingLister> Reviewer<L> {
    pub fn new(lister: L) -> Self {
        Self {
            authorizer: Authorizer::new(lister),
        }
    }

    pub fn with_restrictions<I>(self, restrictions: I) -> Self
    where
        I: IntoIterator<Item = AccessRestriction>,
    {
        Self {
            authorizer: self.authorizer.with_restrictions(restrictions),
        }
    }

    pub fn subject_access(
        &self,
        caller: &UserInfo,
        review: &SubjectAccessReview,
    ) -> Result<AccessDecision> {
        let user = match &review.user {
            Some(user) if !is_self(caller, user) => {
                let resource = if review.action.is_cluster_scoped() {
                    SUBJECT_ACCESS_REVIEWS
                } else {
                    LOCAL_SUBJECT_ACCESS_REVIEWS
                };
                self.authorize_caller(caller, resource, review.action.namespace())?;
                user
            }
            _ => caller,
        };
        self.authorizer.evaluate_subject_access(&review.action, user)
    }

    pub fn resource_access(&self, caller: &UserInfo, action: &Action) -> Result<ResourceAccess> {
        let resource = if action.is_cluster_scoped() {
            RESOURCE_ACCESS_REVIEWS
        } else {
            LOCAL_RESOURCE_ACCESS_REVIEWS
        };
        self.authorize_caller(caller, resource, action.namespace())?;
        self.authorizer.evaluate_resource_access(action)
    }

    /// Lists the rules the user holds in the review's namespace, narrowed by
    /// its scopes. Unparseable scopes are ignored rather than failing the
    /// review.
    pub fn rules_review(
        &self,
        caller: &UserInfo,
        review: &SubjectRulesReview,
    ) -> Result<RulesReview> {
        let namespace = Some(review.namespace.as_str());
        let user = match &review.user {
            Some(user) if !is_self(caller, user) => {
                self.authorize_caller(caller, SUBJECT_RULES_REVIEWS, namespace)?;
                user
            }
            _ => caller,
        };

        let (rules, evaluation_errors) = self.authorizer.rules_for(user, namespace)?;
        let scopes = if review.scopes.is_empty() {
            &user.scopes
        } else {
            &review.scopes
        };
        if scopes.is_empty() {
            return Ok(RulesReview {
                rules,
                evaluation_errors,
            });
        }

        let granted = Scopes::parse(scopes).granted_rules(namespace, self.authorizer.lister())?;
        let mut scoped = Vec::<PolicyRule>::new();
        for rule in &rules {
            for narrowed in granted.iter().filter_map(|g| rule.intersect(g)) {
                if !scoped.contains(&narrowed) {
                    scoped.push(narrowed);
                }
            }
        }
        tracing::debug!(user = %user.name, rules = scoped.len(), "Reviewed rules");
        Ok(RulesReview {
            rules: scoped,
            evaluation_errors,
        })
    }

    fn authorize_caller(
        &self,
        caller: &UserInfo,
        resource: &str,
        namespace: Option<&str>,
    ) -> Result<()> {
        let mut check = Action::resource("create", AUTHORIZATION_API_GROUP, resource);
        if let Some(ns) = namespace {
            check = check.in_namespace(ns);
        }
        if self.authorizer.evaluate_subject_access(&check, caller)?.allowed {
            return Ok(());
        }

        tracing::debug!(caller = %caller.name, %check, "Caller may not review");
        Err(Error::forbidden(forbidden_message(
            &caller.name,
            "create",
            AUTHORIZATION_API_GROUP,
            resource,
            namespace,
        )))
    }
}

/// A review naming the caller without different groups is a self review.
fn is_self(caller: &UserInfo, user: &UserInfo) -> bool {
    user.name == caller.name && (user.groups.is_empty() || user.groups == caller.groups)
}

pub fn forbidden_message(
    user: &str,
    verb: &str,
    api_group: &str,
    resource: &str,
    namespace: Option<&str>,
) -> String {
    let scope = match namespace {
        Some(ns) => format!("in the namespace {ns:?}"),
        None => "at the cluster scope".to_string(),
    };
    format!(
        "{resource}.{api_group} is forbidden: User {user:?} cannot {verb} resource {resource:?} in API group {api_group:?} {scope}"
    )
}
