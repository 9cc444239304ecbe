#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod action;
pub mod authorizer;
mod binding;
pub mod bootstrap;
mod change;
mod decision;
mod error;
mod lister;
pub mod restriction;
pub mod retry;
pub mod review;
mod rule;
pub mod scope;
mod snapshot;
mod store;
mod subject;
pub mod wait;


pub use self::{
    action::{Action, Target},
    authorizer::Authorizer,
    binding::{
        AnyRole, Binding, BindingKind, ClusterRole, ClusterRoleBinding, Role, RoleBinding, RoleRef,
    },
    bootstrap::BootstrapPolicy,
    change::{Change, ChangeKind, Event},
    decision::{AccessDecision, ResourceAccess},
    error::{Error, EvaluationError, Result},
    lister::BindingLister,
    restriction::{AccessRestriction, SubjectMatcher},
    review::{Reviewer, RulesReview, SubjectAccessReview, SubjectRulesReview},
    rule::PolicyRule,
    scope::{NamespaceFilter, Scopes},
    snapshot::PolicySnapshot,
    store::{BindingStore, ObjectId, Versioned},
    subject::{parse_service_account_user, service_account_user, Subject, UserInfo},
};
