use crate::binding::{Binding, RoleRef};
use std::time::Duration;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The caller may not perform the request. The message never reveals
    /// whether the targeted namespace exists.
    #[error("{message}")]
    Forbidden { message: String },

    #[error("{kind} {name:?} not found")]
    NotFound { kind: String, name: String },

    #[error("conflict writing {id}: {message}")]
    Conflict { id: String, message: String },

    #[error("store unavailable: {0}")]
    Unavailable(#[source] anyhow::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// A non-fatal problem encountered while evaluating one binding.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{binding} references missing {role}")]
pub struct EvaluationError {
    pub binding: String,
    pub role: RoleRef,
}

// === impl Error ===

impl Error {
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn conflict(id: impl ToString, message: impl Into<String>) -> Self {
        Self::Conflict {
            id: id.to_string(),
            message: message.into(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

// === impl EvaluationError ===

impl EvaluationError {
    pub fn missing_role(binding: &Binding, role: RoleRef) -> Self {
        Self {
            binding: binding.to_string(),
            role,
        }
    }
}
