use std::fmt;

pub const SERVICE_ACCOUNT_USER_PREFIX: &str = "system:serviceaccount:";

/// An identity a binding grants its role to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Subject {
    User(String),
    Group(String),
    ServiceAccount { namespace: String, name: String },
}

/// The identity making, or being asked about, a request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserInfo {
    pub name: String,
    pub groups: Vec<String>,
    /// Restricted scopes the identity presents. Empty means unrestricted.
    pub scopes: Vec<String>,
}

// === impl Subject ===

impl Subject {
    pub fn user(name: impl Into<String>) -> Self {
        Self::User(name.into())
    }

    pub fn group(name: impl Into<String>) -> Self {
        Self::Group(name.into())
    }

    pub fn service_account(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::ServiceAccount {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Interprets a user name, recognizing service account user names.
    pub fn from_user_name(user: &str) -> Self {
        if let Some((namespace, name)) = parse_service_account_user(user) {
            return Self::service_account(namespace, name);
        }
        Self::user(user)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::User(_) => "User",
            Self::Group(_) => "Group",
            Self::ServiceAccount { .. } => "ServiceAccount",
        }
    }

    /// Returns true if a request made by `user` is covered by this subject.
    pub fn applies_to(&self, user: &UserInfo) -> bool {
        match self {
            Self::User(name) => *name == user.name,
            Self::Group(group) => user.groups.iter().any(|g| g == group),
            Self::ServiceAccount { namespace, name } => {
                parse_service_account_user(&user.name)
                    == Some((namespace.as_str(), name.as_str()))
            }
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(name) | Self::Group(name) => write!(f, "{} {:?}", self.kind(), name),
            Self::ServiceAccount { namespace, name } => {
                write!(f, "{} \"{}/{}\"", self.kind(), name, namespace)
            }
        }
    }
}

/// The user name a service account authenticates as.
pub fn service_account_user(namespace: &str, name: &str) -> String {
    format!("{SERVICE_ACCOUNT_USER_PREFIX}{namespace}:{name}")
}

/// Splits `system:serviceaccount:<namespace>:<name>` into its parts.
pub fn parse_service_account_user(user: &str) -> Option<(&str, &str)> {
    let rest = user.strip_prefix(SERVICE_ACCOUNT_USER_PREFIX)?;
    let (namespace, name) = rest.split_once(':')?;
    if namespace.is_empty() || name.is_empty() || name.contains(':') {
        return None;
    }
    Some((namespace, name))
}

// === impl UserInfo ===

impl UserInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.extend(groups.into_iter().map(Into::into));
        self
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
