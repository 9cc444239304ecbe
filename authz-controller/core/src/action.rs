use std::fmt;

/// A request to perform `verb` against a target, optionally within a
/// namespace.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Action {
    pub verb: String,
    pub namespace: Option<String>,
    pub target: Target,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Target {
    Resource {
        api_group: String,
        /// The resource type. Subresources are expressed literally, e.g.
        /// `pods/exec`.
        resource: String,
        name: Option<String>,
    },
    NonResource {
        path: String,
    },
}

// === impl Action ===

impl Action {
    /// Builds a cluster-scoped resource action.
    pub fn resource(
        verb: impl Into<String>,
        api_group: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            verb: verb.into(),
            namespace: None,
            target: Target::Resource {
                api_group: api_group.into(),
                resource: resource.into(),
                name: None,
            },
        }
    }

    pub fn non_resource(verb: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            namespace: None,
            target: Target::NonResource { path: path.into() },
        }
    }

    /// Scopes the action to a namespace. An empty namespace leaves the action
    /// cluster-scoped.
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        self.namespace = if namespace.is_empty() {
            None
        } else {
            Some(namespace)
        };
        self
    }

    /// Names the targeted resource. Has no effect on non-resource actions.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        if let Target::Resource { name: n, .. } = &mut self.target {
            *n = Some(name.into());
        }
        self
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn is_cluster_scoped(&self) -> bool {
        self.namespace.is_none()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Target::Resource {
                api_group,
                resource,
                name,
            } => {
                write!(f, "{} {}", self.verb, resource)?;
                if !api_group.is_empty() {
                    write!(f, ".{api_group}")?;
                }
                if let Some(name) = name {
                    write!(f, " {name:?}")?;
                }
            }
            Target::NonResource { path } => write!(f, "{} {}", self.verb, path)?,
        }
        match &self.namespace {
            Some(ns) => write!(f, " in namespace {ns:?}"),
            None => Ok(()),
        }
    }
}
