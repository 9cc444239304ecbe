use crate::action::{Action, Target};
use std::collections::BTreeSet;

pub const WILDCARD: &str = "*";

/// A single grant within a role. Every field is a set of accepted values
/// where `*` accepts anything.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct PolicyRule {
    pub verbs: BTreeSet<String>,
    pub api_groups: BTreeSet<String>,
    pub resources: BTreeSet<String>,
    /// When empty, any resource name is accepted.
    pub resource_names: BTreeSet<String>,
    pub non_resource_urls: BTreeSet<String>,
}

// === impl PolicyRule ===

impl PolicyRule {
    /// Starts a rule granting the given verbs.
    pub fn verbs<I, S>(verbs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            verbs: collect(verbs),
            ..Self::default()
        }
    }

    pub fn groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.api_groups.extend(collect(groups));
        self
    }

    pub fn resources<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resources.extend(collect(resources));
        self
    }

    pub fn names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resource_names.extend(collect(names));
        self
    }

    pub fn urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.non_resource_urls.extend(collect(urls));
        self
    }

    /// Returns true if this rule grants the action.
    pub fn matches(&self, action: &Action) -> bool {
        if !has(&self.verbs, &action.verb) {
            return false;
        }

        match &action.target {
            Target::NonResource { path } => self
                .non_resource_urls
                .iter()
                .any(|url| url_matches(url, path)),
            Target::Resource {
                api_group,
                resource,
                name,
            } => {
                has(&self.api_groups, api_group)
                    && has(&self.resources, resource)
                    && (self.resource_names.is_empty()
                        || self
                            .resource_names
                            .contains(name.as_deref().unwrap_or_default()))
            }
        }
    }

    /// Returns the rule granting exactly what both rules grant, if anything.
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let verbs = intersect(&self.verbs, &other.verbs);
        if verbs.is_empty() {
            return None;
        }

        let mut rule = Self {
            verbs,
            ..Self::default()
        };

        let api_groups = intersect(&self.api_groups, &other.api_groups);
        let resources = intersect(&self.resources, &other.resources);
        let resource_names = match (
            self.resource_names.is_empty(),
            other.resource_names.is_empty(),
        ) {
            (true, _) => Some(other.resource_names.clone()),
            (_, true) => Some(self.resource_names.clone()),
            _ => Some(&self.resource_names & &other.resource_names).filter(|n| !n.is_empty()),
        };
        if let Some(resource_names) = resource_names {
            if !api_groups.is_empty() && !resources.is_empty() {
                rule.api_groups = api_groups;
                rule.resources = resources;
                rule.resource_names = resource_names;
            }
        }

        for url in &self.non_resource_urls {
            if other.non_resource_urls.iter().any(|p| url_matches(p, url)) {
                rule.non_resource_urls.insert(url.clone());
            }
        }
        for url in &other.non_resource_urls {
            if self.non_resource_urls.iter().any(|p| url_matches(p, url)) {
                rule.non_resource_urls.insert(url.clone());
            }
        }

        if rule.resources.is_empty() && rule.non_resource_urls.is_empty() {
            return None;
        }
        Some(rule)
    }
}

fn intersect(a: &BTreeSet<String>, b: &BTreeSet<String>) -> BTreeSet<String> {
    if a.contains(WILDCARD) {
        return b.clone();
    }
    if b.contains(WILDCARD) {
        return a.clone();
    }
    a & b
}

fn has(set: &BTreeSet<String>, value: &str) -> bool {
    set.contains(WILDCARD) || set.contains(value)
}

fn url_matches(pattern: &str, path: &str) -> bool {
    if pattern == WILDCARD || pattern == path {
        return true;
    }
    match pattern.strip_suffix('*') {
        Some(prefix) => path.starts_with(prefix),
        None => false,
    }
}

fn collect<I, S>(values: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    values.into_iter().map(Into::into).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn pods() -> PolicyRule {
        PolicyRule::verbs(["get", "list"])
            .groups([""])
            .resources(["pods"])
    }

    #[rstest]
    #[case::exact(Action::resource("get", "", "pods"), true)]
    #[case::other_verb(Action::resource("delete", "", "pods"), false)]
    #[case::other_group(Action::resource("get", "apps", "pods"), false)]
    #[case::subresource(Action::resource("get", "", "pods/exec"), false)]
    #[case::named(Action::resource("get", "", "pods").named("web-0"), true)]
    #[case::non_resource(Action::non_resource("get", "/healthz"), false)]
    fn resource_rules(#[case] action: Action, #[case] expected: bool) {
        assert_eq!(pods().matches(&action), expected, "{action}");
    }

    #[test]
    fn wildcards_subsume() {
        let rule = PolicyRule::verbs(["*"]).groups(["*"]).resources(["*"]);
        for action in [
            Action::resource("get", "", "pods"),
            Action::resource("escalate", "rbac.authorization.k8s.io", "roles").in_namespace("ns"),
            Action::resource("create", "", "pods/exec").named("web-0"),
        ] {
            assert!(rule.matches(&action), "{action}");
        }
        assert!(!rule.matches(&Action::non_resource("get", "/version")));
    }

    #[test]
    fn resource_names_restrict() {
        let rule = PolicyRule::verbs(["get"])
            .groups([""])
            .resources(["users"])
            .names(["~"]);
        assert!(rule.matches(&Action::resource("get", "", "users").named("~")));
        assert!(!rule.matches(&Action::resource("get", "", "users").named("harold")));
        assert!(!rule.matches(&Action::resource("get", "", "users")));
    }

    #[rstest]
    #[case("*", "/anything", true)]
    #[case("/healthz", "/healthz", true)]
    #[case("/healthz", "/healthz/ready", false)]
    #[case("/api*", "/apis/apps/v1", true)]
    #[case("/api*", "/version", false)]
    fn non_resource_urls(#[case] pattern: &str, #[case] path: &str, #[case] expected: bool) {
        let rule = PolicyRule::verbs(["get"]).urls([pattern]);
        assert_eq!(
            rule.matches(&Action::non_resource("get", path)),
            expected,
            "{pattern} vs {path}"
        );
        assert!(!rule.matches(&Action::non_resource("post", path)));
    }

    #[test]
    fn intersection_narrows_wildcards() {
        let admin = PolicyRule::verbs(["*"]).groups(["*"]).resources(["*"]);
        assert_eq!(admin.intersect(&pods()), Some(pods()));
        assert_eq!(pods().intersect(&admin), Some(pods()));

        let names = PolicyRule::verbs(["get", "delete"])
            .groups([""])
            .resources(["pods", "secrets"])
            .names(["web-0"]);
        assert_eq!(
            pods().intersect(&names),
            Some(
                PolicyRule::verbs(["get"])
                    .groups([""])
                    .resources(["pods"])
                    .names(["web-0"])
            )
        );

        let apps = PolicyRule::verbs(["get"]).groups(["apps"]).resources(["pods"]);
        assert_eq!(pods().intersect(&apps), None);
        let watch = PolicyRule::verbs(["watch"]).groups([""]).resources(["pods"]);
        assert_eq!(pods().intersect(&watch), None);
    }

    #[test]
    fn intersection_of_urls_keeps_the_narrower_pattern() {
        let all = PolicyRule::verbs(["get"]).urls(["*"]);
        let discovery = PolicyRule::verbs(["get", "post"]).urls(["/api", "/apis/*"]);
        assert_eq!(
            all.intersect(&discovery),
            Some(PolicyRule::verbs(["get"]).urls(["/api", "/apis/*"]))
        );
        assert_eq!(all.intersect(&pods()), None);
    }

    #[test]
    fn degenerate_rules_match_nothing() {
        let no_verbs = PolicyRule::default().groups(["*"]).resources(["*"]).urls(["*"]);
        assert!(!no_verbs.matches(&Action::resource("get", "", "pods")));
        assert!(!no_verbs.matches(&Action::non_resource("get", "/")));

        let no_targets = PolicyRule::verbs(["*"]).groups(["*"]);
        assert!(!no_targets.matches(&Action::resource("get", "", "pods")));
        assert!(!no_targets.matches(&Action::non_resource("get", "/")));
    }
}
