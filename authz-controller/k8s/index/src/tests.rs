use crate::{AccessIndex, AccessMetrics, Handle, Index, SharedIndex};
use authz_controller_core::{
    bootstrap, wait::poll_until, Action, BootstrapPolicy, Change, ChangeKind, Error, Event,
    SubjectAccessReview, SubjectRulesReview, UserInfo,
};
use authz_controller_k8s_api::{self as k8s, rbac, ObjectMeta};
use kubert::index::{IndexClusterResource, IndexNamespacedResource};
use maplit::btreeset;
use pretty_assertions::assert_eq;
use std::{collections::BTreeSet, sync::Arc};
use tokio::{sync::mpsc, time};

struct TestConfig {
    index: SharedIndex,
    access: Arc<AccessIndex>,
    handle: Handle,
    metrics: AccessMetrics,
    _tracing: tracing::subscriber::DefaultGuard,
}

// === impl TestConfig ===

impl TestConfig {
    /// Builds indexes wired together, with the access index processing
    /// changes in the background.
    fn running() -> Self {
        let (test, changes) = Self::new();
        tokio::spawn(
            test.access
                .clone()
                .run(changes, time::Duration::from_secs(60 * 60)),
        );
        test
    }

    fn new() -> (Self, mpsc::UnboundedReceiver<Change>) {
        let _tracing = tracing::subscriber::set_default(
            tracing_subscriber::fmt()
                .with_test_writer()
                .with_max_level(tracing::Level::TRACE)
                .finish(),
        );
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        let (index, snapshots) =
            Index::shared(Arc::new(BootstrapPolicy::standard()), changes_tx);
        let metrics = AccessMetrics::default();
        let access = AccessIndex::shared(snapshots.clone(), metrics.clone());
        let handle = Handle::new(snapshots, access.clone());
        let test = Self {
            index,
            access,
            handle,
            metrics,
            _tracing,
        };
        (test, changes_rx)
    }

    fn apply_namespace(&self, name: &str) {
        IndexClusterResource::apply(&mut *self.index.write(), mk_namespace(name));
    }

    fn delete_namespace(&self, name: &str) {
        IndexClusterResource::<k8s::Namespace>::delete(&mut *self.index.write(), name.to_string());
    }

    fn apply_role_binding(&self, binding: k8s::RoleBinding) {
        IndexNamespacedResource::apply(&mut *self.index.write(), binding);
    }

    fn apply_cluster_role_binding(&self, binding: k8s::ClusterRoleBinding) {
        IndexClusterResource::apply(&mut *self.index.write(), binding);
    }

    async fn visible(&self, user: &str, groups: &[&str], expected: BTreeSet<String>) {
        let groups = groups.iter().map(|g| g.to_string()).collect::<Vec<_>>();
        let access = &self.access;
        let found = poll_until(
            time::Duration::from_millis(10),
            time::Duration::from_secs(5),
            || {
                let expected = expected.clone();
                let groups = groups.clone();
                async move {
                    let found = access.lookup(user, &groups);
                    (found == expected).then_some(found)
                }
            },
        )
        .await;
        assert!(
            found.is_ok(),
            "{user} must see {expected:?}, saw {:?}",
            self.access.lookup(user, &groups)
        );
    }
}

#[tokio::test]
async fn role_bindings_grant_visibility() {
    let test = TestConfig::running();
    test.apply_namespace("ns-0");
    test.apply_namespace("ns-1");
    test.apply_role_binding(mk_role_binding("ns-0", "harold-admin", bootstrap::ADMIN_ROLE, "harold"));

    test.visible("harold", &[], btreeset! { "ns-0".to_string() })
        .await;
    test.visible(
        bootstrap::SYSTEM_ADMIN_USER,
        &[],
        btreeset! { "ns-0".to_string(), "ns-1".to_string() },
    )
    .await;
    test.visible("mark", &[bootstrap::AUTHENTICATED_GROUP], btreeset! {})
        .await;

    let entry = test.access.entry("ns-0").expect("ns-0 must be indexed");
    assert!(entry.users.contains("harold"));
    assert!(entry.groups.contains(bootstrap::CLUSTER_READERS_GROUP));
}

#[tokio::test]
async fn cluster_bindings_refresh_every_namespace() {
    let test = TestConfig::running();
    test.apply_namespace("ns-0");
    test.apply_namespace("ns-1");
    test.visible("alice", &["qa"], btreeset! {}).await;

    test.apply_cluster_role_binding(mk_cluster_role_binding("qa-view", bootstrap::VIEW_ROLE, "qa"));
    test.visible(
        "alice",
        &["qa"],
        btreeset! { "ns-0".to_string(), "ns-1".to_string() },
    )
    .await;

    IndexClusterResource::<k8s::ClusterRoleBinding>::delete(
        &mut *test.index.write(),
        "qa-view".to_string(),
    );
    test.visible("alice", &["qa"], btreeset! {}).await;
}

#[tokio::test]
async fn deleted_namespaces_are_forgotten() {
    let test = TestConfig::running();
    test.apply_namespace("ns-0");
    test.apply_role_binding(mk_role_binding("ns-0", "harold-admin", bootstrap::ADMIN_ROLE, "harold"));
    test.visible("harold", &[], btreeset! { "ns-0".to_string() })
        .await;

    test.delete_namespace("ns-0");
    test.visible("harold", &[], btreeset! {}).await;
    assert!(test.access.entry("ns-0").is_none());
    assert!(!test.index.read().contains_namespace("ns-0"));
    assert_eq!(test.index.read().snapshot().size("ns-0"), 0);

    // Changes in an unknown namespace are ignored.
    test.apply_role_binding(mk_role_binding("ns-0", "harold-admin", bootstrap::ADMIN_ROLE, "harold"));
    time::sleep(time::Duration::from_millis(50)).await;
    assert!(test.access.entry("ns-0").is_none());
}

#[tokio::test]
async fn concurrent_triggers_coalesce() {
    let (test, _changes) = TestConfig::new();
    test.apply_namespace("ns-0");

    // Nothing runs until this task yields, so only the first change spawns a
    // refresh and the rest mark it to run once more.
    test.access.process(Change::new(
        ChangeKind::Namespace,
        None,
        "ns-0".to_string(),
        Event::Added,
    ));
    for i in 0..3 {
        test.access.process(Change::new(
            ChangeKind::RoleBinding,
            Some("ns-0".to_string()),
            format!("binding-{i}"),
            Event::Added,
        ));
    }
    assert_eq!(test.metrics.coalesced.get(), 3);

    let access = &test.access;
    let entry = poll_until(
        time::Duration::from_millis(10),
        time::Duration::from_secs(5),
        || async move { access.entry("ns-0").filter(|e| e.generation == 2) },
    )
    .await
    .expect("ns-0 must be refreshed twice");
    time::sleep(time::Duration::from_millis(50)).await;

    assert_eq!(test.metrics.refreshes.get(), 2);
    assert_eq!(test.access.entry("ns-0"), Some(entry));
}

#[tokio::test]
async fn generations_increase() {
    let (test, _changes) = TestConfig::new();
    let change = |kind, namespace: Option<&str>, name: &str| {
        Change::new(kind, namespace.map(Into::into), name.to_string(), Event::Added)
    };

    let mut last = None::<Arc<crate::AccessEntry>>;
    test.access.process(change(ChangeKind::Namespace, None, "ns-0"));
    for i in 1..=3u64 {
        let access = &test.access;
        let entry = poll_until(
            time::Duration::from_millis(10),
            time::Duration::from_secs(5),
            || async move { access.entry("ns-0").filter(|e| e.generation == i) },
        )
        .await
        .expect("entry must be refreshed");
        if let Some(last) = last {
            assert!(entry.last_refreshed >= last.last_refreshed);
        }
        last = Some(entry);
        test.access
            .process(change(ChangeKind::Role, Some("ns-0"), "role-0"));
    }
}

#[tokio::test]
async fn scopes_restrict_visible_namespaces() {
    let test = TestConfig::running();
    for ns in ["one", "two", "three"] {
        test.apply_namespace(ns);
        test.apply_role_binding(mk_role_binding(ns, "harold-admin", bootstrap::ADMIN_ROLE, "harold"));
    }
    test.visible(
        "harold",
        &[],
        btreeset! { "one".to_string(), "two".to_string(), "three".to_string() },
    )
    .await;

    let scoped = UserInfo::new("harold").with_scopes(["role:view:one", "role:view:two"]);
    assert_eq!(
        test.handle.list_visible_namespaces(&scoped).unwrap(),
        btreeset! { "one".to_string(), "two".to_string() }
    );

    let listing = UserInfo::new("harold").with_scopes(["user:list-projects"]);
    assert_eq!(test.handle.list_visible_namespaces(&listing).unwrap().len(), 3);

    let invalid = UserInfo::new("harold").with_scopes(["bogus"]);
    assert!(matches!(
        test.handle.list_visible_namespaces(&invalid),
        Err(Error::Forbidden { .. })
    ));
}

#[tokio::test]
async fn reviews_observe_indexed_policy() {
    let (test, mut changes) = TestConfig::new();
    let harold = UserInfo::new("harold").with_groups([bootstrap::AUTHENTICATED_GROUP]);
    let get_pods = SubjectAccessReview::of_self(
        Action::resource("get", "", "pods").in_namespace("ns-0"),
    );

    let decision = test.handle.evaluate_subject_access(&harold, &get_pods).unwrap();
    assert!(!decision.allowed);

    test.apply_role_binding(mk_role_binding("ns-0", "harold-view", bootstrap::VIEW_ROLE, "harold"));
    assert_eq!(
        changes.try_recv().ok(),
        Some(Change::new(
            ChangeKind::RoleBinding,
            Some("ns-0".to_string()),
            "harold-view".to_string(),
            Event::Added,
        ))
    );
    let decision = test.handle.evaluate_subject_access(&harold, &get_pods).unwrap();
    assert!(decision.allowed, "{}", decision.reason);

    let access = test
        .handle
        .evaluate_resource_access(&harold, &Action::resource("get", "", "pods").in_namespace("ns-0"));
    assert!(matches!(access, Err(Error::Forbidden { .. })));
}

#[tokio::test(start_paused = true)]
async fn resync_refreshes_without_changes() {
    let (test, _unforwarded) = TestConfig::new();
    let (_changes_tx, changes_rx) = mpsc::unbounded_channel();
    tokio::spawn(
        test.access
            .clone()
            .run(changes_rx, time::Duration::from_secs(10)),
    );

    test.apply_namespace("ns-0");
    test.access.process(Change::new(
        ChangeKind::Namespace,
        None,
        "ns-0".to_string(),
        Event::Added,
    ));
    let access = &test.access;
    poll_until(
        time::Duration::from_millis(10),
        time::Duration::from_secs(1),
        || async move { access.entry("ns-0").filter(|e| e.generation == 1) },
    )
    .await
    .expect("ns-0 must be indexed");

    // The binding is published in a snapshot, but its change never reaches
    // the access index.
    test.apply_role_binding(mk_role_binding("ns-0", "harold-admin", bootstrap::ADMIN_ROLE, "harold"));
    time::sleep(time::Duration::from_secs(5)).await;
    assert!(test.access.lookup("harold", &[]).is_empty());

    time::sleep(time::Duration::from_secs(6)).await;
    test.visible("harold", &[], btreeset! { "ns-0".to_string() })
        .await;
    assert_eq!(test.access.entry("ns-0").map(|e| e.generation), Some(2));
    assert_eq!(test.metrics.refreshes.get(), 2);
}

#[tokio::test]
async fn rules_reviews_observe_indexed_policy() {
    let test = TestConfig::running();
    let harold = UserInfo::new("harold").with_groups([bootstrap::AUTHENTICATED_GROUP]);
    let get_pods = Action::resource("get", "", "pods").in_namespace("ns-0");
    let review = SubjectRulesReview::of_self("ns-0");

    let rules = test.handle.evaluate_rules(&harold, &review).unwrap().rules;
    assert!(!rules.iter().any(|r| r.matches(&get_pods)));

    test.apply_role_binding(mk_role_binding("ns-0", "harold-view", bootstrap::VIEW_ROLE, "harold"));
    let rules = test.handle.evaluate_rules(&harold, &review).unwrap().rules;
    assert!(rules.iter().any(|r| r.matches(&get_pods)));

    let scoped = review.with_scopes(["user:info"]);
    let rules = test.handle.evaluate_rules(&harold, &scoped).unwrap().rules;
    assert!(!rules.iter().any(|r| r.matches(&get_pods)));
}

#[test]
fn policy_changes_are_published_once() {
    let (test, mut changes) = TestConfig::new();
    let mut role = mk_role("ns-0", "reader", &["get"]);

    IndexNamespacedResource::apply(&mut *test.index.write(), role.clone());
    IndexNamespacedResource::apply(&mut *test.index.write(), role.clone());
    role.rules = Some(vec![mk_rule(&["get", "list"])]);
    IndexNamespacedResource::apply(&mut *test.index.write(), role);
    IndexNamespacedResource::<k8s::Role>::delete(
        &mut *test.index.write(),
        "ns-0".to_string(),
        "reader".to_string(),
    );
    IndexNamespacedResource::<k8s::Role>::delete(
        &mut *test.index.write(),
        "ns-0".to_string(),
        "reader".to_string(),
    );

    let mut events = Vec::new();
    while let Ok(change) = changes.try_recv() {
        assert_eq!(change.kind, ChangeKind::Role);
        events.push(change.event);
    }
    assert_eq!(events, vec![Event::Added, Event::Modified, Event::Deleted]);
    assert_eq!(test.index.read().snapshot().size("ns-0"), 0);
}

#[test]
fn invalid_bindings_are_removed() {
    let (test, mut changes) = TestConfig::new();
    let mut binding = mk_role_binding("ns-0", "builders", bootstrap::VIEW_ROLE, "harold");
    test.apply_role_binding(binding.clone());
    assert!(test.index.read().snapshot().contains_binding(Some("ns-0"), "builders"));

    binding.role_ref.kind = "Robot".to_string();
    test.apply_role_binding(binding);
    assert!(!test.index.read().snapshot().contains_binding(Some("ns-0"), "builders"));

    let events = std::iter::from_fn(|| changes.try_recv().ok())
        .map(|c| c.event)
        .collect::<Vec<_>>();
    assert_eq!(events, vec![Event::Added, Event::Deleted]);
}

fn mk_namespace(name: &str) -> k8s::Namespace {
    k8s::Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn mk_rule(verbs: &[&str]) -> rbac::PolicyRule {
    rbac::PolicyRule {
        verbs: verbs.iter().map(|v| v.to_string()).collect(),
        api_groups: Some(vec!["".to_string()]),
        resources: Some(vec!["pods".to_string()]),
        ..Default::default()
    }
}

fn mk_role(ns: &str, name: &str, verbs: &[&str]) -> k8s::Role {
    k8s::Role {
        metadata: ObjectMeta {
            namespace: Some(ns.to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        },
        rules: Some(vec![mk_rule(verbs)]),
    }
}

fn mk_role_binding(ns: &str, name: &str, cluster_role: &str, user: &str) -> k8s::RoleBinding {
    k8s::RoleBinding {
        metadata: ObjectMeta {
            namespace: Some(ns.to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        },
        role_ref: rbac::RoleRef {
            api_group: bootstrap::RBAC_API_GROUP.to_string(),
            kind: crate::rbac::CLUSTER_ROLE_KIND.to_string(),
            name: cluster_role.to_string(),
        },
        subjects: Some(vec![rbac::Subject {
            api_group: Some(bootstrap::RBAC_API_GROUP.to_string()),
            kind: crate::rbac::USER_KIND.to_string(),
            name: user.to_string(),
            namespace: None,
        }]),
    }
}

fn mk_cluster_role_binding(name: &str, cluster_role: &str, group: &str) -> k8s::ClusterRoleBinding {
    k8s::ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        role_ref: rbac::RoleRef {
            api_group: bootstrap::RBAC_API_GROUP.to_string(),
            kind: crate::rbac::CLUSTER_ROLE_KIND.to_string(),
            name: cluster_role.to_string(),
        },
        subjects: Some(vec![rbac::Subject {
            api_group: Some(bootstrap::RBAC_API_GROUP.to_string()),
            kind: crate::rbac::GROUP_KIND.to_string(),
            name: group.to_string(),
            namespace: None,
        }]),
    }
}
