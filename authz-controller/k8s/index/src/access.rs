//! The project cache.
//!
//! For each known namespace the index holds the users and groups that may
//! `get` the namespace's project. Entries are rebuilt from the latest policy
//! snapshot as change notifications arrive, so that "which namespaces may
//! this user see" is answered without evaluating every namespace.

use crate::{metrics::AccessMetrics, policy::SnapshotRx};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use authz_controller_core::{Action, Authorizer, Change, ChangeKind, Event};
use parking_lot::{Mutex, RwLock};
use std::{
    collections::{hash_map::Entry, BTreeSet},
    sync::Arc,
};
use tokio::{sync::mpsc, time};
use tracing::{info_span, Instrument};

pub const PROJECTS_RESOURCE: &str = "projects";

#[derive(Debug)]
pub struct AccessIndex {
    snapshots: SnapshotRx,
    state: RwLock<State>,
    /// Namespaces with a refresh in flight, mapped to whether another
    /// refresh was requested while it ran.
    inflight: Mutex<HashMap<String, bool>>,
    metrics: AccessMetrics,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessEntry {
    pub namespace: String,
    pub users: BTreeSet<String>,
    pub groups: BTreeSet<String>,
    pub last_refreshed: time::Instant,
    pub generation: u64,
}

#[derive(Debug, Default)]
struct State {
    namespaces: HashSet<String>,
    entries: HashMap<String, Arc<AccessEntry>>,
}

// === impl AccessIndex ===

impl AccessIndex {
    pub fn shared(snapshots: SnapshotRx, metrics: AccessMetrics) -> Arc<Self> {
        Arc::new(Self {
            snapshots,
            state: RwLock::new(State::default()),
            inflight: Mutex::new(HashMap::default()),
            metrics,
        })
    }

    /// Processes change notifications until the sender is dropped, refreshing
    /// every namespace each `resync` period.
    pub async fn run(self: Arc<Self>, mut changes: mpsc::UnboundedReceiver<Change>, resync: time::Duration) {
        let mut resync = time::interval_at(time::Instant::now() + resync, resync);
        resync.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                change = changes.recv() => match change {
                    Some(change) => self.process(change),
                    None => {
                        tracing::debug!("Changes closed");
                        return;
                    }
                },
                _ = resync.tick() => {
                    tracing::debug!("Resyncing");
                    self.refresh_all();
                }
            }
        }
    }

    pub fn process(self: &Arc<Self>, change: Change) {
        match (change.kind, change.event) {
            (ChangeKind::Namespace, Event::Deleted) => self.forget(&change.name),
            (ChangeKind::Namespace, _) => {
                self.state.write().namespaces.insert(change.name.clone());
                self.trigger(change.name);
            }
            (ChangeKind::ClusterRole | ChangeKind::ClusterRoleBinding, _) => self.refresh_all(),
            (ChangeKind::Role | ChangeKind::RoleBinding, _) => {
                if let Some(ns) = change.namespace {
                    if self.state.read().namespaces.contains(&ns) {
                        self.trigger(ns);
                    }
                }
            }
        }
    }

    /// Returns the namespaces whose projects the user, or one of its groups,
    /// may get.
    pub fn lookup(&self, user: &str, groups: &[String]) -> BTreeSet<String> {
        self.state
            .read()
            .entries
            .values()
            .filter(|e| e.users.contains(user) || groups.iter().any(|g| e.groups.contains(g)))
            .map(|e| e.namespace.clone())
            .collect()
    }

    pub fn entry(&self, namespace: &str) -> Option<Arc<AccessEntry>> {
        self.state.read().entries.get(namespace).cloned()
    }

    fn forget(&self, namespace: &str) {
        let mut state = self.state.write();
        state.namespaces.remove(namespace);
        state.entries.remove(namespace);
        self.metrics.entries.set(state.entries.len() as i64);
    }

    fn refresh_all(self: &Arc<Self>) {
        let namespaces = self
            .state
            .read()
            .namespaces
            .iter()
            .cloned()
            .collect::<Vec<_>>();
        for ns in namespaces {
            self.trigger(ns);
        }
    }

    /// Schedules a refresh of a namespace, unless one is already running, in
    /// which case the running refresh is marked to run again.
    fn trigger(self: &Arc<Self>, namespace: String) {
        match self.inflight.lock().entry(namespace.clone()) {
            Entry::Occupied(mut e) => {
                *e.get_mut() = true;
                self.metrics.coalesced.inc();
                return;
            }
            Entry::Vacant(e) => {
                e.insert(false);
            }
        }

        let index = self.clone();
        tokio::spawn(
            async move { index.refresh_until_clean(namespace).await }
                .instrument(info_span!("refresh")),
        );
    }

    async fn refresh_until_clean(self: Arc<Self>, namespace: String) {
        loop {
            self.refresh(&namespace);
            tokio::task::yield_now().await;

            let mut inflight = self.inflight.lock();
            match inflight.get_mut(&namespace) {
                Some(dirty) if *dirty => *dirty = false,
                _ => {
                    inflight.remove(&namespace);
                    return;
                }
            }
        }
    }

    #[tracing::instrument(skip(self))]
    fn refresh(&self, namespace: &str) {
        let snapshot = self.snapshots.borrow().clone();
        let action = Action::resource("get", "", PROJECTS_RESOURCE)
            .in_namespace(namespace)
            .named(namespace);
        let access = match Authorizer::new(snapshot).evaluate_resource_access(&action) {
            Ok(access) => access,
            Err(error) => {
                tracing::warn!(%error, "Failed to evaluate access");
                self.metrics.failures.inc();
                return;
            }
        };
        for error in &access.evaluation_errors {
            tracing::debug!(%error);
        }

        let mut state = self.state.write();
        if !state.namespaces.contains(namespace) {
            tracing::debug!("Namespace was removed during refresh");
            return;
        }
        let generation = state
            .entries
            .get(namespace)
            .map(|e| e.generation + 1)
            .unwrap_or(1);
        let last_refreshed = state
            .entries
            .get(namespace)
            .map(|e| e.last_refreshed.max(time::Instant::now()))
            .unwrap_or_else(time::Instant::now);
        state.entries.insert(
            namespace.to_string(),
            Arc::new(AccessEntry {
                namespace: namespace.to_string(),
                users: access.users,
                groups: access.groups,
                last_refreshed,
                generation,
            }),
        );
        self.metrics.refreshes.inc();
        self.metrics.entries.set(state.entries.len() as i64);
        tracing::debug!(generation, "Refreshed");
    }
}
