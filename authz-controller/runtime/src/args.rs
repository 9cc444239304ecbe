use crate::{
    core::{bootstrap::BootstrapPolicy, retry::Backoff},
    index::{self, AccessIndex, AccessMetrics, IndexMetrics},
    index_list::IndexList,
    k8s::{self, legacy, Client, Resource},
    lease,
    mirror::{
        Controller, ControllerConfig, ControllerMetrics, KubeStore, LegacyBinding, NativeBinding,
        Queue, RequeueBackoff, SourceIndex,
    },
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tokio::{sync::mpsc, time::Duration};
use tracing::{info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "authz", about = "An authorization policy controller")]
pub struct Args {
    #[clap(long, default_value = "authz=info,warn", env = "AUTHZ_CONTROLLER_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    #[clap(long, default_value = "authz-controller")]
    deployment_name: String,

    #[clap(long, default_value = "authz-system")]
    control_plane_namespace: String,

    /// Seconds between full refreshes of the project access index.
    #[clap(long, default_value = "300")]
    access_resync_secs: u64,

    /// Workers reconciling keys concurrently in each mirror controller.
    #[clap(long, default_value = "2")]
    mirror_workers: usize,

    /// Attempts at writing a mirrored binding before it is requeued.
    #[clap(long, default_value = "5")]
    mirror_retry_attempts: usize,

    /// Disables mirroring legacy bindings into native RBAC bindings.
    #[clap(long)]
    legacy_mirror_disabled: bool,

    /// Disables mirroring native RBAC bindings back into legacy bindings.
    #[clap(long)]
    native_mirror_disabled: bool,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            deployment_name,
            control_plane_namespace,
            access_resync_secs,
            mirror_workers,
            mirror_retry_attempts,
            legacy_mirror_disabled,
            native_mirror_disabled,
        } = self;

        if mirror_retry_attempts == 0 {
            bail!("--mirror-retry-attempts must be at least 1");
        }
        let mirror_config = ControllerConfig {
            workers: mirror_workers,
            retry: Backoff {
                attempts: mirror_retry_attempts,
                ..Backoff::default()
            },
        };

        // The policy index publishes a snapshot of the cluster's RBAC policy
        // and notifies the access index of every change.
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        let (policy_index, snapshots) =
            index::Index::shared(Arc::new(BootstrapPolicy::standard()), changes_tx);

        let mut prom = <Registry>::default();
        let policy_index =
            IndexMetrics::register(policy_index, prom.sub_registry_with_prefix("policy_index"))
                .shared();
        let access_metrics = AccessMetrics::register(prom.sub_registry_with_prefix("access_index"));
        let legacy_metrics =
            ControllerMetrics::register(prom.sub_registry_with_prefix("legacy_mirror"));
        let native_metrics =
            ControllerMetrics::register(prom.sub_registry_with_prefix("native_mirror"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        // Each mirror direction reads its source bindings from an index that
        // enqueues changed keys for reconciliation.
        let legacy_queue = Queue::new(RequeueBackoff::default());
        let legacy_source = SourceIndex::<LegacyBinding>::shared(legacy_queue.clone());
        let legacy_source_index = IndexMetrics::register(
            legacy_source.clone(),
            prom.sub_registry_with_prefix("legacy_source"),
        )
        .shared();
        let native_queue = Queue::new(RequeueBackoff::default());
        let native_source = SourceIndex::<NativeBinding>::shared(native_queue.clone());
        let native_source_index = IndexMetrics::register(
            native_source.clone(),
            prom.sub_registry_with_prefix("native_source"),
        )
        .shared();

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let access_index = AccessIndex::shared(snapshots, access_metrics);
        tokio::spawn(
            access_index
                .run(changes_rx, Duration::from_secs(access_resync_secs))
                .instrument(info_span!("access_index")),
        );

        // Spawn the RBAC watches that feed the policy index. Native bindings
        // are also the source of the native-to-legacy mirror.

        let namespaces = runtime.watch_all::<k8s::Namespace>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(policy_index.clone(), namespaces)
                .instrument(info_span!("namespaces")),
        );

        let roles = runtime.watch_all::<k8s::Role>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(policy_index.clone(), roles).instrument(info_span!("roles")),
        );

        let cluster_roles = runtime.watch_all::<k8s::ClusterRole>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(policy_index.clone(), cluster_roles)
                .instrument(info_span!("clusterroles")),
        );

        // Mirroring in either direction requires the legacy resources to be
        // installed.
        let client = runtime.client();
        let legacy_installed = if legacy_mirror_disabled && native_mirror_disabled {
            false
        } else if api_resource_exists::<legacy::RoleBinding>(&client).await
            && api_resource_exists::<legacy::ClusterRoleBinding>(&client).await
        {
            true
        } else {
            tracing::warn!(
                "{} resource kinds not found, skipping mirroring",
                legacy::RoleBinding::api_version(&()),
            );
            false
        };
        let mirror_legacy = legacy_installed && !legacy_mirror_disabled;
        let mirror_native = legacy_installed && !native_mirror_disabled;

        let role_bindings = runtime.watch_all::<k8s::RoleBinding>(watcher::Config::default());
        let cluster_role_bindings =
            runtime.watch_all::<k8s::ClusterRoleBinding>(watcher::Config::default());
        let native_source = if mirror_native {
            let indexes = IndexList::new(policy_index.clone())
                .push(native_source_index)
                .shared();
            tokio::spawn(
                kubert::index::namespaced(indexes.clone(), role_bindings)
                    .instrument(info_span!("rolebindings")),
            );
            tokio::spawn(
                kubert::index::cluster(indexes, cluster_role_bindings)
                    .instrument(info_span!("clusterrolebindings")),
            );
            Some((native_source, native_queue))
        } else {
            tokio::spawn(
                kubert::index::namespaced(policy_index.clone(), role_bindings)
                    .instrument(info_span!("rolebindings")),
            );
            tokio::spawn(
                kubert::index::cluster(policy_index, cluster_role_bindings)
                    .instrument(info_span!("clusterrolebindings")),
            );
            None
        };

        let legacy_source = if mirror_legacy {
            let legacy_role_bindings =
                runtime.watch_all::<legacy::RoleBinding>(watcher::Config::default());
            tokio::spawn(
                kubert::index::namespaced(legacy_source_index.clone(), legacy_role_bindings)
                    .instrument(info_span!("rolebindings.legacy")),
            );
            let legacy_cluster_role_bindings =
                runtime.watch_all::<legacy::ClusterRoleBinding>(watcher::Config::default());
            tokio::spawn(
                kubert::index::cluster(legacy_source_index, legacy_cluster_role_bindings)
                    .instrument(info_span!("clusterrolebindings.legacy")),
            );
            Some((legacy_source, legacy_queue))
        } else {
            None
        };

        // Only the holder of the write lease writes mirrored bindings.
        if mirror_legacy || mirror_native {
            let hostname = std::env::var("HOSTNAME")
                .context("Failed to fetch `HOSTNAME` environment variable")?;
            let claims = lease::init(
                &runtime,
                &control_plane_namespace,
                &deployment_name,
                &hostname,
            )
            .await?;

            if let Some((source, queue)) = legacy_source {
                let controller = Controller::<LegacyBinding, NativeBinding>::new(
                    "legacy",
                    source,
                    Arc::new(KubeStore::<NativeBinding>::new(client.clone())),
                    queue,
                    claims.clone(),
                    &hostname,
                    mirror_config.clone(),
                    legacy_metrics,
                );
                tokio::spawn(controller.run().instrument(info_span!("legacy_mirror")));
            }

            if let Some((source, queue)) = native_source {
                let controller = Controller::<NativeBinding, LegacyBinding>::new(
                    "native",
                    source,
                    Arc::new(KubeStore::<LegacyBinding>::new(client)),
                    queue,
                    claims,
                    &hostname,
                    mirror_config,
                    native_metrics,
                );
                tokio::spawn(controller.run().instrument(info_span!("native_mirror")));
            }
        }

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

async fn api_resource_exists<T>(client: &Client) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    client
        .list_api_group_resources(&T::api_version(&dt))
        .await
        .ok()
        .iter()
        .flat_map(|r| r.resources.iter())
        .any(|r| r.kind == T::kind(&dt))
}
