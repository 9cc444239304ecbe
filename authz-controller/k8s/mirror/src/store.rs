//! Binding stores backed by the Kubernetes API.

use crate::binding::{LegacyBinding, NativeBinding};
use authz_controller_core::{BindingKind, BindingStore, Error, ObjectId, Result, Versioned};
use authz_controller_k8s_api::{
    self as k8s, error_code, legacy, Api, DeleteParams, PostParams, Resource,
};
use serde::{de::DeserializeOwned, Serialize};
use std::{fmt, marker::PhantomData};

pub const FIELD_MANAGER: &str = "authz-controller";

/// Reads and writes one binding representation through the API server.
/// Writes carry the object's resource version, so stale writes fail with
/// [`Error::Conflict`].
pub struct KubeStore<T> {
    client: k8s::Client,
    _marker: PhantomData<fn() -> T>,
}

// === impl KubeStore ===

impl<T> KubeStore<T> {
    pub fn new(client: k8s::Client) -> Self {
        Self {
            client,
            _marker: PhantomData,
        }
    }

    fn namespaced<K>(&self, id: &ObjectId) -> Api<K>
    where
        K: Resource<Scope = k8s::NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), id.namespace.as_deref().unwrap_or_default())
    }

    fn cluster<K>(&self) -> Api<K>
    where
        K: Resource<Scope = k8s::ClusterResourceScope, DynamicType = ()>,
    {
        Api::all(self.client.clone())
    }
}

#[async_trait::async_trait]
impl BindingStore<NativeBinding> for KubeStore<NativeBinding> {
    async fn get(&self, id: &ObjectId) -> Result<Option<NativeBinding>> {
        match id.kind {
            BindingKind::RoleBinding => Ok(get(self.namespaced::<k8s::RoleBinding>(id), id)
                .await?
                .map(NativeBinding::RoleBinding)),
            BindingKind::ClusterRoleBinding => {
                Ok(get(self.cluster::<k8s::ClusterRoleBinding>(), id)
                    .await?
                    .map(NativeBinding::ClusterRoleBinding))
            }
        }
    }

    async fn upsert(&self, obj: NativeBinding) -> Result<NativeBinding> {
        let id = obj.id();
        match obj {
            NativeBinding::RoleBinding(b) => upsert(self.namespaced(&id), &id, b)
                .await
                .map(NativeBinding::RoleBinding),
            NativeBinding::ClusterRoleBinding(b) => upsert(self.cluster(), &id, b)
                .await
                .map(NativeBinding::ClusterRoleBinding),
        }
    }

    async fn delete(&self, id: &ObjectId) -> Result<()> {
        match id.kind {
            BindingKind::RoleBinding => delete(self.namespaced::<k8s::RoleBinding>(id), id).await,
            BindingKind::ClusterRoleBinding => {
                delete(self.cluster::<k8s::ClusterRoleBinding>(), id).await
            }
        }
    }
}

#[async_trait::async_trait]
impl BindingStore<LegacyBinding> for KubeStore<LegacyBinding> {
    async fn get(&self, id: &ObjectId) -> Result<Option<LegacyBinding>> {
        match id.kind {
            BindingKind::RoleBinding => Ok(get(self.namespaced::<legacy::RoleBinding>(id), id)
                .await?
                .map(LegacyBinding::RoleBinding)),
            BindingKind::ClusterRoleBinding => {
                Ok(get(self.cluster::<legacy::ClusterRoleBinding>(), id)
                    .await?
                    .map(LegacyBinding::ClusterRoleBinding))
            }
        }
    }

    async fn upsert(&self, obj: LegacyBinding) -> Result<LegacyBinding> {
        let id = obj.id();
        match obj {
            LegacyBinding::RoleBinding(b) => upsert(self.namespaced(&id), &id, b)
                .await
                .map(LegacyBinding::RoleBinding),
            LegacyBinding::ClusterRoleBinding(b) => upsert(self.cluster(), &id, b)
                .await
                .map(LegacyBinding::ClusterRoleBinding),
        }
    }

    async fn delete(&self, id: &ObjectId) -> Result<()> {
        match id.kind {
            BindingKind::RoleBinding => {
                delete(self.namespaced::<legacy::RoleBinding>(id), id).await
            }
            BindingKind::ClusterRoleBinding => {
                delete(self.cluster::<legacy::ClusterRoleBinding>(), id).await
            }
        }
    }
}

async fn get<K>(api: Api<K>, id: &ObjectId) -> Result<Option<K>>
where
    K: Clone + DeserializeOwned + fmt::Debug,
{
    api.get_opt(&id.name).await.map_err(|e| store_error(id, e))
}

/// Replaces the object when it carries a resource version and creates it
/// otherwise.
async fn upsert<K>(api: Api<K>, id: &ObjectId, obj: K) -> Result<K>
where
    K: Resource + Clone + DeserializeOwned + Serialize + fmt::Debug,
{
    let params = PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    };
    let res = if obj.meta().resource_version.is_some() {
        api.replace(&id.name, &params, &obj).await
    } else {
        api.create(&params, &obj).await
    };
    res.map_err(|e| store_error(id, e))
}

async fn delete<K>(api: Api<K>, id: &ObjectId) -> Result<()>
where
    K: Clone + DeserializeOwned + fmt::Debug,
{
    match api.delete(&id.name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(error) if error_code(&error) == Some(404) => Ok(()),
        Err(error) => Err(store_error(id, error)),
    }
}

fn store_error(id: &ObjectId, error: k8s::Error) -> Error {
    match error_code(&error) {
        Some(409) => Error::conflict(id, error.to_string()),
        Some(404) => Error::not_found(id.kind.as_str(), id.name.clone()),
        _ => Error::Unavailable(anyhow::Error::new(error).context(format!("accessing {id}"))),
    }
}
