use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::core::{DynamicObject, GroupVersionKind};
use kube::discovery::ApiResource;
use kube::{Client, ResourceExt};
use serde_json::{Value, json};
use tracing::{debug, instrument};

use super::{
    Resource, ResourceKey, ResourceKind, ResourceStore, Selector, StoreError,
    StoreResult,
};
use crate::engine::model::OwnerRef;

fn split_api_version(api_version: &str) -> (&str, &str) {
    match api_version.rsplit_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}

pub fn api_resource(kind: ResourceKind) -> ApiResource {
    let (group, version) = split_api_version(kind.api_version());
    let gvk = GroupVersionKind::gvk(group, version, kind.kind());
    ApiResource::from_gvk_with_plural(&gvk, kind.plural())
}

pub fn selector_string(selector: &Selector) -> String {
    selector
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

fn owner_reference(owner: &OwnerRef) -> Option<OwnerReference> {
    // The API server rejects owner references without a uid.
    let uid = owner.uid.clone()?;
    Some(OwnerReference {
        api_version: owner.api_version.clone(),
        kind: owner.kind.clone(),
        name: owner.name.clone(),
        uid,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

pub fn to_dynamic(resource: &Resource) -> DynamicObject {
    let ar = api_resource(resource.kind);
    let mut obj = DynamicObject::new(&resource.name, &ar)
        .data(json!({ "spec": resource.spec }));
    obj.metadata.namespace = resource.namespace.clone();
    if !resource.labels.is_empty() {
        obj.metadata.labels = Some(resource.labels.clone());
    }
    obj.metadata.owner_references = resource
        .owner
        .as_ref()
        .and_then(owner_reference)
        .map(|o| vec![o]);
    obj.metadata.resource_version = resource.resource_version.clone();
    obj
}

pub fn from_dynamic(kind: ResourceKind, obj: DynamicObject) -> Resource {
    let owner = obj.owner_references().first().map(|o| OwnerRef {
        api_version: o.api_version.clone(),
        kind: o.kind.clone(),
        name: o.name.clone(),
        uid: Some(o.uid.clone()),
    });
    Resource {
        kind,
        namespace: obj.namespace(),
        name: obj.name_any(),
        labels: obj.labels().clone(),
        owner,
        spec: obj.data.get("spec").cloned().unwrap_or(Value::Null),
        status: obj.data.get("status").cloned().unwrap_or(Value::Null),
        resource_version: obj.resource_version(),
        deleting: obj.metadata.deletion_timestamp.is_some(),
    }
}

/// Map API errors onto the store taxonomy: 404 and 409 are benign signals.
pub fn classify(err: kube::Error, target: &str) -> StoreError {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => {
            StoreError::NotFound(target.to_string())
        }
        kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
            StoreError::AlreadyExists(target.to_string())
        }
        kube::Error::Api(ae) if ae.code == 409 => {
            StoreError::Conflict(target.to_string())
        }
        other => StoreError::Unavailable(format!("{}: {}", target, other)),
    }
}

/// `ResourceStore` backed by the Kubernetes API through dynamic objects.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, kind: ResourceKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = api_resource(kind);
        match namespace {
            Some(ns) if kind.namespaced() => {
                Api::namespaced_with(self.client.clone(), ns, &ar)
            }
            _ => Api::all_with(self.client.clone(), &ar),
        }
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    #[instrument(level = "debug", skip_all, fields(key = %key))]
    async fn get(&self, key: &ResourceKey) -> StoreResult<Resource> {
        let api = self.api(key.kind, key.namespace.as_deref());
        let obj = api
            .get(&key.name)
            .await
            .map_err(|e| classify(e, &key.to_string()))?;
        Ok(from_dynamic(key.kind, obj))
    }

    #[instrument(level = "debug", skip_all, fields(kind = %resource.kind, name = %resource.name))]
    async fn create(&self, resource: &Resource) -> StoreResult<()> {
        let key = resource.key();
        let api = self.api(key.kind, key.namespace.as_deref());
        api.create(&PostParams::default(), &to_dynamic(resource))
            .await
            .map_err(|e| classify(e, &key.to_string()))?;
        debug!(%key, "created");
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(kind = %resource.kind, name = %resource.name))]
    async fn update(&self, resource: &Resource) -> StoreResult<()> {
        let key = resource.key();
        let api = self.api(key.kind, key.namespace.as_deref());
        api.replace(&key.name, &PostParams::default(), &to_dynamic(resource))
            .await
            .map_err(|e| classify(e, &key.to_string()))?;
        debug!(%key, "replaced");
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(key = %key))]
    async fn delete(&self, key: &ResourceKey) -> StoreResult<()> {
        let api = self.api(key.kind, key.namespace.as_deref());
        api.delete(&key.name, &DeleteParams::background())
            .await
            .map_err(|e| classify(e, &key.to_string()))?;
        debug!(%key, "delete accepted");
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(kind = %kind))]
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> StoreResult<Vec<Resource>> {
        let api = self.api(kind, namespace);
        let lp = ListParams::default().labels(&selector_string(selector));
        let list = api
            .list(&lp)
            .await
            .map_err(|e| classify(e, kind.kind()))?;
        Ok(list
            .items
            .into_iter()
            .map(|obj| from_dynamic(kind, obj))
            .collect())
    }
}
