#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use oprc_addon::crd::{AddonConfigSpec, ComponentSpec};
use oprc_addon::engine::{
    EngineConfig, ParentResource, ReconcileReport, Reconciler,
};
use oprc_addon::images::StaticImageTable;
use oprc_addon::store::{MemoryStore, Resource, ResourceKey, ResourceKind};
use serde_json::{Value, json};

pub fn reconciler(store: &MemoryStore) -> Reconciler<MemoryStore> {
    reconciler_with(store, EngineConfig::default())
}

pub fn reconciler_with(
    store: &MemoryStore,
    cfg: EngineConfig,
) -> Reconciler<MemoryStore> {
    Reconciler::new(
        Arc::new(store.clone()),
        Arc::new(StaticImageTable::builtin()),
        cfg,
    )
}

pub fn enabled() -> ComponentSpec {
    ComponentSpec {
        enabled: true,
        image: None,
    }
}

/// AddonConfig `c1` in `ns1` for managed cluster `c1`.
pub fn parent(configure: impl FnOnce(&mut AddonConfigSpec)) -> ParentResource {
    let mut spec = AddonConfigSpec {
        cluster_name: "c1".into(),
        cluster_namespace: "c1".into(),
        version: "2.1.0".into(),
        ..Default::default()
    };
    configure(&mut spec);
    ParentResource::new("c1", "ns1", spec)
}

/// Run one pass and persist the resulting finalizers, as the controller does.
pub async fn pass(
    r: &Reconciler<MemoryStore>,
    p: &mut ParentResource,
) -> ReconcileReport {
    let report = r.reconcile_one(p).await;
    if report.finalizers_changed {
        p.finalizers = report.finalizers.clone();
    }
    report
}

pub fn tokens(p: &ParentResource) -> Vec<String> {
    p.finalizers.iter().map(String::from).collect()
}

/// A deployment installed by someone else (no owner label).
pub fn foreign_deployment(ns: &str, name: &str) -> Resource {
    Resource {
        kind: ResourceKind::Deployment,
        namespace: Some(ns.into()),
        name: name.into(),
        labels: BTreeMap::from([("app".to_string(), name.to_string())]),
        owner: None,
        spec: json!({"replicas": 1}),
        status: Value::Null,
        resource_version: None,
        deleting: false,
    }
}

pub fn cleanup_job_key(child: &str) -> ResourceKey {
    ResourceKey::namespaced(ResourceKind::Job, "ns1", &format!("{child}-cleanup"))
}
