use tracing::debug;

use super::error::EngineError;
use super::model::OWNER_LABEL;
use crate::store::{ResourceKey, ResourceKind, ResourceStore, StoreError};

/// System-level facts that change what gets synthesized.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EnvironmentFacts {
    pub foreign_cert_manager: bool,
    pub foreign_tiller: bool,
    pub foreign_search: bool,
    pub privileged_profile: bool,
}

/// Well-known objects whose presence marks a pre-existing installation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeTargets {
    pub cert_manager: ResourceKey,
    pub tiller: ResourceKey,
    pub search: ResourceKey,
    pub privileged_profile: ResourceKey,
}

impl Default for ProbeTargets {
    fn default() -> Self {
        Self {
            cert_manager: ResourceKey::namespaced(
                ResourceKind::Deployment,
                "cert-manager",
                "cert-manager",
            ),
            tiller: ResourceKey::namespaced(
                ResourceKind::Deployment,
                "kube-system",
                "tiller-deploy",
            ),
            search: ResourceKey::namespaced(
                ResourceKind::Deployment,
                "open-cluster-management",
                "search-collector",
            ),
            privileged_profile: ResourceKey::cluster(
                ResourceKind::SecurityContextConstraints,
                "privileged",
            ),
        }
    }
}

/// Existence check for a component installed by someone else.
async fn foreign<S: ResourceStore + ?Sized>(
    store: &S,
    key: &ResourceKey,
) -> Result<bool, EngineError> {
    match store.get(key).await {
        Ok(found) => Ok(!found.labels.contains_key(OWNER_LABEL)),
        Err(StoreError::NotFound(_)) => Ok(false),
        Err(e) => Err(EngineError::Probe {
            target: key.to_string(),
            message: e.to_string(),
        }),
    }
}

async fn exists<S: ResourceStore + ?Sized>(
    store: &S,
    key: &ResourceKey,
) -> Result<bool, EngineError> {
    match store.get(key).await {
        Ok(_) => Ok(true),
        Err(StoreError::NotFound(_)) => Ok(false),
        Err(e) => Err(EngineError::Probe {
            target: key.to_string(),
            message: e.to_string(),
        }),
    }
}

/// Read-only probe of the environment. Any error other than not-found
/// aborts the whole pass.
pub async fn probe<S: ResourceStore + ?Sized>(
    store: &S,
    targets: &ProbeTargets,
) -> Result<EnvironmentFacts, EngineError> {
    let (foreign_cert_manager, foreign_tiller, foreign_search, privileged_profile) =
        tokio::try_join!(
            foreign(store, &targets.cert_manager),
            foreign(store, &targets.tiller),
            foreign(store, &targets.search),
            exists(store, &targets.privileged_profile),
        )?;
    let facts = EnvironmentFacts {
        foreign_cert_manager,
        foreign_tiller,
        foreign_search,
        privileged_profile,
    };
    debug!(?facts, "environment probed");
    Ok(facts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Resource};
    use serde_json::Value;
    use std::collections::BTreeMap;

    fn object(key: &ResourceKey, labels: BTreeMap<String, String>) -> Resource {
        Resource {
            kind: key.kind,
            namespace: key.namespace.clone(),
            name: key.name.clone(),
            labels,
            owner: None,
            spec: Value::Null,
            status: Value::Null,
            resource_version: None,
            deleting: false,
        }
    }

    #[tokio::test]
    async fn empty_cluster_has_no_facts() {
        let store = MemoryStore::new();
        let facts = probe(&store, &ProbeTargets::default()).await.unwrap();
        assert_eq!(facts, EnvironmentFacts::default());
    }

    #[tokio::test]
    async fn detects_foreign_installs_and_privileged_profile() {
        let store = MemoryStore::new();
        let targets = ProbeTargets::default();
        store.insert(object(&targets.search, BTreeMap::new())).await;
        store
            .insert(object(&targets.privileged_profile, BTreeMap::new()))
            .await;
        let facts = probe(&store, &targets).await.unwrap();
        assert!(facts.foreign_search);
        assert!(facts.privileged_profile);
        assert!(!facts.foreign_tiller);
        assert!(!facts.foreign_cert_manager);
    }

    #[tokio::test]
    async fn owned_objects_are_not_foreign() {
        let store = MemoryStore::new();
        let targets = ProbeTargets::default();
        let labels = BTreeMap::from([(OWNER_LABEL.to_string(), "c1".to_string())]);
        store.insert(object(&targets.tiller, labels)).await;
        let facts = probe(&store, &targets).await.unwrap();
        assert!(!facts.foreign_tiller);
    }

    #[tokio::test]
    async fn store_outage_is_a_probe_error() {
        let store = MemoryStore::new();
        store
            .set_unavailable(ResourceKind::SecurityContextConstraints, true)
            .await;
        let err = probe(&store, &ProbeTargets::default()).await.unwrap_err();
        assert!(matches!(err, EngineError::Probe { .. }));
    }
}
