pub mod k8s;
pub mod memory;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::engine::model::{API_VERSION, ComponentKind, OwnerRef};

pub use k8s::KubeStore;
pub use memory::{MemoryStore, StoreOp};

pub type Selector = BTreeMap<String, String>;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("version conflict: {0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Every kind of object the engine reads or writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Component(ComponentKind),
    Job,
    Secret,
    Deployment,
    SecurityContextConstraints,
}

impl ResourceKind {
    pub fn api_version(&self) -> &'static str {
        match self {
            ResourceKind::Component(_) => API_VERSION,
            ResourceKind::Job => "batch/v1",
            ResourceKind::Secret => "v1",
            ResourceKind::Deployment => "apps/v1",
            ResourceKind::SecurityContextConstraints => {
                "security.openshift.io/v1"
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ResourceKind::Component(c) => c.kind(),
            ResourceKind::Job => "Job",
            ResourceKind::Secret => "Secret",
            ResourceKind::Deployment => "Deployment",
            ResourceKind::SecurityContextConstraints => {
                "SecurityContextConstraints"
            }
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            ResourceKind::Component(c) => c.plural(),
            ResourceKind::Job => "jobs",
            ResourceKind::Secret => "secrets",
            ResourceKind::Deployment => "deployments",
            ResourceKind::SecurityContextConstraints => {
                "securitycontextconstraints"
            }
        }
    }

    pub fn namespaced(&self) -> bool {
        !matches!(self, ResourceKind::SecurityContextConstraints)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub kind: ResourceKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl ResourceKey {
    pub fn namespaced(kind: ResourceKind, namespace: &str, name: &str) -> Self {
        Self {
            kind,
            namespace: Some(namespace.to_string()),
            name: name.to_string(),
        }
    }

    pub fn cluster(kind: ResourceKind, name: &str) -> Self {
        Self {
            kind,
            namespace: None,
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// A store object as written by the engine or observed from the store.
#[derive(Clone, Debug, PartialEq)]
pub struct Resource {
    pub kind: ResourceKind,
    pub namespace: Option<String>,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub owner: Option<OwnerRef>,
    pub spec: Value,
    /// Populated by the store; ignored on writes
    pub status: Value,
    /// Optimistic concurrency token; `update` must carry the observed one
    pub resource_version: Option<String>,
    /// The store has accepted a delete but the object still exists
    pub deleting: bool,
}

impl Resource {
    pub fn key(&self) -> ResourceKey {
        ResourceKey {
            kind: self.kind,
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    pub fn matches_selector(&self, selector: &Selector) -> bool {
        selector
            .iter()
            .all(|(k, v)| self.labels.get(k) == Some(v))
    }

    fn job_condition(&self, type_: &str) -> bool {
        self.status
            .get("conditions")
            .and_then(|c| c.as_array())
            .map(|conds| {
                conds.iter().any(|c| {
                    c.get("type").and_then(|v| v.as_str()) == Some(type_)
                        && c.get("status").and_then(|v| v.as_str())
                            == Some("True")
                })
            })
            .unwrap_or(false)
    }

    /// Job reached `Complete` or reports at least one succeeded pod.
    pub fn job_succeeded(&self) -> bool {
        self.job_condition("Complete")
            || self
                .status
                .get("succeeded")
                .and_then(|v| v.as_i64())
                .unwrap_or(0)
                > 0
    }

    pub fn job_failed(&self) -> bool {
        self.job_condition("Failed")
    }
}

/// Declarative resource store the engine converges against.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get(&self, key: &ResourceKey) -> StoreResult<Resource>;

    async fn create(&self, resource: &Resource) -> StoreResult<()>;

    /// Fails with `Conflict` when `resource.resource_version` is stale.
    async fn update(&self, resource: &Resource) -> StoreResult<()>;

    async fn delete(&self, key: &ResourceKey) -> StoreResult<()>;

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> StoreResult<Vec<Resource>>;
}
