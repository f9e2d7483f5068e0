//! Finalizer tokens on the parent and the per-child teardown state machine.
//!
//! A token equals the child name. It is recorded only once the child is known
//! to exist and dropped only after every side effect of the child (auxiliary
//! secrets, cleanup job) is confirmed gone, so the parent's finalizer list is
//! enough to resume an interrupted teardown.

use serde_json::json;
use tracing::{debug, info};

use super::error::EngineError;
use super::model::{ComponentKind, ComponentPlan, ParentResource};
use crate::store::{
    Resource, ResourceKey, ResourceKind, ResourceStore, StoreError,
};

/// Ordered set of finalizer strings; foreign finalizers are kept untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FinalizerSet(Vec<String>);

impl FinalizerSet {
    pub fn contains(&self, token: &str) -> bool {
        self.0.iter().any(|t| t == token)
    }

    /// Appends `token` unless present. Returns whether the set changed.
    pub fn insert(&mut self, token: &str) -> bool {
        if self.contains(token) {
            return false;
        }
        self.0.push(token.to_string());
        true
    }

    pub fn remove(&mut self, token: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|t| t != token);
        before != self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }

    /// Tokens that guard children of `parent`.
    pub fn component_tokens<'a>(
        &'a self,
        parent: &'a str,
    ) -> impl Iterator<Item = (ComponentKind, &'a str)> + 'a {
        self.iter().filter_map(move |t| {
            ComponentKind::from_token(parent, t).map(|k| (k, t))
        })
    }
}

impl From<Vec<String>> for FinalizerSet {
    fn from(list: Vec<String>) -> Self {
        let mut set = FinalizerSet::default();
        for t in list {
            set.insert(&t);
        }
        set
    }
}

/// Per (parent, child) state derived from token presence and desired intent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinalizerState {
    Absent,
    Present,
    Deleting,
}

/// What the executor must do for a child this pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionClass {
    /// Create or update; record the token once the child exists
    Apply,
    /// Delete and clean up side effects before dropping the token
    Teardown,
    /// No token and nothing desired: delete strays, no cleanup owed
    Sweep,
}

pub fn state_of(finalizers: &FinalizerSet, plan: &ComponentPlan) -> FinalizerState {
    match (finalizers.contains(plan.name()), plan.is_present()) {
        (false, _) => FinalizerState::Absent,
        (true, true) => FinalizerState::Present,
        (true, false) => FinalizerState::Deleting,
    }
}

pub fn decide(finalizers: &FinalizerSet, plan: &ComponentPlan) -> ActionClass {
    if plan.is_present() {
        return ActionClass::Apply;
    }
    match state_of(finalizers, plan) {
        FinalizerState::Deleting => ActionClass::Teardown,
        _ => ActionClass::Sweep,
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenChange {
    Keep,
    Add(String),
    Remove(String),
}

impl TokenChange {
    /// Returns whether the set changed.
    pub fn apply(&self, set: &mut FinalizerSet) -> bool {
        match self {
            TokenChange::Keep => false,
            TokenChange::Add(t) => set.insert(t),
            TokenChange::Remove(t) => set.remove(t),
        }
    }
}

/// Cleanup job settings.
#[derive(Clone, Debug)]
pub struct CleanupSpec {
    pub image: String,
    pub backoff_limit: i32,
    pub service_account: Option<String>,
}

impl Default for CleanupSpec {
    fn default() -> Self {
        Self {
            image: "quay.io/oaas/addon-cleanup:latest".into(),
            backoff_limit: 3,
            service_account: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CleanupProgress {
    Complete,
    Pending(String),
}

pub fn cleanup_job(
    parent: &ParentResource,
    kind: ComponentKind,
    cfg: &CleanupSpec,
) -> Resource {
    let child = kind.child_name(&parent.name);
    let labels = parent.child_labels(kind);
    let mut pod_spec = json!({
        "restartPolicy": "Never",
        "containers": [{
            "name": "cleanup",
            "image": cfg.image,
            "args": [
                "cleanup",
                "--component", kind.suffix(),
                "--name", child,
                "--namespace", parent.namespace,
            ],
        }],
    });
    if let Some(sa) = &cfg.service_account {
        pod_spec["serviceAccountName"] = json!(sa);
    }
    Resource {
        kind: ResourceKind::Job,
        namespace: Some(parent.namespace.clone()),
        name: kind.cleanup_job_name(&child),
        labels: labels.clone(),
        owner: Some(parent.owner_ref()),
        spec: json!({
            "backoffLimit": cfg.backoff_limit,
            "template": {
                "metadata": { "labels": labels },
                "spec": pod_spec,
            },
        }),
        status: serde_json::Value::Null,
        resource_version: None,
        deleting: false,
    }
}

async fn delete_ignoring_absent<S: ResourceStore + ?Sized>(
    store: &S,
    key: &ResourceKey,
) -> Result<(), EngineError> {
    match store.delete(key).await {
        Ok(()) | Err(StoreError::NotFound(_)) => Ok(()),
        Err(e) => Err(EngineError::store("delete", key, e)),
    }
}

/// Side-effect cleanup owed by a child whose token is still recorded.
///
/// Secrets go first, then the cleanup job is driven towards success. Any
/// store failure aborts the step; the caller keeps the token.
/// A cleanup job for the child of `kind` still exists in the store.
pub async fn cleanup_in_flight<S: ResourceStore + ?Sized>(
    store: &S,
    parent: &ParentResource,
    kind: ComponentKind,
) -> Result<bool, EngineError> {
    if !kind.has_cleanup_job() {
        return Ok(false);
    }
    let key = ResourceKey::namespaced(
        ResourceKind::Job,
        &parent.namespace,
        &kind.cleanup_job_name(&kind.child_name(&parent.name)),
    );
    match store.get(&key).await {
        Ok(_) => Ok(true),
        Err(StoreError::NotFound(_)) => Ok(false),
        Err(e) => Err(EngineError::store("get", &key, e)),
    }
}

pub async fn cleanup_side_effects<S: ResourceStore + ?Sized>(
    store: &S,
    parent: &ParentResource,
    plan: &ComponentPlan,
    cfg: &CleanupSpec,
) -> Result<CleanupProgress, EngineError> {
    let kind = plan.kind;
    for secret in kind.auxiliary_secrets(plan.name()) {
        let key =
            ResourceKey::namespaced(ResourceKind::Secret, &parent.namespace, &secret);
        delete_ignoring_absent(store, &key).await?;
        debug!(component = %kind, %secret, "auxiliary secret removed");
    }

    if !kind.has_cleanup_job() {
        return Ok(CleanupProgress::Complete);
    }

    let job = cleanup_job(parent, kind, cfg);
    let job_key = job.key();
    match store.get(&job_key).await {
        Err(StoreError::NotFound(_)) => {
            match store.create(&job).await {
                Ok(()) | Err(StoreError::AlreadyExists(_)) => {}
                Err(e) => return Err(EngineError::store("create", &job_key, e)),
            }
            info!(component = %kind, job = %job_key.name, "cleanup job created");
            Ok(CleanupProgress::Pending("cleanup job created".into()))
        }
        Err(e) => Err(EngineError::store("get", &job_key, e)),
        Ok(observed) if observed.job_succeeded() => {
            delete_ignoring_absent(store, &job_key).await?;
            info!(component = %kind, job = %job_key.name, "cleanup job succeeded");
            Ok(CleanupProgress::Complete)
        }
        Ok(observed) if observed.deleting => {
            Ok(CleanupProgress::Pending("cleanup job terminating".into()))
        }
        Ok(observed) if observed.job_failed() => {
            delete_ignoring_absent(store, &job_key).await?;
            info!(component = %kind, job = %job_key.name, "cleanup job failed; will recreate");
            Ok(CleanupProgress::Pending(
                "cleanup job failed; recreating on next pass".into(),
            ))
        }
        Ok(_) => Ok(CleanupProgress::Pending("cleanup job running".into())),
    }
}
