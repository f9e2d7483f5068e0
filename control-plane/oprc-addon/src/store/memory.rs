use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{
    Resource, ResourceKey, ResourceKind, ResourceStore, Selector, StoreError,
    StoreResult,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreOp {
    Get(ResourceKey),
    Create(ResourceKey),
    Update(ResourceKey),
    Delete(ResourceKey),
    List(ResourceKind),
}

impl StoreOp {
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            StoreOp::Create(_) | StoreOp::Update(_) | StoreOp::Delete(_)
        )
    }
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<ResourceKey, Resource>,
    next_version: u64,
    pending_conflicts: HashMap<ResourceKey, u32>,
    unavailable: HashSet<ResourceKind>,
    held_deletions: HashSet<ResourceKey>,
    journal: Vec<StoreOp>,
}

impl Inner {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn check_available(&self, kind: ResourceKind) -> StoreResult<()> {
        if self.unavailable.contains(&kind) {
            return Err(StoreError::Unavailable(format!(
                "{} backend offline",
                kind
            )));
        }
        Ok(())
    }
}

/// In-process store with optimistic versioning and fault injection.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object directly, bypassing the journal.
    pub async fn insert(&self, mut resource: Resource) {
        let mut w = self.inner.write().await;
        resource.resource_version = Some(w.bump());
        w.objects.insert(resource.key(), resource);
    }

    pub async fn snapshot(&self, key: &ResourceKey) -> Option<Resource> {
        self.inner.read().await.objects.get(key).cloned()
    }

    pub async fn contains(&self, key: &ResourceKey) -> bool {
        self.inner.read().await.objects.contains_key(key)
    }

    pub async fn objects(&self) -> Vec<Resource> {
        self.inner.read().await.objects.values().cloned().collect()
    }

    /// Make the next `times` updates of `key` fail with a conflict.
    pub async fn inject_conflict(&self, key: &ResourceKey, times: u32) {
        self.inner
            .write()
            .await
            .pending_conflicts
            .insert(key.clone(), times);
    }

    pub async fn set_unavailable(&self, kind: ResourceKind, unavailable: bool) {
        let mut w = self.inner.write().await;
        if unavailable {
            w.unavailable.insert(kind);
        } else {
            w.unavailable.remove(&kind);
        }
    }

    /// Deletes of `key` only mark the object as deleting until released.
    pub async fn hold_deletion(&self, key: &ResourceKey) {
        self.inner.write().await.held_deletions.insert(key.clone());
    }

    pub async fn release_deletion(&self, key: &ResourceKey) {
        let mut w = self.inner.write().await;
        w.held_deletions.remove(key);
        if w.objects.get(key).map(|r| r.deleting).unwrap_or(false) {
            w.objects.remove(key);
        }
    }

    /// Overwrite the status of an object, as a controller in the store would.
    pub async fn set_status(&self, key: &ResourceKey, status: Value) -> bool {
        let mut w = self.inner.write().await;
        let version = w.bump();
        match w.objects.get_mut(key) {
            Some(obj) => {
                obj.status = status;
                obj.resource_version = Some(version);
                true
            }
            None => false,
        }
    }

    pub async fn journal(&self) -> Vec<StoreOp> {
        self.inner.read().await.journal.clone()
    }

    pub async fn writes(&self) -> Vec<StoreOp> {
        self.journal()
            .await
            .into_iter()
            .filter(StoreOp::is_write)
            .collect()
    }

    pub async fn clear_journal(&self) {
        self.inner.write().await.journal.clear();
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get(&self, key: &ResourceKey) -> StoreResult<Resource> {
        let mut w = self.inner.write().await;
        w.journal.push(StoreOp::Get(key.clone()));
        w.check_available(key.kind)?;
        w.objects
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn create(&self, resource: &Resource) -> StoreResult<()> {
        let key = resource.key();
        let mut w = self.inner.write().await;
        w.journal.push(StoreOp::Create(key.clone()));
        w.check_available(key.kind)?;
        if w.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }
        let mut stored = resource.clone();
        stored.resource_version = Some(w.bump());
        stored.deleting = false;
        w.objects.insert(key, stored);
        Ok(())
    }

    async fn update(&self, resource: &Resource) -> StoreResult<()> {
        let key = resource.key();
        let mut w = self.inner.write().await;
        w.journal.push(StoreOp::Update(key.clone()));
        w.check_available(key.kind)?;
        if let Some(left) = w.pending_conflicts.get_mut(&key) {
            if *left > 0 {
                *left -= 1;
                return Err(StoreError::Conflict(key.to_string()));
            }
        }
        let version = w.bump();
        let Some(current) = w.objects.get_mut(&key) else {
            return Err(StoreError::NotFound(key.to_string()));
        };
        if current.resource_version != resource.resource_version {
            return Err(StoreError::Conflict(key.to_string()));
        }
        current.labels = resource.labels.clone();
        current.owner = resource.owner.clone();
        current.spec = resource.spec.clone();
        current.resource_version = Some(version);
        Ok(())
    }

    async fn delete(&self, key: &ResourceKey) -> StoreResult<()> {
        let mut w = self.inner.write().await;
        w.journal.push(StoreOp::Delete(key.clone()));
        w.check_available(key.kind)?;
        if !w.objects.contains_key(key) {
            return Err(StoreError::NotFound(key.to_string()));
        }
        if w.held_deletions.contains(key) {
            if let Some(obj) = w.objects.get_mut(key) {
                obj.deleting = true;
            }
        } else {
            w.objects.remove(key);
        }
        Ok(())
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> StoreResult<Vec<Resource>> {
        let mut w = self.inner.write().await;
        w.journal.push(StoreOp::List(kind));
        w.check_available(kind)?;
        Ok(w.objects
            .values()
            .filter(|r| r.kind == kind)
            .filter(|r| namespace.is_none() || r.namespace.as_deref() == namespace)
            .filter(|r| r.matches_selector(selector))
            .cloned()
            .collect())
    }
}
