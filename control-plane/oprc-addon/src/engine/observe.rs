use serde_json::Value;
use tracing::debug;

use super::model::{ComponentKind, ParentResource};
use crate::store::{ResourceKind, ResourceStore};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChildStatus {
    pub kind: ComponentKind,
    pub name: String,
    pub ready: bool,
    pub deleting: bool,
}

#[derive(Clone, Debug, Default)]
pub struct Observed {
    pub children: Vec<ChildStatus>,
}

impl Observed {
    pub fn child(&self, kind: ComponentKind) -> Option<&ChildStatus> {
        self.children.iter().find(|c| c.kind == kind)
    }

    pub fn all_ready(&self) -> bool {
        self.children.iter().all(|c| c.ready)
    }
}

/// `status.ready: true`, or a `Ready=True` condition.
fn is_ready(status: &Value) -> bool {
    if let Some(ready) = status.get("ready").and_then(|v| v.as_bool()) {
        return ready;
    }
    status
        .get("conditions")
        .and_then(|c| c.as_array())
        .and_then(|arr| {
            arr.iter()
                .find(|c| c.get("type").and_then(|v| v.as_str()) == Some("Ready"))
        })
        .and_then(|c| c.get("status").and_then(|v| v.as_str()))
        .map(|s| s == "True")
        .unwrap_or(false)
}

/// Snapshot of children carrying the parent's owner label. Best-effort: a kind
/// that fails to list is omitted.
#[tracing::instrument(level = "debug", skip_all, fields(ns = %parent.namespace, name = %parent.name))]
pub async fn observe_children<S: ResourceStore + ?Sized>(
    store: &S,
    parent: &ParentResource,
) -> Observed {
    let selector = parent.owner_selector();
    let mut obs = Observed::default();
    for kind in ComponentKind::ALL {
        match store
            .list(ResourceKind::Component(kind), Some(&parent.namespace), &selector)
            .await
        {
            Ok(items) => {
                obs.children.extend(items.into_iter().map(|r| ChildStatus {
                    kind,
                    ready: is_ready(&r.status),
                    deleting: r.deleting,
                    name: r.name,
                }));
            }
            Err(e) => {
                debug!(component = %kind, error = %e, "listing children failed");
            }
        }
    }
    obs
}
