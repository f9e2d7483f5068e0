use tracing::{debug, info};

use super::error::EngineError;
use super::model::{Action, ComponentPlan, Desired};
use crate::store::{ResourceStore, StoreError};

/// Result of converging one child against the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Converged {
    pub action: Action,
    /// The child is known to exist after this step (token may be recorded)
    pub exists: bool,
}

impl Converged {
    fn new(action: Action, exists: bool) -> Self {
        Self { action, exists }
    }
}

/// Drive the store towards `plan` with a single get plus at most one write.
///
/// Benign signals are absorbed: AlreadyExists on create counts as created,
/// an update conflict or a child that vanished mid-update is skipped until
/// the next pass, NotFound on delete counts as deleted.
pub async fn converge<S: ResourceStore + ?Sized>(
    store: &S,
    plan: &ComponentPlan,
) -> Result<Converged, EngineError> {
    let key = &plan.key;
    let observed = match store.get(key).await {
        Ok(found) => Some(found),
        Err(StoreError::NotFound(_)) => None,
        Err(e) => return Err(EngineError::store("get", key, e)),
    };

    match (observed, &plan.desired) {
        (None, Desired::Absent(_)) => Ok(Converged::new(Action::NoOp, false)),
        (None, Desired::Present(desc)) => {
            match store.create(&desc.to_resource()).await {
                Ok(()) => {
                    info!(%key, "child created");
                }
                Err(StoreError::AlreadyExists(_)) => {
                    debug!(%key, "child appeared concurrently");
                }
                Err(e) => return Err(EngineError::store("create", key, e)),
            }
            Ok(Converged::new(Action::Created, true))
        }
        (Some(found), _) if found.deleting => {
            debug!(%key, "child is terminating");
            Ok(Converged::new(Action::Skipped, true))
        }
        (Some(found), Desired::Present(desc)) => {
            if desc.matches(&found) {
                return Ok(Converged::new(Action::NoOp, true));
            }
            let mut next = desc.to_resource();
            // keep foreign labels, ours win on collision
            let mut labels = found.labels.clone();
            labels.extend(next.labels);
            next.labels = labels;
            next.resource_version = found.resource_version.clone();
            match store.update(&next).await {
                Ok(()) => {
                    info!(%key, "child updated");
                    Ok(Converged::new(Action::Updated, true))
                }
                Err(StoreError::Conflict(_)) => {
                    debug!(%key, "update conflict, retry next pass");
                    Ok(Converged::new(Action::Skipped, true))
                }
                Err(StoreError::NotFound(_)) => {
                    debug!(%key, "child vanished during update");
                    Ok(Converged::new(Action::Skipped, false))
                }
                Err(e) => Err(EngineError::store("update", key, e)),
            }
        }
        (Some(_), Desired::Absent(reason)) => {
            match store.delete(key).await {
                Ok(()) | Err(StoreError::NotFound(_)) => {
                    info!(%key, %reason, "child deleted");
                    Ok(Converged::new(Action::Deleted, false))
                }
                Err(e) => Err(EngineError::store("delete", key, e)),
            }
        }
    }
}
