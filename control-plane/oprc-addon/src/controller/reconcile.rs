use std::sync::Arc;

use chrono::Utc;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use super::events::emit_outcomes;
use super::status::{build_status, is_aborted, should_patch_status};
use super::{ControllerContext, ReconcileErr, build_obj_ref, into_internal};
use crate::config::AddonOperatorConfig;
use crate::crd::AddonConfig;
use crate::engine::{FinalizerSet, ParentResource, ReconcileReport, observe_children};

/// Requeue choice for a pass that produced no errors.
pub fn next_action(cfg: &AddonOperatorConfig, report: &ReconcileReport) -> Action {
    if report.has_skipped() {
        Action::requeue(cfg.requeue_skipped())
    } else {
        Action::requeue(cfg.resync())
    }
}

fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409)
}

/// Persist the finalizer list in one merge patch guarded by resourceVersion.
///
/// Returns false when the object moved on since it was read; the watch will
/// deliver the newer version and the tokens are recomputed from the store.
async fn persist_finalizers(
    api: &Api<AddonConfig>,
    obj: &AddonConfig,
    finalizers: &FinalizerSet,
) -> Result<bool, ReconcileErr> {
    let name = obj.name_any();
    let patch = json!({
        "metadata": {
            "resourceVersion": obj.resource_version(),
            "finalizers": finalizers.as_slice(),
        }
    });
    match api
        .patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
    {
        Ok(_) => Ok(true),
        Err(e) if is_conflict(&e) => {
            debug!(%name, "finalizer patch conflicted; retrying on next pass");
            Ok(false)
        }
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(true),
        Err(e) => Err(into_internal(e)),
    }
}

#[instrument(skip_all, fields(ns = %obj.namespace().unwrap_or_else(|| "default".into()), name = %obj.name_any()))]
pub async fn reconcile(
    obj: Arc<AddonConfig>,
    ctx: Arc<ControllerContext>,
) -> Result<Action, ReconcileErr> {
    let parent = ParentResource::from_object(&obj);
    let ns = parent.namespace.clone();
    let name = parent.name.clone();
    let uid = obj.meta().uid.clone();
    let api: Api<AddonConfig> = Api::namespaced(ctx.client.clone(), &ns);

    let report = ctx.reconciler.reconcile_one(&parent).await;

    if report.finalizers_changed {
        info!(%ns, %name, finalizers = ?report.finalizers.as_slice(), "reconcile: persisting finalizers");
        if !persist_finalizers(&api, &obj, &report.finalizers).await? {
            return Ok(Action::requeue(ctx.cfg.requeue_skipped()));
        }
    }

    if let Some(recorder) = &ctx.recorder {
        let obj_ref = build_obj_ref(&ns, &name, uid.as_deref());
        emit_outcomes(recorder, &obj_ref, &report).await;
    }

    if report.ready_for_removal {
        info!(%ns, %name, "reconcile: all components torn down");
        return Ok(Action::await_change());
    }

    let observed = if ctx.cfg.component_status_enabled() && !parent.deleting {
        Some(observe_children(ctx.reconciler.store().as_ref(), &parent).await)
    } else {
        None
    };
    let mut status = build_status(
        &report,
        observed.as_ref(),
        obj.meta().generation,
        parent.deleting,
        Utc::now().to_rfc3339(),
    );
    if is_aborted(&report) {
        // keep the last known component list
        status.components = obj.status.as_ref().and_then(|s| s.components.clone());
    }
    if should_patch_status(obj.status.as_ref(), &status) {
        let patch = json!({ "status": status });
        if let Err(e) = api
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            // status is informational; the next pass rewrites it
            warn!(%ns, %name, error = %e, "reconcile: status patch failed");
        }
    }

    if !report.errors.is_empty() {
        let summary = report
            .errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ReconcileErr::Components {
            count: report.errors.len(),
            summary,
        });
    }
    Ok(next_action(&ctx.cfg, &report))
}
