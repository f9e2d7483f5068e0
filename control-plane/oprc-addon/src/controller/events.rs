use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder};
use tracing::debug;

use crate::engine::{Action, ReconcileReport};

pub const REASON_CREATED: &str = "ComponentCreated";
pub const REASON_UPDATED: &str = "ComponentUpdated";
pub const REASON_DELETED: &str = "ComponentDeleted";
pub const REASON_FAILED: &str = "ComponentFailed";

pub async fn emit_event(
    recorder: &Recorder,
    obj_ref: &ObjectReference,
    type_: EventType,
    reason: &str,
    action: &str,
    note: Option<String>,
) {
    if let Err(e) = recorder
        .publish(
            &Event {
                type_,
                reason: reason.into(),
                note,
                action: action.into(),
                secondary: None,
            },
            obj_ref,
        )
        .await
    {
        debug!(error = %e, %reason, "event not published");
    }
}

/// (type, reason, action) for an outcome worth an event; no-ops and
/// quiet skips are not.
pub fn event_for(
    action: Action,
    failed: bool,
) -> Option<(EventType, &'static str, &'static str)> {
    if failed {
        return Some((EventType::Warning, REASON_FAILED, "Reconcile"));
    }
    match action {
        Action::Created => Some((EventType::Normal, REASON_CREATED, "Create")),
        Action::Updated => Some((EventType::Normal, REASON_UPDATED, "Update")),
        Action::Deleted => Some((EventType::Normal, REASON_DELETED, "Delete")),
        Action::Skipped | Action::NoOp => None,
    }
}

pub async fn emit_outcomes(
    recorder: &Recorder,
    obj_ref: &ObjectReference,
    report: &ReconcileReport,
) {
    for o in &report.outcomes {
        let Some((type_, reason, action)) = event_for(o.action, o.error.is_some())
        else {
            continue;
        };
        let note = match &o.message {
            Some(msg) => format!("{} {}: {}", o.kind, o.name, msg),
            None => format!("{} {}", o.kind, o.name),
        };
        emit_event(recorder, obj_ref, type_, reason, action, Some(note)).await;
    }
}
