use serde_json::{Value as JsonValue, json};
use tracing::{debug, trace};

use crate::crd::{
    AddonConfigStatus, ComponentStatus, Condition, ConditionStatus,
    ConditionType,
};
use crate::engine::{Action, Observed, ReconcileReport};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Progressing,
    Available,
    Degraded,
    Deleting,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Progressing => "progressing",
            Phase::Available => "available",
            Phase::Degraded => "degraded",
            Phase::Deleting => "deleting",
        }
    }
}

pub fn phase_of(
    report: &ReconcileReport,
    deleting: bool,
    observed: Option<&Observed>,
) -> Phase {
    if deleting {
        Phase::Deleting
    } else if !report.errors.is_empty() {
        Phase::Degraded
    } else if report.has_skipped() {
        Phase::Progressing
    } else if observed.map(|o| !o.all_ready()).unwrap_or(false) {
        Phase::Progressing
    } else {
        Phase::Available
    }
}

pub fn build_conditions(phase: Phase, now: &str) -> Vec<Condition> {
    let (type_, status, reason, message) = match phase {
        Phase::Progressing => (
            ConditionType::Progressing,
            ConditionStatus::True,
            "Progressing",
            "Waiting for components to converge",
        ),
        Phase::Available => (
            ConditionType::Available,
            ConditionStatus::True,
            "Converged",
            "All enabled components converged",
        ),
        Phase::Degraded => (
            ConditionType::Degraded,
            ConditionStatus::True,
            "ComponentErrors",
            "One or more components failed to converge",
        ),
        Phase::Deleting => (
            ConditionType::Progressing,
            ConditionStatus::False,
            "Deleting",
            "Tearing down components",
        ),
    };
    vec![Condition {
        type_,
        status,
        reason: Some(reason.into()),
        message: Some(message.into()),
        last_transition_time: Some(now.to_string()),
    }]
}

fn summary(report: &ReconcileReport, phase: Phase) -> String {
    if let Some(first) = report.errors.first() {
        return match report.errors.len() {
            1 => first.to_string(),
            n => format!("{} (and {} more)", first, n - 1),
        };
    }
    let pending = report
        .outcomes
        .iter()
        .filter(|o| o.action == Action::Skipped)
        .count();
    match phase {
        Phase::Deleting => format!("{} component(s) still tearing down", pending),
        _ if pending > 0 => format!("{} component(s) pending", pending),
        _ => "All components converged".to_string(),
    }
}

pub fn build_status(
    report: &ReconcileReport,
    observed: Option<&Observed>,
    generation: Option<i64>,
    deleting: bool,
    now: String,
) -> AddonConfigStatus {
    let phase = phase_of(report, deleting, observed);
    let components = report
        .outcomes
        .iter()
        .map(|o| ComponentStatus {
            kind: o.kind.to_string(),
            name: o.name.clone(),
            action: o.action.to_string(),
            ready: observed.and_then(|obs| obs.child(o.kind)).map(|c| c.ready),
            message: o.message.clone(),
        })
        .collect();
    AddonConfigStatus {
        phase: Some(phase.as_str().to_string()),
        message: Some(summary(report, phase)),
        observed_generation: generation,
        last_updated: Some(now.clone()),
        conditions: Some(build_conditions(phase, &now)),
        components: Some(components),
    }
}

/// The pass stopped before any component was planned (probe failure).
pub fn is_aborted(report: &ReconcileReport) -> bool {
    report.outcomes.is_empty() && !report.errors.is_empty()
}

pub fn should_patch_status(
    current: Option<&AddonConfigStatus>,
    desired: &AddonConfigStatus,
) -> bool {
    match current {
        None => {
            debug!("should_patch_status: no current status, patching");
            true
        }
        Some(cur) => {
            let differs = normalize_status(cur) != normalize_status(desired);
            if differs {
                debug!("should_patch_status: status differs, patching");
            } else {
                trace!("should_patch_status: status identical, skipping patch");
            }
            differs
        }
    }
}

fn normalize_status(s: &AddonConfigStatus) -> JsonValue {
    let mut v = serde_json::to_value(s).unwrap_or_else(|_| json!({}));
    if let JsonValue::Object(ref mut map) = v {
        // Drop volatile fields that change every reconcile without semantic meaning
        map.remove("last_updated");
        map.remove("observed_generation");
        if let Some(JsonValue::Array(conds)) = map.get_mut("conditions") {
            for c in conds.iter_mut() {
                if let Some(obj) = c.as_object_mut() {
                    obj.remove("lastTransitionTime");
                }
            }
        }
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ChildStatus, ComponentKind, ComponentOutcome, EngineError};

    fn report(outcomes: Vec<ComponentOutcome>) -> ReconcileReport {
        let errors = outcomes.iter().filter_map(|o| o.error.clone()).collect();
        ReconcileReport {
            outcomes,
            errors,
            ..Default::default()
        }
    }

    #[test]
    fn phase_reflects_errors_skips_and_deletion() {
        let ok = report(vec![ComponentOutcome::new(
            ComponentKind::Tiller,
            "c1-tiller",
            Action::Created,
        )]);
        assert_eq!(phase_of(&ok, false, None), Phase::Available);
        assert_eq!(phase_of(&ok, true, None), Phase::Deleting);

        let skipped = report(vec![ComponentOutcome::new(
            ComponentKind::Tiller,
            "c1-tiller",
            Action::Skipped,
        )]);
        assert_eq!(phase_of(&skipped, false, None), Phase::Progressing);

        let failed = report(vec![ComponentOutcome::failed(
            ComponentKind::Tiller,
            "c1-tiller",
            EngineError::Resolution {
                component: "tiller".into(),
                version: "9".into(),
            },
        )]);
        assert_eq!(phase_of(&failed, false, None), Phase::Degraded);
        let status = build_status(&failed, None, Some(2), false, "t0".into());
        assert_eq!(status.phase.as_deref(), Some("degraded"));
        assert!(status.message.unwrap().contains("no image for component tiller"));
    }

    #[test]
    fn unready_children_keep_progressing() {
        let ok = report(vec![]);
        let observed = Observed {
            children: vec![ChildStatus {
                kind: ComponentKind::WorkManager,
                name: "c1-workmgr".into(),
                ready: false,
                deleting: false,
            }],
        };
        assert_eq!(phase_of(&ok, false, Some(&observed)), Phase::Progressing);
    }

    #[test]
    fn timestamps_alone_do_not_trigger_a_patch() {
        let r = report(vec![ComponentOutcome::new(
            ComponentKind::WorkManager,
            "c1-workmgr",
            Action::NoOp,
        )]);
        let a = build_status(&r, None, Some(1), false, "t0".into());
        let b = build_status(&r, None, Some(2), false, "t1".into());
        assert!(!should_patch_status(Some(&a), &b));
        assert!(should_patch_status(None, &b));

        let changed = report(vec![ComponentOutcome::new(
            ComponentKind::WorkManager,
            "c1-workmgr",
            Action::Updated,
        )]);
        let c = build_status(&changed, None, Some(2), false, "t1".into());
        assert!(should_patch_status(Some(&a), &c));
    }

    #[test]
    fn aborted_pass_is_detected() {
        let mut r = ReconcileReport::default();
        assert!(!is_aborted(&r));
        r.errors.push(EngineError::Probe {
            target: "Deployment kube-system/tiller-deploy".into(),
            message: "down".into(),
        });
        assert!(is_aborted(&r));
    }
}
