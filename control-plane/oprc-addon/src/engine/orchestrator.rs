use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::{FutureExt, StreamExt, stream};
use tracing::{debug, info, instrument, warn};

use super::converge::{Converged, converge};
use super::error::EngineError;
use super::finalizer::{
    ActionClass, CleanupProgress, CleanupSpec, FinalizerSet, TokenChange,
    cleanup_in_flight, cleanup_side_effects, decide,
};
use super::model::{
    Action, ComponentKind, ComponentOutcome, ComponentPlan, Desired,
    ParentResource, ReconcileReport,
};
use super::probe::{EnvironmentFacts, ProbeTargets, probe};
use super::synth::Synthesizer;
use crate::images::ImageResolver;
use crate::store::{ResourceStore, StoreError};

/// Engine knobs handed in by the caller.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Upper bound on components converged at the same time
    pub max_concurrency: usize,
    pub cleanup: CleanupSpec,
    pub probe: ProbeTargets,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            cleanup: CleanupSpec::default(),
            probe: ProbeTargets::default(),
        }
    }
}

struct Step {
    outcome: ComponentOutcome,
    change: TokenChange,
}

impl Step {
    fn keep(outcome: ComponentOutcome) -> Self {
        Self {
            outcome,
            change: TokenChange::Keep,
        }
    }
}

fn record(report: &mut ReconcileReport, step: Step) {
    if step.change.apply(&mut report.finalizers) {
        report.finalizers_changed = true;
    }
    report.outcomes.push(step.outcome);
}

/// Runs one reconciliation pass per call; holds no per-parent state.
pub struct Reconciler<S: ResourceStore> {
    store: Arc<S>,
    synth: Synthesizer,
    cfg: EngineConfig,
}

impl<S: ResourceStore> Reconciler<S> {
    pub fn new(
        store: Arc<S>,
        resolver: Arc<dyn ImageResolver>,
        cfg: EngineConfig,
    ) -> Self {
        Self {
            store,
            synth: Synthesizer::new(resolver),
            cfg,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    /// Converge every component of `parent` once.
    ///
    /// The parent is never written; the caller persists `report.finalizers`
    /// when `finalizers_changed` is set.
    #[instrument(skip_all, fields(ns = %parent.namespace, name = %parent.name))]
    pub async fn reconcile_one(&self, parent: &ParentResource) -> ReconcileReport {
        let mut report = ReconcileReport {
            finalizers: parent.finalizers.clone(),
            ..Default::default()
        };

        let env = if parent.deleting {
            EnvironmentFacts::default()
        } else {
            match probe(self.store.as_ref(), &self.cfg.probe).await {
                Ok(env) => env,
                Err(e) => {
                    warn!(error = %e, "environment probe failed; pass aborted");
                    report.errors.push(e);
                    return report;
                }
            }
        };

        let mut plans: Vec<ComponentPlan> = Vec::new();
        for (kind, planned) in self.synth.synthesize(parent, &env) {
            match planned {
                Ok(plan) => plans.push(plan),
                Err(e) => {
                    warn!(component = %kind, error = %e, "synthesis failed");
                    report.outcomes.push(ComponentOutcome::failed(
                        kind,
                        &kind.child_name(&parent.name),
                        e,
                    ));
                }
            }
        }
        // a hard dependency that could not be planned counts as failed
        let mut hard_failed: Vec<ComponentKind> = report
            .outcomes
            .iter()
            .filter(|o| o.kind.is_hard_dependency())
            .map(|o| o.kind)
            .collect();

        let (hard, rest): (Vec<_>, Vec<_>) =
            plans.into_iter().partition(|p| p.kind.is_hard_dependency());
        let forward = hard.iter().all(ComponentPlan::is_present);

        if forward {
            for plan in &hard {
                let step = self.step(parent, plan, &report.finalizers, &[]).await;
                if step.outcome.error.is_some() {
                    hard_failed.push(plan.kind);
                }
                record(&mut report, step);
            }
            let (blocked, free): (Vec<_>, Vec<_>) = rest.into_iter().partition(|p| {
                p.is_present() && p.kind.needs_issuer() && !hard_failed.is_empty()
            });
            for plan in blocked {
                let dependency = hard_failed[0];
                debug!(component = %plan.kind, %dependency, "dependency failed");
                report.outcomes.push(ComponentOutcome::failed(
                    plan.kind,
                    plan.name(),
                    EngineError::DependencyFailed {
                        component: plan.kind,
                        dependency,
                    },
                ));
            }
            self.fan_out(parent, &free, &mut report).await;
        } else {
            // teardown order: consumers go first, the issuer last
            self.fan_out(parent, &rest, &mut report).await;
            for plan in &hard {
                let step = self.step(parent, plan, &report.finalizers, &rest).await;
                record(&mut report, step);
            }
        }

        report.outcomes.sort_by_key(|o| o.kind);
        report.errors = report
            .outcomes
            .iter()
            .filter_map(|o| o.error.clone())
            .collect();
        report.ready_for_removal = parent.deleting
            && report
                .finalizers
                .component_tokens(&parent.name)
                .next()
                .is_none()
            && report.errors.is_empty()
            && !report.has_skipped();

        info!(
            outcomes = report.outcomes.len(),
            errors = report.errors.len(),
            finalizers_changed = report.finalizers_changed,
            ready_for_removal = report.ready_for_removal,
            "reconcile pass finished"
        );
        report
    }

    async fn fan_out(
        &self,
        parent: &ParentResource,
        plans: &[ComponentPlan],
        report: &mut ReconcileReport,
    ) {
        let snapshot = report.finalizers.clone();
        // boxed up front so the pass future stays Send for the controller
        let pending: Vec<BoxFuture<'_, Step>> = plans
            .iter()
            .map(|plan| self.step(parent, plan, &snapshot, &[]).boxed())
            .collect();
        let steps: Vec<Step> = stream::iter(pending)
            .buffered(self.cfg.max_concurrency.max(1))
            .collect()
            .await;
        // buffered keeps input order, so token changes land deterministically
        for step in steps {
            record(report, step);
        }
    }

    /// One component: converge, then settle its finalizer token.
    ///
    /// `consumers` is only consulted for a hard dependency being torn down:
    /// it waits while any consumer that is not desired still holds a token.
    async fn step(
        &self,
        parent: &ParentResource,
        plan: &ComponentPlan,
        finalizers: &FinalizerSet,
        consumers: &[ComponentPlan],
    ) -> Step {
        let kind = plan.kind;
        let name = plan.name();
        let class = decide(finalizers, plan);

        if class != ActionClass::Apply && kind.is_hard_dependency() {
            let waiting: Vec<&str> = finalizers
                .component_tokens(&parent.name)
                .filter(|(k, _)| k.needs_issuer())
                .filter(|(k, _)| {
                    !consumers.iter().any(|p| p.kind == *k && p.is_present())
                })
                .map(|(_, t)| t)
                .collect();
            if !waiting.is_empty() {
                return Step::keep(
                    ComponentOutcome::new(kind, name, Action::Skipped).with_message(
                        format!("waiting for {} to tear down", waiting.join(", ")),
                    ),
                );
            }
        }

        let converged = match converge(self.store.as_ref(), plan).await {
            Ok(c) => c,
            Err(e) => {
                warn!(component = %kind, error = %e, "convergence failed");
                return Step::keep(ComponentOutcome::failed(kind, name, e));
            }
        };
        let mut outcome = ComponentOutcome::new(kind, name, converged.action);
        if let Desired::Absent(reason) = &plan.desired {
            outcome = outcome.with_message(reason.to_string());
        }

        match class {
            ActionClass::Apply => {
                let change = if converged.exists && !finalizers.contains(name) {
                    TokenChange::Add(name.to_string())
                } else {
                    TokenChange::Keep
                };
                Step { outcome, change }
            }
            ActionClass::Sweep => self.sweep(parent, plan, outcome, converged).await,
            ActionClass::Teardown => {
                self.teardown(parent, plan, outcome, converged.exists).await
            }
        }
    }

    /// No token guards the child, yet it may still leave side effects behind:
    /// a child just deleted or still terminating, or a cleanup job left by an
    /// earlier sweep.
    async fn sweep(
        &self,
        parent: &ParentResource,
        plan: &ComponentPlan,
        outcome: ComponentOutcome,
        converged: Converged,
    ) -> Step {
        let (kind, name) = (plan.kind, plan.name());
        let untracked = match converged.action {
            Action::Deleted => true,
            Action::Skipped => converged.exists,
            Action::NoOp => {
                match cleanup_in_flight(self.store.as_ref(), parent, kind).await {
                    Ok(found) => found,
                    Err(e) => {
                        return Step::keep(ComponentOutcome::failed(kind, name, e));
                    }
                }
            }
            Action::Created | Action::Updated => false,
        };
        if !untracked {
            return Step::keep(outcome);
        }
        debug!(component = %kind, "untracked child; running teardown");
        let mut step = self.teardown(parent, plan, outcome, converged.exists).await;
        // adopt the token so an interrupted cleanup resumes; a terminating
        // parent cannot take new finalizers
        if step.change == TokenChange::Keep
            && step.outcome.action == Action::Skipped
            && !parent.deleting
        {
            step.change = TokenChange::Add(name.to_string());
        }
        step
    }

    async fn teardown(
        &self,
        parent: &ParentResource,
        plan: &ComponentPlan,
        outcome: ComponentOutcome,
        exists: bool,
    ) -> Step {
        let (kind, name) = (plan.kind, plan.name());
        if exists {
            return Step::keep(outcome);
        }
        // a delete can be accepted while the object lingers
        match self.store.get(&plan.key).await {
            Err(StoreError::NotFound(_)) => {}
            Ok(_) => {
                return Step::keep(
                    ComponentOutcome::new(kind, name, Action::Skipped)
                        .with_message("waiting for child to terminate"),
                );
            }
            Err(e) => {
                return Step::keep(ComponentOutcome::failed(
                    kind,
                    name,
                    EngineError::store("get", &plan.key, e),
                ));
            }
        }
        match cleanup_side_effects(self.store.as_ref(), parent, plan, &self.cfg.cleanup)
            .await
        {
            Ok(CleanupProgress::Complete) => {
                info!(component = %kind, token = %name, "teardown complete");
                Step {
                    outcome,
                    change: TokenChange::Remove(name.to_string()),
                }
            }
            Ok(CleanupProgress::Pending(msg)) => Step::keep(
                ComponentOutcome::new(kind, name, Action::Skipped).with_message(msg),
            ),
            Err(e) => {
                warn!(component = %kind, error = %e, "teardown cleanup failed");
                Step::keep(ComponentOutcome::failed(kind, name, e))
            }
        }
    }
}
