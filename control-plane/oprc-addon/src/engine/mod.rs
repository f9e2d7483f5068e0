pub mod converge;
pub mod error;
pub mod finalizer;
pub mod model;
pub mod observe;
pub mod orchestrator;
pub mod probe;
pub mod synth;

pub use converge::{Converged, converge};
pub use error::EngineError;
pub use finalizer::{
    ActionClass, CleanupProgress, CleanupSpec, FinalizerSet, FinalizerState,
    TokenChange, cleanup_in_flight, cleanup_side_effects, decide,
};
pub use model::{
    AbsentReason, Action, ChildResourceDescriptor, ComponentKind,
    ComponentOutcome, ComponentPlan, Desired, OwnerRef, ParentResource,
    ReconcileReport,
};
pub use observe::{ChildStatus, Observed, observe_children};
pub use orchestrator::{EngineConfig, Reconciler};
pub use probe::{EnvironmentFacts, ProbeTargets, probe};
pub use synth::Synthesizer;

// Larger unit suites live in sibling module files
#[cfg(test)]
mod orchestrator_tests;
