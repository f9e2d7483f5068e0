use super::model::ComponentKind;
use crate::store::{ResourceKey, StoreError};

/// Errors that survive the convergence executor.
///
/// Not-found, conflict and already-exists never show up here: the executor
/// turns them into `created`/`skipped`/`deleted` outcomes.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("no image for component {component} at version {version}")]
    Resolution { component: String, version: String },

    #[error("invalid specification for {component}: {message}")]
    InvalidSpec {
        component: ComponentKind,
        message: String,
    },

    #[error("store failure during {op} of {key}: {message}")]
    Store {
        op: &'static str,
        key: String,
        message: String,
    },

    #[error("environment probe of {target} failed: {message}")]
    Probe { target: String, message: String },

    #[error("{component} not converged: dependency {dependency} failed")]
    DependencyFailed {
        component: ComponentKind,
        dependency: ComponentKind,
    },
}

impl EngineError {
    pub fn store(op: &'static str, key: &ResourceKey, err: StoreError) -> Self {
        EngineError::Store {
            op,
            key: key.to_string(),
            message: err.to_string(),
        }
    }
}
