use std::collections::BTreeMap;
use std::fmt;

use kube::{Resource as _, ResourceExt};
use serde_json::Value;

use super::error::EngineError;
use super::finalizer::FinalizerSet;
use crate::crd::{AddonConfig, AddonConfigSpec};
use crate::store::{Resource, ResourceKey, ResourceKind, Selector};

pub const API_GROUP: &str = "addon.oaas.io";
pub const API_VERSION: &str = "addon.oaas.io/v1alpha1";
pub const PARENT_KIND: &str = "AddonConfig";
pub const OWNER_LABEL: &str = "addon.oaas.io/owner";
pub const COMPONENT_LABEL: &str = "addon.oaas.io/component";

/// Closed set of components an `AddonConfig` manages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentKind {
    CertManager,
    ConnectionManager,
    SearchCollector,
    ServiceRegistry,
    Tiller,
    TopologyCollector,
    WorkManager,
    PolicyController,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 8] = [
        ComponentKind::CertManager,
        ComponentKind::ConnectionManager,
        ComponentKind::SearchCollector,
        ComponentKind::ServiceRegistry,
        ComponentKind::Tiller,
        ComponentKind::TopologyCollector,
        ComponentKind::WorkManager,
        ComponentKind::PolicyController,
    ];

    pub fn kind(&self) -> &'static str {
        match self {
            ComponentKind::CertManager => "CertManager",
            ComponentKind::ConnectionManager => "ConnectionManager",
            ComponentKind::SearchCollector => "SearchCollector",
            ComponentKind::ServiceRegistry => "ServiceRegistry",
            ComponentKind::Tiller => "Tiller",
            ComponentKind::TopologyCollector => "TopologyCollector",
            ComponentKind::WorkManager => "WorkManager",
            ComponentKind::PolicyController => "PolicyController",
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            ComponentKind::CertManager => "certmanagers",
            ComponentKind::ConnectionManager => "connectionmanagers",
            ComponentKind::SearchCollector => "searchcollectors",
            ComponentKind::ServiceRegistry => "serviceregistries",
            ComponentKind::Tiller => "tillers",
            ComponentKind::TopologyCollector => "topologycollectors",
            ComponentKind::WorkManager => "workmanagers",
            ComponentKind::PolicyController => "policycontrollers",
        }
    }

    /// Fixed suffix appended to the parent name to form the child name.
    pub fn suffix(&self) -> &'static str {
        match self {
            ComponentKind::CertManager => "certmgr",
            ComponentKind::ConnectionManager => "connmgr",
            ComponentKind::SearchCollector => "search",
            ComponentKind::ServiceRegistry => "svcreg",
            ComponentKind::Tiller => "tiller",
            ComponentKind::TopologyCollector => "topology",
            ComponentKind::WorkManager => "workmgr",
            ComponentKind::PolicyController => "policyctrl",
        }
    }

    /// Key used against the image resolution table.
    pub fn image_name(&self) -> &'static str {
        match self {
            ComponentKind::CertManager => "cert-manager-controller",
            ComponentKind::ConnectionManager => "connection-manager",
            ComponentKind::SearchCollector => "search-collector",
            ComponentKind::ServiceRegistry => "service-registry",
            ComponentKind::Tiller => "tiller",
            ComponentKind::TopologyCollector => "topology-collector",
            ComponentKind::WorkManager => "work-manager",
            ComponentKind::PolicyController => "policy-controller",
        }
    }

    pub fn child_name(&self, parent: &str) -> String {
        format!("{}-{}", parent, self.suffix())
    }

    /// Components that mount certificates from the shared self-signed issuer.
    pub fn needs_issuer(&self) -> bool {
        matches!(
            self,
            ComponentKind::ConnectionManager
                | ComponentKind::SearchCollector
                | ComponentKind::Tiller
        )
    }

    /// Components whose failure blocks every component that depends on them.
    pub fn is_hard_dependency(&self) -> bool {
        matches!(self, ComponentKind::CertManager)
    }

    /// Secrets generated on behalf of the child that must be removed on teardown.
    pub fn auxiliary_secrets(&self, child: &str) -> Vec<String> {
        match self {
            ComponentKind::CertManager => vec![
                format!("{}-ca", child),
                format!("{}-webhook-tls", child),
            ],
            ComponentKind::ConnectionManager => {
                vec![format!("{}-hub-kubeconfig", child)]
            }
            ComponentKind::SearchCollector | ComponentKind::Tiller => {
                vec![format!("{}-client-certs", child)]
            }
            _ => vec![],
        }
    }

    /// Whether teardown must observe a successful one-shot cleanup job.
    pub fn has_cleanup_job(&self) -> bool {
        matches!(
            self,
            ComponentKind::SearchCollector | ComponentKind::WorkManager
        )
    }

    pub fn cleanup_job_name(&self, child: &str) -> String {
        format!("{}-cleanup", child)
    }

    /// Map a finalizer token back to the component it guards.
    pub fn from_token(parent: &str, token: &str) -> Option<ComponentKind> {
        let suffix = token.strip_prefix(parent)?.strip_prefix('-')?;
        Self::ALL.into_iter().find(|k| k.suffix() == suffix)
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnerRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: Option<String>,
}

/// The slice of an `AddonConfig` the engine works with.
#[derive(Clone, Debug)]
pub struct ParentResource {
    pub name: String,
    pub namespace: String,
    pub uid: Option<String>,
    pub spec: AddonConfigSpec,
    pub finalizers: FinalizerSet,
    pub deleting: bool,
}

impl ParentResource {
    pub fn new(name: &str, namespace: &str, spec: AddonConfigSpec) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            uid: None,
            spec,
            finalizers: FinalizerSet::default(),
            deleting: false,
        }
    }

    pub fn from_object(obj: &AddonConfig) -> Self {
        Self {
            name: obj.name_any(),
            namespace: obj.namespace().unwrap_or_else(|| "default".into()),
            uid: obj.meta().uid.clone(),
            spec: obj.spec.clone(),
            finalizers: FinalizerSet::from(obj.finalizers().to_vec()),
            deleting: obj.meta().deletion_timestamp.is_some(),
        }
    }

    pub fn owner_ref(&self) -> OwnerRef {
        OwnerRef {
            api_version: API_VERSION.to_string(),
            kind: PARENT_KIND.to_string(),
            name: self.name.clone(),
            uid: self.uid.clone(),
        }
    }

    pub fn owner_selector(&self) -> Selector {
        BTreeMap::from([(OWNER_LABEL.to_string(), self.name.clone())])
    }

    pub fn child_key(&self, kind: ComponentKind) -> ResourceKey {
        ResourceKey::namespaced(
            ResourceKind::Component(kind),
            &self.namespace,
            &kind.child_name(&self.name),
        )
    }

    /// Labels stamped on every resource created for `kind`.
    pub fn child_labels(&self, kind: ComponentKind) -> BTreeMap<String, String> {
        BTreeMap::from([
            (OWNER_LABEL.to_string(), self.name.clone()),
            (COMPONENT_LABEL.to_string(), kind.suffix().to_string()),
        ])
    }
}

/// Desired state of one child; rebuilt on every pass and diffed against the store.
#[derive(Clone, Debug, PartialEq)]
pub struct ChildResourceDescriptor {
    pub kind: ComponentKind,
    pub name: String,
    pub namespace: String,
    pub spec: Value,
    pub labels: BTreeMap<String, String>,
    pub owner: OwnerRef,
}

impl ChildResourceDescriptor {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::namespaced(
            ResourceKind::Component(self.kind),
            &self.namespace,
            &self.name,
        )
    }

    pub fn to_resource(&self) -> Resource {
        Resource {
            kind: ResourceKind::Component(self.kind),
            namespace: Some(self.namespace.clone()),
            name: self.name.clone(),
            labels: self.labels.clone(),
            owner: Some(self.owner.clone()),
            spec: self.spec.clone(),
            status: Value::Null,
            resource_version: None,
            deleting: false,
        }
    }

    /// True when `observed` already carries everything this descriptor asks for.
    pub fn matches(&self, observed: &Resource) -> bool {
        observed.spec == self.spec
            && observed.owner.as_ref() == Some(&self.owner)
            && self
                .labels
                .iter()
                .all(|(k, v)| observed.labels.get(k) == Some(v))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbsentReason {
    Disabled,
    ForeignInstalled,
    ParentDeleting,
}

impl fmt::Display for AbsentReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbsentReason::Disabled => f.write_str("disabled"),
            AbsentReason::ForeignInstalled => {
                f.write_str("equivalent component already installed")
            }
            AbsentReason::ParentDeleting => f.write_str("parent is deleting"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Desired {
    Present(ChildResourceDescriptor),
    Absent(AbsentReason),
}

/// Synthesized intent for one component of one parent.
#[derive(Clone, Debug, PartialEq)]
pub struct ComponentPlan {
    pub kind: ComponentKind,
    pub key: ResourceKey,
    pub desired: Desired,
}

impl ComponentPlan {
    pub fn name(&self) -> &str {
        &self.key.name
    }

    pub fn is_present(&self) -> bool {
        matches!(self.desired, Desired::Present(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Created,
    Updated,
    Deleted,
    Skipped,
    NoOp,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Created => "created",
            Action::Updated => "updated",
            Action::Deleted => "deleted",
            Action::Skipped => "skipped",
            Action::NoOp => "no-op",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct ComponentOutcome {
    pub kind: ComponentKind,
    pub name: String,
    pub action: Action,
    pub message: Option<String>,
    pub error: Option<EngineError>,
}

impl ComponentOutcome {
    pub fn new(kind: ComponentKind, name: &str, action: Action) -> Self {
        Self {
            kind,
            name: name.to_string(),
            action,
            message: None,
            error: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn failed(kind: ComponentKind, name: &str, error: EngineError) -> Self {
        Self {
            kind,
            name: name.to_string(),
            action: Action::Skipped,
            message: Some(error.to_string()),
            error: Some(error),
        }
    }
}

/// Aggregated result of one reconciliation pass.
#[derive(Clone, Debug, Default)]
pub struct ReconcileReport {
    pub outcomes: Vec<ComponentOutcome>,
    pub errors: Vec<EngineError>,
    /// Finalizer set to persist on the parent
    pub finalizers: FinalizerSet,
    pub finalizers_changed: bool,
    /// Parent is deleting and no component token remains
    pub ready_for_removal: bool,
}

impl ReconcileReport {
    pub fn outcome(&self, kind: ComponentKind) -> Option<&ComponentOutcome> {
        self.outcomes.iter().find(|o| o.kind == kind)
    }

    pub fn has_skipped(&self) -> bool {
        self.outcomes.iter().any(|o| o.action == Action::Skipped)
    }

    /// No errors and nothing left for a later pass.
    pub fn is_converged(&self) -> bool {
        self.errors.is_empty() && !self.has_skipped()
    }
}
