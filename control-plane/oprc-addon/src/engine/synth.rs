//! Desired-state synthesis: parent spec + environment facts -> one plan per
//! component kind. Pure; the only collaborator is the image table.

use std::sync::Arc;

use serde_json::{Map, Value, json};

use super::error::EngineError;
use super::model::{
    AbsentReason, ChildResourceDescriptor, ComponentKind, ComponentPlan,
    Desired, ParentResource,
};
use super::probe::EnvironmentFacts;
use crate::crd::AddonConfigSpec;
use crate::images::{ImageRef, ImageResolver};

const DEFAULT_DNS_SUFFIX: &str = "mcm.svc";
const DEFAULT_SERVICE_TYPE: &str = "ClusterIP";
const DEFAULT_TOPOLOGY_INTERVAL_SECS: u32 = 15;

/// Intent for one component before any image is resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Intent {
    Present,
    Absent(AbsentReason),
}

fn enabled(spec: &AddonConfigSpec, kind: ComponentKind) -> bool {
    match kind {
        ComponentKind::CertManager => false,
        ComponentKind::ConnectionManager => spec.connection_manager.enabled,
        ComponentKind::SearchCollector => spec.search_collector.enabled,
        ComponentKind::ServiceRegistry => spec.service_registry.enabled,
        ComponentKind::Tiller => spec.tiller.enabled,
        ComponentKind::TopologyCollector => spec.topology_collector.enabled,
        ComponentKind::WorkManager => spec.work_manager.enabled,
        ComponentKind::PolicyController => spec.policy_controller.enabled,
    }
}

fn image_override(spec: &AddonConfigSpec, kind: ComponentKind) -> Option<&str> {
    match kind {
        ComponentKind::CertManager => spec.cert_manager.image.as_deref(),
        ComponentKind::ConnectionManager => spec.connection_manager.image.as_deref(),
        ComponentKind::SearchCollector => spec.search_collector.image.as_deref(),
        ComponentKind::ServiceRegistry => spec.service_registry.image.as_deref(),
        ComponentKind::Tiller => spec.tiller.image.as_deref(),
        ComponentKind::TopologyCollector => spec.topology_collector.image.as_deref(),
        ComponentKind::WorkManager => spec.work_manager.image.as_deref(),
        ComponentKind::PolicyController => spec.policy_controller.image.as_deref(),
    }
}

fn foreign(env: &EnvironmentFacts, kind: ComponentKind) -> bool {
    match kind {
        ComponentKind::CertManager => env.foreign_cert_manager,
        ComponentKind::SearchCollector => env.foreign_search,
        ComponentKind::Tiller => env.foreign_tiller,
        _ => false,
    }
}

fn intent(
    parent: &ParentResource,
    env: &EnvironmentFacts,
    kind: ComponentKind,
) -> Intent {
    if parent.deleting {
        return Intent::Absent(AbsentReason::ParentDeleting);
    }
    if kind == ComponentKind::CertManager {
        let consumers = ComponentKind::ALL
            .into_iter()
            .filter(|k| k.needs_issuer())
            .any(|k| intent(parent, env, k) == Intent::Present);
        if !consumers {
            return Intent::Absent(AbsentReason::Disabled);
        }
    } else if !enabled(&parent.spec, kind) {
        return Intent::Absent(AbsentReason::Disabled);
    }
    if foreign(env, kind) {
        return Intent::Absent(AbsentReason::ForeignInstalled);
    }
    Intent::Present
}

pub fn issuer_name(parent: &str) -> String {
    format!("{}-self-signed", parent)
}

/// Builds child descriptors for a parent.
#[derive(Clone)]
pub struct Synthesizer {
    resolver: Arc<dyn ImageResolver>,
}

impl Synthesizer {
    pub fn new(resolver: Arc<dyn ImageResolver>) -> Self {
        Self { resolver }
    }

    /// One entry per component kind, in `ComponentKind::ALL` order. A
    /// failure affects only its own entry.
    pub fn synthesize(
        &self,
        parent: &ParentResource,
        env: &EnvironmentFacts,
    ) -> Vec<(ComponentKind, Result<ComponentPlan, EngineError>)> {
        ComponentKind::ALL
            .into_iter()
            .map(|kind| (kind, self.plan(parent, env, kind)))
            .collect()
    }

    pub fn plan(
        &self,
        parent: &ParentResource,
        env: &EnvironmentFacts,
        kind: ComponentKind,
    ) -> Result<ComponentPlan, EngineError> {
        let key = parent.child_key(kind);
        let desired = match intent(parent, env, kind) {
            Intent::Absent(reason) => Desired::Absent(reason),
            Intent::Present => {
                let image = self.image(&parent.spec, kind)?;
                Desired::Present(ChildResourceDescriptor {
                    kind,
                    name: key.name.clone(),
                    namespace: parent.namespace.clone(),
                    spec: payload(parent, env, kind, &image),
                    labels: parent.child_labels(kind),
                    owner: parent.owner_ref(),
                })
            }
        };
        Ok(ComponentPlan { kind, key, desired })
    }

    fn image(
        &self,
        spec: &AddonConfigSpec,
        kind: ComponentKind,
    ) -> Result<ImageRef, EngineError> {
        if let Some(raw) = image_override(spec, kind) {
            return ImageRef::parse(raw).ok_or_else(|| EngineError::InvalidSpec {
                component: kind,
                message: format!("invalid image reference '{}'", raw),
            });
        }
        let resolved = self
            .resolver
            .resolve(&spec.version, kind.image_name())
            .map_err(|_| EngineError::Resolution {
                component: kind.image_name().to_string(),
                version: spec.version.clone(),
            })?;
        Ok(match spec.image_registry.as_deref() {
            Some(registry) if !registry.trim().is_empty() => {
                resolved.with_registry(registry)
            }
            _ => resolved,
        })
    }
}

fn payload(
    parent: &ParentResource,
    env: &EnvironmentFacts,
    kind: ComponentKind,
    image: &ImageRef,
) -> Value {
    let spec = &parent.spec;
    let mut body = Map::new();
    body.insert("clusterName".into(), json!(spec.cluster_name));
    body.insert("clusterNamespace".into(), json!(spec.cluster_namespace));
    body.insert("fullNameOverride".into(), json!(kind.child_name(&parent.name)));
    body.insert(
        "image".into(),
        json!({ "repository": image.repository, "tag": image.tag }),
    );
    if let Some(secret) = &spec.image_pull_secret {
        body.insert("imagePullSecret".into(), json!(secret));
    }
    if kind.needs_issuer() {
        body.insert("issuer".into(), json!(issuer_name(&parent.name)));
    }
    match kind {
        ComponentKind::CertManager => {
            body.insert("selfSignedIssuer".into(), json!(issuer_name(&parent.name)));
        }
        ComponentKind::ConnectionManager => {
            body.insert(
                "hubKubeconfigSecret".into(),
                json!(format!("{}-hub-kubeconfig", kind.child_name(&parent.name))),
            );
        }
        ComponentKind::ServiceRegistry => {
            let sr = &spec.service_registry;
            body.insert(
                "dnsSuffix".into(),
                json!(sr.dns_suffix.as_deref().unwrap_or(DEFAULT_DNS_SUFFIX)),
            );
            body.insert("plugins".into(), json!(sr.plugins));
        }
        ComponentKind::TopologyCollector => {
            body.insert(
                "updateIntervalSecs".into(),
                json!(
                    spec.topology_collector
                        .update_interval_secs
                        .unwrap_or(DEFAULT_TOPOLOGY_INTERVAL_SECS)
                ),
            );
            // Without a privileged profile the collector falls back to host networking.
            body.insert("privilegedProfile".into(), json!(env.privileged_profile));
            body.insert("hostNetwork".into(), json!(!env.privileged_profile));
        }
        ComponentKind::WorkManager => {
            body.insert(
                "serviceType".into(),
                json!(
                    spec.work_manager
                        .service_type
                        .as_deref()
                        .unwrap_or(DEFAULT_SERVICE_TYPE)
                ),
            );
            body.insert("clusterLabels".into(), json!(spec.cluster_labels));
        }
        _ => {}
    }
    Value::Object(body)
}
