pub mod events;
pub mod reconcile;
pub mod status;

use std::sync::Arc;

use futures_util::StreamExt;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::{
    Client, Resource,
    api::Api,
    runtime::{
        Controller,
        controller::Action,
        events::{Recorder, Reporter},
        watcher::Config,
    },
};
use tracing::{error, info};

use crate::config::AddonOperatorConfig;
use crate::crd::AddonConfig;
use crate::engine::Reconciler;
use crate::store::KubeStore;

pub const CONTROLLER_NAME: &str = "oprc-addon";

#[derive(thiserror::Error, Debug)]
pub enum ReconcileErr {
    #[error("internal error: {0}")]
    Internal(String),

    #[error("{count} component(s) failed: {summary}")]
    Components { count: usize, summary: String },
}

pub struct ControllerContext {
    pub client: Client,
    pub cfg: AddonOperatorConfig,
    pub reconciler: Reconciler<KubeStore>,
    /// None when event emission is disabled
    pub recorder: Option<Recorder>,
}

impl ControllerContext {
    pub fn new(client: Client, cfg: AddonOperatorConfig) -> anyhow::Result<Self> {
        let reconciler = Reconciler::new(
            Arc::new(KubeStore::new(client.clone())),
            cfg.image_resolver()?,
            cfg.to_engine_config()?,
        );
        let recorder = cfg.events_enabled().then(|| {
            Recorder::new(
                client.clone(),
                Reporter {
                    controller: CONTROLLER_NAME.into(),
                    instance: std::env::var("HOSTNAME").ok(),
                },
            )
        });
        Ok(Self {
            client,
            cfg,
            reconciler,
            recorder,
        })
    }
}

pub async fn run_controller(
    client: Client,
    cfg: AddonOperatorConfig,
) -> anyhow::Result<()> {
    let api: Api<AddonConfig> = match cfg.watch_namespace.as_deref() {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };
    let ctx = Arc::new(ControllerContext::new(client, cfg)?);
    info!(
        events = ctx.recorder.is_some(),
        max_concurrency = ctx.reconciler.config().max_concurrency,
        "addon controller starting"
    );

    Controller::new(api, Config::default())
        .run(reconcile::reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj_ref, action)) => {
                    info!(name = %obj_ref.name, "reconciled: requeue={:?}", action)
                }
                Err(e) => error!(error = ?e, "reconcile error"),
            }
        })
        .await;

    Ok(())
}

pub fn build_obj_ref(ns: &str, name: &str, uid: Option<&str>) -> ObjectReference {
    ObjectReference {
        api_version: Some(AddonConfig::api_version(&()).into_owned()),
        kind: Some(AddonConfig::kind(&()).into_owned()),
        name: Some(name.to_string()),
        namespace: Some(ns.to_string()),
        uid: uid.map(str::to_string),
        ..Default::default()
    }
}

pub(crate) fn into_internal<E: std::fmt::Display>(e: E) -> ReconcileErr {
    ReconcileErr::Internal(e.to_string())
}

fn error_policy(
    _obj: Arc<AddonConfig>,
    error: &ReconcileErr,
    ctx: Arc<ControllerContext>,
) -> Action {
    tracing::debug!(%error, "requeue after error");
    Action::requeue(ctx.cfg.error_requeue())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_reference_points_at_addon_config() {
        let r = build_obj_ref("ns1", "c1", Some("uid-1"));
        assert_eq!(r.api_version.as_deref(), Some("addon.oaas.io/v1alpha1"));
        assert_eq!(r.kind.as_deref(), Some("AddonConfig"));
        assert_eq!(r.namespace.as_deref(), Some("ns1"));
        assert_eq!(r.uid.as_deref(), Some("uid-1"));
    }
}
