use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use envconfig::Envconfig;

use crate::engine::{CleanupSpec, EngineConfig, ProbeTargets};
use crate::images::{ImageResolver, StaticImageTable};
use crate::store::{ResourceKey, ResourceKind};

#[derive(Envconfig, Clone, Debug)]
pub struct AddonOperatorConfig {
    #[envconfig(from = "OPRC_ADDON_PROFILE", default = "dev")]
    pub profile: String,

    #[envconfig(from = "HTTP_PORT", default = "8088")]
    pub http_port: u16,

    /// Restrict the controller to one namespace; unset watches all namespaces
    /// Env: OPRC_ADDON_WATCH_NAMESPACE
    #[envconfig(from = "OPRC_ADDON_WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Periodic resync for converged parents
    #[envconfig(from = "OPRC_ADDON_RESYNC_SECS", default = "300")]
    pub resync_secs: u64,

    /// Requeue delay when a pass left components skipped (conflicts, pending cleanup)
    #[envconfig(from = "OPRC_ADDON_REQUEUE_SKIPPED_SECS", default = "10")]
    pub requeue_skipped_secs: u64,

    #[envconfig(from = "OPRC_ADDON_ERROR_REQUEUE_SECS", default = "30")]
    pub error_requeue_secs: u64,

    #[envconfig(nested)]
    pub features: FeaturesConfig,

    #[envconfig(nested)]
    pub probe: ProbeConfig,

    #[envconfig(nested)]
    pub engine: EngineTuning,
}

#[derive(Envconfig, Clone, Debug, Default)]
pub struct FeaturesConfig {
    /// If Some, env explicitly set; otherwise, profile defaults apply
    #[envconfig(from = "OPRC_ADDON_FEATURES_EVENTS")]
    pub events: Option<bool>,
    /// Report per-component readiness in status (extra list calls per pass)
    #[envconfig(from = "OPRC_ADDON_FEATURES_COMPONENT_STATUS")]
    pub component_status: Option<bool>,
}

/// Well-known objects probed for pre-existing installs, as `namespace/name`.
#[derive(Envconfig, Clone, Debug)]
pub struct ProbeConfig {
    #[envconfig(
        from = "OPRC_ADDON_PROBE_CERT_MANAGER",
        default = "cert-manager/cert-manager"
    )]
    pub cert_manager: String,
    #[envconfig(
        from = "OPRC_ADDON_PROBE_TILLER",
        default = "kube-system/tiller-deploy"
    )]
    pub tiller: String,
    #[envconfig(
        from = "OPRC_ADDON_PROBE_SEARCH",
        default = "open-cluster-management/search-collector"
    )]
    pub search: String,
    /// Cluster-scoped SecurityContextConstraints name
    #[envconfig(from = "OPRC_ADDON_PROBE_PRIVILEGED_SCC", default = "privileged")]
    pub privileged_scc: String,
}

#[derive(Envconfig, Clone, Debug)]
pub struct EngineTuning {
    #[envconfig(from = "OPRC_ADDON_MAX_CONCURRENCY", default = "4")]
    pub max_concurrency: usize,
    #[envconfig(
        from = "OPRC_ADDON_CLEANUP_IMAGE",
        default = "quay.io/oaas/addon-cleanup:latest"
    )]
    pub cleanup_image: String,
    #[envconfig(from = "OPRC_ADDON_CLEANUP_BACKOFF_LIMIT", default = "3")]
    pub cleanup_backoff_limit: i32,
    #[envconfig(from = "OPRC_ADDON_CLEANUP_SERVICE_ACCOUNT")]
    pub cleanup_service_account: Option<String>,
    /// YAML version table replacing the built-in one
    /// Env: OPRC_ADDON_IMAGE_TABLE
    #[envconfig(from = "OPRC_ADDON_IMAGE_TABLE")]
    pub image_table: Option<String>,
}

fn deployment_target(raw: &str) -> anyhow::Result<ResourceKey> {
    match raw.split_once('/') {
        Some((ns, name)) if !ns.is_empty() && !name.is_empty() => {
            Ok(ResourceKey::namespaced(ResourceKind::Deployment, ns, name))
        }
        _ => bail!("probe target '{}' must be namespace/name", raw),
    }
}

impl AddonOperatorConfig {
    /// Apply profile → defaults mapping, while respecting explicit env overrides.
    ///
    /// Rules:
    /// - dev: events=false, component_status=true
    /// - edge: events=true, component_status=false
    /// - full: events=true, component_status=true
    pub fn apply_profile_defaults(mut self) -> Self {
        let (def_events, def_component_status) = match self.profile.as_str() {
            "edge" => (true, false),
            "full" | "prod" | "production" => (true, true),
            _ /* dev */ => (false, true),
        };

        if self.features.events.is_none() {
            self.features.events = Some(def_events);
        }
        if self.features.component_status.is_none() {
            self.features.component_status = Some(def_component_status);
        }
        self
    }

    pub fn events_enabled(&self) -> bool {
        self.features.events.unwrap_or(false)
    }

    pub fn component_status_enabled(&self) -> bool {
        self.features.component_status.unwrap_or(false)
    }

    pub fn resync(&self) -> Duration {
        Duration::from_secs(self.resync_secs)
    }

    pub fn requeue_skipped(&self) -> Duration {
        Duration::from_secs(self.requeue_skipped_secs)
    }

    pub fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.error_requeue_secs)
    }

    pub fn to_engine_config(&self) -> anyhow::Result<EngineConfig> {
        if self.engine.max_concurrency == 0 {
            bail!("OPRC_ADDON_MAX_CONCURRENCY must be at least 1");
        }
        Ok(EngineConfig {
            max_concurrency: self.engine.max_concurrency,
            cleanup: CleanupSpec {
                image: self.engine.cleanup_image.clone(),
                backoff_limit: self.engine.cleanup_backoff_limit,
                service_account: self.engine.cleanup_service_account.clone(),
            },
            probe: ProbeTargets {
                cert_manager: deployment_target(&self.probe.cert_manager)?,
                tiller: deployment_target(&self.probe.tiller)?,
                search: deployment_target(&self.probe.search)?,
                privileged_profile: ResourceKey::cluster(
                    ResourceKind::SecurityContextConstraints,
                    &self.probe.privileged_scc,
                ),
            },
        })
    }

    pub fn image_resolver(&self) -> anyhow::Result<Arc<dyn ImageResolver>> {
        match &self.engine.image_table {
            Some(path) => {
                let table = StaticImageTable::load(path)
                    .with_context(|| format!("loading image table {}", path))?;
                Ok(Arc::new(table))
            }
            None => Ok(Arc::new(StaticImageTable::builtin())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(profile: &str) -> AddonOperatorConfig {
        AddonOperatorConfig {
            profile: profile.to_string(),
            http_port: 8088,
            watch_namespace: None,
            resync_secs: 300,
            requeue_skipped_secs: 10,
            error_requeue_secs: 30,
            features: FeaturesConfig::default(),
            probe: ProbeConfig {
                cert_manager: "cert-manager/cert-manager".into(),
                tiller: "kube-system/tiller-deploy".into(),
                search: "open-cluster-management/search-collector".into(),
                privileged_scc: "privileged".into(),
            },
            engine: EngineTuning {
                max_concurrency: 4,
                cleanup_image: "quay.io/oaas/addon-cleanup:latest".into(),
                cleanup_backoff_limit: 3,
                cleanup_service_account: None,
                image_table: None,
            },
        }
    }

    #[test]
    fn profile_defaults_dev() {
        let cfg = base("dev").apply_profile_defaults();
        assert_eq!(cfg.features.events, Some(false));
        assert_eq!(cfg.features.component_status, Some(true));
    }

    #[test]
    fn profile_defaults_edge() {
        let cfg = base("edge").apply_profile_defaults();
        assert_eq!(cfg.features.events, Some(true));
        assert_eq!(cfg.features.component_status, Some(false));
    }

    #[test]
    fn profile_defaults_full() {
        for p in ["full", "prod", "production"] {
            let cfg = base(p).apply_profile_defaults();
            assert!(cfg.events_enabled());
            assert!(cfg.component_status_enabled());
        }
    }

    #[test]
    fn profile_defaults_respect_env_overrides() {
        let mut cfg = base("full");
        cfg.features.events = Some(false); // explicitly disabled via env
        let cfg = cfg.apply_profile_defaults();
        assert_eq!(cfg.features.events, Some(false));
        assert_eq!(cfg.features.component_status, Some(true));
    }

    #[test]
    fn engine_config_matches_defaults() {
        let engine = base("dev").to_engine_config().unwrap();
        assert_eq!(engine.max_concurrency, 4);
        assert_eq!(engine.probe, ProbeTargets::default());
        assert_eq!(engine.cleanup.backoff_limit, 3);
    }

    #[test]
    fn malformed_probe_target_is_rejected() {
        let mut cfg = base("dev");
        cfg.probe.tiller = "tiller-deploy".into();
        assert!(cfg.to_engine_config().is_err());
        let mut cfg = base("dev");
        cfg.engine.max_concurrency = 0;
        assert!(cfg.to_engine_config().is_err());
    }

    #[test]
    fn missing_image_table_file_fails() {
        let mut cfg = base("dev");
        cfg.engine.image_table = Some("/nonexistent/images.yaml".into());
        assert!(cfg.image_resolver().is_err());
        assert!(base("dev").image_resolver().is_ok());
    }
}
