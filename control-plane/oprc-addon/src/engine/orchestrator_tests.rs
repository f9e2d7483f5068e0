#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use crate::crd::{AddonConfigSpec, ComponentSpec};
    use crate::engine::{
        Action, ComponentKind, EngineConfig, EngineError, ParentResource,
        ReconcileReport, Reconciler,
    };
    use crate::images::StaticImageTable;
    use crate::store::{
        MemoryStore, Resource, ResourceKey, ResourceKind, ResourceStore, StoreOp,
    };

    fn reconciler(store: &MemoryStore, cfg: EngineConfig) -> Reconciler<MemoryStore> {
        Reconciler::new(
            Arc::new(store.clone()),
            Arc::new(StaticImageTable::builtin()),
            cfg,
        )
    }

    fn enabled() -> ComponentSpec {
        ComponentSpec {
            enabled: true,
            image: None,
        }
    }

    fn parent(configure: impl FnOnce(&mut AddonConfigSpec)) -> ParentResource {
        let mut spec = AddonConfigSpec {
            cluster_name: "c1".into(),
            cluster_namespace: "c1".into(),
            version: "2.1.0".into(),
            ..Default::default()
        };
        configure(&mut spec);
        ParentResource::new("c1", "ns1", spec)
    }

    fn tokens(p: &ParentResource) -> Vec<String> {
        p.finalizers.iter().map(String::from).collect()
    }

    fn secret(name: &str) -> Resource {
        Resource {
            kind: ResourceKind::Secret,
            namespace: Some("ns1".into()),
            name: name.into(),
            labels: Default::default(),
            owner: None,
            spec: json!({}),
            status: serde_json::Value::Null,
            resource_version: None,
            deleting: false,
        }
    }

    fn assert_send<T: Send>(_: &T) {}

    fn pass_is_send<S: ResourceStore + 'static>(r: &Reconciler<S>, p: &ParentResource) {
        assert_send(&r.reconcile_one(p));
    }

    #[test]
    fn reconcile_pass_future_is_send() {
        let store = MemoryStore::new();
        let r = reconciler(&store, EngineConfig::default());
        pass_is_send(&r, &parent(|s| s.tiller = enabled()));
    }

    #[tokio::test]
    async fn cert_manager_goes_first_and_tokens_are_ordered() {
        let store = MemoryStore::new();
        let r = reconciler(&store, EngineConfig::default());
        let mut p = parent(|s| {
            s.tiller = enabled();
            s.search_collector = enabled();
            s.work_manager.enabled = true;
        });

        let report = r.reconcile_one(&p).await;
        assert!(report.errors.is_empty(), "{:?}", report.errors);
        assert!(report.finalizers_changed);
        p.finalizers = report.finalizers;
        assert_eq!(
            tokens(&p),
            vec!["c1-certmgr", "c1-search", "c1-tiller", "c1-workmgr"]
        );

        let writes = store.writes().await;
        assert_eq!(
            writes[0],
            StoreOp::Create(p.child_key(ComponentKind::CertManager))
        );
        assert_eq!(writes.len(), 4);
    }

    #[tokio::test]
    async fn concurrency_limit_does_not_change_the_result() {
        let serial = MemoryStore::new();
        let wide = MemoryStore::new();
        let p = parent(|s| {
            s.tiller = enabled();
            s.connection_manager = enabled();
            s.policy_controller = enabled();
            s.service_registry.enabled = true;
            s.topology_collector.enabled = true;
        });
        let a = reconciler(
            &serial,
            EngineConfig {
                max_concurrency: 1,
                ..Default::default()
            },
        )
        .reconcile_one(&p)
        .await;
        let b = reconciler(
            &wide,
            EngineConfig {
                max_concurrency: 16,
                ..Default::default()
            },
        )
        .reconcile_one(&p)
        .await;
        assert_eq!(a.finalizers, b.finalizers);
        let actions = |r: &ReconcileReport| {
            r.outcomes.iter().map(|o| (o.kind, o.action)).collect::<Vec<_>>()
        };
        assert_eq!(actions(&a), actions(&b));
    }

    #[tokio::test]
    async fn failed_cert_manager_blocks_only_present_consumers() {
        let store = MemoryStore::new();
        let r = reconciler(&store, EngineConfig::default());
        let p = parent(|s| {
            s.cert_manager.image = Some("broken:".into());
            s.search_collector = enabled();
            s.work_manager.enabled = true;
        });

        let report = r.reconcile_one(&p).await;
        assert_eq!(report.errors.len(), 2, "{:?}", report.errors);
        assert!(report.errors.contains(&EngineError::DependencyFailed {
            component: ComponentKind::SearchCollector,
            dependency: ComponentKind::CertManager,
        }));
        let search = report.outcome(ComponentKind::SearchCollector).unwrap();
        assert_eq!(search.action, Action::Skipped);
        assert!(!store.contains(&p.child_key(ComponentKind::SearchCollector)).await);

        // independent components still converge
        let work = report.outcome(ComponentKind::WorkManager).unwrap();
        assert_eq!(work.action, Action::Created);
        assert!(report.finalizers.contains("c1-workmgr"));
        assert!(!report.finalizers.contains("c1-search"));
        // a disabled consumer is not reported as blocked
        let tiller = report.outcome(ComponentKind::Tiller).unwrap();
        assert_eq!(tiller.action, Action::NoOp);
        assert!(tiller.error.is_none());
    }

    #[tokio::test]
    async fn cert_manager_store_failure_is_a_dependency_failure() {
        let store = MemoryStore::new();
        store
            .set_unavailable(ResourceKind::Component(ComponentKind::CertManager), true)
            .await;
        let r = reconciler(&store, EngineConfig::default());
        let p = parent(|s| {
            s.tiller = enabled();
            s.policy_controller = enabled();
        });
        let report = r.reconcile_one(&p).await;
        assert!(matches!(
            report.outcome(ComponentKind::CertManager).unwrap().error,
            Some(EngineError::Store { .. })
        ));
        assert!(matches!(
            report.outcome(ComponentKind::Tiller).unwrap().error,
            Some(EngineError::DependencyFailed { .. })
        ));
        assert_eq!(
            report.outcome(ComponentKind::PolicyController).unwrap().action,
            Action::Created
        );
        assert!(!report.ready_for_removal);
    }

    #[tokio::test]
    async fn probe_failure_aborts_with_finalizers_untouched() {
        let store = MemoryStore::new();
        let r = reconciler(&store, EngineConfig::default());
        let mut p = parent(|s| s.tiller = enabled());
        p.finalizers.insert("c1-tiller");
        store.set_unavailable(ResourceKind::Deployment, true).await;

        let report = r.reconcile_one(&p).await;
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(report.errors[0], EngineError::Probe { .. }));
        assert!(report.outcomes.is_empty());
        assert!(!report.finalizers_changed);
        assert_eq!(report.finalizers, p.finalizers);
        assert!(store.writes().await.is_empty());
    }

    #[tokio::test]
    async fn probes_are_skipped_while_deleting() {
        let store = MemoryStore::new();
        store.set_unavailable(ResourceKind::Deployment, true).await;
        let r = reconciler(&store, EngineConfig::default());
        let mut p = parent(|_| {});
        p.deleting = true;
        let report = r.reconcile_one(&p).await;
        assert!(report.errors.is_empty());
        assert!(report.ready_for_removal);
    }

    #[tokio::test]
    async fn cert_manager_waits_for_consumers_on_deletion() {
        let store = MemoryStore::new();
        let r = reconciler(&store, EngineConfig::default());
        let mut p = parent(|s| {
            s.tiller = enabled();
            s.search_collector = enabled();
        });
        p.finalizers = r.reconcile_one(&p).await.finalizers;
        assert_eq!(tokens(&p), vec!["c1-certmgr", "c1-search", "c1-tiller"]);

        p.deleting = true;
        let report = r.reconcile_one(&p).await;
        assert!(report.errors.is_empty(), "{:?}", report.errors);
        let certmgr = report.outcome(ComponentKind::CertManager).unwrap();
        assert_eq!(certmgr.action, Action::Skipped);
        assert!(store.contains(&p.child_key(ComponentKind::CertManager)).await);
        // tiller has nothing pending; search waits on its cleanup job
        assert_eq!(
            report.outcome(ComponentKind::Tiller).unwrap().action,
            Action::Deleted
        );
        assert_eq!(
            report.outcome(ComponentKind::SearchCollector).unwrap().action,
            Action::Skipped
        );
        assert!(!report.ready_for_removal);
        p.finalizers = report.finalizers;
        assert_eq!(tokens(&p), vec!["c1-certmgr", "c1-search"]);

        let job = ResourceKey::namespaced(ResourceKind::Job, "ns1", "c1-search-cleanup");
        assert!(store.set_status(&job, json!({"succeeded": 1})).await);

        let report = r.reconcile_one(&p).await;
        assert!(report.errors.is_empty(), "{:?}", report.errors);
        assert_eq!(
            report.outcome(ComponentKind::CertManager).unwrap().action,
            Action::Deleted
        );
        assert!(report.finalizers.is_empty());
        assert!(report.ready_for_removal);
        assert!(!store.contains(&job).await);
    }

    #[tokio::test]
    async fn non_component_finalizers_are_preserved() {
        let store = MemoryStore::new();
        let r = reconciler(&store, EngineConfig::default());
        let mut p = parent(|s| s.policy_controller = enabled());
        p.finalizers.insert("oaas.io/protect");
        let report = r.reconcile_one(&p).await;
        assert_eq!(
            report.finalizers.as_slice(),
            &["oaas.io/protect".to_string(), "c1-policyctrl".to_string()]
        );

        p.finalizers = report.finalizers;
        p.deleting = true;
        let report = r.reconcile_one(&p).await;
        assert_eq!(report.finalizers.as_slice(), &["oaas.io/protect".to_string()]);
        // only component tokens gate removal
        assert!(report.ready_for_removal);
    }

    #[tokio::test]
    async fn untracked_child_is_cleaned_up_before_it_is_forgotten() {
        let store = MemoryStore::new();
        let r = reconciler(&store, EngineConfig::default());
        let mut p = parent(|s| s.search_collector = enabled());
        // children created, but the token update never reached the parent
        let lost = r.reconcile_one(&p).await;
        assert!(lost.finalizers.contains("c1-search"));
        let certs = ResourceKey::namespaced(ResourceKind::Secret, "ns1", "c1-search-client-certs");
        store.insert(secret("c1-search-client-certs")).await;

        p.spec.search_collector.enabled = false;
        let report = r.reconcile_one(&p).await;
        assert!(report.errors.is_empty(), "{:?}", report.errors);
        let search = report.outcome(ComponentKind::SearchCollector).unwrap();
        assert_eq!(search.action, Action::Skipped);
        assert!(!store.contains(&p.child_key(ComponentKind::SearchCollector)).await);
        assert!(!store.contains(&certs).await);
        let job = ResourceKey::namespaced(ResourceKind::Job, "ns1", "c1-search-cleanup");
        assert!(store.contains(&job).await);
        // the token is adopted so the cleanup is tracked from now on
        assert!(report.finalizers_changed);
        assert!(report.finalizers.contains("c1-search"));
        // the issuer outlives its consumer
        assert_eq!(
            report.outcome(ComponentKind::CertManager).unwrap().action,
            Action::Skipped
        );
        assert!(store.contains(&p.child_key(ComponentKind::CertManager)).await);
        p.finalizers = report.finalizers;

        assert!(store.set_status(&job, json!({"succeeded": 1})).await);
        let report = r.reconcile_one(&p).await;
        assert!(report.errors.is_empty(), "{:?}", report.errors);
        assert!(report.finalizers.is_empty());
        assert!(!store.contains(&job).await);
        assert!(!store.contains(&p.child_key(ComponentKind::CertManager)).await);
    }

    #[tokio::test]
    async fn untracked_cleanup_holds_back_parent_removal() {
        let store = MemoryStore::new();
        let r = reconciler(&store, EngineConfig::default());
        let mut p = parent(|s| s.work_manager.enabled = true);
        r.reconcile_one(&p).await;

        p.deleting = true;
        let report = r.reconcile_one(&p).await;
        assert!(!store.contains(&p.child_key(ComponentKind::WorkManager)).await);
        // a terminating parent takes no new tokens
        assert!(!report.finalizers_changed);
        assert!(!report.ready_for_removal);

        let job = ResourceKey::namespaced(ResourceKind::Job, "ns1", "c1-workmgr-cleanup");
        let report = r.reconcile_one(&p).await;
        assert!(store.contains(&job).await);
        assert_eq!(
            report.outcome(ComponentKind::WorkManager).unwrap().action,
            Action::Skipped
        );
        assert!(!report.ready_for_removal);

        assert!(store.set_status(&job, json!({"succeeded": 1})).await);
        let report = r.reconcile_one(&p).await;
        assert!(!store.contains(&job).await);
        assert!(report.ready_for_removal);
    }
}
