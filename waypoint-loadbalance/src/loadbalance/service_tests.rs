#[cfg(test)]
mod tests {
    use crate::loadbalance::service::RoutingService;
    use crate::loadbalance::traits::{
        HealthProbe, HealthTracker, LatencyTracker, ProbeReport, ServiceRegistry,
    };
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use waypoint_core::*;

    /// 所有实例都健康，延迟固定
    struct StaticProbe {
        latency: Duration,
        calls: AtomicUsize,
    }

    impl StaticProbe {
        fn new(latency_ms: u64) -> Self {
            Self {
                latency: Duration::from_millis(latency_ms),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl HealthProbe for StaticProbe {
        async fn probe(&self, _instance: &InstanceId) -> ProbeReport {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ProbeReport::healthy(self.latency)
        }
    }

    fn create_test_config() -> Config {
        let mut services = HashMap::new();
        services.insert(
            "product-service".to_string(),
            ServiceConfig {
                instances: vec![
                    InstanceConfig {
                        address: "http://localhost:8081".to_string(),
                        healthy: true,
                    },
                    InstanceConfig {
                        address: "http://localhost:8082".to_string(),
                        healthy: true,
                    },
                    InstanceConfig {
                        address: "http://localhost:8083".to_string(),
                        healthy: false,
                    },
                ],
            },
        );
        services.insert("order-service".to_string(), ServiceConfig::default());

        Config {
            settings: GlobalSettings::default(),
            services,
        }
    }

    fn product_service() -> ServiceName {
        ServiceName::new("product-service").unwrap()
    }

    fn instance(addr: &str) -> InstanceId {
        InstanceId::new(addr).unwrap()
    }

    #[test]
    fn test_from_config_registers_in_order() {
        let service =
            RoutingService::from_config(create_test_config(), Arc::new(StaticProbe::new(10)))
                .unwrap();

        let registry = service.registry();
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.get_instances(&product_service()).unwrap(),
            vec![
                instance("http://localhost:8081"),
                instance("http://localhost:8082"),
                instance("http://localhost:8083"),
            ]
        );
        assert_eq!(
            registry.get_instances(&ServiceName::new("order-service").unwrap()),
            Some(vec![])
        );
    }

    #[test]
    fn test_from_config_applies_registration_health() {
        let service =
            RoutingService::from_config(create_test_config(), Arc::new(StaticProbe::new(10)))
                .unwrap();
        let states = service.states();

        assert!(states.is_healthy(&instance("http://localhost:8081")));
        assert!(states.is_healthy(&instance("http://localhost:8082")));
        assert!(!states.is_healthy(&instance("http://localhost:8083")));

        // 都未观测过延迟，按注册顺序选择第一个健康实例
        let instruction = service.route(&product_service(), "/api/product").unwrap();
        assert_eq!(instruction.target_address, "http://localhost:8081/api/product");
    }

    #[test]
    fn test_from_config_rejects_invalid_config() {
        let mut config = create_test_config();
        config.settings.latency_smoothing_factor = 2.0;

        let result = RoutingService::from_config(config, Arc::new(StaticProbe::new(10)));
        assert!(result.is_err());
    }

    #[test]
    fn test_route_errors() {
        let service =
            RoutingService::from_config(create_test_config(), Arc::new(StaticProbe::new(10)))
                .unwrap();

        let err = service
            .route(&ServiceName::new("order-service").unwrap(), "/api/order")
            .unwrap_err();
        assert!(matches!(err, RoutingError::ServiceUnavailable { total_instances: 0, .. }));

        let err = service
            .route(&ServiceName::new("board-service").unwrap(), "/board")
            .unwrap_err();
        assert!(matches!(err, RoutingError::ServiceNotFound { .. }));
    }

    #[tokio::test]
    async fn test_trigger_health_check_revives_instances() {
        let service =
            RoutingService::from_config(create_test_config(), Arc::new(StaticProbe::new(25)))
                .unwrap();

        let summary = service.trigger_health_check().await;
        assert_eq!(summary.total_instances, 3);
        assert_eq!(summary.healthy_instances, 3);

        let states = service.states();
        let c = instance("http://localhost:8083");
        assert!(states.is_healthy(&c));
        assert!((states.latency_estimate(&c) - 25.0).abs() < 1e-9);

        let stats = service.health_stats();
        assert!(stats[&product_service()].is_fully_healthy());
    }

    #[test]
    fn test_register_and_deregister_instance() {
        let service =
            RoutingService::from_config(create_test_config(), Arc::new(StaticProbe::new(10)))
                .unwrap();
        let order = ServiceName::new("order-service").unwrap();
        let d = instance("http://localhost:9001");

        assert!(service.register_instance(&order, d.clone(), true));
        assert!(!service.register_instance(&order, d.clone(), true));
        assert_eq!(service.route(&order, "/api/order").unwrap().instance_id, d);

        service.states().record_latency(&d, 12.0);
        assert!(service.deregister_instance(&order, &d));
        assert!(service.states().get_state(&d).is_none());
        assert!(service.route(&order, "/api/order").is_err());
    }

    #[test]
    fn test_deregister_keeps_state_of_shared_instance() {
        let service =
            RoutingService::from_config(create_test_config(), Arc::new(StaticProbe::new(10)))
                .unwrap();
        let order = ServiceName::new("order-service").unwrap();
        let a = instance("http://localhost:8081");

        service.register_instance(&order, a.clone(), false);
        assert!(service.deregister_instance(&order, &a));
        assert!(service.states().is_healthy(&a));
    }

    #[test]
    fn test_record_outcome_through_service() {
        let service =
            RoutingService::from_config(create_test_config(), Arc::new(StaticProbe::new(10)))
                .unwrap();

        let first = service.route(&product_service(), "/api/product").unwrap();
        service.record_outcome(&Outcome::failure(
            first.instance_id.clone(),
            first.timeout,
            FailureKind::Timeout,
        ));

        let second = service.route(&product_service(), "/api/product").unwrap();
        assert_ne!(second.instance_id, first.instance_id);
        assert_eq!(second.instance_id, instance("http://localhost:8082"));
    }

    #[tokio::test]
    async fn test_start_stop() {
        let probe = Arc::new(StaticProbe::new(5));
        let mut config = create_test_config();
        config.settings.health_check_interval_seconds = 1;
        let service = RoutingService::from_config(config, probe.clone()).unwrap();

        assert!(!service.is_running().await);
        service.start().await.unwrap();
        assert!(service.is_running().await);

        // 重复启动不会产生第二个检查循环
        service.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(probe.calls.load(Ordering::SeqCst) >= 3);
        assert!(service
            .states()
            .is_healthy(&instance("http://localhost:8083")));

        service.stop().await;
        assert!(!service.is_running().await);

        let calls_after_stop = probe.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), calls_after_stop);
    }
}
