use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use waypoint_core::{Config, ForwardInstruction, InstanceId, Outcome, RoutingError, ServiceName};

use super::health_checker::{HealthChecker, HealthSummary};
use super::registry::InMemoryRegistry;
use super::router::{HealthStats, Router};
use super::traits::{HealthProbe, HealthTracker, ServiceRegistry};
use super::tracker::InstanceStateStore;

/// 路由服务
/// 整合注册中心、实例状态、路由器和健康检查器，提供统一的服务接口
pub struct RoutingService {
    registry: Arc<InMemoryRegistry>,
    states: Arc<InstanceStateStore>,
    router: Arc<Router>,
    health_checker: Arc<HealthChecker>,
    is_running: Arc<RwLock<bool>>,
    check_task: Mutex<Option<JoinHandle<()>>>,
}

impl RoutingService {
    /// 根据配置创建路由服务
    ///
    /// 配置中的实例按声明顺序注册，`healthy = true` 的实例在注册时直接标记为健康
    pub fn from_config(config: Config, probe: Arc<dyn HealthProbe>) -> Result<Self> {
        // 验证配置
        config.validate()?;

        let registry = Arc::new(InMemoryRegistry::new());
        let states = Arc::new(InstanceStateStore::from_settings(&config.settings));
        let router = Arc::new(Router::new(
            registry.clone(),
            states.clone(),
            &config.settings,
        ));
        let health_checker = Arc::new(HealthChecker::new(
            registry.clone(),
            states.clone(),
            probe,
            &config.settings,
        ));

        let service = Self {
            registry,
            states,
            router,
            health_checker,
            is_running: Arc::new(RwLock::new(false)),
            check_task: Mutex::new(None),
        };

        for name in config.get_service_names() {
            let service_name = ServiceName::new(name.as_str())
                .with_context(|| format!("Invalid service name '{}'", name))?;
            service.registry.register_service(&service_name);

            let instances = config
                .services
                .get(&name)
                .map(|s| s.instances.as_slice())
                .unwrap_or_default();
            for instance in instances {
                let instance_id = InstanceId::new(instance.address.as_str()).with_context(|| {
                    format!("Invalid instance address in service '{}'", name)
                })?;
                service.register_instance(&service_name, instance_id, instance.healthy);
            }
        }

        info!(
            "Routing service configured with {} services, {} instances",
            service.registry.len(),
            config.total_instances()
        );
        Ok(service)
    }

    /// 启动后台健康检查
    pub async fn start(&self) -> Result<()> {
        {
            let mut running = self.is_running.write().await;
            if *running {
                return Ok(());
            }
            *running = true;
        }

        info!("Starting routing service");

        let health_checker = self.health_checker.clone();
        let handle = tokio::spawn(async move {
            health_checker.start().await;
        });

        if let Some(previous) = self.check_task.lock().replace(handle) {
            previous.abort();
        }

        info!("Routing service started successfully");
        Ok(())
    }

    /// 停止后台健康检查
    pub async fn stop(&self) {
        let mut running = self.is_running.write().await;
        if !*running {
            return;
        }
        *running = false;

        if let Some(handle) = self.check_task.lock().take() {
            handle.abort();
        }
        info!("Routing service stopped");
    }

    /// 检查服务是否正在运行
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    /// 手动触发一轮健康检查
    pub async fn trigger_health_check(&self) -> HealthSummary {
        self.health_checker.check_now().await
    }

    pub fn route(
        &self,
        service: &ServiceName,
        request_path: &str,
    ) -> Result<ForwardInstruction, RoutingError> {
        self.router.route(service, request_path)
    }

    pub fn record_outcome(&self, outcome: &Outcome) {
        self.router.record_outcome(outcome);
    }

    /// 注册实例
    ///
    /// `healthy` 为 true 时注册即标记健康，否则等待首次探测成功
    pub fn register_instance(
        &self,
        service: &ServiceName,
        instance: InstanceId,
        healthy: bool,
    ) -> bool {
        let added = self.registry.register(service, instance.clone());
        if added && healthy {
            self.states.set_health(&instance, true);
        }
        added
    }

    /// 注销实例，实例不再属于任何服务时清除其状态
    pub fn deregister_instance(&self, service: &ServiceName, instance: &InstanceId) -> bool {
        let removed = self.registry.deregister(service, instance);
        if removed && !self.registry.contains_instance(instance) {
            self.states.forget(instance);
        } else if removed {
            debug!(
                "Instance {} still registered elsewhere, keeping state",
                instance
            );
        }
        removed
    }

    pub fn health_stats(&self) -> HashMap<ServiceName, HealthStats> {
        self.router.health_stats()
    }

    pub fn router(&self) -> Arc<Router> {
        self.router.clone()
    }

    pub fn registry(&self) -> Arc<InMemoryRegistry> {
        self.registry.clone()
    }

    pub fn states(&self) -> Arc<InstanceStateStore> {
        self.states.clone()
    }

    pub fn health_checker(&self) -> Arc<HealthChecker> {
        self.health_checker.clone()
    }
}

impl Drop for RoutingService {
    fn drop(&mut self) {
        if let Some(handle) = self.check_task.lock().take() {
            handle.abort();
        }
    }
}
