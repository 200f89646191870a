use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, info};
use waypoint_core::{InstanceId, ServiceName};

use super::traits::ServiceRegistry;

/// 内存注册中心
///
/// 每个服务保存一个按注册顺序排列的实例列表，选择器依赖这个顺序做确定性的平局裁决
#[derive(Default)]
pub struct InMemoryRegistry {
    services: RwLock<HashMap<ServiceName, Vec<InstanceId>>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一个没有实例的服务
    pub fn register_service(&self, service: &ServiceName) {
        let mut services = self.services.write();
        if !services.contains_key(service) {
            services.insert(service.clone(), Vec::new());
            info!("Registered service {}", service);
        }
    }

    /// 注册实例，已存在时保持原有位置不变
    ///
    /// 返回是否为新加入的实例
    pub fn register(&self, service: &ServiceName, instance: InstanceId) -> bool {
        let mut services = self.services.write();
        let instances = services.entry(service.clone()).or_default();

        if instances.contains(&instance) {
            debug!("Instance {} already registered for {}", instance, service);
            return false;
        }

        info!("Registered instance {} for service {}", instance, service);
        instances.push(instance);
        true
    }

    /// 注销实例，服务本身保留
    pub fn deregister(&self, service: &ServiceName, instance: &InstanceId) -> bool {
        let mut services = self.services.write();
        let Some(instances) = services.get_mut(service) else {
            return false;
        };

        let before = instances.len();
        instances.retain(|i| i != instance);
        let removed = instances.len() != before;
        if removed {
            info!("Deregistered instance {} from service {}", instance, service);
        }
        removed
    }

    /// 移除整个服务，返回其实例列表
    pub fn remove_service(&self, service: &ServiceName) -> Option<Vec<InstanceId>> {
        let removed = self.services.write().remove(service);
        if removed.is_some() {
            info!("Removed service {}", service);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }
}

impl ServiceRegistry for InMemoryRegistry {
    fn get_instances(&self, service: &ServiceName) -> Option<Vec<InstanceId>> {
        self.services.read().get(service).cloned()
    }

    fn services(&self) -> Vec<ServiceName> {
        let mut names: Vec<ServiceName> = self.services.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn contains_instance(&self, instance: &InstanceId) -> bool {
        self.services
            .read()
            .values()
            .any(|instances| instances.contains(instance))
    }
}
