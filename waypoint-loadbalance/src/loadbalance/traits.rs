use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use waypoint_core::{InstanceId, ServiceName};

/// 服务注册中心读接口
///
/// 注册中心由外部协作方维护，路由核心只读取当前实例列表
pub trait ServiceRegistry: Send + Sync {
    /// 获取服务的实例列表（按注册顺序）
    ///
    /// 服务未注册时返回 None，已注册但没有实例时返回空列表
    fn get_instances(&self, service: &ServiceName) -> Option<Vec<InstanceId>>;

    /// 所有已注册的服务
    fn services(&self) -> Vec<ServiceName>;

    /// 实例是否仍属于某个服务
    fn contains_instance(&self, instance: &InstanceId) -> bool {
        self.services().iter().any(|service| {
            self.get_instances(service)
                .is_some_and(|instances| instances.contains(instance))
        })
    }
}

/// 健康状态读写接口
pub trait HealthTracker: Send + Sync {
    /// 按给定时间戳写入健康状态，早于已生效写入的会被忽略
    fn set_health_at(&self, instance: &InstanceId, healthy: bool, at: DateTime<Utc>);

    fn set_health(&self, instance: &InstanceId, healthy: bool) {
        self.set_health_at(instance, healthy, Utc::now());
    }

    /// 未知实例返回 false
    fn is_healthy(&self, instance: &InstanceId) -> bool;
}

/// 延迟估计读写接口
pub trait LatencyTracker: Send + Sync {
    fn record_latency(&self, instance: &InstanceId, elapsed_ms: f64);

    /// 从未观测的实例返回哨兵值
    fn latency_estimate(&self, instance: &InstanceId) -> f64;
}

/// 单次探测结果
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReport {
    pub healthy: bool,
    pub latency: Option<Duration>,
}

impl ProbeReport {
    pub fn healthy(latency: Duration) -> Self {
        Self {
            healthy: true,
            latency: Some(latency),
        }
    }

    pub fn unhealthy() -> Self {
        Self {
            healthy: false,
            latency: None,
        }
    }
}

/// 健康探测器接口
///
/// 实际的网络探测由外部实现，健康检查器只负责调度和写回结果
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, instance: &InstanceId) -> ProbeReport;
}
