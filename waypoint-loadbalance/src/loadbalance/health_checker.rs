use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use waypoint_core::{GlobalSettings, InstanceId};

use super::traits::{HealthProbe, HealthTracker, LatencyTracker, ProbeReport, ServiceRegistry};
use super::tracker::InstanceStateStore;

/// 健康检查器
/// 定期探测所有已注册实例，并把结果写回实例状态存储
pub struct HealthChecker {
    registry: Arc<dyn ServiceRegistry>,
    states: Arc<InstanceStateStore>,
    probe: Arc<dyn HealthProbe>,
    check_interval: Duration,
    probe_timeout: Duration,
}

/// 单轮健康检查的汇总
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthSummary {
    pub total_instances: usize,
    pub healthy_instances: usize,
    pub unhealthy_instances: usize,
    /// 探测超时的实例数（计入不健康）
    pub timed_out: usize,
}

impl HealthChecker {
    /// 创建新的健康检查器
    pub fn new(
        registry: Arc<dyn ServiceRegistry>,
        states: Arc<InstanceStateStore>,
        probe: Arc<dyn HealthProbe>,
        settings: &GlobalSettings,
    ) -> Self {
        Self {
            registry,
            states,
            probe,
            check_interval: settings.health_check_interval(),
            probe_timeout: settings.health_check_timeout(),
        }
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// 启动健康检查循环
    pub async fn start(&self) {
        info!(
            "Starting health checker with interval: {:?}",
            self.check_interval
        );

        let mut interval = interval(self.check_interval);

        loop {
            interval.tick().await;
            let summary = self.check_now().await;
            if summary.total_instances > 0 && summary.healthy_instances == 0 {
                error!(
                    "Health check found no healthy instances ({} probed)",
                    summary.total_instances
                );
            }
        }
    }

    /// 立即对所有已注册实例执行一轮探测
    pub async fn check_now(&self) -> HealthSummary {
        let instances = self.collect_instances();
        debug!("Starting health check for {} instances", instances.len());

        let results = join_all(instances.iter().map(|instance| self.probe_instance(instance))).await;

        let mut summary = HealthSummary {
            total_instances: instances.len(),
            ..Default::default()
        };
        for (healthy, timed_out) in results {
            if healthy {
                summary.healthy_instances += 1;
            } else {
                summary.unhealthy_instances += 1;
            }
            if timed_out {
                summary.timed_out += 1;
            }
        }

        debug!(
            "Completed health check: {}/{} healthy, {} timed out",
            summary.healthy_instances, summary.total_instances, summary.timed_out
        );
        summary
    }

    /// 探测单个实例并写回结果，返回是否健康
    pub async fn check_instance(&self, instance: &InstanceId) -> bool {
        self.probe_instance(instance).await.0
    }

    /// 返回 (是否健康, 是否超时)
    async fn probe_instance(&self, instance: &InstanceId) -> (bool, bool) {
        // 以探测开始时间作为写入时间戳，探测期间路由器写入的更新结果不会被覆盖
        let started_at = Utc::now();

        let (report, timed_out) =
            match tokio::time::timeout(self.probe_timeout, self.probe.probe(instance)).await {
                Ok(report) => (report, false),
                Err(_) => {
                    warn!(
                        "Health probe for {} timed out after {:?}",
                        instance, self.probe_timeout
                    );
                    (ProbeReport::unhealthy(), true)
                }
            };

        self.states.set_health_at(instance, report.healthy, started_at);
        if let Some(latency) = report.latency {
            self.states
                .record_latency(instance, latency.as_secs_f64() * 1000.0);
        }

        if !self.registry.contains_instance(instance) {
            debug!(
                "Instance {} deregistered during probe, dropping state",
                instance
            );
            self.states.forget(instance);
        }

        (report.healthy, timed_out)
    }

    /// 收集所有服务的实例，同一实例只探测一次
    fn collect_instances(&self) -> Vec<InstanceId> {
        let mut seen = HashSet::new();
        let mut instances = Vec::new();

        for service in self.registry.services() {
            for instance in self.registry.get_instances(&service).unwrap_or_default() {
                if seen.insert(instance.clone()) {
                    instances.push(instance);
                }
            }
        }

        instances
    }
}
