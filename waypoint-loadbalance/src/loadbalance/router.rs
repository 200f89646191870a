use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use waypoint_core::error::StaleOutcome;
use waypoint_core::{
    DecisionReason, FailureKind, ForwardInstruction, GlobalSettings, Outcome, RequestId,
    RoutingDecision, RoutingError, SelectionError, ServiceName,
};

use super::selector;
use super::traits::{HealthTracker, LatencyTracker, ServiceRegistry};
use super::tracker::InstanceStateStore;

/// 路由器
///
/// 每个请求先对注册中心和实例状态做快照，再调用选择器，
/// 转发完成后由调用方通过 [`Router::record_outcome`] 回报结果。
/// 路由器内部不做重试，换实例重试由调用方多次调用 [`Router::route`] 实现。
pub struct Router {
    registry: Arc<dyn ServiceRegistry>,
    states: Arc<InstanceStateStore>,
    forward_timeout: Duration,
    evict_on_server_error: bool,
    next_request_id: AtomicU64,
}

impl Router {
    pub fn new(
        registry: Arc<dyn ServiceRegistry>,
        states: Arc<InstanceStateStore>,
        settings: &GlobalSettings,
    ) -> Self {
        Self {
            registry,
            states,
            forward_timeout: settings.forward_timeout(),
            evict_on_server_error: settings.evict_on_server_error,
            next_request_id: AtomicU64::new(1),
        }
    }

    /// 获取实例状态存储的引用
    pub fn states(&self) -> Arc<InstanceStateStore> {
        self.states.clone()
    }

    pub fn registry(&self) -> Arc<dyn ServiceRegistry> {
        self.registry.clone()
    }

    /// 为一次请求做出路由决策
    pub fn decide(&self, service: &ServiceName) -> RoutingDecision {
        let request_id = RequestId(self.next_request_id.fetch_add(1, Ordering::Relaxed));

        let Some(instances) = self.registry.get_instances(service) else {
            debug!("{}: service {} not registered", request_id, service);
            return RoutingDecision {
                request_id,
                service: service.clone(),
                chosen_instance: None,
                reason: DecisionReason::UnknownService,
                total_instances: 0,
                healthy_instances: 0,
            };
        };

        let snapshot = self.states.snapshot(&instances);

        match selector::select_with_details(
            service,
            &instances,
            &snapshot.health,
            &snapshot.latency,
        ) {
            Ok(selection) => {
                let reason = if selection.healthy_instances == 1 {
                    DecisionReason::OnlyHealthy
                } else {
                    DecisionReason::LowestLatency
                };

                debug!(
                    "{}: selected {} for {} ({:?}, {}/{} healthy, estimate={})",
                    request_id,
                    selection.instance,
                    service,
                    reason,
                    selection.healthy_instances,
                    instances.len(),
                    format_estimate(selection.latency_estimate_ms)
                );

                RoutingDecision {
                    request_id,
                    service: service.clone(),
                    chosen_instance: Some(selection.instance),
                    reason,
                    total_instances: instances.len(),
                    healthy_instances: selection.healthy_instances,
                }
            }
            Err(SelectionError::NoHealthyInstance {
                total_instances, ..
            }) => {
                warn!(
                    "{}: no healthy instance for {} ({} registered)",
                    request_id, service, total_instances
                );

                RoutingDecision {
                    request_id,
                    service: service.clone(),
                    chosen_instance: None,
                    reason: DecisionReason::NoHealthyInstance,
                    total_instances,
                    healthy_instances: 0,
                }
            }
        }
    }

    /// 路由请求，返回转发指令
    pub fn route(
        &self,
        service: &ServiceName,
        request_path: &str,
    ) -> Result<ForwardInstruction, RoutingError> {
        let decision = self.decide(service);

        if decision.reason == DecisionReason::UnknownService {
            return Err(RoutingError::ServiceNotFound {
                service: decision.service,
            });
        }

        let Some(instance_id) = decision.chosen_instance else {
            return Err(RoutingError::ServiceUnavailable {
                service: decision.service,
                total_instances: decision.total_instances,
            });
        };

        let target_address = instance_id.join_path(request_path);
        debug!(
            "{}: routing {} {} -> {}",
            decision.request_id, service, request_path, target_address
        );

        Ok(ForwardInstruction {
            target_address,
            request_id: decision.request_id,
            service: decision.service,
            instance_id,
            timeout: self.forward_timeout,
        })
    }

    /// 记录转发结果
    ///
    /// 延迟总是记录；只有连接层失败（连接拒绝、超时、网络错误）才把实例标记为不健康，
    /// 4xx 等业务层错误不影响健康状态。已注销实例的结果直接丢弃。
    pub fn record_outcome(&self, outcome: &Outcome) {
        let instance = &outcome.instance_id;

        if !self.registry.contains_instance(instance) {
            debug!("Dropping outcome: {}", StaleOutcome(instance.clone()));
            return;
        }

        self.states.record_latency(instance, outcome.elapsed_ms);

        if !outcome.succeeded {
            if self.evicts(outcome.failure) {
                warn!(
                    "Connection-level failure on {} ({:?}) after {:.1}ms",
                    instance, outcome.failure, outcome.elapsed_ms
                );
                self.states.set_health(instance, false);
            } else {
                debug!(
                    "Application-level failure on {} ({:?}), health unchanged",
                    instance, outcome.failure
                );
            }
        }

        // 写入期间实例可能已被注销，此时清掉刚写入的状态
        if !self.registry.contains_instance(instance) {
            debug!("Instance {} deregistered during outcome write", instance);
            self.states.forget(instance);
        }
    }

    /// 失败是否应把实例摘除
    fn evicts(&self, failure: Option<FailureKind>) -> bool {
        match failure {
            // 没有分类的失败按连接层失败处理
            None => true,
            Some(FailureKind::ServerError(_)) => self.evict_on_server_error,
            Some(kind) => kind.is_connection_level(),
        }
    }

    /// 获取各服务的健康状态统计
    pub fn health_stats(&self) -> HashMap<ServiceName, HealthStats> {
        let mut stats = HashMap::new();

        for service in self.registry.services() {
            let instances = self.registry.get_instances(&service).unwrap_or_default();
            let snapshot = self.states.snapshot(&instances);

            let healthy_instances = instances
                .iter()
                .filter(|i| snapshot.health.is_healthy(i))
                .count();

            let observed: Vec<f64> = instances
                .iter()
                .filter(|i| snapshot.latency.is_observed(i))
                .map(|i| snapshot.latency.estimate(i))
                .collect();
            let average_latency_ms = if observed.is_empty() {
                None
            } else {
                Some(observed.iter().sum::<f64>() / observed.len() as f64)
            };

            let total_instances = instances.len();
            stats.insert(
                service,
                HealthStats {
                    healthy_instances,
                    total_instances,
                    health_ratio: if total_instances > 0 {
                        healthy_instances as f64 / total_instances as f64
                    } else {
                        0.0
                    },
                    average_latency_ms,
                },
            );
        }

        stats
    }
}

fn format_estimate(estimate_ms: f64) -> String {
    if estimate_ms == f64::MAX {
        "unobserved".to_string()
    } else {
        format!("{:.1}ms", estimate_ms)
    }
}

/// 健康状态统计
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStats {
    pub healthy_instances: usize,
    pub total_instances: usize,
    pub health_ratio: f64,
    pub average_latency_ms: Option<f64>,
}

impl HealthStats {
    /// 检查服务是否可用
    pub fn is_healthy(&self) -> bool {
        self.health_ratio > 0.0
    }

    /// 检查服务是否完全健康
    pub fn is_fully_healthy(&self) -> bool {
        self.health_ratio >= 1.0
    }
}
