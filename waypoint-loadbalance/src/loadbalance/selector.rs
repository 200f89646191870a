use waypoint_core::{InstanceId, SelectionError, ServiceName};

use super::tracker::{HealthSnapshot, LatencySnapshot};

/// 选择结果
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub instance: InstanceId,
    /// 选中实例的延迟估计
    pub latency_estimate_ms: f64,
    /// 参与比较的健康实例数
    pub healthy_instances: usize,
}

/// 从服务的实例列表中选出延迟最低的健康实例
///
/// 纯函数：相同的输入总是得到相同的输出。
/// 延迟相同时选择注册顺序靠前的实例（包括多个实例都是哨兵值的情况）。
pub fn select(
    service: &ServiceName,
    instances: &[InstanceId],
    health: &HealthSnapshot,
    latency: &LatencySnapshot,
) -> Result<InstanceId, SelectionError> {
    select_with_details(service, instances, health, latency).map(|selection| selection.instance)
}

/// 同 [`select`]，额外返回选择过程的统计
pub fn select_with_details(
    service: &ServiceName,
    instances: &[InstanceId],
    health: &HealthSnapshot,
    latency: &LatencySnapshot,
) -> Result<Selection, SelectionError> {
    let mut best: Option<(&InstanceId, f64)> = None;
    let mut healthy_instances = 0;

    for instance in instances.iter().filter(|i| health.is_healthy(i)) {
        healthy_instances += 1;
        let estimate = latency.estimate(instance);

        // 严格小于才替换，保证平局时先注册的实例胜出
        match best {
            Some((_, best_estimate)) if estimate >= best_estimate => {}
            _ => best = Some((instance, estimate)),
        }
    }

    match best {
        Some((instance, latency_estimate_ms)) => Ok(Selection {
            instance: instance.clone(),
            latency_estimate_ms,
            healthy_instances,
        }),
        None => Err(SelectionError::NoHealthyInstance {
            service: service.clone(),
            total_instances: instances.len(),
        }),
    }
}
