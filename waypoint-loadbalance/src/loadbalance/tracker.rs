use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, info, warn};
use waypoint_core::{GlobalSettings, InstanceId, InstanceState, UnobservedLatency};

use super::traits::{HealthTracker, LatencyTracker};

/// 实例状态存储
///
/// 健康状态和延迟估计保存在同一把读写锁下：
/// - 写入只锁定单个实例的记录，健康和延迟是互不影响的两个字段
/// - 读取通过 [`InstanceStateStore::snapshot`] 在一次读锁内复制出快照，
///   路由决策基于快照进行，不会在决策过程中持有锁
pub struct InstanceStateStore {
    states: RwLock<HashMap<InstanceId, InstanceState>>,
    smoothing_factor: f64,
    unobserved: UnobservedLatency,
}

impl Default for InstanceStateStore {
    fn default() -> Self {
        Self::new(0.2, UnobservedLatency::Deprioritize)
    }
}

impl InstanceStateStore {
    /// 创建状态存储
    ///
    /// `smoothing_factor` 超出 (0, 1] 时退回默认值 0.2
    pub fn new(smoothing_factor: f64, unobserved: UnobservedLatency) -> Self {
        let smoothing_factor = if smoothing_factor > 0.0 && smoothing_factor <= 1.0 {
            smoothing_factor
        } else {
            warn!(
                "Invalid latency smoothing factor {}, falling back to 0.2",
                smoothing_factor
            );
            0.2
        };

        Self {
            states: RwLock::new(HashMap::new()),
            smoothing_factor,
            unobserved,
        }
    }

    pub fn from_settings(settings: &GlobalSettings) -> Self {
        Self::new(settings.latency_smoothing_factor, settings.unobserved_latency)
    }

    pub fn smoothing_factor(&self) -> f64 {
        self.smoothing_factor
    }

    /// 对给定实例集合做一次时间点一致的快照
    pub fn snapshot(&self, instances: &[InstanceId]) -> StateSnapshot {
        let states = self.states.read();

        let mut health = HealthSnapshot::default();
        let mut latency = LatencySnapshot::new(self.unobserved.sentinel_ms());

        for instance in instances {
            if let Some(state) = states.get(instance) {
                health.insert(instance.clone(), state.healthy);
                if let Some(estimate) = state.latency_estimate_ms {
                    latency.insert(instance.clone(), estimate);
                }
            }
        }

        StateSnapshot { health, latency }
    }

    /// 获取单个实例状态的副本
    pub fn get_state(&self, instance: &InstanceId) -> Option<InstanceState> {
        self.states.read().get(instance).cloned()
    }

    /// 删除实例状态（实例注销后调用）
    pub fn forget(&self, instance: &InstanceId) -> bool {
        let removed = self.states.write().remove(instance).is_some();
        if removed {
            debug!("Forgot state for instance {}", instance);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.states.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.read().is_empty()
    }
}

impl HealthTracker for InstanceStateStore {
    fn set_health_at(&self, instance: &InstanceId, healthy: bool, at: DateTime<Utc>) {
        let mut states = self.states.write();
        let state = states
            .entry(instance.clone())
            .or_insert_with(|| InstanceState::new(at));

        if let Some(previous) = state.health_updated_at {
            if at < previous {
                debug!(
                    "Ignoring stale health write for {} ({} < {})",
                    instance, at, previous
                );
                return;
            }
        }

        let was_healthy = state.healthy;
        state.healthy = healthy;
        state.health_updated_at = Some(at);
        if at > state.last_updated {
            state.last_updated = at;
        }

        match (was_healthy, healthy) {
            (true, false) => warn!("Instance {} marked unhealthy", instance),
            (false, true) => info!("Instance {} marked healthy", instance),
            _ => debug!("Instance {} health unchanged: {}", instance, healthy),
        }
    }

    fn is_healthy(&self, instance: &InstanceId) -> bool {
        self.states
            .read()
            .get(instance)
            .map(|state| state.healthy)
            .unwrap_or(false)
    }
}

impl LatencyTracker for InstanceStateStore {
    fn record_latency(&self, instance: &InstanceId, elapsed_ms: f64) {
        if !elapsed_ms.is_finite() {
            warn!("Dropping non-finite latency sample for {}", instance);
            return;
        }
        let elapsed_ms = elapsed_ms.max(0.0);
        let now = Utc::now();

        let mut states = self.states.write();
        let state = states
            .entry(instance.clone())
            .or_insert_with(|| InstanceState::new(now));

        let estimate = match state.latency_estimate_ms {
            Some(previous) => {
                self.smoothing_factor * elapsed_ms + (1.0 - self.smoothing_factor) * previous
            }
            None => elapsed_ms,
        };
        state.latency_estimate_ms = Some(estimate);
        if now > state.last_updated {
            state.last_updated = now;
        }

        debug!(
            "Latency for {}: sample={:.1}ms estimate={:.1}ms",
            instance, elapsed_ms, estimate
        );
    }

    fn latency_estimate(&self, instance: &InstanceId) -> f64 {
        self.states
            .read()
            .get(instance)
            .and_then(|state| state.latency_estimate_ms)
            .unwrap_or_else(|| self.unobserved.sentinel_ms())
    }
}

/// 健康和延迟的联合快照
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    pub health: HealthSnapshot,
    pub latency: LatencySnapshot,
}

/// 健康状态快照，未知实例视为不健康
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthSnapshot {
    healthy: HashMap<InstanceId, bool>,
}

impl HealthSnapshot {
    pub fn insert(&mut self, instance: InstanceId, healthy: bool) {
        self.healthy.insert(instance, healthy);
    }

    pub fn is_healthy(&self, instance: &InstanceId) -> bool {
        self.healthy.get(instance).copied().unwrap_or(false)
    }
}

impl FromIterator<(InstanceId, bool)> for HealthSnapshot {
    fn from_iter<T: IntoIterator<Item = (InstanceId, bool)>>(iter: T) -> Self {
        Self {
            healthy: iter.into_iter().collect(),
        }
    }
}

/// 延迟估计快照，未观测实例返回哨兵值
#[derive(Debug, Clone, PartialEq)]
pub struct LatencySnapshot {
    estimates: HashMap<InstanceId, f64>,
    sentinel: f64,
}

impl Default for LatencySnapshot {
    fn default() -> Self {
        Self::new(f64::MAX)
    }
}

impl LatencySnapshot {
    pub fn new(sentinel: f64) -> Self {
        Self {
            estimates: HashMap::new(),
            sentinel,
        }
    }

    /// NaN 无法参与比较，直接忽略，实例按未观测处理
    pub fn insert(&mut self, instance: InstanceId, estimate_ms: f64) {
        if estimate_ms.is_nan() {
            return;
        }
        self.estimates.insert(instance, estimate_ms);
    }

    pub fn estimate(&self, instance: &InstanceId) -> f64 {
        self.estimates
            .get(instance)
            .copied()
            .unwrap_or(self.sentinel)
    }

    /// 是否有过观测值
    pub fn is_observed(&self, instance: &InstanceId) -> bool {
        self.estimates.contains_key(instance)
    }
}

impl FromIterator<(InstanceId, f64)> for LatencySnapshot {
    fn from_iter<T: IntoIterator<Item = (InstanceId, f64)>>(iter: T) -> Self {
        Self {
            estimates: iter
                .into_iter()
                .filter(|(_, estimate_ms)| !estimate_ms.is_nan())
                .collect(),
            sentinel: f64::MAX,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn instance(addr: &str) -> InstanceId {
        InstanceId::new(addr).unwrap()
    }

    #[test]
    fn test_unknown_instance_is_unhealthy() {
        let store = InstanceStateStore::default();
        assert!(!store.is_healthy(&instance("http://unknown")));
    }

    #[test]
    fn test_set_health_creates_record() {
        let store = InstanceStateStore::default();
        let a = instance("http://a");

        store.set_health(&a, true);
        assert!(store.is_healthy(&a));
        assert_eq!(store.len(), 1);

        // 幂等
        store.set_health(&a, true);
        assert!(store.is_healthy(&a));

        store.set_health(&a, false);
        assert!(!store.is_healthy(&a));
    }

    #[test]
    fn test_stale_health_write_ignored() {
        let store = InstanceStateStore::default();
        let a = instance("http://a");
        let now = Utc::now();

        store.set_health_at(&a, true, now);
        store.set_health_at(&a, false, now - ChronoDuration::seconds(5));
        assert!(store.is_healthy(&a));

        store.set_health_at(&a, false, now + ChronoDuration::seconds(1));
        assert!(!store.is_healthy(&a));

        let state = store.get_state(&a).unwrap();
        assert_eq!(state.health_updated_at, Some(now + ChronoDuration::seconds(1)));
        assert_eq!(state.last_updated, now + ChronoDuration::seconds(1));
    }

    #[test]
    fn test_first_latency_sets_estimate() {
        let store = InstanceStateStore::default();
        let a = instance("http://a");

        store.record_latency(&a, 100.0);
        assert_eq!(store.latency_estimate(&a), 100.0);
    }

    #[test]
    fn test_latency_ewma() {
        let store = InstanceStateStore::default();
        let a = instance("http://a");

        store.record_latency(&a, 100.0);
        store.record_latency(&a, 200.0);
        // 0.2 * 200 + 0.8 * 100
        assert!((store.latency_estimate(&a) - 120.0).abs() < 1e-9);

        store.record_latency(&a, 20.0);
        // 0.2 * 20 + 0.8 * 120
        assert!((store.latency_estimate(&a) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_custom_smoothing_factor() {
        let store = InstanceStateStore::new(1.0, UnobservedLatency::Deprioritize);
        let a = instance("http://a");

        store.record_latency(&a, 100.0);
        store.record_latency(&a, 30.0);
        assert_eq!(store.latency_estimate(&a), 30.0);
    }

    #[test]
    fn test_invalid_smoothing_factor_falls_back() {
        let store = InstanceStateStore::new(0.0, UnobservedLatency::Deprioritize);
        assert_eq!(store.smoothing_factor(), 0.2);
    }

    #[test]
    fn test_unobserved_latency_sentinel() {
        let store = InstanceStateStore::default();
        assert_eq!(store.latency_estimate(&instance("http://a")), f64::MAX);

        let store = InstanceStateStore::new(0.2, UnobservedLatency::Prefer);
        assert_eq!(store.latency_estimate(&instance("http://a")), 0.0);
    }

    #[test]
    fn test_non_finite_latency_dropped() {
        let store = InstanceStateStore::default();
        let a = instance("http://a");

        store.record_latency(&a, 50.0);
        store.record_latency(&a, f64::NAN);
        store.record_latency(&a, f64::INFINITY);
        assert_eq!(store.latency_estimate(&a), 50.0);
    }

    #[test]
    fn test_latency_does_not_change_health() {
        let store = InstanceStateStore::default();
        let a = instance("http://a");

        store.record_latency(&a, 10.0);
        assert!(!store.is_healthy(&a));

        store.set_health(&a, true);
        store.record_latency(&a, 10.0);
        assert!(store.is_healthy(&a));
    }

    #[test]
    fn test_snapshot_only_covers_requested_instances() {
        let store = InstanceStateStore::default();
        let a = instance("http://a");
        let b = instance("http://b");
        let c = instance("http://c");

        store.set_health(&a, true);
        store.record_latency(&a, 80.0);
        store.set_health(&b, true);
        store.set_health(&c, true);
        store.record_latency(&c, 10.0);

        let snapshot = store.snapshot(&[a.clone(), b.clone()]);
        assert!(snapshot.health.is_healthy(&a));
        assert!(snapshot.health.is_healthy(&b));
        assert!(!snapshot.health.is_healthy(&c));
        assert_eq!(snapshot.latency.estimate(&a), 80.0);
        assert_eq!(snapshot.latency.estimate(&b), f64::MAX);
        assert!(!snapshot.latency.is_observed(&c));
    }

    #[test]
    fn test_snapshot_is_detached_from_store() {
        let store = InstanceStateStore::default();
        let a = instance("http://a");
        store.set_health(&a, true);

        let snapshot = store.snapshot(std::slice::from_ref(&a));
        store.set_health(&a, false);

        assert!(snapshot.health.is_healthy(&a));
        assert!(!store.is_healthy(&a));
    }

    #[test]
    fn test_forget() {
        let store = InstanceStateStore::default();
        let a = instance("http://a");
        store.set_health(&a, true);

        assert!(store.forget(&a));
        assert!(!store.forget(&a));
        assert!(!store.is_healthy(&a));
        assert!(store.is_empty());
    }
}
