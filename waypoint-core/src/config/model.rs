use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub settings: GlobalSettings,
    #[serde(default)]
    pub services: HashMap<String, ServiceConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GlobalSettings {
    /// EWMA平滑系数 α
    #[serde(default = "default_latency_smoothing_factor")]
    pub latency_smoothing_factor: f64,
    /// 从未观测过延迟的实例如何排序
    #[serde(default)]
    pub unobserved_latency: UnobservedLatency,
    /// 交给转发器的超时
    #[serde(default = "default_forward_timeout")]
    pub forward_timeout_ms: u64,
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_seconds: u64,
    /// 单次探测超时，超时视为不健康
    #[serde(default = "default_health_check_timeout")]
    pub health_check_timeout_ms: u64,
    /// 5xx 是否按连接层失败处理（摘除实例）
    #[serde(default)]
    pub evict_on_server_error: bool,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            latency_smoothing_factor: default_latency_smoothing_factor(),
            unobserved_latency: UnobservedLatency::default(),
            forward_timeout_ms: default_forward_timeout(),
            health_check_interval_seconds: default_health_check_interval(),
            health_check_timeout_ms: default_health_check_timeout(),
            evict_on_server_error: false,
        }
    }
}

impl GlobalSettings {
    pub fn forward_timeout(&self) -> Duration {
        Duration::from_millis(self.forward_timeout_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_seconds)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }
}

/// 未观测实例的延迟策略
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum UnobservedLatency {
    /// 视为最大延迟，排在已观测实例之后
    #[default]
    Deprioritize,
    /// 视为零延迟，优先探索
    Prefer,
}

impl UnobservedLatency {
    /// 未观测实例的延迟估计值
    pub fn sentinel_ms(&self) -> f64 {
        match self {
            UnobservedLatency::Deprioritize => f64::MAX,
            UnobservedLatency::Prefer => 0.0,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ServiceConfig {
    /// 实例列表，顺序即注册顺序
    #[serde(default)]
    pub instances: Vec<InstanceConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct InstanceConfig {
    pub address: String,
    /// 注册时直接标记为健康，否则等待首次探测成功
    #[serde(default)]
    pub healthy: bool,
}

fn default_latency_smoothing_factor() -> f64 {
    0.2
}

fn default_forward_timeout() -> u64 {
    5000
}

fn default_health_check_interval() -> u64 {
    10
}

fn default_health_check_timeout() -> u64 {
    2000
}

impl Config {
    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        self.validate_settings()?;

        for (service_name, service) in &self.services {
            self.validate_service_config(service_name, service)?;
        }

        Ok(())
    }

    fn validate_settings(&self) -> Result<()> {
        let settings = &self.settings;

        let alpha = settings.latency_smoothing_factor;
        if !(alpha > 0.0 && alpha <= 1.0) {
            anyhow::bail!(
                "Invalid latency_smoothing_factor: {} (must be in (0, 1])",
                alpha
            );
        }

        if settings.forward_timeout_ms == 0 {
            anyhow::bail!("Invalid forward_timeout_ms: cannot be 0");
        }

        if settings.health_check_interval_seconds == 0 {
            anyhow::bail!("Invalid health_check_interval_seconds: cannot be 0");
        }

        if settings.health_check_timeout_ms == 0 {
            anyhow::bail!("Invalid health_check_timeout_ms: cannot be 0");
        }

        Ok(())
    }

    /// 验证单个服务配置的有效性
    fn validate_service_config(&self, service_name: &str, service: &ServiceConfig) -> Result<()> {
        if service_name.trim().is_empty() {
            anyhow::bail!("Service name cannot be empty");
        }

        let mut seen = HashSet::new();
        for instance in &service.instances {
            if instance.address.trim().is_empty() {
                anyhow::bail!("Service '{}' has an instance with empty address", service_name);
            }

            // URL格式验证
            if !instance.address.starts_with("http://") && !instance.address.starts_with("https://")
            {
                anyhow::bail!(
                    "Service '{}' has invalid instance address: '{}'. Must start with http:// or https://",
                    service_name,
                    instance.address
                );
            }

            if !seen.insert(instance.address.as_str()) {
                anyhow::bail!(
                    "Service '{}' has duplicate instance address: '{}'",
                    service_name,
                    instance.address
                );
            }
        }

        Ok(())
    }

    /// 获取所有服务名（已排序）
    pub fn get_service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn total_instances(&self) -> usize {
        self.services.values().map(|s| s.instances.len()).sum()
    }
}
