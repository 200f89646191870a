use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::NameError;

/// 逻辑服务名，例如 "product-service"
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceName(String);

impl ServiceName {
    pub fn new(name: impl Into<String>) -> Result<Self, NameError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(NameError::EmptyServiceName);
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ServiceName {
    type Error = NameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for ServiceName {
    type Error = NameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ServiceName> for String {
    fn from(value: ServiceName) -> Self {
        value.0
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 实例标识，即实例的基础地址（如 "http://localhost:8081"）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(address: impl Into<String>) -> Result<Self, NameError> {
        let address = address.into();
        if address.trim().is_empty() {
            return Err(NameError::EmptyInstanceId);
        }
        Ok(Self(address))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 拼接转发目标地址
    ///
    /// 基础地址末尾的 '/' 会被去掉，路径缺少前导 '/' 时会补上
    pub fn join_path(&self, request_path: &str) -> String {
        let base = self.0.trim_end_matches('/');
        if request_path.is_empty() {
            base.to_string()
        } else if request_path.starts_with('/') {
            format!("{}{}", base, request_path)
        } else {
            format!("{}/{}", base, request_path)
        }
    }
}

impl TryFrom<String> for InstanceId {
    type Error = NameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for InstanceId {
    type Error = NameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<InstanceId> for String {
    fn from(value: InstanceId) -> Self {
        value.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 请求标识，由路由器单调递增分配
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// 实例健康状态机
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

impl From<bool> for HealthState {
    fn from(healthy: bool) -> Self {
        if healthy {
            HealthState::Healthy
        } else {
            HealthState::Unhealthy
        }
    }
}

/// 单个实例的运行时状态
///
/// 只由探测结果和请求结果反馈修改，选择器只读
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceState {
    pub healthy: bool,
    /// 平滑后的延迟估计，从未观测过时为 None
    pub latency_estimate_ms: Option<f64>,
    /// 最近一次健康写入的时间戳，用于 last-write-wins
    pub health_updated_at: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
}

impl InstanceState {
    /// 新记录默认不健康（fail-closed）
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            healthy: false,
            latency_estimate_ms: None,
            health_updated_at: None,
            last_updated: now,
        }
    }

    pub fn health_state(&self) -> HealthState {
        HealthState::from(self.healthy)
    }
}

/// 转发失败的类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FailureKind {
    /// 连接被拒绝
    ConnectionRefused,
    /// 转发超时
    Timeout,
    /// 其他网络错误（DNS失败、连接重置等）
    Network,
    /// 上游返回 4xx
    ClientError(u16),
    /// 上游返回 5xx
    ServerError(u16),
}

impl FailureKind {
    /// 按HTTP状态码分类，非错误状态码返回 None
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            400..=499 => Some(FailureKind::ClientError(status)),
            500..=599 => Some(FailureKind::ServerError(status)),
            _ => None,
        }
    }

    /// 是否为连接层面的失败
    pub fn is_connection_level(&self) -> bool {
        matches!(
            self,
            FailureKind::ConnectionRefused | FailureKind::Timeout | FailureKind::Network
        )
    }
}

/// 转发完成后由调用方上报的结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub instance_id: InstanceId,
    pub succeeded: bool,
    pub elapsed_ms: f64,
    /// 失败类型，succeeded 为 false 且没有类型时按连接层失败处理
    pub failure: Option<FailureKind>,
}

impl Outcome {
    pub fn success(instance_id: InstanceId, elapsed: Duration) -> Self {
        Self {
            instance_id,
            succeeded: true,
            elapsed_ms: elapsed.as_secs_f64() * 1000.0,
            failure: None,
        }
    }

    pub fn failure(instance_id: InstanceId, elapsed: Duration, kind: FailureKind) -> Self {
        Self {
            instance_id,
            succeeded: false,
            elapsed_ms: elapsed.as_secs_f64() * 1000.0,
            failure: Some(kind),
        }
    }

    /// 由上游状态码构造结果，2xx/3xx 视为成功
    pub fn from_status(instance_id: InstanceId, elapsed: Duration, status: u16) -> Self {
        match FailureKind::from_status(status) {
            Some(kind) => Self::failure(instance_id, elapsed, kind),
            None => Self::success(instance_id, elapsed),
        }
    }
}

/// 交给外部转发器的指令
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForwardInstruction {
    pub target_address: String,
    pub request_id: RequestId,
    pub service: ServiceName,
    pub instance_id: InstanceId,
    /// 转发器必须遵守的超时
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
}

/// 选择理由
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DecisionReason {
    /// 多个健康实例中延迟最低
    LowestLatency,
    /// 只有一个健康实例
    OnlyHealthy,
    NoHealthyInstance,
    UnknownService,
}

/// 单次请求的路由决策，用完即弃
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingDecision {
    pub request_id: RequestId,
    pub service: ServiceName,
    pub chosen_instance: Option<InstanceId>,
    pub reason: DecisionReason,
    /// 参与评估的实例总数
    pub total_instances: usize,
    pub healthy_instances: usize,
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
}
