use thiserror::Error;

use crate::types::{InstanceId, ServiceName};

/// 名称校验错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    #[error("service name must not be empty")]
    EmptyServiceName,
    #[error("instance id must not be empty")]
    EmptyInstanceId,
}

/// 选择器错误
///
/// 选择器只会因为没有健康实例而失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("no healthy instance for service '{service}' ({total_instances} registered)")]
    NoHealthyInstance {
        service: ServiceName,
        total_instances: usize,
    },
}

/// 路由错误，直接返回给调用方
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    /// 注册中心里没有这个服务
    #[error("service '{service}' not found")]
    ServiceNotFound { service: ServiceName },
    /// 服务存在，但没有可用实例
    #[error("service '{service}' unavailable: {total_instances} registered, none healthy")]
    ServiceUnavailable {
        service: ServiceName,
        total_instances: usize,
    },
}

impl RoutingError {
    /// 对应网关层应返回的HTTP状态码
    pub fn status_code(&self) -> u16 {
        match self {
            RoutingError::ServiceNotFound { .. } => 404,
            RoutingError::ServiceUnavailable { .. } => 503,
        }
    }

    pub fn service(&self) -> &ServiceName {
        match self {
            RoutingError::ServiceNotFound { service }
            | RoutingError::ServiceUnavailable { service, .. } => service,
        }
    }
}

impl From<SelectionError> for RoutingError {
    fn from(err: SelectionError) -> Self {
        match err {
            SelectionError::NoHealthyInstance {
                service,
                total_instances,
            } => RoutingError::ServiceUnavailable {
                service,
                total_instances,
            },
        }
    }
}

/// 结果上报时实例已不在注册中心（注销与在途请求的竞争）
///
/// 只用于日志，不会作为路由失败向外传播
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("outcome reported for unregistered instance '{0}'")]
pub struct StaleOutcome(pub InstanceId);
