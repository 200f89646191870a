//! Waypoint Core Library
//!
//! This library provides core functionality for the Waypoint routing system including:
//! - Service and instance identity types
//! - Routing error taxonomy
//! - Configuration management

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::model::{Config, GlobalSettings, InstanceConfig, ServiceConfig, UnobservedLatency};
pub use error::{NameError, RoutingError, SelectionError, StaleOutcome};
pub use types::{
    DecisionReason, FailureKind, ForwardInstruction, HealthState, InstanceId, InstanceState,
    Outcome, RequestId, RoutingDecision, ServiceName,
};
