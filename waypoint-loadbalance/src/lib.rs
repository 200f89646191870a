//! Waypoint Load Balance Library
//!
//! This library provides the routing decision engine for the Waypoint system including:
//! - Instance registry
//! - Health and latency tracking
//! - Lowest-latency healthy instance selection
//! - Request routing and outcome feedback
//! - Periodic health probing

pub mod loadbalance;

// Re-export commonly used types
pub use loadbalance::{
    select, select_with_details, HealthChecker, HealthProbe, HealthSnapshot, HealthStats,
    HealthSummary, HealthTracker, InMemoryRegistry, InstanceStateStore, LatencySnapshot,
    LatencyTracker, ProbeReport, Router, RoutingService, Selection, ServiceRegistry,
    StateSnapshot,
};
