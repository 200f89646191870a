pub mod health_checker;
pub mod registry;
pub mod router;
pub mod selector;
pub mod service;
pub mod tracker;
pub mod traits;

#[cfg(test)]
mod service_tests;

pub use health_checker::{HealthChecker, HealthSummary};
pub use registry::InMemoryRegistry;
pub use router::{HealthStats, Router};
pub use selector::{select, select_with_details, Selection};
pub use service::RoutingService;
pub use tracker::{HealthSnapshot, InstanceStateStore, LatencySnapshot, StateSnapshot};
pub use traits::{HealthProbe, HealthTracker, LatencyTracker, ProbeReport, ServiceRegistry};
