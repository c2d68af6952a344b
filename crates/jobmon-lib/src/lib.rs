//! Job metric data access library
//!
//! This crate provides the core functionality for:
//! - Routing job metric requests to live backends or the job archive
//! - Caching live results under a size and TTL bound
//! - Footprint aggregation of running jobs
//! - Retention of aged job data
//! - Health checks and observability

pub mod archive;
pub mod cache;
pub mod cluster;
pub mod collector;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod repository;
pub mod tasks;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatcher::{DispatcherConfig, MetricDispatcher, MetricDispatcherBuilder};
pub use error::MetricDataError;
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ServiceMetrics, StructuredLogger};
