//! Live metric backends
//!
//! A [`Collector`] answers metric queries for exactly one cluster. Which
//! implementation serves a cluster is decided by the configured backend
//! `kind`, looked up in a [`CollectorFactory`]; the resulting instances are
//! held by the [`BackendRegistry`].

mod cc_metric_store;
mod context;
mod registry;

pub use cc_metric_store::CcMetricStore;
pub use context::QueryContext;
pub use registry::{BackendRegistry, CollectorConstructor, CollectorFactory};

use crate::models::{Job, JobData, JobStats, MetricScope, NodeData};
use anyhow::Result;

pub use async_trait::async_trait;

/// Capability contract of a live metric backend
#[async_trait]
pub trait Collector: Send + Sync {
    /// Load the requested metrics of a job at the requested scopes
    async fn load_data(
        &self,
        job: &Job,
        metrics: &[String],
        scopes: &[MetricScope],
        ctx: &QueryContext,
    ) -> Result<JobData>;

    /// Per-node statistics of a job, node scope only
    async fn load_stats(&self, job: &Job, metrics: &[String], ctx: &QueryContext)
        -> Result<JobStats>;

    /// Raw node-scope series for a time range
    ///
    /// Returns `Ok(None)` when the backend does not implement node queries.
    async fn load_node_data(
        &self,
        cluster: &str,
        metrics: &[String],
        nodes: &[String],
        from: i64,
        to: i64,
        ctx: &QueryContext,
    ) -> Result<Option<NodeData>>;
}
