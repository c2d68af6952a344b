//! Cluster and metric configuration
//!
//! Holds, per cluster, the metric backend to query and the ordered list of
//! metric definitions. Shared read-only by the dispatcher and the workers.

use crate::models::{MetricScope, Unit};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Where and how to reach the live metric backend of a cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDataRepositoryConfig {
    pub kind: String,
    pub url: String,
    #[serde(default)]
    pub token: String,
}

/// Which statistic of a metric ends up in the job footprint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FootprintStat {
    Avg,
    Min,
    Max,
}

impl FootprintStat {
    pub fn as_str(&self) -> &'static str {
        match self {
            FootprintStat::Avg => "avg",
            FootprintStat::Min => "min",
            FootprintStat::Max => "max",
        }
    }
}

/// How a metric contributes to the job's energy figure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnergyKind {
    /// Metric is a power draw in watts
    Power,
    /// Metric already is an energy value
    Energy,
}

/// Definition of one metric collected on a cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricConfig {
    pub name: String,
    #[serde(default)]
    pub unit: Unit,
    #[serde(default = "default_scope")]
    pub scope: MetricScope,
    #[serde(default = "default_timestep")]
    pub timestep: u32,
    #[serde(default)]
    pub peak: f64,
    #[serde(default)]
    pub normal: f64,
    #[serde(default)]
    pub caution: f64,
    #[serde(default)]
    pub alert: f64,
    #[serde(default = "default_aggregation")]
    pub aggregation: String,
    #[serde(default)]
    pub footprint: Option<FootprintStat>,
    #[serde(default)]
    pub energy: Option<EnergyKind>,
}

fn default_scope() -> MetricScope {
    MetricScope::Node
}

fn default_timestep() -> u32 {
    60
}

fn default_aggregation() -> String {
    "sum".to_string()
}

/// Configuration of a single cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub name: String,
    #[serde(default)]
    pub metric_data_repository: Option<MetricDataRepositoryConfig>,
    #[serde(default)]
    pub metric_config: Vec<MetricConfig>,
}

/// Read-only lookup of cluster configurations
#[derive(Debug, Clone, Default)]
pub struct ClusterCatalog {
    clusters: Vec<ClusterConfig>,
    index: HashMap<String, usize>,
}

impl ClusterCatalog {
    pub fn new(clusters: Vec<ClusterConfig>) -> Self {
        let index = clusters
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();
        Self { clusters, index }
    }

    pub fn clusters(&self) -> &[ClusterConfig] {
        &self.clusters
    }

    pub fn get(&self, cluster: &str) -> Option<&ClusterConfig> {
        self.index.get(cluster).map(|&i| &self.clusters[i])
    }

    /// Names of all configured metrics of a cluster, in configuration order
    pub fn metric_names(&self, cluster: &str) -> Vec<String> {
        self.get(cluster)
            .map(|c| c.metric_config.iter().map(|m| m.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn metric_config(&self, cluster: &str, metric: &str) -> Option<&MetricConfig> {
        self.get(cluster)?
            .metric_config
            .iter()
            .find(|m| m.name == metric)
    }
}
