//! Core data models for the job monitoring backend

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Lifecycle state of a batch job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Running,
    Completed,
    Failed,
    Canceled,
    Stopped,
    Timeout,
}

impl JobState {
    pub fn is_running(&self) -> bool {
        matches!(self, JobState::Running)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Canceled => "canceled",
            JobState::Stopped => "stopped",
            JobState::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// Granularity at which a metric is recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricScope {
    Node,
    Core,
    Accelerator,
}

impl fmt::Display for MetricScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MetricScope::Node => "node",
            MetricScope::Core => "core",
            MetricScope::Accelerator => "accelerator",
        };
        f.write_str(s)
    }
}

/// Hardware allocated to a job on a single host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobResource {
    pub hostname: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hwthreads: Vec<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accelerators: Vec<String>,
}

/// A job as known to the job repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Database id
    pub id: i64,
    /// Id assigned by the batch scheduler
    pub job_id: i64,
    pub cluster: String,
    #[serde(default)]
    pub sub_cluster: String,
    pub state: JobState,
    pub num_nodes: u32,
    /// Unix seconds
    pub start_time: i64,
    /// Seconds
    pub duration: i64,
    #[serde(default)]
    pub resources: Vec<JobResource>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub footprint: HashMap<String, f64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub energy_footprint: HashMap<String, f64>,
    #[serde(default)]
    pub energy: f64,
}

impl Job {
    /// Unix seconds at which the job ended (or its current end for running jobs)
    pub fn end_time(&self) -> i64 {
        self.start_time + self.duration
    }
}

/// Precomputed statistics of one series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricStatistics {
    #[serde(with = "nan_scalar")]
    pub avg: f64,
    #[serde(with = "nan_scalar")]
    pub min: f64,
    #[serde(with = "nan_scalar")]
    pub max: f64,
}

impl MetricStatistics {
    /// Statistics over the non-NaN samples; all NaN when nothing is present
    pub fn from_samples(data: &[f64]) -> Self {
        let mut sum = 0.0;
        let mut count = 0usize;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for v in data.iter().copied().filter(|v| !v.is_nan()) {
            sum += v;
            count += 1;
            min = min.min(v);
            max = max.max(v);
        }
        if count == 0 {
            return Self {
                avg: f64::NAN,
                min: f64::NAN,
                max: f64::NAN,
            };
        }
        Self {
            avg: sum / count as f64,
            min,
            max,
        }
    }
}

/// Physical unit split into SI prefix and base unit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    pub base: String,
}

/// One time series for a (metric, scope, host/unit-id) triple
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub hostname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub statistics: MetricStatistics,
    #[serde(with = "nan_as_null")]
    pub data: Vec<f64>,
}

/// All series of a metric at one scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMetric {
    pub unit: Unit,
    pub timestep: u32,
    pub series: Vec<Series>,
}

/// metric name -> scope -> series
pub type JobData = HashMap<String, HashMap<MetricScope, JobMetric>>;

/// node -> metric -> samples
pub type NodeData = HashMap<String, HashMap<String, Vec<f64>>>;

/// metric -> node -> statistics
pub type JobStats = HashMap<String, HashMap<String, MetricStatistics>>;

/// Rough in-memory footprint of job data, used as cache weight
pub fn estimated_size(data: &JobData) -> usize {
    let mut size = std::mem::size_of::<JobData>();
    for (name, scopes) in data {
        size += name.len() + 64;
        for metric in scopes.values() {
            size += std::mem::size_of::<JobMetric>();
            for series in &metric.series {
                size += std::mem::size_of::<Series>()
                    + series.hostname.len()
                    + series.id.as_ref().map_or(0, String::len)
                    + series.data.len() * std::mem::size_of::<f64>();
            }
        }
    }
    size
}

/// Summary statistics persisted per job and metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatistics {
    pub unit: Unit,
    #[serde(with = "nan_scalar")]
    pub avg: f64,
    #[serde(with = "nan_scalar")]
    pub min: f64,
    #[serde(with = "nan_scalar")]
    pub max: f64,
}

/// Job description stored next to the metric data in the archive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMeta {
    #[serde(flatten)]
    pub job: Job,
    #[serde(default)]
    pub statistics: HashMap<String, JobStatistics>,
}

impl JobMeta {
    pub fn new(job: Job) -> Self {
        Self {
            job,
            statistics: HashMap::new(),
        }
    }
}

/// Serializes NaN samples as JSON `null` and back
pub mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(data.iter().map(|v| if v.is_nan() { None } else { Some(*v) }))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        let raw: Vec<Option<f64>> = Vec::deserialize(deserializer)?;
        Ok(raw.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    }
}

/// Scalar variant of [`nan_as_null`]
pub mod nan_scalar {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if v.is_nan() {
            serializer.serialize_none()
        } else {
            serializer.serialize_f64(*v)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
    }
}

/// Round to two decimal places
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
