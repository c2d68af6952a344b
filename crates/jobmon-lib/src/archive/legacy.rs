//! Legacy archive records and their conversion to the current format
//!
//! Older archives store units as plain strings (`"GB/s"`), series ids as
//! integers and may omit series statistics or the metric aggregation.

use crate::cluster::{ClusterConfig, MetricConfig};
use crate::models::*;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyResource {
    pub hostname: String,
    #[serde(default)]
    pub hwthreads: Option<Vec<u32>>,
    #[serde(default)]
    pub accelerators: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LegacyStatistics {
    #[serde(default)]
    pub unit: String,
    #[serde(default, with = "nan_scalar")]
    pub avg: f64,
    #[serde(default, with = "nan_scalar")]
    pub min: f64,
    #[serde(default, with = "nan_scalar")]
    pub max: f64,
}

/// `meta.json` of a legacy archive
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyJobMeta {
    #[serde(default)]
    pub id: Option<i64>,
    pub job_id: i64,
    pub cluster: String,
    #[serde(default)]
    pub sub_cluster: String,
    pub job_state: JobState,
    pub num_nodes: u32,
    pub start_time: i64,
    pub duration: i64,
    #[serde(default)]
    pub resources: Vec<LegacyResource>,
    #[serde(default)]
    pub statistics: HashMap<String, LegacyStatistics>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LegacySeriesStatistics {
    #[serde(with = "nan_scalar")]
    pub avg: f64,
    #[serde(with = "nan_scalar")]
    pub min: f64,
    #[serde(with = "nan_scalar")]
    pub max: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LegacySeries {
    pub hostname: String,
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub statistics: Option<LegacySeriesStatistics>,
    #[serde(with = "nan_as_null")]
    pub data: Vec<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LegacyJobMetric {
    #[serde(default)]
    pub unit: String,
    pub timestep: u32,
    pub series: Vec<LegacySeries>,
}

/// `data.json` of a legacy archive; scopes are kept as raw strings
pub type LegacyJobData = HashMap<String, HashMap<String, LegacyJobMetric>>;

#[derive(Debug, Clone, Deserialize)]
pub struct LegacyMetricConfig {
    pub name: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub timestep: u32,
    #[serde(default)]
    pub aggregation: String,
    #[serde(default)]
    pub peak: f64,
    #[serde(default)]
    pub normal: f64,
    #[serde(default)]
    pub caution: f64,
    #[serde(default)]
    pub alert: f64,
}

/// `cluster.json` of a legacy archive
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyCluster {
    pub name: String,
    #[serde(default)]
    pub metric_config: Vec<LegacyMetricConfig>,
}

const PREFIXES: [&str; 8] = ["K", "M", "G", "T", "P", "E", "k", "m"];

/// Split a legacy unit string into prefix and normalized base unit
pub fn parse_unit(raw: &str) -> Unit {
    let raw = raw.trim();
    if raw.is_empty() {
        return Unit::default();
    }

    if let Some(base) = normalize_base(raw) {
        return Unit { prefix: None, base };
    }

    let (head, rest) = raw.split_at(raw.char_indices().nth(1).map_or(raw.len(), |(i, _)| i));
    if PREFIXES.contains(&head) {
        if let Some(base) = normalize_base(rest) {
            let prefix = if head == "k" { "K" } else { head };
            return Unit {
                prefix: Some(prefix.to_string()),
                base,
            };
        }
    }

    debug!(unit = raw, "Keeping unrecognised unit string as base");
    Unit {
        prefix: None,
        base: raw.to_string(),
    }
}

fn normalize_base(s: &str) -> Option<String> {
    let base = match s {
        "B" | "byte" | "bytes" => "B",
        "B/s" | "bytes/s" => "B/s",
        "F/s" | "Flop/s" | "flop/s" | "FLOP/s" | "flops" => "F/s",
        "CPI" | "cpi" => "CPI",
        "IPC" | "ipc" => "IPC",
        "Hz" => "Hz",
        "W" | "watt" | "watts" => "W",
        "J" | "joule" => "J",
        "Wh" => "Wh",
        "C" | "°C" | "degC" => "C",
        "%" | "percent" => "%",
        "s" | "sec" => "s",
        "load" => "load",
        _ => return None,
    };
    Some(base.to_string())
}

fn scope_of(raw: &str) -> Option<MetricScope> {
    match raw {
        "node" => Some(MetricScope::Node),
        "core" => Some(MetricScope::Core),
        "accelerator" => Some(MetricScope::Accelerator),
        _ => None,
    }
}

/// Convert a legacy job description
pub fn convert_meta(old: &LegacyJobMeta) -> JobMeta {
    let job = Job {
        id: old.id.unwrap_or_default(),
        job_id: old.job_id,
        cluster: old.cluster.clone(),
        sub_cluster: old.sub_cluster.clone(),
        state: old.job_state,
        num_nodes: old.num_nodes,
        start_time: old.start_time,
        duration: old.duration,
        resources: old
            .resources
            .iter()
            .map(|r| JobResource {
                hostname: r.hostname.clone(),
                hwthreads: r.hwthreads.clone().unwrap_or_default(),
                accelerators: r.accelerators.clone().unwrap_or_default(),
            })
            .collect(),
        footprint: HashMap::new(),
        energy_footprint: HashMap::new(),
        energy: 0.0,
    };

    let statistics = old
        .statistics
        .iter()
        .map(|(name, s)| {
            (
                name.clone(),
                JobStatistics {
                    unit: parse_unit(&s.unit),
                    avg: s.avg,
                    min: s.min,
                    max: s.max,
                },
            )
        })
        .collect();

    JobMeta { job, statistics }
}

/// Convert legacy metric data; scopes without a current equivalent are dropped
pub fn convert_data(old: &LegacyJobData) -> JobData {
    let mut data = JobData::new();

    for (name, scopes) in old {
        for (raw_scope, metric) in scopes {
            let Some(scope) = scope_of(raw_scope) else {
                warn!(metric = %name, scope = %raw_scope, "Dropping unsupported legacy scope");
                continue;
            };

            let series = metric
                .series
                .iter()
                .map(|s| Series {
                    hostname: s.hostname.clone(),
                    id: s.id.map(|id| id.to_string()),
                    statistics: s.statistics.map_or_else(
                        || MetricStatistics::from_samples(&s.data),
                        |st| MetricStatistics {
                            avg: st.avg,
                            min: st.min,
                            max: st.max,
                        },
                    ),
                    data: s.data.clone(),
                })
                .collect();

            data.entry(name.clone()).or_default().insert(
                scope,
                JobMetric {
                    unit: parse_unit(&metric.unit),
                    timestep: metric.timestep,
                    series,
                },
            );
        }
    }

    data
}

/// Convert a legacy cluster description
pub fn convert_cluster(old: &LegacyCluster) -> ClusterConfig {
    let metric_config = old
        .metric_config
        .iter()
        .map(|m| {
            let aggregation = if m.aggregation.is_empty() {
                warn!(cluster = %old.name, metric = %m.name, "Metric has no aggregation, assuming sum");
                "sum".to_string()
            } else {
                m.aggregation.clone()
            };
            MetricConfig {
                name: m.name.clone(),
                unit: parse_unit(&m.unit),
                scope: m
                    .scope
                    .as_deref()
                    .and_then(scope_of)
                    .unwrap_or(MetricScope::Node),
                timestep: m.timestep,
                peak: m.peak,
                normal: m.normal,
                caution: m.caution,
                alert: m.alert,
                aggregation,
                footprint: None,
                energy: None,
            }
        })
        .collect();

    ClusterConfig {
        name: old.name.clone(),
        metric_data_repository: None,
        metric_config,
    }
}
