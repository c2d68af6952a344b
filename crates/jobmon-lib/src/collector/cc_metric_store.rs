//! Collector for the cc-metric-store HTTP API
//!
//! Every request is a single `POST {url}/api/query/` carrying one query per
//! (metric, host) pair. Core and accelerator scopes are expressed through
//! the `type`/`type-ids` fields using the job's allocated hardware. Node
//! queries without a host list use `for-all-nodes`; the store then echoes
//! the expanded queries so results can be keyed by host.

use super::{async_trait, Collector, QueryContext};
use crate::models::{
    Job, JobData, JobMetric, JobStats, MetricScope, MetricStatistics, NodeData, Series, Unit,
};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Default request timeout when the caller sets no deadline
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct ApiQueryRequest<'a> {
    cluster: &'a str,
    from: i64,
    to: i64,
    #[serde(rename = "with-stats")]
    with_stats: bool,
    #[serde(rename = "with-data")]
    with_data: bool,
    queries: Vec<ApiQuery>,
    #[serde(rename = "for-all-nodes", skip_serializing_if = "Vec::is_empty")]
    for_all_nodes: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
struct ApiQuery {
    metric: String,
    host: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    kind: Option<&'static str>,
    #[serde(rename = "type-ids", skip_serializing_if = "Vec::is_empty")]
    type_ids: Vec<String>,
    #[serde(rename = "aggreg")]
    aggregate: bool,
}

#[derive(Debug, Deserialize)]
struct ApiQueryResponse {
    /// Expanded queries, only present for `for-all-nodes` requests
    #[serde(default)]
    queries: Vec<ApiResultQuery>,
    #[serde(default)]
    results: Vec<Vec<ApiMetricData>>,
}

#[derive(Debug, Deserialize)]
struct ApiResultQuery {
    metric: String,
    host: String,
}

#[derive(Debug, Deserialize)]
struct ApiMetricData {
    #[serde(default)]
    error: Option<String>,
    #[serde(default, with = "crate::models::nan_as_null")]
    data: Vec<f64>,
    #[serde(default)]
    resolution: Option<u32>,
    #[serde(default)]
    avg: Option<f64>,
    #[serde(default)]
    min: Option<f64>,
    #[serde(default)]
    max: Option<f64>,
}

impl ApiMetricData {
    fn statistics(&self) -> MetricStatistics {
        match (self.avg, self.min, self.max) {
            (Some(avg), Some(min), Some(max)) => MetricStatistics { avg, min, max },
            _ => MetricStatistics::from_samples(&self.data),
        }
    }
}

/// Identifies which job/scope/unit a query belongs to
struct QueryTarget {
    metric: String,
    scope: MetricScope,
    hostname: String,
    ids: Vec<String>,
}

/// Client for one cc-metric-store instance
pub struct CcMetricStore {
    query_url: Url,
    token: String,
    client: reqwest::Client,
}

impl CcMetricStore {
    /// Backend kind string used in configuration
    pub const KIND: &'static str = "cc-metric-store";

    /// Create a client for the store reachable at `url`
    pub fn new(url: &str, token: &str) -> Result<Self> {
        let base = Url::parse(url).with_context(|| format!("Invalid metric store URL '{}'", url))?;
        let query_url = base
            .join("api/query/")
            .context("Failed to build query URL")?;

        let client = reqwest::Client::builder()
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            query_url,
            token: token.to_string(),
            client,
        })
    }

    async fn query(&self, request: &ApiQueryRequest<'_>, ctx: &QueryContext) -> Result<ApiQueryResponse> {
        let timeout = ctx
            .deadline()
            .map(|d| d.saturating_duration_since(tokio::time::Instant::now()))
            .unwrap_or(DEFAULT_TIMEOUT);

        let mut builder = self.client.post(self.query_url.clone()).timeout(timeout).json(request);
        if !self.token.is_empty() {
            builder = builder.bearer_auth(&self.token);
        }

        let response = builder.send().await.context("Metric store request failed")?;
        let status = response.status();
        if !status.is_success() {
            bail!("Metric store returned {}", status);
        }

        let body: ApiQueryResponse = response
            .json()
            .await
            .context("Failed to decode metric store response")?;

        let expected = if request.for_all_nodes.is_empty() {
            request.queries.len()
        } else {
            body.queries.len()
        };
        if body.results.len() != expected {
            bail!(
                "Metric store returned {} results for {} queries",
                body.results.len(),
                expected
            );
        }
        Ok(body)
    }

    /// Queries and their targets for a job at the requested scopes
    ///
    /// The store records per-core metrics at hardware thread granularity, so
    /// core scope is queried as `hwthread` with the job's hwthread ids and
    /// every returned series is stored under [`MetricScope::Core`].
    fn build_queries(job: &Job, metrics: &[String], scopes: &[MetricScope]) -> (Vec<ApiQuery>, Vec<QueryTarget>) {
        let mut queries = Vec::new();
        let mut targets = Vec::new();

        for metric in metrics {
            for scope in scopes {
                for resource in &job.resources {
                    let (kind, ids) = match scope {
                        MetricScope::Node => (None, Vec::new()),
                        MetricScope::Core => {
                            if resource.hwthreads.is_empty() {
                                continue;
                            }
                            let ids = resource.hwthreads.iter().map(u32::to_string).collect();
                            (Some("hwthread"), ids)
                        }
                        MetricScope::Accelerator => {
                            if resource.accelerators.is_empty() {
                                continue;
                            }
                            (Some("accelerator"), resource.accelerators.clone())
                        }
                    };

                    queries.push(ApiQuery {
                        metric: metric.clone(),
                        host: resource.hostname.clone(),
                        kind,
                        type_ids: ids.clone(),
                        aggregate: false,
                    });
                    targets.push(QueryTarget {
                        metric: metric.clone(),
                        scope: *scope,
                        hostname: resource.hostname.clone(),
                        ids,
                    });
                }
            }
        }

        (queries, targets)
    }

    fn time_range(job: &Job) -> (i64, i64) {
        let to = if job.state.is_running() {
            chrono::Utc::now().timestamp()
        } else {
            job.end_time()
        };
        (job.start_time, to)
    }
}

#[async_trait]
impl Collector for CcMetricStore {
    async fn load_data(
        &self,
        job: &Job,
        metrics: &[String],
        scopes: &[MetricScope],
        ctx: &QueryContext,
    ) -> Result<JobData> {
        let (queries, targets) = Self::build_queries(job, metrics, scopes);
        let (from, to) = Self::time_range(job);
        let request = ApiQueryRequest {
            cluster: &job.cluster,
            from,
            to,
            with_stats: true,
            with_data: true,
            queries,
            for_all_nodes: Vec::new(),
        };

        let response = self.query(&request, ctx).await?;
        let mut data = JobData::new();

        for (target, results) in targets.into_iter().zip(response.results) {
            for (i, result) in results.into_iter().enumerate() {
                if let Some(err) = &result.error {
                    debug!(job_id = job.job_id, metric = %target.metric, host = %target.hostname, error = %err, "Metric store reported missing data");
                    continue;
                }

                let metric = data
                    .entry(target.metric.clone())
                    .or_default()
                    .entry(target.scope)
                    .or_insert_with(|| JobMetric {
                        unit: Unit::default(),
                        timestep: result.resolution.unwrap_or(0),
                        series: Vec::new(),
                    });

                metric.series.push(Series {
                    hostname: target.hostname.clone(),
                    id: target.ids.get(i).cloned(),
                    statistics: result.statistics(),
                    data: result.data,
                });
            }
        }

        Ok(data)
    }

    async fn load_stats(&self, job: &Job, metrics: &[String], ctx: &QueryContext) -> Result<JobStats> {
        let (queries, targets) = Self::build_queries(job, metrics, &[MetricScope::Node]);
        let (from, to) = Self::time_range(job);
        let request = ApiQueryRequest {
            cluster: &job.cluster,
            from,
            to,
            with_stats: true,
            with_data: false,
            queries,
            for_all_nodes: Vec::new(),
        };

        let response = self.query(&request, ctx).await?;
        let mut stats = JobStats::new();

        for (target, results) in targets.into_iter().zip(response.results) {
            let Some(result) = results.into_iter().next() else {
                continue;
            };
            if let Some(err) = result.error {
                warn!(job_id = job.job_id, metric = %target.metric, host = %target.hostname, error = %err, "Missing statistics");
                continue;
            }
            stats
                .entry(target.metric)
                .or_default()
                .insert(target.hostname, result.statistics());
        }

        Ok(stats)
    }

    async fn load_node_data(
        &self,
        cluster: &str,
        metrics: &[String],
        nodes: &[String],
        from: i64,
        to: i64,
        ctx: &QueryContext,
    ) -> Result<Option<NodeData>> {
        let mut queries = Vec::with_capacity(nodes.len() * metrics.len());
        for node in nodes {
            for metric in metrics {
                queries.push(ApiQuery {
                    metric: metric.clone(),
                    host: node.clone(),
                    kind: None,
                    type_ids: Vec::new(),
                    aggregate: false,
                });
            }
        }

        let request = ApiQueryRequest {
            cluster,
            from,
            to,
            with_stats: false,
            with_data: true,
            for_all_nodes: if nodes.is_empty() {
                metrics.to_vec()
            } else {
                Vec::new()
            },
            queries,
        };

        let response = self.query(&request, ctx).await?;
        let targets: Vec<(String, String)> = if request.for_all_nodes.is_empty() {
            request
                .queries
                .iter()
                .map(|q| (q.host.clone(), q.metric.clone()))
                .collect()
        } else {
            response
                .queries
                .iter()
                .map(|q| (q.host.clone(), q.metric.clone()))
                .collect()
        };

        let mut data: NodeData = HashMap::new();
        for ((host, metric), results) in targets.into_iter().zip(response.results) {
            let Some(result) = results.into_iter().next() else {
                continue;
            };
            if let Some(err) = result.error {
                debug!(node = %host, metric = %metric, error = %err, "Missing node data");
                continue;
            }
            data.entry(host).or_default().insert(metric, result.data);
        }

        Ok(Some(data))
    }
}
