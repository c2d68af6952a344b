//! Fixtures shared by the unit tests of this crate

use crate::cluster::{ClusterConfig, MetricConfig, MetricDataRepositoryConfig};
use crate::collector::{async_trait, Collector, QueryContext};
use crate::models::*;
use crate::repository::{JobRepository, JobUpdate, MemoryJobRepository, Transaction};
use anyhow::{bail, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

pub fn metric(name: &str, base: &str) -> MetricConfig {
    MetricConfig {
        name: name.to_string(),
        unit: Unit {
            prefix: None,
            base: base.to_string(),
        },
        scope: MetricScope::Node,
        timestep: 60,
        peak: 100.0,
        normal: 50.0,
        caution: 10.0,
        alert: 5.0,
        aggregation: "sum".to_string(),
        footprint: None,
        energy: None,
    }
}

pub fn cluster(name: &str, metrics: Vec<MetricConfig>) -> ClusterConfig {
    ClusterConfig {
        name: name.to_string(),
        metric_data_repository: Some(MetricDataRepositoryConfig {
            kind: "test".to_string(),
            url: "http://localhost:8082".to_string(),
            token: String::new(),
        }),
        metric_config: metrics,
    }
}

pub fn finished_job(id: i64, cluster: &str, start_time: i64, duration: i64) -> Job {
    Job {
        id,
        job_id: 1000 + id,
        cluster: cluster.to_string(),
        sub_cluster: "main".to_string(),
        state: JobState::Completed,
        num_nodes: 1,
        start_time,
        duration,
        resources: vec![JobResource {
            hostname: "node01".to_string(),
            hwthreads: vec![0, 1],
            accelerators: vec![],
        }],
        footprint: HashMap::new(),
        energy_footprint: HashMap::new(),
        energy: 0.0,
    }
}

pub fn running_job(id: i64, cluster: &str, num_nodes: u32) -> Job {
    let mut job = finished_job(id, cluster, chrono::Utc::now().timestamp() - 600, 600);
    job.state = JobState::Running;
    job.num_nodes = num_nodes;
    job.resources = (1..=num_nodes)
        .map(|n| JobResource {
            hostname: format!("node{:02}", n),
            hwthreads: vec![0, 1],
            accelerators: vec![],
        })
        .collect();
    job
}

pub fn series(hostname: &str, avg: f64, min: f64, max: f64) -> Series {
    Series {
        hostname: hostname.to_string(),
        id: None,
        statistics: MetricStatistics { avg, min, max },
        data: vec![min, avg, max],
    }
}

pub fn node_data(metrics: &[(&str, f64)]) -> JobData {
    let mut data = JobData::new();
    for (name, value) in metrics {
        data.entry(name.to_string()).or_default().insert(
            MetricScope::Node,
            JobMetric {
                unit: Unit::default(),
                timestep: 60,
                series: vec![series("node01", *value, *value, *value)],
            },
        );
    }
    data
}

pub fn meta_with_avgs(job: Job, avgs: &[(&str, f64)]) -> JobMeta {
    let mut meta = JobMeta::new(job);
    for (name, avg) in avgs {
        meta.statistics.insert(
            name.to_string(),
            JobStatistics {
                unit: Unit::default(),
                avg: *avg,
                min: *avg,
                max: *avg,
            },
        );
    }
    meta
}

/// Collector answering from a fixed per-metric dataset
///
/// `load_data` returns the node-scope series of every requested metric it
/// knows; unknown metrics are simply absent.
pub struct MockCollector {
    pub series: HashMap<String, Vec<Series>>,
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
    pub delay: Option<Duration>,
    pub supports_node_data: bool,
}

impl MockCollector {
    pub fn new() -> Self {
        Self {
            series: HashMap::new(),
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            delay: None,
            supports_node_data: true,
        }
    }

    pub fn with_metric(mut self, name: &str, series: Vec<Series>) -> Self {
        self.series.insert(name.to_string(), series);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            bail!("backend unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl Collector for MockCollector {
    async fn load_data(
        &self,
        _job: &Job,
        metrics: &[String],
        scopes: &[MetricScope],
        _ctx: &QueryContext,
    ) -> Result<JobData> {
        self.enter().await?;
        let mut data = JobData::new();
        for name in metrics {
            let Some(series) = self.series.get(name) else {
                continue;
            };
            if scopes.contains(&MetricScope::Node) {
                data.entry(name.clone()).or_default().insert(
                    MetricScope::Node,
                    JobMetric {
                        unit: Unit::default(),
                        timestep: 0,
                        series: series.clone(),
                    },
                );
            }
        }
        Ok(data)
    }

    async fn load_stats(&self, _job: &Job, metrics: &[String], _ctx: &QueryContext) -> Result<JobStats> {
        self.enter().await?;
        let mut stats = JobStats::new();
        for name in metrics {
            if let Some(series) = self.series.get(name) {
                let per_node = series
                    .iter()
                    .map(|s| (s.hostname.clone(), s.statistics))
                    .collect();
                stats.insert(name.clone(), per_node);
            }
        }
        Ok(stats)
    }

    async fn load_node_data(
        &self,
        _cluster: &str,
        metrics: &[String],
        nodes: &[String],
        _from: i64,
        _to: i64,
        _ctx: &QueryContext,
    ) -> Result<Option<NodeData>> {
        self.enter().await?;
        if !self.supports_node_data {
            return Ok(None);
        }
        let mut data = NodeData::new();
        for name in metrics {
            for s in self.series.get(name).into_iter().flatten() {
                if nodes.is_empty() || nodes.contains(&s.hostname) {
                    data.entry(s.hostname.clone())
                        .or_default()
                        .insert(name.clone(), s.data.clone());
                }
            }
        }
        Ok(Some(data))
    }
}

/// Job repository whose operations can be made to fail one by one
///
/// Delegates to a [`MemoryJobRepository`] and records the size of every
/// successful commit.
pub struct FailingRepository {
    pub inner: Arc<MemoryJobRepository>,
    /// Cluster whose running jobs cannot be listed
    pub fail_running_for: Option<String>,
    pub fail_init: AtomicBool,
    pub fail_find: AtomicBool,
    pub fail_delete: AtomicBool,
    pub commits: parking_lot::Mutex<Vec<usize>>,
}

impl FailingRepository {
    pub fn new(inner: Arc<MemoryJobRepository>) -> Self {
        Self {
            inner,
            fail_running_for: None,
            fail_init: AtomicBool::new(false),
            fail_find: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            commits: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn commits(&self) -> Vec<usize> {
        self.commits.lock().clone()
    }
}

#[async_trait]
impl JobRepository for FailingRepository {
    async fn find_jobs_between(&self, from: i64, to: i64) -> Result<Vec<Job>> {
        if self.fail_find.load(Ordering::SeqCst) {
            bail!("job table unavailable");
        }
        self.inner.find_jobs_between(from, to).await
    }

    async fn find_running_jobs(&self, cluster: &str) -> Result<Vec<Job>> {
        if self.fail_running_for.as_deref() == Some(cluster) {
            bail!("query for cluster {} failed", cluster);
        }
        self.inner.find_running_jobs(cluster).await
    }

    async fn delete_jobs_before(&self, ts: i64) -> Result<usize> {
        if self.fail_delete.load(Ordering::SeqCst) {
            bail!("delete statement failed");
        }
        self.inner.delete_jobs_before(ts).await
    }

    async fn optimize(&self) -> Result<()> {
        self.inner.optimize().await
    }

    async fn transaction_init(&self) -> Result<Transaction> {
        if self.fail_init.load(Ordering::SeqCst) {
            bail!("database is locked");
        }
        self.inner.transaction_init().await
    }

    async fn transaction_add(&self, tx: &mut Transaction, stmt: JobUpdate) -> Result<()> {
        self.inner.transaction_add(tx, stmt).await
    }

    async fn transaction_commit(&self, tx: &mut Transaction) -> Result<()> {
        let batch = tx.pending();
        self.inner.transaction_commit(tx).await?;
        self.commits.lock().push(batch);
        Ok(())
    }

    async fn transaction_end(&self, tx: Transaction) -> Result<()> {
        self.inner.transaction_end(tx).await
    }

    fn update_footprint(&self, stmt: JobUpdate, meta: &JobMeta) -> Result<JobUpdate> {
        self.inner.update_footprint(stmt, meta)
    }

    fn update_energy(&self, stmt: JobUpdate, meta: &JobMeta) -> Result<JobUpdate> {
        self.inner.update_energy(stmt, meta)
    }
}
