//! Periodic footprint aggregation of running jobs

use super::ScheduledTask;
use crate::collector::QueryContext;
use crate::dispatcher::MetricDispatcher;
use crate::health::components;
use crate::models::{round2, Job, JobData, JobMeta, JobStatistics, MetricScope, MetricStatistics, Series};
use crate::observability::{ServiceMetrics, StructuredLogger};
use crate::repository::{JobRepository, JobUpdate};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Upper bound for loading the data of a single job
const JOB_QUERY_TIMEOUT: Duration = Duration::from_secs(60);

const ALL_SCOPES: [MetricScope; 3] = [MetricScope::Node, MetricScope::Core, MetricScope::Accelerator];

/// Outcome of one aggregation run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FootprintRunStats {
    /// Jobs whose update was committed
    pub processed: usize,
    pub skipped: usize,
    /// Running jobs found over all clusters
    pub total: usize,
    /// Metrics left out because node-scope data was missing
    pub incomplete_metrics: usize,
}

/// Combine per-node series of a metric into job-level statistics
///
/// `avg` is the sum of node averages divided by the node count, `min` and
/// `max` are taken over all nodes; every value is rounded to 2 decimals.
pub fn aggregate_node_series(series: &[Series], num_nodes: u32) -> MetricStatistics {
    let nodes = if num_nodes == 0 {
        series.len().max(1)
    } else {
        num_nodes as usize
    };

    let sum: f64 = series.iter().map(|s| s.statistics.avg).sum();
    let min = series
        .iter()
        .map(|s| s.statistics.min)
        .fold(f64::NAN, f64::min);
    let max = series
        .iter()
        .map(|s| s.statistics.max)
        .fold(f64::NAN, f64::max);

    MetricStatistics {
        avg: round2(sum / nodes as f64),
        min: round2(min),
        max: round2(max),
    }
}

/// Scheduled task writing footprint and energy of running jobs
pub struct FootprintWorker {
    dispatcher: Arc<MetricDispatcher>,
    repository: Arc<dyn JobRepository>,
    logger: StructuredLogger,
    metrics: ServiceMetrics,
}

impl FootprintWorker {
    pub fn new(
        dispatcher: Arc<MetricDispatcher>,
        repository: Arc<dyn JobRepository>,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            dispatcher,
            repository,
            logger,
            metrics: ServiceMetrics::new(),
        }
    }

    /// Aggregate all running jobs of all clusters once
    ///
    /// Fails only when the outer transaction cannot be opened. Any other
    /// failure skips the affected job or cluster.
    pub async fn run_once(&self) -> Result<FootprintRunStats> {
        let start = Instant::now();
        let repo = &self.repository;
        let mut tx = repo
            .transaction_init()
            .await
            .context("Failed to open footprint transaction")?;
        let mut stats = FootprintRunStats::default();

        for cluster in self.dispatcher.catalog().clusters() {
            let jobs = match repo.find_running_jobs(&cluster.name).await {
                Ok(jobs) => jobs,
                Err(e) => {
                    warn!(cluster = %cluster.name, error = %e, "Failed to list running jobs, skipping cluster");
                    continue;
                }
            };
            stats.total += jobs.len();

            let mut queued = 0;
            for job in &jobs {
                match self.build_update(job, &mut stats).await {
                    Ok(stmt) => match repo.transaction_add(&mut tx, stmt).await {
                        Ok(()) => queued += 1,
                        Err(e) => {
                            warn!(job_id = job.job_id, error = %e, "Failed to queue footprint update");
                            stats.skipped += 1;
                        }
                    },
                    Err(e) => {
                        warn!(job_id = job.job_id, cluster = %cluster.name, error = %e, "Skipping job footprint");
                        stats.skipped += 1;
                    }
                }
            }

            if queued == 0 {
                continue;
            }
            match repo.transaction_commit(&mut tx).await {
                Ok(()) => {
                    stats.processed += queued;
                    debug!(cluster = %cluster.name, jobs = queued, "Committed footprint batch");
                }
                Err(e) => {
                    warn!(cluster = %cluster.name, jobs = queued, error = %e, "Failed to commit footprint batch");
                    stats.skipped += queued;
                }
            }
        }

        if let Err(e) = repo.transaction_end(tx).await {
            warn!(error = %e, "Failed to close footprint transaction");
        }

        let elapsed = start.elapsed();
        self.metrics
            .observe_footprint_run(elapsed.as_secs_f64(), stats.processed, stats.skipped);
        self.logger
            .log_footprint_run(stats.processed, stats.skipped, stats.total, elapsed.as_millis());
        Ok(stats)
    }

    async fn build_update(&self, job: &Job, stats: &mut FootprintRunStats) -> Result<JobUpdate> {
        let ctx = QueryContext::with_timeout(JOB_QUERY_TIMEOUT);
        let data = self
            .dispatcher
            .load_data(job, &[], &ALL_SCOPES, &ctx)
            .await
            .context("Failed to load job data")?;

        let meta = self.job_meta(job, &data, stats);
        let stmt = self
            .repository
            .update_footprint(JobUpdate::for_job(job.id), &meta)?;
        self.repository.update_energy(stmt, &meta)
    }

    fn job_meta(&self, job: &Job, data: &JobData, stats: &mut FootprintRunStats) -> JobMeta {
        let mut meta = JobMeta::new(job.clone());
        // a running job's row holds the duration of its last update
        let elapsed = chrono::Utc::now().timestamp() - job.start_time;
        meta.job.duration = meta.job.duration.max(elapsed);

        for name in self.dispatcher.catalog().metric_names(&job.cluster) {
            let Some(node) = data.get(&name).and_then(|s| s.get(&MetricScope::Node)) else {
                warn!(job_id = job.job_id, metric = %name, "No node-scope data for metric");
                stats.incomplete_metrics += 1;
                continue;
            };

            let agg = aggregate_node_series(&node.series, job.num_nodes);
            meta.statistics.insert(
                name,
                JobStatistics {
                    unit: node.unit.clone(),
                    avg: agg.avg,
                    min: agg.min,
                    max: agg.max,
                },
            );
        }
        meta
    }
}

#[async_trait]
impl ScheduledTask for FootprintWorker {
    fn name(&self) -> &str {
        components::FOOTPRINT_WORKER
    }

    async fn run(&self) -> Result<()> {
        self.run_once().await.map(|_| ())
    }
}
