//! Metric access facade
//!
//! Single entry point for job metric data. Running jobs (or every job when
//! the archive is disabled) are served from the live backend of their
//! cluster through the weighted cache; finished jobs are read from the
//! archive without caching.

use crate::archive::Archive;
use crate::cache::{WeightedCache, DEFAULT_CAPACITY_BYTES, DEFAULT_LIVE_TTL};
use crate::cluster::ClusterCatalog;
use crate::collector::{BackendRegistry, Collector, QueryContext};
use crate::error::{MetricDataError, Result};
use crate::health::{components, HealthRegistry};
use crate::models::{estimated_size, Job, JobData, MetricScope, NodeData};
use crate::observability::ServiceMetrics;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration of the metric dispatcher
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Serve finished jobs from the archive (default: true)
    pub archive_enabled: bool,
    /// Lifetime of cached live results (default: 2 minutes)
    pub live_ttl: Duration,
    /// Cache capacity in estimated bytes (default: 500 MiB)
    pub cache_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            archive_enabled: true,
            live_ttl: DEFAULT_LIVE_TTL,
            cache_capacity: DEFAULT_CAPACITY_BYTES,
        }
    }
}

pub struct MetricDispatcher {
    registry: Arc<BackendRegistry>,
    archive: Arc<dyn Archive>,
    catalog: Arc<ClusterCatalog>,
    cache: WeightedCache<String, Arc<JobData>>,
    config: DispatcherConfig,
    metrics: ServiceMetrics,
    health: Option<HealthRegistry>,
}

impl MetricDispatcher {
    pub fn new(
        registry: Arc<BackendRegistry>,
        archive: Arc<dyn Archive>,
        catalog: Arc<ClusterCatalog>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            registry,
            archive,
            catalog,
            cache: WeightedCache::new(config.cache_capacity),
            config,
            metrics: ServiceMetrics::new(),
            health: None,
        }
    }

    /// Report backend and archive outcomes to `health` as `metric_store`
    /// and `archive`
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn builder() -> MetricDispatcherBuilder {
        MetricDispatcherBuilder::new()
    }

    pub fn archive_enabled(&self) -> bool {
        self.config.archive_enabled
    }

    pub fn catalog(&self) -> &ClusterCatalog {
        &self.catalog
    }

    pub fn cache(&self) -> &WeightedCache<String, Arc<JobData>> {
        &self.cache
    }

    fn uses_live_path(&self, job: &Job) -> bool {
        job.state.is_running() || !self.config.archive_enabled
    }

    fn collector(&self, cluster: &str) -> Result<Arc<dyn Collector>> {
        self.registry
            .get(cluster)
            .ok_or_else(|| MetricDataError::NotConfigured {
                cluster: cluster.to_string(),
            })
    }

    /// Requested metrics, or every configured metric of the cluster
    fn resolve_metrics(&self, cluster: &str, metrics: &[String]) -> Vec<String> {
        if metrics.is_empty() {
            self.catalog.metric_names(cluster)
        } else {
            metrics.to_vec()
        }
    }

    /// Load metric data of a job
    ///
    /// Empty `metrics` selects all metrics configured for the job's
    /// cluster, empty `scopes` selects node scope.
    pub async fn load_data(
        &self,
        job: &Job,
        metrics: &[String],
        scopes: &[MetricScope],
        ctx: &QueryContext,
    ) -> Result<Arc<JobData>> {
        if !self.uses_live_path(job) {
            return self.load_archived(job, metrics, ctx).await;
        }

        let collector = self.collector(&job.cluster)?;
        let metrics = self.resolve_metrics(&job.cluster, metrics);
        let scopes = if scopes.is_empty() {
            vec![MetricScope::Node]
        } else {
            scopes.to_vec()
        };

        let key = cache_key(job, &metrics, &scopes);
        if let Some(data) = self.cache.get(&key) {
            self.metrics.inc_cache_hit();
            debug!(key = %key, "Cache hit");
            return Ok(data);
        }
        self.metrics.inc_cache_miss();

        let mut data = match with_context(ctx, collector.load_data(job, &metrics, &scopes, ctx)).await? {
            Ok(data) => data,
            Err(source) => return Err(self.upstream(&job.cluster, source).await),
        };
        self.record(components::METRIC_STORE, None).await;
        self.fill_metric_config(&job.cluster, &mut data);

        let data = Arc::new(data);
        let outcome = self.cache.put(
            key,
            Arc::clone(&data),
            estimated_size(&data),
            self.config.live_ttl,
        );
        if !outcome.stored {
            debug!(job_id = job.job_id, "Result exceeds cache capacity, not cached");
        }
        self.metrics.add_cache_evictions(outcome.evicted);
        let stats = self.cache.stats();
        self.metrics.set_cache_usage(stats.used_bytes, stats.entries);
        self.metrics.inc_metric_load("live");

        Ok(data)
    }

    async fn load_archived(&self, job: &Job, metrics: &[String], ctx: &QueryContext) -> Result<Arc<JobData>> {
        let mut data = match with_context(ctx, self.archive.load_job_data(job)).await? {
            Ok(data) => data,
            Err(source) => return Err(self.archive_read(job, source).await),
        };
        self.record(components::ARCHIVE, None).await;

        if !metrics.is_empty() {
            data.retain(|name, _| metrics.contains(name));
        }
        self.metrics.inc_metric_load("archive");
        Ok(Arc::new(data))
    }

    /// Per-metric sum of node averages, NaN where a metric has no data
    pub async fn load_averages(&self, job: &Job, metrics: &[String], ctx: &QueryContext) -> Result<Vec<f64>> {
        if !self.uses_live_path(job) {
            return match with_context(ctx, self.archive.load_averages(job, metrics)).await? {
                Ok(avgs) => {
                    self.record(components::ARCHIVE, None).await;
                    Ok(avgs)
                }
                Err(source) => Err(self.archive_read(job, source).await),
            };
        }

        let collector = self.collector(&job.cluster)?;
        let stats = match with_context(ctx, collector.load_stats(job, metrics, ctx)).await? {
            Ok(stats) => stats,
            Err(source) => return Err(self.upstream(&job.cluster, source).await),
        };
        self.record(components::METRIC_STORE, None).await;

        Ok(metrics
            .iter()
            .map(|m| match stats.get(m) {
                Some(nodes) => nodes.values().map(|s| s.avg).sum(),
                None => f64::NAN,
            })
            .collect())
    }

    /// Raw node-scope series of a cluster for a time range, always live
    pub async fn load_node_data(
        &self,
        cluster: &str,
        metrics: &[String],
        nodes: &[String],
        from: i64,
        to: i64,
        ctx: &QueryContext,
    ) -> Result<NodeData> {
        let collector = self.collector(cluster)?;
        let metrics = self.resolve_metrics(cluster, metrics);

        let data = match with_context(
            ctx,
            collector.load_node_data(cluster, &metrics, nodes, from, to, ctx),
        )
        .await?
        {
            Ok(data) => data,
            Err(source) => return Err(self.upstream(cluster, source).await),
        };
        self.record(components::METRIC_STORE, None).await;

        data.ok_or_else(|| MetricDataError::Unsupported {
            cluster: cluster.to_string(),
        })
    }

    /// Copy unit and timestep from the cluster configuration where the
    /// backend left them empty
    fn fill_metric_config(&self, cluster: &str, data: &mut JobData) {
        for (name, scopes) in data.iter_mut() {
            let Some(mc) = self.catalog.metric_config(cluster, name) else {
                continue;
            };
            for metric in scopes.values_mut() {
                if metric.unit.base.is_empty() {
                    metric.unit = mc.unit.clone();
                }
                if metric.timestep == 0 {
                    metric.timestep = mc.timestep;
                }
            }
        }
    }

    async fn upstream(&self, cluster: &str, source: anyhow::Error) -> MetricDataError {
        warn!(cluster = %cluster, error = %source, "Metric data repository request failed");
        self.metrics.inc_metric_load_error("upstream");
        self.record(
            components::METRIC_STORE,
            Some(format!("{}: {:#}", cluster, source)),
        )
        .await;
        MetricDataError::Upstream {
            cluster: cluster.to_string(),
            source,
        }
    }

    async fn archive_read(&self, job: &Job, source: anyhow::Error) -> MetricDataError {
        self.metrics.inc_metric_load_error("archive");
        self.record(
            components::ARCHIVE,
            Some(format!("job {}: {:#}", job.job_id, source)),
        )
        .await;
        MetricDataError::ArchiveRead {
            job_id: job.job_id,
            source,
        }
    }

    /// Success when `failure` is `None`
    async fn record(&self, component: &str, failure: Option<String>) {
        let Some(health) = &self.health else {
            return;
        };
        match failure {
            None => health.record_success(component).await,
            Some(message) => health.record_failure(component, message).await,
        }
    }
}

/// Cache key of a live request: job id plus sorted metric and scope sets
pub fn cache_key(job: &Job, metrics: &[String], scopes: &[MetricScope]) -> String {
    let mut metrics: Vec<&str> = metrics.iter().map(String::as_str).collect();
    metrics.sort_unstable();
    metrics.dedup();

    let mut scopes = scopes.to_vec();
    scopes.sort_unstable();
    scopes.dedup();
    let scopes: Vec<String> = scopes.iter().map(ToString::to_string).collect();

    format!("{}:[{}],[{}]", job.id, metrics.join(","), scopes.join(","))
}

/// Race `fut` against cancellation and the deadline of `ctx`
async fn with_context<T>(ctx: &QueryContext, fut: impl Future<Output = T>) -> Result<T> {
    if ctx.is_cancelled() {
        return Err(MetricDataError::Cancelled);
    }

    let deadline = async {
        match ctx.deadline() {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        biased;
        _ = ctx.token().cancelled() => Err(MetricDataError::Cancelled),
        _ = deadline => Err(MetricDataError::DeadlineExceeded),
        out = fut => Ok(out),
    }
}

/// Builder for the metric dispatcher
pub struct MetricDispatcherBuilder {
    registry: Option<Arc<BackendRegistry>>,
    archive: Option<Arc<dyn Archive>>,
    catalog: Option<Arc<ClusterCatalog>>,
    config: DispatcherConfig,
    health: Option<HealthRegistry>,
}

impl MetricDispatcherBuilder {
    pub fn new() -> Self {
        Self {
            registry: None,
            archive: None,
            catalog: None,
            config: DispatcherConfig::default(),
            health: None,
        }
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn registry(mut self, registry: Arc<BackendRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn archive(mut self, archive: Arc<dyn Archive>) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn catalog(mut self, catalog: Arc<ClusterCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn archive_enabled(mut self, enabled: bool) -> Self {
        self.config.archive_enabled = enabled;
        self
    }

    pub fn live_ttl(mut self, ttl: Duration) -> Self {
        self.config.live_ttl = ttl;
        self
    }

    pub fn cache_capacity(mut self, bytes: usize) -> Self {
        self.config.cache_capacity = bytes;
        self
    }

    pub fn build(self) -> anyhow::Result<MetricDispatcher> {
        let registry = self
            .registry
            .ok_or_else(|| anyhow::anyhow!("Backend registry is required"))?;
        let archive = self
            .archive
            .ok_or_else(|| anyhow::anyhow!("Archive is required"))?;
        let catalog = self
            .catalog
            .ok_or_else(|| anyhow::anyhow!("Cluster catalog is required"))?;

        let dispatcher = MetricDispatcher::new(registry, archive, catalog, self.config);
        Ok(match self.health {
            Some(health) => dispatcher.with_health(health),
            None => dispatcher,
        })
    }
}

impl Default for MetricDispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::ComponentStatus;
    use crate::testing::{cluster, finished_job, metric, node_data, running_job, series, MockCollector};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::assert_ok;

    #[derive(Default)]
    struct MemoryArchive {
        jobs: HashMap<i64, JobData>,
        loads: AtomicUsize,
    }

    #[async_trait]
    impl Archive for MemoryArchive {
        async fn load_job_data(&self, job: &Job) -> anyhow::Result<JobData> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.jobs
                .get(&job.id)
                .cloned()
                .ok_or_else(|| anyhow!("no archive record for job {}", job.job_id))
        }

        async fn load_averages(&self, job: &Job, metrics: &[String]) -> anyhow::Result<Vec<f64>> {
            let data = self.load_job_data(job).await?;
            Ok(metrics
                .iter()
                .map(|m| {
                    data.get(m)
                        .and_then(|s| s.get(&MetricScope::Node))
                        .map_or(f64::NAN, |jm| jm.series.iter().map(|s| s.statistics.avg).sum())
                })
                .collect())
        }

        async fn clean_up(&self, jobs: &[Job]) -> anyhow::Result<usize> {
            Ok(jobs.len())
        }

        async fn move_jobs(&self, jobs: &[Job], _location: &Path) -> anyhow::Result<usize> {
            Ok(jobs.len())
        }
    }

    fn collector() -> MockCollector {
        MockCollector::new()
            .with_metric("cpu_load", vec![series("node01", 4.0, 1.0, 5.0), series("node02", 6.0, 3.0, 9.0)])
            .with_metric("mem_bw", vec![series("node01", 10.0, 2.0, 20.0)])
            .with_metric("flops_any", vec![series("node01", 1.0, 1.0, 1.0)])
    }

    struct Fixture {
        dispatcher: MetricDispatcher,
        collector: Arc<MockCollector>,
        archive: Arc<MemoryArchive>,
    }

    fn fixture_with(collector: MockCollector, archive_enabled: bool) -> Fixture {
        let collector = Arc::new(collector);
        let registry = Arc::new(BackendRegistry::new());
        registry.register("fritz", Arc::clone(&collector) as Arc<dyn Collector>);

        let mut archive = MemoryArchive::default();
        archive
            .jobs
            .insert(1, node_data(&[("cpu_load", 2.5), ("mem_bw", 7.0)]));
        let archive = Arc::new(archive);

        let catalog = Arc::new(ClusterCatalog::new(vec![
            cluster("fritz", vec![metric("cpu_load", ""), metric("mem_bw", "B/s")]),
            cluster("woody", vec![metric("cpu_load", "")]),
        ]));

        let dispatcher = MetricDispatcher::builder()
            .registry(registry)
            .archive(Arc::clone(&archive) as Arc<dyn Archive>)
            .catalog(catalog)
            .archive_enabled(archive_enabled)
            .build()
            .unwrap();

        Fixture {
            dispatcher,
            collector,
            archive,
        }
    }

    fn fixture(archive_enabled: bool) -> Fixture {
        fixture_with(collector(), archive_enabled)
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_cache_key_is_order_independent() {
        let job = finished_job(42, "fritz", 0, 10);
        let a = cache_key(
            &job,
            &names(&["mem_bw", "cpu_load"]),
            &[MetricScope::Core, MetricScope::Node],
        );
        let b = cache_key(
            &job,
            &names(&["cpu_load", "mem_bw"]),
            &[MetricScope::Node, MetricScope::Core],
        );
        assert_eq!(a, b);
        assert_eq!(a, "42:[cpu_load,mem_bw],[node,core]");
    }

    #[tokio::test]
    async fn test_running_job_takes_live_path() {
        let f = fixture(true);
        let job = running_job(1, "fritz", 2);

        let data = f
            .dispatcher
            .load_data(&job, &[], &[], &QueryContext::background())
            .await
            .unwrap();
        assert_eq!(f.collector.calls(), 1);
        assert_eq!(f.archive.loads.load(Ordering::SeqCst), 0);
        assert_eq!(data["cpu_load"][&MetricScope::Node].series.len(), 2);
    }

    #[tokio::test]
    async fn test_finished_job_takes_archive_path() {
        let f = fixture(true);
        let job = finished_job(1, "fritz", 0, 100);

        let data = f
            .dispatcher
            .load_data(&job, &[], &[], &QueryContext::background())
            .await
            .unwrap();
        assert_eq!(f.collector.calls(), 0);
        assert_eq!(f.archive.loads.load(Ordering::SeqCst), 1);
        assert_eq!(data.len(), 2);

        // archive reads are never cached
        f.dispatcher
            .load_data(&job, &[], &[], &QueryContext::background())
            .await
            .unwrap();
        assert_eq!(f.archive.loads.load(Ordering::SeqCst), 2);
        assert!(f.dispatcher.cache().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_archive_forces_live_path() {
        let f = fixture(false);
        let job = finished_job(1, "fritz", 0, 100);

        assert_ok!(
            f.dispatcher
                .load_data(&job, &[], &[], &QueryContext::background())
                .await
        );
        assert_eq!(f.collector.calls(), 1);
        assert_eq!(f.archive.loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_archive_projection() {
        let f = fixture(true);
        let job = finished_job(1, "fritz", 0, 100);

        let data = f
            .dispatcher
            .load_data(&job, &names(&["mem_bw", "flops_any"]), &[], &QueryContext::background())
            .await
            .unwrap();
        assert_eq!(data.len(), 1);
        assert!(data.contains_key("mem_bw"));
    }

    #[tokio::test]
    async fn test_default_metrics_are_configured_set() {
        let f = fixture(true);
        let job = running_job(2, "fritz", 1);

        let data = f
            .dispatcher
            .load_data(&job, &[], &[], &QueryContext::background())
            .await
            .unwrap();
        let mut keys: Vec<&str> = data.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["cpu_load", "mem_bw"]);

        // unit and timestep come from the cluster configuration
        let mem = &data["mem_bw"][&MetricScope::Node];
        assert_eq!(mem.unit.base, "B/s");
        assert_eq!(mem.timestep, 60);
    }

    #[tokio::test]
    async fn test_live_results_are_cached() {
        let f = fixture(true);
        let job = running_job(3, "fritz", 1);
        let ctx = QueryContext::background();

        f.dispatcher
            .load_data(&job, &names(&["mem_bw", "cpu_load"]), &[], &ctx)
            .await
            .unwrap();
        let again = f
            .dispatcher
            .load_data(&job, &names(&["cpu_load", "mem_bw"]), &[MetricScope::Node], &ctx)
            .await
            .unwrap();
        assert_eq!(f.collector.calls(), 1);
        assert_eq!(again.len(), 2);

        f.dispatcher
            .load_data(&job, &names(&["cpu_load"]), &[], &ctx)
            .await
            .unwrap();
        assert_eq!(f.collector.calls(), 2);
    }

    #[tokio::test]
    async fn test_unknown_cluster_not_configured() {
        let f = fixture(true);
        let job = running_job(4, "woody", 1);

        let err = f
            .dispatcher
            .load_data(&job, &[], &[], &QueryContext::background())
            .await
            .unwrap_err();
        assert!(matches!(err, MetricDataError::NotConfigured { ref cluster } if cluster == "woody"));
    }

    #[tokio::test]
    async fn test_upstream_failure_not_cached() {
        let f = fixture(true);
        f.collector.fail.store(true, Ordering::SeqCst);
        let job = running_job(5, "fritz", 1);

        let err = f
            .dispatcher
            .load_data(&job, &[], &[], &QueryContext::background())
            .await
            .unwrap_err();
        assert!(matches!(err, MetricDataError::Upstream { .. }));
        assert!(f.dispatcher.cache().is_empty());
    }

    #[tokio::test]
    async fn test_missing_archive_record() {
        let f = fixture(true);
        let job = finished_job(99, "fritz", 0, 100);

        let err = f
            .dispatcher
            .load_data(&job, &[], &[], &QueryContext::background())
            .await
            .unwrap_err();
        assert!(matches!(err, MetricDataError::ArchiveRead { job_id: 1099, .. }));
    }

    #[tokio::test]
    async fn test_load_averages_live_sums_nodes() {
        let f = fixture(true);
        let job = running_job(6, "fritz", 2);

        let avgs = f
            .dispatcher
            .load_averages(&job, &names(&["cpu_load", "ipc"]), &QueryContext::background())
            .await
            .unwrap();
        assert_eq!(avgs[0], 10.0);
        assert!(avgs[1].is_nan());
    }

    #[tokio::test]
    async fn test_load_averages_archive() {
        let f = fixture(true);
        let job = finished_job(1, "fritz", 0, 100);

        let avgs = f
            .dispatcher
            .load_averages(&job, &names(&["mem_bw", "ipc"]), &QueryContext::background())
            .await
            .unwrap();
        assert_eq!(avgs[0], 7.0);
        assert!(avgs[1].is_nan());
        assert_eq!(f.collector.calls(), 0);
    }

    #[tokio::test]
    async fn test_load_node_data() {
        let f = fixture(true);
        let ctx = QueryContext::background();

        let data = f
            .dispatcher
            .load_node_data("fritz", &[], &names(&["node02"]), 0, 60, &ctx)
            .await
            .unwrap();
        assert_eq!(data.len(), 1);
        assert!(data["node02"].contains_key("cpu_load"));

        let err = f
            .dispatcher
            .load_node_data("woody", &[], &[], 0, 60, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, MetricDataError::NotConfigured { .. }));
    }

    #[tokio::test]
    async fn test_node_data_unsupported() {
        let mut collector = collector();
        collector.supports_node_data = false;
        let f = fixture_with(collector, true);

        let err = f
            .dispatcher
            .load_node_data("fritz", &[], &[], 0, 60, &QueryContext::background())
            .await
            .unwrap_err();
        assert!(matches!(err, MetricDataError::Unsupported { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_context() {
        let f = fixture(true);
        let ctx = QueryContext::background();
        ctx.cancel();

        let err = f
            .dispatcher
            .load_data(&running_job(7, "fritz", 1), &[], &[], &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, MetricDataError::Cancelled));
        assert_eq!(f.collector.calls(), 0);
    }

    #[tokio::test]
    async fn test_deadline_exceeded_leaves_cache_untouched() {
        let mut collector = collector();
        collector.delay = Some(Duration::from_millis(500));
        let f = fixture_with(collector, true);
        let job = running_job(8, "fritz", 1);

        let err = f
            .dispatcher
            .load_data(&job, &[], &[], &QueryContext::with_timeout(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, MetricDataError::DeadlineExceeded));
        assert!(f.dispatcher.cache().is_empty());
    }

    #[tokio::test]
    async fn test_upstream_failures_tracked_in_health() {
        let f = fixture(true);
        let health = HealthRegistry::new();
        health.register(components::METRIC_STORE).await;
        let dispatcher = f.dispatcher.with_health(health.clone());
        let job = running_job(5, "fritz", 1);
        let ctx = QueryContext::background();

        f.collector.fail.store(true, Ordering::SeqCst);
        assert!(dispatcher.load_data(&job, &[], &[], &ctx).await.is_err());
        let status = health.health().await.components[components::METRIC_STORE].clone();
        assert_eq!(status.status, ComponentStatus::Degraded);
        assert_eq!(status.consecutive_failures, 1);

        assert!(dispatcher.load_averages(&job, &names(&["cpu_load"]), &ctx).await.is_err());
        assert!(dispatcher
            .load_node_data("fritz", &names(&["cpu_load"]), &[], 0, 60, &ctx)
            .await
            .is_err());
        let status = health.health().await.components[components::METRIC_STORE].clone();
        assert_eq!(status.status, ComponentStatus::Unhealthy);
        assert_eq!(status.consecutive_failures, 3);

        f.collector.fail.store(false, Ordering::SeqCst);
        assert_ok!(dispatcher.load_data(&job, &[], &[], &ctx).await);
        let status = health.health().await.components[components::METRIC_STORE].clone();
        assert_eq!(status.status, ComponentStatus::Healthy);
        assert_eq!(status.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_archive_failures_tracked_in_health() {
        let f = fixture(true);
        let health = HealthRegistry::new();
        health.register(components::ARCHIVE).await;
        let dispatcher = f.dispatcher.with_health(health.clone());
        let ctx = QueryContext::background();

        let missing = finished_job(99, "fritz", 0, 100);
        assert!(dispatcher.load_data(&missing, &[], &[], &ctx).await.is_err());
        assert!(dispatcher.load_averages(&missing, &names(&["cpu_load"]), &ctx).await.is_err());
        let status = health.health().await.components[components::ARCHIVE].clone();
        assert_eq!(status.status, ComponentStatus::Degraded);
        assert_eq!(status.consecutive_failures, 2);
        assert!(!health.health().await.components.contains_key(components::METRIC_STORE));

        let archived = finished_job(1, "fritz", 0, 100);
        assert_ok!(dispatcher.load_data(&archived, &[], &[], &ctx).await);
        let status = health.health().await.components[components::ARCHIVE].clone();
        assert_eq!(status.status, ComponentStatus::Healthy);
    }
}
