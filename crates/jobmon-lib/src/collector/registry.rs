//! Backend registry and kind-to-constructor factory

use super::{CcMetricStore, Collector};
use crate::cluster::ClusterConfig;
use crate::error::{MetricDataError, Result};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Builds a collector from the backend URL and access token
pub type CollectorConstructor =
    Arc<dyn Fn(&str, &str) -> anyhow::Result<Arc<dyn Collector>> + Send + Sync>;

/// Map from backend kind to collector constructor
#[derive(Clone, Default)]
pub struct CollectorFactory {
    constructors: HashMap<String, CollectorConstructor>,
}

impl CollectorFactory {
    /// An empty factory
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory knowing all backend kinds shipped with this crate
    pub fn with_builtin() -> Self {
        let mut factory = Self::new();
        factory.register(CcMetricStore::KIND, |url, token| {
            Ok(Arc::new(CcMetricStore::new(url, token)?) as Arc<dyn Collector>)
        });
        factory
    }

    /// Add or replace the constructor for a backend kind
    pub fn register<F>(&mut self, kind: impl Into<String>, constructor: F)
    where
        F: Fn(&str, &str) -> anyhow::Result<Arc<dyn Collector>> + Send + Sync + 'static,
    {
        self.constructors.insert(kind.into(), Arc::new(constructor));
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    fn construct(&self, kind: &str, url: &str, token: &str) -> Option<anyhow::Result<Arc<dyn Collector>>> {
        self.constructors.get(kind).map(|c| c(url, token))
    }
}

/// Registry of the live collector serving each cluster
pub struct BackendRegistry {
    /// Map of cluster name -> collector
    collectors: DashMap<String, Arc<dyn Collector>>,
}

impl BackendRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            collectors: DashMap::new(),
        }
    }

    /// Build the registry for all clusters that configure a backend
    ///
    /// Fails on the first unknown kind or failing constructor, since the
    /// affected cluster could not be served at all.
    pub fn from_clusters(factory: &CollectorFactory, clusters: &[ClusterConfig]) -> Result<Self> {
        let registry = Self::new();

        for cluster in clusters {
            let Some(repo) = &cluster.metric_data_repository else {
                warn!(cluster = %cluster.name, "Cluster has no metric data repository configured");
                continue;
            };

            let collector = factory
                .construct(&repo.kind, &repo.url, &repo.token)
                .ok_or_else(|| MetricDataError::UnknownBackendKind {
                    kind: repo.kind.clone(),
                    cluster: cluster.name.clone(),
                })?
                .map_err(|source| MetricDataError::BackendInit {
                    cluster: cluster.name.clone(),
                    source,
                })?;

            info!(cluster = %cluster.name, kind = %repo.kind, url = %repo.url, "Registered metric data repository");
            registry.register(cluster.name.clone(), collector);
        }

        Ok(registry)
    }

    /// Register or replace the collector of a cluster
    pub fn register(&self, cluster: impl Into<String>, collector: Arc<dyn Collector>) {
        let cluster = cluster.into();
        debug!(cluster = %cluster, "Registering collector");
        self.collectors.insert(cluster, collector);
    }

    /// Get the collector of a cluster
    pub fn get(&self, cluster: &str) -> Option<Arc<dyn Collector>> {
        self.collectors.get(cluster).map(|r| Arc::clone(r.value()))
    }

    /// Names of all clusters with a collector
    pub fn clusters(&self) -> Vec<String> {
        self.collectors.iter().map(|r| r.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{cluster, metric};
    use crate::cluster::MetricDataRepositoryConfig;
    use crate::collector::{async_trait, QueryContext};
    use crate::models::{Job, JobData, JobStats, MetricScope, NodeData};

    struct NullCollector;

    #[async_trait]
    impl Collector for NullCollector {
        async fn load_data(
            &self,
            _job: &Job,
            _metrics: &[String],
            _scopes: &[MetricScope],
            _ctx: &QueryContext,
        ) -> anyhow::Result<JobData> {
            Ok(JobData::new())
        }

        async fn load_stats(
            &self,
            _job: &Job,
            _metrics: &[String],
            _ctx: &QueryContext,
        ) -> anyhow::Result<JobStats> {
            Ok(JobStats::new())
        }

        async fn load_node_data(
            &self,
            _cluster: &str,
            _metrics: &[String],
            _nodes: &[String],
            _from: i64,
            _to: i64,
            _ctx: &QueryContext,
        ) -> anyhow::Result<Option<NodeData>> {
            Ok(None)
        }
    }

    fn test_factory() -> CollectorFactory {
        let mut factory = CollectorFactory::new();
        factory.register("test", |_url, _token| Ok(Arc::new(NullCollector) as Arc<dyn Collector>));
        factory
    }

    #[test]
    fn test_registry_from_clusters() {
        let clusters = vec![
            cluster("fritz", vec![metric("cpu_load", "")]),
            cluster("alex", vec![metric("acc_power", "W")]),
        ];

        let registry = BackendRegistry::from_clusters(&test_factory(), &clusters).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.get("fritz").is_some());
        assert!(registry.get("woody").is_none());
    }

    #[test]
    fn test_unknown_kind_fails() {
        let mut c = cluster("fritz", vec![]);
        c.metric_data_repository = Some(MetricDataRepositoryConfig {
            kind: "influxdb-v2".to_string(),
            url: "http://localhost:8086".to_string(),
            token: String::new(),
        });

        let err = BackendRegistry::from_clusters(&test_factory(), &[c])
            .err()
            .unwrap();
        assert!(matches!(err, MetricDataError::UnknownBackendKind { .. }));
    }

    #[test]
    fn test_failing_constructor_fails() {
        let mut factory = CollectorFactory::new();
        factory.register("test", |_url, _token| Err(anyhow::anyhow!("bad url")));

        let err = BackendRegistry::from_clusters(&factory, &[cluster("fritz", vec![])])
            .err()
            .unwrap();
        assert!(matches!(err, MetricDataError::BackendInit { .. }));
    }

    #[test]
    fn test_cluster_without_backend_skipped() {
        let mut c = cluster("fritz", vec![]);
        c.metric_data_repository = None;

        let registry = BackendRegistry::from_clusters(&test_factory(), &[c]).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_builtin_kinds() {
        let factory = CollectorFactory::with_builtin();
        assert!(factory.kinds().any(|k| k == "cc-metric-store"));
    }
}
