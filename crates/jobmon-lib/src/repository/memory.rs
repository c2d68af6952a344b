//! In-memory job repository with optional JSON snapshot persistence

use super::{JobRepository, JobUpdate, Transaction};
use crate::cluster::{ClusterCatalog, EnergyKind, FootprintStat};
use crate::models::{round2, Job, JobMeta};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// Job rows keyed by database id
///
/// Writes (transactions, deletions, inserts) are serialized through a
/// single writer slot. Reads only take the row lock.
pub struct MemoryJobRepository {
    catalog: Arc<ClusterCatalog>,
    jobs: Mutex<BTreeMap<i64, Job>>,
    writer: Arc<Semaphore>,
    next_tx: AtomicU64,
    persistence_path: Option<PathBuf>,
}

impl MemoryJobRepository {
    pub fn new(catalog: Arc<ClusterCatalog>) -> Self {
        Self {
            catalog,
            jobs: Mutex::new(BTreeMap::new()),
            writer: Arc::new(Semaphore::new(1)),
            next_tx: AtomicU64::new(1),
            persistence_path: None,
        }
    }

    /// Create a repository backed by a snapshot file
    ///
    /// An unreadable snapshot is logged and the repository starts empty.
    pub fn with_persistence(catalog: Arc<ClusterCatalog>, path: PathBuf) -> Self {
        let mut jobs = BTreeMap::new();
        if path.exists() {
            match load_snapshot(&path) {
                Ok(loaded) => {
                    info!(path = %path.display(), jobs = loaded.len(), "Loaded job snapshot");
                    jobs = loaded;
                }
                Err(e) => warn!(error = %e, "Failed to load job snapshot, starting fresh"),
            }
        }

        Self {
            jobs: Mutex::new(jobs),
            persistence_path: Some(path),
            ..Self::new(catalog)
        }
    }

    /// Insert or replace a job row
    pub async fn insert(&self, job: Job) -> Result<()> {
        let _writer = self.acquire_writer().await?;
        let mut jobs = self.jobs.lock().await;
        jobs.insert(job.id, job);
        self.persist(&jobs).await
    }

    pub async fn get(&self, id: i64) -> Option<Job> {
        self.jobs.lock().await.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }

    async fn acquire_writer(&self) -> Result<OwnedSemaphorePermit> {
        Arc::clone(&self.writer)
            .acquire_owned()
            .await
            .context("Job repository writer slot closed")
    }

    async fn persist(&self, jobs: &BTreeMap<i64, Job>) -> Result<()> {
        let Some(path) = &self.persistence_path else {
            return Ok(());
        };
        save_snapshot(path, jobs).await?;
        debug!(path = %path.display(), jobs = jobs.len(), "Job snapshot written");
        Ok(())
    }
}

#[async_trait]
impl JobRepository for MemoryJobRepository {
    async fn find_jobs_between(&self, from: i64, to: i64) -> Result<Vec<Job>> {
        let jobs = self.jobs.lock().await;
        Ok(jobs
            .values()
            .filter(|j| !j.state.is_running())
            .filter(|j| (from..to).contains(&j.end_time()))
            .cloned()
            .collect())
    }

    async fn find_running_jobs(&self, cluster: &str) -> Result<Vec<Job>> {
        let jobs = self.jobs.lock().await;
        Ok(jobs
            .values()
            .filter(|j| j.state.is_running() && j.cluster == cluster)
            .cloned()
            .collect())
    }

    async fn delete_jobs_before(&self, ts: i64) -> Result<usize> {
        let _writer = self.acquire_writer().await?;
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|_, j| j.state.is_running() || j.end_time() >= ts);
        let removed = before - jobs.len();
        self.persist(&jobs).await?;
        info!(removed, before = ts, "Deleted job rows");
        Ok(removed)
    }

    async fn optimize(&self) -> Result<()> {
        let _writer = self.acquire_writer().await?;
        let jobs = self.jobs.lock().await;
        self.persist(&jobs).await
    }

    async fn transaction_init(&self) -> Result<Transaction> {
        let writer = self.acquire_writer().await?;
        let id = self.next_tx.fetch_add(1, Ordering::Relaxed);
        debug!(tx = id, "Transaction opened");
        Ok(Transaction::new(id, writer))
    }

    async fn transaction_add(&self, tx: &mut Transaction, stmt: JobUpdate) -> Result<()> {
        if stmt.is_empty() {
            return Err(anyhow!("empty update statement for job {}", stmt.id));
        }
        tx.push(stmt);
        Ok(())
    }

    async fn transaction_commit(&self, tx: &mut Transaction) -> Result<()> {
        let mut jobs = self.jobs.lock().await;

        // apply to a copy so a failed snapshot write leaves rows untouched
        let mut next = jobs.clone();
        let batch = tx.take_batch();
        let mut applied = 0;
        for stmt in &batch {
            match next.get_mut(&stmt.id) {
                Some(job) => {
                    stmt.apply(job);
                    applied += 1;
                }
                None => debug!(id = stmt.id, "Update for unknown job row ignored"),
            }
        }

        self.persist(&next).await?;
        *jobs = next;
        tx.mark_committed(batch.len());
        debug!(tx = tx.id(), statements = batch.len(), applied, "Transaction committed");
        Ok(())
    }

    async fn transaction_end(&self, tx: Transaction) -> Result<()> {
        if tx.pending() > 0 {
            warn!(tx = tx.id(), discarded = tx.pending(), "Transaction ended with uncommitted statements");
        }
        debug!(tx = tx.id(), committed = tx.committed(), "Transaction closed");
        Ok(())
    }

    fn update_footprint(&self, mut stmt: JobUpdate, meta: &JobMeta) -> Result<JobUpdate> {
        let cluster = self
            .catalog
            .get(&meta.job.cluster)
            .ok_or_else(|| anyhow!("unknown cluster '{}'", meta.job.cluster))?;

        let mut footprint = HashMap::new();
        for mc in &cluster.metric_config {
            let Some(stat) = mc.footprint else { continue };
            let Some(stats) = meta.statistics.get(&mc.name) else {
                continue;
            };
            let value = match stat {
                FootprintStat::Avg => stats.avg,
                FootprintStat::Min => stats.min,
                FootprintStat::Max => stats.max,
            };
            if value.is_nan() {
                continue;
            }
            footprint.insert(format!("{}_{}", mc.name, stat.as_str()), value);
        }

        stmt.footprint = Some(footprint);
        Ok(stmt)
    }

    fn update_energy(&self, mut stmt: JobUpdate, meta: &JobMeta) -> Result<JobUpdate> {
        let cluster = self
            .catalog
            .get(&meta.job.cluster)
            .ok_or_else(|| anyhow!("unknown cluster '{}'", meta.job.cluster))?;

        let hours = meta.job.duration as f64 / 3600.0;
        let mut energy_footprint = HashMap::new();
        let mut total = 0.0;
        for mc in &cluster.metric_config {
            match mc.energy {
                Some(EnergyKind::Power) => {
                    let Some(stats) = meta.statistics.get(&mc.name) else {
                        continue;
                    };
                    if stats.avg.is_nan() {
                        continue;
                    }
                    // W * nodes * h -> kWh
                    let kwh = stats.avg * meta.job.num_nodes as f64 * hours / 1000.0;
                    energy_footprint.insert(mc.name.clone(), round2(kwh));
                    total += kwh;
                }
                Some(EnergyKind::Energy) => {
                    debug!(metric = %mc.name, "Energy-valued metrics are not converted");
                }
                None => {}
            }
        }

        stmt.energy_footprint = Some(energy_footprint);
        stmt.energy = Some(round2(total));
        Ok(stmt)
    }
}

fn load_snapshot(path: &Path) -> Result<BTreeMap<i64, Job>> {
    let raw = std::fs::read(path).with_context(|| format!("Failed to open job snapshot {:?}", path))?;
    let jobs: Vec<Job> = serde_json::from_slice(&raw).context("Failed to deserialize job snapshot")?;
    Ok(jobs.into_iter().map(|j| (j.id, j)).collect())
}

/// Write atomically using a temp file and rename
async fn save_snapshot(path: &Path, jobs: &BTreeMap<i64, Job>) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }

    let rows: Vec<&Job> = jobs.values().collect();
    let json = serde_json::to_vec(&rows).context("Failed to serialize job snapshot")?;
    let temp_path = path.with_extension("tmp");
    tokio::fs::write(&temp_path, &json)
        .await
        .with_context(|| format!("Failed to write temp file {:?}", temp_path))?;
    tokio::fs::rename(&temp_path, path)
        .await
        .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))
}
