//! File-system archive backend
//!
//! Layout: `{root}/{cluster}/{job_id / 1000}/{job_id % 1000:03}/{start_time}/`
//! with `meta.json` (job description and statistics) and `data.json`
//! (metric series) in every job directory.

use super::Archive;
use crate::cluster::ClusterConfig;
use crate::models::{Job, JobData, JobMeta};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

pub const META_FILE: &str = "meta.json";
pub const DATA_FILE: &str = "data.json";
pub const CLUSTER_FILE: &str = "cluster.json";

/// Archive stored as JSON files below a root directory
#[derive(Debug, Clone)]
pub struct FsArchive {
    root: PathBuf,
}

impl FsArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of a job relative to the archive root
    pub fn relative_job_dir(cluster: &str, job_id: i64, start_time: i64) -> PathBuf {
        PathBuf::from(cluster)
            .join((job_id / 1000).to_string())
            .join(format!("{:03}", job_id % 1000))
            .join(start_time.to_string())
    }

    fn job_dir(&self, job: &Job) -> PathBuf {
        self.root
            .join(Self::relative_job_dir(&job.cluster, job.job_id, job.start_time))
    }

    pub fn contains(&self, job: &Job) -> bool {
        self.job_dir(job).join(META_FILE).exists()
    }

    pub async fn load_meta(&self, job: &Job) -> Result<JobMeta> {
        read_json(&self.job_dir(job).join(META_FILE)).await
    }

    /// Write the meta and data record of a job, replacing existing files
    pub async fn store_job(&self, meta: &JobMeta, data: &JobData) -> Result<()> {
        let dir = self.job_dir(&meta.job);
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create directory {:?}", dir))?;

        write_json(&dir.join(META_FILE), meta).await?;
        write_json(&dir.join(DATA_FILE), data).await?;
        debug!(job_id = meta.job.job_id, path = %dir.display(), "Stored job in archive");
        Ok(())
    }

    /// Write `cluster.json` into the directory of the cluster
    pub async fn store_cluster(&self, cluster: &ClusterConfig) -> Result<()> {
        let dir = self.root.join(&cluster.name);
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create directory {:?}", dir))?;
        write_json(&dir.join(CLUSTER_FILE), cluster).await
    }

    pub async fn cluster_dirs(&self) -> Result<Vec<PathBuf>> {
        subdirs(&self.root).await
    }

    /// Every job directory below the root, in path order
    pub async fn job_dirs(&self) -> Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        for cluster_dir in self.cluster_dirs().await? {
            for l1 in subdirs(&cluster_dir).await? {
                for l2 in subdirs(&l1).await? {
                    dirs.extend(subdirs(&l2).await?);
                }
            }
        }
        Ok(dirs)
    }

    /// Meta records of every archived job
    pub async fn list_jobs(&self) -> Result<Vec<JobMeta>> {
        let mut jobs = Vec::new();
        for job_dir in self.job_dirs().await? {
            let meta_path = job_dir.join(META_FILE);
            match read_json::<JobMeta>(&meta_path).await {
                Ok(meta) => jobs.push(meta),
                Err(e) => warn!(path = %meta_path.display(), error = %e, "Skipping unreadable job record"),
            }
        }
        Ok(jobs)
    }

    /// Remove empty directories between `dir` and the cluster directory
    async fn prune_empty_parents(&self, dir: &Path) {
        let mut current = dir.parent();
        // job dir -> l2 -> l1; stop before the cluster directory
        for _ in 0..2 {
            let Some(parent) = current else { break };
            if fs::remove_dir(parent).await.is_err() {
                break;
            }
            current = parent.parent();
        }
    }
}

#[async_trait]
impl Archive for FsArchive {
    async fn load_job_data(&self, job: &Job) -> Result<JobData> {
        read_json(&self.job_dir(job).join(DATA_FILE)).await
    }

    async fn load_averages(&self, job: &Job, metrics: &[String]) -> Result<Vec<f64>> {
        let meta = self.load_meta(job).await?;
        Ok(metrics
            .iter()
            .map(|m| meta.statistics.get(m).map_or(f64::NAN, |s| s.avg))
            .collect())
    }

    async fn clean_up(&self, jobs: &[Job]) -> Result<usize> {
        let mut removed = 0;
        let mut failed = Vec::new();

        for job in jobs {
            let dir = self.job_dir(job);
            match fs::remove_dir_all(&dir).await {
                Ok(()) => {
                    removed += 1;
                    self.prune_empty_parents(&dir).await;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!(job_id = job.job_id, "No archive record to remove");
                }
                Err(e) => {
                    warn!(job_id = job.job_id, path = %dir.display(), error = %e, "Failed to remove archive record");
                    failed.push(job.job_id);
                }
            }
        }

        info!(removed, failed = failed.len(), "Archive clean up finished");
        if !failed.is_empty() {
            return Err(anyhow!(
                "failed to remove {} archive records: {:?}",
                failed.len(),
                failed
            ));
        }
        Ok(removed)
    }

    async fn move_jobs(&self, jobs: &[Job], location: &Path) -> Result<usize> {
        let mut moved = 0;
        let mut failed = Vec::new();

        for job in jobs {
            let source = self.job_dir(job);
            if !source.exists() {
                debug!(job_id = job.job_id, "No archive record to move");
                continue;
            }

            let target = location.join(Self::relative_job_dir(
                &job.cluster,
                job.job_id,
                job.start_time,
            ));
            let result: Result<()> = async {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)
                        .await
                        .with_context(|| format!("Failed to create directory {:?}", parent))?;
                }
                fs::rename(&source, &target)
                    .await
                    .with_context(|| format!("Failed to rename {:?} to {:?}", source, target))
            }
            .await;

            match result {
                Ok(()) => {
                    moved += 1;
                    self.prune_empty_parents(&source).await;
                }
                Err(e) => {
                    warn!(job_id = job.job_id, error = %e, "Failed to move archive record");
                    failed.push(job.job_id);
                }
            }
        }

        info!(moved, failed = failed.len(), location = %location.display(), "Archive move finished");
        if !failed.is_empty() {
            return Err(anyhow!(
                "failed to move {} archive records: {:?}",
                failed.len(),
                failed
            ));
        }
        Ok(moved)
    }
}

async fn subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("Failed to read directory {:?}", dir)),
    };

    let mut dirs = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Read and decode a JSON record
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read(path)
        .await
        .with_context(|| format!("Failed to read {:?}", path))?;
    serde_json::from_slice(&raw).with_context(|| format!("Failed to decode {:?}", path))
}

/// Write atomically using a temp file and rename
async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec(value).context("Failed to serialize archive record")?;
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, &json)
        .await
        .with_context(|| format!("Failed to write temp file {:?}", temp_path))?;
    fs::rename(&temp_path, path)
        .await
        .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))
}
