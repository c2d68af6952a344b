//! Cold storage of finished jobs
//!
//! The archive holds the immutable, full-resolution metric history of
//! jobs that are no longer running. This crate reads from it, applies
//! retention (delete or relocate) and converts legacy archive records.

mod fs;
pub mod legacy;

pub use fs::{read_json, FsArchive, CLUSTER_FILE, DATA_FILE, META_FILE};

use crate::models::{Job, JobData};
use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

/// Operations the metric access and retention code needs from the archive
#[async_trait]
pub trait Archive: Send + Sync {
    /// Read the full cold record of a job
    async fn load_job_data(&self, job: &Job) -> Result<JobData>;

    /// Per-metric averages of a job, NaN for metrics without statistics
    async fn load_averages(&self, job: &Job, metrics: &[String]) -> Result<Vec<f64>>;

    /// Permanently remove the records of the given jobs
    ///
    /// Returns the number of removed records. Jobs without a record are
    /// skipped; failures are reported after every job was attempted.
    async fn clean_up(&self, jobs: &[Job]) -> Result<usize>;

    /// Relocate the records of the given jobs below `location`
    async fn move_jobs(&self, jobs: &[Job], location: &Path) -> Result<usize>;
}
