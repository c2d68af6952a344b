//! Archive inventory

use anyhow::{bail, Result};
use jobmon_lib::archive::FsArchive;
use jobmon_lib::JobMeta;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tabled::Tabled;

use crate::output::{format_timestamp, print_table, OutputFormat};

/// Archived jobs of one cluster
#[derive(Debug, PartialEq, Serialize, Tabled)]
pub struct ClusterInventory {
    #[tabled(rename = "Cluster")]
    pub cluster: String,
    #[tabled(rename = "Jobs")]
    pub jobs: usize,
    #[tabled(rename = "Running")]
    pub running: usize,
    #[tabled(rename = "First start", display_with = "format_timestamp")]
    pub first_start: i64,
    #[tabled(rename = "Last end", display_with = "format_timestamp")]
    pub last_end: i64,
}

/// Group job records by cluster, ordered by cluster name
pub fn summarize(jobs: &[JobMeta]) -> Vec<ClusterInventory> {
    let mut clusters: BTreeMap<&str, ClusterInventory> = BTreeMap::new();

    for meta in jobs {
        let job = &meta.job;
        let entry = clusters
            .entry(job.cluster.as_str())
            .or_insert_with(|| ClusterInventory {
                cluster: job.cluster.clone(),
                jobs: 0,
                running: 0,
                first_start: job.start_time,
                last_end: job.end_time(),
            });
        entry.jobs += 1;
        if job.state.is_running() {
            entry.running += 1;
        }
        entry.first_start = entry.first_start.min(job.start_time);
        entry.last_end = entry.last_end.max(job.end_time());
    }

    clusters.into_values().collect()
}

pub async fn run(archive: &Path, format: OutputFormat) -> Result<()> {
    if !archive.is_dir() {
        bail!("archive directory {:?} does not exist", archive);
    }

    let jobs = FsArchive::new(archive).list_jobs().await?;
    print_table(&summarize(&jobs), format)
}
