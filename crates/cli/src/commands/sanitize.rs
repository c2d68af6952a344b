//! Legacy archive conversion

use anyhow::{bail, Context, Result};
use colored::Colorize;
use jobmon_lib::archive::legacy::{
    convert_cluster, convert_data, convert_meta, LegacyCluster, LegacyJobData, LegacyJobMeta,
};
use jobmon_lib::archive::{read_json, FsArchive, CLUSTER_FILE, DATA_FILE, META_FILE};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::output::{print_error, print_info, print_success, OutputFormat};

/// A job record that could not be converted
#[derive(Debug, Serialize)]
pub struct FailedJob {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Default, Serialize)]
pub struct SanitizeReport {
    pub clusters: usize,
    pub converted: usize,
    pub failed: Vec<FailedJob>,
}

/// Convert every cluster description and job record below `source` into `dest`
///
/// Unreadable job records are reported and skipped; `dest` must not exist.
pub async fn sanitize_archive(source: &Path, dest: &Path) -> Result<SanitizeReport> {
    if !source.is_dir() {
        bail!("source archive {:?} does not exist", source);
    }
    if dest.exists() {
        bail!("destination {:?} already exists", dest);
    }
    tokio::fs::create_dir_all(dest)
        .await
        .with_context(|| format!("Failed to create destination {:?}", dest))?;

    let legacy = FsArchive::new(source);
    let target = FsArchive::new(dest);
    let mut report = SanitizeReport::default();

    for cluster_dir in legacy.cluster_dirs().await? {
        let cluster_file = cluster_dir.join(CLUSTER_FILE);
        if !cluster_file.exists() {
            continue;
        }
        let old: LegacyCluster = read_json(&cluster_file).await?;
        target.store_cluster(&convert_cluster(&old)).await?;
        report.clusters += 1;
    }

    for job_dir in legacy.job_dirs().await? {
        match convert_job(&target, &job_dir).await {
            Ok(()) => report.converted += 1,
            Err(e) => report.failed.push(FailedJob {
                path: job_dir,
                error: format!("{:#}", e),
            }),
        }
    }

    Ok(report)
}

async fn convert_job(target: &FsArchive, job_dir: &Path) -> Result<()> {
    let meta: LegacyJobMeta = read_json(&job_dir.join(META_FILE)).await?;
    let data: LegacyJobData = read_json(&job_dir.join(DATA_FILE)).await?;
    target
        .store_job(&convert_meta(&meta), &convert_data(&data))
        .await
}

pub async fn run(source: &Path, dest: &Path, format: OutputFormat) -> Result<()> {
    let report = sanitize_archive(source, dest).await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Table => {
            print_info(&format!(
                "Converted {} cluster descriptions into {}",
                report.clusters,
                dest.display().to_string().cyan()
            ));
            for failed in &report.failed {
                print_error(&format!("{}: {}", failed.path.display(), failed.error));
            }
            print_success(&format!("Converted {} jobs", report.converted));
        }
    }

    if !report.failed.is_empty() {
        bail!("{} job records could not be converted", report.failed.len());
    }
    Ok(())
}
