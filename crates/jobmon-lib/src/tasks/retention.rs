//! Retention of aged jobs
//!
//! Jobs that ended before `now - age_days` are removed from the archive or
//! relocated below another directory, and optionally deleted from the job
//! repository. The archive and repository steps are not coupled
//! atomically; a run that leaves them out of step is reported as an
//! inconsistency so it can be repaired.

use super::ScheduledTask;
use crate::archive::Archive;
use crate::health::components;
use crate::observability::{ServiceMetrics, StructuredLogger};
use crate::repository::JobRepository;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

const SECONDS_PER_DAY: i64 = 86_400;

/// What happens to the archive records of aged jobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetentionPolicy {
    Delete,
    Move { location: PathBuf },
}

impl RetentionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetentionPolicy::Delete => "delete",
            RetentionPolicy::Move { .. } => "move",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionConfig {
    pub policy: RetentionPolicy,
    pub age_days: u32,
    /// Also delete the job rows and optimize the repository
    pub include_db: bool,
}

/// Outcome of one retention run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetentionReport {
    pub cutoff: i64,
    pub selected: usize,
    pub archive_affected: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_error: Option<String>,
    /// Rows deleted from the repository, `None` when the step did not run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_removed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_error: Option<String>,
    /// Archive and repository no longer describe the same set of jobs
    pub inconsistent: bool,
}

pub struct RetentionWorker {
    archive: Arc<dyn Archive>,
    repository: Arc<dyn JobRepository>,
    config: RetentionConfig,
    logger: StructuredLogger,
    metrics: ServiceMetrics,
}

impl RetentionWorker {
    pub fn new(
        archive: Arc<dyn Archive>,
        repository: Arc<dyn JobRepository>,
        config: RetentionConfig,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            archive,
            repository,
            config,
            logger,
            metrics: ServiceMetrics::new(),
        }
    }

    pub fn cutoff(&self, now: i64) -> i64 {
        now - i64::from(self.config.age_days) * SECONDS_PER_DAY
    }

    /// Apply retention as of `now` (unix seconds)
    ///
    /// Fails only when the aged jobs cannot be listed.
    pub async fn run_at(&self, now: i64) -> Result<RetentionReport> {
        let policy = self.config.policy.as_str();
        let cutoff = self.cutoff(now);
        let jobs = self
            .repository
            .find_jobs_between(0, cutoff)
            .await
            .context("Failed to find jobs for retention")?;

        let mut report = RetentionReport {
            cutoff,
            selected: jobs.len(),
            ..Default::default()
        };
        info!(policy, cutoff, jobs = jobs.len(), "Applying retention");

        let archived = match &self.config.policy {
            RetentionPolicy::Delete => self.archive.clean_up(&jobs).await,
            RetentionPolicy::Move { location } => self.archive.move_jobs(&jobs, location).await,
        };
        match archived {
            Ok(count) => {
                report.archive_affected = count;
                self.metrics.add_retention_jobs(policy, count);
            }
            Err(e) => {
                warn!(policy, error = %e, "Archive retention step failed, keeping job rows for retry");
                report.archive_error = Some(format!("{:#}", e));
                report.inconsistent = true;
                self.logger
                    .log_retention_inconsistency(policy, "archive", jobs.len(), &format!("{:#}", e));
                self.metrics.inc_retention_inconsistency();
                return Ok(report);
            }
        }

        if self.config.include_db {
            match self.repository.delete_jobs_before(cutoff).await {
                Ok(removed) => {
                    report.db_removed = Some(removed);
                    if let Err(e) = self.repository.optimize().await {
                        warn!(error = %e, "Failed to optimize job repository");
                    }
                }
                Err(e) => {
                    warn!(policy, error = %e, "Failed to delete job rows after archive retention");
                    report.db_error = Some(format!("{:#}", e));
                    report.inconsistent = true;
                    self.logger.log_retention_inconsistency(
                        policy,
                        "database",
                        report.archive_affected,
                        &format!("{:#}", e),
                    );
                    self.metrics.inc_retention_inconsistency();
                }
            }
        }

        self.logger.log_retention_run(
            policy,
            report.selected,
            report.archive_affected,
            report.db_removed.unwrap_or(0),
        );
        Ok(report)
    }
}

#[async_trait]
impl ScheduledTask for RetentionWorker {
    fn name(&self) -> &str {
        components::RETENTION
    }

    async fn run(&self) -> Result<()> {
        let report = self.run_at(chrono::Utc::now().timestamp()).await?;
        if report.inconsistent {
            return Err(anyhow!(
                "retention left archive and job repository inconsistent ({} jobs selected)",
                report.selected
            ));
        }
        Ok(())
    }
}
