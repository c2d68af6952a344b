//! Job repository collaborator
//!
//! Persisted job rows, the batched update statements the footprint worker
//! issues and the deletions retention performs. Implementations provide
//! single-writer semantics: an open transaction blocks other writers.

mod memory;

pub use memory::MemoryJobRepository;

use crate::models::{Job, JobMeta};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::OwnedSemaphorePermit;

/// Metadata patch for a single job row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    /// Database id of the job
    pub id: i64,
    pub footprint: Option<HashMap<String, f64>>,
    pub energy_footprint: Option<HashMap<String, f64>>,
    pub energy: Option<f64>,
}

impl JobUpdate {
    pub fn for_job(id: i64) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.footprint.is_none() && self.energy_footprint.is_none() && self.energy.is_none()
    }

    /// Apply the patch to a job row
    pub fn apply(&self, job: &mut Job) {
        if let Some(footprint) = &self.footprint {
            job.footprint = footprint.clone();
        }
        if let Some(energy_footprint) = &self.energy_footprint {
            job.energy_footprint = energy_footprint.clone();
        }
        if let Some(energy) = self.energy {
            job.energy = energy;
        }
    }
}

/// Handle of an open write transaction
///
/// Holds the repository's writer slot until ended. Statements are queued
/// by `transaction_add` and applied as one batch by `transaction_commit`;
/// the handle remains usable for further batches afterwards.
#[derive(Debug)]
pub struct Transaction {
    id: u64,
    pending: Vec<JobUpdate>,
    committed: usize,
    _writer: OwnedSemaphorePermit,
}

impl Transaction {
    pub fn new(id: u64, writer: OwnedSemaphorePermit) -> Self {
        Self {
            id,
            pending: Vec::new(),
            committed: 0,
            _writer: writer,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Statements applied by all commits so far
    pub fn committed(&self) -> usize {
        self.committed
    }

    pub fn push(&mut self, stmt: JobUpdate) {
        self.pending.push(stmt);
    }

    /// Take the queued batch for a commit
    pub fn take_batch(&mut self) -> Vec<JobUpdate> {
        std::mem::take(&mut self.pending)
    }

    /// Count `statements` as durably committed
    pub fn mark_committed(&mut self, statements: usize) {
        self.committed += statements;
    }
}

#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Non-running jobs whose end time lies in `[from, to)`
    async fn find_jobs_between(&self, from: i64, to: i64) -> Result<Vec<Job>>;

    async fn find_running_jobs(&self, cluster: &str) -> Result<Vec<Job>>;

    /// Delete non-running jobs that ended before `ts`, returning the count
    async fn delete_jobs_before(&self, ts: i64) -> Result<usize>;

    /// Reclaim storage after large deletions
    async fn optimize(&self) -> Result<()>;

    async fn transaction_init(&self) -> Result<Transaction>;

    async fn transaction_add(&self, tx: &mut Transaction, stmt: JobUpdate) -> Result<()>;

    async fn transaction_commit(&self, tx: &mut Transaction) -> Result<()>;

    /// Close the handle, discarding statements not yet committed
    async fn transaction_end(&self, tx: Transaction) -> Result<()>;

    /// Extend `stmt` with the footprint fields derived from `meta`
    fn update_footprint(&self, stmt: JobUpdate, meta: &JobMeta) -> Result<JobUpdate>;

    /// Extend `stmt` with the energy fields derived from `meta`
    fn update_energy(&self, stmt: JobUpdate, meta: &JobMeta) -> Result<JobUpdate>;
}
