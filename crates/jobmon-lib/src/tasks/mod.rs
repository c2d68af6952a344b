//! Background task scheduling
//!
//! The [`Scheduler`] owns named periodic tasks and drives each one from its
//! own loop. A loop awaits the current run before computing the next tick,
//! so a task never overlaps itself while different tasks run concurrently.

mod footprint;
mod retention;

pub use footprint::{aggregate_node_series, FootprintRunStats, FootprintWorker};
pub use retention::{RetentionConfig, RetentionPolicy, RetentionReport, RetentionWorker};

use crate::health::HealthRegistry;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDateTime, NaiveTime};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default interval of the footprint worker
pub const DEFAULT_FOOTPRINT_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// A unit of periodic background work
#[async_trait]
pub trait ScheduledTask: Send + Sync {
    /// Name used in logs and as health component
    fn name(&self) -> &str;

    async fn run(&self) -> Result<()>;
}

/// When a task runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Fixed delay between the end of one run and the start of the next
    Every(Duration),
    /// Once a day at a local wall-clock time
    DailyAt(NaiveTime),
}

impl Schedule {
    /// Time to wait from `now` (local time) until the next run
    pub fn delay_after(&self, now: NaiveDateTime) -> Duration {
        match self {
            Schedule::Every(interval) => *interval,
            Schedule::DailyAt(at) => {
                let today = now.date().and_time(*at);
                let next = if today > now {
                    today
                } else {
                    today + chrono::Duration::days(1)
                };
                (next - now).to_std().unwrap_or(Duration::ZERO)
            }
        }
    }
}

struct Registration {
    task: Arc<dyn ScheduledTask>,
    schedule: Schedule,
}

/// Owner of the periodic background tasks
pub struct Scheduler {
    tasks: Vec<Registration>,
    health: Option<HealthRegistry>,
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            tasks: Vec::new(),
            health: None,
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    /// Report every run outcome to `health` under the task's name
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn register(&mut self, task: Arc<dyn ScheduledTask>, schedule: Schedule) {
        info!(task = task.name(), schedule = ?schedule, "Registered scheduled task");
        self.tasks.push(Registration { task, schedule });
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|r| r.task.name()).collect()
    }

    pub fn is_running(&self) -> bool {
        !self.handles.is_empty()
    }

    /// Spawn one loop per registered task
    pub fn start(&mut self) {
        if self.is_running() {
            warn!("Scheduler already started");
            return;
        }

        for reg in &self.tasks {
            let handle = tokio::spawn(run_loop(
                Arc::clone(&reg.task),
                reg.schedule,
                self.shutdown_tx.subscribe(),
                self.health.clone(),
            ));
            self.handles.push(handle);
        }
        info!(tasks = self.handles.len(), "Scheduler started");
    }

    /// Signal all loops and wait for them to finish
    ///
    /// A run in progress is completed before its loop exits.
    pub async fn stop(&mut self) {
        if !self.is_running() {
            return;
        }

        let _ = self.shutdown_tx.send(());
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "Scheduled task loop ended abnormally");
            }
        }
        info!("Scheduler stopped");
    }
}

async fn run_loop(
    task: Arc<dyn ScheduledTask>,
    schedule: Schedule,
    mut shutdown: broadcast::Receiver<()>,
    health: Option<HealthRegistry>,
) {
    loop {
        let delay = schedule.delay_after(chrono::Local::now().naive_local());
        debug!(task = task.name(), delay_secs = delay.as_secs(), "Next run scheduled");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.recv() => {
                info!(task = task.name(), "Shutting down scheduled task");
                break;
            }
        }

        let start = Instant::now();
        match task.run().await {
            Ok(()) => {
                debug!(task = task.name(), duration_ms = start.elapsed().as_millis() as u64, "Scheduled run finished");
                if let Some(health) = &health {
                    health.record_success(task.name()).await;
                }
            }
            Err(e) => {
                warn!(task = task.name(), error = %e, "Scheduled run failed");
                if let Some(health) = &health {
                    health.record_failure(task.name(), e.to_string()).await;
                }
            }
        }
    }
}
