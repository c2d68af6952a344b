//! Health check infrastructure for the job monitoring service
//!
//! Tracks the state of the metric backends, the archive and the two
//! background workers. Only the data-serving components decide readiness;
//! a failing background worker degrades overall health but keeps the
//! service ready.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Consecutive failures after which a component counts as unhealthy
pub const UNHEALTHY_AFTER_FAILURES: u32 = 3;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Recent failures, still serving
    Degraded,
    Unhealthy,
}

/// Health of one component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub consecutive_failures: u32,
    /// Unix seconds of the last successful operation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success: Option<i64>,
}

impl ComponentHealth {
    pub fn healthy() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            message: None,
            consecutive_failures: 0,
            last_success: Some(chrono::Utc::now().timestamp()),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: ComponentStatus::Unhealthy,
            message: Some(message.into()),
            consecutive_failures: UNHEALTHY_AFTER_FAILURES,
            last_success: None,
        }
    }

    fn record_failure(&mut self, message: String) {
        self.consecutive_failures += 1;
        self.message = Some(message);
        self.status = if self.consecutive_failures >= UNHEALTHY_AFTER_FAILURES {
            ComponentStatus::Unhealthy
        } else {
            ComponentStatus::Degraded
        };
    }
}

/// Overall health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status over all components
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|h| h.status)
            .fold(ComponentStatus::Healthy, |acc, s| match (acc, s) {
                (ComponentStatus::Unhealthy, _) | (_, ComponentStatus::Unhealthy) => {
                    ComponentStatus::Unhealthy
                }
                (ComponentStatus::Degraded, _) | (_, ComponentStatus::Degraded) => {
                    ComponentStatus::Degraded
                }
                _ => ComponentStatus::Healthy,
            })
    }
}

/// Readiness response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const METRIC_STORE: &str = "metric_store";
    pub const ARCHIVE: &str = "archive";
    pub const FOOTPRINT_WORKER: &str = "footprint_worker";
    pub const RETENTION: &str = "retention";

    /// Components whose failure makes the service unready
    pub const CRITICAL: [&str; 2] = [METRIC_STORE, ARCHIVE];
}

/// Health registry shared by the service components
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            components: Arc::new(RwLock::new(HashMap::new())),
            ready: Arc::new(RwLock::new(false)),
        }
    }

    /// Register a component with initial healthy status
    pub async fn register(&self, name: &str) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), ComponentHealth::healthy());
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), health);
    }

    /// Record a successful operation, resetting the failure streak
    pub async fn record_success(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    /// Record a failed operation
    ///
    /// Degrades the component, which turns unhealthy once the failure
    /// streak reaches [`UNHEALTHY_AFTER_FAILURES`].
    pub async fn record_failure(&self, name: &str, message: impl Into<String>) {
        let mut components = self.components.write().await;
        components
            .entry(name.to_string())
            .or_insert_with(ComponentHealth::healthy)
            .record_failure(message.into());
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    pub async fn set_ready(&self, ready: bool) {
        let mut r = self.ready.write().await;
        *r = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        if !*self.ready.read().await {
            return ReadinessResponse {
                ready: false,
                reason: Some("Service not yet initialized".to_string()),
            };
        }

        let registered = self.components.read().await;
        let failing: Vec<&str> = components::CRITICAL
            .iter()
            .copied()
            .filter(|name| {
                registered
                    .get(*name)
                    .is_some_and(|h| h.status == ComponentStatus::Unhealthy)
            })
            .collect();

        if failing.is_empty() {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        } else {
            ReadinessResponse {
                ready: false,
                reason: Some(format!("Unhealthy: {}", failing.join(", "))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_registry_initial_state() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
    }

    #[tokio::test]
    async fn test_failure_streak_escalates() {
        let registry = HealthRegistry::new();
        registry.register(components::METRIC_STORE).await;

        registry
            .record_failure(components::METRIC_STORE, "connection refused")
            .await;
        assert_eq!(registry.health().await.status, ComponentStatus::Degraded);

        for _ in 1..UNHEALTHY_AFTER_FAILURES {
            registry
                .record_failure(components::METRIC_STORE, "connection refused")
                .await;
        }
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Unhealthy);
        assert_eq!(
            health.components[components::METRIC_STORE].consecutive_failures,
            UNHEALTHY_AFTER_FAILURES
        );

        registry.record_success(components::METRIC_STORE).await;
        assert_eq!(registry.health().await.status, ComponentStatus::Healthy);
    }

    #[tokio::test]
    async fn test_readiness_not_ready_initially() {
        let registry = HealthRegistry::new();
        let readiness = registry.readiness().await;

        assert!(!readiness.ready);
        assert!(readiness.reason.is_some());
    }

    #[tokio::test]
    async fn test_unhealthy_archive_blocks_readiness() {
        let registry = HealthRegistry::new();
        registry.register(components::ARCHIVE).await;
        registry.set_ready(true).await;
        assert!(registry.readiness().await.ready);

        registry
            .set_unhealthy(components::ARCHIVE, "archive root missing")
            .await;
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("Unhealthy: archive"));
    }

    #[tokio::test]
    async fn test_failing_worker_keeps_service_ready() {
        let registry = HealthRegistry::new();
        registry.register(components::METRIC_STORE).await;
        registry.set_ready(true).await;
        registry
            .set_unhealthy(components::RETENTION, "archive clean up failed")
            .await;

        assert!(registry.readiness().await.ready);
        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);
    }
}
