//! Integration tests for the service API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use jobmon::api::{create_router, AppState};
use jobmon_lib::{
    archive::FsArchive,
    cluster::ClusterCatalog,
    collector::BackendRegistry,
    health::{components, HealthRegistry},
    observability::ServiceMetrics,
    MetricDispatcher,
};
use std::sync::Arc;
use tower::ServiceExt;

async fn setup_test_app() -> (Router, Arc<AppState>) {
    let health_registry = HealthRegistry::new();
    health_registry.register(components::METRIC_STORE).await;
    health_registry.register(components::ARCHIVE).await;
    health_registry.register(components::FOOTPRINT_WORKER).await;

    let dispatcher = MetricDispatcher::builder()
        .registry(Arc::new(BackendRegistry::new()))
        .archive(Arc::new(FsArchive::new(std::env::temp_dir())))
        .catalog(Arc::new(ClusterCatalog::default()))
        .build()
        .unwrap();

    let state = Arc::new(
        AppState::new(health_registry, ServiceMetrics::new()).with_dispatcher(Arc::new(dispatcher)),
    );
    (create_router(state.clone()), state)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _state) = setup_test_app().await;

    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);

    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "healthy");
    assert!(health["components"]["metric_store"].is_object());
    assert!(health["components"]["archive"].is_object());
}

#[tokio::test]
async fn test_healthz_returns_ok_when_worker_degraded() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .record_failure(components::FOOTPRINT_WORKER, "repository busy")
        .await;

    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);

    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "degraded");
    assert_eq!(
        health["components"]["footprint_worker"]["consecutive_failures"],
        1
    );
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .set_unhealthy(components::METRIC_STORE, "Backend unreachable")
        .await;

    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_returns_503_when_not_ready() {
    let (app, _state) = setup_test_app().await;

    let (status, body) = get(app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let readiness: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(readiness["ready"], false);
}

#[tokio::test]
async fn test_readyz_returns_ok_when_ready() {
    let (app, state) = setup_test_app().await;
    state.health_registry.set_ready(true).await;

    let (status, body) = get(app, "/readyz").await;
    assert_eq!(status, StatusCode::OK);

    let readiness: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_readyz_returns_503_when_archive_unhealthy() {
    let (app, state) = setup_test_app().await;
    state.health_registry.set_ready(true).await;
    state
        .health_registry
        .set_unhealthy(components::ARCHIVE, "Job archive directory missing")
        .await;

    let (status, _) = get(app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, state) = setup_test_app().await;

    state.metrics.inc_cache_hit();
    state.metrics.inc_metric_load("live");
    state.metrics.observe_footprint_run(0.25, 3, 1);

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();

    assert!(metrics_text.contains("jobmon_cache_hits_total"));
    assert!(metrics_text.contains("jobmon_cache_entries"));
    assert!(metrics_text.contains("jobmon_metric_loads_total{source=\"live\"}"));
    assert!(metrics_text.contains("jobmon_footprint_run_seconds_bucket"));
    assert!(metrics_text.contains("jobmon_footprint_jobs_updated_total"));
}
