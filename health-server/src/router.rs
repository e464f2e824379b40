use std::future::ready;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use health::{HealthCheckManager, HealthCheckType, HealthError};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;

#[derive(Deserialize)]
pub struct HealthCheckQuery {
    #[serde(rename = "type")]
    check_type: Option<String>,
}

#[derive(Deserialize)]
pub struct RunQuery {
    name: Option<String>,
}

pub fn router(manager: Arc<HealthCheckManager>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/_readiness", get(readiness))
        .route("/_liveness", get(liveness))
        .route("/health-check", get(health_check))
        .route("/tasks/health-check", post(run_health_checks))
        .with_state(manager)
}

/// Add the prometheus endpoint, should be called last.
pub fn with_metrics(router: Router, recorder: PrometheusHandle) -> Router {
    router.route("/metrics", get(move || ready(recorder.render())))
}

pub async fn index() -> &'static str {
    "health-server"
}

async fn readiness(State(manager): State<Arc<HealthCheckManager>>) -> Response {
    manager.report().into_response()
}

async fn liveness(State(manager): State<Arc<HealthCheckManager>>) -> Response {
    manager
        .report_for(Some(HealthCheckType::Alive))
        .into_response()
}

async fn health_check(
    State(manager): State<Arc<HealthCheckManager>>,
    Query(query): Query<HealthCheckQuery>,
) -> Response {
    let check_type = match query.check_type.as_deref().map(str::parse::<HealthCheckType>) {
        None => None,
        Some(Ok(check_type)) => Some(check_type),
        Some(Err(e)) => return (StatusCode::BAD_REQUEST, e).into_response(),
    };
    manager.report_for(check_type).into_response()
}

/// Re-run one check (`?name=db`) or all of them outside their schedules.
async fn run_health_checks(
    State(manager): State<Arc<HealthCheckManager>>,
    Query(query): Query<RunQuery>,
) -> Response {
    let Some(name) = query.name else {
        return manager.run_all_now().await.into_response();
    };
    match manager.run_now(&name).await {
        Ok(detail) => Json(detail).into_response(),
        Err(e @ HealthError::UnknownCheck(_)) => {
            (StatusCode::NOT_FOUND, e.to_string()).into_response()
        }
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}
