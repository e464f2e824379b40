use std::collections::BTreeMap;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::config::HealthCheckType;
use crate::scheduler::ScheduledHealthCheck;
use crate::state::HealthStatus;

/// Current state of one check, for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheckDetail {
    pub status: HealthStatus,
    #[serde(rename = "type")]
    pub check_type: HealthCheckType,
    pub critical: bool,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub since_transition_ms: u64,
    /// None until the first probe has completed.
    pub checked_ms_ago: Option<u64>,
}

impl HealthCheckDetail {
    pub fn of(check: &ScheduledHealthCheck) -> Self {
        let state = check.snapshot();
        Self {
            status: state.status,
            check_type: check.check_type(),
            critical: check.is_critical(),
            consecutive_failures: state.consecutive_failures,
            consecutive_successes: state.consecutive_successes,
            message: state.last_message.clone(),
            since_transition_ms: state.last_transition.elapsed().as_millis() as u64,
            checked_ms_ago: state.last_checked.map(|at| at.elapsed().as_millis() as u64),
        }
    }
}

/// The aggregate plus every check it was computed from. Can be returned from an
/// axum handler: 200 when healthy, 503 otherwise, JSON body either way.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthReport {
    pub name: String,
    pub healthy: bool,
    pub shutting_down: bool,
    pub checks: BTreeMap<String, HealthCheckDetail>,
}

impl IntoResponse for HealthReport {
    fn into_response(self) -> Response {
        let code = match self.healthy {
            true => StatusCode::OK,
            false => StatusCode::SERVICE_UNAVAILABLE,
        };
        (code, Json(self)).into_response()
    }
}
