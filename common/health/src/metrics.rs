use crate::state::HealthStatus;

pub const CHECK_RESULT: &str = "health_check_result_total";
pub const CHECK_DURATION: &str = "health_check_duration_seconds";
pub const CHECK_TRANSITION: &str = "health_check_transition_total";
pub const CHECK_REJECTED: &str = "health_check_rejected_total";
pub const AGGREGATE_HEALTHY: &str = "health_check_aggregate_healthy";
pub const AGGREGATE_UNHEALTHY: &str = "health_check_aggregate_unhealthy";

pub fn emit_check_result(check: &str, healthy: bool, duration_secs: f64) {
    let result = if healthy { "healthy" } else { "unhealthy" };
    metrics::counter!(
        CHECK_RESULT,
        "check" => check.to_string(),
        "result" => result,
    )
    .increment(1);
    metrics::histogram!(CHECK_DURATION, "check" => check.to_string()).record(duration_secs);
}

pub fn emit_transition(check: &str, to: HealthStatus) {
    metrics::counter!(
        CHECK_TRANSITION,
        "check" => check.to_string(),
        "to" => to.as_str(),
    )
    .increment(1);
}

pub fn emit_rejected(check: &str) {
    metrics::counter!(CHECK_REJECTED, "check" => check.to_string()).increment(1);
}

pub fn set_aggregate(healthy: usize, unhealthy: usize) {
    metrics::gauge!(AGGREGATE_HEALTHY).set(healthy as f64);
    metrics::gauge!(AGGREGATE_UNHEALTHY).set(unhealthy as f64);
}
