//! Metrics definitions for the CAS service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `cas_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `kind`: 4 values (tgt, st, pt, pgt)
//! - `status`: success, error
//! - `error_category`: authentication, ticket, registry, internal
//! - `operation`: bounded by the registry primitives
//! - `backend`: memory, redis, postgres

use metrics::{counter, histogram};
use std::time::Duration;

// ============================================================================
// Ticket Metrics
// ============================================================================

/// Record a ticket being issued.
///
/// Metric: `cas_tickets_issued_total`
/// Labels: `kind`
pub fn record_ticket_issued(kind: &str) {
    counter!("cas_tickets_issued_total", "kind" => kind.to_string()).increment(1);
}

/// Record a service or proxy ticket validation.
///
/// Metric: `cas_ticket_validations_total`, `cas_ticket_validation_duration_seconds`
/// Labels: `status`, `error_category`
pub fn record_ticket_validation(status: &str, error_category: Option<&str>, duration: Duration) {
    let category = error_category.unwrap_or("none");
    histogram!("cas_ticket_validation_duration_seconds", "status" => status.to_string())
        .record(duration.as_secs_f64());
    counter!("cas_ticket_validations_total", "status" => status.to_string(), "error_category" => category.to_string())
        .increment(1);
}

/// Record tickets removed by logout cascade.
///
/// Metric: `cas_tickets_destroyed_total`
pub fn record_tickets_destroyed(count: usize) {
    counter!("cas_tickets_destroyed_total").increment(u64::try_from(count).unwrap_or(u64::MAX));
}

// ============================================================================
// Authentication Metrics
// ============================================================================

/// Record an authentication attempt.
///
/// Metric: `cas_authentications_total`, `cas_authentication_duration_seconds`
/// Labels: `status`, `error_category`
pub fn record_authentication(status: &str, error_category: Option<&str>, duration: Duration) {
    let category = error_category.unwrap_or("none");
    histogram!("cas_authentication_duration_seconds", "status" => status.to_string())
        .record(duration.as_secs_f64());
    counter!("cas_authentications_total", "status" => status.to_string(), "error_category" => category.to_string())
        .increment(1);
}

/// Record a single handler invocation.
///
/// Metric: `cas_handler_invocations_total`
/// Labels: `handler`, `status`
///
/// Handler names come from configuration, so the set is bounded by deployment.
pub fn record_handler_invocation(handler: &str, status: &str) {
    counter!("cas_handler_invocations_total", "handler" => handler.to_string(), "status" => status.to_string())
        .increment(1);
}

// ============================================================================
// Registry Metrics
// ============================================================================

/// Record a registry primitive call.
///
/// Metric: `cas_registry_operation_duration_seconds`, `cas_registry_operations_total`
/// Labels: `operation`, `backend`, `status`
pub fn record_registry_operation(operation: &str, backend: &str, status: &str, duration: Duration) {
    histogram!("cas_registry_operation_duration_seconds", "operation" => operation.to_string(), "backend" => backend.to_string())
        .record(duration.as_secs_f64());
    counter!("cas_registry_operations_total",
        "operation" => operation.to_string(),
        "backend" => backend.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a ticket id collision that forced regeneration.
///
/// Metric: `cas_ticket_id_collisions_total`
pub fn record_ticket_id_collision(kind: &str) {
    counter!("cas_ticket_id_collisions_total", "kind" => kind.to_string()).increment(1);
}

// ============================================================================
// Cleaner Metrics
// ============================================================================

/// Record one cleaner pass.
///
/// Metric: `cas_cleaner_runs_total`, `cas_cleaner_tickets_removed_total`,
/// `cas_cleaner_duration_seconds`
/// Labels: `status`
pub fn record_cleaner_run(status: &str, removed: usize, duration: Duration) {
    counter!("cas_cleaner_runs_total", "status" => status.to_string()).increment(1);
    counter!("cas_cleaner_tickets_removed_total").increment(u64::try_from(removed).unwrap_or(u64::MAX));
    histogram!("cas_cleaner_duration_seconds").record(duration.as_secs_f64());
}
