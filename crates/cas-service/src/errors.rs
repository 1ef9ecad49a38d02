//! CAS service error types.
//!
//! Ticket-side and authentication-side failures share one enum so the
//! protocol layer can match on a single type. Internal details (backend
//! messages) are carried for server-side logs only.

use thiserror::Error;

/// CAS service error type.
///
/// Expired and forged ticket ids both surface as `TicketNotFound` on the
/// validation path; `TicketExpired` is only produced where the caller needs
/// to tell a user that their session ended.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CasError {
    /// Ticket absent, destroyed, or lazily expired.
    #[error("Ticket not found")]
    TicketNotFound,

    /// Ticket exists but its expiration policy reports it expired.
    #[error("Ticket expired")]
    TicketExpired,

    /// Ticket is valid but bound to a different service.
    #[error("Ticket is not valid for service {requested}")]
    ServiceMismatch { requested: String },

    /// Generated ticket id collided with a stored ticket.
    #[error("Duplicate ticket id: {0}")]
    DuplicateTicketId(String),

    /// Backend I/O failure or timeout.
    #[error("Ticket registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("Invalid credentials")]
    BadCredentials,

    #[error("Account locked")]
    AccountLocked,

    #[error("Account disabled")]
    AccountDisabled,

    #[error("Account expired")]
    AccountExpired,

    /// Handler could not reach its backing store or timed out.
    #[error("Authentication handler unavailable: {0}")]
    HandlerUnavailable(String),

    /// Fresh credentials resolved to a different principal than the session.
    #[error("Authentication principal does not match the session principal")]
    MixedPrincipal,

    /// Operation not permitted on the ticket in its current state.
    #[error("Invalid ticket operation: {0}")]
    InvalidTicketOperation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CasError {
    /// Returns true for failures the caller may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CasError::RegistryUnavailable(_) | CasError::HandlerUnavailable(_)
        )
    }

    /// Returns true for authentication-side failures.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            CasError::BadCredentials
                | CasError::AccountLocked
                | CasError::AccountDisabled
                | CasError::AccountExpired
                | CasError::HandlerUnavailable(_)
                | CasError::MixedPrincipal
        )
    }
}

impl From<sqlx::Error> for CasError {
    fn from(e: sqlx::Error) -> Self {
        CasError::RegistryUnavailable(format!("database error: {e}"))
    }
}

impl From<redis::RedisError> for CasError {
    fn from(e: redis::RedisError) -> Self {
        CasError::RegistryUnavailable(format!("redis error: {e}"))
    }
}

impl From<serde_json::Error> for CasError {
    fn from(e: serde_json::Error) -> Self {
        CasError::RegistryUnavailable(format!("ticket serialization failed: {e}"))
    }
}
