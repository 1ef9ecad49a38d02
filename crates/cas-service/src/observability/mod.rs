//! Observability for the CAS service.
//!
//! # Privacy by Default
//!
//! Anything that touches credentials uses `#[instrument(skip_all)]` with an
//! explicit allow-list of fields. Fields fall into three groups:
//! - **SAFE**: plaintext (ticket kinds, policy names, backend names, counts)
//! - **HASHED**: SHA-256 prefix for correlation (principal ids, ticket ids)
//! - **NEVER**: must not appear in logs (passwords, tokens, backend URLs)

pub mod health;
pub mod metrics;

use crate::errors::CasError;
use sha2::{Digest, Sha256};

/// Hash a field value for correlation in logs (SHA-256, first 8 hex chars).
///
/// This is a one-way correlation aid, not protection for secrets.
pub fn hash_for_correlation(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    hex::encode(digest.iter().take(4).copied().collect::<Vec<u8>>())
}

/// Error categories for metrics labels (bounded cardinality).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Credential or account failures
    Authentication,
    /// Missing, expired or mismatched tickets
    Ticket,
    /// Backend I/O failures and timeouts
    Registry,
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Ticket => "ticket",
            ErrorCategory::Registry => "registry",
            ErrorCategory::Internal => "internal",
        }
    }
}

impl From<&CasError> for ErrorCategory {
    fn from(err: &CasError) -> Self {
        match err {
            CasError::BadCredentials
            | CasError::AccountLocked
            | CasError::AccountDisabled
            | CasError::AccountExpired
            | CasError::HandlerUnavailable(_)
            | CasError::MixedPrincipal => ErrorCategory::Authentication,
            CasError::TicketNotFound
            | CasError::TicketExpired
            | CasError::ServiceMismatch { .. }
            | CasError::InvalidTicketOperation(_) => ErrorCategory::Ticket,
            CasError::DuplicateTicketId(_) | CasError::RegistryUnavailable(_) => {
                ErrorCategory::Registry
            }
            CasError::Internal(_) => ErrorCategory::Internal,
        }
    }
}
