//! Custom test assertions for validation outcomes.

use cas_service::errors::CasError;
use cas_service::services::Assertion;
use std::fmt::Debug;

/// Chainable checks on a successful validation.
///
/// # Example
/// ```rust,ignore
/// assertion
///     .assert_principal("alice")
///     .assert_service("https://app.example.org")
///     .assert_chain_len(1);
/// ```
pub trait AssertionChecks {
    fn assert_principal(&self, principal_id: &str) -> &Self;

    fn assert_service(&self, service: &str) -> &Self;

    fn assert_from_new_login(&self) -> &Self;

    fn assert_not_from_new_login(&self) -> &Self;

    /// Number of authentications from the issuing ticket up to the root TGT.
    fn assert_chain_len(&self, len: usize) -> &Self;
}

impl AssertionChecks for Assertion {
    fn assert_principal(&self, principal_id: &str) -> &Self {
        assert_eq!(self.principal_id(), principal_id, "unexpected principal");
        self
    }

    fn assert_service(&self, service: &str) -> &Self {
        assert_eq!(self.service().id(), service, "unexpected service");
        self
    }

    fn assert_from_new_login(&self) -> &Self {
        assert!(self.is_from_new_login(), "expected ticket from a new login");
        self
    }

    fn assert_not_from_new_login(&self) -> &Self {
        assert!(!self.is_from_new_login(), "expected ticket from an existing session");
        self
    }

    fn assert_chain_len(&self, len: usize) -> &Self {
        assert_eq!(
            self.chained_authentications().len(),
            len,
            "unexpected authentication chain length"
        );
        self
    }
}

/// Assert the call failed with `TicketNotFound`.
pub fn assert_ticket_not_found<T: Debug>(result: Result<T, CasError>) {
    match result {
        Err(CasError::TicketNotFound) => {}
        other => panic!("expected TicketNotFound, got {other:?}"),
    }
}
