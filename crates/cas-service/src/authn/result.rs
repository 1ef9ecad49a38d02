//! Accumulation of authentications across transactions.

use crate::authn::authentication::{Authentication, AuthenticationBuilder};
use crate::tickets::Service;
use std::sync::Arc;

/// Final product of one or more transactions, ready to mint a TGT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationResult {
    authentication: Arc<Authentication>,
    service: Option<Service>,
}

impl AuthenticationResult {
    pub fn new(authentication: Arc<Authentication>, service: Option<Service>) -> Self {
        Self {
            authentication,
            service,
        }
    }

    pub fn authentication(&self) -> &Arc<Authentication> {
        &self.authentication
    }

    pub fn service(&self) -> Option<&Service> {
        self.service.as_ref()
    }
}

/// Collects successful authentications, e.g. one per factor in an MFA flow.
#[derive(Debug, Clone, Default)]
pub struct AuthenticationResultBuilder {
    authentications: Vec<Authentication>,
}

impl AuthenticationResultBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collect(&mut self, authentication: Authentication) -> &mut Self {
        self.authentications.push(authentication);
        self
    }

    pub fn authentications(&self) -> &[Authentication] {
        &self.authentications
    }

    pub fn initial_authentication(&self) -> Option<&Authentication> {
        self.authentications.first()
    }

    pub fn is_empty(&self) -> bool {
        self.authentications.is_empty()
    }

    /// Merge everything collected so far.
    ///
    /// The principal comes from the first authentication; attributes,
    /// credentials and handler outcomes are unioned; the date is that of the
    /// last step. Returns `None` if nothing was collected.
    pub fn build(&self, service: Option<Service>) -> Option<AuthenticationResult> {
        let (first, rest) = self.authentications.split_first()?;
        let mut merged: AuthenticationBuilder = first.to_builder();

        for next in rest {
            for (name, values) in next.attributes() {
                merged.add_attribute(name.clone(), values.clone());
            }
            for credential in next.credentials() {
                merged.add_credential(credential.clone());
            }
            for (name, success) in next.successes() {
                merged.add_success(name.clone(), success.clone());
            }
            for (name, failure) in next.failures() {
                merged.add_failure(name.clone(), failure.clone());
            }
            merged.set_authentication_date(next.authentication_date());
        }

        Some(AuthenticationResult::new(Arc::new(merged.build()), service))
    }
}
