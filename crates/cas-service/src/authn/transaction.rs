//! A single authentication attempt.

use crate::authn::credential::{Credential, CredentialKind};
use crate::tickets::Service;

/// Credentials presented together, plus the service the user is heading to.
///
/// Credentials are kept in presentation order. Duplicates (same
/// `CredentialMetaData`) are dropped. An empty transaction is valid and is
/// skipped by the transaction manager.
#[derive(Debug, Clone, Default)]
pub struct AuthenticationTransaction {
    service: Option<Service>,
    credentials: Vec<Credential>,
}

impl AuthenticationTransaction {
    pub fn of(service: Option<Service>, credentials: impl IntoIterator<Item = Credential>) -> Self {
        let mut unique: Vec<Credential> = Vec::new();
        for credential in credentials {
            let meta = credential.metadata();
            if !unique.iter().any(|c| c.metadata() == meta) {
                unique.push(credential);
            }
        }
        Self {
            service,
            credentials: unique,
        }
    }

    pub fn service(&self) -> Option<&Service> {
        self.service.as_ref()
    }

    pub fn credentials(&self) -> &[Credential] {
        &self.credentials
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    pub fn has_credential_of_kind(&self, kind: CredentialKind) -> bool {
        self.credentials.iter().any(|c| c.kind() == kind)
    }
}
