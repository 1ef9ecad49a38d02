//! Runs transactions against the authentication manager and feeds the
//! result builder.

use crate::authn::manager::AuthenticationManager;
use crate::authn::result::AuthenticationResultBuilder;
use crate::authn::transaction::AuthenticationTransaction;
use crate::errors::CasError;
use std::sync::Arc;
use tracing::{debug, instrument};

pub struct DefaultAuthenticationTransactionManager {
    manager: Arc<dyn AuthenticationManager>,
}

impl DefaultAuthenticationTransactionManager {
    pub fn new(manager: Arc<dyn AuthenticationManager>) -> Self {
        Self { manager }
    }

    pub fn authentication_manager(&self) -> &Arc<dyn AuthenticationManager> {
        &self.manager
    }

    /// Handle one transaction.
    ///
    /// An empty transaction is a no-op and leaves `builder` untouched. On
    /// failure nothing is collected, so a half-validated transaction never
    /// reaches the builder.
    #[instrument(skip_all, fields(credentials = transaction.credentials().len()))]
    pub async fn handle(
        &self,
        transaction: &AuthenticationTransaction,
        builder: &mut AuthenticationResultBuilder,
    ) -> Result<&Self, CasError> {
        if transaction.is_empty() {
            debug!(
                target: "cas.authn.transaction",
                "Transaction carries no credentials, skipping"
            );
            return Ok(self);
        }

        let authentication = self.manager.authenticate(transaction).await?;
        builder.collect(authentication);
        Ok(self)
    }
}
