//! Authentication manager: runs a transaction's credentials through the
//! handler chain and applies the configured policy.

use crate::authn::authentication::{attributes, Authentication, AuthenticationBuilder};
use crate::authn::credential::Credential;
use crate::authn::handler::{AuthenticationHandler, HandlerError, HandlerResult};
use crate::authn::policy::AuthenticationPolicy;
use crate::authn::transaction::AuthenticationTransaction;
use crate::errors::CasError;
use crate::observability::hash_for_correlation;
use crate::observability::metrics::record_handler_invocation;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Default bound on a single handler invocation.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(5);

/// Turns one transaction into one `Authentication`, or a failure.
#[async_trait::async_trait]
pub trait AuthenticationManager: Send + Sync {
    async fn authenticate(
        &self,
        transaction: &AuthenticationTransaction,
    ) -> Result<Authentication, CasError>;
}

pub struct PolicyBasedAuthenticationManager {
    handlers: Vec<Arc<dyn AuthenticationHandler>>,
    policy: AuthenticationPolicy,
    handler_timeout: Duration,
}

impl PolicyBasedAuthenticationManager {
    pub fn new(
        handlers: Vec<Arc<dyn AuthenticationHandler>>,
        policy: AuthenticationPolicy,
        handler_timeout: Duration,
    ) -> Self {
        Self {
            handlers,
            policy,
            handler_timeout,
        }
    }

    pub fn policy(&self) -> &AuthenticationPolicy {
        &self.policy
    }

    pub fn handler_names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    async fn invoke(
        &self,
        handler: &dyn AuthenticationHandler,
        credential: &Credential,
    ) -> Result<HandlerResult, HandlerError> {
        match tokio::time::timeout(self.handler_timeout, handler.authenticate(credential)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    target: "cas.authn.manager",
                    handler = %handler.name(),
                    timeout_ms = u64::try_from(self.handler_timeout.as_millis()).unwrap_or(u64::MAX),
                    "Authentication handler timed out"
                );
                Err(HandlerError::Unavailable(format!(
                    "handler {} timed out after {}ms",
                    handler.name(),
                    self.handler_timeout.as_millis()
                )))
            }
        }
    }
}

#[async_trait::async_trait]
impl AuthenticationManager for PolicyBasedAuthenticationManager {
    #[instrument(skip_all, fields(credentials = transaction.credentials().len(), policy = %self.policy))]
    async fn authenticate(
        &self,
        transaction: &AuthenticationTransaction,
    ) -> Result<Authentication, CasError> {
        let mut builder = AuthenticationBuilder::default();
        let mut first_failure: Option<HandlerError> = None;
        let mut principal_resolved = false;

        'credentials: for credential in transaction.credentials() {
            builder.add_credential(credential.metadata());
            let mut supported = false;

            for handler in &self.handlers {
                if !handler.supports(credential) {
                    continue;
                }
                supported = true;
                let name = handler.name().to_string();

                match self.invoke(handler.as_ref(), credential).await {
                    Ok(result) => {
                        record_handler_invocation(&name, "success");
                        debug!(
                            target: "cas.authn.manager",
                            handler = %name,
                            principal = %hash_for_correlation(&result.principal.id),
                            "Handler authenticated credential"
                        );
                        // The first resolved principal wins
                        if !principal_resolved {
                            builder.set_principal(result.principal.clone());
                            principal_resolved = true;
                        }
                        builder.add_attribute(attributes::SUCCESSFUL_HANDLERS, vec![name.clone()]);
                        builder.add_success(name, result);

                        if self.policy.short_circuits() && self.policy.is_satisfied_by(&builder) {
                            break 'credentials;
                        }
                    }
                    Err(err) => {
                        record_handler_invocation(&name, "error");
                        debug!(
                            target: "cas.authn.manager",
                            handler = %name,
                            error = %err,
                            "Handler rejected credential"
                        );
                        if first_failure.is_none() {
                            first_failure = Some(err.clone());
                        }
                        builder.add_failure(name, err);
                    }
                }
            }

            if !supported {
                warn!(
                    target: "cas.authn.manager",
                    kind = ?credential.kind(),
                    "No authentication handler supports credential"
                );
            }
        }

        if builder.successes().is_empty() || !self.policy.is_satisfied_by(&builder) {
            let err = first_failure.map(CasError::from).unwrap_or(CasError::BadCredentials);
            info!(
                target: "cas.authn.manager",
                successes = builder.successes().len(),
                failures = builder.failures().len(),
                error = %err,
                "Authentication policy not satisfied"
            );
            return Err(err);
        }

        if transaction.credentials().iter().any(|c| c.is_remember_me()) {
            builder.add_attribute(attributes::REMEMBER_ME, vec!["true".to_string()]);
        }
        builder.set_authentication_date(Utc::now());

        let authentication = builder.build();
        info!(
            target: "cas.authn.manager",
            principal = %hash_for_correlation(&authentication.principal().id),
            handlers = authentication.successes().len(),
            "Authentication succeeded"
        );
        Ok(authentication)
    }
}
