//! Facade harness for integration tests.
//!
//! `TestCas` wires a `CentralAuthenticationService` over an in-memory
//! registry (or any registry supplied) with a token handler that knows the
//! fixed test principals.

use crate::test_ids::*;
use cas_service::authn::handlers::{AcceptUsersAuthenticationHandler, TokenAuthenticationHandler};
use cas_service::authn::manager::DEFAULT_HANDLER_TIMEOUT;
use cas_service::authn::{
    Authentication, AuthenticationHandler, AuthenticationPolicy, AuthenticationResult,
    AuthenticationTransaction, Credential, DefaultAuthenticationTransactionManager,
    PolicyBasedAuthenticationManager, Principal,
};
use cas_service::context::RequestContext;
use cas_service::crypto::MIN_BCRYPT_COST;
use cas_service::errors::CasError;
use cas_service::registry::{MemoryTicketRegistry, TicketRegistry};
use cas_service::services::{Assertion, CentralAuthenticationService, TicketExpirationPolicies};
use cas_service::tickets::{
    ExpirationPolicy, HostNameBasedTicketIdGenerator, Service, Ticket, TicketIdGenerator,
    TicketKind,
};
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;

/// Facade under test plus convenience flows.
pub struct TestCas {
    cas: CentralAuthenticationService,
}

impl Default for TestCas {
    fn default() -> Self {
        Self::new()
    }
}

impl TestCas {
    /// In-memory registry, token handler for alice and bob, default policies.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> TestCasBuilder {
        TestCasBuilder::default()
    }

    pub fn cas(&self) -> &CentralAuthenticationService {
        &self.cas
    }

    pub fn registry(&self) -> &Arc<dyn TicketRegistry> {
        self.cas.registry()
    }

    /// Fresh request context per call, as the protocol layer would pass.
    pub fn ctx(&self) -> RequestContext {
        RequestContext::internal()
    }

    pub async fn login_with(
        &self,
        credentials: Vec<Credential>,
    ) -> Result<AuthenticationResult, CasError> {
        let tx = AuthenticationTransaction::of(None, credentials);
        self.cas.authenticate(&self.ctx(), &[tx]).await
    }

    pub async fn login_token(&self, token: &str) -> Result<AuthenticationResult, CasError> {
        self.login_with(vec![Credential::token(token)]).await
    }

    /// Authenticate with a token and open a session. Returns the TGT id.
    pub async fn start_session(&self, token: &str) -> Result<String, CasError> {
        let result = self.login_token(token).await?;
        self.cas
            .create_ticket_granting_ticket(&self.ctx(), result.authentication().clone())
            .await
    }

    pub async fn grant(&self, tgt_id: &str, service: &str) -> Result<String, CasError> {
        self.cas
            .grant_service_ticket(&self.ctx(), tgt_id, &Service::new(service), None)
            .await
    }

    pub async fn validate(&self, ticket_id: &str, service: &str) -> Result<Assertion, CasError> {
        self.cas
            .validate_service_ticket(&self.ctx(), ticket_id, &Service::new(service))
            .await
    }

    pub async fn logout(&self, tgt_id: &str) -> Result<usize, CasError> {
        self.cas
            .destroy_ticket_granting_ticket(&self.ctx(), tgt_id)
            .await
    }

    /// Store a TGT for `principal_id` created at `created`, bypassing the
    /// facade. Used to seed already-expired sessions.
    pub async fn seed_session(
        &self,
        principal_id: &str,
        policy: ExpirationPolicy,
        created: DateTime<Utc>,
    ) -> Result<String, CasError> {
        let id = HostNameBasedTicketIdGenerator::new(TEST_HOST_NAME)
            .new_ticket_id(TicketKind::TicketGranting)?;
        let authentication = Arc::new(Authentication::builder(Principal::new(principal_id)).build());
        let ticket = Ticket::ticket_granting(id.clone(), authentication, policy, created);
        self.registry().add_ticket(&ticket).await?;
        Ok(id)
    }
}

/// Builder for `TestCas`.
pub struct TestCasBuilder {
    registry: Option<Arc<dyn TicketRegistry>>,
    handlers: Vec<Arc<dyn AuthenticationHandler>>,
    authentication_policy: AuthenticationPolicy,
    handler_timeout: Duration,
    expiration_policies: TicketExpirationPolicies,
}

impl Default for TestCasBuilder {
    fn default() -> Self {
        Self {
            registry: None,
            handlers: Vec::new(),
            authentication_policy: AuthenticationPolicy::default(),
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
            expiration_policies: TicketExpirationPolicies::default(),
        }
    }
}

impl TestCasBuilder {
    pub fn with_registry(mut self, registry: Arc<dyn TicketRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Add a handler. Once any handler is added the default token handler
    /// is no longer installed.
    pub fn with_handler(mut self, handler: Arc<dyn AuthenticationHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Add the token handler for alice and bob.
    pub fn with_token_handler(self) -> Self {
        self.with_handler(Arc::new(test_token_handler()))
    }

    /// Add an accept-users handler for alice with `TEST_PASSWORD_ALICE`.
    pub fn with_password_handler(self) -> Self {
        let password = SecretString::from(TEST_PASSWORD_ALICE.to_string());
        let handler = AcceptUsersAuthenticationHandler::from_plaintext(
            "accept-users",
            [(TEST_PRINCIPAL_ALICE, &password)],
            MIN_BCRYPT_COST,
        )
        .expect("accept-users handler should build");
        self.with_handler(Arc::new(handler))
    }

    pub fn with_authentication_policy(mut self, policy: AuthenticationPolicy) -> Self {
        self.authentication_policy = policy;
        self
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    pub fn with_expiration_policies(mut self, policies: TicketExpirationPolicies) -> Self {
        self.expiration_policies = policies;
        self
    }

    pub fn build(self) -> TestCas {
        let handlers = if self.handlers.is_empty() {
            vec![Arc::new(test_token_handler()) as Arc<dyn AuthenticationHandler>]
        } else {
            self.handlers
        };
        let manager = PolicyBasedAuthenticationManager::new(
            handlers,
            self.authentication_policy,
            self.handler_timeout,
        );
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(MemoryTicketRegistry::new()));

        TestCas {
            cas: CentralAuthenticationService::new(
                registry,
                Arc::new(DefaultAuthenticationTransactionManager::new(Arc::new(manager))),
                Arc::new(HostNameBasedTicketIdGenerator::new(TEST_HOST_NAME)),
                self.expiration_policies,
            ),
        }
    }
}

fn test_token_handler() -> TokenAuthenticationHandler {
    TokenAuthenticationHandler::new("token")
        .with_token(TEST_TOKEN_ALICE, TEST_PRINCIPAL_ALICE)
        .with_token(TEST_TOKEN_BOB, TEST_PRINCIPAL_BOB)
}
