//! Mock authentication handlers.
//!
//! All mocks support every credential kind unless noted and count their
//! invocations.

use async_trait::async_trait;
use cas_service::authn::{
    AuthenticationHandler, Credential, HandlerError, HandlerResult, Principal,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Accepts any credential as a fixed principal.
#[derive(Debug)]
pub struct StaticHandler {
    name: String,
    principal_id: String,
    calls: AtomicUsize,
}

impl StaticHandler {
    pub fn new(name: &str, principal_id: &str) -> Self {
        Self {
            name: name.to_string(),
            principal_id: principal_id.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthenticationHandler for StaticHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, _credential: &Credential) -> bool {
        true
    }

    async fn authenticate(&self, credential: &Credential) -> Result<HandlerResult, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(HandlerResult::new(
            &self.name,
            credential,
            Principal::new(self.principal_id.clone()),
        ))
    }
}

/// Fails every credential with a fixed error.
#[derive(Debug)]
pub struct FailingHandler {
    name: String,
    error: HandlerError,
    calls: AtomicUsize,
}

impl FailingHandler {
    pub fn new(name: &str, error: HandlerError) -> Self {
        Self {
            name: name.to_string(),
            error,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn bad_credentials(name: &str) -> Self {
        Self::new(name, HandlerError::BadCredentials)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthenticationHandler for FailingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, _credential: &Credential) -> bool {
        true
    }

    async fn authenticate(&self, _credential: &Credential) -> Result<HandlerResult, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

/// Supports only username/password credentials for one username; the rest
/// are ignored.
#[derive(Debug)]
pub struct UsernameHandler {
    name: String,
    username: String,
}

impl UsernameHandler {
    pub fn new(name: &str, username: &str) -> Self {
        Self {
            name: name.to_string(),
            username: username.to_string(),
        }
    }
}

#[async_trait]
impl AuthenticationHandler for UsernameHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, credential: &Credential) -> bool {
        matches!(credential, Credential::UsernamePassword { username, .. } if *username == self.username)
    }

    async fn authenticate(&self, credential: &Credential) -> Result<HandlerResult, HandlerError> {
        Ok(HandlerResult::new(
            &self.name,
            credential,
            Principal::new(self.username.clone()),
        ))
    }
}

/// Sleeps before accepting. Pair with a short handler timeout to exercise
/// `HandlerUnavailable`.
#[derive(Debug)]
pub struct SlowHandler {
    inner: StaticHandler,
    delay: Duration,
}

impl SlowHandler {
    pub fn new(name: &str, principal_id: &str, delay: Duration) -> Self {
        Self {
            inner: StaticHandler::new(name, principal_id),
            delay,
        }
    }
}

#[async_trait]
impl AuthenticationHandler for SlowHandler {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn supports(&self, credential: &Credential) -> bool {
        self.inner.supports(credential)
    }

    async fn authenticate(&self, credential: &Credential) -> Result<HandlerResult, HandlerError> {
        tokio::time::sleep(self.delay).await;
        self.inner.authenticate(credential).await
    }
}
