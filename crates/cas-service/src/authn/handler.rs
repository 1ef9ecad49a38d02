//! Authentication handler contract.

use crate::authn::authentication::Principal;
use crate::authn::credential::{Credential, CredentialMetaData};
use crate::errors::CasError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure kinds a handler may report for a credential it supports.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "kebab-case")]
pub enum HandlerError {
    #[error("Invalid credentials")]
    BadCredentials,

    #[error("Account locked")]
    AccountLocked,

    #[error("Account disabled")]
    AccountDisabled,

    #[error("Account expired")]
    AccountExpired,

    /// Backing store unreachable or the call timed out.
    #[error("Handler unavailable: {0}")]
    Unavailable(String),
}

impl From<HandlerError> for CasError {
    fn from(err: HandlerError) -> Self {
        match err {
            HandlerError::BadCredentials => CasError::BadCredentials,
            HandlerError::AccountLocked => CasError::AccountLocked,
            HandlerError::AccountDisabled => CasError::AccountDisabled,
            HandlerError::AccountExpired => CasError::AccountExpired,
            HandlerError::Unavailable(reason) => CasError::HandlerUnavailable(reason),
        }
    }
}

/// Outcome of one handler successfully authenticating one credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerResult {
    pub handler_name: String,
    pub credential: CredentialMetaData,
    pub principal: Principal,
    /// Non-fatal notices (e.g. password about to expire).
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl HandlerResult {
    pub fn new(handler_name: impl Into<String>, credential: &Credential, principal: Principal) -> Self {
        Self {
            handler_name: handler_name.into(),
            credential: credential.metadata(),
            principal,
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }
}

/// A single step of the handler chain.
///
/// A handler must either ignore a credential (`supports` returns false) or
/// return a definite success or failure for it.
#[async_trait::async_trait]
pub trait AuthenticationHandler: Send + Sync {
    /// Unique name, used as the key for recorded successes and failures.
    fn name(&self) -> &str;

    fn supports(&self, credential: &Credential) -> bool;

    async fn authenticate(&self, credential: &Credential) -> Result<HandlerResult, HandlerError>;
}
