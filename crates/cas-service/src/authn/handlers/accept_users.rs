//! Username/password handler backed by a static table of bcrypt hashes.

use crate::authn::authentication::{Attributes, Principal};
use crate::authn::credential::Credential;
use crate::authn::handler::{AuthenticationHandler, HandlerError, HandlerResult};
use crate::authn::password_policy::{
    AuthenticationResponse, AuthenticationResultCode, RejectResultCodePasswordPolicyStrategy,
};
use crate::crypto::{self, generate_random_token};
use crate::errors::CasError;
use crate::observability::hash_for_correlation;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use tracing::{debug, instrument};

pub const DEFAULT_HANDLER_NAME: &str = "accept-users";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AccountStatus {
    #[default]
    Active,
    Locked,
    Disabled,
    Expired,
}

impl AccountStatus {
    fn result_code(self) -> AuthenticationResultCode {
        match self {
            AccountStatus::Active => AuthenticationResultCode::Success,
            AccountStatus::Locked => AuthenticationResultCode::AccountLocked,
            AccountStatus::Disabled => AuthenticationResultCode::AccountDisabled,
            AccountStatus::Expired => AuthenticationResultCode::AccountExpired,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AcceptedUser {
    password_hash: String,
    status: AccountStatus,
    password_expiration: Option<DateTime<Utc>>,
    attributes: Attributes,
}

impl AcceptedUser {
    pub fn new(password_hash: impl Into<String>) -> Self {
        Self {
            password_hash: password_hash.into(),
            status: AccountStatus::Active,
            password_expiration: None,
            attributes: Attributes::new(),
        }
    }

    pub fn with_status(mut self, status: AccountStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_password_expiration(mut self, expiration: DateTime<Utc>) -> Self {
        self.password_expiration = Some(expiration);
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, values: Vec<String>) -> Self {
        self.attributes.insert(name.into(), values);
        self
    }
}

pub struct AcceptUsersAuthenticationHandler {
    name: String,
    users: HashMap<String, AcceptedUser>,
    // Verified against when the user is unknown so both paths cost one bcrypt.
    dummy_hash: String,
    password_policy: RejectResultCodePasswordPolicyStrategy,
}

impl AcceptUsersAuthenticationHandler {
    /// Create an empty handler whose dummy hash uses `bcrypt_cost`.
    pub fn new(name: impl Into<String>, bcrypt_cost: u32) -> Result<Self, CasError> {
        let filler = generate_random_token(16)?;
        Ok(Self {
            name: name.into(),
            users: HashMap::new(),
            dummy_hash: crypto::hash_password(&filler, bcrypt_cost)?,
            password_policy: RejectResultCodePasswordPolicyStrategy::default(),
        })
    }

    /// Build a handler from plaintext `username -> password` pairs.
    pub fn from_plaintext<'a>(
        name: impl Into<String>,
        users: impl IntoIterator<Item = (&'a str, &'a SecretString)>,
        bcrypt_cost: u32,
    ) -> Result<Self, CasError> {
        let mut handler = Self::new(name, bcrypt_cost)?;
        for (username, password) in users {
            let hash = crypto::hash_password(password.expose_secret(), bcrypt_cost)?;
            handler = handler.with_user(username, AcceptedUser::new(hash));
        }
        Ok(handler)
    }

    pub fn with_user(mut self, username: impl Into<String>, user: AcceptedUser) -> Self {
        self.users.insert(username.into(), user);
        self
    }

    pub fn with_password_policy(mut self, policy: RejectResultCodePasswordPolicyStrategy) -> Self {
        self.password_policy = policy;
        self
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

#[async_trait::async_trait]
impl AuthenticationHandler for AcceptUsersAuthenticationHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, credential: &Credential) -> bool {
        matches!(credential, Credential::UsernamePassword { .. })
    }

    #[instrument(skip_all, fields(handler = %self.name))]
    async fn authenticate(&self, credential: &Credential) -> Result<HandlerResult, HandlerError> {
        let Credential::UsernamePassword {
            username, password, ..
        } = credential
        else {
            return Err(HandlerError::BadCredentials);
        };

        let user = self.users.get(username);
        let hash = user
            .map(|u| u.password_hash.clone())
            .unwrap_or_else(|| self.dummy_hash.clone());
        let password = password.clone();

        // bcrypt is CPU-bound; keep it off the async workers
        let verified = tokio::task::spawn_blocking(move || {
            crypto::verify_password(password.expose_secret(), &hash)
        })
        .await
        .map_err(|e| HandlerError::Unavailable(format!("password verification task failed: {e}")))?
        .map_err(|e| HandlerError::Unavailable(e.to_string()))?;

        let Some(user) = user else {
            debug!(
                target: "cas.authn.accept_users",
                user = %hash_for_correlation(username),
                "Unknown user"
            );
            return Err(HandlerError::BadCredentials);
        };
        if !verified {
            debug!(
                target: "cas.authn.accept_users",
                user = %hash_for_correlation(username),
                "Password mismatch"
            );
            return Err(HandlerError::BadCredentials);
        }

        // Account state is reported through the password policy
        let response = AuthenticationResponse {
            result: true,
            result_code: user.status.result_code(),
            password_expiration: user.password_expiration,
        };
        let warnings = self.password_policy.handle(Some(&response), Utc::now())?;

        let mut principal = Principal::new(username.clone());
        principal.attributes = user.attributes.clone();
        Ok(HandlerResult::new(&self.name, credential, principal).with_warnings(warnings))
    }
}
