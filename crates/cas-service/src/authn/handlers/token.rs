//! Pre-shared token handler.
//!
//! Tokens are stored as SHA-256 hex digests mapped to the principal they
//! authenticate. Comparison uses `ring::constant_time`.

use crate::authn::authentication::Principal;
use crate::authn::credential::Credential;
use crate::authn::handler::{AuthenticationHandler, HandlerError, HandlerResult};
use ring::constant_time::verify_slices_are_equal;
use secrecy::ExposeSecret;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

pub const DEFAULT_HANDLER_NAME: &str = "token";

pub struct TokenAuthenticationHandler {
    name: String,
    // (sha256 digest, principal id)
    tokens: Vec<([u8; 32], String)>,
}

impl TokenAuthenticationHandler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tokens: Vec::new(),
        }
    }

    pub fn with_token(mut self, token: &str, principal_id: impl Into<String>) -> Self {
        self.tokens.push((digest(token), principal_id.into()));
        self
    }

    /// Register a token by its hex-encoded SHA-256 digest.
    pub fn with_token_digest(
        mut self,
        hex_digest: &str,
        principal_id: impl Into<String>,
    ) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(hex_digest, &mut bytes)?;
        self.tokens.push((bytes, principal_id.into()));
        Ok(self)
    }
}

fn digest(token: &str) -> [u8; 32] {
    Sha256::digest(token.as_bytes()).into()
}

#[async_trait::async_trait]
impl AuthenticationHandler for TokenAuthenticationHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, credential: &Credential) -> bool {
        matches!(credential, Credential::Token { .. })
    }

    #[instrument(skip_all, fields(handler = %self.name))]
    async fn authenticate(&self, credential: &Credential) -> Result<HandlerResult, HandlerError> {
        let Credential::Token { token } = credential else {
            return Err(HandlerError::BadCredentials);
        };
        let presented = digest(token.expose_secret());

        // Scan every entry so the match position does not affect timing
        let mut matched: Option<&str> = None;
        for (stored, principal_id) in &self.tokens {
            if verify_slices_are_equal(stored, &presented).is_ok() && matched.is_none() {
                matched = Some(principal_id);
            }
        }

        match matched {
            Some(principal_id) => Ok(HandlerResult::new(
                &self.name,
                credential,
                Principal::new(principal_id),
            )),
            None => {
                debug!(target: "cas.authn.token", "Unknown token presented");
                Err(HandlerError::BadCredentials)
            }
        }
    }
}
