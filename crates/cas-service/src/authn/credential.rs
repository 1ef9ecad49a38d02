//! Credentials presented for authentication.
//!
//! Secret material lives in `SecretString` so `Debug` output is redacted.
//! Only `CredentialMetaData` is ever stored on an `Authentication`.

use crate::observability::hash_for_correlation;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub enum Credential {
    UsernamePassword {
        username: String,
        password: SecretString,
        remember_me: bool,
    },
    /// Opaque bearer token (API keys, delegated tokens).
    Token { token: SecretString },
}

impl Credential {
    pub fn username_password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credential::UsernamePassword {
            username: username.into(),
            password: SecretString::from(password.into()),
            remember_me: false,
        }
    }

    pub fn token(token: impl Into<String>) -> Self {
        Credential::Token {
            token: SecretString::from(token.into()),
        }
    }

    /// Set the remember-me flag. No effect on token credentials.
    pub fn with_remember_me(mut self, remember: bool) -> Self {
        if let Credential::UsernamePassword { remember_me, .. } = &mut self {
            *remember_me = remember;
        }
        self
    }

    pub fn kind(&self) -> CredentialKind {
        match self {
            Credential::UsernamePassword { .. } => CredentialKind::UsernamePassword,
            Credential::Token { .. } => CredentialKind::Token,
        }
    }

    pub fn is_remember_me(&self) -> bool {
        matches!(
            self,
            Credential::UsernamePassword {
                remember_me: true,
                ..
            }
        )
    }

    /// Non-secret description of this credential.
    ///
    /// Tokens are identified by a correlation hash, never by their value.
    pub fn metadata(&self) -> CredentialMetaData {
        let id = match self {
            Credential::UsernamePassword { username, .. } => username.clone(),
            Credential::Token { token } => {
                format!("token:{}", hash_for_correlation(token.expose_secret()))
            }
        };
        CredentialMetaData {
            id,
            kind: self.kind(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialKind {
    UsernamePassword,
    Token,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CredentialMetaData {
    pub id: String,
    pub kind: CredentialKind,
}
