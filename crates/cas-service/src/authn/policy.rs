//! Authentication policies: when is a set of handler outcomes good enough.

use crate::authn::authentication::AuthenticationBuilder;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationPolicy {
    /// At least one credential authenticated. Without `try_all` the manager
    /// stops at the first success.
    Any { try_all: bool },
    /// Every presented credential authenticated by some handler.
    All,
    /// At least one success and no handler failed.
    AllHandlers,
    /// The named handler succeeded.
    RequiredHandler { handler_name: String, try_all: bool },
}

impl Default for AuthenticationPolicy {
    fn default() -> Self {
        AuthenticationPolicy::Any { try_all: false }
    }
}

impl AuthenticationPolicy {
    pub fn is_satisfied_by(&self, authentication: &AuthenticationBuilder) -> bool {
        let successes = authentication.successes();
        match self {
            AuthenticationPolicy::Any { .. } => !successes.is_empty(),
            AuthenticationPolicy::All => {
                !authentication.credentials().is_empty()
                    && authentication
                        .credentials()
                        .iter()
                        .all(|c| successes.values().any(|s| &s.credential == c))
            }
            AuthenticationPolicy::AllHandlers => {
                !successes.is_empty() && authentication.failures().is_empty()
            }
            AuthenticationPolicy::RequiredHandler { handler_name, .. } => {
                successes.contains_key(handler_name)
            }
        }
    }

    /// Whether the manager may stop evaluating once this policy is satisfied.
    pub fn short_circuits(&self) -> bool {
        match self {
            AuthenticationPolicy::Any { try_all } => !try_all,
            AuthenticationPolicy::RequiredHandler { try_all, .. } => !try_all,
            AuthenticationPolicy::All | AuthenticationPolicy::AllHandlers => false,
        }
    }
}

impl fmt::Display for AuthenticationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthenticationPolicy::Any { try_all: false } => f.write_str("any"),
            AuthenticationPolicy::Any { try_all: true } => f.write_str("any-try-all"),
            AuthenticationPolicy::All => f.write_str("all"),
            AuthenticationPolicy::AllHandlers => f.write_str("all-handlers"),
            AuthenticationPolicy::RequiredHandler { handler_name, .. } => {
                write!(f, "required:{handler_name}")
            }
        }
    }
}

impl FromStr for AuthenticationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "any" => Ok(AuthenticationPolicy::Any { try_all: false }),
            "any-try-all" => Ok(AuthenticationPolicy::Any { try_all: true }),
            "all" => Ok(AuthenticationPolicy::All),
            "all-handlers" => Ok(AuthenticationPolicy::AllHandlers),
            other => match other.strip_prefix("required:") {
                Some(name) if !name.trim().is_empty() => {
                    Ok(AuthenticationPolicy::RequiredHandler {
                        handler_name: name.trim().to_string(),
                        try_all: false,
                    })
                }
                _ => Err(format!(
                    "unknown authentication policy '{other}' (expected any, any-try-all, all, all-handlers or required:<handler>)"
                )),
            },
        }
    }
}
