//! Password-policy handling applied after a handler verifies a password.
//!
//! A strategy first decides whether the backend response is something it
//! should act on. Three outcomes are kept apart:
//! - `Supported`: the response is applied (warnings, expiry)
//! - `NotApplicable`: no response, or the backend did not authenticate
//! - `Rejected(code)`: the response carries a result code the strategy was
//!   configured to refuse
//!
//! A rejected code fails authentication with the error matching the code. A
//! response that never applied yields no warnings and no error.

use crate::authn::handler::HandlerError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

/// Default number of days before expiry at which users are warned.
pub const DEFAULT_WARNING_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthenticationResultCode {
    Success,
    InvalidCredential,
    AccountLocked,
    AccountDisabled,
    AccountExpired,
    PasswordExpired,
}

/// What a password backend reported for one authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationResponse {
    pub result: bool,
    pub result_code: AuthenticationResultCode,
    pub password_expiration: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordPolicySupport {
    Supported,
    NotApplicable,
    Rejected(AuthenticationResultCode),
}

#[derive(Debug, Clone)]
pub struct RejectResultCodePasswordPolicyStrategy {
    rejected_codes: HashSet<AuthenticationResultCode>,
    warning_period: Duration,
}

impl Default for RejectResultCodePasswordPolicyStrategy {
    fn default() -> Self {
        Self {
            rejected_codes: HashSet::from([AuthenticationResultCode::InvalidCredential]),
            warning_period: Duration::days(DEFAULT_WARNING_DAYS),
        }
    }
}

impl RejectResultCodePasswordPolicyStrategy {
    pub fn new(
        rejected_codes: impl IntoIterator<Item = AuthenticationResultCode>,
        warning_days: i64,
    ) -> Self {
        Self {
            rejected_codes: rejected_codes.into_iter().collect(),
            warning_period: Duration::days(warning_days.max(0)),
        }
    }

    pub fn evaluate(&self, response: Option<&AuthenticationResponse>) -> PasswordPolicySupport {
        match response {
            None => PasswordPolicySupport::NotApplicable,
            Some(r) if !r.result => PasswordPolicySupport::NotApplicable,
            Some(r) if self.rejected_codes.contains(&r.result_code) => {
                PasswordPolicySupport::Rejected(r.result_code)
            }
            Some(_) => PasswordPolicySupport::Supported,
        }
    }

    /// Apply the policy, returning warnings for the user.
    ///
    /// # Errors
    ///
    /// Rejected and account-state result codes, and a password past its
    /// expiration date, fail with the matching `HandlerError`.
    pub fn handle(
        &self,
        response: Option<&AuthenticationResponse>,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, HandlerError> {
        let response = match (self.evaluate(response), response) {
            (PasswordPolicySupport::Supported, Some(response)) => response,
            (PasswordPolicySupport::Rejected(code), _) => {
                info!(
                    target: "cas.authn.password_policy",
                    result_code = ?code,
                    "Result code rejected by password policy"
                );
                return Err(rejection_error(code));
            }
            _ => {
                debug!(
                    target: "cas.authn.password_policy",
                    "Password policy not applicable to response"
                );
                return Ok(Vec::new());
            }
        };

        if response.result_code != AuthenticationResultCode::Success {
            return Err(rejection_error(response.result_code));
        }

        let Some(expiration) = response.password_expiration else {
            return Ok(Vec::new());
        };
        if expiration <= now {
            return Err(HandlerError::AccountExpired);
        }

        let remaining = expiration - now;
        if remaining <= self.warning_period {
            let days = remaining.num_days();
            return Ok(vec![format!("Password expires in {days} day(s)")]);
        }
        Ok(Vec::new())
    }
}

/// The handler error a refused result code surfaces as.
fn rejection_error(code: AuthenticationResultCode) -> HandlerError {
    match code {
        AuthenticationResultCode::AccountLocked => HandlerError::AccountLocked,
        AuthenticationResultCode::AccountDisabled => HandlerError::AccountDisabled,
        AuthenticationResultCode::AccountExpired | AuthenticationResultCode::PasswordExpired => {
            HandlerError::AccountExpired
        }
        AuthenticationResultCode::InvalidCredential | AuthenticationResultCode::Success => {
            HandlerError::BadCredentials
        }
    }
}
