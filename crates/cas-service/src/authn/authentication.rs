//! Principals and the immutable `Authentication` produced by the manager.

use crate::authn::credential::CredentialMetaData;
use crate::authn::handler::{HandlerError, HandlerResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Attribute names the core itself sets on an `Authentication`.
pub mod attributes {
    /// `"true"` when the user asked for a long-term session.
    pub const REMEMBER_ME: &str = "remember_me";
    /// Names of the handlers that succeeded.
    pub const SUCCESSFUL_HANDLERS: &str = "successful_handlers";
}

/// Principal id used before any handler has resolved one.
pub const NULL_PRINCIPAL_ID: &str = "nobody";

pub type Attributes = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    #[serde(default)]
    pub attributes: Attributes,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: Attributes::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, values: Vec<String>) -> Self {
        self.attributes.insert(name.into(), values);
        self
    }
}

/// A validated identity.
///
/// Read-only once built; shared (`Arc`) by every ticket in a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authentication {
    principal: Principal,
    authentication_date: DateTime<Utc>,
    attributes: Attributes,
    credentials: Vec<CredentialMetaData>,
    successes: BTreeMap<String, HandlerResult>,
    failures: BTreeMap<String, HandlerError>,
}

impl Authentication {
    pub fn builder(principal: Principal) -> AuthenticationBuilder {
        AuthenticationBuilder::new(principal)
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn authentication_date(&self) -> DateTime<Utc> {
        self.authentication_date
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn credentials(&self) -> &[CredentialMetaData] {
        &self.credentials
    }

    pub fn successes(&self) -> &BTreeMap<String, HandlerResult> {
        &self.successes
    }

    pub fn failures(&self) -> &BTreeMap<String, HandlerError> {
        &self.failures
    }

    pub fn is_remember_me(&self) -> bool {
        self.attributes
            .get(attributes::REMEMBER_ME)
            .is_some_and(|values| values.iter().any(|v| v == "true"))
    }

    /// Start a builder pre-populated with this authentication.
    pub fn to_builder(&self) -> AuthenticationBuilder {
        AuthenticationBuilder {
            principal: self.principal.clone(),
            authentication_date: self.authentication_date,
            attributes: self.attributes.clone(),
            credentials: self.credentials.clone(),
            successes: self.successes.clone(),
            failures: self.failures.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthenticationBuilder {
    principal: Principal,
    authentication_date: DateTime<Utc>,
    attributes: Attributes,
    credentials: Vec<CredentialMetaData>,
    successes: BTreeMap<String, HandlerResult>,
    failures: BTreeMap<String, HandlerError>,
}

impl Default for AuthenticationBuilder {
    fn default() -> Self {
        Self::new(Principal::new(NULL_PRINCIPAL_ID))
    }
}

impl AuthenticationBuilder {
    pub fn new(principal: Principal) -> Self {
        Self {
            principal,
            authentication_date: Utc::now(),
            attributes: Attributes::new(),
            credentials: Vec::new(),
            successes: BTreeMap::new(),
            failures: BTreeMap::new(),
        }
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn set_principal(&mut self, principal: Principal) -> &mut Self {
        self.principal = principal;
        self
    }

    pub fn set_authentication_date(&mut self, date: DateTime<Utc>) -> &mut Self {
        self.authentication_date = date;
        self
    }

    /// Append values to an attribute, skipping duplicates.
    pub fn add_attribute(&mut self, name: impl Into<String>, values: Vec<String>) -> &mut Self {
        let entry = self.attributes.entry(name.into()).or_default();
        for value in values {
            if !entry.contains(&value) {
                entry.push(value);
            }
        }
        self
    }

    pub fn add_credential(&mut self, credential: CredentialMetaData) -> &mut Self {
        self.credentials.push(credential);
        self
    }

    pub fn add_success(&mut self, handler_name: impl Into<String>, result: HandlerResult) -> &mut Self {
        self.successes.insert(handler_name.into(), result);
        self
    }

    pub fn add_failure(&mut self, handler_name: impl Into<String>, error: HandlerError) -> &mut Self {
        self.failures.insert(handler_name.into(), error);
        self
    }

    pub fn successes(&self) -> &BTreeMap<String, HandlerResult> {
        &self.successes
    }

    pub fn failures(&self) -> &BTreeMap<String, HandlerError> {
        &self.failures
    }

    pub fn credentials(&self) -> &[CredentialMetaData] {
        &self.credentials
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn build(&self) -> Authentication {
        Authentication {
            principal: self.principal.clone(),
            authentication_date: self.authentication_date,
            attributes: self.attributes.clone(),
            credentials: self.credentials.clone(),
            successes: self.successes.clone(),
            failures: self.failures.clone(),
        }
    }
}
