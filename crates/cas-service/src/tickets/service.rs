//! Target service identifiers and service matching.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A relying-party service a ticket is issued for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Service {
    id: String,
}

impl Service {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Check whether `requested` is acceptable for a ticket bound to `self`.
    pub fn matches(&self, requested: &Service, strategy: ServiceMatchStrategy) -> bool {
        match strategy {
            ServiceMatchStrategy::Exact => self.id == requested.id,
            ServiceMatchStrategy::IgnoreQueryAndFragment => {
                strip_query_and_fragment(&self.id) == strip_query_and_fragment(&requested.id)
            }
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// How a validating service is compared to the service a ticket was issued for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ServiceMatchStrategy {
    #[default]
    Exact,
    /// Compare the URL up to the first `?` or `#`.
    IgnoreQueryAndFragment,
}

fn strip_query_and_fragment(url: &str) -> &str {
    url.split(['?', '#']).next().unwrap_or(url)
}
