//! Request-scoped context.
//!
//! Every facade operation receives the context of the inbound request that
//! triggered it. Nothing about the caller is kept in global or thread-local
//! state, so one request can never observe another request's client data.

use std::net::IpAddr;
use uuid::Uuid;

/// Per-request metadata handed down from the protocol layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub client_ip: Option<IpAddr>,
    pub user_agent: Option<String>,
}

impl RequestContext {
    /// Create a context with a fresh request id.
    pub fn new(client_ip: Option<IpAddr>, user_agent: Option<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            client_ip,
            user_agent,
        }
    }

    /// Context for work that does not originate from a client request
    /// (background tasks, startup).
    pub fn internal() -> Self {
        Self::new(None, None)
    }
}
