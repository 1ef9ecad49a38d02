//! Timeout and metrics decorator for any registry backend.
//!
//! Every primitive is bounded by one configured timeout. A call that does not
//! finish in time surfaces `RegistryUnavailable` instead of hanging the
//! request.

use crate::errors::CasError;
use crate::observability::metrics::record_registry_operation;
use crate::registry::{TicketPage, TicketRegistry};
use crate::tickets::Ticket;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Default bound on a single registry call.
pub const DEFAULT_REGISTRY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct BoundedTicketRegistry {
    inner: Arc<dyn TicketRegistry>,
    timeout: Duration,
}

impl BoundedTicketRegistry {
    pub fn new(inner: Arc<dyn TicketRegistry>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, CasError>> + Send,
    ) -> Result<T, CasError> {
        let backend = self.inner.backend_name();
        let start = Instant::now();
        let outcome = match tokio::time::timeout(self.timeout, call).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    target: "cas.registry",
                    operation = operation,
                    backend = backend,
                    timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                    "Registry call timed out"
                );
                Err(CasError::RegistryUnavailable(format!(
                    "{backend} {operation} timed out after {}ms",
                    self.timeout.as_millis()
                )))
            }
        };

        let status = match &outcome {
            Ok(_) => "success",
            Err(CasError::RegistryUnavailable(_)) => "error",
            // Duplicate ids and missing tickets are answers, not backend faults
            Err(_) => "rejected",
        };
        record_registry_operation(operation, backend, status, start.elapsed());
        outcome
    }
}

#[async_trait::async_trait]
impl TicketRegistry for BoundedTicketRegistry {
    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }

    fn is_cleanable(&self) -> bool {
        self.inner.is_cleanable()
    }

    async fn add_ticket(&self, ticket: &Ticket) -> Result<(), CasError> {
        self.bounded("add", self.inner.add_ticket(ticket)).await
    }

    async fn fetch_ticket(&self, id: &str) -> Result<Option<Ticket>, CasError> {
        self.bounded("fetch", self.inner.fetch_ticket(id)).await
    }

    async fn update_ticket(&self, ticket: &Ticket) -> Result<(), CasError> {
        self.bounded("update", self.inner.update_ticket(ticket)).await
    }

    async fn take_ticket(&self, id: &str) -> Result<Option<Ticket>, CasError> {
        self.bounded("take", self.inner.take_ticket(id)).await
    }

    async fn update_ticket_if_uses(
        &self,
        ticket: &Ticket,
        expected_uses: u32,
    ) -> Result<bool, CasError> {
        self.bounded(
            "update_if_uses",
            self.inner.update_ticket_if_uses(ticket, expected_uses),
        )
        .await
    }

    async fn take_ticket_if_uses(
        &self,
        id: &str,
        expected_uses: u32,
    ) -> Result<Option<Ticket>, CasError> {
        self.bounded("take_if_uses", self.inner.take_ticket_if_uses(id, expected_uses))
            .await
    }

    async fn scan_tickets(
        &self,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<TicketPage, CasError> {
        self.bounded("scan", self.inner.scan_tickets(cursor, limit))
            .await
    }

    async fn count_tickets(&self) -> Result<usize, CasError> {
        self.bounded("count", self.inner.count_tickets()).await
    }
}
