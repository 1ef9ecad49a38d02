//! Registry wrappers for exercising timing-sensitive paths.

use cas_service::errors::CasError;
use cas_service::registry::{MemoryTicketRegistry, TicketPage, TicketRegistry};
use cas_service::tickets::Ticket;
use std::time::Duration;

/// In-memory registry whose reads return only after `lag`, the way a
/// network backend would. Writes are immediate.
pub struct LaggingTicketRegistry {
    inner: MemoryTicketRegistry,
    lag: Duration,
}

impl LaggingTicketRegistry {
    pub fn new(lag: Duration) -> Self {
        Self {
            inner: MemoryTicketRegistry::new(),
            lag,
        }
    }
}

#[async_trait::async_trait]
impl TicketRegistry for LaggingTicketRegistry {
    fn backend_name(&self) -> &'static str {
        "lagging-memory"
    }

    async fn add_ticket(&self, ticket: &Ticket) -> Result<(), CasError> {
        self.inner.add_ticket(ticket).await
    }

    async fn fetch_ticket(&self, id: &str) -> Result<Option<Ticket>, CasError> {
        let ticket = self.inner.fetch_ticket(id).await?;
        tokio::time::sleep(self.lag).await;
        Ok(ticket)
    }

    async fn update_ticket(&self, ticket: &Ticket) -> Result<(), CasError> {
        self.inner.update_ticket(ticket).await
    }

    async fn take_ticket(&self, id: &str) -> Result<Option<Ticket>, CasError> {
        self.inner.take_ticket(id).await
    }

    async fn update_ticket_if_uses(
        &self,
        ticket: &Ticket,
        expected_uses: u32,
    ) -> Result<bool, CasError> {
        self.inner.update_ticket_if_uses(ticket, expected_uses).await
    }

    async fn take_ticket_if_uses(
        &self,
        id: &str,
        expected_uses: u32,
    ) -> Result<Option<Ticket>, CasError> {
        self.inner.take_ticket_if_uses(id, expected_uses).await
    }

    async fn scan_tickets(
        &self,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<TicketPage, CasError> {
        self.inner.scan_tickets(cursor, limit).await
    }

    async fn count_tickets(&self) -> Result<usize, CasError> {
        self.inner.count_tickets().await
    }
}
