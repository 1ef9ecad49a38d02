//! In-process ticket registry.
//!
//! Suitable for single-node deployments and tests. Tickets are stored in a
//! `BTreeMap` so scans page in stable id order.

use crate::errors::CasError;
use crate::registry::{TicketPage, TicketRegistry};
use crate::tickets::Ticket;
use std::collections::BTreeMap;
use std::ops::Bound;
use tokio::sync::RwLock;
use tracing::instrument;

#[derive(Debug, Default)]
pub struct MemoryTicketRegistry {
    tickets: RwLock<BTreeMap<String, Ticket>>,
}

impl MemoryTicketRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl TicketRegistry for MemoryTicketRegistry {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    #[instrument(skip_all)]
    async fn add_ticket(&self, ticket: &Ticket) -> Result<(), CasError> {
        let mut tickets = self.tickets.write().await;
        if tickets.contains_key(ticket.id()) {
            return Err(CasError::DuplicateTicketId(ticket.id().to_string()));
        }
        tickets.insert(ticket.id().to_string(), ticket.clone());
        Ok(())
    }

    async fn fetch_ticket(&self, id: &str) -> Result<Option<Ticket>, CasError> {
        Ok(self.tickets.read().await.get(id).cloned())
    }

    #[instrument(skip_all)]
    async fn update_ticket(&self, ticket: &Ticket) -> Result<(), CasError> {
        let mut tickets = self.tickets.write().await;
        match tickets.get_mut(ticket.id()) {
            Some(stored) => {
                *stored = ticket.clone();
                Ok(())
            }
            None => Err(CasError::TicketNotFound),
        }
    }

    async fn take_ticket(&self, id: &str) -> Result<Option<Ticket>, CasError> {
        Ok(self.tickets.write().await.remove(id))
    }

    async fn update_ticket_if_uses(
        &self,
        ticket: &Ticket,
        expected_uses: u32,
    ) -> Result<bool, CasError> {
        let mut tickets = self.tickets.write().await;
        match tickets.get_mut(ticket.id()) {
            Some(stored) if stored.usage().count_of_uses == expected_uses => {
                *stored = ticket.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn take_ticket_if_uses(
        &self,
        id: &str,
        expected_uses: u32,
    ) -> Result<Option<Ticket>, CasError> {
        let mut tickets = self.tickets.write().await;
        if tickets
            .get(id)
            .is_some_and(|stored| stored.usage().count_of_uses == expected_uses)
        {
            return Ok(tickets.remove(id));
        }
        Ok(None)
    }

    async fn scan_tickets(
        &self,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<TicketPage, CasError> {
        let tickets = self.tickets.read().await;
        let lower = match cursor {
            Some(after) => Bound::Excluded(after),
            None => Bound::Unbounded,
        };
        let page: Vec<Ticket> = tickets
            .range::<str, _>((lower, Bound::Unbounded))
            .take(limit)
            .map(|(_, t)| t.clone())
            .collect();

        let next_cursor = if page.len() == limit {
            page.last().map(|t| t.id().to_string())
        } else {
            None
        };
        Ok(TicketPage {
            tickets: page,
            next_cursor,
        })
    }

    async fn count_tickets(&self) -> Result<usize, CasError> {
        Ok(self.tickets.read().await.len())
    }
}
