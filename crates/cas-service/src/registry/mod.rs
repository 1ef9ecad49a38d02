//! Ticket registry: storage of tickets keyed by id.
//!
//! Backends implement a handful of primitives. Everything with semantics
//! (lazy expiration, kind checks, cascade delete, filtered scans) is built
//! on top of those primitives here, so all backends behave the same.
//!
//! # Concurrency
//!
//! Backends must be safe for concurrent use from many request tasks and the
//! cleaner at once. `take_ticket` must be a single atomic get-and-delete in
//! the backend itself; it is what makes single-use consumption race-free
//! across server instances sharing one backend. Multi-use tickets rely on
//! `update_ticket_if_uses` / `take_ticket_if_uses` in the same way: a use is
//! only recorded against the use count it was checked against.

pub mod bounded;
pub mod memory;
pub mod postgres;
pub mod redis;

pub use bounded::BoundedTicketRegistry;
pub use memory::MemoryTicketRegistry;
pub use postgres::PostgresTicketRegistry;
pub use redis::RedisTicketRegistry;

use crate::errors::CasError;
use crate::observability::hash_for_correlation;
use crate::tickets::{Ticket, TicketKind};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// Default page size for scans.
pub const DEFAULT_SCAN_BATCH_SIZE: usize = 500;

/// One page of a registry scan.
#[derive(Debug, Clone, Default)]
pub struct TicketPage {
    pub tickets: Vec<Ticket>,
    /// Opaque continuation token; `None` once the scan is complete.
    pub next_cursor: Option<String>,
}

/// Result of resolving an id with lazy expiration applied.
#[derive(Debug, Clone)]
pub enum TicketLookup {
    Active(Ticket),
    /// Stored but expired. The record has been removed (best effort).
    Expired,
    Missing,
}

#[async_trait::async_trait]
pub trait TicketRegistry: Send + Sync {
    /// Short backend name for logs and metric labels.
    fn backend_name(&self) -> &'static str;

    /// Store a new ticket.
    ///
    /// # Errors
    ///
    /// `DuplicateTicketId` if the id is already stored.
    async fn add_ticket(&self, ticket: &Ticket) -> Result<(), CasError>;

    /// Raw read, with no expiration or kind checks.
    async fn fetch_ticket(&self, id: &str) -> Result<Option<Ticket>, CasError>;

    /// Persist mutated state of an existing ticket.
    ///
    /// # Errors
    ///
    /// `TicketNotFound` if the ticket is no longer stored. An update never
    /// resurrects a deleted ticket.
    async fn update_ticket(&self, ticket: &Ticket) -> Result<(), CasError>;

    /// Atomically read and remove a single ticket.
    async fn take_ticket(&self, id: &str) -> Result<Option<Ticket>, CasError>;

    /// Replace a stored ticket only if its stored use count still equals
    /// `expected_uses`.
    ///
    /// Returns `false` if another writer recorded a use first or the ticket
    /// is gone. The compare and the write happen as one atomic step in the
    /// backend.
    async fn update_ticket_if_uses(
        &self,
        ticket: &Ticket,
        expected_uses: u32,
    ) -> Result<bool, CasError>;

    /// Remove and return a ticket only if its stored use count still equals
    /// `expected_uses`. `None` if the count moved on or the ticket is gone.
    async fn take_ticket_if_uses(
        &self,
        id: &str,
        expected_uses: u32,
    ) -> Result<Option<Ticket>, CasError>;

    /// Read one page of tickets in backend order.
    async fn scan_tickets(&self, cursor: Option<&str>, limit: usize)
        -> Result<TicketPage, CasError>;

    /// Number of stored tickets. May be approximate for distributed backends.
    async fn count_tickets(&self) -> Result<usize, CasError>;

    /// Whether the background cleaner should sweep this backend.
    ///
    /// Backends with native expiry return false.
    fn is_cleanable(&self) -> bool {
        true
    }

    /// Resolve an id, applying lazy expiration and a kind filter.
    ///
    /// An expired ticket is deleted (best effort) and reported as
    /// `Expired`. A ticket of a kind not in `expected` is reported as
    /// `Missing`. An empty `expected` accepts any kind.
    async fn lookup_ticket(
        &self,
        id: &str,
        expected: &[TicketKind],
        now: DateTime<Utc>,
    ) -> Result<TicketLookup, CasError> {
        let Some(ticket) = self.fetch_ticket(id).await? else {
            return Ok(TicketLookup::Missing);
        };

        if !expected.is_empty() && !expected.contains(&ticket.kind()) {
            debug!(
                target: "cas.registry",
                ticket = %hash_for_correlation(id),
                kind = %ticket.kind().as_str(),
                "Ticket is not of the expected kind"
            );
            return Ok(TicketLookup::Missing);
        }

        if ticket.is_expired_at(now) {
            debug!(
                target: "cas.registry",
                ticket = %hash_for_correlation(id),
                kind = %ticket.kind().as_str(),
                "Ticket expired, removing"
            );
            if let Err(e) = self.take_ticket(id).await {
                warn!(
                    target: "cas.registry",
                    ticket = %hash_for_correlation(id),
                    error = %e,
                    "Failed to remove expired ticket"
                );
            }
            return Ok(TicketLookup::Expired);
        }

        Ok(TicketLookup::Active(ticket))
    }

    /// Fetch a live ticket of one of the expected kinds.
    ///
    /// # Errors
    ///
    /// `TicketNotFound` for missing, expired and wrong-kind tickets alike.
    async fn get_ticket(&self, id: &str, expected: &[TicketKind]) -> Result<Ticket, CasError> {
        match self.lookup_ticket(id, expected, Utc::now()).await? {
            TicketLookup::Active(ticket) => Ok(ticket),
            TicketLookup::Expired | TicketLookup::Missing => Err(CasError::TicketNotFound),
        }
    }

    /// Delete a ticket and, transitively, everything it issued.
    ///
    /// Returns the number of tickets removed. Descendants that are already
    /// gone are skipped. The cascade is not atomic; a failure part-way leaves
    /// orphans that fail their parent check on next use.
    async fn delete_ticket(&self, id: &str) -> Result<usize, CasError> {
        let mut pending = vec![id.to_string()];
        let mut removed = 0usize;

        while let Some(next) = pending.pop() {
            if let Some(ticket) = self.take_ticket(&next).await? {
                removed += 1;
                pending.extend(ticket.descendant_ids());
            }
        }

        debug!(
            target: "cas.registry",
            ticket = %hash_for_correlation(id),
            removed = removed,
            "Deleted ticket"
        );
        Ok(removed)
    }
}

type TicketPredicate<'a> = Box<dyn Fn(&Ticket) -> bool + Send + Sync + 'a>;

/// Lazy, restartable, paged scan over a registry.
///
/// Only one page is held in memory at a time.
pub struct TicketScan<'a> {
    registry: &'a dyn TicketRegistry,
    predicate: TicketPredicate<'a>,
    batch_size: usize,
    cursor: Option<String>,
    exhausted: bool,
}

impl<'a> TicketScan<'a> {
    pub fn new(
        registry: &'a dyn TicketRegistry,
        predicate: impl Fn(&Ticket) -> bool + Send + Sync + 'a,
        batch_size: usize,
    ) -> Self {
        Self {
            registry,
            predicate: Box::new(predicate),
            batch_size: batch_size.max(1),
            cursor: None,
            exhausted: false,
        }
    }

    /// Next page of matching tickets, or `None` when the scan is complete.
    ///
    /// A page may be empty when nothing in it matched.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<Ticket>>, CasError> {
        if self.exhausted {
            return Ok(None);
        }
        let page = self
            .registry
            .scan_tickets(self.cursor.as_deref(), self.batch_size)
            .await?;
        self.cursor = page.next_cursor;
        self.exhausted = self.cursor.is_none();
        Ok(Some(
            page.tickets
                .into_iter()
                .filter(|t| (self.predicate)(t))
                .collect(),
        ))
    }

    /// Start again from the beginning.
    pub fn restart(&mut self) {
        self.cursor = None;
        self.exhausted = false;
    }

    /// Drain the scan, counting matches.
    pub async fn count(&mut self) -> Result<usize, CasError> {
        let mut total = 0usize;
        while let Some(batch) = self.next_batch().await? {
            total += batch.len();
        }
        Ok(total)
    }
}

impl<'r> dyn TicketRegistry + 'r {
    /// Scan for tickets matching `predicate`, `batch_size` per page.
    pub fn get_tickets<'a>(
        &'a self,
        predicate: impl Fn(&Ticket) -> bool + Send + Sync + 'a,
        batch_size: usize,
    ) -> TicketScan<'a> {
        TicketScan::new(self, predicate, batch_size)
    }
}
