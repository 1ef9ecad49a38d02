//! Ticket registry cleaner background task.
//!
//! Periodically sweeps the registry and removes:
//! 1. Tickets whose expiration policy reports them expired (granting tickets
//!    cascade to their descendants)
//! 2. Orphans: service, proxy and proxy-granting tickets whose parent
//!    granting ticket is gone
//!
//! Cleaning is eventual. Lookups apply lazy expiration and parent checks on
//! their own, so nothing depends on this task having run.
//!
//! # Graceful Shutdown
//!
//! The scan checks the cancellation token between batches and stops at the
//! next batch boundary once it is cancelled.

use crate::errors::CasError;
use crate::observability::hash_for_correlation;
use crate::observability::metrics::record_cleaner_run;
use crate::registry::{TicketRegistry, DEFAULT_SCAN_BATCH_SIZE};
use crate::tickets::{Ticket, TicketKind};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default delay before the first sweep.
pub const DEFAULT_START_DELAY_SECONDS: u64 = 20;

/// Default interval between sweeps.
pub const DEFAULT_REPEAT_INTERVAL_SECONDS: u64 = 120;

/// Configuration for the registry cleaner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketRegistryCleanerConfig {
    pub enabled: bool,
    /// Seconds to wait after startup before the first sweep.
    pub start_delay_seconds: u64,
    /// Seconds between sweeps.
    pub repeat_interval_seconds: u64,
    /// Tickets per scan page.
    pub batch_size: usize,
}

impl Default for TicketRegistryCleanerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            start_delay_seconds: DEFAULT_START_DELAY_SECONDS,
            repeat_interval_seconds: DEFAULT_REPEAT_INTERVAL_SECONDS,
            batch_size: DEFAULT_SCAN_BATCH_SIZE,
        }
    }
}

/// Start the registry cleaner background task.
///
/// Returns immediately if the cleaner is disabled or the backend evicts
/// expired tickets itself. Otherwise waits `start_delay_seconds`, then sweeps
/// every `repeat_interval_seconds` until `cancel_token` is cancelled.
#[instrument(skip_all, name = "cas.task.registry_cleaner")]
pub async fn start_ticket_registry_cleaner(
    registry: Arc<dyn TicketRegistry>,
    config: TicketRegistryCleanerConfig,
    cancel_token: CancellationToken,
) {
    if !config.enabled {
        info!(target: "cas.task.registry_cleaner", "Registry cleaner disabled");
        return;
    }
    if !registry.is_cleanable() {
        info!(
            target: "cas.task.registry_cleaner",
            backend = registry.backend_name(),
            "Registry backend expires tickets natively, cleaner not started"
        );
        return;
    }

    info!(
        target: "cas.task.registry_cleaner",
        backend = registry.backend_name(),
        start_delay_seconds = config.start_delay_seconds,
        repeat_interval_seconds = config.repeat_interval_seconds,
        batch_size = config.batch_size,
        "Starting registry cleaner task"
    );

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(config.start_delay_seconds)) => {}
        _ = cancel_token.cancelled() => {
            info!(
                target: "cas.task.registry_cleaner",
                "Registry cleaner cancelled before first run"
            );
            return;
        }
    }

    let mut interval =
        tokio::time::interval(Duration::from_secs(config.repeat_interval_seconds.max(1)));

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = run_cleanup(registry.as_ref(), config.batch_size, &cancel_token).await {
                    error!(
                        target: "cas.task.registry_cleaner",
                        error = %e,
                        "Registry cleanup run failed"
                    );
                }
            }
            _ = cancel_token.cancelled() => {
                info!(
                    target: "cas.task.registry_cleaner",
                    "Registry cleaner received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(target: "cas.task.registry_cleaner", "Registry cleaner task stopped");
}

/// Run a single sweep. Returns the number of tickets removed.
///
/// A no-op for backends that are not cleanable. Tickets that disappear
/// mid-scan are skipped.
pub async fn run_cleanup(
    registry: &dyn TicketRegistry,
    batch_size: usize,
    cancel_token: &CancellationToken,
) -> Result<usize, CasError> {
    if !registry.is_cleanable() {
        return Ok(0);
    }

    let start = Instant::now();
    let outcome = sweep(registry, batch_size, cancel_token).await;

    match &outcome {
        Ok(removed) => {
            record_cleaner_run("success", *removed, start.elapsed());
            if *removed > 0 {
                info!(
                    target: "cas.task.registry_cleaner",
                    removed = removed,
                    duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "Removed expired and orphaned tickets"
                );
            }
        }
        Err(_) => record_cleaner_run("error", 0, start.elapsed()),
    }
    outcome
}

async fn sweep(
    registry: &dyn TicketRegistry,
    batch_size: usize,
    cancel_token: &CancellationToken,
) -> Result<usize, CasError> {
    let now = Utc::now();
    let mut removed = 0usize;
    let mut live_parents: HashSet<String> = HashSet::new();
    let mut scan = registry.get_tickets(|_| true, batch_size);

    while let Some(batch) = scan.next_batch().await? {
        for ticket in batch {
            if is_removable(registry, &ticket, now, &mut live_parents).await? {
                removed += remove(registry, &ticket).await?;
            }
        }
        if cancel_token.is_cancelled() {
            warn!(
                target: "cas.task.registry_cleaner",
                removed = removed,
                "Cleanup interrupted by shutdown"
            );
            break;
        }
    }
    Ok(removed)
}

async fn is_removable(
    registry: &dyn TicketRegistry,
    ticket: &Ticket,
    now: DateTime<Utc>,
    live_parents: &mut HashSet<String>,
) -> Result<bool, CasError> {
    if ticket.is_expired_at(now) {
        return Ok(true);
    }
    let Some(parent_id) = ticket.parent_id() else {
        return Ok(false);
    };
    if live_parents.contains(parent_id) {
        return Ok(false);
    }

    let parent_alive = match registry.fetch_ticket(parent_id).await? {
        Some(parent) => {
            matches!(
                parent.kind(),
                TicketKind::TicketGranting | TicketKind::ProxyGranting
            ) && !parent.is_expired_at(now)
        }
        None => false,
    };
    if parent_alive {
        live_parents.insert(parent_id.to_string());
        return Ok(false);
    }

    debug!(
        target: "cas.task.registry_cleaner",
        ticket = %hash_for_correlation(ticket.id()),
        kind = %ticket.kind().as_str(),
        "Orphaned ticket"
    );
    Ok(true)
}

async fn remove(registry: &dyn TicketRegistry, ticket: &Ticket) -> Result<usize, CasError> {
    if ticket.kind().is_granting() {
        registry.delete_ticket(ticket.id()).await
    } else {
        Ok(usize::from(registry.take_ticket(ticket.id()).await?.is_some()))
    }
}
