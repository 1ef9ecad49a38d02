//! Ticket id generation.
//!
//! Ids have the shape `PREFIX-<counter>-<random>[-<suffix>]`. The counter is
//! process-local and monotonic, the random part is hex-encoded CSPRNG output,
//! and the suffix names the issuing host so ids from different nodes sharing
//! one backend never collide on counter alone.

use crate::crypto::generate_random_bytes;
use crate::errors::CasError;
use crate::tickets::TicketKind;
use std::sync::atomic::{AtomicU64, Ordering};

/// Minimum bytes of entropy in the random part.
pub const MIN_RANDOM_BYTES: usize = 16;

/// Default bytes of entropy in the random part.
pub const DEFAULT_RANDOM_BYTES: usize = 24;

pub trait TicketIdGenerator: Send + Sync {
    fn new_ticket_id(&self, kind: TicketKind) -> Result<String, CasError>;
}

#[derive(Debug)]
pub struct HostNameBasedTicketIdGenerator {
    counter: AtomicU64,
    random_bytes: usize,
    suffix: Option<String>,
}

impl HostNameBasedTicketIdGenerator {
    /// Create a generator with the default entropy.
    ///
    /// Characters other than ASCII alphanumerics, `.` and `_` are stripped
    /// from the host name; an empty result disables the suffix.
    pub fn new(host_name: &str) -> Self {
        Self::with_random_bytes(host_name, DEFAULT_RANDOM_BYTES)
    }

    pub fn with_random_bytes(host_name: &str, random_bytes: usize) -> Self {
        let sanitized: String = host_name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '.' || *c == '_')
            .collect();
        Self {
            counter: AtomicU64::new(1),
            random_bytes: random_bytes.max(MIN_RANDOM_BYTES),
            suffix: (!sanitized.is_empty()).then_some(sanitized),
        }
    }
}

impl TicketIdGenerator for HostNameBasedTicketIdGenerator {
    fn new_ticket_id(&self, kind: TicketKind) -> Result<String, CasError> {
        let count = self.counter.fetch_add(1, Ordering::Relaxed);
        let random = hex::encode(generate_random_bytes(self.random_bytes)?);
        Ok(match &self.suffix {
            Some(suffix) => format!("{}-{}-{}-{}", kind.prefix(), count, random, suffix),
            None => format!("{}-{}-{}", kind.prefix(), count, random),
        })
    }
}
