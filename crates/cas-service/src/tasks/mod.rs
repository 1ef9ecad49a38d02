//! Background tasks.
//!
//! - `registry_cleaner` - removes expired and orphaned tickets from cleanable
//!   registry backends

pub mod registry_cleaner;

pub use registry_cleaner::{
    run_cleanup, start_ticket_registry_cleaner, TicketRegistryCleanerConfig,
};
