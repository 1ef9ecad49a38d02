//! CAS Service Library
//!
//! Core of a Central Authentication Service single sign-on broker: ticket
//! lifecycle, ticket registries, authentication transactions and the facade
//! protocol controllers call into.
//!
//! # Modules
//!
//! - `authn` - Credentials, handlers, policies and the transaction manager
//! - `config` - Service configuration
//! - `context` - Request-scoped caller context
//! - `crypto` - Randomness and password hashing
//! - `errors` - Error types
//! - `observability` - Log hashing, metrics, health endpoints
//! - `registry` - Ticket storage backends
//! - `services` - The CAS facade
//! - `tasks` - Background maintenance tasks
//! - `tickets` - Ticket model, expiration policies, id generation

pub mod authn;
pub mod config;
pub mod context;
pub mod crypto;
pub mod errors;
pub mod observability;
pub mod registry;
pub mod services;
pub mod tasks;
pub mod tickets;
