//! # CAS Test Utilities
//!
//! Shared test utilities for the CAS service.
//!
//! This crate provides:
//! - Fixed test ids (principals, services, tokens)
//! - Mock authentication handlers (static, failing, slow)
//! - A registry wrapper with read latency (`LaggingTicketRegistry`)
//! - A facade harness over an in-memory registry (`TestCas`)
//! - Custom assertions for validation outcomes
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cas_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let cas = TestCas::new();
//!     let tgt = cas.start_session(TEST_TOKEN_ALICE).await?;
//!     let st = cas.grant(&tgt, TEST_SERVICE_APP).await?;
//!
//!     cas.validate(&st, TEST_SERVICE_APP)
//!         .await?
//!         .assert_principal(TEST_PRINCIPAL_ALICE)
//!         .assert_from_new_login();
//!     Ok(())
//! }
//! ```

pub mod assertions;
pub mod cas_harness;
pub mod mock_handlers;
pub mod mock_registry;
pub mod test_ids;

// Re-export commonly used items
pub use assertions::*;
pub use cas_harness::*;
pub use mock_handlers::*;
pub use mock_registry::*;
pub use test_ids::*;
