//! Registry cleaner tests against tickets issued through the facade.
//!
//! ## Test Naming
//!
//! Tests follow the convention: `test_<feature>_<scenario>_<expected_result>`

use cas_service::registry::{BoundedTicketRegistry, MemoryTicketRegistry, TicketRegistry};
use cas_service::tasks::{run_cleanup, start_ticket_registry_cleaner, TicketRegistryCleanerConfig};
use cas_service::tickets::ExpirationPolicy;
use cas_test_utils::*;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn hard(seconds: u64) -> ExpirationPolicy {
    ExpirationPolicy::HardTimeout {
        time_to_kill: Duration::from_secs(seconds),
    }
}

/// Expired sessions are swept; live sessions and their tickets survive.
#[tokio::test]
async fn test_cleaner_expired_session_removed_live_kept() -> Result<(), anyhow::Error> {
    // Arrange
    let cas = TestCas::new();
    let live = cas.start_session(TEST_TOKEN_ALICE).await?;
    let st = cas.grant(&live, TEST_SERVICE_APP).await?;
    let expired = cas
        .seed_session(
            TEST_PRINCIPAL_BOB,
            hard(60),
            Utc::now() - chrono::Duration::hours(1),
        )
        .await?;

    // Act
    let removed = run_cleanup(cas.registry().as_ref(), 1, &CancellationToken::new()).await?;

    // Assert
    assert_eq!(removed, 1);
    assert!(cas.registry().fetch_ticket(&expired).await?.is_none());
    cas.validate(&st, TEST_SERVICE_APP)
        .await?
        .assert_principal(TEST_PRINCIPAL_ALICE);
    Ok(())
}

/// Tickets left behind by a non-cascading removal are swept as orphans.
#[tokio::test]
async fn test_cleaner_orphaned_service_tickets_removed() -> Result<(), anyhow::Error> {
    let cas = TestCas::new();
    let tgt = cas.start_session(TEST_TOKEN_ALICE).await?;
    cas.grant(&tgt, TEST_SERVICE_APP).await?;
    cas.grant(&tgt, TEST_SERVICE_OTHER).await?;
    cas.registry().take_ticket(&tgt).await?;

    let removed = run_cleanup(cas.registry().as_ref(), 10, &CancellationToken::new()).await?;

    assert_eq!(removed, 2);
    assert_eq!(cas.cas().count_tickets().await?, 0);
    Ok(())
}

/// A sweep over a clean registry removes nothing.
#[tokio::test]
async fn test_cleaner_nothing_expired_removes_nothing() -> Result<(), anyhow::Error> {
    let cas = TestCas::new();
    let tgt = cas.start_session(TEST_TOKEN_ALICE).await?;
    cas.grant(&tgt, TEST_SERVICE_APP).await?;

    let removed = run_cleanup(cas.registry().as_ref(), 10, &CancellationToken::new()).await?;

    assert_eq!(removed, 0);
    assert_eq!(cas.cas().count_tickets().await?, 2);
    Ok(())
}

/// The background task sweeps after its start delay and stops on cancel.
#[tokio::test(start_paused = true)]
async fn test_cleaner_task_sweeps_after_start_delay() -> Result<(), anyhow::Error> {
    // Arrange
    let memory: Arc<dyn TicketRegistry> = Arc::new(MemoryTicketRegistry::new());
    let registry: Arc<dyn TicketRegistry> =
        Arc::new(BoundedTicketRegistry::new(memory, Duration::from_secs(5)));
    let cas = TestCas::builder()
        .with_registry(Arc::clone(&registry))
        .build();
    cas.seed_session(
        TEST_PRINCIPAL_ALICE,
        hard(60),
        Utc::now() - chrono::Duration::hours(1),
    )
    .await?;

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(start_ticket_registry_cleaner(
        Arc::clone(&registry),
        TicketRegistryCleanerConfig {
            start_delay_seconds: 20,
            repeat_interval_seconds: 120,
            ..Default::default()
        },
        cancel.clone(),
    ));

    // Act / Assert: nothing happens before the start delay
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(registry.count_tickets().await?, 1);

    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(registry.count_tickets().await?, 0);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle).await??;
    Ok(())
}
