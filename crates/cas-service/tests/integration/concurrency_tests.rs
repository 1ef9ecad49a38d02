//! Concurrent validation tests.
//!
//! Single-use tickets are consumed by an atomic take, so racing validators
//! must see exactly one winner. Multi-use tickets record each use with a
//! conditional update, so racing validators never exceed the use limit.
//!
//! ## Test Naming
//!
//! Tests follow the convention: `test_<feature>_<scenario>_<expected_result>`

use cas_service::errors::CasError;
use cas_service::registry::TicketRegistry;
use cas_service::services::TicketExpirationPolicies;
use cas_service::tickets::ExpirationPolicy;
use cas_test_utils::*;
use std::sync::Arc;
use std::time::Duration;

/// Spawn `racers` validations of `ticket` and return their outcomes.
async fn race_validations(
    cas: &Arc<TestCas>,
    ticket: &str,
    racers: usize,
) -> Result<Vec<Result<String, CasError>>, anyhow::Error> {
    let mut handles = Vec::with_capacity(racers);
    for _ in 0..racers {
        let cas = Arc::clone(cas);
        let ticket = ticket.to_string();
        handles.push(tokio::spawn(async move {
            cas.validate(&ticket, TEST_SERVICE_APP)
                .await
                .map(|assertion| assertion.principal_id().to_string())
        }));
    }

    let mut outcomes = Vec::with_capacity(racers);
    for handle in handles {
        outcomes.push(handle.await?);
    }
    Ok(outcomes)
}

/// Two validators racing on the same service ticket: one wins, the other
/// gets `TicketNotFound`.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_validation_two_racers_exactly_one_succeeds() -> Result<(), anyhow::Error>
{
    let cas = Arc::new(TestCas::new());
    let tgt = cas.start_session(TEST_TOKEN_ALICE).await?;

    for _ in 0..20 {
        let st = cas.grant(&tgt, TEST_SERVICE_APP).await?;

        let outcomes = race_validations(&cas, &st, 2).await?;

        let winners: Vec<_> = outcomes.iter().filter_map(|o| o.as_ref().ok()).collect();
        assert_eq!(winners, vec![TEST_PRINCIPAL_ALICE]);
        assert!(outcomes
            .iter()
            .filter_map(|o| o.as_ref().err())
            .all(|e| *e == CasError::TicketNotFound));
    }
    Ok(())
}

/// Many validators racing: still exactly one winner.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_validation_many_racers_exactly_one_succeeds() -> Result<(), anyhow::Error>
{
    let cas = Arc::new(TestCas::new());
    let tgt = cas.start_session(TEST_TOKEN_BOB).await?;
    let st = cas.grant(&tgt, TEST_SERVICE_APP).await?;

    let outcomes = race_validations(&cas, &st, 16).await?;

    assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| matches!(o, Err(CasError::TicketNotFound)))
            .count(),
        15
    );
    Ok(())
}

/// Validators racing on a ticket good for two uses, against a backend with
/// read latency: exactly two succeed.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_validation_multi_use_never_exceeds_limit() -> Result<(), anyhow::Error> {
    // Arrange
    let registry: Arc<dyn TicketRegistry> =
        Arc::new(LaggingTicketRegistry::new(Duration::from_millis(20)));
    let cas = Arc::new(
        TestCas::builder()
            .with_registry(Arc::clone(&registry))
            .with_expiration_policies(TicketExpirationPolicies {
                service: ExpirationPolicy::MultiTimeUseOrTimeout {
                    number_of_uses: 2,
                    time_to_kill: Duration::from_secs(60),
                },
                ..TicketExpirationPolicies::default()
            })
            .build(),
    );
    let tgt = cas.start_session(TEST_TOKEN_ALICE).await?;
    let st = cas.grant(&tgt, TEST_SERVICE_APP).await?;

    // Act
    let outcomes = race_validations(&cas, &st, 16).await?;

    // Assert
    assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 2);
    assert!(outcomes
        .iter()
        .filter_map(|o| o.as_ref().err())
        .all(|e| *e == CasError::TicketNotFound));
    assert!(registry.fetch_ticket(&st).await?.is_none());
    Ok(())
}

/// Concurrent grants from one session each get a distinct ticket.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_grants_distinct_ids() -> Result<(), anyhow::Error> {
    let cas = Arc::new(TestCas::new());
    let tgt = cas.start_session(TEST_TOKEN_ALICE).await?;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cas = Arc::clone(&cas);
        let tgt = tgt.clone();
        handles.push(tokio::spawn(async move {
            cas.grant(&tgt, TEST_SERVICE_APP).await
        }));
    }
    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await??);
    }

    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 8);
    assert_eq!(cas.cas().service_ticket_count().await?, 8);
    Ok(())
}
