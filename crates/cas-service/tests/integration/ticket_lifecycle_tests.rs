//! End-to-end ticket lifecycle tests through the CAS facade.
//!
//! ## Test Categories
//!
//! - **SSO flow**: login, grant, validate, replay
//! - **Logout**: cascade revocation of everything a session issued
//! - **Expiration**: lazy expiration of sessions and service tickets
//! - **Renew**: fresh credentials on an existing session
//!
//! ## Test Naming
//!
//! Tests follow the convention: `test_<feature>_<scenario>_<expected_result>`

use cas_service::authn::Credential;
use cas_service::errors::CasError;
use cas_service::services::TicketExpirationPolicies;
use cas_service::tickets::{ExpirationPolicy, Service, TicketKind};
use cas_test_utils::*;
use chrono::Utc;
use std::time::Duration;

fn hard(seconds: u64) -> ExpirationPolicy {
    ExpirationPolicy::HardTimeout {
        time_to_kill: Duration::from_secs(seconds),
    }
}

// ============================================================================
// SSO Flow Tests
// ============================================================================

/// Alice logs in, gets a service ticket for the app and validates it once.
///
/// A second validation of the same id is a replay and must fail exactly like
/// an unknown id.
#[tokio::test]
async fn test_sso_flow_validate_then_replay_not_found() -> Result<(), anyhow::Error> {
    // Arrange
    let cas = TestCas::new();
    let tgt = cas.start_session(TEST_TOKEN_ALICE).await?;
    let st = cas.grant(&tgt, TEST_SERVICE_APP).await?;

    // Act
    let assertion = cas.validate(&st, TEST_SERVICE_APP).await?;

    // Assert
    assertion
        .assert_principal(TEST_PRINCIPAL_ALICE)
        .assert_service(TEST_SERVICE_APP)
        .assert_from_new_login()
        .assert_chain_len(1);

    assert_ticket_not_found(cas.validate(&st, TEST_SERVICE_APP).await);
    assert_ticket_not_found(cas.validate(TEST_MISSING_ST_ID, TEST_SERVICE_APP).await);
    Ok(())
}

/// Tickets carry their kind prefix and the configured host suffix.
#[tokio::test]
async fn test_sso_flow_ticket_ids_carry_kind_and_host() -> Result<(), anyhow::Error> {
    let cas = TestCas::new();
    let tgt = cas.start_session(TEST_TOKEN_ALICE).await?;
    let st = cas.grant(&tgt, TEST_SERVICE_APP).await?;

    assert!(tgt.starts_with("TGT-"), "unexpected TGT id {tgt}");
    assert!(st.starts_with("ST-"), "unexpected ST id {st}");
    assert!(tgt.ends_with(TEST_HOST_NAME));
    assert_eq!(TicketKind::from_id(&st), Some(TicketKind::Service));
    Ok(())
}

/// Only the first ticket granted from a session is from a new login.
#[tokio::test]
async fn test_sso_flow_second_grant_not_from_new_login() -> Result<(), anyhow::Error> {
    let cas = TestCas::new();
    let tgt = cas.start_session(TEST_TOKEN_ALICE).await?;

    let first = cas.grant(&tgt, TEST_SERVICE_APP).await?;
    let second = cas.grant(&tgt, TEST_SERVICE_OTHER).await?;

    cas.validate(&first, TEST_SERVICE_APP)
        .await?
        .assert_from_new_login();
    cas.validate(&second, TEST_SERVICE_OTHER)
        .await?
        .assert_not_from_new_login()
        .assert_service(TEST_SERVICE_OTHER);
    Ok(())
}

/// Validating against another service fails with the requested service in
/// the error, and the single-use ticket is spent.
#[tokio::test]
async fn test_sso_flow_wrong_service_mismatch_and_consumed() -> Result<(), anyhow::Error> {
    let cas = TestCas::new();
    let tgt = cas.start_session(TEST_TOKEN_ALICE).await?;
    let st = cas.grant(&tgt, TEST_SERVICE_APP).await?;

    let result = cas.validate(&st, TEST_SERVICE_OTHER).await;
    assert_eq!(
        result.unwrap_err(),
        CasError::ServiceMismatch {
            requested: TEST_SERVICE_OTHER.to_string()
        }
    );

    assert_ticket_not_found(cas.validate(&st, TEST_SERVICE_APP).await);
    Ok(())
}

/// A TGT id presented for validation is not a service ticket.
#[tokio::test]
async fn test_sso_flow_validate_session_id_not_found() -> Result<(), anyhow::Error> {
    let cas = TestCas::new();
    let tgt = cas.start_session(TEST_TOKEN_ALICE).await?;

    assert_ticket_not_found(cas.validate(&tgt, TEST_SERVICE_APP).await);
    // The session itself is untouched
    cas.grant(&tgt, TEST_SERVICE_APP).await?;
    Ok(())
}

// ============================================================================
// Logout Tests
// ============================================================================

/// Logout removes the TGT and every service ticket it issued.
#[tokio::test]
async fn test_logout_revokes_children_not_found() -> Result<(), anyhow::Error> {
    // Arrange
    let cas = TestCas::new();
    let tgt = cas.start_session(TEST_TOKEN_ALICE).await?;
    let app = cas.grant(&tgt, TEST_SERVICE_APP).await?;
    let other = cas.grant(&tgt, TEST_SERVICE_OTHER).await?;

    // Act
    let removed = cas.logout(&tgt).await?;

    // Assert
    assert_eq!(removed, 3);
    assert_ticket_not_found(cas.validate(&app, TEST_SERVICE_APP).await);
    assert_ticket_not_found(cas.validate(&other, TEST_SERVICE_OTHER).await);
    assert_ticket_not_found(cas.grant(&tgt, TEST_SERVICE_APP).await);
    assert_eq!(cas.cas().count_tickets().await?, 0);
    Ok(())
}

/// Logging out one session leaves other sessions alone.
#[tokio::test]
async fn test_logout_other_session_unaffected() -> Result<(), anyhow::Error> {
    let cas = TestCas::new();
    let alice = cas.start_session(TEST_TOKEN_ALICE).await?;
    let bob = cas.start_session(TEST_TOKEN_BOB).await?;
    let bob_st = cas.grant(&bob, TEST_SERVICE_APP).await?;

    cas.logout(&alice).await?;

    cas.validate(&bob_st, TEST_SERVICE_APP)
        .await?
        .assert_principal(TEST_PRINCIPAL_BOB);
    assert_eq!(cas.cas().session_count().await?, 1);
    Ok(())
}

/// Logging out twice, or with an unknown id, removes nothing.
#[tokio::test]
async fn test_logout_repeated_returns_zero() -> Result<(), anyhow::Error> {
    let cas = TestCas::new();
    let tgt = cas.start_session(TEST_TOKEN_ALICE).await?;

    assert_eq!(cas.logout(&tgt).await?, 1);
    assert_eq!(cas.logout(&tgt).await?, 0);
    assert_eq!(cas.logout(TEST_MISSING_TGT_ID).await?, 0);
    Ok(())
}

// ============================================================================
// Orphaned Ticket Tests
// ============================================================================

/// A service ticket whose session was removed without a cascade is dead.
#[tokio::test]
async fn test_orphaned_service_ticket_validate_not_found() -> Result<(), anyhow::Error> {
    // Arrange
    let cas = TestCas::new();
    let tgt = cas.start_session(TEST_TOKEN_ALICE).await?;
    let st = cas.grant(&tgt, TEST_SERVICE_APP).await?;

    // Act: remove only the TGT, as an interrupted cascade would
    cas.registry().take_ticket(&tgt).await?;

    // Assert
    assert_ticket_not_found(cas.validate(&st, TEST_SERVICE_APP).await);
    Ok(())
}

/// An orphan reads as missing whatever service it is presented for, so it
/// never reveals that it still exists.
#[tokio::test]
async fn test_orphaned_service_ticket_wrong_service_not_found() -> Result<(), anyhow::Error> {
    let cas = TestCas::new();
    let tgt = cas.start_session(TEST_TOKEN_ALICE).await?;
    let st = cas.grant(&tgt, TEST_SERVICE_APP).await?;
    cas.registry().take_ticket(&tgt).await?;

    let result = cas.validate(&st, TEST_SERVICE_OTHER).await;

    assert_ticket_not_found(result);
    Ok(())
}

// ============================================================================
// Expiration Tests
// ============================================================================

/// Granting from an expired session reports the expiry once, then the
/// session is gone.
#[tokio::test]
async fn test_expiration_grant_from_expired_session_expired() -> Result<(), anyhow::Error> {
    // Arrange
    let cas = TestCas::new();
    let an_hour_ago = Utc::now() - chrono::Duration::hours(1);
    let tgt = cas
        .seed_session(TEST_PRINCIPAL_ALICE, hard(60), an_hour_ago)
        .await?;

    // Act
    let result = cas.grant(&tgt, TEST_SERVICE_APP).await;

    // Assert
    assert_eq!(result.unwrap_err(), CasError::TicketExpired);
    assert_ticket_not_found(cas.grant(&tgt, TEST_SERVICE_APP).await);
    assert_eq!(cas.cas().count_tickets().await?, 0);
    Ok(())
}

/// An expired service ticket is indistinguishable from an unknown one.
#[tokio::test]
async fn test_expiration_expired_service_ticket_not_found() -> Result<(), anyhow::Error> {
    let cas = TestCas::builder()
        .with_expiration_policies(TicketExpirationPolicies {
            service: ExpirationPolicy::MultiTimeUseOrTimeout {
                number_of_uses: 1,
                time_to_kill: Duration::ZERO,
            },
            ..Default::default()
        })
        .build();
    let tgt = cas.start_session(TEST_TOKEN_ALICE).await?;
    let st = cas.grant(&tgt, TEST_SERVICE_APP).await?;

    let expired = cas.validate(&st, TEST_SERVICE_APP).await.unwrap_err();
    let unknown = cas
        .validate(TEST_MISSING_ST_ID, TEST_SERVICE_APP)
        .await
        .unwrap_err();

    assert_eq!(expired, CasError::TicketNotFound);
    assert_eq!(expired, unknown);
    Ok(())
}

/// A multi-use ticket validates as many times as configured, then is gone.
#[tokio::test]
async fn test_expiration_multi_use_ticket_exhausted_not_found() -> Result<(), anyhow::Error> {
    let cas = TestCas::builder()
        .with_expiration_policies(TicketExpirationPolicies {
            service: ExpirationPolicy::MultiTimeUseOrTimeout {
                number_of_uses: 3,
                time_to_kill: Duration::from_secs(60),
            },
            ..Default::default()
        })
        .build();
    let tgt = cas.start_session(TEST_TOKEN_ALICE).await?;
    let st = cas.grant(&tgt, TEST_SERVICE_APP).await?;

    for _ in 0..3 {
        cas.validate(&st, TEST_SERVICE_APP)
            .await?
            .assert_principal(TEST_PRINCIPAL_ALICE);
    }

    assert_ticket_not_found(cas.validate(&st, TEST_SERVICE_APP).await);
    Ok(())
}

/// Session and service ticket counts only include live tickets.
#[tokio::test]
async fn test_expiration_counts_exclude_expired() -> Result<(), anyhow::Error> {
    let cas = TestCas::new();
    let tgt = cas.start_session(TEST_TOKEN_ALICE).await?;
    cas.grant(&tgt, TEST_SERVICE_APP).await?;
    cas.seed_session(
        TEST_PRINCIPAL_BOB,
        hard(60),
        Utc::now() - chrono::Duration::hours(1),
    )
    .await?;

    assert_eq!(cas.cas().session_count().await?, 1);
    assert_eq!(cas.cas().service_ticket_count().await?, 1);
    assert_eq!(cas.cas().count_tickets().await?, 3);
    Ok(())
}

// ============================================================================
// Renew Tests
// ============================================================================

/// Fresh credentials for the session principal mark the ticket as a new
/// login even on a session that has already been used.
#[tokio::test]
async fn test_renew_same_principal_from_new_login() -> Result<(), anyhow::Error> {
    let cas = TestCas::new();
    let tgt = cas.start_session(TEST_TOKEN_ALICE).await?;
    cas.grant(&tgt, TEST_SERVICE_OTHER).await?;

    let fresh = cas.login_token(TEST_TOKEN_ALICE).await?;
    let st = cas
        .cas()
        .grant_service_ticket(&cas.ctx(), &tgt, &Service::new(TEST_SERVICE_APP), Some(&fresh))
        .await?;

    cas.validate(&st, TEST_SERVICE_APP)
        .await?
        .assert_from_new_login();
    Ok(())
}

/// Fresh credentials for someone else are refused and nothing is issued.
#[tokio::test]
async fn test_renew_other_principal_mixed_principal() -> Result<(), anyhow::Error> {
    let cas = TestCas::new();
    let tgt = cas.start_session(TEST_TOKEN_ALICE).await?;
    let fresh = cas.login_token(TEST_TOKEN_BOB).await?;

    let result = cas
        .cas()
        .grant_service_ticket(&cas.ctx(), &tgt, &Service::new(TEST_SERVICE_APP), Some(&fresh))
        .await;

    assert_eq!(result.unwrap_err(), CasError::MixedPrincipal);
    assert_eq!(cas.cas().service_ticket_count().await?, 0);
    Ok(())
}

// ============================================================================
// Remember-Me Tests
// ============================================================================

/// Remember-me sessions follow the remember-me policy; others the session
/// policy.
#[tokio::test]
async fn test_remember_me_session_outlives_plain_session() -> Result<(), anyhow::Error> {
    // Arrange
    let cas = TestCas::builder()
        .with_password_handler()
        .with_expiration_policies(TicketExpirationPolicies {
            ticket_granting: ExpirationPolicy::RememberMeDelegating {
                remember_me: Box::new(hard(3600)),
                session: Box::new(ExpirationPolicy::HardTimeout {
                    time_to_kill: Duration::ZERO,
                }),
            },
            ..Default::default()
        })
        .build();

    let remembered = cas
        .login_with(vec![Credential::username_password(
            TEST_PRINCIPAL_ALICE,
            TEST_PASSWORD_ALICE,
        )
        .with_remember_me(true)])
        .await?;
    let plain = cas
        .login_with(vec![Credential::username_password(
            TEST_PRINCIPAL_ALICE,
            TEST_PASSWORD_ALICE,
        )])
        .await?;
    assert!(remembered.authentication().is_remember_me());
    assert!(!plain.authentication().is_remember_me());

    let remembered_tgt = cas
        .cas()
        .create_ticket_granting_ticket(&cas.ctx(), remembered.authentication().clone())
        .await?;
    let plain_tgt = cas
        .cas()
        .create_ticket_granting_ticket(&cas.ctx(), plain.authentication().clone())
        .await?;

    // Act / Assert
    cas.grant(&remembered_tgt, TEST_SERVICE_APP).await?;
    assert_eq!(
        cas.grant(&plain_tgt, TEST_SERVICE_APP).await.unwrap_err(),
        CasError::TicketExpired
    );
    Ok(())
}
