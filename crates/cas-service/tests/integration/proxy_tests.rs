//! Proxy chain tests: PGT issuance, PT grants and validation, revocation.
//!
//! ## Test Naming
//!
//! Tests follow the convention: `test_<feature>_<scenario>_<expected_result>`

use cas_service::authn::{Authentication, AuthenticationResult, Principal};
use cas_service::errors::CasError;
use cas_service::tickets::{Service, TicketKind};
use cas_test_utils::*;
use std::sync::Arc;

/// Authentication of a proxy callback endpoint.
fn proxy_authentication(callback: &str) -> AuthenticationResult {
    AuthenticationResult::new(
        Arc::new(Authentication::builder(Principal::new(callback)).build()),
        Some(Service::new(callback)),
    )
}

/// Alice's session with a PGT issued to the proxy callback.
/// Returns `(tgt, st, pgt)`.
async fn proxied_session(cas: &TestCas) -> Result<(String, String, String), anyhow::Error> {
    let tgt = cas.start_session(TEST_TOKEN_ALICE).await?;
    let st = cas.grant(&tgt, TEST_SERVICE_APP).await?;
    let pgt = cas
        .cas()
        .create_proxy_granting_ticket(
            &cas.ctx(),
            &st,
            &proxy_authentication(TEST_SERVICE_PROXY_CALLBACK),
        )
        .await?;
    Ok((tgt, st, pgt))
}

async fn grant_proxy(cas: &TestCas, pgt: &str, service: &str) -> Result<String, CasError> {
    cas.cas()
        .grant_proxy_ticket(&cas.ctx(), pgt, &Service::new(service))
        .await
}

// ============================================================================
// Proxy Chain Tests
// ============================================================================

/// A proxy ticket validates to the session principal with a chain of the
/// proxy's and the session's authentications.
#[tokio::test]
async fn test_proxy_ticket_validate_returns_chain() -> Result<(), anyhow::Error> {
    // Arrange
    let cas = TestCas::new();
    let (_tgt, st, pgt) = proxied_session(&cas).await?;
    cas.validate(&st, TEST_SERVICE_APP).await?;

    // Act
    let pt = grant_proxy(&cas, &pgt, TEST_SERVICE_BACKEND).await?;
    let assertion = cas.validate(&pt, TEST_SERVICE_BACKEND).await?;

    // Assert
    assert!(pgt.starts_with("PGT-"));
    assert_eq!(TicketKind::from_id(&pt), Some(TicketKind::Proxy));
    assertion
        .assert_principal(TEST_PRINCIPAL_ALICE)
        .assert_service(TEST_SERVICE_BACKEND)
        .assert_chain_len(2);
    let proxy = assertion
        .chained_authentications()
        .first()
        .expect("chain should start with the proxy");
    assert_eq!(proxy.principal().id, TEST_SERVICE_PROXY_CALLBACK);

    // Proxy tickets are single use too
    assert_ticket_not_found(cas.validate(&pt, TEST_SERVICE_BACKEND).await);
    Ok(())
}

/// The PGT remembers which callback it was issued to.
#[tokio::test]
async fn test_proxy_granting_ticket_records_callback() -> Result<(), anyhow::Error> {
    let cas = TestCas::new();
    let (tgt, _st, pgt) = proxied_session(&cas).await?;

    let ticket = cas
        .cas()
        .get_ticket(&cas.ctx(), &pgt, &[TicketKind::ProxyGranting])
        .await?;

    assert_eq!(ticket.parent_id(), Some(tgt.as_str()));
    assert_eq!(
        ticket.proxied_by().map(Service::id),
        Some(TEST_SERVICE_PROXY_CALLBACK)
    );
    Ok(())
}

/// A service ticket can issue at most one PGT.
#[tokio::test]
async fn test_proxy_granting_ticket_second_from_same_st_rejected() -> Result<(), anyhow::Error> {
    let cas = TestCas::new();
    let (_tgt, st, _pgt) = proxied_session(&cas).await?;

    let second = cas
        .cas()
        .create_proxy_granting_ticket(
            &cas.ctx(),
            &st,
            &proxy_authentication(TEST_SERVICE_PROXY_CALLBACK),
        )
        .await;

    assert!(
        matches!(second, Err(CasError::InvalidTicketOperation(_))),
        "got {second:?}"
    );
    Ok(())
}

/// A PGT cannot be issued from a ticket that no longer exists.
#[tokio::test]
async fn test_proxy_granting_ticket_unknown_st_not_found() -> Result<(), anyhow::Error> {
    let cas = TestCas::new();

    let result = cas
        .cas()
        .create_proxy_granting_ticket(
            &cas.ctx(),
            TEST_MISSING_ST_ID,
            &proxy_authentication(TEST_SERVICE_PROXY_CALLBACK),
        )
        .await;

    assert_ticket_not_found(result);
    Ok(())
}

/// A proxy ticket can itself issue a PGT; the chain grows by one.
#[tokio::test]
async fn test_proxy_chain_two_levels_chain_len_three() -> Result<(), anyhow::Error> {
    let cas = TestCas::new();
    let (_tgt, _st, pgt) = proxied_session(&cas).await?;
    let pt = grant_proxy(&cas, &pgt, TEST_SERVICE_BACKEND).await?;

    let nested_pgt = cas
        .cas()
        .create_proxy_granting_ticket(
            &cas.ctx(),
            &pt,
            &proxy_authentication(TEST_SERVICE_BACKEND),
        )
        .await?;
    let nested_pt = grant_proxy(&cas, &nested_pgt, TEST_SERVICE_OTHER).await?;

    cas.validate(&nested_pt, TEST_SERVICE_OTHER)
        .await?
        .assert_principal(TEST_PRINCIPAL_ALICE)
        .assert_chain_len(3);
    Ok(())
}

// ============================================================================
// Revocation Tests
// ============================================================================

/// Logging out the session revokes its PGTs and their proxy tickets.
#[tokio::test]
async fn test_proxy_logout_revokes_pgt_and_pt() -> Result<(), anyhow::Error> {
    // Arrange
    let cas = TestCas::new();
    let (tgt, st, pgt) = proxied_session(&cas).await?;
    cas.validate(&st, TEST_SERVICE_APP).await?;
    let pt = grant_proxy(&cas, &pgt, TEST_SERVICE_BACKEND).await?;

    // Act
    let removed = cas.logout(&tgt).await?;

    // Assert
    assert_eq!(removed, 3);
    assert_ticket_not_found(cas.validate(&pt, TEST_SERVICE_BACKEND).await);
    assert_ticket_not_found(grant_proxy(&cas, &pgt, TEST_SERVICE_BACKEND).await);
    assert_eq!(cas.cas().count_tickets().await?, 0);
    Ok(())
}

/// A PGT whose session vanished without a cascade can no longer grant.
#[tokio::test]
async fn test_proxy_orphaned_pgt_not_found() -> Result<(), anyhow::Error> {
    let cas = TestCas::new();
    let (tgt, _st, pgt) = proxied_session(&cas).await?;
    let pt = grant_proxy(&cas, &pgt, TEST_SERVICE_BACKEND).await?;

    // Remove only the TGT, leaving its descendants behind
    cas.registry().take_ticket(&tgt).await?;

    assert_ticket_not_found(grant_proxy(&cas, &pgt, TEST_SERVICE_BACKEND).await);
    assert_ticket_not_found(cas.validate(&pt, TEST_SERVICE_BACKEND).await);
    Ok(())
}

/// A service ticket whose session vanished cannot issue a PGT.
#[tokio::test]
async fn test_proxy_granting_ticket_from_orphaned_st_not_found() -> Result<(), anyhow::Error> {
    let cas = TestCas::new();
    let tgt = cas.start_session(TEST_TOKEN_ALICE).await?;
    let st = cas.grant(&tgt, TEST_SERVICE_APP).await?;
    cas.registry().take_ticket(&tgt).await?;

    let result = cas
        .cas()
        .create_proxy_granting_ticket(
            &cas.ctx(),
            &st,
            &proxy_authentication(TEST_SERVICE_PROXY_CALLBACK),
        )
        .await;

    assert_ticket_not_found(result);
    assert_eq!(cas.cas().count_tickets().await?, 1);
    Ok(())
}

/// A proxy ticket whose PGT was removed directly no longer validates, for
/// any service.
#[tokio::test]
async fn test_proxy_ticket_orphaned_by_pgt_removal_not_found() -> Result<(), anyhow::Error> {
    let cas = TestCas::new();
    let (_tgt, _st, pgt) = proxied_session(&cas).await?;
    let pt = grant_proxy(&cas, &pgt, TEST_SERVICE_BACKEND).await?;
    let other_pt = grant_proxy(&cas, &pgt, TEST_SERVICE_BACKEND).await?;
    cas.registry().take_ticket(&pgt).await?;

    assert_ticket_not_found(cas.validate(&pt, TEST_SERVICE_BACKEND).await);
    assert_ticket_not_found(cas.validate(&other_pt, TEST_SERVICE_APP).await);
    Ok(())
}

/// Proxy tickets are bound to the service they were granted for.
#[tokio::test]
async fn test_proxy_ticket_wrong_service_mismatch() -> Result<(), anyhow::Error> {
    let cas = TestCas::new();
    let (_tgt, _st, pgt) = proxied_session(&cas).await?;
    let pt = grant_proxy(&cas, &pgt, TEST_SERVICE_BACKEND).await?;

    let result = cas.validate(&pt, TEST_SERVICE_APP).await;

    assert_eq!(
        result.unwrap_err(),
        CasError::ServiceMismatch {
            requested: TEST_SERVICE_APP.to_string()
        }
    );
    Ok(())
}
