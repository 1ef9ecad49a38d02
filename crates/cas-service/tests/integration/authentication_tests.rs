//! Authentication transaction tests.
//!
//! Exercises the transaction manager, the policy-based manager and the
//! facade's `authenticate` against mock and real handlers.
//!
//! ## Test Categories
//!
//! - **Transactions**: empty transactions, all-or-nothing collection
//! - **Policies**: any, all, required handler
//! - **Handlers**: timeouts, account status, password handler
//!
//! ## Test Naming
//!
//! Tests follow the convention: `test_<feature>_<scenario>_<expected_result>`

use cas_service::authn::{
    AuthenticationHandler, AuthenticationPolicy, AuthenticationResultBuilder,
    AuthenticationTransaction, Credential, DefaultAuthenticationTransactionManager, HandlerError,
    PolicyBasedAuthenticationManager,
};
use cas_service::errors::CasError;
use cas_service::tickets::Service;
use cas_test_utils::*;
use std::sync::Arc;
use std::time::Duration;

fn transaction_manager(
    handlers: Vec<Arc<dyn AuthenticationHandler>>,
    policy: AuthenticationPolicy,
) -> DefaultAuthenticationTransactionManager {
    let manager = PolicyBasedAuthenticationManager::new(handlers, policy, Duration::from_secs(5));
    DefaultAuthenticationTransactionManager::new(Arc::new(manager))
}

// ============================================================================
// Transaction Tests
// ============================================================================

/// A transaction without credentials is a no-op that succeeds.
#[tokio::test]
async fn test_transaction_empty_leaves_builder_unchanged() -> Result<(), anyhow::Error> {
    // Arrange
    let handler = Arc::new(StaticHandler::new("static", TEST_PRINCIPAL_ALICE));
    let manager = transaction_manager(
        vec![handler.clone() as Arc<dyn AuthenticationHandler>],
        AuthenticationPolicy::default(),
    );
    let mut builder = AuthenticationResultBuilder::new();

    // Act
    manager
        .handle(&AuthenticationTransaction::of(None, Vec::new()), &mut builder)
        .await?;

    // Assert
    assert!(builder.is_empty());
    assert_eq!(handler.calls(), 0);
    Ok(())
}

/// Under the all-credentials policy, one rejected credential fails the
/// whole transaction and nothing reaches the builder.
#[tokio::test]
async fn test_transaction_all_policy_one_failure_collects_nothing() -> Result<(), anyhow::Error> {
    // Arrange
    let password: Arc<dyn AuthenticationHandler> =
        Arc::new(UsernameHandler::new("password", TEST_PRINCIPAL_ALICE));
    let rejecting = Arc::new(FailingHandler::bad_credentials("token"));
    let manager = transaction_manager(
        vec![password, rejecting.clone() as Arc<dyn AuthenticationHandler>],
        AuthenticationPolicy::All,
    );
    let transaction = AuthenticationTransaction::of(
        None,
        vec![
            Credential::username_password(TEST_PRINCIPAL_ALICE, TEST_PASSWORD_ALICE),
            Credential::token("not-a-known-token"),
        ],
    );
    let mut builder = AuthenticationResultBuilder::new();

    // Act
    let result = manager.handle(&transaction, &mut builder).await;

    // Assert
    assert_eq!(result.err(), Some(CasError::BadCredentials));
    assert!(builder.is_empty());
    assert_eq!(rejecting.calls(), 2);
    Ok(())
}

/// Transactions accumulate; the first one supplies the primary
/// authentication.
#[tokio::test]
async fn test_transaction_chained_steps_accumulate() -> Result<(), anyhow::Error> {
    let handler: Arc<dyn AuthenticationHandler> =
        Arc::new(StaticHandler::new("static", TEST_PRINCIPAL_ALICE));
    let manager = transaction_manager(
        vec![handler],
        AuthenticationPolicy::default(),
    );
    let mut builder = AuthenticationResultBuilder::new();

    manager
        .handle(
            &AuthenticationTransaction::of(None, vec![Credential::token("first-factor")]),
            &mut builder,
        )
        .await?
        .handle(
            &AuthenticationTransaction::of(None, vec![Credential::token("second-factor")]),
            &mut builder,
        )
        .await?;

    assert_eq!(builder.authentications().len(), 2);
    let result = builder.build(None).expect("builder should produce a result");
    assert_eq!(result.authentication().principal().id, TEST_PRINCIPAL_ALICE);
    assert_eq!(result.authentication().credentials().len(), 2);
    Ok(())
}

// ============================================================================
// Facade Authentication Tests
// ============================================================================

/// The facade carries the transaction's service onto the result.
#[tokio::test]
async fn test_authenticate_with_service_result_carries_service() -> Result<(), anyhow::Error> {
    let cas = TestCas::new();
    let transaction = AuthenticationTransaction::of(
        Some(Service::new(TEST_SERVICE_APP)),
        vec![Credential::token(TEST_TOKEN_ALICE)],
    );

    let result = cas.cas().authenticate(&cas.ctx(), &[transaction]).await?;

    assert_eq!(result.authentication().principal().id, TEST_PRINCIPAL_ALICE);
    assert_eq!(
        result.service().map(|s| s.id()),
        Some(TEST_SERVICE_APP)
    );
    Ok(())
}

/// No credentials at all cannot produce an authentication.
#[tokio::test]
async fn test_authenticate_no_credentials_bad_credentials() -> Result<(), anyhow::Error> {
    let cas = TestCas::new();

    let result = cas.login_with(Vec::new()).await;

    assert_eq!(result.unwrap_err(), CasError::BadCredentials);
    Ok(())
}

/// An unknown token is rejected with `BadCredentials`.
#[tokio::test]
async fn test_authenticate_unknown_token_bad_credentials() -> Result<(), anyhow::Error> {
    let cas = TestCas::new();

    let result = cas.login_token("not-a-known-token").await;

    assert_eq!(result.unwrap_err(), CasError::BadCredentials);
    Ok(())
}

/// A handler that exceeds its time budget surfaces as unavailable, which is
/// retryable.
#[tokio::test]
async fn test_authenticate_slow_handler_handler_unavailable() -> Result<(), anyhow::Error> {
    let cas = TestCas::builder()
        .with_handler(Arc::new(SlowHandler::new(
            "slow",
            TEST_PRINCIPAL_ALICE,
            Duration::from_secs(5),
        )))
        .with_handler_timeout(Duration::from_millis(50))
        .build();

    let err = cas.login_token(TEST_TOKEN_ALICE).await.unwrap_err();

    assert!(matches!(err, CasError::HandlerUnavailable(_)), "got {err:?}");
    assert!(err.is_retryable());
    Ok(())
}

/// Account status failures stay distinguishable from bad credentials.
#[tokio::test]
async fn test_authenticate_locked_account_account_locked() -> Result<(), anyhow::Error> {
    let cas = TestCas::builder()
        .with_handler(Arc::new(FailingHandler::new(
            "directory",
            HandlerError::AccountLocked,
        )))
        .build();

    let err = cas.login_token(TEST_TOKEN_ALICE).await.unwrap_err();

    assert_eq!(err, CasError::AccountLocked);
    assert!(err.is_authentication_failure());
    Ok(())
}

/// Under the default policy the chain stops at the first success.
#[tokio::test]
async fn test_authenticate_any_policy_short_circuits() -> Result<(), anyhow::Error> {
    let first = Arc::new(StaticHandler::new("first", TEST_PRINCIPAL_ALICE));
    let second = Arc::new(StaticHandler::new("second", TEST_PRINCIPAL_BOB));
    let cas = TestCas::builder()
        .with_handler(first.clone())
        .with_handler(second.clone())
        .build();

    let result = cas.login_token(TEST_TOKEN_ALICE).await?;

    assert_eq!(result.authentication().principal().id, TEST_PRINCIPAL_ALICE);
    assert_eq!(first.calls(), 1);
    assert_eq!(second.calls(), 0);
    Ok(())
}

/// The required-handler policy fails when only other handlers succeed.
#[tokio::test]
async fn test_authenticate_required_handler_missing_fails() -> Result<(), anyhow::Error> {
    let cas = TestCas::builder()
        .with_handler(Arc::new(StaticHandler::new("static", TEST_PRINCIPAL_ALICE)))
        .with_handler(Arc::new(FailingHandler::bad_credentials("mfa")))
        .with_authentication_policy(AuthenticationPolicy::RequiredHandler {
            handler_name: "mfa".to_string(),
            try_all: true,
        })
        .build();

    let err = cas.login_token(TEST_TOKEN_ALICE).await.unwrap_err();

    assert_eq!(err, CasError::BadCredentials);
    Ok(())
}

/// The accept-users handler checks bcrypt-hashed passwords.
#[tokio::test]
async fn test_authenticate_password_handler_accepts_and_rejects() -> Result<(), anyhow::Error> {
    let cas = TestCas::builder().with_password_handler().build();

    let ok = cas
        .login_with(vec![Credential::username_password(
            TEST_PRINCIPAL_ALICE,
            TEST_PASSWORD_ALICE,
        )])
        .await?;
    assert_eq!(ok.authentication().principal().id, TEST_PRINCIPAL_ALICE);

    let wrong = cas
        .login_with(vec![Credential::username_password(
            TEST_PRINCIPAL_ALICE,
            "wrong-password",
        )])
        .await;
    assert_eq!(wrong.unwrap_err(), CasError::BadCredentials);
    Ok(())
}
