//! CAS Server
//!
//! Runs the ticket core with its background cleaner and an HTTP listener for
//! health checks and Prometheus metrics. Protocol controllers embed the
//! library and call `CentralAuthenticationService` directly.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Connect the ticket registry backend (bounded by a startup timeout)
//! 4. Build the authentication handler chain and the CAS facade
//! 5. Start the registry cleaner
//! 6. Start the health HTTP server (liveness, readiness, metrics)
//! 7. Wait for shutdown signal

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use cas_service::authn::handlers::{accept_users, token};
use cas_service::authn::handlers::{AcceptUsersAuthenticationHandler, TokenAuthenticationHandler};
use cas_service::authn::{
    AuthenticationHandler, DefaultAuthenticationTransactionManager,
    PolicyBasedAuthenticationManager,
};
use cas_service::config::{Config, RegistryBackend};
use cas_service::errors::CasError;
use cas_service::observability::health::{health_router, HealthState};
use cas_service::registry::{
    BoundedTicketRegistry, MemoryTicketRegistry, PostgresTicketRegistry, RedisTicketRegistry,
    TicketRegistry,
};
use cas_service::services::CentralAuthenticationService;
use cas_service::tasks::start_ticket_registry_cleaner;
use cas_service::tickets::HostNameBasedTicketIdGenerator;
use metrics_exporter_prometheus::PrometheusBuilder;
use secrecy::ExposeSecret;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Bound on connecting to the registry backend at startup.
const REGISTRY_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Postgres pool size.
const DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Time allowed for background tasks to finish after shutdown is signalled.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cas_service=debug,cas_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting CAS server");

    // Load configuration
    let mut config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        registry_backend = config.registry_backend.name(),
        registry_timeout_ms = u64::try_from(config.registry_timeout.as_millis()).unwrap_or(u64::MAX),
        authentication_policy = %config.authentication_policy,
        accept_users = config.accept_users.len(),
        token_principals = config.token_digests.len(),
        host_name = %config.host_name,
        cleaner_enabled = config.cleaner.enabled,
        "Configuration loaded successfully"
    );

    // Initialize Prometheus metrics recorder
    // This must happen before any metrics are recorded
    let prometheus_handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        format!("Failed to install Prometheus metrics recorder: {e}")
    })?;
    info!("Prometheus metrics recorder initialized");

    let health_state = Arc::new(HealthState::new());

    // Connect the registry backend
    info!(backend = config.registry_backend.name(), "Connecting ticket registry...");
    let backend = tokio::time::timeout(REGISTRY_CONNECT_TIMEOUT, connect_registry(&config))
        .await
        .map_err(|_| {
            error!(
                timeout_secs = REGISTRY_CONNECT_TIMEOUT.as_secs(),
                "Ticket registry connection timed out"
            );
            CasError::RegistryUnavailable("registry connection timed out".to_string())
        })??;
    let registry: Arc<dyn TicketRegistry> =
        Arc::new(BoundedTicketRegistry::new(backend, config.registry_timeout));
    info!(backend = registry.backend_name(), "Ticket registry ready");

    // Build the handler chain
    let handlers = build_handlers(&mut config).await?;
    let manager = PolicyBasedAuthenticationManager::new(
        handlers,
        config.authentication_policy.clone(),
        config.handler_timeout,
    );
    info!(
        handlers = ?manager.handler_names(),
        policy = %manager.policy(),
        "Authentication manager initialized"
    );
    let transaction_manager = Arc::new(DefaultAuthenticationTransactionManager::new(Arc::new(
        manager,
    )));

    let cas = Arc::new(CentralAuthenticationService::new(
        Arc::clone(&registry),
        transaction_manager,
        Arc::new(HostNameBasedTicketIdGenerator::new(&config.host_name)),
        config.expiration_policies.clone(),
    ));
    info!("CAS core initialized");

    let shutdown_token = CancellationToken::new();

    // Start the registry cleaner
    let cleaner_handle = tokio::spawn(start_ticket_registry_cleaner(
        Arc::clone(cas.registry()),
        config.cleaner.clone(),
        shutdown_token.child_token(),
    ));

    // Start health HTTP server (MUST succeed - fail startup if it doesn't)
    let health_addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        format!("Invalid bind address: {e}")
    })?;

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let app = health_router(Arc::clone(&health_state), Arc::clone(cas.registry()))
        .merge(metrics_router)
        .layer(TraceLayer::new_for_http());

    // Bind listener BEFORE spawning to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;

    let server_token = shutdown_token.child_token();
    let server_handle = tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            server_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    health_state.set_ready();
    info!("CAS server running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");
    // Mark as not ready immediately so load balancers stop routing here
    health_state.set_not_ready();
    shutdown_token.cancel();

    for (name, handle) in [("cleaner", cleaner_handle), ("health server", server_handle)] {
        match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(task = name, error = %e, "Task ended abnormally"),
            Err(_) => warn!(task = name, "Task did not stop within grace period"),
        }
    }

    info!("CAS server shutdown complete");
    Ok(())
}

async fn connect_registry(config: &Config) -> Result<Arc<dyn TicketRegistry>, CasError> {
    match &config.registry_backend {
        RegistryBackend::Memory => {
            warn!("Using in-memory ticket registry; tickets do not survive restart");
            Ok(Arc::new(MemoryTicketRegistry::new()))
        }
        RegistryBackend::Redis { url } => {
            // Do NOT log the URL, it may carry credentials
            let registry = RedisTicketRegistry::connect(url.expose_secret()).await?;
            Ok(Arc::new(registry))
        }
        RegistryBackend::Postgres { url } => {
            let registry = PostgresTicketRegistry::connect(
                url.expose_secret(),
                DATABASE_MAX_CONNECTIONS,
                config.registry_timeout,
            )
            .await?;
            registry.migrate().await?;
            info!("Database migrations applied");
            Ok(Arc::new(registry))
        }
    }
}

/// Build the configured handlers. Takes the seeded passwords out of
/// `config`; they are dropped once hashed.
async fn build_handlers(
    config: &mut Config,
) -> Result<Vec<Arc<dyn AuthenticationHandler>>, CasError> {
    let mut handlers: Vec<Arc<dyn AuthenticationHandler>> = Vec::new();

    let accept = std::mem::take(&mut config.accept_users);
    if !accept.is_empty() {
        let cost = config.bcrypt_cost;
        // bcrypt is deliberately slow; keep it off the async workers
        let handler = tokio::task::spawn_blocking(move || {
            AcceptUsersAuthenticationHandler::from_plaintext(
                accept_users::DEFAULT_HANDLER_NAME,
                accept.iter().map(|(user, password)| (user.as_str(), password)),
                cost,
            )
        })
        .await
        .map_err(|e| CasError::Internal(format!("Password hashing task failed: {e}")))??;
        info!(users = handler.user_count(), "Accept-users handler initialized");
        handlers.push(Arc::new(handler));
    }

    if !config.token_digests.is_empty() {
        let mut handler = TokenAuthenticationHandler::new(token::DEFAULT_HANDLER_NAME);
        for (principal, digest) in &config.token_digests {
            handler = handler
                .with_token_digest(digest, principal.clone())
                .map_err(|e| CasError::Internal(format!("Invalid token digest: {e}")))?;
        }
        handlers.push(Arc::new(handler));
    }

    if handlers.is_empty() {
        warn!("No authentication handlers configured; every authentication will fail");
    }
    Ok(handlers)
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
