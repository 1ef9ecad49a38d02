//! The CAS facade: create, grant, validate and destroy tickets.
//!
//! Protocol controllers call into this type and nothing else. Every
//! operation takes the `RequestContext` of the inbound request; nothing
//! about the caller is kept between calls.
//!
//! # Ordering
//!
//! Child tickets are stored before the parent records them. If recording on
//! the parent fails (the parent was destroyed meanwhile, or the backend
//! failed) the child is removed again, so a session never silently gains a
//! ticket it cannot revoke. Descendant operations always re-resolve the
//! parent chain, which covers children orphaned by an interrupted cascade.

use crate::authn::{
    Authentication, AuthenticationResult, AuthenticationResultBuilder, AuthenticationTransaction,
    DefaultAuthenticationTransactionManager,
};
use crate::context::RequestContext;
use crate::errors::CasError;
use crate::observability::metrics::{
    record_authentication, record_ticket_id_collision, record_ticket_issued,
    record_ticket_validation, record_tickets_destroyed,
};
use crate::observability::{hash_for_correlation, ErrorCategory};
use crate::registry::{TicketLookup, TicketRegistry, DEFAULT_SCAN_BATCH_SIZE};
use crate::tickets::{
    ExpirationPolicy, Service, ServiceMatchStrategy, Ticket, TicketIdGenerator, TicketKind,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Attempts at allocating a fresh id before giving up.
pub const DEFAULT_ID_ATTEMPTS: u32 = 3;

/// Upper bound on proxy chain depth walked during validation.
const MAX_CHAIN_DEPTH: usize = 16;

/// Attempts at recording a use of a contended multi-use ticket.
const MAX_USE_ATTEMPTS: u32 = 32;

/// Expiration policy handed to each new ticket, per kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketExpirationPolicies {
    pub ticket_granting: ExpirationPolicy,
    pub service: ExpirationPolicy,
    pub proxy: ExpirationPolicy,
    pub proxy_granting: ExpirationPolicy,
}

impl Default for TicketExpirationPolicies {
    fn default() -> Self {
        Self {
            ticket_granting: ExpirationPolicy::TicketGrantingTicket {
                max_time_to_live: Duration::from_secs(28_800),
                time_to_kill: Duration::from_secs(7_200),
            },
            service: ExpirationPolicy::MultiTimeUseOrTimeout {
                number_of_uses: 1,
                time_to_kill: Duration::from_secs(10),
            },
            proxy: ExpirationPolicy::MultiTimeUseOrTimeout {
                number_of_uses: 1,
                time_to_kill: Duration::from_secs(10),
            },
            proxy_granting: ExpirationPolicy::TicketGrantingTicket {
                max_time_to_live: Duration::from_secs(28_800),
                time_to_kill: Duration::from_secs(7_200),
            },
        }
    }
}

impl TicketExpirationPolicies {
    pub fn for_kind(&self, kind: TicketKind) -> &ExpirationPolicy {
        match kind {
            TicketKind::TicketGranting => &self.ticket_granting,
            TicketKind::ProxyGranting => &self.proxy_granting,
            TicketKind::Service => &self.service,
            TicketKind::Proxy => &self.proxy,
        }
    }
}

/// Outcome of a successful service or proxy ticket validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assertion {
    primary_authentication: Arc<Authentication>,
    chained_authentications: Vec<Arc<Authentication>>,
    service: Service,
    from_new_login: bool,
}

impl Assertion {
    /// Authentication of the root TGT.
    pub fn primary_authentication(&self) -> &Arc<Authentication> {
        &self.primary_authentication
    }

    /// Authentications from the issuing ticket up to the root TGT.
    pub fn chained_authentications(&self) -> &[Arc<Authentication>] {
        &self.chained_authentications
    }

    pub fn principal_id(&self) -> &str {
        &self.primary_authentication.principal().id
    }

    pub fn service(&self) -> &Service {
        &self.service
    }

    pub fn is_from_new_login(&self) -> bool {
        self.from_new_login
    }
}

pub struct CentralAuthenticationService {
    registry: Arc<dyn TicketRegistry>,
    transaction_manager: Arc<DefaultAuthenticationTransactionManager>,
    id_generator: Arc<dyn TicketIdGenerator>,
    policies: TicketExpirationPolicies,
    service_match: ServiceMatchStrategy,
    id_attempts: u32,
}

impl CentralAuthenticationService {
    pub fn new(
        registry: Arc<dyn TicketRegistry>,
        transaction_manager: Arc<DefaultAuthenticationTransactionManager>,
        id_generator: Arc<dyn TicketIdGenerator>,
        policies: TicketExpirationPolicies,
    ) -> Self {
        Self {
            registry,
            transaction_manager,
            id_generator,
            policies,
            service_match: ServiceMatchStrategy::default(),
            id_attempts: DEFAULT_ID_ATTEMPTS,
        }
    }

    pub fn with_service_match_strategy(mut self, strategy: ServiceMatchStrategy) -> Self {
        self.service_match = strategy;
        self
    }

    pub fn with_id_attempts(mut self, attempts: u32) -> Self {
        self.id_attempts = attempts.max(1);
        self
    }

    pub fn registry(&self) -> &Arc<dyn TicketRegistry> {
        &self.registry
    }

    pub fn policies(&self) -> &TicketExpirationPolicies {
        &self.policies
    }

    /// Run every transaction and merge the results.
    ///
    /// # Errors
    ///
    /// The first failing transaction's error. `BadCredentials` if no
    /// transaction carried credentials.
    #[instrument(skip_all, fields(request_id = %ctx.request_id, transactions = transactions.len()))]
    pub async fn authenticate(
        &self,
        ctx: &RequestContext,
        transactions: &[AuthenticationTransaction],
    ) -> Result<AuthenticationResult, CasError> {
        let start = Instant::now();
        let outcome = self.authenticate_inner(transactions).await;

        match &outcome {
            Ok(result) => {
                record_authentication("success", None, start.elapsed());
                info!(
                    target: "cas.service",
                    request_id = %ctx.request_id,
                    client_ip = ?ctx.client_ip,
                    principal = %hash_for_correlation(&result.authentication().principal().id),
                    "Authentication succeeded"
                );
            }
            Err(e) => {
                let category = ErrorCategory::from(e);
                record_authentication("error", Some(category.as_str()), start.elapsed());
                info!(
                    target: "cas.service",
                    request_id = %ctx.request_id,
                    client_ip = ?ctx.client_ip,
                    error = %e,
                    "Authentication failed"
                );
            }
        }
        outcome
    }

    async fn authenticate_inner(
        &self,
        transactions: &[AuthenticationTransaction],
    ) -> Result<AuthenticationResult, CasError> {
        let mut builder = AuthenticationResultBuilder::new();
        for transaction in transactions {
            self.transaction_manager
                .handle(transaction, &mut builder)
                .await?;
        }
        let service = transactions.iter().find_map(|t| t.service().cloned());
        builder.build(service).ok_or(CasError::BadCredentials)
    }

    /// Start an SSO session. Returns the new TGT id.
    #[instrument(skip_all, fields(request_id = %ctx.request_id))]
    pub async fn create_ticket_granting_ticket(
        &self,
        ctx: &RequestContext,
        authentication: Arc<Authentication>,
    ) -> Result<String, CasError> {
        let now = Utc::now();
        let policy = &self.policies.ticket_granting;
        let tgt = self
            .issue(TicketKind::TicketGranting, |id| {
                Ticket::ticket_granting(id, authentication.clone(), policy.clone(), now)
            })
            .await?;

        info!(
            target: "cas.service",
            request_id = %ctx.request_id,
            ticket = %hash_for_correlation(tgt.id()),
            principal = %hash_for_correlation(&authentication.principal().id),
            "Ticket-granting ticket created"
        );
        Ok(tgt.id().to_string())
    }

    /// Issue a service ticket from a live TGT. Returns the ST id.
    ///
    /// `fresh` carries credentials presented with this request (renew).
    ///
    /// # Errors
    ///
    /// - `TicketNotFound` if the TGT does not exist
    /// - `TicketExpired` if it exists but expired
    /// - `MixedPrincipal` if `fresh` authenticated someone else
    #[instrument(skip_all, fields(request_id = %ctx.request_id, service = %service))]
    pub async fn grant_service_ticket(
        &self,
        ctx: &RequestContext,
        tgt_id: &str,
        service: &Service,
        fresh: Option<&AuthenticationResult>,
    ) -> Result<String, CasError> {
        let now = Utc::now();
        let mut tgt = self
            .resolve_granting_ticket(tgt_id, TicketKind::TicketGranting, now)
            .await?;

        let credential_provided = match fresh {
            Some(result) => {
                let session_principal = tgt
                    .authentication()
                    .map(|a| a.principal().id.as_str())
                    .unwrap_or_default();
                if result.authentication().principal().id != session_principal {
                    warn!(
                        target: "cas.service",
                        request_id = %ctx.request_id,
                        ticket = %hash_for_correlation(tgt_id),
                        "Fresh credentials resolved to a different principal"
                    );
                    return Err(CasError::MixedPrincipal);
                }
                true
            }
            None => false,
        };
        let from_new_login = credential_provided || tgt.usage().count_of_uses == 0;

        let policy = &self.policies.service;
        let st = self
            .issue(TicketKind::Service, |id| {
                Ticket::service(id, tgt_id, service.clone(), from_new_login, policy.clone(), now)
            })
            .await?;

        tgt.record_use(now);
        tgt.record_granted_service(st.id(), service.clone())?;
        self.persist_parent_or_discard(&tgt, &st).await?;

        debug!(
            target: "cas.service",
            request_id = %ctx.request_id,
            ticket = %hash_for_correlation(st.id()),
            from_new_login = from_new_login,
            "Service ticket granted"
        );
        Ok(st.id().to_string())
    }

    /// Validate an ST or PT for `service`.
    ///
    /// Single-use tickets are consumed atomically: of any number of
    /// concurrent validations, exactly one can succeed. Missing, expired,
    /// consumed and orphaned tickets all fail with `TicketNotFound`.
    #[instrument(skip_all, fields(request_id = %ctx.request_id, service = %service))]
    pub async fn validate_service_ticket(
        &self,
        ctx: &RequestContext,
        ticket_id: &str,
        service: &Service,
    ) -> Result<Assertion, CasError> {
        let start = Instant::now();
        let outcome = self.validate_inner(ticket_id, service).await;

        match &outcome {
            Ok(assertion) => {
                record_ticket_validation("success", None, start.elapsed());
                info!(
                    target: "cas.service",
                    request_id = %ctx.request_id,
                    ticket = %hash_for_correlation(ticket_id),
                    principal = %hash_for_correlation(assertion.principal_id()),
                    "Service ticket validated"
                );
            }
            Err(e) => {
                let category = ErrorCategory::from(e);
                record_ticket_validation("error", Some(category.as_str()), start.elapsed());
                info!(
                    target: "cas.service",
                    request_id = %ctx.request_id,
                    ticket = %hash_for_correlation(ticket_id),
                    error = %e,
                    "Service ticket validation failed"
                );
            }
        }
        outcome
    }

    async fn validate_inner(&self, ticket_id: &str, service: &Service) -> Result<Assertion, CasError> {
        let now = Utc::now();
        let access_kinds = [TicketKind::Service, TicketKind::Proxy];

        let stored = match self.registry.fetch_ticket(ticket_id).await? {
            Some(ticket) if access_kinds.contains(&ticket.kind()) => ticket,
            _ => return Err(CasError::TicketNotFound),
        };

        let ticket = if stored.expiration_policy().is_single_use() {
            // Whoever takes the ticket owns this validation
            let Some(mut taken) = self.registry.take_ticket(ticket_id).await? else {
                return Err(CasError::TicketNotFound);
            };
            if taken.is_expired_at(now) {
                return Err(CasError::TicketNotFound);
            }
            taken.record_use(now);
            taken
        } else {
            self.record_multi_use(stored, now).await?
        };

        // An orphan fails here whatever service it is presented for
        let chain = self.resolve_chain(&ticket, now).await?;
        let primary = chain.last().cloned().ok_or(CasError::TicketNotFound)?;

        let bound = ticket.service_target().ok_or(CasError::TicketNotFound)?;
        if !bound.matches(service, self.service_match) {
            return Err(CasError::ServiceMismatch {
                requested: service.id().to_string(),
            });
        }

        Ok(Assertion {
            primary_authentication: primary,
            chained_authentications: chain,
            service: bound.clone(),
            from_new_login: ticket.is_from_new_login(),
        })
    }

    /// Record one use of a multi-use ticket.
    ///
    /// The use is written back only against the use count it was checked
    /// at. A validator that loses the race re-reads the ticket and checks
    /// again, so `number_of_uses` holds under concurrent validation.
    async fn record_multi_use(
        &self,
        mut stored: Ticket,
        now: DateTime<Utc>,
    ) -> Result<Ticket, CasError> {
        for attempt in 1..=MAX_USE_ATTEMPTS {
            if stored.is_expired_at(now) {
                self.discard(stored.id()).await;
                return Err(CasError::TicketNotFound);
            }

            let expected_uses = stored.usage().count_of_uses;
            let mut used = stored.clone();
            used.record_use(now);
            let recorded = if used.is_expired_at(now) {
                // Last permitted use
                self.registry
                    .take_ticket_if_uses(used.id(), expected_uses)
                    .await?
                    .is_some()
            } else {
                self.registry
                    .update_ticket_if_uses(&used, expected_uses)
                    .await?
            };
            if recorded {
                return Ok(used);
            }

            debug!(
                target: "cas.service",
                ticket = %hash_for_correlation(used.id()),
                attempt = attempt,
                "Concurrent use recorded first, re-reading ticket"
            );
            stored = match self.registry.fetch_ticket(used.id()).await? {
                Some(ticket) => ticket,
                None => return Err(CasError::TicketNotFound),
            };
        }

        Err(CasError::RegistryUnavailable(format!(
            "could not record ticket use after {MAX_USE_ATTEMPTS} attempts"
        )))
    }

    /// Issue a PGT from a live ST or PT. Returns the PGT id.
    ///
    /// The PGT is recorded under the ticket that issued the ST, so logging
    /// out the session revokes it. An ST can issue at most one PGT.
    #[instrument(skip_all, fields(request_id = %ctx.request_id))]
    pub async fn create_proxy_granting_ticket(
        &self,
        ctx: &RequestContext,
        service_ticket_id: &str,
        proxy_authentication: &AuthenticationResult,
    ) -> Result<String, CasError> {
        let now = Utc::now();
        let mut st = self
            .registry
            .get_ticket(service_ticket_id, &[TicketKind::Service, TicketKind::Proxy])
            .await?;
        if st.issued_proxy_granting_ticket().is_some() {
            return Err(CasError::InvalidTicketOperation(
                "service ticket already issued a proxy-granting ticket".to_string(),
            ));
        }

        let parent_id = st
            .parent_id()
            .ok_or(CasError::TicketNotFound)?
            .to_string();
        let mut parent = self
            .registry
            .get_ticket(&parent_id, &[TicketKind::TicketGranting, TicketKind::ProxyGranting])
            .await?;

        let proxied_by = proxy_authentication
            .service()
            .or(st.service_target())
            .cloned()
            .ok_or(CasError::TicketNotFound)?;
        let authentication = proxy_authentication.authentication().clone();
        let policy = &self.policies.proxy_granting;
        let pgt = self
            .issue(TicketKind::ProxyGranting, |id| {
                Ticket::proxy_granting(
                    id,
                    authentication.clone(),
                    parent_id.as_str(),
                    proxied_by.clone(),
                    policy.clone(),
                    now,
                )
            })
            .await?;

        // The ST is marked last, so a failure on either write leaves it able
        // to issue a PGT again. A stale id left on the parent is skipped by
        // the logout cascade.
        parent.record_proxy_granting_ticket(pgt.id())?;
        self.persist_parent_or_discard(&parent, &pgt).await?;

        st.mark_proxy_granting_ticket_issued(pgt.id())?;
        self.persist_parent_or_discard(&st, &pgt).await?;

        info!(
            target: "cas.service",
            request_id = %ctx.request_id,
            ticket = %hash_for_correlation(pgt.id()),
            proxied_by = %proxied_by,
            "Proxy-granting ticket created"
        );
        Ok(pgt.id().to_string())
    }

    /// Issue a PT from a live PGT. Returns the PT id.
    #[instrument(skip_all, fields(request_id = %ctx.request_id, service = %service))]
    pub async fn grant_proxy_ticket(
        &self,
        ctx: &RequestContext,
        pgt_id: &str,
        service: &Service,
    ) -> Result<String, CasError> {
        let now = Utc::now();
        let mut pgt = self
            .resolve_granting_ticket(pgt_id, TicketKind::ProxyGranting, now)
            .await?;

        // The session the PGT hangs off must still be alive
        self.resolve_chain(&pgt, now).await?;

        let policy = &self.policies.proxy;
        let pt = self
            .issue(TicketKind::Proxy, |id| {
                Ticket::proxy(id, pgt_id, service.clone(), policy.clone(), now)
            })
            .await?;

        pgt.record_use(now);
        pgt.record_granted_service(pt.id(), service.clone())?;
        self.persist_parent_or_discard(&pgt, &pt).await?;

        debug!(
            target: "cas.service",
            request_id = %ctx.request_id,
            ticket = %hash_for_correlation(pt.id()),
            "Proxy ticket granted"
        );
        Ok(pt.id().to_string())
    }

    /// Log out: remove a TGT and everything issued from it.
    ///
    /// Returns the number of tickets removed; 0 if the TGT does not exist.
    #[instrument(skip_all, fields(request_id = %ctx.request_id))]
    pub async fn destroy_ticket_granting_ticket(
        &self,
        ctx: &RequestContext,
        tgt_id: &str,
    ) -> Result<usize, CasError> {
        match self.registry.fetch_ticket(tgt_id).await? {
            Some(ticket) if ticket.kind() == TicketKind::TicketGranting => {}
            _ => {
                debug!(
                    target: "cas.service",
                    request_id = %ctx.request_id,
                    ticket = %hash_for_correlation(tgt_id),
                    "No ticket-granting ticket to destroy"
                );
                return Ok(0);
            }
        }

        let removed = self.registry.delete_ticket(tgt_id).await?;
        record_tickets_destroyed(removed);
        info!(
            target: "cas.service",
            request_id = %ctx.request_id,
            ticket = %hash_for_correlation(tgt_id),
            removed = removed,
            "Ticket-granting ticket destroyed"
        );
        Ok(removed)
    }

    /// Fetch a live ticket of one of the given kinds.
    pub async fn get_ticket(
        &self,
        _ctx: &RequestContext,
        ticket_id: &str,
        kinds: &[TicketKind],
    ) -> Result<Ticket, CasError> {
        self.registry.get_ticket(ticket_id, kinds).await
    }

    /// Live SSO sessions (unexpired TGTs).
    pub async fn session_count(&self) -> Result<usize, CasError> {
        self.count_live(&[TicketKind::TicketGranting]).await
    }

    /// Live service and proxy tickets.
    pub async fn service_ticket_count(&self) -> Result<usize, CasError> {
        self.count_live(&[TicketKind::Service, TicketKind::Proxy])
            .await
    }

    /// Stored tickets, expired or not.
    pub async fn count_tickets(&self) -> Result<usize, CasError> {
        self.registry.count_tickets().await
    }

    async fn count_live(&self, kinds: &[TicketKind]) -> Result<usize, CasError> {
        let now = Utc::now();
        let count = self
            .registry
            .get_tickets(
                |t| kinds.contains(&t.kind()) && !t.is_expired_at(now),
                DEFAULT_SCAN_BATCH_SIZE,
            )
            .count()
            .await;
        count
    }

    /// Store a new ticket under a fresh id, regenerating on collision.
    async fn issue<F>(&self, kind: TicketKind, build: F) -> Result<Ticket, CasError>
    where
        F: Fn(String) -> Ticket + Send + Sync,
    {
        for attempt in 1..=self.id_attempts {
            let ticket = build(self.id_generator.new_ticket_id(kind)?);
            match self.registry.add_ticket(&ticket).await {
                Ok(()) => {
                    record_ticket_issued(kind.as_str());
                    return Ok(ticket);
                }
                Err(CasError::DuplicateTicketId(_)) => {
                    record_ticket_id_collision(kind.as_str());
                    warn!(
                        target: "cas.service",
                        kind = %kind.as_str(),
                        attempt = attempt,
                        "Ticket id collision, regenerating"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Err(CasError::RegistryUnavailable(format!(
            "could not allocate a unique {} id after {} attempts",
            kind,
            self.id_attempts
        )))
    }

    /// Resolve a granting ticket, keeping expired apart from missing.
    async fn resolve_granting_ticket(
        &self,
        id: &str,
        kind: TicketKind,
        now: DateTime<Utc>,
    ) -> Result<Ticket, CasError> {
        match self.registry.lookup_ticket(id, &[kind], now).await? {
            TicketLookup::Active(ticket) => Ok(ticket),
            TicketLookup::Expired => Err(CasError::TicketExpired),
            TicketLookup::Missing => Err(CasError::TicketNotFound),
        }
    }

    /// Authentications of every granting ticket above `ticket`, nearest
    /// first, ending with the root TGT.
    ///
    /// Fails with `TicketNotFound` if any link is missing or expired.
    async fn resolve_chain(
        &self,
        ticket: &Ticket,
        now: DateTime<Utc>,
    ) -> Result<Vec<Arc<Authentication>>, CasError> {
        let mut chain = Vec::new();
        if let Some(own) = ticket.authentication() {
            chain.push(own.clone());
        }

        let mut next = ticket.parent_id().map(str::to_string);
        while let Some(parent_id) = next {
            if chain.len() > MAX_CHAIN_DEPTH {
                return Err(CasError::InvalidTicketOperation(
                    "proxy chain too deep".to_string(),
                ));
            }
            let parent = match self
                .registry
                .lookup_ticket(
                    &parent_id,
                    &[TicketKind::TicketGranting, TicketKind::ProxyGranting],
                    now,
                )
                .await?
            {
                TicketLookup::Active(parent) => parent,
                TicketLookup::Expired | TicketLookup::Missing => {
                    debug!(
                        target: "cas.service",
                        ticket = %hash_for_correlation(ticket.id()),
                        "Granting ticket no longer live"
                    );
                    return Err(CasError::TicketNotFound);
                }
            };
            if let Some(auth) = parent.authentication() {
                chain.push(auth.clone());
            }
            next = parent.parent_id().map(str::to_string);
        }
        Ok(chain)
    }

    /// Persist `parent` after recording `child` on it. If that fails,
    /// remove `child` again and surface the failure.
    async fn persist_parent_or_discard(&self, parent: &Ticket, child: &Ticket) -> Result<(), CasError> {
        if let Err(e) = self.registry.update_ticket(parent).await {
            warn!(
                target: "cas.service",
                parent = %hash_for_correlation(parent.id()),
                error = %e,
                "Failed to record child ticket on parent, discarding child"
            );
            self.discard(child.id()).await;
            return Err(e);
        }
        Ok(())
    }

    /// Best-effort removal of a single ticket.
    async fn discard(&self, id: &str) {
        if let Err(e) = self.registry.take_ticket(id).await {
            warn!(
                target: "cas.service",
                ticket = %hash_for_correlation(id),
                error = %e,
                "Failed to remove ticket"
            );
        }
    }
}
