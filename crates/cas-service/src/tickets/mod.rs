//! Tickets: the state-carrying entities of an SSO session.
//!
//! Tickets form a tree keyed by id. A granting ticket (TGT or PGT) records
//! the ids of everything it issued; an access ticket (ST or PT) records the
//! id of the granting ticket it came from. There are no live pointers between
//! tickets, so the whole tree serializes as independent records and every
//! lookup goes through the registry.
//!
//! Only usage bookkeeping and the recorded child ids change after creation.
//! The id, kind, expiration policy and authentication are fixed.

pub mod expiration;
pub mod id_generator;
pub mod service;

pub use expiration::{ExpirationPolicy, TicketState};
pub use id_generator::{HostNameBasedTicketIdGenerator, TicketIdGenerator};
pub use service::{Service, ServiceMatchStrategy};

use crate::authn::authentication::Authentication;
use crate::errors::CasError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// The four ticket kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TicketKind {
    TicketGranting,
    ProxyGranting,
    Service,
    Proxy,
}

impl TicketKind {
    pub const ALL: [TicketKind; 4] = [
        TicketKind::TicketGranting,
        TicketKind::ProxyGranting,
        TicketKind::Service,
        TicketKind::Proxy,
    ];

    /// Id prefix, without the separator.
    pub fn prefix(&self) -> &'static str {
        match self {
            TicketKind::TicketGranting => "TGT",
            TicketKind::ProxyGranting => "PGT",
            TicketKind::Service => "ST",
            TicketKind::Proxy => "PT",
        }
    }

    /// Short lowercase name for log fields and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketKind::TicketGranting => "tgt",
            TicketKind::ProxyGranting => "pgt",
            TicketKind::Service => "st",
            TicketKind::Proxy => "pt",
        }
    }

    /// Infer the kind from an id's prefix.
    pub fn from_id(id: &str) -> Option<TicketKind> {
        let (prefix, _) = id.split_once('-')?;
        TicketKind::ALL.into_iter().find(|k| k.prefix() == prefix)
    }

    /// TGTs and PGTs issue further tickets.
    pub fn is_granting(&self) -> bool {
        matches!(self, TicketKind::TicketGranting | TicketKind::ProxyGranting)
    }
}

impl fmt::Display for TicketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Usage bookkeeping read by expiration policies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageState {
    pub creation_time: DateTime<Utc>,
    pub last_time_used: DateTime<Utc>,
    pub previous_time_used: Option<DateTime<Utc>>,
    pub count_of_uses: u32,
}

impl UsageState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            creation_time: now,
            last_time_used: now,
            previous_time_used: None,
            count_of_uses: 0,
        }
    }

    pub fn record_use(&mut self, now: DateTime<Utc>) {
        self.previous_time_used = Some(self.last_time_used);
        self.last_time_used = now;
        self.count_of_uses = self.count_of_uses.saturating_add(1);
    }
}

/// State carried by a TGT or PGT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionGrant {
    pub authentication: Arc<Authentication>,
    /// Granting ticket this PGT hangs off. `None` for a TGT.
    pub parent_id: Option<String>,
    /// Proxy callback the PGT was issued to. `None` for a TGT.
    pub proxied_by: Option<Service>,
    /// Access tickets issued from this ticket, keyed by id.
    #[serde(default)]
    pub services: BTreeMap<String, Service>,
    /// PGTs chained below this ticket.
    #[serde(default)]
    pub proxy_granting_tickets: BTreeSet<String>,
}

/// State carried by an ST or PT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrant {
    pub granting_ticket_id: String,
    pub service: Service,
    pub from_new_login: bool,
    /// Set once a PGT has been issued from this ticket.
    pub proxy_granting_ticket_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "grant", rename_all = "kebab-case")]
pub enum TicketGrant {
    Session(SessionGrant),
    Access(AccessGrant),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    id: String,
    kind: TicketKind,
    usage: UsageState,
    expiration_policy: ExpirationPolicy,
    grant: TicketGrant,
}

impl Ticket {
    pub fn ticket_granting(
        id: impl Into<String>,
        authentication: Arc<Authentication>,
        expiration_policy: ExpirationPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: TicketKind::TicketGranting,
            usage: UsageState::new(now),
            expiration_policy,
            grant: TicketGrant::Session(SessionGrant {
                authentication,
                parent_id: None,
                proxied_by: None,
                services: BTreeMap::new(),
                proxy_granting_tickets: BTreeSet::new(),
            }),
        }
    }

    pub fn proxy_granting(
        id: impl Into<String>,
        authentication: Arc<Authentication>,
        parent_id: impl Into<String>,
        proxied_by: Service,
        expiration_policy: ExpirationPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: TicketKind::ProxyGranting,
            usage: UsageState::new(now),
            expiration_policy,
            grant: TicketGrant::Session(SessionGrant {
                authentication,
                parent_id: Some(parent_id.into()),
                proxied_by: Some(proxied_by),
                services: BTreeMap::new(),
                proxy_granting_tickets: BTreeSet::new(),
            }),
        }
    }

    pub fn service(
        id: impl Into<String>,
        granting_ticket_id: impl Into<String>,
        service: Service,
        from_new_login: bool,
        expiration_policy: ExpirationPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self::access(
            TicketKind::Service,
            id.into(),
            granting_ticket_id.into(),
            service,
            from_new_login,
            expiration_policy,
            now,
        )
    }

    pub fn proxy(
        id: impl Into<String>,
        proxy_granting_ticket_id: impl Into<String>,
        service: Service,
        expiration_policy: ExpirationPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self::access(
            TicketKind::Proxy,
            id.into(),
            proxy_granting_ticket_id.into(),
            service,
            false,
            expiration_policy,
            now,
        )
    }

    fn access(
        kind: TicketKind,
        id: String,
        granting_ticket_id: String,
        service: Service,
        from_new_login: bool,
        expiration_policy: ExpirationPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            kind,
            usage: UsageState::new(now),
            expiration_policy,
            grant: TicketGrant::Access(AccessGrant {
                granting_ticket_id,
                service,
                from_new_login,
                proxy_granting_ticket_id: None,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TicketKind {
        self.kind
    }

    pub fn usage(&self) -> &UsageState {
        &self.usage
    }

    pub fn expiration_policy(&self) -> &ExpirationPolicy {
        &self.expiration_policy
    }

    pub fn grant(&self) -> &TicketGrant {
        &self.grant
    }

    /// Derived on every call; never cached.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration_policy.is_expired_at(Some(self), now)
    }

    pub fn record_use(&mut self, now: DateTime<Utc>) {
        self.usage.record_use(now);
    }

    /// Authentication of a TGT or PGT.
    pub fn authentication(&self) -> Option<&Arc<Authentication>> {
        match &self.grant {
            TicketGrant::Session(session) => Some(&session.authentication),
            TicketGrant::Access(_) => None,
        }
    }

    /// The ticket this one was issued from, if any.
    pub fn parent_id(&self) -> Option<&str> {
        match &self.grant {
            TicketGrant::Session(session) => session.parent_id.as_deref(),
            TicketGrant::Access(access) => Some(access.granting_ticket_id.as_str()),
        }
    }

    /// Target service of an ST or PT.
    pub fn service_target(&self) -> Option<&Service> {
        match &self.grant {
            TicketGrant::Access(access) => Some(&access.service),
            TicketGrant::Session(_) => None,
        }
    }

    pub fn proxied_by(&self) -> Option<&Service> {
        match &self.grant {
            TicketGrant::Session(session) => session.proxied_by.as_ref(),
            TicketGrant::Access(_) => None,
        }
    }

    pub fn is_from_new_login(&self) -> bool {
        matches!(&self.grant, TicketGrant::Access(access) if access.from_new_login)
    }

    /// PGT already issued from this ST or PT, if any.
    pub fn issued_proxy_granting_ticket(&self) -> Option<&str> {
        match &self.grant {
            TicketGrant::Access(access) => access.proxy_granting_ticket_id.as_deref(),
            TicketGrant::Session(_) => None,
        }
    }

    pub fn granted_services(&self) -> Option<&BTreeMap<String, Service>> {
        match &self.grant {
            TicketGrant::Session(session) => Some(&session.services),
            TicketGrant::Access(_) => None,
        }
    }

    /// Ids removed along with this ticket on cascade delete.
    pub fn descendant_ids(&self) -> Vec<String> {
        match &self.grant {
            TicketGrant::Session(session) => session
                .services
                .keys()
                .chain(session.proxy_granting_tickets.iter())
                .cloned()
                .collect(),
            TicketGrant::Access(_) => Vec::new(),
        }
    }

    /// Record an ST or PT issued from this granting ticket.
    pub fn record_granted_service(
        &mut self,
        ticket_id: impl Into<String>,
        service: Service,
    ) -> Result<(), CasError> {
        match &mut self.grant {
            TicketGrant::Session(session) => {
                session.services.insert(ticket_id.into(), service);
                Ok(())
            }
            TicketGrant::Access(_) => Err(self.not_granting("record a granted service")),
        }
    }

    /// Record a PGT chained below this granting ticket.
    pub fn record_proxy_granting_ticket(
        &mut self,
        pgt_id: impl Into<String>,
    ) -> Result<(), CasError> {
        match &mut self.grant {
            TicketGrant::Session(session) => {
                session.proxy_granting_tickets.insert(pgt_id.into());
                Ok(())
            }
            TicketGrant::Access(_) => Err(self.not_granting("record a proxy-granting ticket")),
        }
    }

    /// Mark that a PGT was issued from this ST or PT. Allowed once.
    pub fn mark_proxy_granting_ticket_issued(
        &mut self,
        pgt_id: impl Into<String>,
    ) -> Result<(), CasError> {
        let kind = self.kind;
        match &mut self.grant {
            TicketGrant::Access(access) => {
                if access.proxy_granting_ticket_id.is_some() {
                    return Err(CasError::InvalidTicketOperation(format!(
                        "{kind} already issued a proxy-granting ticket"
                    )));
                }
                access.proxy_granting_ticket_id = Some(pgt_id.into());
                Ok(())
            }
            TicketGrant::Session(_) => Err(CasError::InvalidTicketOperation(format!(
                "{kind} cannot issue a proxy-granting ticket from validation"
            ))),
        }
    }

    fn not_granting(&self, operation: &str) -> CasError {
        CasError::InvalidTicketOperation(format!("{} cannot {}", self.kind, operation))
    }
}

impl TicketState for Ticket {
    fn creation_time(&self) -> DateTime<Utc> {
        self.usage.creation_time
    }

    fn last_time_used(&self) -> DateTime<Utc> {
        self.usage.last_time_used
    }

    fn previous_time_used(&self) -> Option<DateTime<Utc>> {
        self.usage.previous_time_used
    }

    fn count_of_uses(&self) -> u32 {
        self.usage.count_of_uses
    }

    fn is_remember_me(&self) -> bool {
        self.authentication().is_some_and(|a| a.is_remember_me())
    }
}
