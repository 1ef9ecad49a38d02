//! Ticket expiration policies.
//!
//! A policy is an immutable value owned by the ticket it was issued with.
//! Expiration is always computed from the ticket's recorded usage state and
//! the current instant; policies never mutate the ticket.
//!
//! # Variants
//!
//! | Policy | Expires when |
//! |---|---|
//! | `NeverExpires` | never |
//! | `HardTimeout` | `now >= created + time_to_kill` |
//! | `Timeout` | `now >= last_used + time_to_kill` (sliding idle window) |
//! | `MultiTimeUseOrTimeout` | `uses >= number_of_uses` OR `now >= created + time_to_kill` |
//! | `TicketGrantingTicket` | `now >= created + max_time_to_live` OR `now >= last_used + time_to_kill` |
//! | `ThrottledUseAndTimeout` | idle timeout, or re-used within `time_in_between_uses` |
//! | `RememberMeDelegating` | delegates on the remember-me flag of the authentication |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Recorded state of a ticket that expiration policies read.
pub trait TicketState {
    fn creation_time(&self) -> DateTime<Utc>;

    fn last_time_used(&self) -> DateTime<Utc>;

    fn previous_time_used(&self) -> Option<DateTime<Utc>>;

    fn count_of_uses(&self) -> u32;

    /// Whether the authentication behind this ticket asked to be remembered.
    fn is_remember_me(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "kebab-case")]
pub enum ExpirationPolicy {
    NeverExpires,
    HardTimeout {
        time_to_kill: Duration,
    },
    Timeout {
        time_to_kill: Duration,
    },
    MultiTimeUseOrTimeout {
        number_of_uses: u32,
        time_to_kill: Duration,
    },
    TicketGrantingTicket {
        max_time_to_live: Duration,
        time_to_kill: Duration,
    },
    ThrottledUseAndTimeout {
        time_to_kill: Duration,
        time_in_between_uses: Duration,
    },
    RememberMeDelegating {
        remember_me: Box<ExpirationPolicy>,
        session: Box<ExpirationPolicy>,
    },
}

impl ExpirationPolicy {
    /// Check expiration against the current instant.
    ///
    /// A missing ticket (`None`) is always expired.
    pub fn is_expired(&self, state: Option<&dyn TicketState>) -> bool {
        self.is_expired_at(state, Utc::now())
    }

    /// Check expiration against an explicit instant.
    pub fn is_expired_at(&self, state: Option<&dyn TicketState>, now: DateTime<Utc>) -> bool {
        let Some(state) = state else {
            return true;
        };

        match self {
            ExpirationPolicy::NeverExpires => false,
            ExpirationPolicy::HardTimeout { time_to_kill } => {
                elapsed(state.creation_time(), now) >= *time_to_kill
            }
            ExpirationPolicy::Timeout { time_to_kill } => {
                elapsed(state.last_time_used(), now) >= *time_to_kill
            }
            ExpirationPolicy::MultiTimeUseOrTimeout {
                number_of_uses,
                time_to_kill,
            } => {
                state.count_of_uses() >= *number_of_uses
                    || elapsed(state.creation_time(), now) >= *time_to_kill
            }
            ExpirationPolicy::TicketGrantingTicket {
                max_time_to_live,
                time_to_kill,
            } => {
                elapsed(state.creation_time(), now) >= *max_time_to_live
                    || elapsed(state.last_time_used(), now) >= *time_to_kill
            }
            ExpirationPolicy::ThrottledUseAndTimeout {
                time_to_kill,
                time_in_between_uses,
            } => {
                let idle = elapsed(state.last_time_used(), now);
                if idle >= *time_to_kill {
                    return true;
                }
                if state.count_of_uses() == 0 {
                    return false;
                }
                if idle <= *time_in_between_uses {
                    warn!(
                        target: "cas.tickets.expiration",
                        "Ticket is being used too frequently"
                    );
                    return true;
                }
                false
            }
            ExpirationPolicy::RememberMeDelegating {
                remember_me,
                session,
            } => {
                if state.is_remember_me() {
                    remember_me.is_expired_at(Some(state), now)
                } else {
                    session.is_expired_at(Some(state), now)
                }
            }
        }
    }

    /// Hard lifetime measured from creation, if the policy has one.
    pub fn time_to_live(&self) -> Option<Duration> {
        match self {
            ExpirationPolicy::NeverExpires
            | ExpirationPolicy::Timeout { .. }
            | ExpirationPolicy::ThrottledUseAndTimeout { .. } => None,
            ExpirationPolicy::HardTimeout { time_to_kill }
            | ExpirationPolicy::MultiTimeUseOrTimeout { time_to_kill, .. } => Some(*time_to_kill),
            ExpirationPolicy::TicketGrantingTicket {
                max_time_to_live, ..
            } => Some(*max_time_to_live),
            ExpirationPolicy::RememberMeDelegating {
                remember_me,
                session,
            } => longest(remember_me.time_to_live(), session.time_to_live()),
        }
    }

    /// Idle window measured from last use, if the policy has one.
    pub fn time_to_idle(&self) -> Option<Duration> {
        match self {
            ExpirationPolicy::NeverExpires
            | ExpirationPolicy::HardTimeout { .. }
            | ExpirationPolicy::MultiTimeUseOrTimeout { .. } => None,
            ExpirationPolicy::Timeout { time_to_kill }
            | ExpirationPolicy::TicketGrantingTicket { time_to_kill, .. }
            | ExpirationPolicy::ThrottledUseAndTimeout { time_to_kill, .. } => Some(*time_to_kill),
            ExpirationPolicy::RememberMeDelegating {
                remember_me,
                session,
            } => longest(remember_me.time_to_idle(), session.time_to_idle()),
        }
    }

    /// Time left before the ticket expires on the clock alone, ignoring
    /// usage counts. `None` means the clock never expires it.
    ///
    /// Backends with native key expiry use this as the key TTL.
    pub fn time_remaining(&self, state: &dyn TicketState, now: DateTime<Utc>) -> Option<Duration> {
        match self {
            ExpirationPolicy::NeverExpires => None,
            ExpirationPolicy::HardTimeout { time_to_kill }
            | ExpirationPolicy::MultiTimeUseOrTimeout { time_to_kill, .. } => {
                Some(remaining(state.creation_time(), *time_to_kill, now))
            }
            ExpirationPolicy::Timeout { time_to_kill }
            | ExpirationPolicy::ThrottledUseAndTimeout { time_to_kill, .. } => {
                Some(remaining(state.last_time_used(), *time_to_kill, now))
            }
            ExpirationPolicy::TicketGrantingTicket {
                max_time_to_live,
                time_to_kill,
            } => Some(
                remaining(state.creation_time(), *max_time_to_live, now)
                    .min(remaining(state.last_time_used(), *time_to_kill, now)),
            ),
            ExpirationPolicy::RememberMeDelegating {
                remember_me,
                session,
            } => {
                if state.is_remember_me() {
                    remember_me.time_remaining(state, now)
                } else {
                    session.time_remaining(state, now)
                }
            }
        }
    }

    /// Whether a ticket under this policy is spent by its first use.
    pub fn is_single_use(&self) -> bool {
        matches!(
            self,
            ExpirationPolicy::MultiTimeUseOrTimeout { number_of_uses, .. } if *number_of_uses <= 1
        )
    }
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}

fn remaining(since: DateTime<Utc>, budget: Duration, now: DateTime<Utc>) -> Duration {
    budget.saturating_sub(elapsed(since, now))
}

fn longest(a: Option<Duration>, b: Option<Duration>) -> Option<Duration> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}
