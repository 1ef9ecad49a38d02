//! Redis-backed ticket registry.
//!
//! # Key Patterns
//!
//! - `cas:ticket:{id}` - ticket record (JSON)
//!
//! Every key carries a `PX` expiry derived from the ticket's expiration
//! policy, so Redis evicts expired tickets itself and the background cleaner
//! skips this backend. Lazy expiration in the registry still applies on
//! read for policies that also expire on use count.
//!
//! # Connection Pattern
//!
//! The `MultiplexedConnection` is cheap to clone and safe to use
//! concurrently; each operation clones it.

use crate::errors::CasError;
use crate::registry::{TicketPage, TicketRegistry};
use crate::tickets::Ticket;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::{Client, Script};
use tracing::{error, instrument, warn};

const KEY_PREFIX: &str = "cas:ticket:";

/// Atomic get-and-delete.
///
/// Arguments:
/// - KEYS[1]: ticket key
///
/// Returns the stored value, or nil if absent.
const TAKE_TICKET: &str = r#"
local value = redis.call('GET', KEYS[1])
if value then
    redis.call('DEL', KEYS[1])
end
return value
"#;

/// Compare-and-set on the stored use count.
///
/// Arguments:
/// - KEYS[1]: ticket key
/// - ARGV[1]: expected `count_of_uses`
/// - ARGV[2]: new record
/// - ARGV[3]: expiry in milliseconds, or empty for none
///
/// Returns 1 if written, 0 if the count moved on or the key is gone.
const UPDATE_TICKET_IF_USES: &str = r#"
local value = redis.call('GET', KEYS[1])
if not value then
    return 0
end
local stored = cjson.decode(value)
if tonumber(stored.usage.count_of_uses) ~= tonumber(ARGV[1]) then
    return 0
end
if ARGV[3] ~= '' then
    redis.call('SET', KEYS[1], ARGV[2], 'PX', ARGV[3])
else
    redis.call('SET', KEYS[1], ARGV[2])
end
return 1
"#;

/// Get-and-delete guarded by the stored use count.
///
/// Arguments:
/// - KEYS[1]: ticket key
/// - ARGV[1]: expected `count_of_uses`
///
/// Returns the removed value, or nil.
const TAKE_TICKET_IF_USES: &str = r#"
local value = redis.call('GET', KEYS[1])
if not value then
    return false
end
local stored = cjson.decode(value)
if tonumber(stored.usage.count_of_uses) ~= tonumber(ARGV[1]) then
    return false
end
redis.call('DEL', KEYS[1])
return value
"#;

#[derive(Clone)]
pub struct RedisTicketRegistry {
    connection: MultiplexedConnection,
    take_script: Script,
    update_if_uses_script: Script,
    take_if_uses_script: Script,
}

impl RedisTicketRegistry {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns `CasError::RegistryUnavailable` if the connection fails.
    pub async fn connect(redis_url: &str) -> Result<Self, CasError> {
        // Do NOT log redis_url, it may carry credentials
        let client = Client::open(redis_url).map_err(|e| {
            error!(target: "cas.registry.redis", error = %e, "Failed to open Redis client");
            CasError::RegistryUnavailable(format!("Failed to open Redis client: {e}"))
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                error!(target: "cas.registry.redis", error = %e, "Failed to connect to Redis");
                CasError::RegistryUnavailable(format!("Failed to connect to Redis: {e}"))
            })?;

        Ok(Self::from_connection(connection))
    }

    pub fn from_connection(connection: MultiplexedConnection) -> Self {
        Self {
            connection,
            take_script: Script::new(TAKE_TICKET),
            update_if_uses_script: Script::new(UPDATE_TICKET_IF_USES),
            take_if_uses_script: Script::new(TAKE_TICKET_IF_USES),
        }
    }
}

fn key(id: &str) -> String {
    format!("{KEY_PREFIX}{id}")
}

/// Key expiry in milliseconds, at least 1ms. `None` means no expiry.
fn expiry_millis(ticket: &Ticket) -> Option<u64> {
    ticket
        .expiration_policy()
        .time_remaining(ticket, Utc::now())
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX).max(1))
}

/// Write `ticket` with `SET`, adding `condition` (`NX` or `XX`).
async fn set_ticket(
    conn: &mut MultiplexedConnection,
    ticket: &Ticket,
    condition: &str,
) -> Result<bool, CasError> {
    let body = serde_json::to_string(ticket)?;
    let mut cmd = redis::cmd("SET");
    cmd.arg(key(ticket.id())).arg(body).arg(condition);
    if let Some(ms) = expiry_millis(ticket) {
        cmd.arg("PX").arg(ms);
    }
    let reply: Option<String> = cmd.query_async(conn).await?;
    Ok(reply.is_some())
}

fn decode(id: &str, body: &str) -> Result<Ticket, CasError> {
    serde_json::from_str(body).map_err(|e| {
        warn!(target: "cas.registry.redis", ticket_key = %key(id), error = %e, "Corrupt ticket record");
        CasError::from(e)
    })
}

#[async_trait::async_trait]
impl TicketRegistry for RedisTicketRegistry {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    fn is_cleanable(&self) -> bool {
        false
    }

    #[instrument(skip_all)]
    async fn add_ticket(&self, ticket: &Ticket) -> Result<(), CasError> {
        let mut conn = self.connection.clone();
        if set_ticket(&mut conn, ticket, "NX").await? {
            Ok(())
        } else {
            Err(CasError::DuplicateTicketId(ticket.id().to_string()))
        }
    }

    async fn fetch_ticket(&self, id: &str) -> Result<Option<Ticket>, CasError> {
        let mut conn = self.connection.clone();
        let body: Option<String> = redis::cmd("GET").arg(key(id)).query_async(&mut conn).await?;
        body.map(|b| decode(id, &b)).transpose()
    }

    #[instrument(skip_all)]
    async fn update_ticket(&self, ticket: &Ticket) -> Result<(), CasError> {
        let mut conn = self.connection.clone();
        if set_ticket(&mut conn, ticket, "XX").await? {
            Ok(())
        } else {
            Err(CasError::TicketNotFound)
        }
    }

    async fn take_ticket(&self, id: &str) -> Result<Option<Ticket>, CasError> {
        let mut conn = self.connection.clone();
        let body: Option<String> = self
            .take_script
            .key(key(id))
            .invoke_async(&mut conn)
            .await?;
        body.map(|b| decode(id, &b)).transpose()
    }

    #[instrument(skip_all)]
    async fn update_ticket_if_uses(
        &self,
        ticket: &Ticket,
        expected_uses: u32,
    ) -> Result<bool, CasError> {
        let mut conn = self.connection.clone();
        let body = serde_json::to_string(ticket)?;
        let expiry = expiry_millis(ticket)
            .map(|ms| ms.to_string())
            .unwrap_or_default();
        let written: i64 = self
            .update_if_uses_script
            .key(key(ticket.id()))
            .arg(expected_uses)
            .arg(body)
            .arg(expiry)
            .invoke_async(&mut conn)
            .await?;
        Ok(written == 1)
    }

    async fn take_ticket_if_uses(
        &self,
        id: &str,
        expected_uses: u32,
    ) -> Result<Option<Ticket>, CasError> {
        let mut conn = self.connection.clone();
        let body: Option<String> = self
            .take_if_uses_script
            .key(key(id))
            .arg(expected_uses)
            .invoke_async(&mut conn)
            .await?;
        body.map(|b| decode(id, &b)).transpose()
    }

    async fn scan_tickets(
        &self,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<TicketPage, CasError> {
        let mut conn = self.connection.clone();
        let start: u64 = match cursor {
            Some(c) => c
                .parse()
                .map_err(|_| CasError::Internal(format!("invalid redis scan cursor: {c}")))?,
            None => 0,
        };

        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(start)
            .arg("MATCH")
            .arg(format!("{KEY_PREFIX}*"))
            .arg("COUNT")
            .arg(limit)
            .query_async(&mut conn)
            .await?;

        let mut tickets = Vec::with_capacity(keys.len());
        if !keys.is_empty() {
            let bodies: Vec<Option<String>> =
                redis::cmd("MGET").arg(&keys).query_async(&mut conn).await?;
            for (k, body) in keys.iter().zip(bodies) {
                // Expired or taken between SCAN and MGET
                let Some(body) = body else { continue };
                let id = k.strip_prefix(KEY_PREFIX).unwrap_or(k);
                tickets.push(decode(id, &body)?);
            }
        }

        Ok(TicketPage {
            tickets,
            next_cursor: (next != 0).then(|| next.to_string()),
        })
    }

    async fn count_tickets(&self) -> Result<usize, CasError> {
        let mut conn = self.connection.clone();
        let mut cursor: u64 = 0;
        let mut total = 0usize;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(format!("{KEY_PREFIX}*"))
                .arg("COUNT")
                .arg(1000)
                .query_async(&mut conn)
                .await?;
            total += keys.len();
            if next == 0 {
                return Ok(total);
            }
            cursor = next;
        }
    }
}
