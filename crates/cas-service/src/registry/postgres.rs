//! PostgreSQL-backed ticket registry.
//!
//! # Security
//!
//! - All queries use parameterized statements
//! - Ticket bodies and the connection URL are never logged
//!
//! Single-use consumption relies on `DELETE ... RETURNING`, which removes
//! and returns the row in one statement; concurrent callers see exactly one
//! winner.

use crate::errors::CasError;
use crate::registry::{TicketPage, TicketRegistry};
use crate::tickets::{Ticket, TicketState};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{error, instrument};

#[derive(Clone)]
pub struct PostgresTicketRegistry {
    pool: PgPool,
}

impl PostgresTicketRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a connection pool.
    ///
    /// # Errors
    ///
    /// Returns `CasError::RegistryUnavailable` if the database is unreachable.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, CasError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await
            .map_err(|e| {
                error!(target: "cas.registry.postgres", error = %e, "Failed to connect to database");
                CasError::RegistryUnavailable(format!("Failed to connect to database: {e}"))
            })?;
        Ok(Self::new(pool))
    }

    /// Apply pending migrations.
    pub async fn migrate(&self) -> Result<(), CasError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| CasError::RegistryUnavailable(format!("Migration failed: {e}")))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl TicketRegistry for PostgresTicketRegistry {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    #[instrument(skip_all)]
    async fn add_ticket(&self, ticket: &Ticket) -> Result<(), CasError> {
        let result = sqlx::query(
            r#"
            INSERT INTO cas_tickets (id, kind, parent_id, body, creation_time, last_time_used)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(ticket.id())
        .bind(ticket.kind().as_str())
        .bind(ticket.parent_id())
        .bind(Json(ticket))
        .bind(ticket.creation_time())
        .bind(ticket.last_time_used())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CasError::DuplicateTicketId(ticket.id().to_string()));
        }
        Ok(())
    }

    async fn fetch_ticket(&self, id: &str) -> Result<Option<Ticket>, CasError> {
        let row: Option<(Json<Ticket>,)> =
            sqlx::query_as("SELECT body FROM cas_tickets WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(Json(ticket),)| ticket))
    }

    #[instrument(skip_all)]
    async fn update_ticket(&self, ticket: &Ticket) -> Result<(), CasError> {
        let result = sqlx::query(
            r#"
            UPDATE cas_tickets
            SET body = $2, last_time_used = $3
            WHERE id = $1
            "#,
        )
        .bind(ticket.id())
        .bind(Json(ticket))
        .bind(ticket.last_time_used())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CasError::TicketNotFound);
        }
        Ok(())
    }

    async fn take_ticket(&self, id: &str) -> Result<Option<Ticket>, CasError> {
        let row: Option<(Json<Ticket>,)> =
            sqlx::query_as("DELETE FROM cas_tickets WHERE id = $1 RETURNING body")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(Json(ticket),)| ticket))
    }

    #[instrument(skip_all)]
    async fn update_ticket_if_uses(
        &self,
        ticket: &Ticket,
        expected_uses: u32,
    ) -> Result<bool, CasError> {
        let result = sqlx::query(
            r#"
            UPDATE cas_tickets
            SET body = $2, last_time_used = $3
            WHERE id = $1 AND (body->'usage'->>'count_of_uses')::BIGINT = $4
            "#,
        )
        .bind(ticket.id())
        .bind(Json(ticket))
        .bind(ticket.last_time_used())
        .bind(i64::from(expected_uses))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn take_ticket_if_uses(
        &self,
        id: &str,
        expected_uses: u32,
    ) -> Result<Option<Ticket>, CasError> {
        let row: Option<(Json<Ticket>,)> = sqlx::query_as(
            r#"
            DELETE FROM cas_tickets
            WHERE id = $1 AND (body->'usage'->>'count_of_uses')::BIGINT = $2
            RETURNING body
            "#,
        )
        .bind(id)
        .bind(i64::from(expected_uses))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(Json(ticket),)| ticket))
    }

    async fn scan_tickets(
        &self,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<TicketPage, CasError> {
        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<(String, Json<Ticket>)> = sqlx::query_as(
            r#"
            SELECT id, body FROM cas_tickets
            WHERE $1::TEXT IS NULL OR id > $1
            ORDER BY id
            LIMIT $2
            "#,
        )
        .bind(cursor)
        .bind(limit_i64)
        .fetch_all(&self.pool)
        .await?;

        let next_cursor = if rows.len() == limit {
            rows.last().map(|(id, _)| id.clone())
        } else {
            None
        };
        Ok(TicketPage {
            tickets: rows.into_iter().map(|(_, Json(t))| t).collect(),
            next_cursor,
        })
    }

    async fn count_tickets(&self) -> Result<usize, CasError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM cas_tickets")
            .fetch_one(&self.pool)
            .await?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}
