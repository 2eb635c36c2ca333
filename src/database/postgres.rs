use async_trait::async_trait;
use serde_json::Value;
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgConnection;
use sqlx::{Connection as _, Postgres, Row};
use uuid::Uuid;

use crate::database::driver::{require_identifier, Connection, ConnectionId, RowScope, StoredRow};
use crate::database::manager::DatabaseError;
use crate::types::Page;

/// PostgreSQL session borrowed from a sqlx pool.
///
/// Rows live in tables shaped `(seq BIGSERIAL, id UUID PRIMARY KEY, tenant TEXT, data JSONB)`.
pub struct PgSession {
    conn: PoolConnection<Postgres>,
}

impl PgSession {
    pub fn new(conn: PoolConnection<Postgres>) -> Self {
        Self { conn }
    }
}

/// Point unqualified names at `schema`. PostgreSQL accepts a search_path
/// naming a missing schema, so existence is checked first.
pub(crate) async fn set_search_path(conn: &mut PgConnection, schema: &str) -> Result<(), DatabaseError> {
    require_identifier(schema)?;

    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM pg_namespace WHERE nspname = $1)")
            .bind(schema)
            .fetch_one(&mut *conn)
            .await?;
    if !exists {
        return Err(DatabaseError::UnknownSchema(schema.to_string()));
    }

    sqlx::query(&format!("SET search_path TO {}", quote_identifier(schema)))
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Quote SQL identifier to prevent injection
fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn table_name(table: &str) -> Result<String, DatabaseError> {
    require_identifier(table)?;
    Ok(quote_identifier(table))
}

/// Map "relation does not exist" to a typed error, everything else passes through
fn map_query_error(table: &str, err: sqlx::Error) -> DatabaseError {
    if let sqlx::Error::Database(db_err) = &err {
        match db_err.code().as_deref() {
            Some("42P01") => return DatabaseError::UnknownTable(table.to_string()),
            Some("23505") => return DatabaseError::DuplicateKey(db_err.message().to_string()),
            _ => {}
        }
    }
    DatabaseError::Sqlx(err)
}

fn row_from_pg(row: &sqlx::postgres::PgRow) -> Result<StoredRow, DatabaseError> {
    Ok(StoredRow {
        id: row.try_get("id")?,
        tenant: row.try_get("tenant")?,
        data: row.try_get::<Value, _>("data")?,
    })
}

#[async_trait]
impl Connection for PgSession {
    async fn id(&mut self) -> Result<ConnectionId, DatabaseError> {
        let pid: i64 = sqlx::query_scalar("SELECT pg_backend_pid()::bigint")
            .fetch_one(&mut *self.conn)
            .await?;
        Ok(ConnectionId(pid))
    }

    fn detach(self: Box<Self>) {
        drop(self.conn.detach());
    }

    async fn ping(&mut self) -> Result<(), DatabaseError> {
        self.conn.ping().await?;
        Ok(())
    }

    async fn current_schema(&mut self) -> Result<String, DatabaseError> {
        let schema: Option<String> = sqlx::query_scalar("SELECT current_schema()::text")
            .fetch_one(&mut *self.conn)
            .await?;
        Ok(schema.unwrap_or_default())
    }

    async fn set_schema(&mut self, schema: &str) -> Result<(), DatabaseError> {
        set_search_path(&mut *self.conn, schema).await
    }

    async fn ensure_schema(&mut self, schema: &str) -> Result<(), DatabaseError> {
        require_identifier(schema)?;
        sqlx::query(&format!(
            "CREATE SCHEMA IF NOT EXISTS {}",
            quote_identifier(schema)
        ))
        .execute(&mut *self.conn)
        .await?;
        Ok(())
    }

    async fn ensure_table(&mut self, table: &str) -> Result<(), DatabaseError> {
        let name = table_name(table)?;
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                seq BIGSERIAL,
                id UUID PRIMARY KEY,
                tenant TEXT,
                data JSONB NOT NULL
            )",
            name
        ))
        .execute(&mut *self.conn)
        .await?;
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} (tenant)",
            quote_identifier(&format!("{}_tenant_idx", table)),
            name
        ))
        .execute(&mut *self.conn)
        .await?;
        Ok(())
    }

    async fn insert(&mut self, table: &str, row: &StoredRow) -> Result<(), DatabaseError> {
        let query = format!(
            "INSERT INTO {} (id, tenant, data) VALUES ($1, $2, $3)",
            table_name(table)?
        );
        sqlx::query(&query)
            .bind(row.id)
            .bind(&row.tenant)
            .bind(&row.data)
            .execute(&mut *self.conn)
            .await
            .map_err(|e| map_query_error(table, e))?;
        Ok(())
    }

    async fn fetch(
        &mut self,
        table: &str,
        id: Uuid,
        scope: &RowScope,
    ) -> Result<Option<StoredRow>, DatabaseError> {
        let name = table_name(table)?;
        let row = match scope.tenant() {
            Some(tenant) => {
                sqlx::query(&format!(
                    "SELECT id, tenant, data FROM {} WHERE id = $1 AND tenant = $2",
                    name
                ))
                .bind(id)
                .bind(tenant.as_str())
                .fetch_optional(&mut *self.conn)
                .await
            }
            None => {
                sqlx::query(&format!("SELECT id, tenant, data FROM {} WHERE id = $1", name))
                    .bind(id)
                    .fetch_optional(&mut *self.conn)
                    .await
            }
        }
        .map_err(|e| map_query_error(table, e))?;

        row.as_ref().map(row_from_pg).transpose()
    }

    async fn fetch_all(
        &mut self,
        table: &str,
        scope: &RowScope,
        page: Option<Page>,
    ) -> Result<Vec<StoredRow>, DatabaseError> {
        let name = table_name(table)?;
        let (limit, offset) = match page {
            Some(page) => (page.limit() as i64, page.offset() as i64),
            None => (i64::MAX, 0),
        };

        let rows = match scope.tenant() {
            Some(tenant) => {
                sqlx::query(&format!(
                    "SELECT id, tenant, data FROM {} WHERE tenant = $1 ORDER BY seq LIMIT $2 OFFSET $3",
                    name
                ))
                .bind(tenant.as_str())
                .bind(limit)
                .bind(offset)
                .fetch_all(&mut *self.conn)
                .await
            }
            None => {
                sqlx::query(&format!(
                    "SELECT id, tenant, data FROM {} ORDER BY seq LIMIT $1 OFFSET $2",
                    name
                ))
                .bind(limit)
                .bind(offset)
                .fetch_all(&mut *self.conn)
                .await
            }
        }
        .map_err(|e| map_query_error(table, e))?;

        rows.iter().map(row_from_pg).collect()
    }

    async fn update(
        &mut self,
        table: &str,
        row: &StoredRow,
        scope: &RowScope,
    ) -> Result<bool, DatabaseError> {
        let name = table_name(table)?;
        let result = match scope.tenant() {
            Some(tenant) => {
                sqlx::query(&format!(
                    "UPDATE {} SET data = $2 WHERE id = $1 AND tenant = $3",
                    name
                ))
                .bind(row.id)
                .bind(&row.data)
                .bind(tenant.as_str())
                .execute(&mut *self.conn)
                .await
            }
            None => {
                sqlx::query(&format!("UPDATE {} SET data = $2 WHERE id = $1", name))
                    .bind(row.id)
                    .bind(&row.data)
                    .execute(&mut *self.conn)
                    .await
            }
        }
        .map_err(|e| map_query_error(table, e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(
        &mut self,
        table: &str,
        id: Uuid,
        scope: &RowScope,
    ) -> Result<bool, DatabaseError> {
        let name = table_name(table)?;
        let result = match scope.tenant() {
            Some(tenant) => {
                sqlx::query(&format!("DELETE FROM {} WHERE id = $1 AND tenant = $2", name))
                    .bind(id)
                    .bind(tenant.as_str())
                    .execute(&mut *self.conn)
                    .await
            }
            None => {
                sqlx::query(&format!("DELETE FROM {} WHERE id = $1", name))
                    .bind(id)
                    .execute(&mut *self.conn)
                    .await
            }
        }
        .map_err(|e| map_query_error(table, e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn count(&mut self, table: &str, scope: &RowScope) -> Result<i64, DatabaseError> {
        let name = table_name(table)?;
        let count: i64 = match scope.tenant() {
            Some(tenant) => {
                sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {} WHERE tenant = $1", name))
                    .bind(tenant.as_str())
                    .fetch_one(&mut *self.conn)
                    .await
            }
            None => {
                sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", name))
                    .fetch_one(&mut *self.conn)
                    .await
            }
        }
        .map_err(|e| map_query_error(table, e))?;

        Ok(count)
    }

    async fn tenant_is_active(&mut self, tenant: &str) -> Result<bool, DatabaseError> {
        let active: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM tenants
                WHERE name = $1
                AND is_active = true
                AND deleted_at IS NULL
            )
            "#,
        )
        .bind(tenant)
        .fetch_one(&mut *self.conn)
        .await
        .map_err(|e| map_query_error("tenants", e))?;

        Ok(active)
    }
}
