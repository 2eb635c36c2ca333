//! SQLite backend for local runs and tests.
//!
//! SQLite has no schemas. Here a schema is a row in the `schemata` table and a
//! prefix on physical table names: `tutorials` in schema `tenant1` is stored as
//! `"tenant1.tutorials"`. The active schema of a session lives in a TEMP table
//! private to the connection, so like PostgreSQL's `search_path` it outlives a
//! checkin and has to be reset before the connection is reused.

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Connection as _, Row, Sqlite};
use std::sync::atomic::{AtomicI64, Ordering};
use uuid::Uuid;

use crate::database::driver::{require_identifier, Connection, ConnectionId, RowScope, StoredRow};
use crate::database::manager::DatabaseError;
use crate::types::Page;

/// Schema every new session starts in
pub const INITIAL_SCHEMA: &str = "public";

static NEXT_SESSION_ID: AtomicI64 = AtomicI64::new(1);

/// Registry and session tables, created for every new connection
pub(crate) async fn prepare_session(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    sqlx::query("CREATE TABLE IF NOT EXISTS schemata (name TEXT PRIMARY KEY)")
        .execute(&mut *conn)
        .await?;
    sqlx::query("INSERT OR IGNORE INTO schemata (name) VALUES ($1)")
        .bind(INITIAL_SCHEMA)
        .execute(&mut *conn)
        .await?;
    sqlx::query("CREATE TEMP TABLE IF NOT EXISTS session (id INTEGER NOT NULL, schema TEXT NOT NULL)")
        .execute(&mut *conn)
        .await?;
    sqlx::query("INSERT INTO temp.session (id, schema) VALUES ($1, $2)")
        .bind(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
        .bind(INITIAL_SCHEMA)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Make `schema` the session's active schema; it must be registered
pub(crate) async fn switch_schema(conn: &mut SqliteConnection, schema: &str) -> Result<(), DatabaseError> {
    require_identifier(schema)?;

    let known: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schemata WHERE name = $1")
        .bind(schema)
        .fetch_one(&mut *conn)
        .await?;
    if known == 0 {
        return Err(DatabaseError::UnknownSchema(schema.to_string()));
    }

    sqlx::query("UPDATE temp.session SET schema = $1")
        .bind(schema)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn active_schema(conn: &mut SqliteConnection) -> Result<String, DatabaseError> {
    let schema: String = sqlx::query_scalar("SELECT schema FROM temp.session")
        .fetch_one(&mut *conn)
        .await?;
    Ok(schema)
}

/// Physical name of `table` in the session's active schema, quoted
async fn table_name(conn: &mut SqliteConnection, table: &str) -> Result<String, DatabaseError> {
    require_identifier(table)?;
    let schema = active_schema(conn).await?;
    Ok(format!("\"{}.{}\"", schema, table))
}

fn map_query_error(table: &str, err: sqlx::Error) -> DatabaseError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return DatabaseError::DuplicateKey(db_err.message().to_string());
        }
        if db_err.message().starts_with("no such table") {
            return DatabaseError::UnknownTable(table.to_string());
        }
    }
    DatabaseError::Sqlx(err)
}

fn row_from_sqlite(row: &SqliteRow) -> Result<StoredRow, DatabaseError> {
    let data: String = row.try_get("data")?;
    Ok(StoredRow {
        id: row.try_get("id")?,
        tenant: row.try_get("tenant")?,
        data: serde_json::from_str(&data)?,
    })
}

/// SQLite session borrowed from a sqlx pool
pub struct SqliteSession {
    conn: PoolConnection<Sqlite>,
}

impl SqliteSession {
    pub fn new(conn: PoolConnection<Sqlite>) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl Connection for SqliteSession {
    async fn id(&mut self) -> Result<ConnectionId, DatabaseError> {
        let id: i64 = sqlx::query_scalar("SELECT id FROM temp.session")
            .fetch_one(&mut *self.conn)
            .await?;
        Ok(ConnectionId(id))
    }

    fn detach(self: Box<Self>) {
        drop(self.conn.detach());
    }

    async fn ping(&mut self) -> Result<(), DatabaseError> {
        self.conn.ping().await?;
        Ok(())
    }

    async fn current_schema(&mut self) -> Result<String, DatabaseError> {
        active_schema(&mut self.conn).await
    }

    async fn set_schema(&mut self, schema: &str) -> Result<(), DatabaseError> {
        switch_schema(&mut self.conn, schema).await
    }

    async fn ensure_schema(&mut self, schema: &str) -> Result<(), DatabaseError> {
        require_identifier(schema)?;
        sqlx::query("INSERT OR IGNORE INTO schemata (name) VALUES ($1)")
            .bind(schema)
            .execute(&mut *self.conn)
            .await?;
        Ok(())
    }

    async fn ensure_table(&mut self, table: &str) -> Result<(), DatabaseError> {
        require_identifier(table)?;
        let schema = active_schema(&mut self.conn).await?;
        let name = format!("\"{}.{}\"", schema, table);
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id BLOB NOT NULL UNIQUE,
                tenant TEXT,
                data TEXT NOT NULL
            )",
            name
        ))
        .execute(&mut *self.conn)
        .await?;
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS \"{}.{}_tenant_idx\" ON {} (tenant)",
            schema, table, name
        ))
        .execute(&mut *self.conn)
        .await?;
        Ok(())
    }

    async fn insert(&mut self, table: &str, row: &StoredRow) -> Result<(), DatabaseError> {
        let name = table_name(&mut self.conn, table).await?;
        sqlx::query(&format!(
            "INSERT INTO {} (id, tenant, data) VALUES ($1, $2, $3)",
            name
        ))
        .bind(row.id)
        .bind(&row.tenant)
        .bind(serde_json::to_string(&row.data)?)
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
        let name = table_name(&mut self.conn, table).await?;
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

        row.as_ref().map(row_from_sqlite).transpose()
    }

    async fn fetch_all(
        &mut self,
        table: &str,
        scope: &RowScope,
        page: Option<Page>,
    ) -> Result<Vec<StoredRow>, DatabaseError> {
        let name = table_name(&mut self.conn, table).await?;
        let (limit, offset) = match page {
            Some(page) => (page.limit() as i64, page.offset() as i64),
            None => (-1, 0),
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

        rows.iter().map(row_from_sqlite).collect()
    }

    async fn update(
        &mut self,
        table: &str,
        row: &StoredRow,
        scope: &RowScope,
    ) -> Result<bool, DatabaseError> {
        let name = table_name(&mut self.conn, table).await?;
        let data = serde_json::to_string(&row.data)?;
        let result = match scope.tenant() {
            Some(tenant) => {
                sqlx::query(&format!(
                    "UPDATE {} SET data = $2 WHERE id = $1 AND tenant = $3",
                    name
                ))
                .bind(row.id)
                .bind(data)
                .bind(tenant.as_str())
                .execute(&mut *self.conn)
                .await
            }
            None => {
                sqlx::query(&format!("UPDATE {} SET data = $2 WHERE id = $1", name))
                    .bind(row.id)
                    .bind(data)
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
        let name = table_name(&mut self.conn, table).await?;
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
        let name = table_name(&mut self.conn, table).await?;
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
        let active: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM tenants
            WHERE name = $1
            AND is_active = 1
            AND deleted_at IS NULL
            "#,
        )
        .bind(tenant)
        .fetch_one(&mut *self.conn)
        .await
        .map_err(|e| map_query_error("tenants", e))?;

        Ok(active > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataSource;
    use crate::database::pool::{scratch_url, ConnectionPool, PoolOptions, PooledConnection};
    use serde_json::json;

    async fn session() -> PooledConnection {
        let source = DataSource::new(scratch_url("sqlite"));
        let pool = ConnectionPool::new("test", source, &PoolOptions::default()).unwrap();
        pool.acquire().await.unwrap()
    }

    #[tokio::test]
    async fn new_sessions_start_in_initial_schema() {
        let mut conn = session().await;
        assert_eq!(conn.current_schema().await.unwrap(), INITIAL_SCHEMA);
        assert!(conn.id().await.unwrap().0 > 0);
    }

    #[tokio::test]
    async fn unregistered_schema_is_rejected() {
        let mut conn = session().await;
        assert!(matches!(
            conn.set_schema("tenant1").await,
            Err(DatabaseError::UnknownSchema(_))
        ));

        conn.ensure_schema("tenant1").await.unwrap();
        conn.set_schema("tenant1").await.unwrap();
        assert_eq!(conn.current_schema().await.unwrap(), "tenant1");
    }

    #[tokio::test]
    async fn tables_are_separate_per_schema() {
        let mut conn = session().await;
        conn.ensure_schema("tenant1").await.unwrap();
        conn.ensure_table("tutorials").await.unwrap();

        let row = StoredRow {
            id: Uuid::new_v4(),
            tenant: Some("tenant1".to_string()),
            data: json!({ "title": "Rust" }),
        };
        conn.insert("tutorials", &row).await.unwrap();
        assert!(matches!(
            conn.insert("tutorials", &row).await,
            Err(DatabaseError::DuplicateKey(_))
        ));
        assert_eq!(conn.fetch("tutorials", row.id, &RowScope::All).await.unwrap(), Some(row));

        conn.set_schema("tenant1").await.unwrap();
        assert!(matches!(
            conn.count("tutorials", &RowScope::All).await,
            Err(DatabaseError::UnknownTable(_))
        ));
    }

    #[tokio::test]
    async fn missing_registry_table_is_reported() {
        let mut conn = session().await;
        assert!(matches!(
            conn.tenant_is_active("tenant1").await,
            Err(DatabaseError::UnknownTable(_))
        ));
    }
}
