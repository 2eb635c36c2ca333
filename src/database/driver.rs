use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::database::manager::DatabaseError;
use crate::tenancy::TenantId;
use crate::types::Page;

/// Identity of one physical session, stable for its whole lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub i64);

/// Row as persisted by every backend: key, owning tenant and the entity body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRow {
    pub id: Uuid,
    pub tenant: Option<String>,
    pub data: Value,
}

/// Row predicate carried by a routed connection.
///
/// `Tenant` restricts every read and write to rows whose tenant column matches;
/// `All` applies no predicate (isolation comes from the connection itself).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowScope {
    All,
    Tenant(TenantId),
}

impl RowScope {
    pub fn tenant(&self) -> Option<&TenantId> {
        match self {
            RowScope::All => None,
            RowScope::Tenant(tenant) => Some(tenant),
        }
    }
}

/// One pooled session against a storage backend
#[async_trait]
pub trait Connection: Send {
    /// Backend session identifier (PostgreSQL backend pid, SQLite session counter)
    async fn id(&mut self) -> Result<ConnectionId, DatabaseError>;

    /// Close the session instead of handing it back to its pool
    fn detach(self: Box<Self>);

    async fn ping(&mut self) -> Result<(), DatabaseError>;

    /// Schema that unqualified table names currently resolve against
    async fn current_schema(&mut self) -> Result<String, DatabaseError>;

    /// Switch the session's active schema; fails if the schema does not exist
    async fn set_schema(&mut self, schema: &str) -> Result<(), DatabaseError>;

    async fn ensure_schema(&mut self, schema: &str) -> Result<(), DatabaseError>;

    async fn ensure_table(&mut self, table: &str) -> Result<(), DatabaseError>;

    async fn insert(&mut self, table: &str, row: &StoredRow) -> Result<(), DatabaseError>;

    async fn fetch(
        &mut self,
        table: &str,
        id: Uuid,
        scope: &RowScope,
    ) -> Result<Option<StoredRow>, DatabaseError>;

    async fn fetch_all(
        &mut self,
        table: &str,
        scope: &RowScope,
        page: Option<Page>,
    ) -> Result<Vec<StoredRow>, DatabaseError>;

    /// Replace the body of an existing row. The tenant column is never rewritten.
    async fn update(
        &mut self,
        table: &str,
        row: &StoredRow,
        scope: &RowScope,
    ) -> Result<bool, DatabaseError>;

    async fn delete(&mut self, table: &str, id: Uuid, scope: &RowScope)
        -> Result<bool, DatabaseError>;

    async fn count(&mut self, table: &str, scope: &RowScope) -> Result<i64, DatabaseError>;

    /// Tenant registry lookup against the `tenants` table
    async fn tenant_is_active(&mut self, tenant: &str) -> Result<bool, DatabaseError>;
}

/// Validate SQL identifiers (schemas, tables, pool names) to prevent injection.
/// Accepts `[a-zA-Z_][a-zA-Z0-9_]*` up to 63 characters.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn require_identifier(name: &str) -> Result<(), DatabaseError> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(DatabaseError::InvalidIdentifier(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_identifiers() {
        assert!(is_valid_identifier("public"));
        assert!(is_valid_identifier("tenant_123abc_DEF"));
        assert!(is_valid_identifier("_private"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("1tenant"));
        assert!(!is_valid_identifier("tenant-123"));
        assert!(!is_valid_identifier("tenant_; DROP SCHEMA"));
        assert!(!is_valid_identifier(&"a".repeat(64)));
    }

    #[test]
    fn row_scope_exposes_tenant() {
        let tenant = TenantId::parse("tenant1").unwrap();
        assert_eq!(RowScope::All.tenant(), None);
        assert_eq!(RowScope::Tenant(tenant.clone()).tenant(), Some(&tenant));
    }
}
