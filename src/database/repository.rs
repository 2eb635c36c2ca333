use chrono::Utc;
use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::TenancyStrategy;
use crate::database::driver::{RowScope, StoredRow};
use crate::database::manager::DatabaseError;
use crate::database::models::TenantEntity;
use crate::database::routing::{ConnectionRouter, RoutedConnection};
use crate::observer::{ObserverError, ObserverPipeline};
use crate::tenancy::{TenancyError, TenantId, TenantIdentifierResolver};
use crate::types::{Operation, Page};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Tenant '{caller}' may not modify data owned by '{owner}'")]
    Forbidden { caller: String, owner: String },

    #[error("Entity has no id")]
    MissingId,

    #[error(transparent)]
    Tenancy(#[from] TenancyError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Observer(#[from] ObserverError),

    #[error("Stored row could not be mapped: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Everything a tenant repository needs, shared by all entity types
#[derive(Clone)]
pub struct Persistence {
    router: Arc<ConnectionRouter>,
    resolver: TenantIdentifierResolver,
    pipeline: Arc<ObserverPipeline>,
    super_tenant: TenantId,
}

impl Persistence {
    pub fn new(
        router: Arc<ConnectionRouter>,
        resolver: TenantIdentifierResolver,
        pipeline: Arc<ObserverPipeline>,
        super_tenant: TenantId,
    ) -> Self {
        Self {
            router,
            resolver,
            pipeline,
            super_tenant,
        }
    }

    pub fn router(&self) -> &Arc<ConnectionRouter> {
        &self.router
    }

    pub fn resolver(&self) -> &TenantIdentifierResolver {
        &self.resolver
    }

    pub fn super_tenant(&self) -> &TenantId {
        &self.super_tenant
    }

    pub fn repository<E: TenantEntity>(&self) -> TenantRepository<E> {
        TenantRepository {
            persistence: self.clone(),
            _entity: PhantomData,
        }
    }
}

/// CRUD for one entity type, every call confined to an explicit tenant.
///
/// Reads only ever see the caller's rows, so another tenant's row looks
/// exactly like a missing one. Updates and deletes load the row first and
/// reject callers that do not own it, unless the caller is the super tenant.
/// Under the schema and database strategies the super tenant's updates and
/// deletes are routed to whichever tenant's storage holds the row.
///
/// A connection that cannot be released cleanly fails the call, even when
/// the operation itself went through.
pub struct TenantRepository<E> {
    persistence: Persistence,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for TenantRepository<E> {
    fn clone(&self) -> Self {
        Self {
            persistence: self.persistence.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: TenantEntity> TenantRepository<E> {
    pub async fn create(&self, tenant: &TenantId, mut entity: E) -> Result<E, RepositoryError> {
        let tenant = self.persistence.resolver.bind(tenant)?;

        if let Some(owner) = entity.tenant() {
            self.check_owner(&tenant, Some(owner.as_str()))?;
        }
        if entity.id().is_none() {
            entity.set_id(Uuid::new_v4());
        }

        self.persistence
            .pipeline
            .run(Operation::Create, E::TABLE, &mut entity)
            .await?;
        let row = to_row(&entity)?;

        let mut conn = self.persistence.router.get_connection(&tenant).await?;
        let result = conn.insert(E::TABLE, &row).await.map_err(RepositoryError::from);
        self.finish(&tenant, conn, result).await?;

        debug!("Created {} {} for tenant '{}'", E::TABLE, row.id, tenant);
        Ok(entity)
    }

    pub async fn find_by_id(&self, tenant: &TenantId, id: Uuid) -> Result<E, RepositoryError> {
        let tenant = self.persistence.resolver.bind(tenant)?;
        let mut conn = self.persistence.router.get_connection(&tenant).await?;
        let result = Self::fetch_scoped(&mut conn, id).await;
        from_row(self.finish(&tenant, conn, result).await?)
    }

    pub async fn find_all(&self, tenant: &TenantId, page: Option<Page>) -> Result<Vec<E>, RepositoryError> {
        let tenant = self.persistence.resolver.bind(tenant)?;
        let mut conn = self.persistence.router.get_connection(&tenant).await?;
        let scope = conn.scope().clone();
        let result = conn.fetch_all(E::TABLE, &scope, page).await.map_err(RepositoryError::from);
        let rows = self.finish(&tenant, conn, result).await?;
        rows.into_iter().map(from_row::<E>).collect()
    }

    pub async fn count(&self, tenant: &TenantId) -> Result<i64, RepositoryError> {
        let tenant = self.persistence.resolver.bind(tenant)?;
        let mut conn = self.persistence.router.get_connection(&tenant).await?;
        let scope = conn.scope().clone();
        let result = conn.count(E::TABLE, &scope).await.map_err(RepositoryError::from);
        self.finish(&tenant, conn, result).await
    }

    /// Replace an existing entity. The owning tenant and the cancellation
    /// state are never changed.
    pub async fn update(&self, tenant: &TenantId, entity: E) -> Result<E, RepositoryError> {
        let tenant = self.persistence.resolver.bind(tenant)?;
        let id = entity.id().ok_or(RepositoryError::MissingId)?;
        let storage = self.storage_owner(&tenant, id).await?;

        let mut conn = self.persistence.router.get_connection(&storage).await?;
        let result = self.update_on(&mut conn, &tenant, id, entity).await;
        self.finish(&storage, conn, result).await
    }

    /// Soft-delete cancellable entities, hard-delete the rest.
    /// Returns the entity as it was left.
    pub async fn delete(&self, tenant: &TenantId, id: Uuid) -> Result<E, RepositoryError> {
        let tenant = self.persistence.resolver.bind(tenant)?;
        let storage = self.storage_owner(&tenant, id).await?;

        let mut conn = self.persistence.router.get_connection(&storage).await?;
        let result = match self.load_owned(&mut conn, &tenant, id).await {
            Ok(row) => self.delete_on(&mut conn, &tenant, row).await,
            Err(e) => Err(e),
        };
        self.finish(&storage, conn, result).await
    }

    /// Delete a batch. Every id is checked before anything is deleted; one
    /// missing or foreign id rejects the whole batch.
    pub async fn delete_all(&self, tenant: &TenantId, ids: &[Uuid]) -> Result<Vec<E>, RepositoryError> {
        let tenant = self.persistence.resolver.bind(tenant)?;

        let mut seen = HashSet::new();
        let mut batches: Vec<(TenantId, Vec<Uuid>)> = Vec::new();
        for &id in ids {
            if !seen.insert(id) {
                continue;
            }
            let storage = self.storage_owner(&tenant, id).await?;
            match batches.iter_mut().find(|(owner, _)| *owner == storage) {
                Some((_, batch)) => batch.push(id),
                None => batches.push((storage, vec![id])),
            }
        }

        let mut loaded = Vec::with_capacity(batches.len());
        for (storage, batch) in batches {
            let mut conn = self.persistence.router.get_connection(&storage).await?;
            let result = self.load_batch(&mut conn, &tenant, &batch).await;
            let rows = self.finish(&storage, conn, result).await?;
            loaded.push((storage, rows));
        }

        let mut deleted = Vec::with_capacity(seen.len());
        for (storage, rows) in loaded {
            let mut conn = self.persistence.router.get_connection(&storage).await?;
            let result = self.delete_batch(&mut conn, &tenant, rows).await;
            deleted.extend(self.finish(&storage, conn, result).await?);
        }
        Ok(deleted)
    }

    async fn fetch_scoped(conn: &mut RoutedConnection, id: Uuid) -> Result<StoredRow, RepositoryError> {
        let scope = conn.scope().clone();
        conn.fetch(E::TABLE, id, &scope)
            .await?
            .ok_or_else(|| not_found::<E>(id))
    }

    /// Tenant whose storage holds row `id`. Only the super tenant looks
    /// beyond its own storage, and only when storage is physically separated.
    async fn storage_owner(&self, tenant: &TenantId, id: Uuid) -> Result<TenantId, RepositoryError> {
        let router = &self.persistence.router;
        if !self.is_super(tenant) || router.strategy() == TenancyStrategy::Discriminator {
            return Ok(tenant.clone());
        }

        let mut candidates = vec![tenant.clone()];
        candidates.extend(router.tenants().into_iter().filter(|t| t != tenant));
        for candidate in candidates {
            let mut conn = router.get_connection(&candidate).await?;
            let result = conn
                .fetch(E::TABLE, id, &RowScope::All)
                .await
                .map_err(RepositoryError::from);
            if self.finish(&candidate, conn, result).await?.is_some() {
                debug!("{} {} lives in the storage of tenant '{}'", E::TABLE, id, candidate);
                return Ok(candidate);
            }
        }
        Err(not_found::<E>(id))
    }

    async fn update_on(
        &self,
        conn: &mut RoutedConnection,
        tenant: &TenantId,
        id: Uuid,
        mut entity: E,
    ) -> Result<E, RepositoryError> {
        let existing = self.load_owned(conn, tenant, id).await?;
        if let Some(owner) = existing.tenant.as_deref() {
            entity.set_tenant(TenantId::parse(owner)?);
        }

        let mut current: E = from_row(existing)?;
        if let (Some(stored), Some(incoming)) = (current.as_cancelable(), entity.as_cancelable()) {
            incoming.set_cancellation(stored.is_canceled(), stored.cancel_date());
        }

        self.persistence
            .pipeline
            .run(Operation::Update, E::TABLE, &mut entity)
            .await?;

        let row = to_row(&entity)?;
        let scope = self.write_scope(conn, tenant);
        if !conn.update(E::TABLE, &row, &scope).await? {
            return Err(not_found::<E>(id));
        }
        Ok(entity)
    }

    async fn delete_on(
        &self,
        conn: &mut RoutedConnection,
        tenant: &TenantId,
        row: StoredRow,
    ) -> Result<E, RepositoryError> {
        let id = row.id;
        let mut entity: E = from_row(row)?;
        self.persistence
            .pipeline
            .run(Operation::Delete, E::TABLE, &mut entity)
            .await?;

        let scope = self.write_scope(conn, tenant);
        let canceled = entity.as_cancelable().map(|c| c.is_canceled());
        match canceled {
            Some(true) => {
                debug!("{} {} already canceled", E::TABLE, id);
                Ok(entity)
            }
            Some(false) => {
                if let Some(cancelable) = entity.as_cancelable() {
                    cancelable.cancel(Utc::now());
                }
                let row = to_row(&entity)?;
                if !conn.update(E::TABLE, &row, &scope).await? {
                    return Err(not_found::<E>(id));
                }
                debug!("Canceled {} {} for tenant '{}'", E::TABLE, id, tenant);
                Ok(entity)
            }
            None => {
                if !conn.delete(E::TABLE, id, &scope).await? {
                    return Err(not_found::<E>(id));
                }
                debug!("Deleted {} {} for tenant '{}'", E::TABLE, id, tenant);
                Ok(entity)
            }
        }
    }

    async fn load_batch(
        &self,
        conn: &mut RoutedConnection,
        tenant: &TenantId,
        ids: &[Uuid],
    ) -> Result<Vec<StoredRow>, RepositoryError> {
        let mut rows = Vec::with_capacity(ids.len());
        for &id in ids {
            rows.push(self.load_owned(conn, tenant, id).await?);
        }
        Ok(rows)
    }

    async fn delete_batch(
        &self,
        conn: &mut RoutedConnection,
        tenant: &TenantId,
        rows: Vec<StoredRow>,
    ) -> Result<Vec<E>, RepositoryError> {
        let mut deleted = Vec::with_capacity(rows.len());
        for row in rows {
            deleted.push(self.delete_on(conn, tenant, row).await?);
        }
        Ok(deleted)
    }

    /// Load a row regardless of owner, then check the caller may modify it.
    /// The connection only reaches one tenant's storage under the schema and
    /// database strategies, so foreign rows there surface as not found.
    async fn load_owned(
        &self,
        conn: &mut RoutedConnection,
        tenant: &TenantId,
        id: Uuid,
    ) -> Result<StoredRow, RepositoryError> {
        let row = conn
            .fetch(E::TABLE, id, &RowScope::All)
            .await?
            .ok_or_else(|| not_found::<E>(id))?;
        self.check_owner(tenant, row.tenant.as_deref())?;
        Ok(row)
    }

    fn check_owner(&self, caller: &TenantId, owner: Option<&str>) -> Result<(), RepositoryError> {
        if self.is_super(caller) || owner == Some(caller.as_str()) {
            return Ok(());
        }
        let owner = owner.unwrap_or("<none>").to_string();
        warn!(
            "Rejecting {} change by tenant '{}' on data owned by '{}'",
            E::TABLE,
            caller,
            owner
        );
        Err(RepositoryError::Forbidden {
            caller: caller.to_string(),
            owner,
        })
    }

    /// The super tenant writes without the tenant predicate
    fn write_scope(&self, conn: &RoutedConnection, tenant: &TenantId) -> RowScope {
        if self.is_super(tenant) {
            RowScope::All
        } else {
            conn.scope().clone()
        }
    }

    fn is_super(&self, tenant: &TenantId) -> bool {
        tenant == &self.persistence.super_tenant
    }

    /// Release `conn`, then report the operation's result. An operation
    /// error wins over a release error, which is then only logged.
    async fn finish<T>(
        &self,
        tenant: &TenantId,
        conn: RoutedConnection,
        result: Result<T, RepositoryError>,
    ) -> Result<T, RepositoryError> {
        let released = self.persistence.router.release_connection(tenant, conn).await;
        match (result, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => {
                error!("Releasing connection for tenant '{}' failed: {}", tenant, e);
                Err(e.into())
            }
            (Err(e), Err(release)) => {
                error!("Releasing connection for tenant '{}' failed: {}", tenant, release);
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
        }
    }
}

fn not_found<E: TenantEntity>(id: Uuid) -> RepositoryError {
    RepositoryError::NotFound(format!("{} {}", E::TABLE, id))
}

fn to_row<E: TenantEntity>(entity: &E) -> Result<StoredRow, RepositoryError> {
    Ok(StoredRow {
        id: entity.id().ok_or(RepositoryError::MissingId)?,
        tenant: entity.tenant().map(|t| t.to_string()),
        data: serde_json::to_value(entity)?,
    })
}

fn from_row<E: TenantEntity>(row: StoredRow) -> Result<E, RepositoryError> {
    Ok(serde_json::from_value(row.data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::Tutorial;
    use crate::database::pool::PoolOptions;
    use crate::database::routing::test_support::{config, single_connection};
    use crate::tenancy::TenantContext;
    use sqlx::{Connection as _, SqliteConnection};

    const STRATEGIES: [TenancyStrategy; 3] = [
        TenancyStrategy::Schema,
        TenancyStrategy::Database,
        TenancyStrategy::Discriminator,
    ];

    fn tenant(name: &str) -> TenantId {
        TenantId::parse(name).unwrap()
    }

    async fn repository(strategy: TenancyStrategy) -> TenantRepository<Tutorial> {
        let config = config(strategy);
        let router = ConnectionRouter::from_config(&config, PoolOptions::default()).unwrap();
        router.bootstrap(&["tutorials"]).await.unwrap();

        Persistence::new(
            Arc::new(router),
            TenantIdentifierResolver::new(config.default_tenant.clone()),
            Arc::new(ObserverPipeline::with_defaults()),
            config.super_tenant.clone(),
        )
        .repository()
    }

    async fn create_as(repo: &TenantRepository<Tutorial>, name: &str, title: &str) -> Tutorial {
        let t = tenant(name);
        TenantContext::scope(t.clone(), repo.create(&t, Tutorial::new(title)))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn isolates_reads_under_every_strategy() {
        for strategy in STRATEGIES {
            let repo = repository(strategy).await;
            let first = create_as(&repo, "tenant1", "Tenant one").await;
            create_as(&repo, "tenant2", "Tenant two").await;
            create_as(&repo, "tenant2", "Tenant two again").await;

            assert_eq!(first.tenant, Some(tenant("tenant1")), "{:?}", strategy);
            let id = first.id.unwrap();

            let found = repo.find_by_id(&tenant("tenant1"), id).await.unwrap();
            assert_eq!(found, first);
            assert!(matches!(
                repo.find_by_id(&tenant("tenant2"), id).await,
                Err(RepositoryError::NotFound(_))
            ));

            let listed = repo.find_all(&tenant("tenant1"), None).await.unwrap();
            assert_eq!(listed.len(), 1);
            assert!(listed.iter().all(|t| t.tenant == Some(tenant("tenant1"))));

            assert_eq!(repo.count(&tenant("tenant1")).await.unwrap(), 1);
            assert_eq!(repo.count(&tenant("tenant2")).await.unwrap(), 2);
        }
    }

    #[tokio::test]
    async fn foreign_and_missing_rows_look_the_same() {
        let repo = repository(TenancyStrategy::Discriminator).await;
        let other = create_as(&repo, "tenant1", "Hidden").await;

        let foreign = repo.find_by_id(&tenant("tenant2"), other.id.unwrap()).await.unwrap_err();
        let missing = repo.find_by_id(&tenant("tenant2"), Uuid::new_v4()).await.unwrap_err();

        assert!(matches!(foreign, RepositoryError::NotFound(_)));
        assert!(matches!(missing, RepositoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn pages_through_results() {
        let repo = repository(TenancyStrategy::Discriminator).await;
        for i in 0..5 {
            create_as(&repo, "tenant1", &format!("Tutorial {}", i)).await;
        }

        let page = repo.find_all(&tenant("tenant1"), Some(Page::new(1, 2))).await.unwrap();
        let titles: Vec<&str> = page.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["Tutorial 2", "Tutorial 3"]);
    }

    #[tokio::test]
    async fn create_without_context_writes_nothing() {
        let repo = repository(TenancyStrategy::Discriminator).await;

        let err = repo.create(&tenant("tenant1"), Tutorial::new("Orphan")).await.unwrap_err();

        assert!(matches!(err, RepositoryError::Observer(ObserverError::MissingTenant { .. })));
        assert_eq!(repo.count(&tenant("tenant1")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn create_rejects_foreign_preset_tenant() {
        let repo = repository(TenancyStrategy::Discriminator).await;
        let mut tutorial = Tutorial::new("Sneaky");
        tutorial.tenant = Some(tenant("tenant2"));

        let t1 = tenant("tenant1");
        let err = TenantContext::scope(t1.clone(), repo.create(&t1, tutorial))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Forbidden { .. }));
        assert_eq!(repo.count(&tenant("tenant2")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn context_and_argument_must_agree() {
        let repo = repository(TenancyStrategy::Discriminator).await;
        let err = TenantContext::scope(tenant("tenant1"), repo.count(&tenant("tenant2")))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::Tenancy(TenancyError::SessionTenantMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn update_enforces_ownership() {
        let repo = repository(TenancyStrategy::Discriminator).await;
        let mut tutorial = create_as(&repo, "tenant1", "Original").await;
        tutorial.title = "Changed".to_string();

        let err = repo.update(&tenant("tenant2"), tutorial.clone()).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Forbidden { .. }));

        let updated = repo.update(&tenant("super-tenant"), tutorial.clone()).await.unwrap();
        assert_eq!(updated.title, "Changed");
        assert_eq!(updated.tenant, Some(tenant("tenant1")));

        let stored = repo.find_by_id(&tenant("tenant1"), tutorial.id.unwrap()).await.unwrap();
        assert_eq!(stored.title, "Changed");
    }

    #[tokio::test]
    async fn update_keeps_original_tenant() {
        let repo = repository(TenancyStrategy::Discriminator).await;
        let mut tutorial = create_as(&repo, "tenant1", "Original").await;
        tutorial.tenant = Some(tenant("tenant2"));

        let updated = repo.update(&tenant("tenant1"), tutorial).await.unwrap();
        assert_eq!(updated.tenant, Some(tenant("tenant1")));
        assert_eq!(repo.count(&tenant("tenant2")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn update_of_missing_entity_is_not_found() {
        for strategy in STRATEGIES {
            let repo = repository(strategy).await;
            let mut ghost = Tutorial::new("Ghost");
            ghost.id = Some(Uuid::new_v4());

            assert!(matches!(
                repo.update(&tenant("tenant1"), ghost).await,
                Err(RepositoryError::NotFound(_))
            ));
            assert!(matches!(
                repo.update(&tenant("tenant1"), Tutorial::new("No id")).await,
                Err(RepositoryError::MissingId)
            ));
        }
    }

    #[tokio::test]
    async fn delete_soft_deletes_cancelable_entities() {
        let repo = repository(TenancyStrategy::Schema).await;
        let tutorial = create_as(&repo, "tenant1", "Doomed").await;
        let id = tutorial.id.unwrap();

        let deleted = repo.delete(&tenant("tenant1"), id).await.unwrap();
        assert!(deleted.canceled);
        assert!(deleted.cancel_date.is_some());

        let stored = repo.find_by_id(&tenant("tenant1"), id).await.unwrap();
        assert!(stored.canceled);
        assert_eq!(repo.count(&tenant("tenant1")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_enforces_ownership() {
        let repo = repository(TenancyStrategy::Discriminator).await;
        let tutorial = create_as(&repo, "tenant1", "Protected").await;
        let id = tutorial.id.unwrap();

        let err = repo.delete(&tenant("tenant2"), id).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Forbidden { .. }));
        assert!(!repo.find_by_id(&tenant("tenant1"), id).await.unwrap().canceled);

        let deleted = repo.delete(&tenant("super-tenant"), id).await.unwrap();
        assert!(deleted.canceled);
    }

    #[tokio::test]
    async fn cross_tenant_delete_is_not_found_with_physical_isolation() {
        for strategy in [TenancyStrategy::Schema, TenancyStrategy::Database] {
            let repo = repository(strategy).await;
            let tutorial = create_as(&repo, "tenant1", "Elsewhere").await;

            assert!(matches!(
                repo.delete(&tenant("tenant2"), tutorial.id.unwrap()).await,
                Err(RepositoryError::NotFound(_))
            ));
        }
    }

    #[tokio::test]
    async fn delete_all_is_fail_closed() {
        let repo = repository(TenancyStrategy::Discriminator).await;
        let own = create_as(&repo, "tenant1", "Mine").await;
        let foreign = create_as(&repo, "tenant2", "Theirs").await;
        let ids = [own.id.unwrap(), foreign.id.unwrap()];

        let err = repo.delete_all(&tenant("tenant1"), &ids).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Forbidden { .. }));
        assert!(!repo.find_by_id(&tenant("tenant1"), ids[0]).await.unwrap().canceled);

        let deleted = repo.delete_all(&tenant("tenant1"), &ids[..1]).await.unwrap();
        assert_eq!(deleted.len(), 1);
        assert!(deleted[0].canceled);
    }

    #[tokio::test]
    async fn super_tenant_batch_spans_tenants() {
        let repo = repository(TenancyStrategy::Discriminator).await;
        let a = create_as(&repo, "tenant1", "A").await;
        let b = create_as(&repo, "tenant2", "B").await;

        let deleted = repo
            .delete_all(&tenant("super-tenant"), &[a.id.unwrap(), b.id.unwrap(), a.id.unwrap()])
            .await
            .unwrap();
        assert_eq!(deleted.len(), 2);
        assert!(deleted.iter().all(|t| t.canceled));
    }

    #[tokio::test]
    async fn super_tenant_reaches_rows_in_other_tenants_storage() {
        for strategy in [TenancyStrategy::Schema, TenancyStrategy::Database] {
            let repo = repository(strategy).await;
            let mut first = create_as(&repo, "tenant1", "First").await;
            let second = create_as(&repo, "tenant2", "Second").await;

            first.title = "Moderated".to_string();
            let updated = repo.update(&tenant("super-tenant"), first.clone()).await.unwrap();
            assert_eq!(updated.tenant, Some(tenant("tenant1")), "{:?}", strategy);
            let stored = repo.find_by_id(&tenant("tenant1"), first.id.unwrap()).await.unwrap();
            assert_eq!(stored.title, "Moderated");

            let deleted = repo.delete(&tenant("super-tenant"), second.id.unwrap()).await.unwrap();
            assert!(deleted.canceled);
            assert!(repo.find_by_id(&tenant("tenant2"), second.id.unwrap()).await.unwrap().canceled);

            let ghost = repo.delete(&tenant("super-tenant"), Uuid::new_v4()).await;
            assert!(matches!(ghost, Err(RepositoryError::NotFound(_))), "{:?}", strategy);
        }
    }

    #[tokio::test]
    async fn super_tenant_batch_spans_tenant_storage() {
        for strategy in [TenancyStrategy::Schema, TenancyStrategy::Database] {
            let repo = repository(strategy).await;
            let a = create_as(&repo, "tenant1", "A").await;
            let b = create_as(&repo, "tenant2", "B").await;

            let missing = repo
                .delete_all(&tenant("super-tenant"), &[a.id.unwrap(), Uuid::new_v4()])
                .await;
            assert!(matches!(missing, Err(RepositoryError::NotFound(_))), "{:?}", strategy);
            assert!(!repo.find_by_id(&tenant("tenant1"), a.id.unwrap()).await.unwrap().canceled);

            let deleted = repo
                .delete_all(&tenant("super-tenant"), &[a.id.unwrap(), b.id.unwrap()])
                .await
                .unwrap();
            assert_eq!(deleted.len(), 2);
            assert!(repo.find_by_id(&tenant("tenant1"), a.id.unwrap()).await.unwrap().canceled);
            assert!(repo.find_by_id(&tenant("tenant2"), b.id.unwrap()).await.unwrap().canceled);
        }
    }

    #[tokio::test]
    async fn update_keeps_cancellation_state() {
        for strategy in STRATEGIES {
            let repo = repository(strategy).await;
            let tutorial = create_as(&repo, "tenant1", "Retired").await;
            let id = tutorial.id.unwrap();
            let canceled = repo.delete(&tenant("tenant1"), id).await.unwrap();

            let mut replacement = Tutorial::new("Revived?");
            replacement.id = Some(id);
            let updated = repo.update(&tenant("super-tenant"), replacement).await.unwrap();
            assert!(updated.canceled, "{:?}", strategy);
            assert_eq!(updated.cancel_date, canceled.cancel_date);

            let stored = repo.find_by_id(&tenant("tenant1"), id).await.unwrap();
            assert_eq!(stored.title, "Revived?");
            assert!(stored.canceled);
            assert_eq!(stored.cancel_date, canceled.cancel_date);
        }
    }

    #[tokio::test]
    async fn failed_release_fails_the_call() {
        let config = config(TenancyStrategy::Schema);
        let router = ConnectionRouter::from_config(&config, single_connection()).unwrap();
        router.bootstrap(&["tutorials"]).await.unwrap();
        let repo: TenantRepository<Tutorial> = Persistence::new(
            Arc::new(router),
            TenantIdentifierResolver::new(config.default_tenant.clone()),
            Arc::new(ObserverPipeline::with_defaults()),
            config.super_tenant.clone(),
        )
        .repository();

        // Inserting for tenant1 unregisters the default schema, so the
        // connection cannot be reset afterwards
        let mut raw = SqliteConnection::connect(&config.shared.url).await.unwrap();
        sqlx::query(
            r#"CREATE TRIGGER unregister_public AFTER INSERT ON "tenant1.tutorials"
               BEGIN DELETE FROM schemata WHERE name = 'public'; END"#,
        )
        .execute(&mut raw)
        .await
        .unwrap();

        let t1 = tenant("tenant1");
        let err = TenantContext::scope(t1.clone(), repo.create(&t1, Tutorial::new("Written")))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::Database(DatabaseError::SchemaSwitch { .. })
        ));

        // The write itself went through
        assert_eq!(repo.count(&t1).await.unwrap(), 1);
    }
}
