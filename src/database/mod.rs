pub mod driver;
pub mod manager;
pub mod models;
pub mod pool;
pub mod postgres;
pub mod repository;
pub mod routing;
pub mod sqlite;

pub use driver::{Connection, ConnectionId, RowScope, StoredRow};
pub use manager::{DatabaseError, DatabaseManager};
pub use pool::{ConnectionPool, DbPool, PoolOptions, PooledConnection};
pub use repository::{Persistence, RepositoryError, TenantRepository};
pub use routing::{ConnectionRouter, RoutedConnection};
