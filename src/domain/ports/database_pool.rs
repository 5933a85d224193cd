//! Database Pool Port
//!
//! Defines the interface for checking connections out of a pool and
//! running a single statement on them.

use crate::domain::entities::{BindValue, Row};
use crate::domain::errors::GatewayResult;
use async_trait::async_trait;

/// A live pool of reusable database connections.
///
/// Pools are never repaired in place. When `acquire` fails the owner
/// closes the pool and builds a new one through a [`PoolFactory`].
///
/// [`PoolFactory`]: crate::domain::ports::PoolFactory
#[async_trait]
pub trait DatabasePool: Send + Sync {
    /// Identity assigned by the factory that built this pool.
    fn id(&self) -> u64;

    /// Check out a connection.
    ///
    /// Fails with `GatewayError::Connection` when the pool is exhausted
    /// or the database is unreachable.
    async fn acquire(&self) -> GatewayResult<Box<dyn DatabaseConnection>>;

    /// Stop handing out connections and drop idle ones.
    fn close(&self) -> GatewayResult<()>;

    fn is_closed(&self) -> bool;
}

/// A connection checked out of a [`DatabasePool`].
///
/// Dropping the handle returns the connection to the pool it came from.
#[async_trait]
pub trait DatabaseConnection: Send + Sync {
    /// Execute one statement with positional bind values.
    async fn query(&self, sql: &str, values: &[BindValue]) -> GatewayResult<Vec<Row>>;
}
