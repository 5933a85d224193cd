//! Pool Factory Port
//!
//! Builds fresh pools from the immutable pool configuration.

use crate::config::PoolConfig;
use crate::domain::errors::GatewayResult;
use crate::domain::ports::DatabasePool;
use std::sync::Arc;

/// Builds a new, empty pool.
///
/// Construction must not connect eagerly: a factory is also called while
/// the database is unreachable, during pool recreation.
pub trait PoolFactory: Send + Sync {
    fn create(&self, config: &PoolConfig) -> GatewayResult<Arc<dyn DatabasePool>>;
}
