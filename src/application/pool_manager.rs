//! Pool Manager
//!
//! Owns the single live connection pool and replaces it wholesale when a
//! connection cannot be acquired.

use crate::config::PoolConfig;
use crate::domain::errors::GatewayResult;
use crate::domain::ports::{DatabaseConnection, DatabasePool, PoolFactory};
use parking_lot::RwLock;
use std::sync::Arc;

/// Holder of the current pool.
///
/// An acquire failure is fail-fast: the failing pool is closed, a new one is
/// installed, and the original error is returned. The triggering request
/// still fails; the next one runs against the fresh pool. There is no
/// backoff, so every failed acquire on the current pool repeats the repair
/// step; failures on a pool that was already swapped out leave it alone.
pub struct PoolManager {
    config: PoolConfig,
    factory: Arc<dyn PoolFactory>,
    current: RwLock<Arc<dyn DatabasePool>>,
}

impl PoolManager {
    /// Build the first pool and wrap it.
    pub fn new(config: PoolConfig, factory: Arc<dyn PoolFactory>) -> GatewayResult<Self> {
        let pool = factory.create(&config)?;
        tracing::info!(
            "connection pool {} created for {}:{}/{} (size {})",
            pool.id(),
            config.hostname,
            config.port,
            config.database,
            config.pool_size
        );

        Ok(Self {
            config,
            factory,
            current: RwLock::new(pool),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Snapshot of the current pool.
    pub fn current_pool(&self) -> Arc<dyn DatabasePool> {
        self.current.read().clone()
    }

    /// Identity of the current pool.
    pub fn generation(&self) -> u64 {
        self.current.read().id()
    }

    /// Check a connection out of the current pool, repairing the pool on
    /// failure.
    pub async fn acquire_connection(&self) -> GatewayResult<Box<dyn DatabaseConnection>> {
        let pool = self.current_pool();

        match pool.acquire().await {
            Ok(conn) => Ok(conn),
            Err(err) => {
                tracing::warn!("database errored ({}), creating new pool", err);
                self.replace(&pool);
                Err(err)
            }
        }
    }

    /// Swap out `failed` unless a concurrent acquire already did. The
    /// write lock is held across the rebuild, so generations only grow.
    fn replace(&self, failed: &Arc<dyn DatabasePool>) {
        let mut current = self.current.write();
        if current.id() != failed.id() {
            tracing::debug!("pool {} already replaced by pool {}", failed.id(), current.id());
            return;
        }

        if let Err(e) = failed.close() {
            tracing::debug!("ignoring error while closing pool {}: {}", failed.id(), e);
        }

        match self.factory.create(&self.config) {
            Ok(fresh) => {
                tracing::info!("replaced pool {} with pool {}", failed.id(), fresh.id());
                *current = fresh;
            }
            Err(e) => {
                tracing::error!("failed to build replacement pool: {}", e);
            }
        }
    }

    /// Best-effort close of the current pool.
    pub fn close(&self) {
        let pool = self.current_pool();
        if let Err(e) = pool.close() {
            tracing::debug!("ignoring error while closing pool {}: {}", pool.id(), e);
        }
    }
}
