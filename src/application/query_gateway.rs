//! Query Gateway - Main application use case
//!
//! Runs exactly one statement on exactly one pooled connection.

use crate::application::PoolManager;
use crate::domain::entities::{BindValue, QueryResult};
use crate::domain::errors::GatewayResult;
use std::sync::Arc;

/// Statement used by the health check.
pub const PROBE_QUERY: &str = "SELECT 1";

/// Executes single statements against the managed pool.
///
/// The connection handle is owned by the `execute` future, so it goes back
/// to its pool whether the statement succeeds, fails, or the request is
/// dropped mid-flight. There are no transactions: each call stands alone.
pub struct QueryGateway {
    pool_manager: Arc<PoolManager>,
}

impl QueryGateway {
    pub fn new(pool_manager: Arc<PoolManager>) -> Self {
        Self { pool_manager }
    }

    pub fn pool_manager(&self) -> &Arc<PoolManager> {
        &self.pool_manager
    }

    /// Execute one statement with positional bind values.
    ///
    /// Fails with `GatewayError::Connection` when no connection could be
    /// acquired (the pool has already been replaced by then), or
    /// `GatewayError::Query` when the database rejected the statement.
    pub async fn execute(&self, query: &str, values: &[BindValue]) -> GatewayResult<QueryResult> {
        let conn = self.pool_manager.acquire_connection().await?;
        let rows = conn.query(query, values).await;
        drop(conn);

        let rows = rows?;
        tracing::debug!("query returned {} rows", rows.len());
        Ok(QueryResult::new(rows))
    }

    /// Run the health probe.
    pub async fn probe(&self) -> GatewayResult<()> {
        self.execute(PROBE_QUERY, &[]).await.map(|_| ())
    }
}
