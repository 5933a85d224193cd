//! Gateway error taxonomy.

use thiserror::Error;

/// Every failure the gateway can surface.
///
/// Only `Connection` has a side effect: PoolManager rebuilds the pool
/// before returning it.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GatewayError {
    /// Missing credentials or unusable pool settings. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Could not check a connection out of the pool.
    #[error("database connection failed: {0}")]
    Connection(String),

    /// The database rejected or failed the statement.
    #[error("{0}")]
    Query(String),

    /// The request body did not have the expected shape.
    #[error("{0}")]
    RequestShape(String),
}

impl GatewayError {
    pub fn is_connection(&self) -> bool {
        matches!(self, GatewayError::Connection(_))
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
