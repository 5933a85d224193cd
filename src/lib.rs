//! query-gateway Library
//!
//! HTTP gateway that runs SQL statements against PostgreSQL and returns the
//! rows as JSON. Exposed as a library for the integration tests.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use adapters::inbound::{router, HttpServer};
pub use adapters::outbound::PostgresPoolFactory;
pub use application::{PoolManager, QueryGateway};
pub use config::{load_config, Config, PoolConfig};
pub use domain::entities::{BindValue, QueryResult, Row, SqlValue};
pub use domain::errors::{GatewayError, GatewayResult};
pub use domain::ports::{DatabaseConnection, DatabasePool, PoolFactory};
pub use domain::services::ResultSerializer;
pub use infrastructure::{LifecycleController, LifecycleState, ShutdownTrigger};
