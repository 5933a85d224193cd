//! Outbound Adapters
//!
//! PostgreSQL pool, parameter binding and the NUMERIC codec.

pub mod bind;
pub mod numeric;
mod postgres_pool;

pub use postgres_pool::{PostgresConnection, PostgresPool, PostgresPoolFactory};
