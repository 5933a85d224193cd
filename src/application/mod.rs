//! Application Layer
//!
//! Pool lifecycle management and the query use case.

mod pool_manager;
mod query_gateway;

pub use pool_manager::PoolManager;
pub use query_gateway::{QueryGateway, PROBE_QUERY};
