mod database_pool;
mod pool_factory;

pub use database_pool::{DatabaseConnection, DatabasePool};
pub use pool_factory::PoolFactory;
