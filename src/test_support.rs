//! Mock pool implementations shared by the unit tests.

use crate::config::PoolConfig;
use crate::domain::entities::{BindValue, Row, SqlValue};
use crate::domain::errors::{GatewayError, GatewayResult};
use crate::domain::ports::{DatabaseConnection, DatabasePool, PoolFactory};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Shared state behind every pool a [`MockPoolFactory`] builds.
#[derive(Default)]
pub struct MockDatabase {
    pub unreachable: AtomicBool,
    pub fail_next_acquires: AtomicUsize,
    pub close_fails: AtomicBool,
    pub hang_queries: AtomicBool,
    pub acquires: AtomicUsize,
    pub checked_out: AtomicUsize,
    pub closed_pools: AtomicUsize,
    pub query_error: Mutex<Option<String>>,
    pub rows: Mutex<Option<Vec<Row>>>,
    pub executed: Mutex<Vec<(String, Vec<BindValue>)>>,
}

impl MockDatabase {
    pub fn set_rows(&self, rows: Vec<Row>) {
        *self.rows.lock().unwrap() = Some(rows);
    }

    pub fn set_query_error(&self, message: &str) {
        *self.query_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn executed(&self) -> Vec<(String, Vec<BindValue>)> {
        self.executed.lock().unwrap().clone()
    }
}

pub struct MockPoolFactory {
    pub db: Arc<MockDatabase>,
    pub next_id: AtomicU64,
    pub build_fails: AtomicBool,
    pub built: AtomicUsize,
}

impl MockPoolFactory {
    pub fn new(db: Arc<MockDatabase>) -> Self {
        Self {
            db,
            next_id: AtomicU64::new(1),
            build_fails: AtomicBool::new(false),
            built: AtomicUsize::new(0),
        }
    }
}

impl PoolFactory for MockPoolFactory {
    fn create(&self, _config: &PoolConfig) -> GatewayResult<Arc<dyn DatabasePool>> {
        if self.build_fails.load(Ordering::SeqCst) {
            return Err(GatewayError::Config("cannot build pool".to_string()));
        }
        self.built.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockPool {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            db: self.db.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct MockPool {
    id: u64,
    db: Arc<MockDatabase>,
    closed: AtomicBool,
}

#[async_trait]
impl DatabasePool for MockPool {
    fn id(&self) -> u64 {
        self.id
    }

    async fn acquire(&self) -> GatewayResult<Box<dyn DatabaseConnection>> {
        self.db.acquires.fetch_add(1, Ordering::SeqCst);

        let scripted_failure = self
            .db
            .fail_next_acquires
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        if scripted_failure || self.db.unreachable.load(Ordering::SeqCst) {
            return Err(GatewayError::Connection("connection refused".to_string()));
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(GatewayError::Connection("pool is closed".to_string()));
        }

        self.db.checked_out.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            db: self.db.clone(),
        }))
    }

    fn close(&self) -> GatewayResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.db.closed_pools.fetch_add(1, Ordering::SeqCst);
        if self.db.close_fails.load(Ordering::SeqCst) {
            return Err(GatewayError::Connection("close failed".to_string()));
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct MockConnection {
    db: Arc<MockDatabase>,
}

#[async_trait]
impl DatabaseConnection for MockConnection {
    async fn query(&self, sql: &str, values: &[BindValue]) -> GatewayResult<Vec<Row>> {
        self.db
            .executed
            .lock()
            .unwrap()
            .push((sql.to_string(), values.to_vec()));

        if self.db.hang_queries.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        if let Some(message) = self.db.query_error.lock().unwrap().clone() {
            return Err(GatewayError::Query(message));
        }

        let rows = self.db.rows.lock().unwrap().clone();
        Ok(rows.unwrap_or_else(|| vec![Row::new().with("?column?", SqlValue::Integer(1))]))
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.db.checked_out.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn pool_config() -> PoolConfig {
    PoolConfig {
        hostname: "localhost".to_string(),
        port: 5432,
        database: "postgres".to_string(),
        user: "gateway".to_string(),
        password: "secret".to_string(),
        application_name: "query-gateway".to_string(),
        pool_size: 4,
    }
}
