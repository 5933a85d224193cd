//! Scriptable in-memory database shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use query_gateway::{
    BindValue, DatabaseConnection, DatabasePool, GatewayError, GatewayResult, HttpServer,
    PoolConfig, PoolFactory, PoolManager, QueryGateway, Row, SqlValue,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

#[derive(Default)]
pub struct FakeDatabase {
    pub down: AtomicBool,
    pub fail_next: AtomicUsize,
    pub pools_built: AtomicUsize,
    pub pools_closed: AtomicUsize,
    pub in_use: AtomicUsize,
    pub rows: Mutex<Vec<Row>>,
    pub error: Mutex<Option<String>>,
    pub statements: Mutex<Vec<String>>,
}

pub struct FakeFactory {
    db: Arc<FakeDatabase>,
    next_id: AtomicU64,
}

impl FakeFactory {
    pub fn new(db: Arc<FakeDatabase>) -> Self {
        Self {
            db,
            next_id: AtomicU64::new(1),
        }
    }
}

impl PoolFactory for FakeFactory {
    fn create(&self, _config: &PoolConfig) -> GatewayResult<Arc<dyn DatabasePool>> {
        self.db.pools_built.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakePool {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            db: self.db.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct FakePool {
    id: u64,
    db: Arc<FakeDatabase>,
    closed: AtomicBool,
}

#[async_trait]
impl DatabasePool for FakePool {
    fn id(&self) -> u64 {
        self.id
    }

    async fn acquire(&self) -> GatewayResult<Box<dyn DatabaseConnection>> {
        let scripted = self
            .db
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if scripted || self.db.down.load(Ordering::SeqCst) || self.is_closed() {
            return Err(GatewayError::Connection("connection refused".to_string()));
        }
        self.db.in_use.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeConnection {
            db: self.db.clone(),
        }))
    }

    fn close(&self) -> GatewayResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.db.pools_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct FakeConnection {
    db: Arc<FakeDatabase>,
}

#[async_trait]
impl DatabaseConnection for FakeConnection {
    async fn query(&self, sql: &str, _values: &[BindValue]) -> GatewayResult<Vec<Row>> {
        self.db.statements.lock().unwrap().push(sql.to_string());
        if let Some(message) = self.db.error.lock().unwrap().clone() {
            return Err(GatewayError::Query(message));
        }
        let rows = self.db.rows.lock().unwrap().clone();
        if rows.is_empty() && sql == "SELECT 1" {
            return Ok(vec![Row::new().with("?column?", SqlValue::Integer(1))]);
        }
        Ok(rows)
    }
}

impl Drop for FakeConnection {
    fn drop(&mut self) {
        self.db.in_use.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn pool_config() -> PoolConfig {
    PoolConfig {
        hostname: "localhost".to_string(),
        port: 5432,
        database: "postgres".to_string(),
        user: "gateway".to_string(),
        password: "secret".to_string(),
        application_name: "query-gateway-tests".to_string(),
        pool_size: 2,
    }
}

pub fn fake_stack() -> (Arc<FakeDatabase>, Arc<PoolManager>, Arc<QueryGateway>) {
    let db = Arc::new(FakeDatabase::default());
    let manager = Arc::new(
        PoolManager::new(pool_config(), Arc::new(FakeFactory::new(db.clone()))).unwrap(),
    );
    let gateway = Arc::new(QueryGateway::new(manager.clone()));
    (db, manager, gateway)
}

/// Serve `gateway` on an ephemeral port until `shutdown` fires.
pub async fn spawn_server(
    gateway: Arc<QueryGateway>,
    shutdown: broadcast::Receiver<()>,
) -> (SocketAddr, tokio::task::JoinHandle<anyhow::Result<()>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(gateway);
    let handle = tokio::spawn(async move { server.serve(listener, shutdown).await });
    (addr, handle)
}
