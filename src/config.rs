use crate::domain::errors::GatewayError;
use std::fmt;
use std::time::Duration;

/// Startup flag that swaps the real database for an unroutable dummy one,
/// so an image can be built and smoke-started without a database.
pub const CONTAINER_SETUP_FLAG: &str = "--container-setup";

/// Connection settings for the backing PostgreSQL database.
///
/// Resolved once at startup and never mutated; every pool the gateway
/// builds, including replacements, comes from the same value.
#[derive(Clone, PartialEq)]
pub struct PoolConfig {
    pub hostname: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub application_name: String,
    pub pool_size: usize,
}

impl PoolConfig {
    /// Dummy target used with [`CONTAINER_SETUP_FLAG`].
    pub fn container_setup() -> Self {
        Self {
            hostname: "127.0.0.254".to_string(),
            port: 5432,
            database: "postgres".to_string(),
            user: "dummy".to_string(),
            password: "dummy".to_string(),
            application_name: "query-gateway".to_string(),
            pool_size: 1,
        }
    }
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("application_name", &self.application_name)
            .field("pool_size", &self.pool_size)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,
    pub debug: bool,
    pub restart_after_secs: u64,
    pub grace_delay_ms: u64,
    pub container_setup: bool,
    pub database: PoolConfig,
}

impl Config {
    pub fn restart_after(&self) -> Duration {
        Duration::from_secs(self.restart_after_secs)
    }

    pub fn grace_delay(&self) -> Duration {
        Duration::from_millis(self.grace_delay_ms)
    }
}

/// Whether debug logging was requested. Read before the rest of the
/// configuration so configuration errors can be logged.
pub fn debug_enabled() -> bool {
    std::env::var("DEBUG").is_ok()
}

pub fn load_config() -> Result<Config, GatewayError> {
    load_config_from(|key| std::env::var(key).ok(), std::env::args().skip(1))
}

/// Resolve the configuration from a variable lookup and the process
/// arguments (without the program name).
pub fn load_config_from<F, I>(lookup: F, args: I) -> Result<Config, GatewayError>
where
    F: Fn(&str) -> Option<String>,
    I: IntoIterator<Item = String>,
{
    let container_setup = args
        .into_iter()
        .any(|arg| arg == CONTAINER_SETUP_FLAG || arg == "-container-setup");

    let listen_addr = lookup("GATEWAY_LISTEN_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string());

    let debug = lookup("DEBUG").is_some();

    let restart_after_secs = lookup("GATEWAY_RESTART_SECS")
        .and_then(|v| v.parse().ok())
        .unwrap_or(48 * 60 * 60);

    let grace_delay_ms = lookup("GATEWAY_GRACE_MS")
        .and_then(|v| v.parse().ok())
        .unwrap_or(2000);

    let database = if container_setup {
        PoolConfig::container_setup()
    } else {
        load_pool_config(&lookup)?
    };

    Ok(Config {
        listen_addr,
        debug,
        restart_after_secs,
        grace_delay_ms,
        container_setup,
        database,
    })
}

fn load_pool_config<F>(lookup: &F) -> Result<PoolConfig, GatewayError>
where
    F: Fn(&str) -> Option<String>,
{
    let hostname = lookup("POSTGRES_HOSTNAME").unwrap_or_else(|| "localhost".to_string());

    let port = lookup("POSTGRES_PORT")
        .and_then(|v| v.parse().ok())
        .unwrap_or(5432);

    let database = lookup("POSTGRES_DATABASE").unwrap_or_else(|| "postgres".to_string());

    let application_name =
        lookup("POSTGRES_APPNAME").unwrap_or_else(|| "query-gateway".to_string());

    let pool_size = lookup("POOL_SIZE")
        .and_then(|v| v.parse().ok())
        .filter(|size: &usize| *size > 0)
        .unwrap_or(10);

    let user = lookup("POSTGRES_USER").filter(|v| !v.is_empty());
    let password = lookup("POSTGRES_PASSWORD").filter(|v| !v.is_empty());

    let (user, password) = match (user, password) {
        (Some(user), Some(password)) => (user, password),
        _ => {
            return Err(GatewayError::Config(
                "MISSING DATABASE USER OR PASSWORD".to_string(),
            ))
        }
    };

    Ok(PoolConfig {
        hostname,
        port,
        database,
        user,
        password,
        application_name,
        pool_size,
    })
}
