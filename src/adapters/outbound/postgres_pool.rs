//! PostgreSQL Pool Adapter
//!
//! Implements the pool ports on top of deadpool-postgres and decodes
//! tokio-postgres rows into domain rows.

use crate::adapters::outbound::bind::bind_params;
use crate::adapters::outbound::numeric;
use crate::config::PoolConfig;
use crate::domain::entities::{BindValue, Row, SqlValue};
use crate::domain::errors::{GatewayError, GatewayResult};
use crate::domain::ports::{DatabaseConnection, DatabasePool, PoolFactory};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use std::error::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_postgres::types::{FromSql, Kind, ToSql, Type};
use tokio_postgres::NoTls;

/// Builds deadpool-backed pools. Each pool gets the next generation number.
pub struct PostgresPoolFactory {
    next_id: AtomicU64,
}

impl PostgresPoolFactory {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }
}

impl Default for PostgresPoolFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolFactory for PostgresPoolFactory {
    fn create(&self, config: &PoolConfig) -> GatewayResult<Arc<dyn DatabasePool>> {
        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(&config.hostname)
            .port(config.port)
            .dbname(&config.database)
            .user(&config.user)
            .password(&config.password)
            .application_name(&config.application_name);

        let manager_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let manager = Manager::from_config(pg_config, NoTls, manager_config);

        let pool = Pool::builder(manager)
            .max_size(config.pool_size)
            .build()
            .map_err(|e| GatewayError::Config(format!("cannot build pool: {}", e)))?;

        Ok(Arc::new(PostgresPool {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            pool,
        }))
    }
}

/// A deadpool pool. Connections are opened lazily on the first `acquire`.
pub struct PostgresPool {
    id: u64,
    pool: Pool,
}

#[async_trait]
impl DatabasePool for PostgresPool {
    fn id(&self) -> u64 {
        self.id
    }

    async fn acquire(&self) -> GatewayResult<Box<dyn DatabaseConnection>> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| GatewayError::Connection(e.to_string()))?;
        Ok(Box::new(PostgresConnection { client }))
    }

    fn close(&self) -> GatewayResult<()> {
        self.pool.close();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

/// A checked-out client. Dropping it hands the client back to deadpool.
pub struct PostgresConnection {
    client: Object,
}

#[async_trait]
impl DatabaseConnection for PostgresConnection {
    /// Runs over the extended protocol, so `sql` must hold exactly one
    /// statement. Statements are cached per connection.
    async fn query(&self, sql: &str, values: &[BindValue]) -> GatewayResult<Vec<Row>> {
        let statement = self.client.prepare_cached(sql).await.map_err(query_error)?;
        let params = bind_params(statement.params(), values)?;
        let refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let rows = self
            .client
            .query(&statement, &refs)
            .await
            .map_err(query_error)?;

        rows.iter().map(decode_row).collect()
    }
}

/// Prefer the server's diagnostic (severity, message, detail) over the
/// driver's generic wrapper text.
fn query_error(err: tokio_postgres::Error) -> GatewayError {
    match err.as_db_error() {
        Some(db) => GatewayError::Query(db.to_string()),
        None => GatewayError::Query(err.to_string()),
    }
}

type DecodeError = Box<dyn Error + Sync + Send>;

fn decode_row(row: &tokio_postgres::Row) -> GatewayResult<Row> {
    let mut decoded = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let raw = row
            .try_get::<_, Option<RawBytes>>(idx)
            .map_err(query_error)?;
        let value = match raw {
            Some(raw) => decode_value(column.type_(), &raw.0).map_err(|e| {
                GatewayError::Query(format!("cannot decode column {}: {}", column.name(), e))
            })?,
            None => SqlValue::Null,
        };
        decoded.push(column.name(), value);
    }
    Ok(decoded)
}

/// Decode one non-null value from its binary wire form.
fn decode_value(ty: &Type, raw: &[u8]) -> Result<SqlValue, DecodeError> {
    let value = match *ty {
        Type::BOOL => SqlValue::Bool(bool::from_sql(ty, raw)?),
        // "char" is a single byte of text.
        Type::CHAR => SqlValue::Text(String::from_utf8_lossy(raw).into_owned()),
        Type::INT2 => SqlValue::Integer(i16::from_sql(ty, raw)?.into()),
        Type::INT4 => SqlValue::Integer(i32::from_sql(ty, raw)?.into()),
        Type::OID => SqlValue::Integer(u32::from_sql(ty, raw)?.into()),
        Type::INT8 => SqlValue::BigInt(i64::from_sql(ty, raw)?),
        Type::FLOAT4 => SqlValue::Float(f32::from_sql(ty, raw)?.into()),
        Type::FLOAT8 => SqlValue::Float(f64::from_sql(ty, raw)?),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            SqlValue::Text(String::from_sql(ty, raw)?)
        }
        Type::BYTEA => SqlValue::Bytes(raw.to_vec()),
        Type::JSON | Type::JSONB => SqlValue::Json(serde_json::Value::from_sql(ty, raw)?),
        Type::NUMERIC => SqlValue::Text(numeric::decode(raw)?),
        Type::UUID => SqlValue::Text(uuid::Uuid::from_sql(ty, raw)?.to_string()),
        Type::DATE => match infinity(raw) {
            Some(label) => SqlValue::Text(label.to_string()),
            None => SqlValue::Text(NaiveDate::from_sql(ty, raw)?.to_string()),
        },
        Type::TIME => SqlValue::Text(NaiveTime::from_sql(ty, raw)?.to_string()),
        Type::TIMESTAMP => match infinity(raw) {
            Some(label) => SqlValue::Text(label.to_string()),
            None => SqlValue::Text(
                NaiveDateTime::from_sql(ty, raw)?
                    .format("%Y-%m-%dT%H:%M:%S%.f")
                    .to_string(),
            ),
        },
        Type::TIMESTAMPTZ => match infinity(raw) {
            Some(label) => SqlValue::Text(label.to_string()),
            None => SqlValue::Text(
                DateTime::<Utc>::from_sql(ty, raw)?.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            ),
        },
        _ => match ty.kind() {
            // Enum labels travel as plain UTF-8.
            Kind::Enum(_) => SqlValue::Text(String::from_utf8_lossy(raw).into_owned()),
            Kind::Array(elem) => decode_array(elem, raw)?,
            Kind::Domain(base) => decode_value(base, raw)?,
            _ => SqlValue::Bytes(raw.to_vec()),
        },
    };
    Ok(value)
}

/// `infinity` / `-infinity` sentinels of date (int32) and timestamp (int64).
fn infinity(raw: &[u8]) -> Option<&'static str> {
    match raw.len() {
        4 => match i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) {
            i32::MAX => Some("infinity"),
            i32::MIN => Some("-infinity"),
            _ => None,
        },
        8 => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(raw);
            match i64::from_be_bytes(bytes) {
                i64::MAX => Some("infinity"),
                i64::MIN => Some("-infinity"),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Binary array layout:
/// `ndim i32 | has_null i32 | elem_oid u32 | (len i32, lbound i32)[ndim] |
/// (len i32, bytes)[*]`, with `len = -1` for NULL elements.
fn decode_array(elem: &Type, raw: &[u8]) -> Result<SqlValue, DecodeError> {
    let mut buf = raw;
    let ndim = read_i32(&mut buf)?;
    let _has_null = read_i32(&mut buf)?;
    let _elem_oid = read_i32(&mut buf)?;
    if ndim < 0 {
        return Err("negative array dimension count".into());
    }

    let mut dims = Vec::with_capacity(ndim as usize);
    for _ in 0..ndim {
        let len = read_i32(&mut buf)?;
        let _lower_bound = read_i32(&mut buf)?;
        dims.push(usize::try_from(len).map_err(|_| "negative array dimension")?);
    }

    let total: usize = if dims.is_empty() { 0 } else { dims.iter().product() };
    let mut items = Vec::with_capacity(total);
    for _ in 0..total {
        let len = read_i32(&mut buf)?;
        if len < 0 {
            items.push(SqlValue::Null);
        } else {
            let bytes = take(&mut buf, len as usize)?;
            items.push(decode_value(elem, bytes)?);
        }
    }
    if !buf.is_empty() {
        return Err("trailing bytes after array elements".into());
    }

    Ok(nest(&dims, &mut items.into_iter()))
}

fn nest<I: Iterator<Item = SqlValue>>(dims: &[usize], items: &mut I) -> SqlValue {
    match dims.split_first() {
        None => SqlValue::Array(Vec::new()),
        Some((&len, [])) => SqlValue::Array(items.take(len).collect()),
        Some((&len, rest)) => SqlValue::Array((0..len).map(|_| nest(rest, items)).collect()),
    }
}

fn take<'a>(buf: &mut &'a [u8], n: usize) -> Result<&'a [u8], DecodeError> {
    if buf.len() < n {
        return Err("array value too short".into());
    }
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

fn read_i32(buf: &mut &[u8]) -> Result<i32, DecodeError> {
    let b = take(buf, 4)?;
    Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

/// The undecoded wire bytes of a column of any type.
struct RawBytes(Vec<u8>);

impl<'a> FromSql<'a> for RawBytes {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, DecodeError> {
        Ok(RawBytes(raw.to_vec()))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::test_support::pool_config;

    #[test]
    fn test_factory_assigns_increasing_ids() {
        let factory = PostgresPoolFactory::new();
        let first = factory.create(&pool_config()).unwrap();
        let second = factory.create(&pool_config()).unwrap();
        assert_eq!(first.id(), 1);
        assert_eq!(second.id(), 2);
    }

    #[test]
    fn test_close_marks_pool_closed() {
        let factory = PostgresPoolFactory::default();
        let pool = factory.create(&pool_config()).unwrap();
        assert!(!pool.is_closed());
        pool.close().unwrap();
        assert!(pool.is_closed());
    }

    #[tokio::test]
    async fn test_acquire_from_closed_pool_is_connection_error() {
        let factory = PostgresPoolFactory::new();
        let pool = factory.create(&pool_config()).unwrap();
        pool.close().unwrap();

        let result = pool.acquire().await;
        assert!(matches!(result, Err(GatewayError::Connection(_))));
    }

    #[tokio::test]
    async fn test_acquire_unreachable_is_connection_error() {
        let mut config = pool_config();
        config.hostname = "127.0.0.1".to_string();
        config.port = 1;

        let pool = PostgresPoolFactory::new().create(&config).unwrap();
        let result = pool.acquire().await;
        assert!(matches!(result, Err(GatewayError::Connection(_))));
    }

    #[test]
    fn test_raw_bytes_accepts_everything() {
        assert!(<RawBytes as FromSql>::accepts(&Type::POINT));
        let raw = RawBytes::from_sql(&Type::POINT, &[1, 2, 3]).unwrap();
        assert_eq!(raw.0, vec![1, 2, 3]);
    }

    #[test]
    fn test_decode_numeric() {
        let raw = [0, 2, 0, 0, 0x40, 0, 0, 2, 0, 123, 0x11, 0x94];
        assert_eq!(
            decode_value(&Type::NUMERIC, &raw).unwrap(),
            SqlValue::Text("-123.45".to_string())
        );
    }

    #[test]
    fn test_decode_char_is_text() {
        assert_eq!(
            decode_value(&Type::CHAR, b"r").unwrap(),
            SqlValue::Text("r".to_string())
        );
    }

    #[test]
    fn test_decode_scalars() {
        assert_eq!(decode_value(&Type::BOOL, &[1]).unwrap(), SqlValue::Bool(true));
        assert_eq!(
            decode_value(&Type::INT4, &42i32.to_be_bytes()).unwrap(),
            SqlValue::Integer(42)
        );
        assert_eq!(
            decode_value(&Type::INT8, &(-7i64).to_be_bytes()).unwrap(),
            SqlValue::BigInt(-7)
        );
        assert_eq!(
            decode_value(&Type::BYTEA, &[0xde, 0xad]).unwrap(),
            SqlValue::Bytes(vec![0xde, 0xad])
        );
        assert_eq!(
            decode_value(&Type::POINT, &[1, 2, 3]).unwrap(),
            SqlValue::Bytes(vec![1, 2, 3])
        );
    }

    #[test]
    fn test_decode_infinite_dates() {
        let text = |s: &str| SqlValue::Text(s.to_string());
        assert_eq!(
            decode_value(&Type::TIMESTAMP, &i64::MAX.to_be_bytes()).unwrap(),
            text("infinity")
        );
        assert_eq!(
            decode_value(&Type::TIMESTAMPTZ, &i64::MIN.to_be_bytes()).unwrap(),
            text("-infinity")
        );
        assert_eq!(
            decode_value(&Type::DATE, &i32::MAX.to_be_bytes()).unwrap(),
            text("infinity")
        );
        assert_eq!(
            decode_value(&Type::DATE, &i32::MIN.to_be_bytes()).unwrap(),
            text("-infinity")
        );
        // 2000-01-02, one day after the PostgreSQL epoch
        assert_eq!(
            decode_value(&Type::DATE, &1i32.to_be_bytes()).unwrap(),
            text("2000-01-02")
        );
    }

    fn array_bytes(elem_oid: u32, dims: &[i32], items: &[Option<&[u8]>]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(dims.len() as i32).to_be_bytes());
        out.extend_from_slice(&(items.iter().any(Option::is_none) as i32).to_be_bytes());
        out.extend_from_slice(&elem_oid.to_be_bytes());
        for len in dims {
            out.extend_from_slice(&len.to_be_bytes());
            out.extend_from_slice(&1i32.to_be_bytes());
        }
        for item in items {
            match item {
                Some(bytes) => {
                    out.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
                    out.extend_from_slice(bytes);
                }
                None => out.extend_from_slice(&(-1i32).to_be_bytes()),
            }
        }
        out
    }

    #[test]
    fn test_decode_int4_array() {
        let one = 1i32.to_be_bytes();
        let two = 2i32.to_be_bytes();
        let raw = array_bytes(23, &[3], &[Some(&one), None, Some(&two)]);

        assert_eq!(
            decode_value(&Type::INT4_ARRAY, &raw).unwrap(),
            SqlValue::Array(vec![SqlValue::Integer(1), SqlValue::Null, SqlValue::Integer(2)])
        );
    }

    #[test]
    fn test_decode_text_array_two_dimensions() {
        let raw = array_bytes(25, &[2, 2], &[Some(b"a"), Some(b"b"), Some(b"c"), Some(b"d")]);
        let text = |s: &str| SqlValue::Text(s.to_string());

        assert_eq!(
            decode_value(&Type::TEXT_ARRAY, &raw).unwrap(),
            SqlValue::Array(vec![
                SqlValue::Array(vec![text("a"), text("b")]),
                SqlValue::Array(vec![text("c"), text("d")]),
            ])
        );
    }

    #[test]
    fn test_decode_empty_array() {
        let raw = array_bytes(20, &[], &[]);
        assert_eq!(
            decode_value(&Type::INT8_ARRAY, &raw).unwrap(),
            SqlValue::Array(Vec::new())
        );
    }

    #[test]
    fn test_decode_truncated_array() {
        let mut raw = array_bytes(23, &[2], &[Some(&1i32.to_be_bytes()), Some(&2i32.to_be_bytes())]);
        raw.truncate(raw.len() - 2);
        assert!(decode_value(&Type::INT4_ARRAY, &raw).is_err());
    }

    #[test]
    fn test_decode_enum_and_domain() {
        let mood = Type::new(
            "mood".to_string(),
            16385,
            Kind::Enum(vec!["happy".to_string(), "sad".to_string()]),
            "public".to_string(),
        );
        assert_eq!(
            decode_value(&mood, b"happy").unwrap(),
            SqlValue::Text("happy".to_string())
        );

        let positive = Type::new(
            "positive".to_string(),
            16390,
            Kind::Domain(Type::INT4),
            "public".to_string(),
        );
        assert_eq!(
            decode_value(&positive, &5i32.to_be_bytes()).unwrap(),
            SqlValue::Integer(5)
        );
    }
}
