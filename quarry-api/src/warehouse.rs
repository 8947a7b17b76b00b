//! Postgres-wire warehouse adapter.
//!
//! [`PgWarehouse`] implements the gateway the orchestrator executes
//! through; [`PgCatalog`] reads foreign keys and row estimates for the
//! join planner. Both share one deadpool connection pool.

use std::collections::HashMap;
use std::error::Error;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use quarry_core::{QuarryResult, Row, WarehouseError};
use quarry_planner::{CatalogSource, Relationship};
use quarry_storage::{QueryOutput, WarehouseGateway, WarehouseSession};
use serde_json::Value;
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::NoTls;
use tracing::{debug, warn};

use crate::error::{ApiError, ApiResult};

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    /// Schema whose catalog feeds the join planner.
    pub schema: String,
    pub max_size: usize,
    /// Wait for a free pooled connection.
    pub wait_timeout: Duration,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "analytics".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            schema: "public".to_string(),
            max_size: 16,
            wait_timeout: Duration::from_secs(10),
        }
    }
}

impl WarehouseConfig {
    /// Read `QUARRY_WAREHOUSE_*` variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("QUARRY_WAREHOUSE_HOST").unwrap_or(defaults.host),
            port: std::env::var("QUARRY_WAREHOUSE_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            dbname: std::env::var("QUARRY_WAREHOUSE_NAME").unwrap_or(defaults.dbname),
            user: std::env::var("QUARRY_WAREHOUSE_USER").unwrap_or(defaults.user),
            password: std::env::var("QUARRY_WAREHOUSE_PASSWORD").unwrap_or_default(),
            schema: std::env::var("QUARRY_WAREHOUSE_SCHEMA").unwrap_or(defaults.schema),
            max_size: std::env::var("QUARRY_WAREHOUSE_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_size),
            wait_timeout: std::env::var("QUARRY_WAREHOUSE_WAIT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.wait_timeout),
        }
    }

    /// Build the pool. No connection is opened until first use.
    pub fn create_pool(&self) -> ApiResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool = PoolConfig::new(self.max_size);
        pool.timeouts.wait = Some(self.wait_timeout);
        cfg.pool = Some(pool);

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ApiError::internal_error(format!("Failed to create warehouse pool: {}", e)))
    }
}

fn execution_error(err: tokio_postgres::Error) -> WarehouseError {
    let message = match err.as_db_error() {
        Some(db) => db.message().to_string(),
        None => err.to_string(),
    };
    WarehouseError::Execution { message }
}

// ============================================================================
// GATEWAY
// ============================================================================

#[derive(Clone)]
pub struct PgWarehouse {
    pool: Pool,
}

impl PgWarehouse {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }
}

#[async_trait]
impl WarehouseGateway for PgWarehouse {
    async fn connect(&self, _user: Option<&str>) -> QuarryResult<Box<dyn WarehouseSession>> {
        let client = self.pool.get().await.map_err(|e| WarehouseError::Connect {
            reason: e.to_string(),
        })?;
        Ok(Box::new(PgSession { client }))
    }
}

struct PgSession {
    client: deadpool_postgres::Object,
}

#[async_trait]
impl WarehouseSession for PgSession {
    async fn execute(&self, sql: &str) -> QuarryResult<QueryOutput> {
        let statement = self.client.prepare(sql).await.map_err(execution_error)?;

        if statement.columns().is_empty() {
            let affected = self
                .client
                .execute(&statement, &[])
                .await
                .map_err(execution_error)?;
            return Ok(QueryOutput::affected(affected));
        }

        let rows = self
            .client
            .query(&statement, &[])
            .await
            .map_err(execution_error)?;
        debug!(rows = rows.len(), "Warehouse statement returned rows");
        Ok(QueryOutput::from_rows(rows.iter().map(row_to_json).collect()))
    }
}

// ============================================================================
// ROW DECODING
// ============================================================================

fn row_to_json(row: &tokio_postgres::Row) -> Row {
    let mut out = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        out.insert(column.name().to_string(), cell_to_json(row, idx, column.type_()));
    }
    out
}

fn get<'a, T>(row: &'a tokio_postgres::Row, idx: usize) -> Result<Option<T>, tokio_postgres::Error>
where
    T: FromSql<'a>,
{
    row.try_get::<_, Option<T>>(idx)
}

/// Decode one cell. Types without a JSON mapping come back as null; cast
/// them to text in the statement to see their values.
fn cell_to_json(row: &tokio_postgres::Row, idx: usize, ty: &Type) -> Value {
    let decoded = match *ty {
        Type::BOOL => get::<bool>(row, idx).map(|v| v.map(Value::from)),
        Type::INT2 => get::<i16>(row, idx).map(|v| v.map(Value::from)),
        Type::INT4 => get::<i32>(row, idx).map(|v| v.map(Value::from)),
        Type::INT8 => get::<i64>(row, idx).map(|v| v.map(Value::from)),
        Type::OID => get::<u32>(row, idx).map(|v| v.map(Value::from)),
        Type::FLOAT4 => get::<f32>(row, idx).map(|v| v.map(Value::from)),
        Type::FLOAT8 => get::<f64>(row, idx).map(|v| v.map(Value::from)),
        Type::NUMERIC => get::<PgNumeric>(row, idx).map(|v| v.map(PgNumeric::into_json)),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            get::<String>(row, idx).map(|v| v.map(Value::from))
        }
        Type::JSON | Type::JSONB => get::<Value>(row, idx),
        Type::TIMESTAMPTZ => {
            get::<DateTime<Utc>>(row, idx).map(|v| v.map(|t| Value::from(t.to_rfc3339())))
        }
        Type::TIMESTAMP => get::<NaiveDateTime>(row, idx)
            .map(|v| v.map(|t| Value::from(t.format("%Y-%m-%dT%H:%M:%S%.f").to_string()))),
        Type::DATE => get::<NaiveDate>(row, idx).map(|v| v.map(|d| Value::from(d.to_string()))),
        Type::TIME => get::<NaiveTime>(row, idx).map(|v| v.map(|t| Value::from(t.to_string()))),
        _ => {
            debug!(column = idx, pg_type = %ty, "No JSON mapping for column type");
            Ok(None)
        }
    };

    match decoded {
        Ok(value) => value.unwrap_or(Value::Null),
        Err(e) => {
            warn!(column = idx, error = %e, "Failed to decode column");
            Value::Null
        }
    }
}

/// `NUMERIC` decoded to its exact decimal text.
struct PgNumeric(String);

impl PgNumeric {
    /// JSON number when it fits one, else the decimal text.
    fn into_json(self) -> Value {
        match serde_json::from_str::<serde_json::Number>(&self.0) {
            Ok(n) => Value::Number(n),
            Err(_) => Value::String(self.0),
        }
    }
}

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        numeric_text(raw).map(PgNumeric)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Render the binary `NUMERIC` wire form: a header of digit count, weight,
/// sign and display scale, then base-10000 digit groups.
fn numeric_text(raw: &[u8]) -> Result<String, Box<dyn Error + Sync + Send>> {
    if raw.len() < 8 {
        return Err("numeric header truncated".into());
    }
    let read = |i: usize| u16::from_be_bytes([raw[i], raw[i + 1]]);
    let ndigits = read(0) as usize;
    let weight = i32::from(read(2) as i16);
    let sign = read(4);
    let dscale = read(6) as usize;
    if raw.len() < 8 + 2 * ndigits {
        return Err("numeric digits truncated".into());
    }

    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        _ => {}
    }

    let digits: Vec<u16> = (0..ndigits).map(|i| read(8 + 2 * i)).collect();
    // Group holding 10000^pos.
    let group = |pos: i32| -> u16 {
        usize::try_from(weight - pos)
            .ok()
            .and_then(|idx| digits.get(idx).copied())
            .unwrap_or(0)
    };

    let mut text = String::new();
    if sign == NUMERIC_NEG {
        text.push('-');
    }

    if weight < 0 {
        text.push('0');
    } else {
        text.push_str(&group(weight).to_string());
        for pos in (0..weight).rev() {
            text.push_str(&format!("{:04}", group(pos)));
        }
    }

    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + 4);
        let mut pos = -1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", group(pos)));
            pos -= 1;
        }
        fraction.truncate(dscale);
        text.push('.');
        text.push_str(&fraction);
    }

    Ok(text)
}

// ============================================================================
// CATALOG
// ============================================================================

const TABLE_WEIGHTS_SQL: &str = "\
SELECT c.relname::text, GREATEST(c.reltuples, 0)::float8
FROM pg_class c
JOIN pg_namespace n ON n.oid = c.relnamespace
WHERE n.nspname = $1 AND c.relkind IN ('r', 'p', 'm')";

const RELATIONSHIPS_SQL: &str = "\
SELECT kcu.table_name::text, kcu.column_name::text, ccu.table_name::text, ccu.column_name::text
FROM information_schema.table_constraints tc
JOIN information_schema.key_column_usage kcu
  ON kcu.constraint_name = tc.constraint_name AND kcu.table_schema = tc.table_schema
JOIN information_schema.constraint_column_usage ccu
  ON ccu.constraint_name = tc.constraint_name AND ccu.table_schema = tc.table_schema
WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_schema = $1
ORDER BY kcu.table_name, kcu.ordinal_position";

/// Catalog read from `pg_class` row estimates and declared foreign keys.
#[derive(Clone)]
pub struct PgCatalog {
    pool: Pool,
    schema: String,
}

impl PgCatalog {
    pub fn new(pool: Pool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }

    async fn client(&self) -> QuarryResult<deadpool_postgres::Object> {
        Ok(self.pool.get().await.map_err(|e| WarehouseError::Connect {
            reason: e.to_string(),
        })?)
    }
}

#[async_trait]
impl CatalogSource for PgCatalog {
    async fn table_weights(&self) -> QuarryResult<HashMap<String, f64>> {
        let client = self.client().await?;
        let rows = client
            .query(TABLE_WEIGHTS_SQL, &[&self.schema])
            .await
            .map_err(execution_error)?;

        let mut weights = HashMap::with_capacity(rows.len());
        for row in rows {
            let table: String = row.try_get(0).map_err(execution_error)?;
            let weight: f64 = row.try_get(1).map_err(execution_error)?;
            weights.insert(table, weight);
        }
        Ok(weights)
    }

    async fn relationships(&self) -> QuarryResult<Vec<Relationship>> {
        let client = self.client().await?;
        let rows = client
            .query(RELATIONSHIPS_SQL, &[&self.schema])
            .await
            .map_err(execution_error)?;

        rows.iter()
            .map(|row| -> QuarryResult<Relationship> {
                Ok(Relationship::new(
                    row.try_get::<_, String>(0).map_err(execution_error)?,
                    row.try_get::<_, String>(1).map_err(execution_error)?,
                    row.try_get::<_, String>(2).map_err(execution_error)?,
                    row.try_get::<_, String>(3).map_err(execution_error)?,
                ))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric(weight: i16, sign: u16, dscale: u16, digits: &[u16]) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&(digits.len() as u16).to_be_bytes());
        raw.extend_from_slice(&weight.to_be_bytes());
        raw.extend_from_slice(&sign.to_be_bytes());
        raw.extend_from_slice(&dscale.to_be_bytes());
        for d in digits {
            raw.extend_from_slice(&d.to_be_bytes());
        }
        raw
    }

    #[test]
    fn test_numeric_text() -> Result<(), Box<dyn Error + Sync + Send>> {
        assert_eq!(numeric_text(&numeric(0, 0, 2, &[123, 4500]))?, "123.45");
        assert_eq!(numeric_text(&numeric(1, 0, 0, &[1234, 5678]))?, "12345678");
        assert_eq!(numeric_text(&numeric(-1, 0, 4, &[12]))?, "0.0012");
        assert_eq!(numeric_text(&numeric(0, NUMERIC_NEG, 1, &[7, 5000]))?, "-7.5");
        assert_eq!(numeric_text(&numeric(1, 0, 0, &[5]))?, "50000");
        assert_eq!(numeric_text(&numeric(0, 0, 0, &[]))?, "0");
        assert_eq!(numeric_text(&numeric(0, NUMERIC_NAN, 0, &[]))?, "NaN");
        Ok(())
    }

    #[test]
    fn test_numeric_truncated_is_error() {
        assert!(numeric_text(&[0, 1]).is_err());
        assert!(numeric_text(&numeric(0, 0, 0, &[1])[..8]).is_err());
    }

    #[test]
    fn test_numeric_into_json() {
        assert_eq!(
            PgNumeric("123.45".to_string()).into_json(),
            serde_json::json!(123.45)
        );
        assert_eq!(PgNumeric("42".to_string()).into_json(), serde_json::json!(42));
        assert_eq!(PgNumeric("NaN".to_string()).into_json(), serde_json::json!("NaN"));
    }

    #[test]
    fn test_warehouse_config_default() {
        let config = WarehouseConfig::default();
        assert_eq!(config.port, 5432);
        assert_eq!(config.schema, "public");
        assert_eq!(config.max_size, 16);
    }
}
