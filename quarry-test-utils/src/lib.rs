//! QUARRY Test Utilities
//!
//! Shared test infrastructure for the QUARRY workspace:
//! - Mock warehouse gateway and catalog
//! - Failing and stalled stores for degradation tests
//! - Proptest generators for SQL and version vectors
//! - Fixtures for common setups

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

pub use quarry_core::{
    CacheEntry, CacheStatus, QuarryConfig, QuarryError, QuarryResult, Row, Rows, StoreError,
    TableVersion, VersionVector, WarehouseError,
};
pub use quarry_planner::{CatalogSource, Relationship, StaticCatalog};
pub use quarry_storage::{
    Admission, AdmissionGuard, CacheBackend, InMemoryCacheBackend, InMemoryVersionTracker,
    QueryCache, QueryOutput, QueryRequest, StoreMemory, VersionTracker, WarehouseGateway,
    WarehouseSession,
};

#[doc(hidden)]
pub use serde_json as __serde_json;

/// Build a [`Row`] from `column => value` pairs, keeping column order.
///
/// ```ignore
/// let r = row! { "id" => 1, "name" => "KJFK" };
/// ```
#[macro_export]
macro_rules! row {
    ($($column:expr => $value:expr),* $(,)?) => {{
        let mut row = $crate::Row::new();
        $( row.insert(($column).to_string(), $crate::__serde_json::json!($value)); )*
        row
    }};
}

// ============================================================================
// MOCK WAREHOUSE
// ============================================================================

/// Scripted reply for statements matching a pattern.
#[derive(Debug, Clone)]
pub enum MockReply {
    Rows(Rows),
    Affected(u64),
    Error(String),
}

/// One statement the mock received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executed {
    pub user: Option<String>,
    pub sql: String,
}

#[derive(Debug, Default)]
struct MockState {
    replies: Vec<(String, MockReply)>,
    executed: Vec<Executed>,
}

/// In-process warehouse that counts executions.
///
/// Replies are matched by case-insensitive substring of the executed text,
/// first match wins. Unmatched statements return no rows.
#[derive(Debug, Clone, Default)]
pub struct MockGateway {
    state: Arc<Mutex<MockState>>,
    executions: Arc<AtomicU64>,
    delay: Option<Duration>,
    refuse_connect: bool,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(self, pattern: &str, reply: MockReply) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.replies.push((pattern.to_lowercase(), reply));
        }
        self
    }

    pub fn with_rows(self, pattern: &str, rows: Rows) -> Self {
        self.with_reply(pattern, MockReply::Rows(rows))
    }

    pub fn with_affected(self, pattern: &str, count: u64) -> Self {
        self.with_reply(pattern, MockReply::Affected(count))
    }

    pub fn with_error(self, pattern: &str, message: &str) -> Self {
        self.with_reply(pattern, MockReply::Error(message.to_string()))
    }

    /// Sleep this long inside every execution.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail every `connect` call.
    pub fn refusing_connections(mut self) -> Self {
        self.refuse_connect = true;
        self
    }

    pub fn execution_count(&self) -> u64 {
        self.executions.load(Ordering::SeqCst)
    }

    /// Every statement executed so far, in order.
    pub fn executed(&self) -> Vec<Executed> {
        self.state
            .lock()
            .map(|state| state.executed.clone())
            .unwrap_or_default()
    }

    fn reply_for(&self, sql: &str) -> MockReply {
        let lowered = sql.to_lowercase();
        self.state
            .lock()
            .ok()
            .and_then(|state| {
                state
                    .replies
                    .iter()
                    .find(|(pattern, _)| lowered.contains(pattern.as_str()))
                    .map(|(_, reply)| reply.clone())
            })
            .unwrap_or(MockReply::Rows(Rows::new()))
    }
}

#[async_trait]
impl WarehouseGateway for MockGateway {
    async fn connect(&self, user: Option<&str>) -> QuarryResult<Box<dyn WarehouseSession>> {
        if self.refuse_connect {
            return Err(WarehouseError::Connect {
                reason: "mock warehouse refused connection".to_string(),
            }
            .into());
        }
        Ok(Box::new(MockSession {
            gateway: self.clone(),
            user: user.map(str::to_string),
        }))
    }
}

struct MockSession {
    gateway: MockGateway,
    user: Option<String>,
}

#[async_trait]
impl WarehouseSession for MockSession {
    async fn execute(&self, sql: &str) -> QuarryResult<QueryOutput> {
        if let Some(delay) = self.gateway.delay {
            tokio::time::sleep(delay).await;
        }
        self.gateway.executions.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut state) = self.gateway.state.lock() {
            state.executed.push(Executed {
                user: self.user.clone(),
                sql: sql.to_string(),
            });
        }

        match self.gateway.reply_for(sql) {
            MockReply::Rows(rows) => Ok(QueryOutput::from_rows(rows)),
            MockReply::Affected(count) => Ok(QueryOutput::affected(count)),
            MockReply::Error(message) => Err(WarehouseError::Execution { message }.into()),
        }
    }
}

// ============================================================================
// MOCK CATALOG
// ============================================================================

/// Catalog that serves a [`StaticCatalog`] or fails on demand.
#[derive(Debug, Clone, Default)]
pub struct MockCatalog {
    inner: StaticCatalog,
    fail: bool,
}

impl MockCatalog {
    pub fn new(inner: StaticCatalog) -> Self {
        Self { inner, fail: false }
    }

    pub fn failing() -> Self {
        Self {
            inner: StaticCatalog::new(),
            fail: true,
        }
    }

    fn check(&self) -> QuarryResult<()> {
        if self.fail {
            Err(WarehouseError::Execution {
                message: "catalog unavailable".to_string(),
            }
            .into())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CatalogSource for MockCatalog {
    async fn table_weights(&self) -> QuarryResult<HashMap<String, f64>> {
        self.check()?;
        self.inner.table_weights().await
    }

    async fn relationships(&self) -> QuarryResult<Vec<Relationship>> {
        self.check()?;
        self.inner.relationships().await
    }
}

// ============================================================================
// DEGRADED STORES
// ============================================================================

fn unavailable<T>() -> QuarryResult<T> {
    Err(StoreError::Unavailable {
        reason: "connection refused".to_string(),
    }
    .into())
}

/// Version tracker whose store is down.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingTracker;

#[async_trait]
impl VersionTracker for FailingTracker {
    async fn get_version(&self, _table: &str) -> QuarryResult<u64> {
        unavailable()
    }

    async fn bump(&self, _tables: &[String]) -> QuarryResult<Vec<TableVersion>> {
        unavailable()
    }
}

/// Version tracker that never answers within any reasonable deadline.
#[derive(Debug, Clone, Copy)]
pub struct StalledTracker {
    pub stall: Duration,
}

#[async_trait]
impl VersionTracker for StalledTracker {
    async fn get_version(&self, _table: &str) -> QuarryResult<u64> {
        tokio::time::sleep(self.stall).await;
        Ok(0)
    }

    async fn bump(&self, _tables: &[String]) -> QuarryResult<Vec<TableVersion>> {
        tokio::time::sleep(self.stall).await;
        Ok(Vec::new())
    }
}

/// Cache backend whose store is down.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingBackend;

#[async_trait]
impl CacheBackend for FailingBackend {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn get(&self, _fingerprint: &str) -> QuarryResult<Option<CacheEntry>> {
        unavailable()
    }

    async fn set(
        &self,
        _fingerprint: &str,
        _rows: &Rows,
        _ttl: Option<Duration>,
    ) -> QuarryResult<Admission> {
        unavailable()
    }

    async fn admission_check(&self, _payload_bytes: u64) -> QuarryResult<Admission> {
        unavailable()
    }

    async fn delete(&self, _fingerprint: &str) -> QuarryResult<bool> {
        unavailable()
    }

    async fn clear(&self) -> QuarryResult<u64> {
        unavailable()
    }

    async fn memory(&self) -> QuarryResult<StoreMemory> {
        unavailable()
    }

    async fn ping(&self) -> QuarryResult<()> {
        unavailable()
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for SQL text and version state.

    use super::*;
    use proptest::prelude::*;

    /// Plain lower-case identifier that is not a SQL keyword.
    pub fn arb_table_name() -> impl Strategy<Value = String> {
        "t_[a-z]{1,8}"
    }

    /// A read statement over one or two tables.
    pub fn arb_select_sql() -> impl Strategy<Value = String> {
        (arb_table_name(), arb_table_name(), any::<bool>(), 0u32..1000).prop_map(
            |(a, b, join, n)| {
                if join {
                    format!("SELECT * FROM {a} JOIN {b} ON {a}.id = {b}.{a}_id WHERE {a}.v > {n}")
                } else {
                    format!("SELECT id, name FROM {a} WHERE id = {n}")
                }
            },
        )
    }

    /// A write statement.
    pub fn arb_write_sql() -> impl Strategy<Value = String> {
        (arb_table_name(), 0u32..1000).prop_flat_map(|(t, n)| {
            prop_oneof![
                Just(format!("UPDATE {t} SET status = 'active' WHERE id = {n}")),
                Just(format!("INSERT INTO {t} (id) VALUES ({n})")),
                Just(format!("DELETE FROM {t} WHERE id = {n}")),
                Just(format!("INSERT INTO {t} SELECT * FROM {t}_staging")),
            ]
        })
    }

    /// `sql` with random case and extra whitespace between tokens.
    /// Tokens containing a quote keep their case, so literals in `sql`
    /// must not contain whitespace.
    pub fn arb_spacing_variant(sql: String) -> impl Strategy<Value = String> {
        let tokens: Vec<String> = sql.split_whitespace().map(str::to_string).collect();
        let n = tokens.len();
        (
            prop::collection::vec(prop_oneof![Just(" "), Just("  "), Just("\t"), Just("\n ")], n),
            prop::collection::vec(any::<bool>(), n),
        )
            .prop_map(move |(gaps, upper)| {
                let mut out = String::new();
                for (i, token) in tokens.iter().enumerate() {
                    if i > 0 {
                        out.push_str(gaps[i]);
                    }
                    if upper[i] && !token.contains('\'') {
                        out.push_str(&token.to_uppercase());
                    } else {
                        out.push_str(token);
                    }
                }
                out
            })
    }

    /// Version vector over distinct generated tables.
    pub fn arb_version_vector() -> impl Strategy<Value = VersionVector> {
        prop::collection::btree_map(arb_table_name(), 0u64..50, 0..4).prop_map(|versions| {
            versions
                .into_iter()
                .map(|(table, version)| TableVersion::new(table, version))
                .collect()
        })
    }

    /// Small result sets with string and numeric columns.
    pub fn arb_rows() -> impl Strategy<Value = Rows> {
        prop::collection::vec(("[a-z]{0,12}", any::<i32>()), 1..8).prop_map(|cells| {
            cells
                .into_iter()
                .map(|(name, value)| crate::row! { "name" => name, "value" => value })
                .collect()
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Ready-made setups for common scenarios.

    use super::*;

    /// Config with short deadlines so degradation tests finish quickly.
    pub fn test_config() -> QuarryConfig {
        QuarryConfig::default()
            .with_store_timeout(Duration::from_millis(100))
            .with_connect_timeout(Duration::from_millis(500))
            .with_warehouse_timeout(Duration::from_secs(5))
    }

    /// `n` rows shaped like a weather station listing.
    pub fn station_rows(n: usize) -> Rows {
        (0..n)
            .map(|i| {
                crate::row! {
                    "id" => i,
                    "code" => format!("ST{:03}", i),
                    "status" => "active",
                }
            })
            .collect()
    }

    /// In-memory cache wired to `gateway`, with handles on its parts.
    pub struct TestCache {
        pub cache: QueryCache,
        pub backend: Arc<InMemoryCacheBackend>,
        pub tracker: Arc<InMemoryVersionTracker>,
        pub gateway: MockGateway,
    }

    pub fn memory_cache(gateway: MockGateway) -> TestCache {
        memory_cache_with(gateway, AdmissionGuard::default())
    }

    pub fn memory_cache_with(gateway: MockGateway, guard: AdmissionGuard) -> TestCache {
        let backend = Arc::new(InMemoryCacheBackend::new(guard));
        let tracker = Arc::new(InMemoryVersionTracker::new());
        let cache = QueryCache::new(
            backend.clone(),
            tracker.clone(),
            Arc::new(gateway.clone()),
            test_config(),
        );
        TestCache {
            cache,
            backend,
            tracker,
            gateway,
        }
    }

    /// Retail schema: orders reach categories through products and
    /// promotions through discounts.
    pub fn retail_catalog() -> StaticCatalog {
        StaticCatalog::new()
            .with_table("orders", 5000.0)
            .with_table("products", 800.0)
            .with_table("categories", 40.0)
            .with_table("discounts", 300.0)
            .with_table("promotions", 60.0)
            .with_table("customers", 1200.0)
            .with_table("audit_log", 90000.0)
            .with_relationship(Relationship::new("orders", "product_id", "products", "id"))
            .with_relationship(Relationship::new("products", "category_id", "categories", "id"))
            .with_relationship(Relationship::new("discounts", "order_id", "orders", "id"))
            .with_relationship(Relationship::new("discounts", "promotion_id", "promotions", "id"))
            .with_relationship(Relationship::new("orders", "customer_id", "customers", "id"))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_row_macro_keeps_order() {
        let r = row! { "b" => 1, "a" => "x" };
        let columns: Vec<&str> = r.keys().map(String::as_str).collect();
        assert_eq!(columns, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_mock_gateway_scripts_and_counts() {
        let gateway = MockGateway::new()
            .with_rows("from stations", fixtures::station_rows(2))
            .with_error("from broken", "relation does not exist");

        let session = gateway.connect(Some("alice")).await.expect("connect");
        let output = session.execute("SELECT * FROM stations").await.expect("execute");
        assert_eq!(output.rows.len(), 2);

        let err = session.execute("select * from broken").await.expect_err("scripted error");
        assert!(matches!(err, QuarryError::Warehouse(WarehouseError::Execution { .. })));

        assert_eq!(gateway.execution_count(), 2);
        assert_eq!(gateway.executed()[0].user.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_failing_catalog() {
        let catalog = MockCatalog::failing();
        assert!(catalog.table_weights().await.is_err());
        assert!(MockCatalog::new(fixtures::retail_catalog())
            .relationships()
            .await
            .is_ok());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_generated_rows_are_non_empty(rows in generators::arb_rows()) {
            prop_assert!(!rows.is_empty());
        }
    }
}
