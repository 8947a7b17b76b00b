//! Cache orchestrator.
//!
//! Request flow: `Received -> Classified -> {WriteLane | ReadLane}`.
//!
//! - Write lane: bump the versions of every referenced table, execute,
//!   bump again, and return a synthetic acknowledgement row. Never cached.
//! - Read lane: look up the version vector, build the fingerprint, try the
//!   store. On a hit, return the stored rows. On a miss, execute and offer
//!   non-empty results to the store.
//!
//! Every store and warehouse call runs under a deadline. Store failures of
//! any kind degrade to direct execution; only warehouse errors and invalid
//! input come back as errors.
//!
//! Statements that depend on the current date are keyed to the UTC day they
//! ran on as well, so their entries stop matching at midnight.

use std::fmt;
use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Utc};

use quarry_core::{
    CacheStatus, QuarryConfig, QuarryResult, Row, Rows, StoreError, TableVersion,
    ValidationError, VersionVector, WarehouseError,
};
use quarry_sql::{classify, Classification, RegexTableExtractor, TableExtractor};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::analytics::{CacheStats, Sample, StatsCounters};
use crate::cache::{fingerprint_on, stats_fingerprint, Admission, CacheBackend, StoreMemory};
use crate::gateway::{audited_sql, QueryOutput, WarehouseGateway};
use crate::versions::VersionTracker;

/// First-row columns some warehouses use to report affected rows.
const AFFECTED_ROW_COLUMNS: &[&str] = &[
    "number of rows updated",
    "number of rows deleted",
    "number of rows inserted",
];

/// Source of the current time for analytics and date-bound keys.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Patterns a pre-warm run re-executes when the caller names no limit.
pub const DEFAULT_PREWARM_LIMIT: usize = 20;

// ============================================================================
// REQUEST / RESPONSE
// ============================================================================

/// One inbound statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryRequest {
    pub sql: String,
    /// Scopes the cache entry and names the caller in the audit comment.
    pub user_id: Option<String>,
    /// Skip the cache entirely.
    pub no_cache: bool,
}

impl QueryRequest {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            ..Default::default()
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_no_cache(mut self, no_cache: bool) -> Self {
        self.no_cache = no_cache;
        self
    }

    fn scope(&self) -> Option<&str> {
        self.user_id.as_deref().filter(|u| !u.trim().is_empty())
    }
}

/// Outcome of [`QueryCache::execute`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub rows: Rows,
    pub status: CacheStatus,
    pub classification: Classification,
    /// Cache key, when the read lane computed one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    pub stats_hash: String,
    pub tables: Vec<String>,
    /// Versions the fingerprint was built from. For writes, the versions
    /// after the statement ran.
    pub versions: VersionVector,
    /// Store decision for a miss that produced rows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admission: Option<Admission>,
    #[serde(skip)]
    pub duration: Duration,
}

impl QueryResponse {
    pub fn is_write(&self) -> bool {
        self.classification.is_write
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

// ============================================================================
// PRE-WARM
// ============================================================================

/// What a pre-warm run did with one candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum PrewarmStatus {
    /// Executed and stored.
    Warmed { rows: usize },
    /// A live entry already existed.
    AlreadyCached,
    /// Nothing to store: empty result, refused admission or a store error.
    Skipped { reason: String },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrewarmOutcome {
    pub stats_hash: String,
    pub score: f64,
    #[serde(flatten)]
    pub status: PrewarmStatus,
}

/// Result of [`QueryCache::prewarm`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrewarmReport {
    pub warmed: usize,
    pub already_cached: usize,
    pub skipped: usize,
    pub failed: usize,
    pub outcomes: Vec<PrewarmOutcome>,
}

impl PrewarmReport {
    fn push(&mut self, outcome: PrewarmOutcome) {
        match outcome.status {
            PrewarmStatus::Warmed { .. } => self.warmed += 1,
            PrewarmStatus::AlreadyCached => self.already_cached += 1,
            PrewarmStatus::Skipped { .. } => self.skipped += 1,
            PrewarmStatus::Failed { .. } => self.failed += 1,
        }
        self.outcomes.push(outcome);
    }
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

/// Per-statement state carried through a lane.
struct Statement<'a> {
    request: &'a QueryRequest,
    sql: &'a str,
    classification: Classification,
    stats_hash: String,
    tables: Vec<String>,
    /// UTC day folded into the key of date-dependent statements.
    day: Option<NaiveDate>,
    started: Instant,
}

/// The analytics query cache.
///
/// Cheap to clone; clones share the backend, tracker, gateway and
/// statistics.
#[derive(Clone)]
pub struct QueryCache {
    backend: Arc<dyn CacheBackend>,
    tracker: Arc<dyn VersionTracker>,
    gateway: Arc<dyn WarehouseGateway>,
    extractor: Arc<dyn TableExtractor>,
    config: QuarryConfig,
    stats: Arc<StatsCounters>,
    clock: Clock,
}

impl fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCache")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl QueryCache {
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        tracker: Arc<dyn VersionTracker>,
        gateway: Arc<dyn WarehouseGateway>,
        config: QuarryConfig,
    ) -> Self {
        Self {
            backend,
            tracker,
            gateway,
            extractor: Arc::new(RegexTableExtractor),
            config,
            stats: Arc::new(StatsCounters::default()),
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the wall clock.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn today(&self) -> NaiveDate {
        (self.clock)().date_naive()
    }

    /// Replace the table-name scanner.
    pub fn with_extractor(mut self, extractor: Arc<dyn TableExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    pub fn tracker(&self) -> &Arc<dyn VersionTracker> {
        &self.tracker
    }

    pub fn config(&self) -> &QuarryConfig {
        &self.config
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.today())
    }

    /// Run one statement through the cache.
    pub async fn execute(&self, request: QueryRequest) -> QuarryResult<QueryResponse> {
        let sql = request.sql.trim();
        if sql.is_empty() {
            return Err(ValidationError::MissingField {
                field: "sql".to_string(),
            }
            .into());
        }

        if let Err(e) = self.bounded_store("maintain", self.backend.maintain()).await {
            warn!(error = %e, "Cache maintenance failed");
        }

        let statement = self.statement(&request, sql);
        debug!(
            stats_hash = %short(&statement.stats_hash),
            tables = ?statement.tables,
            strategy = %statement.classification.strategy,
            "Statement classified"
        );

        let response = if statement.classification.is_write {
            self.write_lane(statement).await?
        } else if request.no_cache {
            info!(stats_hash = %short(&statement.stats_hash), "BYPASS (caller opt-out)");
            self.bypass_lane(statement).await?
        } else {
            self.read_lane(statement).await?
        };

        self.stats.record(&Sample {
            stats_hash: &response.stats_hash,
            sql,
            user_id: request.scope(),
            status: response.status,
            is_write: response.is_write(),
            duration: response.duration,
            rows: response.row_count(),
            at: (self.clock)(),
        });
        Ok(response)
    }

    /// Re-run the `limit` best-scoring pre-warm candidates so their next
    /// request is a hit. Candidates with a live entry report `AlreadyCached`.
    ///
    /// Runs go through the read lane but are not counted as traffic.
    /// Warehouse failures are reported per pattern and never abort the run.
    pub async fn prewarm(&self, limit: usize) -> PrewarmReport {
        let candidates = self.stats.prewarm_candidates(self.today(), limit);
        info!(candidates = candidates.len(), limit, "Pre-warm run starting");

        let mut report = PrewarmReport::default();
        for (stats_hash, pattern) in candidates {
            let mut request = QueryRequest::new(pattern.sql.clone());
            request.user_id = pattern.user_id.clone();

            let sql = request.sql.trim();
            let status = match self.read_lane(self.statement(&request, sql)).await {
                Ok(response) => prewarm_status(&response),
                Err(e) => PrewarmStatus::Failed {
                    error: e.to_string(),
                },
            };
            if matches!(status, PrewarmStatus::Warmed { .. }) {
                self.stats.prewarmed.fetch_add(1, Ordering::Relaxed);
            }
            debug!(
                stats_hash = %short(&stats_hash),
                score = pattern.prewarm_score,
                status = ?status,
                "Pre-warm candidate handled"
            );
            report.push(PrewarmOutcome {
                stats_hash,
                score: pattern.prewarm_score,
                status,
            });
        }

        info!(
            warmed = report.warmed,
            already_cached = report.already_cached,
            skipped = report.skipped,
            failed = report.failed,
            "Pre-warm run complete"
        );
        report
    }

    /// Fingerprint `sql` would get under the current table versions.
    pub async fn current_fingerprint(
        &self,
        sql: &str,
        user_id: Option<&str>,
    ) -> QuarryResult<String> {
        let tables = self.extractor.extract_tables(sql);
        let versions = self.version_vector(&tables).await?;
        let scope = user_id.filter(|u| !u.trim().is_empty());
        let day = self.cache_day(&classify(sql));
        Ok(fingerprint_on(sql, scope, &versions, day))
    }

    /// Current versions of `tables`.
    pub async fn version_vector(&self, tables: &[String]) -> QuarryResult<VersionVector> {
        self.bounded_store("get versions", self.tracker.get_version_vector(tables))
            .await
    }

    /// Remove one cache entry.
    pub async fn delete_entry(&self, fingerprint: &str) -> QuarryResult<bool> {
        self.bounded_store("delete", self.backend.delete(fingerprint))
            .await
    }

    /// Remove every cache entry. Table versions are kept.
    pub async fn clear(&self) -> QuarryResult<u64> {
        self.bounded_store("clear", self.backend.clear()).await
    }

    pub async fn memory(&self) -> QuarryResult<StoreMemory> {
        self.bounded_store("memory", self.backend.memory()).await
    }

    pub async fn ping_store(&self) -> QuarryResult<()> {
        self.bounded_store("ping", self.backend.ping()).await
    }

    async fn write_lane(&self, statement: Statement<'_>) -> QuarryResult<QueryResponse> {
        // Bumping first means no read that starts after this point can
        // reuse a pre-write entry. The second bump covers reads that
        // cached pre-write rows under the first bumped version while the
        // statement was running.
        self.invalidate(&statement.tables).await;
        let output = self.run(&statement).await?;
        let bumped = self.invalidate(&statement.tables).await;

        info!(
            tables = ?statement.tables,
            rows_affected = ?rows_affected(&output),
            "WRITE"
        );
        Ok(self.respond(
            statement,
            write_result_rows(&output),
            CacheStatus::Bypass,
            None,
            bumped.into_iter().flatten().collect(),
            None,
        ))
    }

    async fn bypass_lane(&self, statement: Statement<'_>) -> QuarryResult<QueryResponse> {
        let output = self.run(&statement).await?;
        Ok(self.respond(
            statement,
            output.rows,
            CacheStatus::Bypass,
            None,
            VersionVector::default(),
            None,
        ))
    }

    async fn read_lane(&self, statement: Statement<'_>) -> QuarryResult<QueryResponse> {
        let versions = match self.version_vector(&statement.tables).await {
            Ok(versions) => versions,
            Err(e) => {
                self.stats.store_failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "BYPASS (version lookup failed, executing directly)");
                return self.bypass_lane(statement).await;
            }
        };

        let key = fingerprint_on(
            statement.sql,
            statement.request.scope(),
            &versions,
            statement.day,
        );

        match self.bounded_store("get", self.backend.get(&key)).await {
            Ok(Some(entry)) => {
                info!(fingerprint = %short(&key), rows = entry.rows.len(), "HIT");
                return Ok(self.respond(
                    statement,
                    entry.rows,
                    CacheStatus::Hit,
                    Some(key),
                    versions,
                    None,
                ));
            }
            Ok(None) => {}
            Err(e) => {
                self.stats.store_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    fingerprint = %short(&key),
                    error = %e,
                    "Cache lookup failed, treating as miss"
                );
            }
        }

        let output = self.run(&statement).await?;
        let admission = if output.rows.is_empty() {
            None
        } else {
            self.store(&key, &output.rows, &statement.classification)
                .await
        };

        info!(
            fingerprint = %short(&key),
            rows = output.rows.len(),
            admission = admission.map(|a| a.as_str()).unwrap_or("skipped"),
            "MISS"
        );
        Ok(self.respond(
            statement,
            output.rows,
            CacheStatus::Miss,
            Some(key),
            versions,
            admission,
        ))
    }

    /// Offer rows to the store. Failures are logged, never returned.
    async fn store(
        &self,
        key: &str,
        rows: &Rows,
        classification: &Classification,
    ) -> Option<Admission> {
        let ttl = self.config.ttl_for(classification.strategy);
        match self.bounded_store("set", self.backend.set(key, rows, ttl)).await {
            Ok(admission) => {
                if !admission.is_admitted() {
                    self.stats.rejected_admissions.fetch_add(1, Ordering::Relaxed);
                }
                Some(admission)
            }
            Err(e) => {
                self.stats.store_failures.fetch_add(1, Ordering::Relaxed);
                warn!(fingerprint = %short(key), error = %e, "Cache write failed");
                None
            }
        }
    }

    /// Bump table versions. Failures are logged and swallowed so they never
    /// abort the write they accompany.
    async fn invalidate(&self, tables: &[String]) -> Option<Vec<TableVersion>> {
        if tables.is_empty() {
            return Some(Vec::new());
        }
        match self.bounded_store("bump", self.tracker.bump(tables)).await {
            Ok(bumped) => {
                for version in &bumped {
                    debug!(
                        table = %version.table,
                        version = version.version,
                        "Table version bumped"
                    );
                }
                Some(bumped)
            }
            Err(e) => {
                self.stats.store_failures.fetch_add(1, Ordering::Relaxed);
                warn!(tables = ?tables, error = %e, "Version bump failed");
                None
            }
        }
    }

    /// Execute against the warehouse under the connect and execution
    /// deadlines.
    async fn run(&self, statement: &Statement<'_>) -> QuarryResult<QueryOutput> {
        let user = statement.request.scope();
        let sql = audited_sql(user, statement.sql);

        let connect_timeout = self.config.connect_timeout;
        let session = match tokio::time::timeout(connect_timeout, self.gateway.connect(user)).await
        {
            Ok(session) => session,
            Err(_) => Err(WarehouseError::Connect {
                reason: format!("timed out after {:?}", connect_timeout),
            }
            .into()),
        }
        .inspect_err(|e| error!(error = %e, "Warehouse connection failed"))?;

        let after = self.config.warehouse_timeout;
        match tokio::time::timeout(after, session.execute(&sql)).await {
            Ok(result) => {
                result.inspect_err(|e| error!(error = %e, "Warehouse execution failed"))
            }
            Err(_) => {
                error!(after = ?after, "Warehouse execution timed out");
                Err(WarehouseError::Timeout { after }.into())
            }
        }
    }

    fn statement<'a>(&self, request: &'a QueryRequest, sql: &'a str) -> Statement<'a> {
        let classification = classify(sql);
        Statement {
            request,
            sql,
            day: self.cache_day(&classification),
            classification,
            stats_hash: stats_fingerprint(sql, request.scope()),
            tables: self.extractor.extract_tables(sql),
            started: Instant::now(),
        }
    }

    /// The UTC day a date-dependent statement's entry is bound to.
    fn cache_day(&self, classification: &Classification) -> Option<NaiveDate> {
        classification.is_dynamic.then(|| self.today())
    }

    fn respond(
        &self,
        statement: Statement<'_>,
        rows: Rows,
        status: CacheStatus,
        fingerprint: Option<String>,
        versions: VersionVector,
        admission: Option<Admission>,
    ) -> QueryResponse {
        QueryResponse {
            rows,
            status,
            classification: statement.classification,
            fingerprint,
            stats_hash: statement.stats_hash,
            tables: statement.tables,
            versions,
            admission,
            duration: statement.started.elapsed(),
        }
    }

    /// Run a store call under the store deadline.
    async fn bounded_store<T, F>(&self, operation: &str, fut: F) -> QuarryResult<T>
    where
        F: Future<Output = QuarryResult<T>>,
    {
        let after = self.config.store_timeout;
        match tokio::time::timeout(after, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout {
                operation: operation.to_string(),
                after,
            }
            .into()),
        }
    }
}

/// Affected-row count reported by the driver or by a first-row column.
pub fn rows_affected(output: &QueryOutput) -> Option<u64> {
    output.rows_affected.or_else(|| {
        let row = output.rows.first()?;
        AFFECTED_ROW_COLUMNS
            .iter()
            .find_map(|column| row.get(*column))
            .and_then(|value| match value {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            })
    })
}

/// The single acknowledgement row returned for write statements.
pub fn write_result_rows(output: &QueryOutput) -> Rows {
    let affected = rows_affected(output).map_or_else(|| json!("N/A"), |n| json!(n));
    let mut row = Row::new();
    row.insert("success".to_string(), json!(true));
    row.insert("rowsAffected".to_string(), affected);
    row.insert(
        "message".to_string(),
        json!("Operation completed successfully"),
    );
    vec![row]
}

fn prewarm_status(response: &QueryResponse) -> PrewarmStatus {
    let skipped = |reason: &str| PrewarmStatus::Skipped {
        reason: reason.to_string(),
    };
    match (response.status, response.admission) {
        (CacheStatus::Hit, _) => PrewarmStatus::AlreadyCached,
        (CacheStatus::Miss, Some(Admission::Admitted)) => PrewarmStatus::Warmed {
            rows: response.row_count(),
        },
        (CacheStatus::Miss, Some(Admission::Rejected { .. })) => skipped("admission rejected"),
        (CacheStatus::Miss, None) if response.rows.is_empty() => skipped("no rows returned"),
        (CacheStatus::Miss, None) => skipped("cache write failed"),
        (CacheStatus::Bypass, _) => skipped("version lookup failed"),
    }
}

fn short(hash: &str) -> &str {
    hash.get(..8).unwrap_or(hash)
}
