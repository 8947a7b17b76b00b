//! Cache key construction.
//!
//! A fingerprint is the hex SHA-256 of a composed string holding the
//! optional user scope, the UTC day for date-dependent statements, the
//! normalized statement and the version vector. The scope and statement
//! are length-prefixed so no choice of user id or statement text can make
//! two different inputs compose to the same string.
//!
//! # Composed Format
//!
//! - scoped: `u{scope_len}:{scope}:{sql_len}:{sql}:{t1:v1|t2:v2...}`
//! - unscoped: `-:{sql_len}:{sql}:{t1:v1|t2:v2...}`
//! - dated: `d{YYYY-MM-DD}:` inserted after the scope part

use chrono::NaiveDate;
use quarry_core::{sha256_hex, VersionVector};
use quarry_sql::{normalize, normalize_for_stats};

fn compose(scope: Option<&str>, day: Option<NaiveDate>, sql: &str, versions: &str) -> String {
    let scope_part = match scope {
        Some(scope) => format!("u{}:{}", scope.len(), scope),
        None => "-".to_string(),
    };
    let day_part = day.map(|d| format!("d{}:", d)).unwrap_or_default();
    format!("{}:{}{}:{}:{}", scope_part, day_part, sql.len(), sql, versions)
}

/// Cache key for `sql` as seen by `scope` under the given table versions.
///
/// Statements that normalize identically produce the same key. Any change
/// to the version vector produces a different key.
pub fn fingerprint(sql: &str, scope: Option<&str>, versions: &VersionVector) -> String {
    fingerprint_on(sql, scope, versions, None)
}

/// [`fingerprint`] bound to a UTC day.
///
/// Statements whose result depends on the current date pass the day they
/// ran on, so an entry written before midnight is never served after it.
pub fn fingerprint_on(
    sql: &str,
    scope: Option<&str>,
    versions: &VersionVector,
    day: Option<NaiveDate>,
) -> String {
    let normalized = normalize(sql);
    sha256_hex(&compose(scope, day, &normalized, &versions.to_string()))
}

/// Grouping key for statistics: like [`fingerprint`] but with `INTERVAL`
/// magnitudes masked and no version vector.
pub fn stats_fingerprint(sql: &str, scope: Option<&str>) -> String {
    let normalized = normalize_for_stats(sql);
    sha256_hex(&compose(scope, None, &normalized, ""))
}
