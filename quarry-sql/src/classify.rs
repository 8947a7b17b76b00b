//! Query classification.

use crate::normalize::normalize;
use quarry_core::CacheStrategy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Leading keywords of write-class statements (DML and DDL).
pub const WRITE_KEYWORDS: &[&str] = &[
    "update", "insert", "delete", "merge", "truncate", "create", "alter", "drop",
];

/// Names whose presence makes a statement depend on the current date or time.
///
/// Matched as case-insensitive substrings of the raw text. Date and
/// timestamp literals such as `'2025-10-03'` are not in this list.
pub const DYNAMIC_DATE_FUNCTIONS: &[&str] = &[
    "current_date",
    "current_timestamp",
    "current_time",
    "localtime",
    "localtimestamp",
    "now(",
    "curdate(",
    "curtime(",
    "sysdate(",
    "utc_date",
    "utc_time",
    "utc_timestamp",
    "getdate(",
    "getutcdate(",
    "sysdatetime(",
    "sysutcdatetime(",
    "sysdatetimeoffset(",
    "timeofday(",
    "transaction_timestamp(",
    "statement_timestamp(",
    "clock_timestamp(",
    "sysdate",
    "systimestamp",
];

/// Subset of [`DYNAMIC_DATE_FUNCTIONS`] that changes within a day.
pub const TIME_OF_DAY_FUNCTIONS: &[&str] = &[
    "current_timestamp",
    "current_time",
    "now(",
    "getdate(",
    "sysdatetime(",
];

/// Result of classifying one statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub is_write: bool,
    pub is_dynamic: bool,
    pub strategy: CacheStrategy,
    /// `None` for static statements.
    #[serde(with = "ttl_secs")]
    pub ttl: Option<Duration>,
}

/// Classify a statement. Pure: identical input gives identical output.
pub fn classify(sql: &str) -> Classification {
    let strategy = cache_strategy(sql);
    Classification {
        is_write: is_write(sql),
        is_dynamic: has_dynamic_dates(sql),
        strategy,
        ttl: strategy.ttl(),
    }
}

/// True when the normalized statement begins with a write keyword.
pub fn is_write(sql: &str) -> bool {
    let normalized = normalize(sql);
    WRITE_KEYWORDS.iter().any(|keyword| {
        normalized
            .strip_prefix(keyword)
            .map(|rest| !rest.starts_with(|c: char| c.is_alphanumeric() || c == '_'))
            .unwrap_or(false)
    })
}

/// True when the statement references any dynamic date or time function.
pub fn has_dynamic_dates(sql: &str) -> bool {
    let lower = sql.to_lowercase();
    DYNAMIC_DATE_FUNCTIONS.iter().any(|f| lower.contains(f))
}

/// True when the statement references a time-of-day function.
pub fn has_time_of_day(sql: &str) -> bool {
    let lower = sql.to_lowercase();
    TIME_OF_DAY_FUNCTIONS.iter().any(|f| lower.contains(f))
}

/// Cache strategy for a statement: hourly beats daily beats static.
pub fn cache_strategy(sql: &str) -> CacheStrategy {
    if has_time_of_day(sql) {
        CacheStrategy::Hourly
    } else if has_dynamic_dates(sql) {
        CacheStrategy::Daily
    } else {
        CacheStrategy::Static
    }
}

mod ttl_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(ttl: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match ttl {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_write_detection() {
        assert!(classify("UPDATE t SET x=1").is_write);
        assert!(classify("  insert into t values (1)").is_write);
        assert!(classify("DELETE FROM t").is_write);
        assert!(classify("merge into t using s on t.id = s.id").is_write);
        assert!(classify("TRUNCATE t").is_write);
        assert!(classify("create table t (id int)").is_write);
        assert!(classify("ALTER TABLE t ADD c int").is_write);
        assert!(classify("drop table t").is_write);
        assert!(!classify("select 1").is_write);
        assert!(!classify("WITH x AS (SELECT 1) SELECT * FROM x").is_write);
    }

    #[test]
    fn test_write_detection_skips_leading_comment() {
        assert!(is_write("-- Executed by: alice\nUPDATE stations SET status = 'active'"));
        assert!(is_write("/* batch */ delete from readings"));
    }

    #[test]
    fn test_write_keyword_needs_word_boundary() {
        assert!(!is_write("updates"));
        assert!(!is_write("dropped_rows"));
        assert!(is_write("update(t)"));
    }

    #[test]
    fn test_dynamic_functions() {
        assert!(classify("SELECT * FROM t WHERE d = CURRENT_DATE()").is_dynamic);
        assert!(classify("select * from t where ts > NOW() - interval 1 day").is_dynamic);
        assert!(classify("select getdate()").is_dynamic);
        assert!(classify("select SYSDATE from dual").is_dynamic);
    }

    #[test]
    fn test_date_literal_is_static() {
        let c = classify("SELECT * FROM t WHERE d = '2025-10-03'");
        assert!(!c.is_dynamic);
        assert_eq!(c.strategy, CacheStrategy::Static);
        assert_eq!(c.ttl, None);
    }

    #[test]
    fn test_strategy_selection() {
        let hourly = classify("select * from t where ts > current_timestamp - interval '1 hour'");
        assert_eq!(hourly.strategy, CacheStrategy::Hourly);
        assert_eq!(hourly.ttl, Some(Duration::from_secs(3600)));

        let daily = classify("select * from t where d = current_date");
        assert_eq!(daily.strategy, CacheStrategy::Daily);
        assert_eq!(daily.ttl, Some(Duration::from_secs(86_400)));

        let fixed = classify("select * from t");
        assert_eq!(fixed.strategy, CacheStrategy::Static);
    }

    #[test]
    fn test_classification_serializes_ttl_seconds() -> Result<(), serde_json::Error> {
        let json = serde_json::to_value(classify("select now()"))?;
        assert_eq!(json["strategy"], "hourly");
        assert_eq!(json["ttl"], 3600);
        assert_eq!(json["isWrite"], false);

        let json = serde_json::to_value(classify("select 1"))?;
        assert!(json["ttl"].is_null());
        Ok(())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        #[test]
        fn prop_classify_is_pure(sql in "\\PC{0,80}") {
            prop_assert_eq!(classify(&sql), classify(&sql));
        }

        #[test]
        fn prop_dynamic_iff_strategy_not_static(sql in "[a-zA-Z_() '0-9-]{0,60}") {
            let c = classify(&sql);
            prop_assert_eq!(c.is_dynamic, c.strategy != CacheStrategy::Static);
        }
    }
}
