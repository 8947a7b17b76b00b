//! Property-Based Tests for Cache Keys and Invalidation
//!
//! **Property 1: Normalization Equivalence**
//!
//! Statements differing only in keyword case and whitespace SHALL map to
//! the same fingerprint for the same scope and version vector.
//!
//! **Property 2: Write Invalidation**
//!
//! For any write statement, every table it references SHALL have a higher
//! version after execution, and a prior read of that table SHALL miss.

use proptest::prelude::*;
use quarry_core::CacheStatus;
use quarry_sql::extract_tables;
use quarry_storage::{fingerprint, QueryRequest, VersionTracker};
use quarry_test_utils::fixtures::{memory_cache, station_rows};
use quarry_test_utils::generators::{
    arb_select_sql, arb_spacing_variant, arb_version_vector, arb_write_sql,
};
use quarry_test_utils::MockGateway;
use tokio::runtime::Runtime;

fn test_runtime() -> Result<Runtime, TestCaseError> {
    Runtime::new().map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

fn select_and_variant() -> impl Strategy<Value = (String, String)> {
    arb_select_sql().prop_flat_map(|sql| {
        let variant = arb_spacing_variant(sql.clone());
        (Just(sql), variant)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_spacing_and_case_do_not_change_fingerprint(
        (sql, variant) in select_and_variant(),
        versions in arb_version_vector(),
        scoped in any::<bool>(),
    ) {
        let scope = scoped.then_some("analyst");
        prop_assert_eq!(
            fingerprint(&sql, scope, &versions),
            fingerprint(&variant, scope, &versions)
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_write_bumps_every_referenced_table(sql in arb_write_sql()) {
        let rt = test_runtime()?;
        let tables = extract_tables(&sql);
        prop_assert!(!tables.is_empty());

        rt.block_on(async {
            let t = memory_cache(MockGateway::new());

            let response = t
                .cache
                .execute(QueryRequest::new(sql.clone()))
                .await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert!(response.is_write());
            prop_assert_eq!(response.status, CacheStatus::Bypass);

            let vector = t
                .tracker
                .get_version_vector(&tables)
                .await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            for entry in vector.entries() {
                prop_assert!(entry.version >= 1);
            }
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn prop_read_after_write_misses(sql in arb_write_sql()) {
        let rt = test_runtime()?;
        let tables = extract_tables(&sql);
        let read = format!("SELECT * FROM {}", tables[0]);

        rt.block_on(async {
            let gateway = MockGateway::new().with_rows("select", station_rows(2));
            let t = memory_cache(gateway);

            let run = |sql: String| {
                let cache = t.cache.clone();
                async move {
                    cache
                        .execute(QueryRequest::new(sql))
                        .await
                        .map_err(|e| TestCaseError::fail(e.to_string()))
                }
            };

            let warm = run(read.clone()).await?;
            prop_assert_eq!(warm.status, CacheStatus::Miss);
            prop_assert_eq!(run(read.clone()).await?.status, CacheStatus::Hit);

            run(sql.clone()).await?;

            let after = run(read.clone()).await?;
            prop_assert_eq!(after.status, CacheStatus::Miss);
            prop_assert_ne!(after.fingerprint, warm.fingerprint);
            Ok::<(), TestCaseError>(())
        })?;
    }
}
