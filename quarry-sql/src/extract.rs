//! Table dependency extraction.

use crate::normalize::normalize;
use once_cell::sync::Lazy;
use regex::Regex;

static TABLE_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:from|join|update|into)\s+([a-z0-9_.]+)").expect("valid table regex")
});

/// Finds the tables a statement reads or writes.
///
/// Implementations return lower-cased names, deduplicated, in order of
/// first appearance. An empty result means "no known dependencies" and is
/// not an error.
pub trait TableExtractor: Send + Sync {
    fn extract_tables(&self, sql: &str) -> Vec<String>;
}

/// Regex scan for identifiers following `FROM`, `JOIN`, `UPDATE`, `INTO`
/// and `DELETE FROM`.
///
/// Known limitations: aliases and CTE names are not resolved, schema
/// qualifiers are kept as part of the name, and `EXTRACT(x FROM col)`
/// reports `col` as a table.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegexTableExtractor;

impl TableExtractor for RegexTableExtractor {
    fn extract_tables(&self, sql: &str) -> Vec<String> {
        let normalized = normalize(sql);
        let mut tables: Vec<String> = Vec::new();

        for cap in TABLE_REFERENCE.captures_iter(&normalized) {
            let Some(name) = cap.get(1) else { continue };
            let name = name.as_str().trim_matches('.');
            if name.is_empty() || name.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            if !tables.iter().any(|t| t == name) {
                tables.push(name.to_string());
            }
        }

        tables
    }
}

/// Extract tables with the default [`RegexTableExtractor`].
pub fn extract_tables(sql: &str) -> Vec<String> {
    RegexTableExtractor.extract_tables(sql)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_select_with_join() {
        let tables = extract_tables(
            "SELECT * FROM Stations s JOIN readings r ON r.station_id = s.id",
        );
        assert_eq!(tables, vec!["stations", "readings"]);
    }

    #[test]
    fn test_extract_write_statements() {
        assert_eq!(extract_tables("UPDATE stations SET status='active' WHERE id=1"), vec!["stations"]);
        assert_eq!(extract_tables("INSERT INTO readings (v) VALUES (1)"), vec!["readings"]);
        assert_eq!(extract_tables("DELETE FROM readings WHERE v < 0"), vec!["readings"]);
        assert_eq!(
            extract_tables("MERGE INTO t USING s ON t.id = s.id WHEN MATCHED THEN DELETE"),
            vec!["t"]
        );
    }

    #[test]
    fn test_extract_deduplicates_in_first_seen_order() {
        let tables = extract_tables(
            "select * from b join a on a.id = b.a_id where b.x in (select x from b)",
        );
        assert_eq!(tables, vec!["b", "a"]);
    }

    #[test]
    fn test_extract_keeps_schema_qualifier() {
        assert_eq!(extract_tables("select * from public.stations;"), vec!["public.stations"]);
    }

    #[test]
    fn test_extract_no_tables() {
        assert!(extract_tables("select 1").is_empty());
        assert!(extract_tables("select now()").is_empty());
        assert!(extract_tables("").is_empty());
    }

    #[test]
    fn test_extract_ignores_commented_references() {
        assert_eq!(
            extract_tables("select * from a -- join b on true\n"),
            vec!["a"]
        );
    }

    #[test]
    fn test_extract_ignores_identifier_suffix_match() {
        // `last_update` must not be read as `update <table>`.
        assert_eq!(
            extract_tables("select last_update from audit"),
            vec!["audit"]
        );
    }

    #[test]
    fn test_trait_object_dispatch() {
        let extractor: Box<dyn TableExtractor> = Box::new(RegexTableExtractor);
        assert_eq!(extractor.extract_tables("select * from t"), vec!["t"]);
    }
}
