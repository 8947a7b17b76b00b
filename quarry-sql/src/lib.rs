//! QUARRY SQL - Lightweight Statement Analysis
//!
//! Everything here is a pure function of the statement text:
//! - [`classify`] decides write vs read, date dynamism and cache strategy
//! - [`normalize`] produces the canonical text used for fingerprints
//! - [`TableExtractor`] finds the tables a statement depends on
//!
//! None of this is a SQL parser. Table extraction is a best-effort scan
//! that does not resolve aliases, schemas or CTE names; it sits behind a
//! trait so a real parser can replace it without touching callers.

pub mod classify;
pub mod extract;
pub mod normalize;

pub use classify::{
    cache_strategy, classify, has_dynamic_dates, has_time_of_day, is_write, Classification,
    DYNAMIC_DATE_FUNCTIONS, TIME_OF_DAY_FUNCTIONS, WRITE_KEYWORDS,
};
pub use extract::{extract_tables, RegexTableExtractor, TableExtractor};
pub use normalize::{normalize, normalize_for_stats, INTERVAL_PLACEHOLDER};
