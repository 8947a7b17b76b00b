//! Per-pattern query analytics and pre-warm scoring.
//!
//! Every statement the orchestrator serves is folded into the
//! [`PatternStats`] of its statistics hash: counters, running averages of
//! duration and row count, timestamps and a per-day hit history. From
//! those a pre-warm score in `[0, 100]` is derived:
//!
//! | component        | saturates at       | weight |
//! |------------------|--------------------|--------|
//! | executions       | 100                | 0.20   |
//! | average duration | 5 s                | 0.15   |
//! | average rows     | 100 000            | 0.10   |
//! | hits             | 50                 | 0.20   |
//! | hits, last 7 days| 20                 | 0.25   |
//! | active days of 7 | 7                  | 0.10   |
//!
//! The weighted sum is scaled to 100 and multiplied by `0.75^d`, where `d`
//! is the number of days since the last hit.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Days, NaiveDate, Utc};
use quarry_core::CacheStatus;
use serde::Serialize;

/// Distinct statement patterns tracked in [`CacheStats::patterns`].
pub const MAX_TRACKED_PATTERNS: usize = 10_000;

/// Days of hit history kept per pattern.
pub const HISTORY_DAYS: u64 = 14;

/// Window used for recent activity and consistency.
pub const RECENT_DAYS: u64 = 7;

/// Score multiplier per day without a hit.
pub const DAILY_DECAY: f64 = 0.75;

/// Minimum score a pre-warm candidate needs.
pub const PREWARM_MIN_SCORE: f64 = 15.0;

// ============================================================================
// PATTERN STATS
// ============================================================================

/// Analytics for one statement pattern.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternStats {
    /// Statement text as last seen, used to re-run the pattern.
    pub sql: String,
    /// Caller scope the pattern belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Writes are counted but never pre-warmed.
    pub is_write: bool,
    pub hits: u64,
    pub misses: u64,
    pub bypasses: u64,
    pub executions: u64,
    pub avg_duration_ms: f64,
    pub avg_rows: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_executed: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_hit: Option<DateTime<Utc>>,
    /// Hits per UTC day, pruned to [`HISTORY_DAYS`].
    pub daily_hits: BTreeMap<NaiveDate, u64>,
    pub days_without_hits: u64,
    pub prewarm_score: f64,
    /// Used often and steadily enough to keep without expiry.
    pub persistent: bool,
}

/// One served statement, as the orchestrator reports it.
#[derive(Debug, Clone)]
pub struct Sample<'a> {
    pub stats_hash: &'a str,
    pub sql: &'a str,
    pub user_id: Option<&'a str>,
    pub status: CacheStatus,
    pub is_write: bool,
    pub duration: Duration,
    pub rows: usize,
    pub at: DateTime<Utc>,
}

impl PatternStats {
    /// Fold one sample in and rescore.
    pub fn observe(&mut self, sample: &Sample<'_>) {
        if self.first_seen.is_none() {
            self.first_seen = Some(sample.at);
        }
        self.sql = sample.sql.to_string();
        self.user_id = sample.user_id.map(str::to_string);
        self.is_write = sample.is_write;

        match sample.status {
            CacheStatus::Hit => {
                self.hits += 1;
                self.last_hit = Some(sample.at);
                *self.daily_hits.entry(sample.at.date_naive()).or_insert(0) += 1;
            }
            CacheStatus::Miss => self.misses += 1,
            CacheStatus::Bypass => self.bypasses += 1,
        }

        self.executions += 1;
        let n = self.executions as f64;
        let duration_ms = sample.duration.as_secs_f64() * 1000.0;
        self.avg_duration_ms += (duration_ms - self.avg_duration_ms) / n;
        self.avg_rows += (sample.rows as f64 - self.avg_rows) / n;
        self.last_executed = Some(sample.at);

        self.rescore(sample.at.date_naive());
    }

    /// Recompute the decay, score and persistence as of `today`.
    pub fn rescore(&mut self, today: NaiveDate) {
        if let Some(cutoff) = today.checked_sub_days(Days::new(HISTORY_DAYS)) {
            self.daily_hits.retain(|day, _| *day >= cutoff);
        }
        self.days_without_hits = self.days_since_hit(today);
        self.prewarm_score = self.score(today);
        self.persistent = self.should_persist(today);
    }

    fn days_since_hit(&self, today: NaiveDate) -> u64 {
        match self.last_hit {
            None if self.executions > 0 => 1,
            None => 0,
            Some(hit) => (today - hit.date_naive()).num_days().max(0) as u64,
        }
    }

    /// Hits and active days over the last [`RECENT_DAYS`] ending `today`.
    pub fn recent_activity(&self, today: NaiveDate) -> (u64, u64) {
        (0..RECENT_DAYS)
            .filter_map(|back| today.checked_sub_days(Days::new(back)))
            .filter_map(|day| self.daily_hits.get(&day).copied())
            .filter(|hits| *hits > 0)
            .fold((0, 0), |(hits, days), h| (hits + h, days + 1))
    }

    fn score(&self, today: NaiveDate) -> f64 {
        let (recent_hits, active_days) = self.recent_activity(today);
        let saturate = |value: f64, full: f64| (value / full).min(1.0);

        let base = saturate(self.executions as f64, 100.0) * 0.20
            + saturate(self.avg_duration_ms, 5000.0) * 0.15
            + saturate(self.avg_rows, 100_000.0) * 0.10
            + saturate(self.hits as f64, 50.0) * 0.20
            + saturate(recent_hits as f64, 20.0) * 0.25
            + (active_days as f64 / RECENT_DAYS as f64) * 0.10;
        let decay = DAILY_DECAY.powi(self.days_without_hits.min(i32::MAX as u64) as i32);

        (base * 100.0 * decay).clamp(0.0, 100.0)
    }

    fn should_persist(&self, today: NaiveDate) -> bool {
        if self.days_without_hits >= RECENT_DAYS {
            return false;
        }
        let (recent_hits, active_days) = self.recent_activity(today);
        active_days >= 3 && recent_hits as f64 / active_days as f64 >= 2.0
    }

    /// Worth re-running ahead of demand: a meaningful score, a hit within
    /// the last two days and repeated use on more than one day.
    pub fn is_prewarm_candidate(&self, today: NaiveDate) -> bool {
        if self.is_write || self.sql.is_empty() {
            return false;
        }
        let (recent_hits, active_days) = self.recent_activity(today);
        let per_active_day = if active_days == 0 {
            0.0
        } else {
            recent_hits as f64 / active_days as f64
        };

        self.prewarm_score > PREWARM_MIN_SCORE
            && self.days_without_hits < 3
            && recent_hits >= 3
            && active_days >= 2
            && per_active_day >= 1.5
    }
}

// ============================================================================
// CACHE STATS
// ============================================================================

/// Snapshot of orchestrator counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub bypasses: u64,
    pub writes: u64,
    pub rejected_admissions: u64,
    /// Store calls that failed or timed out.
    pub store_failures: u64,
    /// Entries stored by pre-warm runs.
    pub prewarmed: u64,
    /// Keyed by statistics hash.
    pub patterns: BTreeMap<String, PatternStats>,
}

impl CacheStats {
    /// Hits over cache lookups. Bypasses are not lookups.
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    bypasses: AtomicU64,
    writes: AtomicU64,
    pub(crate) rejected_admissions: AtomicU64,
    pub(crate) store_failures: AtomicU64,
    pub(crate) prewarmed: AtomicU64,
    patterns: Mutex<HashMap<String, PatternStats>>,
}

impl StatsCounters {
    pub(crate) fn record(&self, sample: &Sample<'_>) {
        let counter = match sample.status {
            CacheStatus::Hit => &self.hits,
            CacheStatus::Miss => &self.misses,
            CacheStatus::Bypass => &self.bypasses,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        if sample.is_write {
            self.writes.fetch_add(1, Ordering::Relaxed);
        }

        let Ok(mut patterns) = self.patterns.lock() else {
            return;
        };
        if !patterns.contains_key(sample.stats_hash) && patterns.len() >= MAX_TRACKED_PATTERNS {
            return;
        }
        patterns
            .entry(sample.stats_hash.to_string())
            .or_default()
            .observe(sample);
    }

    /// Counters with every pattern rescored as of `today`.
    pub(crate) fn snapshot(&self, today: NaiveDate) -> CacheStats {
        let patterns = self
            .patterns
            .lock()
            .map(|p| {
                p.iter()
                    .map(|(hash, stats)| {
                        let mut stats = stats.clone();
                        stats.rescore(today);
                        (hash.clone(), stats)
                    })
                    .collect()
            })
            .unwrap_or_default();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            bypasses: self.bypasses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            rejected_admissions: self.rejected_admissions.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            prewarmed: self.prewarmed.load(Ordering::Relaxed),
            patterns,
        }
    }

    /// Eligible patterns, best score first, at most `limit`.
    pub(crate) fn prewarm_candidates(
        &self,
        today: NaiveDate,
        limit: usize,
    ) -> Vec<(String, PatternStats)> {
        let mut candidates: Vec<(String, PatternStats)> = self
            .snapshot(today)
            .patterns
            .into_iter()
            .filter(|(_, stats)| stats.is_prewarm_candidate(today))
            .collect();
        candidates.sort_by(|a, b| {
            b.1.prewarm_score
                .total_cmp(&a.1.prewarm_score)
                .then_with(|| a.0.cmp(&b.0))
        });
        candidates.truncate(limit);
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, day, hour, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn sample(status: CacheStatus, when: DateTime<Utc>) -> Sample<'static> {
        Sample {
            stats_hash: "p1",
            sql: "SELECT * FROM stations",
            user_id: Some("alice"),
            status,
            is_write: false,
            duration: Duration::from_millis(200),
            rows: 10,
            at: when,
        }
    }

    const HIT_HOURS: [u32; 5] = [9, 10, 11, 12, 13];

    /// Five hits a day on each of `days`, after one miss.
    fn steady(days: &[u32]) -> PatternStats {
        let mut stats = PatternStats::default();
        stats.observe(&sample(CacheStatus::Miss, at(days[0], 8)));
        for day in days {
            for hour in HIT_HOURS {
                stats.observe(&sample(CacheStatus::Hit, at(*day, hour)));
            }
        }
        stats
    }

    #[test]
    fn test_observe_tracks_counts_and_averages() {
        let mut stats = PatternStats::default();
        let mut first = sample(CacheStatus::Miss, at(19, 8));
        first.duration = Duration::from_millis(300);
        first.rows = 30;
        stats.observe(&first);

        let mut second = sample(CacheStatus::Hit, at(19, 9));
        second.duration = Duration::from_millis(100);
        second.rows = 10;
        stats.observe(&second);

        assert_eq!((stats.hits, stats.misses, stats.executions), (1, 1, 2));
        assert!((stats.avg_duration_ms - 200.0).abs() < 1e-9);
        assert!((stats.avg_rows - 20.0).abs() < 1e-9);
        assert_eq!(stats.sql, "SELECT * FROM stations");
        assert_eq!(stats.user_id.as_deref(), Some("alice"));
        assert_eq!(stats.first_seen, Some(at(19, 8)));
        assert_eq!(stats.last_executed, Some(at(19, 9)));
        assert_eq!(stats.last_hit, Some(at(19, 9)));
        assert_eq!(stats.days_without_hits, 0);
    }

    #[test]
    fn test_never_hit_counts_as_one_idle_day() {
        let mut stats = PatternStats::default();
        stats.observe(&sample(CacheStatus::Miss, at(19, 8)));
        assert_eq!(stats.days_without_hits, 1);
    }

    #[test]
    fn test_score_decays_per_idle_day() {
        let mut stats = steady(&[17, 18, 19]);
        stats.rescore(at(19, 0).date_naive());
        let fresh = stats.prewarm_score;
        assert!(fresh > 0.0 && fresh <= 100.0);

        stats.rescore(at(21, 0).date_naive());
        assert_eq!(stats.days_without_hits, 2);
        // Recent activity is unchanged within the window, so only the
        // decay moves the score.
        assert!((stats.prewarm_score - fresh * 0.75 * 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_score_is_clamped() {
        let mut stats = PatternStats {
            executions: 10_000,
            hits: 10_000,
            avg_duration_ms: 1e9,
            avg_rows: 1e9,
            last_hit: Some(at(19, 12)),
            ..Default::default()
        };
        for day in 13..=19 {
            stats.daily_hits.insert(at(day, 0).date_naive(), 100);
        }
        stats.rescore(at(19, 0).date_naive());
        assert!(stats.prewarm_score <= 100.0);
        assert!((stats.prewarm_score - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_history_is_pruned() {
        let mut stats = steady(&[1, 19]);
        stats.rescore(at(19, 0).date_naive());
        assert_eq!(stats.daily_hits.len(), 1);
        assert!(stats.daily_hits.contains_key(&at(19, 0).date_naive()));
    }

    #[test]
    fn test_persistence_needs_steady_use() {
        let steady_use = steady(&[17, 18, 19]);
        assert!(steady_use.persistent);

        let two_days = steady(&[18, 19]);
        assert!(!two_days.persistent);

        let mut gone_quiet = steady(&[17, 18, 19]);
        gone_quiet.rescore(at(26, 0).date_naive());
        assert!(!gone_quiet.persistent);
    }

    #[test]
    fn test_prewarm_candidate_rules() {
        let today = at(19, 0).date_naive();
        let steady_use = steady(&[18, 19]);
        assert!(steady_use.is_prewarm_candidate(today));

        // All hits on one day is a spike, not a habit.
        let spike = steady(&[19]);
        assert!(!spike.is_prewarm_candidate(today));

        let mut stale = steady(&[18, 19]);
        stale.rescore(at(22, 0).date_naive());
        assert!(!stale.is_prewarm_candidate(at(22, 0).date_naive()));

        let mut write = steady(&[18, 19]);
        write.is_write = true;
        assert!(!write.is_prewarm_candidate(today));
    }

    #[test]
    fn test_counters_group_by_pattern() {
        let counters = StatsCounters::default();
        let mut s = sample(CacheStatus::Miss, at(19, 8));
        counters.record(&s);
        s.status = CacheStatus::Hit;
        counters.record(&s);
        s.stats_hash = "p2";
        s.status = CacheStatus::Bypass;
        s.is_write = true;
        counters.record(&s);

        let stats = counters.snapshot(at(19, 0).date_naive());
        assert_eq!((stats.hits, stats.misses, stats.bypasses, stats.writes), (1, 1, 1, 1));
        let p1 = &stats.patterns["p1"];
        assert_eq!((p1.hits, p1.misses, p1.bypasses, p1.executions), (1, 1, 0, 2));
        assert!(stats.patterns["p2"].is_write);
    }

    #[test]
    fn test_candidates_are_ranked_by_score() {
        let counters = StatsCounters::default();
        for (hash, days) in [("light", &[18u32, 19][..]), ("heavy", &[16, 17, 18, 19][..])] {
            let mut first = sample(CacheStatus::Miss, at(days[0], 8));
            first.stats_hash = hash;
            counters.record(&first);
            for day in days {
                for hour in HIT_HOURS {
                    let mut hit = sample(CacheStatus::Hit, at(*day, hour));
                    hit.stats_hash = hash;
                    counters.record(&hit);
                }
            }
        }

        let today = at(19, 0).date_naive();
        let ranked: Vec<String> = counters
            .prewarm_candidates(today, 10)
            .into_iter()
            .map(|(hash, _)| hash)
            .collect();
        assert_eq!(ranked, vec!["heavy".to_string(), "light".to_string()]);
        assert_eq!(counters.prewarm_candidates(today, 1).len(), 1);
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            bypasses: 10,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
