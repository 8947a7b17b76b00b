//! File-per-entry cache backend.
//!
//! Layout under the root directory:
//! - `{fingerprint}.json`: one serialized [`CacheEntry`] per fingerprint
//! - `.last_swept`: UTC date of the last daily sweep
//! - `.table_versions`: persisted version counters, owned by
//!   [`DiskVersionTracker`](crate::versions::DiskVersionTracker)
//!
//! Writes go to a temporary file first and are renamed into place, so a
//! reader never sees a half-written record. There is no native expiry:
//! the entry's `expiresAt` is checked on read, and a once-per-day sweep
//! removes every record created before the current UTC day.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use quarry_core::{
    now_millis, CacheEntry, QuarryResult, Rows, StoreError, ValidationError,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::admission::{payload_size, Admission, AdmissionGuard};
use super::memory_backend::short;
use super::traits::{CacheBackend, StoreMemory};

/// Name of the file recording the last sweep date.
pub const SWEEP_SENTINEL: &str = ".last_swept";

const RECORD_EXTENSION: &str = "json";
const MAX_FINGERPRINT_LEN: usize = 128;

/// Disk-backed cache store.
#[derive(Debug)]
pub struct DiskCacheBackend {
    root: PathBuf,
    guard: Option<AdmissionGuard>,
    last_swept: Mutex<Option<NaiveDate>>,
    tmp_counter: AtomicU64,
}

impl DiskCacheBackend {
    /// Backend rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            guard: None,
            last_swept: Mutex::new(None),
            tmp_counter: AtomicU64::new(0),
        }
    }

    /// Apply the soft memory guard to the total size of stored records.
    pub fn with_admission(mut self, guard: AdmissionGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the record for `fingerprint`.
    ///
    /// Fingerprints become file names, so anything other than a short hex
    /// string is refused.
    pub fn record_path(&self, fingerprint: &str) -> QuarryResult<PathBuf> {
        let valid = !fingerprint.is_empty()
            && fingerprint.len() <= MAX_FINGERPRINT_LEN
            && fingerprint.bytes().all(|b| b.is_ascii_hexdigit());
        if !valid {
            return Err(ValidationError::InvalidValue {
                field: "fingerprint".to_string(),
                reason: "must be a hex digest".to_string(),
            }
            .into());
        }
        Ok(self
            .root
            .join(format!("{}.{}", fingerprint, RECORD_EXTENSION)))
    }

    async fn ensure_root(&self) -> QuarryResult<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| io_error("create cache directory", &self.root, e))
    }

    /// Paths and sizes of every record file. A missing root is empty.
    async fn records(&self) -> QuarryResult<Vec<(PathBuf, u64)>> {
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error("list cache directory", &self.root, e)),
        };

        let mut records = Vec::new();
        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| io_error("list cache directory", &self.root, e))?
        {
            let path = item.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            // Raced with a delete: skip it.
            let Ok(meta) = item.metadata().await else {
                continue;
            };
            if meta.is_file() {
                records.push((path, meta.len()));
            }
        }
        Ok(records)
    }

    async fn read_entry(&self, path: &Path) -> QuarryResult<Option<CacheEntry>> {
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error("read cache record", path, e)),
        };
        match serde_json::from_str::<CacheEntry>(&text) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Discarding unreadable cache record");
                remove_quietly(path).await;
                Ok(None)
            }
        }
    }

    /// Remove every record created before `today` (UTC), plus any record
    /// that cannot be parsed. Returns the number of files removed.
    pub async fn sweep_before(&self, today: NaiveDate) -> QuarryResult<u64> {
        let mut removed = 0;
        for (path, _) in self.records().await? {
            let stale = match tokio::fs::read_to_string(&path).await {
                Ok(text) => match serde_json::from_str::<CacheEntry>(&text) {
                    Ok(entry) => entry
                        .created_at_utc()
                        .map_or(true, |created| created.date_naive() < today),
                    Err(_) => true,
                },
                Err(_) => continue,
            };
            if stale && remove_quietly(&path).await {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Run [`sweep_before`](Self::sweep_before) unless it already ran on
    /// `today`. The sentinel survives restarts.
    pub async fn sweep_if_due(&self, today: NaiveDate) -> QuarryResult<u64> {
        let mut last_swept = self.last_swept.lock().await;
        if *last_swept == Some(today) {
            return Ok(0);
        }

        let sentinel = self.root.join(SWEEP_SENTINEL);
        if let Ok(text) = tokio::fs::read_to_string(&sentinel).await {
            if text.trim().parse::<NaiveDate>().ok() == Some(today) {
                *last_swept = Some(today);
                return Ok(0);
            }
        }

        let removed = self.sweep_before(today).await?;
        self.ensure_root().await?;
        tokio::fs::write(&sentinel, today.to_string())
            .await
            .map_err(|e| io_error("write sweep sentinel", &sentinel, e))?;
        *last_swept = Some(today);

        info!(removed, date = %today, "Daily cache sweep complete");
        Ok(removed)
    }

    async fn write_atomic(&self, path: &Path, contents: &str) -> QuarryResult<()> {
        let tmp = self.root.join(format!(
            ".tmp-{}-{}",
            std::process::id(),
            self.tmp_counter.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::write(&tmp, contents)
            .await
            .map_err(|e| io_error("write cache record", &tmp, e))?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            remove_quietly(&tmp).await;
            return Err(io_error("commit cache record", path, e));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for DiskCacheBackend {
    fn name(&self) -> &'static str {
        "disk"
    }

    async fn get(&self, fingerprint: &str) -> QuarryResult<Option<CacheEntry>> {
        let path = self.record_path(fingerprint)?;
        let Some(entry) = self.read_entry(&path).await? else {
            return Ok(None);
        };
        if entry.is_expired_at(now_millis()) {
            debug!(fingerprint = %short(fingerprint), "Cache record expired");
            remove_quietly(&path).await;
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn set(
        &self,
        fingerprint: &str,
        rows: &Rows,
        ttl: Option<Duration>,
    ) -> QuarryResult<Admission> {
        let path = self.record_path(fingerprint)?;
        let entry = CacheEntry::new(fingerprint, rows.clone()).with_ttl(ttl);
        let (json, size) = payload_size(&entry)?;

        if let Some(guard) = self.guard {
            let used: u64 = self
                .records()
                .await?
                .iter()
                .filter(|(p, _)| *p != path)
                .map(|(_, len)| len)
                .sum();
            let admission = guard.check(used, size);
            if !admission.is_admitted() {
                warn!(
                    fingerprint = %short(fingerprint),
                    used, payload = size, limit = guard.limit(),
                    "Cache admission rejected"
                );
                return Ok(admission);
            }
        }

        self.ensure_root().await?;
        self.write_atomic(&path, &json).await?;
        Ok(Admission::Admitted)
    }

    async fn admission_check(&self, payload_bytes: u64) -> QuarryResult<Admission> {
        let Some(guard) = self.guard else {
            return Ok(Admission::Admitted);
        };
        let used: u64 = self.records().await?.iter().map(|(_, len)| len).sum();
        Ok(guard.check(used, payload_bytes))
    }

    async fn delete(&self, fingerprint: &str) -> QuarryResult<bool> {
        let path = self.record_path(fingerprint)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error("delete cache record", &path, e)),
        }
    }

    async fn clear(&self) -> QuarryResult<u64> {
        let mut removed = 0;
        for (path, _) in self.records().await? {
            if remove_quietly(&path).await {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn memory(&self) -> QuarryResult<StoreMemory> {
        let records = self.records().await?;
        Ok(StoreMemory {
            used_bytes: records.iter().map(|(_, len)| len).sum(),
            peak_bytes: None,
            total_keys: Some(records.len() as u64),
            evicted_keys: None,
        })
    }

    async fn ping(&self) -> QuarryResult<()> {
        self.ensure_root().await
    }

    async fn maintain(&self) -> QuarryResult<()> {
        self.sweep_if_due(Utc::now().date_naive()).await.map(|_| ())
    }
}

fn io_error(operation: &str, path: &Path, e: std::io::Error) -> quarry_core::QuarryError {
    StoreError::Io {
        reason: format!("{} {}: {}", operation, path.display(), e),
    }
    .into()
}

/// Delete a file, reporting whether it was removed.
async fn remove_quietly(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to remove cache record");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Days;
    use quarry_core::{QuarryError, Row};
    use serde_json::json;

    fn rows() -> Rows {
        let mut row = Row::new();
        row.insert("station".to_string(), json!("KJFK"));
        row.insert("temp".to_string(), json!(21.5));
        vec![row]
    }

    fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    async fn write_backdated(backend: &DiskCacheBackend, fingerprint: &str, days: u64) {
        let mut entry = CacheEntry::new(fingerprint, rows());
        entry.created_at -= (days as i64) * 24 * 60 * 60 * 1000;
        let json = serde_json::to_string(&entry).expect("entry should serialize");
        backend.ensure_root().await.expect("root should be creatable");
        tokio::fs::write(
            backend.record_path(fingerprint).expect("valid fingerprint"),
            json,
        )
        .await
        .expect("write should succeed");
    }

    #[tokio::test]
    async fn test_set_then_get_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = DiskCacheBackend::new(dir.path());

        backend.set("abc123", &rows(), None).await.expect("set");
        let entry = backend
            .get("abc123")
            .await
            .expect("get")
            .expect("entry should exist");
        assert_eq!(entry.rows, rows());
        assert!(dir.path().join("abc123.json").exists());
    }

    #[tokio::test]
    async fn test_missing_record_is_a_miss() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = DiskCacheBackend::new(dir.path().join("not-yet-created"));
        assert!(backend.get("abc").await.expect("get").is_none());
        assert_eq!(backend.memory().await.expect("memory").total_keys, Some(0));
    }

    #[tokio::test]
    async fn test_rejects_path_like_fingerprints() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = DiskCacheBackend::new(dir.path());
        for bad in ["", "../etc/passwd", "abc/def", "xyz"] {
            let err = backend.get(bad).await.expect_err("should be rejected");
            assert!(matches!(err, QuarryError::Validation(_)), "{}", bad);
        }
    }

    #[tokio::test]
    async fn test_expired_record_is_removed_on_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = DiskCacheBackend::new(dir.path());
        backend
            .set("abc", &rows(), Some(Duration::ZERO))
            .await
            .expect("set");

        assert!(backend.get("abc").await.expect("get").is_none());
        assert!(!dir.path().join("abc.json").exists());
    }

    #[tokio::test]
    async fn test_corrupt_record_is_a_miss() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = DiskCacheBackend::new(dir.path());
        tokio::fs::write(dir.path().join("abc.json"), "{not json")
            .await
            .expect("write");

        assert!(backend.get("abc").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn test_sweep_removes_records_from_previous_days() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = DiskCacheBackend::new(dir.path());
        write_backdated(&backend, "aaa", 1).await;
        backend.set("bbb", &rows(), None).await.expect("set");

        let removed = backend.sweep_before(today()).await.expect("sweep");
        assert_eq!(removed, 1);
        assert!(backend.get("aaa").await.expect("get").is_none());
        assert!(backend.get("bbb").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn test_sweep_runs_once_per_day() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = DiskCacheBackend::new(dir.path());
        write_backdated(&backend, "aaa", 2).await;

        assert_eq!(backend.sweep_if_due(today()).await.expect("sweep"), 1);
        let sentinel = tokio::fs::read_to_string(dir.path().join(SWEEP_SENTINEL))
            .await
            .expect("sentinel should exist");
        assert_eq!(sentinel, today().to_string());

        write_backdated(&backend, "ccc", 2).await;
        assert_eq!(backend.sweep_if_due(today()).await.expect("sweep"), 0);

        // A fresh process reads the sentinel and also skips.
        let restarted = DiskCacheBackend::new(dir.path());
        assert_eq!(restarted.sweep_if_due(today()).await.expect("sweep"), 0);

        let tomorrow = today()
            .checked_add_days(Days::new(1))
            .expect("date in range");
        assert_eq!(restarted.sweep_if_due(tomorrow).await.expect("sweep"), 1);
    }

    #[tokio::test]
    async fn test_admission_guard_applies_to_disk_usage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = DiskCacheBackend::new(dir.path()).with_admission(AdmissionGuard::new(150, 0));

        assert!(backend.set("aaa", &rows(), None).await.expect("set").is_admitted());
        // Overwriting the same fingerprint does not count its old size.
        assert!(backend.set("aaa", &rows(), None).await.expect("set").is_admitted());
        assert!(!backend.set("bbb", &rows(), None).await.expect("set").is_admitted());
        assert!(backend.get("bbb").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn test_admission_check_sums_record_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let unguarded = DiskCacheBackend::new(dir.path());
        assert!(unguarded
            .admission_check(u64::MAX)
            .await
            .expect("check")
            .is_admitted());

        let backend = DiskCacheBackend::new(dir.path()).with_admission(AdmissionGuard::new(150, 0));
        assert!(backend.admission_check(150).await.expect("check").is_admitted());

        backend.set("aaa", &rows(), None).await.expect("set");
        let used = backend.memory().await.expect("memory").used_bytes;
        assert!(used > 0);
        assert_eq!(
            backend.admission_check(151 - used).await.expect("check"),
            Admission::Rejected {
                used,
                payload: 151 - used,
                limit: 150
            }
        );
        assert!(backend
            .admission_check(150 - used)
            .await
            .expect("check")
            .is_admitted());
    }

    #[tokio::test]
    async fn test_clear_keeps_sentinel() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = DiskCacheBackend::new(dir.path());
        backend.set("aaa", &rows(), None).await.expect("set");
        backend.set("bbb", &rows(), None).await.expect("set");
        backend.maintain().await.expect("maintain");
        let versions = dir.path().join(crate::versions::VERSIONS_FILE);
        tokio::fs::write(&versions, r#"{"stations":3}"#)
            .await
            .expect("write");

        assert_eq!(backend.clear().await.expect("clear"), 2);
        assert!(dir.path().join(SWEEP_SENTINEL).exists());
        assert!(versions.exists());
        assert_eq!(backend.sweep_before(today()).await.expect("sweep"), 0);
        assert!(versions.exists());
        assert!(!backend.delete("aaa").await.expect("delete"));
    }
}
