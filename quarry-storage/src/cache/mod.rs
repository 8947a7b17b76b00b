//! Cache store adapters.
//!
//! Every backend implements [`CacheBackend`]. Entries are last-write-wins
//! and carry no version of their own: staleness lives entirely in the
//! fingerprint, which embeds the version of every table the statement
//! reads. Bumping a table version makes later reads compute a new key and
//! miss; the orphaned entry ages out through TTL or the disk sweep.

pub mod admission;
pub mod disk_backend;
pub mod fingerprint;
pub mod memory_backend;
pub mod redis_backend;
pub mod traits;

pub use admission::{payload_size, Admission, AdmissionGuard};
pub use disk_backend::{DiskCacheBackend, SWEEP_SENTINEL};
pub use fingerprint::{fingerprint, fingerprint_on, stats_fingerprint};
pub use memory_backend::InMemoryCacheBackend;
pub use redis_backend::{parse_info_field, set_command, RedisCacheBackend, CACHE_KEY_PREFIX};
pub use traits::{CacheBackend, StoreMemory};
