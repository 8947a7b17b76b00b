//! QUARRY API - HTTP Service
//!
//! axum service in front of the query cache and the join planner:
//! - `POST /query` runs SQL through [`quarry_storage::QueryCache`]
//! - `/cache/*` inspects and maintains the cache store
//! - `POST /join-plan` plans joins from the warehouse catalog
//! - `/health/*` and `/metrics` for operations
//!
//! The warehouse is reached over the Postgres wire protocol through a
//! deadpool connection pool; see [`warehouse`].

pub mod config;
pub mod error;
pub mod macros;
pub mod routes;
pub mod state;
pub mod telemetry;
pub mod warehouse;

pub use config::{parse_bind_addr, resolve_bind_addr, ApiConfig};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use routes::create_api_router;
pub use state::AppState;
pub use warehouse::{PgCatalog, PgWarehouse, WarehouseConfig};
