//! Client-side sync core for the planner app.
//!
//! Two independent pieces:
//!
//! - [`SyncEngine`]: debounced, retry-aware, offline-tolerant saving of one
//!   logical resource (last write wins).
//! - [`PaginatedQuery`] over a shared [`PaginationCache`]: server pages
//!   accumulated into one list per query identity.
//!
//! The crate installs no `tracing` subscriber; hosts choose their own.

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod capabilities;
pub mod config;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod model;
pub mod pagination;
pub mod scheduler;

pub use capabilities::{fetch_fn, save_fn, FetchFn, PageFetcher, RemoteSave, SaveFn};
pub use config::{PaginationOptions, SyncOptions};
pub use connectivity::ConnectivityMonitor;
pub use engine::{SyncEngine, SyncEngineBuilder};
pub use error::{ConfigError, FetchError, KeyError, SaveError, SaveErrorKind};
pub use metrics::{SyncMetrics, SyncMetricsSnapshot};
pub use model::{
    Page, PageParams, QueryKey, StatusTransition, SyncSnapshot, SyncStatus, UnixTimeMs,
};
pub use pagination::{
    LoadKind, LoadOutcome, PaginatedQuery, PaginationCache, PaginationSnapshot, PaginationState,
};

pub const DEFAULT_DEBOUNCE_MS: u64 = 2000;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 5000;
pub const DEFAULT_SAVED_DISPLAY_MS: u64 = 3000;
pub const DEFAULT_RATE_LIMIT_MS: u64 = 20_000;
pub const DEFAULT_RATE_LIMIT_BUFFER_MS: u64 = 2000;
pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const DEFAULT_MAX_REFRESH_LIMIT: usize = 500;
/// Longest rate-limit wait honoured, whatever the server asks for.
pub const MAX_RETRY_AFTER_SECS: u64 = 3600;
