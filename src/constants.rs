//! Global constants and helpers: worker pool sizing, retry windows, file names, networking defaults
// src/constants.rs
use std::path::{Path, PathBuf};

/// Binary name used in user agents and metadata
pub const BINARY_NAME: &str = "bizdir";

/// Package version from Cargo.toml (set at compile time)
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the user agent string for HTTP requests
pub fn user_agent() -> String {
    format!("{}/{}", BINARY_NAME, VERSION)
}

// ============================================================================
// Ingestion Pipeline Constants
// ============================================================================

/// Number of parallel queue workers. Kept small so the remote registry
/// is never hit by a burst of concurrent fetches.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Minutes between two retry attempts for a failed work item
pub const DEFAULT_RETRY_INTERVAL_MINUTES: i64 = 5;

/// Hours a failed work item stays on the retry list before it is
/// dead-lettered, counted from the item's creation time
pub const DEFAULT_MAX_RETRY_HOURS: i64 = 24;

/// Seconds between two re-index scheduler ticks
pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 60;

// ============================================================================
// Persistence Constants
// ============================================================================

/// Retry list filename (rewritten atomically on every mutation)
pub const RETRY_LIST_FILE: &str = "reindex-retry.jsonl";

/// Dead list filename (append-only, manual inspection)
pub const DEAD_LIST_FILE: &str = "reindex-dead.jsonl";

/// Resolves the retry list path relative to the provided directory
pub fn retry_list_path(dir: impl AsRef<Path>) -> PathBuf {
    dir.as_ref().join(RETRY_LIST_FILE)
}

/// Resolves the dead list path relative to the provided directory
pub fn dead_list_path(dir: impl AsRef<Path>) -> PathBuf {
    dir.as_ref().join(DEAD_LIST_FILE)
}

// ============================================================================
// Index Constants
// ============================================================================

/// Heap budget handed to the tantivy index writer
pub const INDEX_WRITER_HEAP_BYTES: usize = 50_000_000;

// ============================================================================
// Network Constants
// ============================================================================

/// Timeout for a single business-card fetch from the remote registry
pub const HTTP_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Trust Constants
// ============================================================================

/// Sentinel caller identity returned when certificate validation is
/// disabled (test/debug deployments only)
pub const DISABLED_TRUST_CLIENT_ID: &str = "unsecure-debug-client";
