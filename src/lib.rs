//! # portal-cache
//!
//! Resilient fetch-and-cache layer for the customer portal. The pending-bills,
//! wallet, and promotional-messages views read all backend data through this
//! crate: an in-memory TTL cache with key-pattern invalidation, request
//! deduplication, bounded retries with cooperative cancellation, and a
//! graceful-degradation policy for when the backend stays down.
//!
//! ## Core Philosophy
//!
//! - **Injectable state**: the cache store is an explicitly constructed
//!   instance, created once at application start and passed to view code —
//!   never a module-level singleton, so tests build isolated stores.
//! - **Tagged errors**: failures carry an explicit category
//!   (network/auth/server/rate-limit/validation), so retry and degradation
//!   policy match exhaustively instead of sniffing error shapes.
//! - **Cooperative cancellation**: a token shared between caller and
//!   executor, checked at attempt boundaries and backoff waits.
//! - **Never a raw failure on screen**: terminal errors map to cached data,
//!   a fallback dataset, an empty state, or a re-login redirect.
//!
//! ## Quick Start
//!
//! ```rust
//! use portal_cache::{CacheStore, DataFetcher, FetcherConfig, CancelToken};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> portal_cache::Result<()> {
//!     let store = Arc::new(CacheStore::with_defaults());
//!     let fetcher = DataFetcher::new(Arc::clone(&store), FetcherConfig::new());
//!
//!     let bills: Vec<u32> = fetcher
//!         .fetch(
//!             "bills",
//!             &serde_json::json!({"user": 7, "status": "pending"}),
//!             &CancelToken::never(),
//!             |_attempt| async move {
//!                 // Call the backend API here.
//!                 Ok(vec![])
//!             },
//!         )
//!         .await?;
//!
//!     println!("{} pending bills", bills.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache`] | TTL store, canonical key generation, request deduplication |
//! | [`resilience`] | Retry executor, cancellation tokens, degradation policy |
//! | [`fetcher`] | High-level fetch façade composing cache and resilience |
//! | [`error`] | Tagged error taxonomy shared by every layer |
//!
//! ## Concurrency model
//!
//! All synchronous operations (cache reads/writes, deduplicator
//! registration) complete between suspension points; awaits happen only at
//! network calls and backoff delays. For one key, results land in the cache
//! in settlement order, not issue order — consumers that must not display a
//! stale, slower settlement tag requests with
//! [`fetcher::Generation`] and discard outdated ones.

pub mod cache;
pub mod fetcher;
pub mod resilience;

// Re-export main types for convenience
pub use cache::{CacheConfig, CacheStats, CacheStore, KeyGenerator, RequestDeduplicator};
pub use fetcher::{DataFetcher, DataSource, FetchOutcome, FetcherConfig, Generation};
pub use resilience::{
    cancel_pair, decide, default_classify, fetch_with_retry, CancelHandle, CancelToken,
    DegradationAction, DegradationContext, Disposition, RetryPolicy,
};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorCategory};
