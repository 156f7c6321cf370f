//! # Client-Side Caching Module
//!
//! This module provides the TTL cache the portal views read through,
//! reducing backend calls and keeping something sensible on screen while the
//! network is slow or down.
//!
//! ## Overview
//!
//! Caching is valuable for:
//! - Avoiding duplicate backend calls for data several views share
//! - Keeping pending-bills / wallet / promo views responsive on slow links
//! - Enabling degraded-mode operation when the backend errors out
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CacheStore`] | In-memory TTL store with lazy expiry and statistics |
//! | [`CacheConfig`] | TTL and entry-size limits |
//! | [`CacheStats`] | On-demand aggregate statistics (hit rate, dedup rate) |
//! | [`KeyGenerator`] | Canonical cache keys from request parameters |
//! | [`RequestDeduplicator`] | Collapses concurrent identical in-flight loads |
//!
//! ## Example
//!
//! ```rust
//! use portal_cache::cache::{CacheStore, CacheConfig};
//! use std::time::Duration;
//!
//! let store = CacheStore::new(CacheConfig::new().with_ttl(Duration::from_secs(120)));
//! store.set("wallet:user=7", &serde_json::json!({"balance": 125_50})).unwrap();
//! assert!(store.has("wallet:user=7"));
//! ```
//!
//! ## Cache Key Generation
//!
//! Keys are canonical strings derived from a resource name and its parameter
//! mapping, with keys sorted at every nesting level. Identical parameters in
//! any insertion order produce byte-identical keys, so the same request from
//! different call sites always lands on the same entry, and key-pattern
//! invalidation can target entries by content (e.g. everything for one user).

mod dedup;
mod key;
mod store;

pub use dedup::{DedupSnapshot, RequestDeduplicator};
pub use key::KeyGenerator;
pub use store::{CacheConfig, CacheStats, CacheStore};
