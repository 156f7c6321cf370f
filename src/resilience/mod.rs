//! # Resilience Primitives Module
//!
//! This module provides the patterns that keep the portal usable when the
//! backend is slow, flaky, or down: bounded retries, cooperative
//! cancellation, and graceful degradation.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`retry`] | Bounded retry executor with backoff and failure classification |
//! | [`cancel`] | Cancellation handle/token pair for cooperative aborts |
//! | [`degrade`] | Pure policy mapping terminal failures to render decisions |
//!
//! ## Retrying
//!
//! ```rust
//! use portal_cache::resilience::retry::{fetch_with_retry, default_classify, RetryPolicy};
//! use portal_cache::resilience::cancel::CancelToken;
//! use std::time::Duration;
//!
//! # async fn example() -> portal_cache::Result<()> {
//! let policy = RetryPolicy::new()
//!     .with_max_attempts(3)
//!     .with_base_delay(Duration::from_millis(200));
//!
//! let bills: Vec<u32> = fetch_with_retry(
//!     &policy,
//!     &CancelToken::never(),
//!     default_classify,
//!     |_attempt| async move {
//!         // Call the backend here...
//!         Ok(vec![])
//!     },
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Cancelling
//!
//! The caller keeps a [`cancel::CancelHandle`] and threads a
//! [`cancel::CancelToken`] through every suspension point. The executor
//! checks the token at attempt boundaries and around backoff waits; it never
//! preempts an attempt that is already running.
//!
//! ## Degrading
//!
//! [`degrade::decide`] turns the final failure into what the view should
//! render: keep stale data, show an empty or error state (optionally seeded
//! with a static fallback dataset), or redirect to login.

pub mod cancel;
pub mod degrade;
pub mod retry;

pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use degrade::{decide, DegradationAction, DegradationContext};
pub use retry::{default_classify, fetch_with_retry, Disposition, RetryPolicy};
