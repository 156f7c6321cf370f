//! Graceful degradation policy.
//!
//! A pure decision function the UI layer consults after a fetch has finally
//! failed: keep what is on screen, fall back to a static dataset, show an
//! empty or error state, or send the user back to login. It performs no I/O
//! and never fails; rendering is the caller's job.

use crate::{Error, ErrorCategory};
use tracing::debug;

/// What the UI should render after a terminal fetch failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DegradationAction<T> {
    /// Keep whatever is currently displayed (the cache still has it).
    UseCachedData,
    /// Render nothing, optionally seeded with fallback data.
    ShowEmptyState { fallback: Option<T> },
    /// Credentials are missing or expired; route to re-authentication.
    RedirectToAuth,
    /// Surface the error, optionally seeded with fallback data.
    ShowErrorState { fallback: Option<T> },
}

/// Caller-side facts the decision depends on.
#[derive(Debug, Clone, Copy, Default)]
pub struct DegradationContext {
    /// The view currently displays data the cache can keep serving.
    pub has_cached_data: bool,
    /// This is the caller's first failed attempt for this view; fallback
    /// data is only ever seeded on the first failure.
    pub first_failure: bool,
}

impl DegradationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cached_data(mut self, has: bool) -> Self {
        self.has_cached_data = has;
        self
    }

    pub fn with_first_failure(mut self, first: bool) -> Self {
        self.first_failure = first;
        self
    }
}

/// Map a terminal failure to a rendering decision.
///
/// Deterministic per [`ErrorCategory`]:
/// - `Authentication` always redirects to login and never displays fallback
///   data.
/// - `Cancelled` keeps the current display; cancellation is not reportable.
/// - `Network` prefers cached data, else an empty state (offline looks
///   empty, not broken).
/// - `Server` and `RateLimit` prefer cached data, else an error state with a
///   retry affordance.
/// - `Validation` and `Unknown` surface an error state.
pub fn decide<T: Clone>(
    context: &DegradationContext,
    error: &Error,
    fallback: Option<&T>,
) -> DegradationAction<T> {
    let seed = if context.first_failure {
        fallback.cloned()
    } else {
        None
    };

    let action = match error.category() {
        ErrorCategory::Authentication => DegradationAction::RedirectToAuth,
        ErrorCategory::Cancelled => DegradationAction::UseCachedData,
        ErrorCategory::Network => {
            if context.has_cached_data {
                DegradationAction::UseCachedData
            } else {
                DegradationAction::ShowEmptyState { fallback: seed }
            }
        }
        ErrorCategory::Server | ErrorCategory::RateLimit => {
            if context.has_cached_data {
                DegradationAction::UseCachedData
            } else {
                DegradationAction::ShowErrorState { fallback: seed }
            }
        }
        ErrorCategory::Validation | ErrorCategory::Unknown => {
            DegradationAction::ShowErrorState { fallback: seed }
        }
    };

    debug!(category = ?error.category(), decision = action.name(), "degradation decision");
    action
}

impl<T> DegradationAction<T> {
    fn name(&self) -> &'static str {
        match self {
            DegradationAction::UseCachedData => "use_cached_data",
            DegradationAction::ShowEmptyState { .. } => "show_empty_state",
            DegradationAction::RedirectToAuth => "redirect_to_auth",
            DegradationAction::ShowErrorState { .. } => "show_error_state",
        }
    }

    /// Fallback data the UI should seed, if the decision carries any.
    pub fn fallback(&self) -> Option<&T> {
        match self {
            DegradationAction::ShowEmptyState { fallback }
            | DegradationAction::ShowErrorState { fallback } => fallback.as_ref(),
            _ => None,
        }
    }
}
