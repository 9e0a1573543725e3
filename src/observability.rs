//! Logging infrastructure for tome builds.
//!
//! All events use the `tracing` target "tomes" and carry an `event` field for
//! filtering. The crate never installs a global subscriber; applications
//! configure one via `tracing_subscriber` or similar.
//!
//! ## Logging port
//!
//! Components never log into an ambient logger. Each one receives a
//! [`tracing::Span`] at construction and emits its events with that span as the
//! parent, so callers decide which fields (tome name, build id, ...) every event
//! is tagged with.
//!
//! ## Conventions
//!
//! - `event`: snake_case event name (required)
//! - `component`: subsystem (e.g., "scribe", "maker")
//! - Use `%` for Display, `?` for Debug formatting

use tracing::Span;

/// Target for all tome log events.
pub(crate) const TOMES_TARGET: &str = "tomes";

/// Macro for info-level log events.
///
/// # Example
/// ```ignore
/// log_info!(
///     parent: &self.span,
///     component = "scribe",
///     event = "page_written",
///     page = page.number,
/// );
/// ```
macro_rules! log_info {
    (parent: $parent:expr, $($field:tt)*) => {
        ::tracing::info!(target: $crate::observability::TOMES_TARGET, parent: $parent, $($field)*)
    };
    ($($field:tt)*) => {
        ::tracing::info!(target: $crate::observability::TOMES_TARGET, $($field)*)
    };
}

/// Macro for debug-level log events.
macro_rules! log_debug {
    (parent: $parent:expr, $($field:tt)*) => {
        ::tracing::debug!(target: $crate::observability::TOMES_TARGET, parent: $parent, $($field)*)
    };
    ($($field:tt)*) => {
        ::tracing::debug!(target: $crate::observability::TOMES_TARGET, $($field)*)
    };
}

/// Macro for warn-level log events.
macro_rules! log_warn {
    (parent: $parent:expr, $($field:tt)*) => {
        ::tracing::warn!(target: $crate::observability::TOMES_TARGET, parent: $parent, $($field)*)
    };
    ($($field:tt)*) => {
        ::tracing::warn!(target: $crate::observability::TOMES_TARGET, $($field)*)
    };
}

pub(crate) use log_debug;
pub(crate) use log_info;
pub(crate) use log_warn;

/// Span handed to a component when the caller did not supply one.
pub(crate) fn component_span(component: &'static str, tome: &str) -> Span {
    tracing::info_span!(target: TOMES_TARGET, "tome", component, tome = %tome)
}
