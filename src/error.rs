use crate::registry::OperationHandle;
use thiserror::Error;

/// Errors surfaced synchronously by the bridge.
///
/// Most failures in this crate are *not* errors in the `Result` sense:
/// validation problems return `None` from `publish`, unknown handles are
/// logged no-ops, and everything asynchronous arrives as an error [`Event`].
/// Only conditions that make an operation impossible end up here.
///
/// [`Event`]: crate::event::Event
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The OS discovery facility could not be initialized. Fatal for this
    /// runtime instance; subsequent publish/browse calls fail with the same
    /// error without retrying.
    #[error("discovery backend unavailable: {0}")]
    BackendUnavailable(String),

    /// An operation handle was already present in the registry. Cannot occur
    /// with the monotonic allocator, checked defensively.
    #[error("duplicate operation handle {0}")]
    DuplicateHandle(OperationHandle),

    /// Configuration file could not be read or parsed.
    #[error("invalid configuration: {0}")]
    Config(String),
}
