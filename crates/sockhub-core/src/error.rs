//! Error types for event dispatch.

use thiserror::Error;

use crate::event::EventKind;

/// A handler failed while an event was being emitted.
///
/// Handlers registered after the failing one did not run for that emission.
#[derive(Error, Debug)]
#[error("{kind} handler failed: {source}")]
pub struct EmitError {
    /// Event that was being dispatched
    pub kind: EventKind,

    /// Error returned by the handler
    #[source]
    pub source: anyhow::Error,
}

/// An event name did not match any known event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown event name: '{0}'")]
pub struct ParseEventKindError(pub String);
