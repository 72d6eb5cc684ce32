//! Synchronous publish/subscribe dispatch of server events.
//!
//! The emitter keeps, per [`EventKind`], an ordered list of handlers and
//! invokes them on the caller's thread when an event is emitted. There is no
//! fault isolation: the first handler that fails aborts the emission and its
//! error is handed back to whoever called [`EventEmitter::emit`].
//!
//! Handlers receive a mutable context alongside the event. The server passes
//! its connection registry here, which lets a handler queue replies while it
//! is being dispatched.
//!
//! # Usage
//!
//! ```
//! use sockhub_core::{Event, EventEmitter, EventKind};
//!
//! let mut emitter: EventEmitter<Vec<String>> = EventEmitter::new();
//! let handler = emitter.on(EventKind::Start, |log: &mut Vec<String>, event: &Event<'_>| {
//!     log.push(event.kind().to_string());
//!     Ok(())
//! });
//!
//! let mut log = Vec::new();
//! emitter.emit(&mut log, &Event::Start { host: "0.0.0.0", port: 6666 }).unwrap();
//! assert_eq!(log, vec!["start".to_string()]);
//!
//! assert!(emitter.unregister(EventKind::Start, &handler));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::error::EmitError;
use crate::event::{Event, EventKind};

/// A registered event handler.
///
/// Handlers are shared handles: registration identity is the allocation, so
/// registering a clone of the same handle twice is a no-op.
pub type Handler<C> = Arc<dyn Fn(&mut C, &Event<'_>) -> anyhow::Result<()> + Send + Sync>;

/// Named-event dispatcher with idempotent registration.
pub struct EventEmitter<C: ?Sized> {
    handlers: HashMap<EventKind, Vec<Handler<C>>>,
}

impl<C: ?Sized> EventEmitter<C> {
    /// Creates an emitter with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registers `handler` for `kind`.
    ///
    /// Returns `false` if this exact handler was already registered for
    /// `kind`, in which case nothing changes.
    pub fn register(&mut self, kind: EventKind, handler: Handler<C>) -> bool {
        let list = self.handlers.entry(kind).or_default();
        if list.iter().any(|h| same_handler(h, &handler)) {
            return false;
        }
        list.push(handler);
        true
    }

    /// Wraps `f` into a [`Handler`], registers it for `kind` and returns the
    /// handle so it can be unregistered later.
    pub fn on<F>(&mut self, kind: EventKind, f: F) -> Handler<C>
    where
        F: Fn(&mut C, &Event<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let handler: Handler<C> = Arc::new(f);
        self.register(kind, Arc::clone(&handler));
        handler
    }

    /// Removes `handler` from `kind`.
    ///
    /// Returns `false` if it was not registered.
    pub fn unregister(&mut self, kind: EventKind, handler: &Handler<C>) -> bool {
        let Some(list) = self.handlers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|h| !same_handler(h, handler));
        list.len() != before
    }

    /// Number of handlers registered for `kind`.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }

    /// Invokes every handler registered for the event's kind, in
    /// registration order.
    ///
    /// # Errors
    ///
    /// Returns the first handler failure; later handlers are skipped.
    pub fn emit(&self, ctx: &mut C, event: &Event<'_>) -> Result<(), EmitError> {
        let kind = event.kind();
        let Some(list) = self.handlers.get(&kind) else {
            return Ok(());
        };

        trace!(event = %kind, handlers = list.len(), "Emitting event");

        for handler in list {
            handler(&mut *ctx, event).map_err(|source| EmitError { kind, source })?;
        }
        Ok(())
    }
}

impl<C: ?Sized> Default for EventEmitter<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ?Sized> fmt::Debug for EventEmitter<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for kind in EventKind::ALL {
            map.entry(&kind.as_str(), &self.handler_count(kind));
        }
        map.finish()
    }
}

/// Compares handler allocations, ignoring vtable pointers.
fn same_handler<C: ?Sized>(a: &Handler<C>, b: &Handler<C>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
