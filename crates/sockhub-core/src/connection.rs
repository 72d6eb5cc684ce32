//! Connection identifiers.

use std::fmt;

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Identifier of a client connection within one server instance.
///
/// Ids are handed out by [`ConnectionIdGenerator`] in increasing order and are
/// not reused until the whole `usize` range has been issued, so a stale id
/// held by application code does not alias a newer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(usize);

impl ConnectionId {
    /// Creates a connection id from its raw value.
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    /// Returns the raw value (used as the poll token).
    pub const fn get(self) -> usize {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Monotonic generator for [`ConnectionId`]s.
///
/// Values below `first` are left free for the caller (the server reserves
/// them for its own poll tokens). Once `usize::MAX` has been handed out the
/// generator starts over at `first`, never below it.
#[derive(Debug)]
pub struct ConnectionIdGenerator {
    first: usize,
    next: usize,
}

impl ConnectionIdGenerator {
    /// Creates a generator whose first id is `first`.
    pub const fn starting_at(first: usize) -> Self {
        Self { first, next: first }
    }

    /// Returns the next id.
    pub fn next_id(&mut self) -> ConnectionId {
        let id = ConnectionId(self.next);
        self.next = self.next.checked_add(1).unwrap_or(self.first);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_monotonic() {
        let mut ids = ConnectionIdGenerator::starting_at(1);
        let a = ids.next_id();
        let b = ids.next_id();
        assert_eq!(a.get(), 1);
        assert_eq!(b.get(), 2);
        assert!(a < b);
    }

    #[test]
    fn test_exhausted_ids_restart_at_first() {
        let mut ids = ConnectionIdGenerator {
            first: 1,
            next: usize::MAX,
        };
        assert_eq!(ids.next_id().get(), usize::MAX);
        // Never wraps onto the reserved values below `first`
        assert_eq!(ids.next_id().get(), 1);
        assert_eq!(ids.next_id().get(), 2);
    }

    #[test]
    fn test_display() {
        assert_eq!(ConnectionId::new(42).to_string(), "conn-42");
    }
}
