//! Per-connection outbound payload queue.
//!
//! Payloads leave the queue in insertion order. The head payload is consumed
//! in place as bytes are written, so a short write resumes from where it
//! stopped on the next attempt instead of resending or dropping the tail.

use std::collections::VecDeque;

use bytes::{Buf, Bytes};

/// FIFO of byte payloads waiting to be written to one connection.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    payloads: VecDeque<Bytes>,
}

impl OutboundQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a payload to the back of the queue.
    pub fn push(&mut self, payload: Bytes) {
        self.payloads.push_back(payload);
    }

    /// Returns the unsent bytes of the head payload.
    pub fn front(&self) -> Option<&[u8]> {
        self.payloads.front().map(|p| p.as_ref())
    }

    /// Marks `n` bytes of the head payload as written.
    ///
    /// The head is popped once fully written. Returns `true` in that case.
    /// `n` larger than the head's remaining length is clamped.
    pub fn advance(&mut self, n: usize) -> bool {
        let Some(head) = self.payloads.front_mut() else {
            return false;
        };
        let n = n.min(head.len());
        head.advance(n);
        if head.is_empty() {
            self.payloads.pop_front();
            return true;
        }
        false
    }

    /// Removes and returns the head payload (its unsent part).
    pub fn pop_front(&mut self) -> Option<Bytes> {
        self.payloads.pop_front()
    }

    /// Number of queued payloads.
    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    /// Total unsent bytes across all payloads.
    pub fn pending_bytes(&self) -> usize {
        self.payloads.iter().map(Bytes::len).sum()
    }

    /// Drops every queued payload.
    pub fn clear(&mut self) {
        self.payloads.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut queue = OutboundQueue::new();
        queue.push(Bytes::from_static(b"one"));
        queue.push(Bytes::from_static(b"two"));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.front(), Some(&b"one"[..]));
        assert!(queue.advance(3));
        assert_eq!(queue.front(), Some(&b"two"[..]));
        assert!(queue.advance(3));
        assert!(queue.is_empty());
        assert_eq!(queue.front(), None);
    }

    #[test]
    fn test_partial_advance_keeps_tail_at_head() {
        let mut queue = OutboundQueue::new();
        queue.push(Bytes::from_static(b"hello world"));
        queue.push(Bytes::from_static(b"next"));

        assert!(!queue.advance(6));
        assert_eq!(queue.front(), Some(&b"world"[..]));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pending_bytes(), 9);

        assert!(queue.advance(5));
        assert_eq!(queue.front(), Some(&b"next"[..]));
    }

    #[test]
    fn test_advance_clamps_and_handles_empty() {
        let mut queue = OutboundQueue::new();
        assert!(!queue.advance(10));

        queue.push(Bytes::from_static(b"abc"));
        assert!(queue.advance(100));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_front_discards_unsent_tail() {
        let mut queue = OutboundQueue::new();
        queue.push(Bytes::from_static(b"abcdef"));
        queue.push(Bytes::from_static(b"kept"));
        queue.advance(2);

        assert_eq!(queue.pop_front(), Some(Bytes::from_static(b"cdef")));
        assert_eq!(queue.front(), Some(&b"kept"[..]));
    }

    #[test]
    fn test_clear() {
        let mut queue = OutboundQueue::new();
        queue.push(Bytes::from_static(b"x"));
        queue.push(Bytes::new());
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.pending_bytes(), 0);
    }
}
