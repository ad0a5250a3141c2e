//! Per-member reorder buffer
//!
//! Messages dispatched to a member can arrive in any order because each one
//! travels on its own dispatch task. Anything ahead of the member's cursor
//! parks here until the gap fills.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::types::Envelope;

/// Min-priority buffer keyed by sequence number
pub(crate) struct ReorderBuffer<T> {
    heap: BinaryHeap<Pending<T>>,
}

struct Pending<T>(Envelope<T>);

impl<T> PartialEq for Pending<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0.seq == other.0.seq
    }
}

impl<T> Eq for Pending<T> {}

impl<T> PartialOrd for Pending<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Pending<T> {
    // reversed so the BinaryHeap pops the smallest sequence first
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.seq.cmp(&self.0.seq)
    }
}

impl<T> ReorderBuffer<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }

    /// Park an early envelope until the cursor catches up
    ///
    /// Two entries with the same sequence would mean a duplicate dispatch
    /// upstream, which the protocol rules out.
    pub fn insert(&mut self, envelope: Envelope<T>) {
        debug_assert!(
            self.heap.iter().all(|p| p.0.seq != envelope.seq),
            "duplicate sequence {} in reorder buffer",
            envelope.seq
        );
        self.heap.push(Pending(envelope));
    }

    /// Sequence number of the earliest parked envelope, if any
    pub fn peek_seq(&self) -> Option<u64> {
        self.heap.peek().map(|p| p.0.seq)
    }

    /// Remove and return the earliest parked envelope
    pub fn pop_min(&mut self) -> Option<Envelope<T>> {
        self.heap.pop().map(|p| p.0)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(seq: u64) -> Envelope<u32> {
        Envelope {
            sender: None,
            payload: seq as u32,
            seq,
        }
    }

    #[test]
    fn test_pops_in_sequence_order() {
        let mut buffer = ReorderBuffer::new();
        for seq in [5u64, 1, 9, 3] {
            buffer.insert(envelope(seq));
        }

        let mut drained = Vec::new();
        while let Some(env) = buffer.pop_min() {
            drained.push(env.seq);
        }
        assert_eq!(drained, vec![1, 3, 5, 9]);
    }

    #[test]
    fn test_peek_does_not_remove() {
        let mut buffer = ReorderBuffer::new();
        buffer.insert(envelope(4));
        buffer.insert(envelope(2));

        assert_eq!(buffer.peek_seq(), Some(2));
        assert_eq!(buffer.peek_seq(), Some(2));
        assert_eq!(buffer.len(), 2);

        assert_eq!(buffer.pop_min().map(|e| e.seq), Some(2));
        assert_eq!(buffer.peek_seq(), Some(4));
    }

    #[test]
    fn test_empty_buffer() {
        let mut buffer: ReorderBuffer<u32> = ReorderBuffer::new();
        assert!(buffer.is_empty());
        assert_eq!(buffer.peek_seq(), None);
        assert!(buffer.pop_min().is_none());
    }

    #[test]
    fn test_interleaved_insert_and_pop() {
        let mut buffer = ReorderBuffer::new();
        buffer.insert(envelope(7));
        buffer.insert(envelope(3));
        assert_eq!(buffer.pop_min().map(|e| e.seq), Some(3));

        buffer.insert(envelope(5));
        assert_eq!(buffer.pop_min().map(|e| e.seq), Some(5));
        assert_eq!(buffer.pop_min().map(|e| e.seq), Some(7));
        assert!(buffer.is_empty());
    }
}
