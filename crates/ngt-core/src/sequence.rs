//! Per-connection sequence number bookkeeping.
//!
//! Sequence numbers are 8 bits wide and wrap. The received side tolerates
//! exactly one kind of irregularity: a retransmission of the last accepted
//! packet. Anything that is neither the next value nor the last one is
//! reordering, which this protocol cannot repair.

use tracing::trace;

/// Classification of an incoming sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceClass {
    /// Next expected value (or the first value seen)
    Fresh,
    /// Same as the last accepted value: a retransmission
    Duplicate,
    /// Any other value
    Reordered,
}

/// Send counter and receive classifier for one connection.
///
/// # Invariants
///
/// - `next_send` advances by exactly one (mod 256) per header sent that
///   consumes a sequence number.
/// - `last_recv` only changes on a `Fresh` classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceTracker {
    next_send: u8,
    last_sent: Option<u8>,
    last_recv: Option<u8>,
}

impl SequenceTracker {
    /// Create a tracker whose first outgoing header carries `initial`.
    #[must_use]
    pub fn new(initial: u8) -> Self {
        Self { next_send: initial, last_sent: None, last_recv: None }
    }

    /// Sequence number the next outgoing header will carry
    #[must_use]
    pub fn next_send_seq(&self) -> u8 {
        self.next_send
    }

    /// Sequence number of the last header sent, if any
    #[must_use]
    pub fn last_sent_seq(&self) -> Option<u8> {
        self.last_sent
    }

    /// Last accepted incoming sequence number, if any
    #[must_use]
    pub fn last_recv_seq(&self) -> Option<u8> {
        self.last_recv
    }

    /// Claim the next outgoing sequence number.
    pub fn advance_send(&mut self) -> u8 {
        let seq = self.next_send;
        self.last_sent = Some(seq);
        self.next_send = seq.wrapping_add(1);
        trace!(sequence = seq, next = self.next_send, "claimed send sequence");
        seq
    }

    /// Classify `seq` without changing any state.
    #[must_use]
    pub fn classify(&self, seq: u8) -> SequenceClass {
        match self.last_recv {
            None => SequenceClass::Fresh,
            Some(last) if seq == last => SequenceClass::Duplicate,
            Some(last) if seq == last.wrapping_add(1) => SequenceClass::Fresh,
            Some(_) => SequenceClass::Reordered,
        }
    }

    /// Classify `seq` and, if it is fresh, record it as accepted.
    pub fn accept_incoming(&mut self, seq: u8) -> SequenceClass {
        let class = self.classify(seq);
        trace!(sequence = seq, last = ?self.last_recv, ?class, "classified incoming sequence");
        if class == SequenceClass::Fresh {
            self.last_recv = Some(seq);
        }
        class
    }

    /// Expected next incoming sequence number, if any packet was accepted
    #[must_use]
    pub fn expected_recv_seq(&self) -> Option<u8> {
        self.last_recv.map(|last| last.wrapping_add(1))
    }
}

impl Default for SequenceTracker {
    fn default() -> Self {
        Self::new(0)
    }
}
