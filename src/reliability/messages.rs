// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Feedback messages the consumer side sends back to the reliability
//! overlay, and the handshake entry state machine they drive (spec §3, §4.3).

use crate::time::now_us;

/// State of an in-flight [`HandshakeEntry`] (spec §3, §4.5 state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Sent, awaiting feedback.
    Pending,
    /// Consumer acknowledged receipt.
    Acked,
    /// Consumer rejected the message; no retries remain.
    Nacked,
    /// No feedback arrived before `timeout_ms` elapsed.
    TimedOut,
    /// Scheduled for re-send on the next `retry_failed()` call.
    Retry,
}

/// Consumer-to-bus feedback, a tagged union rather than a struct with
/// always-present fields (spec §9: "model as a sum type").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedbackKind {
    /// Message received and processed successfully.
    Ack,
    /// Message rejected; carries an application error code and message.
    Nack { code: u32, message: String },
    /// Consumer is temporarily unable to accept more work.
    Busy,
    /// Consumer's own buffer overflowed.
    Overflow,
    /// Proactive signal that the consumer is ready for more work.
    Ready,
}

/// A feedback message routed from a consumer back through the bus to the
/// [`super::ReliabilityTable`] (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackMessage {
    pub kind: FeedbackKind,
    pub sequence: u64,
    pub producer_id: u32,
    pub consumer_id: u32,
    pub timestamp_us: u64,
}

impl FeedbackMessage {
    /// Build an ACK for `sequence` (spec §4.3 "Feedback constructors").
    #[must_use]
    pub fn make_ack(sequence: u64, producer_id: u32, consumer_id: u32) -> Self {
        Self {
            kind: FeedbackKind::Ack,
            sequence,
            producer_id,
            consumer_id,
            timestamp_us: now_us(),
        }
    }

    /// Build a NACK for `sequence` carrying an application error code/message.
    #[must_use]
    pub fn make_nack(
        sequence: u64,
        producer_id: u32,
        consumer_id: u32,
        code: u32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind: FeedbackKind::Nack {
                code,
                message: message.into(),
            },
            sequence,
            producer_id,
            consumer_id,
            timestamp_us: now_us(),
        }
    }

    /// Build a proactive READY signal (not tied to a specific sequence, but
    /// the wire type requires one; callers that have no relevant sequence
    /// yet may pass 0).
    #[must_use]
    pub fn make_ready(producer_id: u32, consumer_id: u32) -> Self {
        Self {
            kind: FeedbackKind::Ready,
            sequence: 0,
            producer_id,
            consumer_id,
            timestamp_us: now_us(),
        }
    }

    /// Build a BUSY signal for `sequence`.
    #[must_use]
    pub fn make_busy(sequence: u64, producer_id: u32, consumer_id: u32) -> Self {
        Self {
            kind: FeedbackKind::Busy,
            sequence,
            producer_id,
            consumer_id,
            timestamp_us: now_us(),
        }
    }

    /// Build an OVERFLOW signal for `sequence`.
    #[must_use]
    pub fn make_overflow(sequence: u64, producer_id: u32, consumer_id: u32) -> Self {
        Self {
            kind: FeedbackKind::Overflow,
            sequence,
            producer_id,
            consumer_id,
            timestamp_us: now_us(),
        }
    }
}

/// An in-flight record held by the reliability overlay until ACK or final
/// failure (spec §3 "Handshake entry").
#[derive(Debug, Clone)]
pub struct HandshakeEntry {
    pub sequence: u64,
    pub producer_id: u32,
    pub consumer_id: u32,
    pub message_size: usize,
    pub message_hash: u32,
    pub state: HandshakeState,
    pub retry_count: u32,
    pub timeout_ms: u32,
    pub sent_timestamp_us: u64,
    pub ack_timestamp_us: Option<u64>,
    /// Retained copy of the payload so `retry_failed` can re-submit without
    /// the caller re-supplying it (zero_loss_mode, spec §4.3).
    pub(super) payload: Vec<u8>,
}

impl HandshakeEntry {
    pub(super) fn new(
        sequence: u64,
        producer_id: u32,
        consumer_id: u32,
        data: &[u8],
        timeout_ms: u32,
    ) -> Self {
        Self {
            sequence,
            producer_id,
            consumer_id,
            message_size: data.len(),
            message_hash: crate::hash::fnv1a(data),
            state: HandshakeState::Pending,
            retry_count: 0,
            timeout_ms,
            sent_timestamp_us: now_us(),
            ack_timestamp_us: None,
            payload: data.to_vec(),
        }
    }

    /// The key a feedback message must match to be accepted against this
    /// entry (spec §4.3: "reject if (sequence, producer_id, consumer_id)
    /// mismatch").
    pub(super) fn matches(&self, fb: &FeedbackMessage) -> bool {
        self.sequence == fb.sequence
            && self.producer_id == fb.producer_id
            && self.consumer_id == fb.consumer_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_stamp_sequence_and_ids() {
        let ack = FeedbackMessage::make_ack(5, 1, 2);
        assert_eq!(ack.kind, FeedbackKind::Ack);
        assert_eq!(ack.sequence, 5);
        assert_eq!(ack.producer_id, 1);
        assert_eq!(ack.consumer_id, 2);
    }

    #[test]
    fn nack_carries_code_and_message() {
        let nack = FeedbackMessage::make_nack(7, 1, 2, 42, "bad crc");
        match nack.kind {
            FeedbackKind::Nack { code, message } => {
                assert_eq!(code, 42);
                assert_eq!(message, "bad crc");
            }
            other => panic!("expected Nack, got {other:?}"),
        }
    }

    #[test]
    fn entry_matches_exact_key_only() {
        let entry = HandshakeEntry::new(1, 10, 20, b"x", 1000);
        assert!(entry.matches(&FeedbackMessage::make_ack(1, 10, 20)));
        assert!(!entry.matches(&FeedbackMessage::make_ack(1, 99, 20)));
        assert!(!entry.matches(&FeedbackMessage::make_ack(2, 10, 20)));
    }

    // Spec P9: message_hash equals FNV-1a over the payload bytes.
    #[test]
    fn entry_hash_matches_fnv1a() {
        let entry = HandshakeEntry::new(1, 0, 0, b"abc", 1000);
        assert_eq!(entry.message_hash, crate::hash::fnv1a(b"abc"));
    }
}
