// SPDX-License-Identifier: Apache-2.0 OR MIT

//! `ReliabilityTable`: the ACK/NACK/BUSY/OVERFLOW/READY handshake overlay
//! (spec §4.3, scenarios S3/S4, properties P5/P6/P9).

use crate::config::ReliabilityConfig;
use crate::time::now_us;

use super::messages::{FeedbackKind, FeedbackMessage, HandshakeEntry, HandshakeState};

/// Tracks in-flight messages awaiting consumer feedback and drives their
/// retry/timeout lifecycle. One entry occupies exactly one slot, keyed by
/// `sequence % table_capacity` (spec §4.3: "a ring, not a map, so a
/// well-behaved consumer bounds memory").
pub struct ReliabilityTable {
    entries: Vec<Option<HandshakeEntry>>,
    capacity: usize,
    next_sequence: u64,
    config: ReliabilityConfig,

    pending_count: usize,
    total_messages: u64,
    successful_acks: u64,
    failed_deliveries: u64,
    timeouts: u64,
    retries: u64,
    /// EWMA of the ACK round-trip latency, microseconds (α = 0.1).
    avg_ack_latency_us: f64,
}

impl ReliabilityTable {
    /// Build an empty table sized per `config.table_capacity`.
    #[must_use]
    pub fn new(config: ReliabilityConfig) -> Self {
        let capacity = config.table_capacity.max(1);
        Self {
            entries: (0..capacity).map(|_| None).collect(),
            capacity,
            next_sequence: 0,
            config,
            pending_count: 0,
            total_messages: 0,
            successful_acks: 0,
            failed_deliveries: 0,
            timeouts: 0,
            retries: 0,
            avg_ack_latency_us: 0.0,
        }
    }

    fn index_of(&self, sequence: u64) -> usize {
        (sequence % self.capacity as u64) as usize
    }

    /// Flow-control signal for callers deciding whether to attempt another
    /// send at all (spec §4.3: `pending_count < capacity/4`). This is a
    /// softer, earlier check than `send`'s own admission test below — a
    /// producer can be told to back off well before the ring is physically
    /// full.
    #[must_use]
    pub fn can_send(&self) -> bool {
        self.pending_count < self.capacity / 4
    }

    /// Register `data` as sent from `producer_id` to `consumer_id`, returning
    /// the sequence number to attach to the wire message, or `None` if the
    /// slot this sequence would occupy is still held by an older pending
    /// entry (scenario S3). Unlike `can_send`, this is the hard ring-full
    /// check: it refuses rather than overwrite a live entry, since a slot
    /// only frees up once its occupant is acked, retried-to-failure, or
    /// timed out.
    pub fn send(&mut self, producer_id: u32, consumer_id: u32, data: &[u8]) -> Option<u64> {
        let sequence = self.next_sequence;
        let index = self.index_of(sequence);
        if self.entries[index].is_some() {
            return None;
        }
        self.next_sequence += 1;
        self.entries[index] = Some(HandshakeEntry::new(
            sequence,
            producer_id,
            consumer_id,
            data,
            self.config.default_timeout_ms,
        ));
        self.pending_count += 1;
        self.total_messages += 1;
        Some(sequence)
    }

    fn record_ack_latency(&mut self, sent_us: u64, acked_us: u64) {
        let sample = acked_us.saturating_sub(sent_us) as f64;
        if self.successful_acks == 0 {
            self.avg_ack_latency_us = sample;
        } else {
            self.avg_ack_latency_us = 0.1 * sample + 0.9 * self.avg_ack_latency_us;
        }
    }

    fn clear_slot(&mut self, index: usize) {
        if self.entries[index].take().is_some() {
            self.pending_count = self.pending_count.saturating_sub(1);
        }
    }

    /// Cancel a registered-but-never-delivered entry (the lane it was
    /// routed to rejected it before the consumer ever saw it). Counts as a
    /// failed delivery rather than a silent drop.
    pub fn cancel(&mut self, sequence: u64) {
        let index = self.index_of(sequence);
        let matches = self.entries[index]
            .as_ref()
            .is_some_and(|e| e.sequence == sequence);
        if matches {
            self.failed_deliveries += 1;
            self.clear_slot(index);
        }
    }

    /// Dispatch a feedback message against its matching entry (spec §4.3
    /// dispatch table). Returns `false` if no matching PENDING entry exists
    /// (stale, duplicate, or spoofed feedback).
    pub fn process(&mut self, feedback: &FeedbackMessage) -> bool {
        if feedback.kind == FeedbackKind::Ready {
            log::debug!(
                "consumer {} signaled READY to producer {}",
                feedback.consumer_id,
                feedback.producer_id
            );
            return true;
        }

        let index = self.index_of(feedback.sequence);
        let matches = self.entries[index]
            .as_ref()
            .is_some_and(|e| e.matches(feedback));
        if !matches {
            return false;
        }

        match &feedback.kind {
            FeedbackKind::Ack => {
                let acked_us = feedback.timestamp_us;
                let sent_us = self.entries[index].as_ref().expect("checked above").sent_timestamp_us;
                self.record_ack_latency(sent_us, acked_us);
                self.successful_acks += 1;
                if let Some(entry) = self.entries[index].as_mut() {
                    entry.state = HandshakeState::Acked;
                    entry.ack_timestamp_us = Some(acked_us);
                }
                self.clear_slot(index);
                true
            }
            FeedbackKind::Nack { .. } => {
                // NACK: retry_count++ on retry, no timeout growth (spec §4.3).
                self.schedule_retry_or_fail(index, None);
                true
            }
            FeedbackKind::Busy => {
                // BUSY: retry_count++ and timeout_ms += retry_backoff_ms on
                // retry (spec §4.3 dispatch table).
                let backoff = self.config.retry_backoff_ms;
                self.schedule_retry_or_fail(index, Some(Box::new(move |timeout_ms| {
                    timeout_ms.saturating_add(backoff)
                })));
                true
            }
            FeedbackKind::Overflow => {
                // OVERFLOW: retry_count++ and timeout_ms *= 2 on retry.
                self.schedule_retry_or_fail(index, Some(Box::new(|timeout_ms| timeout_ms.saturating_mul(2))));
                true
            }
            FeedbackKind::Ready => unreachable!("handled above"),
        }
    }

    /// Shared NACK/BUSY/OVERFLOW handling (spec §4.3 dispatch table): retry
    /// while `zero_loss_mode` and retries remain, applying `grow_timeout` to
    /// `timeout_ms` and resetting `sent_timestamp_us`; otherwise fail the
    /// entry and count it as a failed delivery.
    fn schedule_retry_or_fail(&mut self, index: usize, grow_timeout: Option<Box<dyn Fn(u32) -> u32>>) {
        let should_retry = self.entries[index].as_ref().is_some_and(|e| {
            self.config.zero_loss_mode && e.retry_count < self.config.max_retries
        });
        if should_retry {
            if let Some(entry) = self.entries[index].as_mut() {
                entry.retry_count += 1;
                entry.state = HandshakeState::Retry;
                if let Some(grow) = grow_timeout {
                    entry.timeout_ms = grow(entry.timeout_ms);
                }
                entry.sent_timestamp_us = now_us();
            }
            self.retries += 1;
        } else {
            if let Some(entry) = self.entries[index].as_mut() {
                entry.state = HandshakeState::Nacked;
            }
            self.failed_deliveries += 1;
            self.clear_slot(index);
        }
    }

    /// Sweep PENDING entries whose deadline has elapsed, moving each to
    /// RETRY (if retries remain under `zero_loss_mode`) or to a final
    /// TIMEOUT failure. Returns the number of entries that timed out.
    pub fn process_timeouts(&mut self) -> usize {
        let now = now_us();
        let mut timed_out = 0;
        for index in 0..self.capacity {
            let expired = self.entries[index].as_ref().is_some_and(|e| {
                e.state == HandshakeState::Pending
                    && now.saturating_sub(e.sent_timestamp_us) >= u64::from(e.timeout_ms) * 1000
            });
            if !expired {
                continue;
            }
            self.timeouts += 1;
            timed_out += 1;
            let should_retry = self.entries[index].as_ref().is_some_and(|e| {
                self.config.zero_loss_mode && e.retry_count < self.config.max_retries
            });
            if should_retry {
                if let Some(entry) = self.entries[index].as_mut() {
                    entry.retry_count += 1;
                    entry.timeout_ms = entry.timeout_ms.saturating_mul(2);
                    entry.state = HandshakeState::Retry;
                }
                self.retries += 1;
            } else {
                if let Some(entry) = self.entries[index].as_mut() {
                    entry.state = HandshakeState::TimedOut;
                }
                self.failed_deliveries += 1;
                self.clear_slot(index);
            }
        }
        timed_out
    }

    /// Re-arm up to `max_retries_per_tick` entries in the RETRY state,
    /// invoking `resend` with each entry's original `(producer_id,
    /// consumer_id, payload)` so the caller can push it back onto its lane.
    /// Returns the number of entries re-armed.
    pub fn retry_failed<F>(&mut self, mut resend: F) -> usize
    where
        F: FnMut(u32, u32, &[u8]),
    {
        let mut armed = 0;
        for index in 0..self.capacity {
            if armed >= self.config.max_retries_per_tick {
                break;
            }
            let is_retry = self.entries[index]
                .as_ref()
                .is_some_and(|e| e.state == HandshakeState::Retry);
            if !is_retry {
                continue;
            }
            if let Some(entry) = self.entries[index].as_mut() {
                entry.state = HandshakeState::Pending;
                entry.sent_timestamp_us = now_us();
                resend(entry.producer_id, entry.consumer_id, &entry.payload);
            }
            armed += 1;
        }
        armed
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending_count
    }

    #[must_use]
    pub fn total_messages(&self) -> u64 {
        self.total_messages
    }

    #[must_use]
    pub fn successful_acks(&self) -> u64 {
        self.successful_acks
    }

    #[must_use]
    pub fn failed_deliveries(&self) -> u64 {
        self.failed_deliveries
    }

    #[must_use]
    pub fn timeouts(&self) -> u64 {
        self.timeouts
    }

    #[must_use]
    pub fn retries(&self) -> u64 {
        self.retries
    }

    #[must_use]
    pub fn avg_ack_latency_us(&self) -> f64 {
        self.avg_ack_latency_us
    }

    /// Fraction of sent messages ultimately acknowledged (P6: delivery
    /// ratio converges to 1.0 under `zero_loss_mode` absent permanent
    /// consumer failure).
    #[must_use]
    pub fn delivery_ratio(&self) -> f64 {
        if self.total_messages == 0 {
            1.0
        } else {
            self.successful_acks as f64 / self.total_messages as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with_capacity(capacity: usize) -> ReliabilityTable {
        let mut config = ReliabilityConfig::default();
        config.table_capacity = capacity;
        ReliabilityTable::new(config)
    }

    #[test]
    fn send_assigns_increasing_sequences() {
        let mut table = table_with_capacity(8);
        let a = table.send(1, 2, b"x").unwrap();
        let b = table.send(1, 2, b"y").unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(table.pending_count(), 2);
    }

    // Scenario S3: table saturation rejects new sends.
    #[test]
    fn send_rejected_when_table_full() {
        let mut table = table_with_capacity(2);
        assert!(table.send(1, 2, b"a").is_some());
        assert!(table.send(1, 2, b"b").is_some());
        assert!(table.send(1, 2, b"c").is_none());
        assert!(!table.can_send());
    }

    #[test]
    fn ack_clears_entry_and_frees_capacity() {
        let mut table = table_with_capacity(2);
        let seq = table.send(1, 2, b"a").unwrap();
        assert!(table.process(&FeedbackMessage::make_ack(seq, 1, 2)));
        assert_eq!(table.pending_count(), 0);
        assert_eq!(table.successful_acks(), 1);
        assert!((table.delivery_ratio() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn mismatched_feedback_is_rejected() {
        let mut table = table_with_capacity(4);
        let seq = table.send(1, 2, b"a").unwrap();
        assert!(!table.process(&FeedbackMessage::make_ack(seq, 99, 2)));
        assert_eq!(table.pending_count(), 1);
    }

    // Scenario S4: NACK under zero_loss_mode retries before failing.
    #[test]
    fn nack_retries_until_max_then_fails() {
        let mut table = table_with_capacity(4);
        let seq = table.send(1, 2, b"a").unwrap();
        for _ in 0..3 {
            assert!(table.process(&FeedbackMessage::make_nack(seq, 1, 2, 1, "nope")));
        }
        // Still pending after exhausting retries the first two times it's
        // re-sent, since NACK only increments retry_count; only the 4th
        // NACK crosses max_retries (3) and finally fails the entry.
        assert!(table.process(&FeedbackMessage::make_nack(seq, 1, 2, 1, "nope")));
        assert_eq!(table.failed_deliveries(), 1);
        assert_eq!(table.pending_count(), 0);
    }

    #[test]
    fn busy_extends_timeout_without_failing() {
        let mut table = table_with_capacity(4);
        let seq = table.send(1, 2, b"a").unwrap();
        assert!(table.process(&FeedbackMessage::make_busy(seq, 1, 2)));
        assert_eq!(table.pending_count(), 1);
        assert_eq!(table.failed_deliveries(), 0);
    }

    #[test]
    fn ready_is_accepted_without_matching_entry() {
        let mut table = table_with_capacity(4);
        assert!(table.process(&FeedbackMessage::make_ready(1, 2)));
    }

    #[test]
    fn retry_failed_rearms_and_invokes_resend() {
        let mut table = table_with_capacity(4);
        let seq = table.send(1, 2, b"payload").unwrap();
        table.process(&FeedbackMessage::make_nack(seq, 1, 2, 1, "retry me"));

        let mut resent = Vec::new();
        let armed = table.retry_failed(|producer, consumer, data| {
            resent.push((producer, consumer, data.to_vec()));
        });
        assert_eq!(armed, 1);
        assert_eq!(resent, vec![(1, 2, b"payload".to_vec())]);
        assert_eq!(table.pending_count(), 1);
    }

    #[test]
    fn cancel_clears_entry_and_counts_as_failed() {
        let mut table = table_with_capacity(4);
        let seq = table.send(1, 2, b"a").unwrap();
        table.cancel(seq);
        assert_eq!(table.pending_count(), 0);
        assert_eq!(table.failed_deliveries(), 1);
    }

    #[test]
    fn ack_latency_ewma_tracks_round_trips() {
        let mut table = table_with_capacity(4);
        let seq = table.send(1, 2, b"a").unwrap();
        let sent_us = table.entries[table.index_of(seq)]
            .as_ref()
            .unwrap()
            .sent_timestamp_us;
        let mut fb = FeedbackMessage::make_ack(seq, 1, 2);
        fb.timestamp_us = sent_us + 500;
        table.process(&fb);
        assert!((table.avg_ack_latency_us() - 500.0).abs() < f64::EPSILON);
    }
}
