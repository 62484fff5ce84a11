// SPDX-License-Identifier: Apache-2.0 OR MIT

//! `Bus`: the top-level facade composing the lane, reliability and health
//! overlays into one API (spec §6).

use std::time::Instant;

use parking_lot::Mutex;

use crate::config::BusConfig;
use crate::error::{Error, Result};
use crate::health::{FaultKind, HealthRegistry, RecoveryAction};
use crate::lane::{select_lane, Lane, LaneKind, LaneManager};
use crate::reliability::{FeedbackMessage, ReliabilityTable};
use crate::time::now_us;

/// Invoked after every message is durably handed off to a lane. The default
/// no-op is appropriate for a pure in-process bus; a caller wiring in a
/// write-ahead log or recording overlay can supply its own.
pub trait PersistenceHook: Send + Sync {
    fn on_committed(&self, lane: LaneKind, sequence: Option<u64>, data: &[u8]);
}

/// No-op [`PersistenceHook`].
pub struct NoopPersistence;

impl PersistenceHook for NoopPersistence {
    fn on_committed(&self, _lane: LaneKind, _sequence: Option<u64>, _data: &[u8]) {}
}

/// Consulted before a message is routed to a lane at all, to veto delivery
/// to a consumer the caller independently knows is unavailable (spec §4.5:
/// "let the health overlay gate delivery, not just record it after the
/// fact"). The default always allows delivery.
pub trait FallbackHook: Send + Sync {
    fn should_deliver(&self, consumer_id: u32) -> bool;
}

/// [`FallbackHook`] that never vetoes delivery.
pub struct AlwaysDeliver;

impl FallbackHook for AlwaysDeliver {
    fn should_deliver(&self, _consumer_id: u32) -> bool {
        true
    }
}

/// The message bus: four typed lanes, a reliability handshake table, and a
/// fault/health registry, wired together (spec §6).
pub struct Bus {
    lanes: LaneManager,
    reliability: Mutex<ReliabilityTable>,
    health: Mutex<HealthRegistry>,
    persistence: Box<dyn PersistenceHook>,
    fallback: Box<dyn FallbackHook>,
}

impl Bus {
    /// Build a bus with default configuration (spec §3 defaults table).
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(BusConfig::new())
    }

    /// Build a bus from an explicit configuration, with default hooks.
    #[must_use]
    pub fn with_config(config: BusConfig) -> Self {
        Self {
            lanes: LaneManager::new(config.lane),
            reliability: Mutex::new(ReliabilityTable::new(config.reliability)),
            health: Mutex::new(HealthRegistry::new(config.health)),
            persistence: Box::new(NoopPersistence),
            fallback: Box::new(AlwaysDeliver),
        }
    }

    /// Replace the persistence hook (builder-style, spec §9 escape hatch).
    #[must_use]
    pub fn with_persistence_hook(mut self, hook: Box<dyn PersistenceHook>) -> Self {
        self.persistence = hook;
        self
    }

    /// Replace the fallback/delivery-veto hook.
    #[must_use]
    pub fn with_fallback_hook(mut self, hook: Box<dyn FallbackHook>) -> Self {
        self.fallback = hook;
        self
    }

    fn lane(&self, kind: LaneKind) -> &Lane {
        self.lanes.lane(kind)
    }

    /// Route `data` to its optimal lane via [`select_lane`] and submit it
    /// there, recording the outcome against `producer_id`'s health (spec
    /// §4.2, §4.5).
    pub fn fast_lane_submit(
        &self,
        producer_id: u32,
        data: &[u8],
        priority: u32,
        latency_critical: bool,
    ) -> bool {
        let kind = select_lane(data.len() as u64, priority, latency_critical);
        self.submit_to_kind(producer_id, kind, data, priority)
    }

    /// Drain the optimal lane for `size`/`priority`/`latency_critical`
    /// (mirrors [`select_lane`]'s routing so callers following the same
    /// rule observe a consistent lane).
    pub fn fast_lane_drain(&self, size: u64, priority: u32, latency_critical: bool) -> Option<(Vec<u8>, u32)> {
        let kind = select_lane(size, priority, latency_critical);
        self.lane(kind).drain()
    }

    /// Submit `data` to a specific lane by positional index (spec §6).
    ///
    /// # Errors
    /// Returns [`Error::InvalidLaneIndex`] if `lane_index >= 4`.
    pub fn submit_to(&self, producer_id: u32, lane_index: usize, data: &[u8], priority: u32) -> Result<bool> {
        let lane = self
            .lanes
            .lane_at(lane_index)
            .ok_or(Error::InvalidLaneIndex(lane_index))?;
        Ok(self.submit_via(producer_id, lane, data, priority))
    }

    /// Drain a specific lane by positional index.
    ///
    /// # Errors
    /// Returns [`Error::InvalidLaneIndex`] if `lane_index >= 4`.
    pub fn drain_from(&self, lane_index: usize) -> Result<Option<(Vec<u8>, u32)>> {
        let lane = self
            .lanes
            .lane_at(lane_index)
            .ok_or(Error::InvalidLaneIndex(lane_index))?;
        Ok(lane.drain())
    }

    fn submit_to_kind(&self, producer_id: u32, kind: LaneKind, data: &[u8], priority: u32) -> bool {
        self.submit_via(producer_id, self.lane(kind), data, priority)
    }

    fn submit_via(&self, producer_id: u32, lane: &Lane, data: &[u8], priority: u32) -> bool {
        let t0 = Instant::now();
        let ok = lane.submit(data, priority);
        let elapsed_us = t0.elapsed().as_micros() as u64;

        self.health.lock().update_health(producer_id, ok, elapsed_us);
        if ok {
            self.persistence.on_committed(lane.kind(), None, data);
        } else {
            self.health
                .lock()
                .report(producer_id, FaultKind::Overflow, "lane submit deadline exceeded");
        }
        ok
    }

    /// Send `data` through the reliability overlay from `producer_id` to
    /// `consumer_id`, routing it to its optimal lane and registering a
    /// handshake entry. Returns the sequence number the consumer must echo
    /// back in its [`FeedbackMessage`], or `None` if the reliability table
    /// is saturated or the fallback hook vetoes delivery (spec §4.3, §4.5).
    pub fn send_reliable(
        &self,
        producer_id: u32,
        consumer_id: u32,
        data: &[u8],
        priority: u32,
        latency_critical: bool,
    ) -> Option<u64> {
        if !self.fallback.should_deliver(consumer_id) {
            return None;
        }

        let sequence = self.reliability.lock().send(producer_id, consumer_id, data)?;

        let kind = select_lane(data.len() as u64, priority, latency_critical);
        if !self.submit_to_kind(producer_id, kind, data, priority) {
            self.reliability.lock().cancel(sequence);
            return None;
        }
        self.persistence.on_committed(kind, Some(sequence), data);
        Some(sequence)
    }

    /// Feed a consumer's feedback back through the reliability overlay
    /// (ACK/NACK/BUSY/OVERFLOW/READY, spec §4.3). Updates `consumer_id`'s
    /// health on ACK/NACK.
    pub fn process_feedback(&self, feedback: &FeedbackMessage) -> bool {
        self.reliability.lock().process(feedback)
    }

    /// Run one reliability maintenance tick (spec §6): sweep timed-out
    /// handshake entries, re-arm retries, and resend each retried payload
    /// onto its original lane (picked fresh via `select_lane`, priority 0,
    /// not latency-critical — a retry is already late). Returns whether
    /// anything was re-armed. Callers invoke this periodically, e.g. once
    /// per event-loop turn.
    pub fn acknowledge_process(&self) -> bool {
        let mut reliability = self.reliability.lock();
        reliability.process_timeouts();
        let armed = reliability.retry_failed(|producer_id, _consumer_id, data| {
            let kind = select_lane(data.len() as u64, 0, false);
            self.submit_to_kind(producer_id, kind, data, 0);
        });
        armed > 0
    }

    /// Record an application-level fault against `component_id` and return
    /// the recovery action taken (spec §4.4, §4.5).
    pub fn report_fault(&self, component_id: u32, kind: FaultKind, message: &str) -> RecoveryAction {
        self.health.lock().report(component_id, kind, message)
    }

    /// Record a successful/failed operation outcome for `component_id`
    /// without going through `submit_to`/`send_reliable` (e.g. an
    /// out-of-band consumer-side acknowledgement of processing). Mirrors
    /// `report_fault`'s direct pass-through to the health registry.
    pub fn update_health(&self, component_id: u32, success: bool, response_time_us: u64) {
        self.health.lock().update_health(component_id, success, response_time_us);
    }

    /// Fetch a copy of `component_id`'s health record.
    ///
    /// # Errors
    /// Returns [`Error::UnknownComponent`] if no operation has ever been
    /// recorded for `component_id`.
    pub fn component_health(&self, component_id: u32) -> Result<crate::health::ComponentHealth> {
        self.health
            .lock()
            .component_health(component_id)
            .cloned()
            .ok_or(Error::UnknownComponent(component_id))
    }

    /// Whether `component_id` is currently considered healthy (spec §4.4).
    #[must_use]
    pub fn is_component_healthy(&self, component_id: u32) -> bool {
        self.health.lock().is_component_healthy(component_id)
    }

    /// System-wide health score in `[0.0, 1.0]` (spec §4.4).
    #[must_use]
    pub fn get_system_health(&self) -> f64 {
        self.health.lock().get_system_health()
    }

    /// Aggregate throughput/latency/fault metrics across all four lanes
    /// plus the reliability overlay, as of `now_us()` (spec §6 `get_metrics`).
    #[must_use]
    pub fn get_metrics(&self) -> BusMetrics {
        let lanes: Vec<_> = LaneKind::ALL.iter().map(|k| self.lane(*k).get_metrics()).collect();
        let (pending, total_sent, successful_acks, failed_deliveries, timeouts) = {
            let r = self.reliability.lock();
            (
                r.pending_count(),
                r.total_messages(),
                r.successful_acks(),
                r.failed_deliveries(),
                r.timeouts(),
            )
        };

        BusMetrics {
            timestamp_us: now_us(),
            lanes,
            pending_handshakes: pending,
            total_messages_sent: total_sent,
            successful_acks,
            failed_deliveries,
            timeouts,
            system_health: self.get_system_health(),
        }
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time snapshot across every subsystem, returned by
/// [`Bus::get_metrics`].
#[derive(Debug, Clone)]
pub struct BusMetrics {
    pub timestamp_us: u64,
    pub lanes: Vec<crate::lane::LaneSnapshot>,
    pub pending_handshakes: usize,
    pub total_messages_sent: u64,
    pub successful_acks: u64,
    pub failed_deliveries: u64,
    pub timeouts: u64,
    pub system_health: f64,
}
