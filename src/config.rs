// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Bus-wide configuration.
//!
//! Centralizes every tunable named in the lane, reliability and health
//! overlays into one explicit, owned struct (see spec §9: "replace [global
//! state] with an explicit `Bus`-owned configuration struct; pass it where
//! needed"). `BusConfig` is built once at `Bus::new`/`Bus::with_config` and
//! never mutated afterward.

use std::time::Duration;

/// Reliability overlay tunables (spec §4.3).
#[derive(Clone, Copy, Debug)]
pub struct ReliabilityConfig {
    /// Capacity of the in-flight handshake ring.
    pub table_capacity: usize,
    /// Default per-entry timeout before a PENDING entry is considered lost.
    pub default_timeout_ms: u32,
    /// Maximum retry attempts before an entry is finally NACKED/TIMEOUT.
    pub max_retries: u32,
    /// Backoff added to `timeout_ms` on a BUSY retry.
    pub retry_backoff_ms: u32,
    /// Whether NACK/BUSY/OVERFLOW feedback triggers a retry instead of an
    /// immediate failure, while retries remain.
    pub zero_loss_mode: bool,
    /// Maximum entries re-armed per `retry_failed()` call.
    pub max_retries_per_tick: usize,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            table_capacity: 1024,
            default_timeout_ms: 1000,
            max_retries: 3,
            retry_backoff_ms: 100,
            zero_loss_mode: true,
            max_retries_per_tick: 10,
        }
    }
}

/// Fault/health overlay tunables (spec §4.4).
#[derive(Clone, Copy, Debug)]
pub struct HealthConfig {
    /// Capacity of the fault record ring (oldest overwritten).
    pub fault_ring_capacity: usize,
    /// Consecutive failures before a component is marked unhealthy/degraded.
    pub consecutive_failure_threshold: u32,
    /// Maximum retry attempts a TIMEOUT fault may take before falling back.
    pub max_retry_attempts: u32,
    /// Automatically invoke recovery when a fault is reported.
    pub auto_recovery_enabled: bool,
    /// A component is considered stale (forced unhealthy) after this long
    /// without a heartbeat.
    pub heartbeat_timeout: Duration,
    /// Consecutive ESCALATE recovery failures (STARVATION faults, or a
    /// TIMEOUT fault that has exhausted its retries and fallbacks) before
    /// the registry promotes the next escalation to ISOLATE, per the
    /// `HEALTHY ↔ DEGRADED ↔ ISOLATED` state machine (spec §4.5). Not named
    /// explicitly by spec.md §4.4's recovery table, which never emits
    /// ISOLATE on its own; this is the resolution for that gap (see
    /// DESIGN.md).
    pub isolate_after_escalations: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            fault_ring_capacity: 256,
            consecutive_failure_threshold: 5,
            max_retry_attempts: 3,
            auto_recovery_enabled: true,
            heartbeat_timeout: Duration::from_secs(5),
            isolate_after_escalations: 2,
        }
    }
}

/// Lane submit busy-wait tunable (spec §4.1, §9: "parameterize the busy-wait
/// timeout so tests can shrink it").
#[derive(Clone, Copy, Debug)]
pub struct LaneConfig {
    /// Multiplier applied to `latency_target_us` to get the busy-wait
    /// deadline when a lane is momentarily full.
    pub busy_wait_multiplier: f64,
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            busy_wait_multiplier: 2.0,
        }
    }
}

/// Top-level bus configuration, owned exclusively by [`crate::Bus`].
#[derive(Clone, Copy, Debug, Default)]
pub struct BusConfig {
    /// Lane submit/drain tunables.
    pub lane: LaneConfig,
    /// Reliability overlay tunables.
    pub reliability: ReliabilityConfig,
    /// Fault/health overlay tunables.
    pub health: HealthConfig,
}

impl BusConfig {
    /// Configuration matching spec defaults exactly.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style override of the reliability table capacity.
    #[must_use]
    pub fn with_table_capacity(mut self, capacity: usize) -> Self {
        self.reliability.table_capacity = capacity;
        self
    }

    /// Builder-style override of the busy-wait multiplier (tests shrink this
    /// to avoid multi-millisecond spins).
    #[must_use]
    pub fn with_busy_wait_multiplier(mut self, multiplier: f64) -> Self {
        self.lane.busy_wait_multiplier = multiplier;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = BusConfig::default();
        assert_eq!(cfg.reliability.default_timeout_ms, 1000);
        assert_eq!(cfg.reliability.max_retries, 3);
        assert_eq!(cfg.reliability.retry_backoff_ms, 100);
        assert!(cfg.reliability.zero_loss_mode);
        assert_eq!(cfg.health.consecutive_failure_threshold, 5);
    }

    #[test]
    fn builder_overrides_apply() {
        let cfg = BusConfig::new()
            .with_table_capacity(64)
            .with_busy_wait_multiplier(0.01);
        assert_eq!(cfg.reliability.table_capacity, 64);
        assert!((cfg.lane.busy_wait_multiplier - 0.01).abs() < f64::EPSILON);
    }
}
