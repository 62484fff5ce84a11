// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-component health tracking (spec §3, §4.4).

use crate::time::now_us;

/// Rolling health state for a single bus component (producer, consumer, or
/// lane), identified by an opaque `component_id`.
///
/// `is_healthy`/`is_degraded`/`is_isolated`/`health_score` are stored
/// fields rather than derived accessors (spec §3 lists them as component
/// attributes, not computed properties) and are recomputed by whichever of
/// [`Self::record_success`]/[`Self::record_failure`] last touched the
/// component — the two call paths apply the two distinct formulas spec.md
/// §4.4 gives for them ("Fault reporting" vs. "Health score update on
/// operation"); see DESIGN.md for how the two are reconciled.
#[derive(Debug, Clone)]
pub struct ComponentHealth {
    pub component_id: u32,
    pub ops_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub consecutive_failures: u32,
    /// EWMA (α = 0.1) of successful operations' response time, microseconds.
    pub avg_response_time_us: f64,
    pub max_response_time_us: u64,
    pub last_heartbeat_us: u64,
    pub is_healthy: bool,
    pub is_degraded: bool,
    pub is_isolated: bool,
    pub health_score: f64,
    /// Recovery attempts made for this component's TIMEOUT faults since the
    /// last RESET (feeds `recovery_for`'s `retry_count` input, spec §4.4;
    /// not a spec.md §3 field — bookkeeping private to the recovery policy).
    pub(super) retry_attempts: u32,
    /// Consecutive ESCALATE recovery failures since the last RESET.
    /// Crossing [`super::registry::HealthRegistry`]'s isolate-after-escalation
    /// threshold promotes the next escalation to ISOLATE.
    pub(super) escalation_failures: u32,
}

impl ComponentHealth {
    pub(super) fn new(component_id: u32) -> Self {
        Self {
            component_id,
            ops_count: 0,
            success_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
            avg_response_time_us: 0.0,
            max_response_time_us: 0,
            last_heartbeat_us: now_us(),
            is_healthy: true,
            is_degraded: false,
            is_isolated: false,
            health_score: 1.0,
            retry_attempts: 0,
            escalation_failures: 0,
        }
    }

    fn recompute_health_score(&mut self) {
        self.health_score = if self.ops_count == 0 {
            1.0
        } else {
            (self.success_count as f64 / self.ops_count as f64).clamp(0.0, 1.0)
        };
    }

    /// Applied on a successful operation outcome reported through
    /// `Bus::update_health`/a successful lane submit (spec §4.4
    /// "Health score update on operation").
    pub(super) fn record_success(&mut self, response_time_us: u64) {
        self.ops_count += 1;
        self.success_count += 1;
        self.consecutive_failures = 0;
        let sample = response_time_us as f64;
        self.avg_response_time_us = if self.success_count == 1 {
            sample
        } else {
            0.1 * sample + 0.9 * self.avg_response_time_us
        };
        self.max_response_time_us = self.max_response_time_us.max(response_time_us);
        self.last_heartbeat_us = now_us();
        self.recompute_health_score();

        if !self.is_isolated {
            self.is_healthy = self.health_score > 0.95 && self.consecutive_failures < 3;
            self.is_degraded = self.health_score > 0.7 && self.health_score <= 0.95;
        }
    }

    /// Applied on a reported fault (spec §4.4 "Fault reporting": "update
    /// component: consecutive_failures++, failure_count++, recompute
    /// health_score = 1 − failures/ops; if consecutive_failures ≥
    /// `threshold` set is_healthy=false, is_degraded=true").
    pub(super) fn record_failure(&mut self, consecutive_failure_threshold: u32) {
        self.ops_count += 1;
        self.failure_count += 1;
        self.consecutive_failures += 1;
        self.last_heartbeat_us = now_us();
        self.recompute_health_score();

        if !self.is_isolated && self.consecutive_failures >= consecutive_failure_threshold {
            self.is_healthy = false;
            self.is_degraded = true;
        }
    }

    pub(super) fn heartbeat(&mut self) {
        self.last_heartbeat_us = now_us();
    }

    /// Clears the failure streak and recovery bookkeeping, restoring a
    /// healthy, non-degraded, non-isolated state (RESET recovery action,
    /// spec §4.4 "Executing recovery").
    pub(super) fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.retry_attempts = 0;
        self.escalation_failures = 0;
        self.is_healthy = true;
        self.is_degraded = false;
        self.is_isolated = false;
    }

    /// ISOLATE recovery action: stop considering the component healthy
    /// until an explicit RESET (spec §4.4, §4.5 health state machine
    /// `HEALTHY ↔ DEGRADED ↔ ISOLATED`).
    pub(super) fn isolate(&mut self) {
        self.is_isolated = true;
        self.is_healthy = false;
        self.is_degraded = true;
    }
}
