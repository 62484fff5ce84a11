// SPDX-License-Identifier: Apache-2.0 OR MIT

//! `HealthRegistry`: fault ingestion, recovery dispatch, and system-wide
//! health aggregation (spec §4.4, §4.5, scenarios S5/S6, properties P7/P8).

use std::collections::HashMap;
use std::time::Instant;

use crate::config::HealthConfig;
use crate::time::now_us;

use super::component::ComponentHealth;
use super::fault::{FaultKind, FaultRecord};
use super::recovery::{recovery_for, RecoveryAction};

/// Longest description retained in a [`FaultRecord`] (spec §3: "128-byte
/// description").
const MAX_DESCRIPTION_BYTES: usize = 128;

fn truncate_description(message: &str) -> String {
    if message.len() <= MAX_DESCRIPTION_BYTES {
        return message.to_string();
    }
    let mut end = MAX_DESCRIPTION_BYTES;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}

/// Tracks a fixed-capacity ring of recent faults plus per-component health,
/// and decides what recovery action a fault warrants and executes it.
pub struct HealthRegistry {
    faults: Vec<Option<FaultRecord>>,
    fault_capacity: usize,
    next_fault_slot: usize,
    next_fault_id: u64,
    total_faults: u64,
    active_faults: u64,
    recovered_faults: u64,
    unrecoverable_faults: u64,

    components: HashMap<u32, ComponentHealth>,
    config: HealthConfig,
}

impl HealthRegistry {
    #[must_use]
    pub fn new(config: HealthConfig) -> Self {
        let capacity = config.fault_ring_capacity.max(1);
        Self {
            faults: (0..capacity).map(|_| None).collect(),
            fault_capacity: capacity,
            next_fault_slot: 0,
            next_fault_id: 0,
            total_faults: 0,
            active_faults: 0,
            recovered_faults: 0,
            unrecoverable_faults: 0,
            components: HashMap::new(),
            config,
        }
    }

    fn component_mut(&mut self, component_id: u32) -> &mut ComponentHealth {
        self.components
            .entry(component_id)
            .or_insert_with(|| ComponentHealth::new(component_id))
    }

    /// Execute `action` against `component_id`, returning the action
    /// actually recorded and whether recovery succeeded (spec §4.4
    /// "Executing recovery"). May upgrade an ESCALATE to ISOLATE once the
    /// component has escalated `config.isolate_after_escalations` times in
    /// a row without a RESET.
    fn execute_recovery(&mut self, component_id: u32, action: RecoveryAction) -> (RecoveryAction, bool) {
        let max_retry_attempts = self.config.max_retry_attempts;
        let isolate_after = self.config.isolate_after_escalations;
        let component = self.component_mut(component_id);

        match action {
            RecoveryAction::None => (RecoveryAction::None, false),
            RecoveryAction::Retry => {
                let ok = component.retry_attempts < max_retry_attempts;
                component.retry_attempts += 1;
                (RecoveryAction::Retry, ok)
            }
            RecoveryAction::Fallback => (RecoveryAction::Fallback, true),
            RecoveryAction::Reset => {
                component.reset();
                (RecoveryAction::Reset, true)
            }
            RecoveryAction::Isolate => {
                component.isolate();
                (RecoveryAction::Isolate, true)
            }
            RecoveryAction::Escalate => {
                component.escalation_failures += 1;
                if component.escalation_failures >= isolate_after {
                    component.isolate();
                    (RecoveryAction::Isolate, true)
                } else {
                    (RecoveryAction::Escalate, false)
                }
            }
        }
    }

    /// Report a fault from `component_id`, logging it into the fault ring
    /// (oldest entry silently overwritten once full, spec §4.4), updating
    /// that component's consecutive-failure count, and — if
    /// `auto_recovery_enabled` — immediately invoking recovery. Returns the
    /// action taken (spec §4.4 "Fault reporting").
    pub fn report(&mut self, component_id: u32, kind: FaultKind, message: impl Into<String>) -> RecoveryAction {
        let fault_id = self.next_fault_id;
        self.next_fault_id += 1;
        self.total_faults += 1;
        self.active_faults += 1;
        let description = truncate_description(&message.into());

        self.component_mut(component_id)
            .record_failure(self.config.consecutive_failure_threshold);

        if !self.config.auto_recovery_enabled {
            log::warn!("fault {kind:?} reported by component {component_id}: {description} (auto-recovery disabled)");
            self.record_fault(fault_id, component_id, kind, description, RecoveryAction::None, false, 0);
            return RecoveryAction::None;
        }

        let start = Instant::now();
        let retry_count = self.components.get(&component_id).map_or(0, |c| c.retry_attempts);
        let proposed = recovery_for(kind, retry_count, self.config.max_retry_attempts);
        let (action, recovered) = self.execute_recovery(component_id, proposed);
        let recovery_time_us = start.elapsed().as_micros() as u64;

        if recovered {
            self.recovered_faults += 1;
            self.active_faults = self.active_faults.saturating_sub(1);
        } else {
            self.unrecoverable_faults += 1;
        }

        log::warn!(
            "fault {kind:?} reported by component {component_id}: {description} (action={action:?}, recovered={recovered}, took={recovery_time_us}us)"
        );
        self.record_fault(fault_id, component_id, kind, description, action, recovered, recovery_time_us);
        action
    }

    #[allow(clippy::too_many_arguments)]
    fn record_fault(
        &mut self,
        fault_id: u64,
        component_id: u32,
        kind: FaultKind,
        description: String,
        action: RecoveryAction,
        recovered: bool,
        recovery_time_us: u64,
    ) {
        let record = FaultRecord::new(fault_id, component_id, kind, description, action, recovered, recovery_time_us);
        self.faults[self.next_fault_slot] = Some(record);
        self.next_fault_slot = (self.next_fault_slot + 1) % self.fault_capacity;
    }

    /// Record the outcome of an operation for `component_id` (spec §4.5:
    /// the bus calls this after every lane submit/reliability handshake).
    pub fn update_health(&mut self, component_id: u32, success: bool, response_time_us: u64) {
        let component = self.component_mut(component_id);
        if success {
            component.record_success(response_time_us);
        } else {
            component.record_failure(self.config.consecutive_failure_threshold);
        }
    }

    /// Refresh `component_id`'s liveness heartbeat without recording an
    /// operation outcome.
    pub fn heartbeat(&mut self, component_id: u32) {
        self.component_mut(component_id).heartbeat();
    }

    /// Whether `component_id` is healthy: not isolated, under the
    /// consecutive-failure threshold, and has heartbeated within
    /// `heartbeat_timeout` (spec §4.4 "Liveness"). An unknown component is
    /// considered healthy (no evidence otherwise).
    #[must_use]
    pub fn is_component_healthy(&self, component_id: u32) -> bool {
        let Some(component) = self.components.get(&component_id) else {
            return true;
        };
        if !component.is_healthy {
            return false;
        }
        let stale = now_us().saturating_sub(component.last_heartbeat_us)
            >= self.config.heartbeat_timeout.as_micros() as u64;
        !stale
    }

    /// Borrow a component's health record, if any operation has been
    /// recorded for it.
    #[must_use]
    pub fn component_health(&self, component_id: u32) -> Option<&ComponentHealth> {
        self.components.get(&component_id)
    }

    /// System-wide health score: `0.4 * mean(health_score) + 0.4 *
    /// fraction_healthy + 0.2 * (recovered / total_faults)` (spec §4.4).
    /// With no components registered yet, defined as `1.0`.
    #[must_use]
    pub fn get_system_health(&self) -> f64 {
        if self.components.is_empty() {
            return 1.0;
        }
        let n = self.components.len() as f64;
        let mean_score: f64 = self.components.values().map(|c| c.health_score).sum::<f64>() / n;
        let fraction_healthy = self.components.values().filter(|c| c.is_healthy).count() as f64 / n;
        let recovery_ratio = if self.total_faults == 0 {
            1.0
        } else {
            self.recovered_faults as f64 / self.total_faults as f64
        };
        (0.4 * mean_score + 0.4 * fraction_healthy + 0.2 * recovery_ratio).clamp(0.0, 1.0)
    }

    #[must_use]
    pub fn total_faults(&self) -> u64 {
        self.total_faults
    }

    #[must_use]
    pub fn active_faults(&self) -> u64 {
        self.active_faults
    }

    #[must_use]
    pub fn recovered_faults(&self) -> u64 {
        self.recovered_faults
    }

    #[must_use]
    pub fn unrecoverable_faults(&self) -> u64 {
        self.unrecoverable_faults
    }

    /// Most recent fault records still held in the ring, oldest first.
    #[must_use]
    pub fn recent_faults(&self) -> Vec<&FaultRecord> {
        let mut out: Vec<&FaultRecord> = self.faults.iter().flatten().collect();
        out.sort_by_key(|f| f.fault_id);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_capacity(capacity: usize) -> HealthRegistry {
        let mut config = HealthConfig::default();
        config.fault_ring_capacity = capacity;
        HealthRegistry::new(config)
    }

    #[test]
    fn unknown_component_reports_healthy() {
        let registry = registry_with_capacity(8);
        assert!(registry.is_component_healthy(42));
    }

    #[test]
    fn report_records_fault_and_degrades_component() {
        let mut registry = registry_with_capacity(8);
        let action = registry.report(1, FaultKind::Timeout, "slow consumer");
        assert_eq!(action, RecoveryAction::Retry);
        assert_eq!(registry.total_faults(), 1);
        assert_eq!(registry.component_health(1).unwrap().consecutive_failures, 1);
    }

    // Scenario S5: a CORRUPTION fault resets the component, and RESET
    // always succeeds (spec §4.4 "Executing recovery").
    #[test]
    fn corruption_fault_resets_and_recovers() {
        let mut registry = registry_with_capacity(8);
        let action = registry.report(7, FaultKind::Corruption, "bad crc");
        assert_eq!(action, RecoveryAction::Reset);
        assert_eq!(registry.recovered_faults(), 1);
        assert!(registry.is_component_healthy(7));
        let record = &registry.recent_faults()[0];
        assert_eq!(record.severity, crate::health::Severity::Critical);
        assert!(record.recovery_successful);
    }

    // Repeated TIMEOUT faults retry until `max_retry_attempts`, then fall
    // back to FALLBACK, which always succeeds.
    #[test]
    fn repeated_timeout_faults_exhaust_retries_then_fall_back() {
        let mut registry = registry_with_capacity(8);
        for _ in 0..3 {
            let action = registry.report(1, FaultKind::Timeout, "slow link");
            assert_eq!(action, RecoveryAction::Retry);
        }
        let action = registry.report(1, FaultKind::Timeout, "slow link");
        assert_eq!(action, RecoveryAction::Fallback);
    }

    // STARVATION always escalates; repeated escalation failures eventually
    // isolate the component (resolution for the spec's otherwise
    // unreachable ISOLATE action — see DESIGN.md).
    #[test]
    fn repeated_starvation_escalations_isolate_component() {
        let mut registry = registry_with_capacity(8);
        let first = registry.report(1, FaultKind::Starvation, "no progress");
        assert_eq!(first, RecoveryAction::Escalate);
        assert!(registry.is_component_healthy(1));

        let second = registry.report(1, FaultKind::Starvation, "no progress");
        assert_eq!(second, RecoveryAction::Isolate);
        assert!(!registry.is_component_healthy(1));
    }

    // Scenario S6: fault ring overwrites the oldest entry once full.
    #[test]
    fn fault_ring_overwrites_oldest_entry() {
        let mut registry = registry_with_capacity(2);
        registry.report(1, FaultKind::Memory, "first");
        registry.report(1, FaultKind::Memory, "second");
        registry.report(1, FaultKind::Memory, "third");
        let recent = registry.recent_faults();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "second");
        assert_eq!(recent[1].message, "third");
    }

    #[test]
    fn auto_recovery_disabled_returns_none() {
        let mut config = HealthConfig::default();
        config.auto_recovery_enabled = false;
        let mut registry = HealthRegistry::new(config);
        let action = registry.report(1, FaultKind::Memory, "oom");
        assert_eq!(action, RecoveryAction::None);
        assert!(registry.is_component_healthy(1));
    }

    #[test]
    fn system_health_reflects_component_and_recovery_mix() {
        let mut registry = registry_with_capacity(8);
        registry.update_health(1, true, 100);
        registry.update_health(2, true, 100);
        assert!((registry.get_system_health() - 1.0).abs() < f64::EPSILON);
        registry.report(2, FaultKind::Memory, "slow");
        assert!(registry.get_system_health() < 1.0);
    }

    #[test]
    fn no_components_yields_perfect_health() {
        let registry = registry_with_capacity(8);
        assert!((registry.get_system_health() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn long_description_is_truncated_to_128_bytes() {
        let mut registry = registry_with_capacity(4);
        let long_message = "x".repeat(500);
        registry.report(1, FaultKind::Memory, long_message);
        let record = &registry.recent_faults()[0];
        assert_eq!(record.message.len(), MAX_DESCRIPTION_BYTES);
    }
}
