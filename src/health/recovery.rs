// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Recovery actions and the fault-kind -> action mapping table (spec §4.4).

use super::fault::FaultKind;

/// The action the health registry takes in response to a reported fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecoveryAction {
    /// No action; auto-recovery is disabled.
    None,
    /// Re-attempt the same operation.
    Retry,
    /// Switch to a degraded/alternate code path; always succeeds.
    Fallback,
    /// Reset the component's internal state; always succeeds.
    Reset,
    /// Stop routing work to the component until it heartbeats healthy again.
    Isolate,
    /// Hand off to an operator/external system; always fails automatically.
    Escalate,
}

/// The default recovery action for `kind`, given `component_retry_count`
/// (the component's current [`super::ComponentHealth::retry_count`]) and
/// `max_retry_attempts`. Every kind maps to a fixed action except TIMEOUT,
/// which falls back once retries are exhausted (spec §4.4).
#[must_use]
pub fn recovery_for(kind: FaultKind, component_retry_count: u32, max_retry_attempts: u32) -> RecoveryAction {
    match kind {
        FaultKind::Corruption | FaultKind::Deadlock => RecoveryAction::Reset,
        FaultKind::Timeout => {
            if component_retry_count < max_retry_attempts {
                RecoveryAction::Retry
            } else {
                RecoveryAction::Fallback
            }
        }
        FaultKind::Overflow | FaultKind::Underflow | FaultKind::Gpu => RecoveryAction::Fallback,
        FaultKind::Memory | FaultKind::Network => RecoveryAction::Retry,
        FaultKind::Starvation => RecoveryAction::Escalate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_kinds_map_to_fixed_actions() {
        assert_eq!(recovery_for(FaultKind::Corruption, 0, 3), RecoveryAction::Reset);
        assert_eq!(recovery_for(FaultKind::Deadlock, 0, 3), RecoveryAction::Reset);
        assert_eq!(recovery_for(FaultKind::Overflow, 0, 3), RecoveryAction::Fallback);
        assert_eq!(recovery_for(FaultKind::Underflow, 0, 3), RecoveryAction::Fallback);
        assert_eq!(recovery_for(FaultKind::Gpu, 0, 3), RecoveryAction::Fallback);
        assert_eq!(recovery_for(FaultKind::Memory, 0, 3), RecoveryAction::Retry);
        assert_eq!(recovery_for(FaultKind::Network, 0, 3), RecoveryAction::Retry);
        assert_eq!(recovery_for(FaultKind::Starvation, 0, 3), RecoveryAction::Escalate);
    }

    #[test]
    fn timeout_retries_until_attempts_exhausted_then_falls_back() {
        assert_eq!(recovery_for(FaultKind::Timeout, 0, 3), RecoveryAction::Retry);
        assert_eq!(recovery_for(FaultKind::Timeout, 2, 3), RecoveryAction::Retry);
        assert_eq!(recovery_for(FaultKind::Timeout, 3, 3), RecoveryAction::Fallback);
    }
}
