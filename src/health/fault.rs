// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Fault kinds, their severity, and the fixed-capacity fault record those
//! faults are logged into (spec §3, §4.4).

use crate::time::now_us;

/// What kind of failure a component reported (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// Data failed an integrity check (hash/CRC mismatch).
    Corruption,
    /// An operation exceeded its deadline.
    Timeout,
    /// A bounded buffer was asked to hold more than it could.
    Overflow,
    /// A consumer drained from an unexpectedly empty source.
    Underflow,
    /// Allocation failure or exhaustion.
    Memory,
    /// A network/transport-level failure.
    Network,
    /// A GPU/accelerator-side failure.
    Gpu,
    /// Two or more components appear mutually blocked.
    Deadlock,
    /// A component made no forward progress despite being scheduled.
    Starvation,
}

/// Severity derived from [`FaultKind`] (spec §4.4: "severity is a pure
/// function of the fault kind, not an independent field the caller sets").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Info,
    Warn,
    Error,
    Critical,
}

use super::recovery::RecoveryAction;

impl FaultKind {
    /// The severity this fault kind is always reported at.
    #[must_use]
    pub fn severity(self) -> Severity {
        match self {
            FaultKind::Corruption | FaultKind::Deadlock => Severity::Critical,
            FaultKind::Timeout | FaultKind::Overflow | FaultKind::Gpu => Severity::Error,
            FaultKind::Underflow | FaultKind::Memory => Severity::Warn,
            FaultKind::Network | FaultKind::Starvation => Severity::Info,
        }
    }
}

/// One entry in the health registry's fault ring.
#[derive(Debug, Clone)]
pub struct FaultRecord {
    pub fault_id: u64,
    pub component_id: u32,
    pub kind: FaultKind,
    pub severity: Severity,
    pub message: String,
    pub timestamp_us: u64,
    pub action_taken: RecoveryAction,
    pub recovery_successful: bool,
    pub recovery_time_us: u64,
}

impl FaultRecord {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        fault_id: u64,
        component_id: u32,
        kind: FaultKind,
        message: impl Into<String>,
        action_taken: RecoveryAction,
        recovery_successful: bool,
        recovery_time_us: u64,
    ) -> Self {
        Self {
            fault_id,
            component_id,
            kind,
            severity: kind.severity(),
            message: message.into(),
            timestamp_us: now_us(),
            action_taken,
            recovery_successful,
            recovery_time_us,
        }
    }
}
