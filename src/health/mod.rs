// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Fault records, component health, and recovery actions (spec §4.4).

mod component;
mod fault;
mod recovery;
mod registry;

pub use component::ComponentHealth;
pub use fault::{FaultKind, FaultRecord, Severity};
pub use recovery::{recovery_for, RecoveryAction};
pub use registry::HealthRegistry;
