// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Crate-wide error type for non-hot-path failures.
//!
//! Hot-path operations (`submit`, `drain`, `send_reliable`, `process_feedback`)
//! never return [`Error`] — they stay boolean/`Option` so nothing unwinds on
//! the fast path. `Error` covers configuration and lookup failures only.

use std::fmt;

/// Errors returned by non-hot-path bus operations.
#[derive(Debug)]
pub enum Error {
    /// A lane index passed to `submit_to`/`drain_from` is out of range.
    InvalidLaneIndex(usize),
    /// A component id referenced by a query has never reported an operation.
    UnknownComponent(u32),
    /// Capacity given to a ring constructor was zero or otherwise invalid.
    InvalidCapacity(usize),
    /// Allocation of a lane's slot buffer failed.
    AllocationFailed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidLaneIndex(i) => write!(f, "lane index {i} out of range"),
            Error::UnknownComponent(id) => write!(f, "unknown component id {id}"),
            Error::InvalidCapacity(c) => write!(f, "invalid capacity {c}"),
            Error::AllocationFailed => write!(f, "lane slot buffer allocation failed"),
        }
    }
}

impl std::error::Error for Error {}

/// Convenience alias for results using the crate's [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;
