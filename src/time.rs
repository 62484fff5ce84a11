// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Monotonic microsecond time source.
//!
//! All latency, timeout and EWMA computation in this crate is expressed in
//! microseconds since an arbitrary fixed epoch (`Instant::now()` at first
//! use), never wall-clock time — this keeps the bus immune to clock steps.

use std::sync::OnceLock;
use std::time::Instant;

fn epoch() -> &'static Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now)
}

/// Current monotonic time in microseconds since process-local epoch.
#[inline]
#[must_use]
pub fn now_us() -> u64 {
    epoch().elapsed().as_micros() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_us_is_monotonic() {
        let a = now_us();
        let b = now_us();
        assert!(b >= a);
    }
}
