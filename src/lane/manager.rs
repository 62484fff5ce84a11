// SPDX-License-Identifier: Apache-2.0 OR MIT

//! `LaneManager`: owns the four typed lanes and the optimal-lane selector.

use std::time::Instant;

use super::ring::{Lane, LaneKind};
use crate::config::LaneConfig;

/// Pick the lane a message of `size` bytes should be routed to, given the
/// caller's `priority` and `latency_critical` flag (spec §4.2, evaluated in
/// this exact order).
#[must_use]
pub fn select_lane(size: u64, priority: u32, latency_critical: bool) -> LaneKind {
    if priority >= 3 {
        LaneKind::Priority
    } else if latency_critical && size <= 256 {
        LaneKind::Express
    } else if size >= 4096 {
        LaneKind::Bulk
    } else {
        LaneKind::Streaming
    }
}

/// Owns the four typed lanes and aggregates system-wide throughput.
pub struct LaneManager {
    lanes: [Lane; 4],
    prev_sample: (Instant, u64),
}

impl LaneManager {
    /// Build the four lanes with the defaults from spec §3.
    #[must_use]
    pub fn new(config: LaneConfig) -> Self {
        let mut kinds = LaneKind::ALL.into_iter();
        let lanes = [
            Lane::new(kinds.next().expect("4 kinds"), config.busy_wait_multiplier),
            Lane::new(kinds.next().expect("4 kinds"), config.busy_wait_multiplier),
            Lane::new(kinds.next().expect("4 kinds"), config.busy_wait_multiplier),
            Lane::new(kinds.next().expect("4 kinds"), config.busy_wait_multiplier),
        ];
        Self {
            lanes,
            prev_sample: (Instant::now(), 0),
        }
    }

    fn index_of(kind: LaneKind) -> usize {
        LaneKind::ALL
            .iter()
            .position(|k| *k == kind)
            .expect("LaneKind::ALL covers every variant")
    }

    /// Borrow the lane of the given kind.
    #[must_use]
    pub fn lane(&self, kind: LaneKind) -> &Lane {
        &self.lanes[Self::index_of(kind)]
    }

    /// Borrow a lane by positional index (spec §6 `submit_to`/`drain_from`).
    #[must_use]
    pub fn lane_at(&self, index: usize) -> Option<&Lane> {
        self.lanes.get(index)
    }

    /// Number of lanes (always 4).
    #[must_use]
    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Route `data` to its optimal lane (spec §4.2) and submit it there.
    pub fn submit_optimal(&self, data: &[u8], priority: u32, latency_critical: bool) -> bool {
        let kind = select_lane(data.len() as u64, priority, latency_critical);
        self.lane(kind).submit(data, priority)
    }

    /// Aggregate system throughput in MB/s across all lanes since the last
    /// call (spec §4.2).
    pub fn system_throughput_mb_s(&mut self) -> f64 {
        let total_bytes: u64 = self
            .lanes
            .iter()
            .map(|l| l.get_metrics().total_bytes)
            .sum();
        let (prev_time, prev_bytes) = self.prev_sample;
        let elapsed = prev_time.elapsed().as_secs_f64().max(f64::EPSILON);
        let mb_s = (total_bytes.saturating_sub(prev_bytes)) as f64 / (1024.0 * 1024.0) / elapsed;
        self.prev_sample = (Instant::now(), total_bytes);
        mb_s
    }
}
