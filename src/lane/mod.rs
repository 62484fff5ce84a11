// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Lane ring buffers and the lane manager/selector (spec §4.1, §4.2).

mod manager;
mod ring;
mod slot;

pub use manager::{select_lane, LaneManager};
pub use ring::{Lane, LaneKind, LaneSnapshot};
