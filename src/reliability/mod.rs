// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The ACK/NACK/BUSY/OVERFLOW/READY reliability overlay (spec §4.3).

mod messages;
mod table;

pub use messages::{FeedbackKind, FeedbackMessage, HandshakeEntry, HandshakeState};
pub use table::ReliabilityTable;
