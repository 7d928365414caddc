//! Rate-change segment history.
//!
//! When a rail's rate changes before the prior segment has been settled, the
//! ended segment is recorded so settlement can later be reconciled against
//! every rate regime it spans. Segments are strictly ordered by start epoch,
//! non-overlapping, and append-only; nothing consumes or prunes them.

use crate::entities::{Rail, RateChange};
use crate::store::Table;
use alloy::primitives::U256;

/// Last recorded segment for a rail, by start epoch. Row keys sort by
/// (rail, start_epoch), so the last matching committed row is the newest.
fn last_segment(table: &Table<(U256, U256), RateChange>, rail_id: U256) -> Option<RateChange> {
    table
        .iter()
        .filter(|((r, _), _)| *r == rail_id)
        .map(|(_, v)| v.clone())
        .last()
}

/// Record a rate change on `rail` at `current_epoch`.
///
/// - Empty queue, old rate zero: the ended segment owed nothing; just snap
///   `settled_upto` forward.
/// - Empty queue, old rate nonzero: the ended segment must be tracked from
///   `settled_upto` to now.
/// - Non-empty queue: extend from the last segment's end, unless that end is
///   already the current epoch (same-epoch double change).
pub fn enqueue_rate_change(
    table: &mut Table<(U256, U256), RateChange>,
    rail: &mut Rail,
    old_rate: U256,
    new_rate: U256,
    current_epoch: U256,
) {
    match last_segment(table, rail.id) {
        None => {
            if old_rate.is_zero() {
                rail.settled_upto = current_epoch;
            } else {
                let segment = RateChange {
                    rail: rail.id,
                    start_epoch: rail.settled_upto,
                    until_epoch: current_epoch,
                    rate: new_rate,
                };
                table.save((rail.id, segment.start_epoch), segment);
            }
        }
        Some(last) => {
            if last.until_epoch != current_epoch {
                let segment = RateChange {
                    rail: rail.id,
                    start_epoch: last.until_epoch,
                    until_epoch: current_epoch,
                    rate: new_rate,
                };
                table.save((rail.id, segment.start_epoch), segment);
            }
        }
    }
}
