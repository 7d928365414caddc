//! Streaming-lockup accrual.
//!
//! The contract locks funds linearly over time: at any settlement point the
//! accrued lockup grows by `rate * elapsed_epochs`. Every mutation of a
//! lockup rate or fixed lockup must be preceded by settling the accrual up to
//! the mutation epoch (settle-then-mutate), otherwise the accrued amount
//! would be computed against the wrong rate.

use crate::entities::{Rail, RailState, UserToken};
use alloy::primitives::U256;

/// Advance a user's accrued lockup to `target_epoch`.
///
/// No-op when `target_epoch` is not past the last settled epoch, which makes
/// replays of the same settlement point idempotent.
pub fn settle_user_lockup(user: &mut UserToken, target_epoch: U256) {
    if target_epoch <= user.lockup_last_settled_at {
        return;
    }
    let elapsed = target_epoch - user.lockup_last_settled_at;
    user.lockup_current = user
        .lockup_current
        .saturating_add(user.lockup_rate.saturating_mul(elapsed));
    user.lockup_last_settled_at = target_epoch;
}

/// A rail's full lockup commitment: `fixed + rate * period`.
pub fn rail_lockup(lockup_fixed: U256, payment_rate: U256, lockup_period: U256) -> U256 {
    lockup_fixed.saturating_add(payment_rate.saturating_mul(lockup_period))
}

/// Epochs of streaming lockup still committed on a rail at `current_epoch`.
///
/// A terminated rail only streams until its end epoch; a live rail's
/// remaining period shrinks by however far settlement lags behind the chain.
/// Zero means the lockup-usage ledgers must not be touched.
pub fn effective_lockup_period(rail: &Rail, current_epoch: U256) -> U256 {
    if rail.state == RailState::Terminated {
        rail.end_epoch.saturating_sub(current_epoch)
    } else {
        rail.lockup_period
            .saturating_sub(current_epoch.saturating_sub(rail.settled_upto))
    }
}
