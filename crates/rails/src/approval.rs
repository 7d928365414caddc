//! Operator allowance usage ledgers.
//!
//! Two ledgers move in lockstep whenever a rail's committed rate or lockup
//! changes: the per-(client, operator, token) [OperatorApproval] and the
//! per-(operator, token) [OperatorToken] aggregate. Usage adjustments are
//! `usage - old + new` with the result clamped to zero; replay skew between
//! the contract's arithmetic and ours must never underflow the ledger.

use crate::entities::{OperatorApproval, OperatorToken, Rail};
use crate::lockup;
use alloy::primitives::U256;

/// `current - old + new`, clamped to zero.
pub fn adjust_usage(current: U256, old: U256, new: U256) -> U256 {
    current.saturating_add(new).saturating_sub(old)
}

/// Move both rate-usage ledgers from `old_rate` to `new_rate`.
pub fn apply_rate_usage(
    approval: &mut OperatorApproval,
    operator_token: &mut OperatorToken,
    old_rate: U256,
    new_rate: U256,
) {
    approval.rate_usage = adjust_usage(approval.rate_usage, old_rate, new_rate);
    operator_token.rate_usage = adjust_usage(operator_token.rate_usage, old_rate, new_rate);
}

/// Move both lockup-usage ledgers from `old_lockup` to `new_lockup`.
pub fn apply_lockup_usage(
    approval: &mut OperatorApproval,
    operator_token: &mut OperatorToken,
    old_lockup: U256,
    new_lockup: U256,
) {
    approval.lockup_usage = adjust_usage(approval.lockup_usage, old_lockup, new_lockup);
    operator_token.lockup_usage = adjust_usage(operator_token.lockup_usage, old_lockup, new_lockup);
}

/// Release a finalized rail's full remaining commitment from both ledgers:
/// the lockup amount `fixed + period * rate` and the streaming rate itself.
pub fn release_rail_commitment(
    approval: &mut OperatorApproval,
    operator_token: &mut OperatorToken,
    rail: &Rail,
) {
    let remaining = lockup::rail_lockup(rail.lockup_fixed, rail.payment_rate, rail.lockup_period);
    approval.lockup_usage = approval.lockup_usage.saturating_sub(remaining);
    operator_token.lockup_usage = operator_token.lockup_usage.saturating_sub(remaining);
    approval.rate_usage = approval.rate_usage.saturating_sub(rail.payment_rate);
    operator_token.rate_usage = operator_token.rate_usage.saturating_sub(rail.payment_rate);
}

/// Draw a one-time payment down from both ledgers. One-time payments spend
/// fixed lockup, so the full amount (principal plus commission plus fee)
/// comes off `lockup_allowance` and `lockup_usage` alike.
pub fn draw_down_one_time_payment(
    approval: &mut OperatorApproval,
    operator_token: &mut OperatorToken,
    total: U256,
) {
    approval.lockup_allowance = approval.lockup_allowance.saturating_sub(total);
    approval.lockup_usage = approval.lockup_usage.saturating_sub(total);
    operator_token.lockup_allowance = operator_token.lockup_allowance.saturating_sub(total);
    operator_token.lockup_usage = operator_token.lockup_usage.saturating_sub(total);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::RailState;
    use alloy::primitives::Address;

    fn pair() -> (OperatorApproval, OperatorToken) {
        let client = Address::repeat_byte(1);
        let operator = Address::repeat_byte(2);
        let token = Address::repeat_byte(3);
        (
            OperatorApproval::new(client, operator, token),
            OperatorToken::new(operator, token),
        )
    }

    #[test]
    fn adjust_usage_applies_delta() {
        assert_eq!(
            adjust_usage(U256::from(100u64), U256::from(30u64), U256::from(50u64)),
            U256::from(120u64)
        );
    }

    #[test]
    fn adjust_usage_clamps_to_zero() {
        assert_eq!(
            adjust_usage(U256::from(10u64), U256::from(50u64), U256::from(5u64)),
            U256::ZERO
        );
    }

    #[test]
    fn rate_usage_moves_both_ledgers() {
        let (mut approval, mut operator_token) = pair();
        apply_rate_usage(
            &mut approval,
            &mut operator_token,
            U256::ZERO,
            U256::from(7u64),
        );
        assert_eq!(approval.rate_usage, U256::from(7u64));
        assert_eq!(operator_token.rate_usage, U256::from(7u64));
        apply_rate_usage(
            &mut approval,
            &mut operator_token,
            U256::from(7u64),
            U256::from(3u64),
        );
        assert_eq!(approval.rate_usage, U256::from(3u64));
        assert_eq!(operator_token.rate_usage, U256::from(3u64));
    }

    #[test]
    fn release_clears_commitment() {
        let (mut approval, mut operator_token) = pair();
        approval.rate_usage = U256::from(10u64);
        approval.lockup_usage = U256::from(150u64);
        operator_token.rate_usage = U256::from(10u64);
        operator_token.lockup_usage = U256::from(150u64);
        let rail = Rail {
            id: U256::from(1u64),
            payer: approval.client,
            payee: Address::repeat_byte(9),
            operator: approval.operator,
            token: approval.token,
            arbiter: Address::ZERO,
            service_fee_recipient: Address::ZERO,
            commission_rate_bps: U256::ZERO,
            payment_rate: U256::from(10u64),
            lockup_fixed: U256::from(50u64),
            lockup_period: U256::from(10u64),
            settled_upto: U256::ZERO,
            state: RailState::Terminated,
            end_epoch: U256::ZERO,
            total_settled_amount: U256::ZERO,
            total_net_payee_amount: U256::ZERO,
            total_commission: U256::ZERO,
            total_settlements: 0,
            total_rate_changes: 0,
            created_at: U256::ZERO,
        };
        release_rail_commitment(&mut approval, &mut operator_token, &rail);
        assert_eq!(approval.rate_usage, U256::ZERO);
        assert_eq!(approval.lockup_usage, U256::ZERO);
        assert_eq!(operator_token.rate_usage, U256::ZERO);
        assert_eq!(operator_token.lockup_usage, U256::ZERO);
    }

    #[test]
    fn one_time_payment_draws_allowance_and_usage() {
        let (mut approval, mut operator_token) = pair();
        approval.lockup_allowance = U256::from(100u64);
        approval.lockup_usage = U256::from(80u64);
        operator_token.lockup_allowance = U256::from(100u64);
        operator_token.lockup_usage = U256::from(80u64);
        draw_down_one_time_payment(&mut approval, &mut operator_token, U256::from(30u64));
        assert_eq!(approval.lockup_allowance, U256::from(70u64));
        assert_eq!(approval.lockup_usage, U256::from(50u64));
        assert_eq!(operator_token.lockup_allowance, U256::from(70u64));
        assert_eq!(operator_token.lockup_usage, U256::from(50u64));
        // Over-draw clamps, never underflows.
        draw_down_one_time_payment(&mut approval, &mut operator_token, U256::from(500u64));
        assert_eq!(approval.lockup_usage, U256::ZERO);
        assert_eq!(operator_token.lockup_allowance, U256::ZERO);
    }
}
