//! Rail lifecycle handlers.
//!
//! A rail starts ZERORATE, flips to ACTIVE when its rate first becomes
//! nonzero (and back when it returns to zero), and ends TERMINATED, then
//! optionally FINALIZED. Terminal states are never left. Handlers follow
//! the skip-and-log policy: a missing rail, approval, or balance row means
//! the event is dropped without mutating anything.

use crate::approval;
use crate::dispatcher::EventContext;
use crate::entities::{
    Account, OneTimePayment, Operator, OperatorToken, Rail, RailState, Settlement, Token,
    UserToken,
};
use crate::lockup;
use crate::metrics::Applied;
use crate::queue;
use crate::store::Ledger;
use alloy::primitives::{Address, U256};

#[allow(clippy::too_many_arguments)]
pub fn handle_rail_created(
    ledger: &mut Ledger,
    ctx: &EventContext,
    rail_id: U256,
    payer: Address,
    payee: Address,
    token: Address,
    operator: Address,
    validator: Address,
    service_fee_recipient: Address,
    commission_rate_bps: U256,
) -> Option<Applied> {
    if ledger.rails.contains(&rail_id) {
        tracing::warn!(rail = %rail_id, "RailCreated for existing rail, skipping");
        return None;
    }

    let (token_row, new_token) = ledger
        .tokens
        .load_or_create(&token, || Token::new(token, ctx.metadata()));
    ledger.tokens.save(token, token_row);

    let mut new_accounts = 0;
    let (mut payer_account, payer_new) =
        ledger.accounts.load_or_create(&payer, || Account::new(payer));
    new_accounts += u64::from(payer_new);
    payer_account.total_rails += 1;
    ledger.accounts.save(payer, payer_account);
    let (mut payee_account, payee_new) =
        ledger.accounts.load_or_create(&payee, || Account::new(payee));
    new_accounts += u64::from(payee_new);
    payee_account.total_rails += 1;
    ledger.accounts.save(payee, payee_account);

    let (mut operator_row, new_operator) = ledger
        .operators
        .load_or_create(&operator, || Operator::new(operator));
    operator_row.total_rails += 1;
    ledger.operators.save(operator, operator_row);

    let rail = Rail {
        id: rail_id,
        payer,
        payee,
        operator,
        token,
        arbiter: validator,
        service_fee_recipient,
        commission_rate_bps,
        payment_rate: U256::ZERO,
        lockup_fixed: U256::ZERO,
        lockup_period: U256::ZERO,
        settled_upto: ctx.epoch(),
        state: RailState::ZeroRate,
        end_epoch: U256::ZERO,
        total_settled_amount: U256::ZERO,
        total_net_payee_amount: U256::ZERO,
        total_commission: U256::ZERO,
        total_settlements: 0,
        total_rate_changes: 0,
        created_at: ctx.epoch(),
    };
    ledger.rails.save(rail_id, rail);
    Some(Applied::RailCreated {
        rail_id,
        token,
        operator,
        payer,
        payee,
        new_accounts,
        new_operator,
        new_token,
    })
}

pub fn handle_rail_rate_modified(
    ledger: &mut Ledger,
    ctx: &EventContext,
    rail_id: U256,
    old_rate: U256,
    new_rate: U256,
) -> Option<Applied> {
    let Some(mut rail) = ledger.rails.load(&rail_id) else {
        tracing::warn!(rail = %rail_id, "RailRateModified for unknown rail, skipping");
        return None;
    };
    if rail.state == RailState::Finalized {
        tracing::warn!(rail = %rail_id, "RailRateModified on finalized rail, skipping");
        return None;
    }
    let key = (rail.payer, rail.operator, rail.token);
    let Some(mut approval_row) = ledger.operator_approvals.load(&key) else {
        tracing::warn!(rail = %rail_id, operator = %rail.operator, "RailRateModified with no operator approval, skipping");
        return None;
    };
    let (mut operator_token, _) = ledger
        .operator_tokens
        .load_or_create(&(rail.operator, rail.token), || {
            OperatorToken::new(rail.operator, rail.token)
        });

    let mut activated = false;
    let mut deactivated = false;
    if rail.state == RailState::ZeroRate && old_rate.is_zero() && !new_rate.is_zero() {
        rail.state = RailState::Active;
        activated = true;
    } else if rail.state == RailState::Active && new_rate.is_zero() {
        rail.state = RailState::ZeroRate;
        deactivated = true;
    }
    rail.total_rate_changes += 1;

    // Track the ended segment (or snap settled_upto forward) before any
    // usage math; the effective period below reads the updated rail.
    queue::enqueue_rate_change(
        &mut ledger.rate_changes,
        &mut rail,
        old_rate,
        new_rate,
        ctx.epoch(),
    );

    if rail.state != RailState::Terminated {
        approval::apply_rate_usage(&mut approval_row, &mut operator_token, old_rate, new_rate);
    }
    let period = lockup::effective_lockup_period(&rail, ctx.epoch());
    if !period.is_zero() {
        approval::apply_lockup_usage(
            &mut approval_row,
            &mut operator_token,
            old_rate.saturating_mul(period),
            new_rate.saturating_mul(period),
        );
    }

    rail.payment_rate = new_rate;
    ledger.operator_approvals.save(key, approval_row);
    ledger
        .operator_tokens
        .save((rail.operator, rail.token), operator_token);
    ledger.rails.save(rail_id, rail);
    Some(Applied::RateModified {
        rail_id,
        activated,
        deactivated,
    })
}

pub fn handle_rail_lockup_modified(
    ledger: &mut Ledger,
    _ctx: &EventContext,
    rail_id: U256,
    old_lockup_period: U256,
    new_lockup_period: U256,
    old_lockup_fixed: U256,
    new_lockup_fixed: U256,
) -> Option<Applied> {
    let Some(mut rail) = ledger.rails.load(&rail_id) else {
        tracing::warn!(rail = %rail_id, "RailLockupModified for unknown rail, skipping");
        return None;
    };
    if rail.state == RailState::Finalized {
        tracing::warn!(rail = %rail_id, "RailLockupModified on finalized rail, skipping");
        return None;
    }
    let key = (rail.payer, rail.operator, rail.token);
    let Some(mut approval_row) = ledger.operator_approvals.load(&key) else {
        tracing::warn!(rail = %rail_id, operator = %rail.operator, "RailLockupModified with no operator approval, skipping");
        return None;
    };
    let (mut operator_token, _) = ledger
        .operator_tokens
        .load_or_create(&(rail.operator, rail.token), || {
            OperatorToken::new(rail.operator, rail.token)
        });

    // A terminated rail no longer streams; only its fixed component moves.
    let terminated = rail.state == RailState::Terminated;
    let (old_lockup, new_lockup) = if terminated {
        (old_lockup_fixed, new_lockup_fixed)
    } else {
        (
            lockup::rail_lockup(old_lockup_fixed, rail.payment_rate, old_lockup_period),
            lockup::rail_lockup(new_lockup_fixed, rail.payment_rate, new_lockup_period),
        )
    };

    rail.lockup_fixed = new_lockup_fixed;
    if !terminated {
        rail.lockup_period = new_lockup_period;
    }
    approval::apply_lockup_usage(&mut approval_row, &mut operator_token, old_lockup, new_lockup);

    ledger.operator_approvals.save(key, approval_row);
    ledger
        .operator_tokens
        .save((rail.operator, rail.token), operator_token);
    ledger.rails.save(rail_id, rail);
    Some(Applied::LockupModified { rail_id })
}

pub fn handle_rail_terminated(
    ledger: &mut Ledger,
    ctx: &EventContext,
    rail_id: U256,
    by: Address,
    end_epoch: U256,
) -> Option<Applied> {
    let Some(mut rail) = ledger.rails.load(&rail_id) else {
        tracing::warn!(rail = %rail_id, "RailTerminated for unknown rail, skipping");
        return None;
    };
    if rail.state.is_terminal() {
        tracing::warn!(rail = %rail_id, state = %rail.state, "RailTerminated on terminal rail, skipping");
        return None;
    }
    let Some(mut user) = ledger.user_tokens.load(&(rail.payer, rail.token)) else {
        tracing::warn!(rail = %rail_id, payer = %rail.payer, "RailTerminated with no payer balance row, skipping");
        return None;
    };

    let from_state = rail.state;
    rail.state = RailState::Terminated;
    rail.end_epoch = end_epoch;
    tracing::info!(rail = %rail_id, by = %by, end_epoch = %end_epoch, "rail terminated");

    // This rail stops contributing to the payer's streaming lockup rate;
    // settle the accrual up to now first.
    lockup::settle_user_lockup(&mut user, ctx.epoch());
    user.lockup_rate = user.lockup_rate.saturating_sub(rail.payment_rate);

    ledger.user_tokens.save((rail.payer, rail.token), user);
    ledger.rails.save(rail_id, rail);
    Some(Applied::Terminated {
        rail_id,
        from_state,
    })
}

#[allow(clippy::too_many_arguments)]
pub fn handle_rail_settled(
    ledger: &mut Ledger,
    ctx: &EventContext,
    rail_id: U256,
    total_settled_amount: U256,
    total_net_payee_amount: U256,
    operator_commission: U256,
    settled_upto: U256,
) -> Option<Applied> {
    let record_key = (ctx.tx_hash, ctx.log_index);
    if ledger.settlements.contains(&record_key) {
        tracing::warn!(rail = %rail_id, tx = %ctx.tx_hash, "RailSettled already recorded, skipping");
        return None;
    }
    let Some(mut rail) = ledger.rails.load(&rail_id) else {
        tracing::warn!(rail = %rail_id, "RailSettled for unknown rail, skipping");
        return None;
    };
    let Some(mut token_row) = ledger.tokens.load(&rail.token) else {
        tracing::warn!(rail = %rail_id, token = %rail.token, "RailSettled for unknown token, skipping");
        return None;
    };
    let Some(mut payer_row) = ledger.user_tokens.load(&(rail.payer, rail.token)) else {
        tracing::warn!(rail = %rail_id, payer = %rail.payer, "RailSettled with no payer balance row, skipping");
        return None;
    };

    rail.total_settled_amount = rail.total_settled_amount.saturating_add(total_settled_amount);
    rail.total_net_payee_amount = rail
        .total_net_payee_amount
        .saturating_add(total_net_payee_amount);
    rail.total_commission = rail.total_commission.saturating_add(operator_commission);
    rail.total_settlements += 1;
    rail.settled_upto = settled_upto;

    // Payer pays the full settled amount; payee receives the net. The
    // payer -> payee transfer nets out at the token level, so user_funds
    // only drops by the commission.
    payer_row.funds = payer_row.funds.saturating_sub(total_settled_amount);
    ledger.user_tokens.save((rail.payer, rail.token), payer_row);

    credit_payee(
        ledger,
        &mut token_row,
        rail.payee,
        rail.token,
        total_net_payee_amount,
    );

    token_row.user_funds = token_row.user_funds.saturating_sub(operator_commission);
    token_row.total_settled_amount = token_row
        .total_settled_amount
        .saturating_add(total_settled_amount);
    token_row.volume = token_row.volume.saturating_add(total_settled_amount);
    ledger.tokens.save(rail.token, token_row);

    let (mut operator_token, _) = ledger
        .operator_tokens
        .load_or_create(&(rail.operator, rail.token), || {
            OperatorToken::new(rail.operator, rail.token)
        });
    operator_token.settled_amount = operator_token
        .settled_amount
        .saturating_add(total_settled_amount);
    operator_token.commission_earned = operator_token
        .commission_earned
        .saturating_add(operator_commission);
    operator_token.volume = operator_token.volume.saturating_add(total_settled_amount);
    ledger
        .operator_tokens
        .save((rail.operator, rail.token), operator_token);

    ledger.settlements.save(
        record_key,
        Settlement {
            tx_hash: ctx.tx_hash,
            log_index: ctx.log_index,
            rail: rail_id,
            total_settled_amount,
            total_net_payee_amount,
            operator_commission,
            fil_burned: ctx.network_fee,
            settled_upto,
        },
    );

    let (token, operator) = (rail.token, rail.operator);
    ledger.rails.save(rail_id, rail);
    Some(Applied::Settled {
        rail_id,
        token,
        operator,
        amount: total_settled_amount,
        commission: operator_commission,
        fil_burned: ctx.network_fee,
    })
}

pub fn handle_rail_one_time_payment(
    ledger: &mut Ledger,
    ctx: &EventContext,
    rail_id: U256,
    net_payee_amount: U256,
    operator_commission: U256,
    network_fee: U256,
) -> Option<Applied> {
    let record_key = (ctx.tx_hash, ctx.log_index);
    if ledger.one_time_payments.contains(&record_key) {
        tracing::warn!(rail = %rail_id, tx = %ctx.tx_hash, "one-time payment already recorded, skipping");
        return None;
    }
    let Some(mut rail) = ledger.rails.load(&rail_id) else {
        tracing::warn!(rail = %rail_id, "RailOneTimePaymentProcessed for unknown rail, skipping");
        return None;
    };
    let Some(mut token_row) = ledger.tokens.load(&rail.token) else {
        tracing::warn!(rail = %rail_id, token = %rail.token, "RailOneTimePaymentProcessed for unknown token, skipping");
        return None;
    };
    let key = (rail.payer, rail.operator, rail.token);
    let Some(mut approval_row) = ledger.operator_approvals.load(&key) else {
        tracing::warn!(rail = %rail_id, operator = %rail.operator, "RailOneTimePaymentProcessed with no operator approval, skipping");
        return None;
    };
    let Some(mut payer_row) = ledger.user_tokens.load(&(rail.payer, rail.token)) else {
        tracing::warn!(rail = %rail_id, payer = %rail.payer, "RailOneTimePaymentProcessed with no payer balance row, skipping");
        return None;
    };

    // Principal is what leaves the payer besides commission: the payee's net
    // plus the network fee routed to the service-fee recipient.
    let total = net_payee_amount
        .saturating_add(operator_commission)
        .saturating_add(network_fee);

    rail.lockup_fixed = rail.lockup_fixed.saturating_sub(net_payee_amount);
    payer_row.funds = payer_row.funds.saturating_sub(total);
    ledger.user_tokens.save((rail.payer, rail.token), payer_row);

    credit_payee(ledger, &mut token_row, rail.payee, rail.token, net_payee_amount);
    if !network_fee.is_zero() {
        credit_payee(
            ledger,
            &mut token_row,
            rail.service_fee_recipient,
            rail.token,
            network_fee,
        );
    }

    token_row.user_funds = token_row.user_funds.saturating_sub(operator_commission);
    token_row.volume = token_row.volume.saturating_add(total);
    ledger.tokens.save(rail.token, token_row);

    let (mut operator_token, _) = ledger
        .operator_tokens
        .load_or_create(&(rail.operator, rail.token), || {
            OperatorToken::new(rail.operator, rail.token)
        });
    approval::draw_down_one_time_payment(&mut approval_row, &mut operator_token, total);
    operator_token.volume = operator_token.volume.saturating_add(total);
    operator_token.commission_earned = operator_token
        .commission_earned
        .saturating_add(operator_commission);
    ledger.operator_approvals.save(key, approval_row);
    ledger
        .operator_tokens
        .save((rail.operator, rail.token), operator_token);

    ledger.one_time_payments.save(
        record_key,
        OneTimePayment {
            tx_hash: ctx.tx_hash,
            log_index: ctx.log_index,
            rail: rail_id,
            total_amount: total,
            net_payee_amount,
            operator_commission,
            network_fee,
        },
    );

    let (token, operator) = (rail.token, rail.operator);
    ledger.rails.save(rail_id, rail);
    Some(Applied::OneTimePayment {
        rail_id,
        token,
        operator,
        amount: total,
        commission: operator_commission,
    })
}

pub fn handle_rail_finalized(
    ledger: &mut Ledger,
    _ctx: &EventContext,
    rail_id: U256,
) -> Option<Applied> {
    let Some(mut rail) = ledger.rails.load(&rail_id) else {
        tracing::warn!(rail = %rail_id, "RailFinalized for unknown rail, skipping");
        return None;
    };
    if rail.state != RailState::Terminated {
        tracing::warn!(rail = %rail_id, state = %rail.state, "RailFinalized on non-terminated rail, skipping");
        return None;
    }
    let key = (rail.payer, rail.operator, rail.token);
    let Some(mut approval_row) = ledger.operator_approvals.load(&key) else {
        tracing::warn!(rail = %rail_id, operator = %rail.operator, "RailFinalized with no operator approval, skipping");
        return None;
    };
    let (mut operator_token, _) = ledger
        .operator_tokens
        .load_or_create(&(rail.operator, rail.token), || {
            OperatorToken::new(rail.operator, rail.token)
        });

    approval::release_rail_commitment(&mut approval_row, &mut operator_token, &rail);
    rail.state = RailState::Finalized;
    tracing::info!(rail = %rail_id, "rail finalized");

    ledger.operator_approvals.save(key, approval_row);
    ledger
        .operator_tokens
        .save((rail.operator, rail.token), operator_token);
    ledger.rails.save(rail_id, rail);
    Some(Applied::Finalized { rail_id })
}

/// Credit `amount` to a recipient's balance row, creating it (and its
/// account/token bookkeeping) on first touch. Reads through staged writes so
/// payer == payee and payee == fee-recipient aliasing accumulate correctly.
fn credit_payee(
    ledger: &mut Ledger,
    token_row: &mut Token,
    recipient: Address,
    token: Address,
    amount: U256,
) {
    let (mut recipient_account, _) = ledger
        .accounts
        .load_or_create(&recipient, || Account::new(recipient));
    let (mut row, is_new) = ledger
        .user_tokens
        .load_or_create(&(recipient, token), || UserToken::new(recipient, token));
    if is_new {
        token_row.total_users += 1;
        recipient_account.total_tokens += 1;
    }
    row.funds = row.funds.saturating_add(amount);
    row.payout = row.payout.saturating_add(amount);
    ledger.user_tokens.save((recipient, token), row);
    ledger.accounts.save(recipient, recipient_account);
}
