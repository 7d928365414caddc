//! Account and token level event handlers.
//!
//! Deposits, withdrawals, operator approvals, and account lockup snapshots.
//! Accounts, tokens, and user balances are created lazily on first
//! reference. A handler that cannot find a referenced row logs and returns
//! `None`; the dispatcher then discards its staged writes, so a malformed
//! event never stops the stream or leaves partial state behind.

use crate::approval;
use crate::dispatcher::EventContext;
use crate::entities::{Account, Operator, OperatorApproval, OperatorToken, Token, UserToken};
use crate::metrics::Applied;
use crate::store::Ledger;
use alloy::primitives::{Address, U256};

fn abs_diff(a: U256, b: U256) -> U256 {
    if a >= b {
        a - b
    } else {
        b - a
    }
}

/// Lazily create an account; returns 1 if it was new (for metric totals).
fn touch_account(ledger: &mut Ledger, address: Address) -> u64 {
    let (account, is_new) = ledger
        .accounts
        .load_or_create(&address, || Account::new(address));
    if is_new {
        ledger.accounts.save(address, account);
    }
    u64::from(is_new)
}

pub fn handle_deposit(
    ledger: &mut Ledger,
    ctx: &EventContext,
    token: Address,
    from: Address,
    to: Address,
    amount: U256,
) -> Option<Applied> {
    let (mut token_row, new_token) = ledger
        .tokens
        .load_or_create(&token, || Token::new(token, ctx.metadata()));

    let mut new_accounts = 0;
    if from != to {
        new_accounts += touch_account(ledger, from);
    }
    let (mut to_account, to_new) = ledger.accounts.load_or_create(&to, || Account::new(to));
    new_accounts += u64::from(to_new);

    let (mut user, new_user) = ledger
        .user_tokens
        .load_or_create(&(to, token), || UserToken::new(to, token));
    if new_user {
        token_row.total_users += 1;
        to_account.total_tokens += 1;
    }

    user.funds = user.funds.saturating_add(amount);
    token_row.user_funds = token_row.user_funds.saturating_add(amount);
    token_row.total_deposits = token_row.total_deposits.saturating_add(amount);
    token_row.volume = token_row.volume.saturating_add(amount);

    ledger.user_tokens.save((to, token), user);
    ledger.accounts.save(to, to_account);
    ledger.tokens.save(token, token_row);
    Some(Applied::Deposit {
        token,
        amount,
        new_accounts,
        new_token,
        new_user,
    })
}

pub fn handle_withdraw(
    ledger: &mut Ledger,
    _ctx: &EventContext,
    token: Address,
    from: Address,
    to: Address,
    amount: U256,
) -> Option<Applied> {
    let Some(mut token_row) = ledger.tokens.load(&token) else {
        tracing::warn!(token = %token, "WithdrawRecorded for unknown token, skipping");
        return None;
    };
    let Some(mut user) = ledger.user_tokens.load(&(from, token)) else {
        tracing::warn!(token = %token, account = %from, "WithdrawRecorded with no balance row, skipping");
        return None;
    };
    let _ = to; // external recipient wallet; not ledger state

    user.funds = user.funds.saturating_sub(amount);
    user.funds_collected = user.funds_collected.saturating_add(amount);
    token_row.user_funds = token_row.user_funds.saturating_sub(amount);
    token_row.total_withdrawals = token_row.total_withdrawals.saturating_add(amount);
    token_row.volume = token_row.volume.saturating_add(amount);

    ledger.user_tokens.save((from, token), user);
    ledger.tokens.save(token, token_row);
    Some(Applied::Withdraw { token, amount })
}

#[allow(clippy::too_many_arguments)]
pub fn handle_operator_approval_updated(
    ledger: &mut Ledger,
    ctx: &EventContext,
    token: Address,
    client: Address,
    operator: Address,
    approved: bool,
    rate_allowance: U256,
    lockup_allowance: U256,
    max_lockup_period: U256,
) -> Option<Applied> {
    let (mut token_row, new_token) = ledger
        .tokens
        .load_or_create(&token, || Token::new(token, ctx.metadata()));
    let (mut client_account, client_new) =
        ledger.accounts.load_or_create(&client, || Account::new(client));
    let (mut operator_row, new_operator) = ledger
        .operators
        .load_or_create(&operator, || Operator::new(operator));
    let (mut approval_row, approval_new) = ledger
        .operator_approvals
        .load_or_create(&(client, operator, token), || {
            OperatorApproval::new(client, operator, token)
        });
    let (mut operator_token, operator_token_new) = ledger
        .operator_tokens
        .load_or_create(&(operator, token), || OperatorToken::new(operator, token));

    if approval_new {
        client_account.total_approvals += 1;
        operator_row.total_approvals += 1;
    }
    if operator_token_new {
        operator_row.total_tokens += 1;
    }

    // The event carries absolute allowances; the aggregate mirrors them as
    // deltas against this client's previous ceilings. The absolute change in
    // lockup allowance is tracked as churn volume.
    let allowance_churn = abs_diff(lockup_allowance, approval_row.lockup_allowance);
    operator_token.rate_allowance = approval::adjust_usage(
        operator_token.rate_allowance,
        approval_row.rate_allowance,
        rate_allowance,
    );
    operator_token.lockup_allowance = approval::adjust_usage(
        operator_token.lockup_allowance,
        approval_row.lockup_allowance,
        lockup_allowance,
    );
    operator_token.volume = operator_token.volume.saturating_add(allowance_churn);

    approval_row.is_approved = approved;
    approval_row.rate_allowance = rate_allowance;
    approval_row.lockup_allowance = lockup_allowance;
    approval_row.max_lockup_period = max_lockup_period;

    ledger
        .operator_approvals
        .save((client, operator, token), approval_row);
    ledger
        .operator_tokens
        .save((operator, token), operator_token);
    ledger.accounts.save(client, client_account);
    ledger.operators.save(operator, operator_row);
    ledger.tokens.save(token, token_row);
    Some(Applied::ApprovalUpdated {
        token,
        operator,
        new_accounts: u64::from(client_new),
        new_operator,
        new_token,
        allowance_churn,
    })
}

/// Contract-issued snapshot of an account's streaming lockup. The snapshot
/// overwrites the accrual fields wholesale, which makes replaying the same
/// snapshot a no-op.
pub fn handle_account_lockup_settled(
    ledger: &mut Ledger,
    ctx: &EventContext,
    token: Address,
    owner: Address,
    lockup_current: U256,
    lockup_rate: U256,
    lockup_last_settled_at: U256,
) -> Option<Applied> {
    let (token_row, _) = ledger
        .tokens
        .load_or_create(&token, || Token::new(token, ctx.metadata()));
    ledger.tokens.save(token, token_row);
    touch_account(ledger, owner);

    let (mut user, _) = ledger
        .user_tokens
        .load_or_create(&(owner, token), || UserToken::new(owner, token));
    user.lockup_current = lockup_current;
    user.lockup_rate = lockup_rate;
    user.lockup_last_settled_at = lockup_last_settled_at;
    ledger.user_tokens.save((owner, token), user);
    Some(Applied::LockupSettled { token, owner })
}
