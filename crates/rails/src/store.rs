//! Entity store: typed tables with staged writes.
//!
//! Every table is addressed by a deterministic composite key (the typed-tuple
//! equivalent of concatenating the natural key bytes), which makes replaying
//! the same event stream land on the same rows. Handlers follow the
//! load / load_or_create / mutate / save discipline; saves go to a staging
//! layer that the dispatcher commits after a handler succeeds and discards
//! when a handler skips, so an event is applied atomically or not at all.
//! No handler ever deletes a row.

use crate::entities::{
    Account, DailyMetric, DailyOperatorMetric, DailyTokenMetric, OneTimePayment, Operator,
    OperatorApproval, OperatorToken, PaymentsMetric, Rail, RateChange, Settlement, Token,
    UserToken, WeeklyMetric,
};
use alloy::primitives::{Address, B256, U256};
use std::collections::BTreeMap;

/// One table of rows plus its staged (uncommitted) writes.
#[derive(Debug, Clone)]
pub struct Table<K: Ord + Clone, V: Clone> {
    rows: BTreeMap<K, V>,
    staged: BTreeMap<K, V>,
}

impl<K: Ord + Clone, V: Clone> Table<K, V> {
    fn new() -> Self {
        Self {
            rows: BTreeMap::new(),
            staged: BTreeMap::new(),
        }
    }

    /// Load a row; staged writes from the in-flight event are visible.
    pub fn load(&self, id: &K) -> Option<V> {
        self.staged.get(id).or_else(|| self.rows.get(id)).cloned()
    }

    /// Load a row or build a fresh one. The second element is true when the
    /// row did not exist; the caller owns the copy and must `save` it.
    pub fn load_or_create(&self, id: &K, init: impl FnOnce() -> V) -> (V, bool) {
        match self.load(id) {
            Some(row) => (row, false),
            None => (init(), true),
        }
    }

    pub fn contains(&self, id: &K) -> bool {
        self.staged.contains_key(id) || self.rows.contains_key(id)
    }

    /// Stage a write; it becomes durable on [Ledger::commit].
    pub fn save(&mut self, id: K, row: V) {
        self.staged.insert(id, row);
    }

    /// Committed row count.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterate committed rows in key order (the point-lookup/scan surface the
    /// downstream read API consumes).
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.rows.iter()
    }

    pub(crate) fn commit(&mut self) {
        let staged = std::mem::take(&mut self.staged);
        for (k, v) in staged {
            self.rows.insert(k, v);
        }
    }

    fn discard(&mut self) {
        self.staged.clear();
    }
}

impl<K: Ord + Clone, V: Clone> Default for Table<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// The full derived state, one table per entity kind.
///
/// Key shapes: `(client, operator, token)` for approvals, `(operator, token)`
/// for operator aggregates, `(account, token)` for user balances,
/// `(rail, start_epoch)` for rate segments, `(tx_hash, log_index)` for
/// settlement and one-time-payment records.
#[derive(Debug, Default)]
pub struct Ledger {
    pub accounts: Table<Address, Account>,
    pub tokens: Table<Address, Token>,
    pub user_tokens: Table<(Address, Address), UserToken>,
    pub operators: Table<Address, Operator>,
    pub operator_approvals: Table<(Address, Address, Address), OperatorApproval>,
    pub operator_tokens: Table<(Address, Address), OperatorToken>,
    pub rails: Table<U256, Rail>,
    pub rate_changes: Table<(U256, U256), RateChange>,
    pub settlements: Table<(B256, u64), Settlement>,
    pub one_time_payments: Table<(B256, u64), OneTimePayment>,
    pub payments_metric: Table<&'static str, PaymentsMetric>,
    pub daily_metrics: Table<String, DailyMetric>,
    pub weekly_metrics: Table<u64, WeeklyMetric>,
    pub daily_token_metrics: Table<(String, Address), DailyTokenMetric>,
    pub daily_operator_metrics: Table<(String, Address), DailyOperatorMetric>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every staged write durable. Called once per applied event.
    pub fn commit(&mut self) {
        self.accounts.commit();
        self.tokens.commit();
        self.user_tokens.commit();
        self.operators.commit();
        self.operator_approvals.commit();
        self.operator_tokens.commit();
        self.rails.commit();
        self.rate_changes.commit();
        self.settlements.commit();
        self.one_time_payments.commit();
        self.payments_metric.commit();
        self.daily_metrics.commit();
        self.weekly_metrics.commit();
        self.daily_token_metrics.commit();
        self.daily_operator_metrics.commit();
    }

    /// Drop every staged write. Called when an event is skipped.
    pub fn discard(&mut self) {
        self.accounts.discard();
        self.tokens.discard();
        self.user_tokens.discard();
        self.operators.discard();
        self.operator_approvals.discard();
        self.operator_tokens.discard();
        self.rails.discard();
        self.rate_changes.discard();
        self.settlements.discard();
        self.one_time_payments.discard();
        self.payments_metric.discard();
        self.daily_metrics.discard();
        self.weekly_metrics.discard();
        self.daily_token_metrics.discard();
        self.daily_operator_metrics.discard();
    }

    /// Sum of committed `UserToken.funds` for one token. The conservation
    /// check `Token.user_funds == sum_user_funds(token)` must hold after
    /// every commit.
    pub fn sum_user_funds(&self, token: Address) -> U256 {
        self.user_tokens
            .iter()
            .filter(|((_, t), _)| *t == token)
            .fold(U256::ZERO, |acc, (_, ut)| acc.saturating_add(ut.funds))
    }
}
