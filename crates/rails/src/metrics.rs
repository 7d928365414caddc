//! Protocol metrics derived from handler outcomes.
//!
//! The collector observes the outcome of every applied event and folds it
//! into a fixed-id singleton row plus lazily-created day/week buckets (and
//! per-token / per-operator day buckets for scoped events). It is an
//! explicitly constructed, explicitly passed instance; the unique payer and
//! payee sets live on it. Bucket counters only ever grow; the singleton's
//! rail-state counts are gauges and move with lifecycle transitions.

use crate::entities::{
    DailyMetric, DailyOperatorMetric, DailyTokenMetric, PaymentsMetric, RailState, WeeklyMetric,
    PAYMENTS_METRIC_ID, SECONDS_PER_WEEK,
};
use crate::store::Ledger;
use alloy::primitives::{Address, U256};
use chrono::DateTime;
use std::collections::HashSet;

/// What a handler did, carrying exactly the data the collector needs.
/// Handlers that skip an event produce no outcome and leave no metric trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Deposit {
        token: Address,
        amount: U256,
        new_accounts: u64,
        new_token: bool,
        new_user: bool,
    },
    Withdraw {
        token: Address,
        amount: U256,
    },
    ApprovalUpdated {
        token: Address,
        operator: Address,
        new_accounts: u64,
        new_operator: bool,
        new_token: bool,
        allowance_churn: U256,
    },
    LockupSettled {
        token: Address,
        owner: Address,
    },
    RailCreated {
        rail_id: U256,
        token: Address,
        operator: Address,
        payer: Address,
        payee: Address,
        new_accounts: u64,
        new_operator: bool,
        new_token: bool,
    },
    RateModified {
        rail_id: U256,
        activated: bool,
        deactivated: bool,
    },
    LockupModified {
        rail_id: U256,
    },
    Terminated {
        rail_id: U256,
        from_state: RailState,
    },
    Settled {
        rail_id: U256,
        token: Address,
        operator: Address,
        amount: U256,
        commission: U256,
        fil_burned: U256,
    },
    OneTimePayment {
        rail_id: U256,
        token: Address,
        operator: Address,
        amount: U256,
        commission: U256,
    },
    Finalized {
        rail_id: U256,
    },
}

/// UTC day bucket key for a block timestamp.
pub fn day_bucket(timestamp: u64) -> String {
    DateTime::from_timestamp(timestamp as i64, 0)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "1970-01-01".to_string())
}

/// Week bucket index for a block timestamp (1-based).
pub fn week_bucket(timestamp: u64) -> u64 {
    timestamp / SECONDS_PER_WEEK + 1
}

/// Folds [Applied] outcomes into the metric tables of a [Ledger].
#[derive(Debug, Default)]
pub struct MetricsCollector {
    payers: HashSet<Address>,
    payees: HashSet<Address>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one applied event. Writes are staged in the ledger and commit
    /// together with the handler's own mutations.
    pub fn record(&mut self, ledger: &mut Ledger, timestamp: u64, applied: &Applied) {
        let (mut global, _) = ledger
            .payments_metric
            .load_or_create(&PAYMENTS_METRIC_ID, PaymentsMetric::default);
        let day = day_bucket(timestamp);
        let week = week_bucket(timestamp);
        let (mut daily, _) = ledger.daily_metrics.load_or_create(&day, || DailyMetric {
            day: day.clone(),
            ..DailyMetric::default()
        });
        let (mut weekly, _) = ledger.weekly_metrics.load_or_create(&week, || WeeklyMetric {
            week,
            ..WeeklyMetric::default()
        });

        match applied {
            Applied::Deposit {
                token,
                amount,
                new_accounts,
                new_token,
                new_user: _,
            } => {
                global.total_accounts += new_accounts;
                global.total_tokens += u64::from(*new_token);
                global.total_deposits = global.total_deposits.saturating_add(*amount);
                daily.deposit_count += 1;
                daily.deposit_amount = daily.deposit_amount.saturating_add(*amount);
                weekly.deposit_count += 1;
                weekly.deposit_amount = weekly.deposit_amount.saturating_add(*amount);
                self.record_token(ledger, &day, *token, |m| {
                    m.deposit_amount = m.deposit_amount.saturating_add(*amount);
                    m.volume = m.volume.saturating_add(*amount);
                });
            }
            Applied::Withdraw { token, amount } => {
                global.total_withdrawals = global.total_withdrawals.saturating_add(*amount);
                daily.withdrawal_count += 1;
                daily.withdrawal_amount = daily.withdrawal_amount.saturating_add(*amount);
                weekly.withdrawal_count += 1;
                weekly.withdrawal_amount = weekly.withdrawal_amount.saturating_add(*amount);
                self.record_token(ledger, &day, *token, |m| {
                    m.withdrawal_amount = m.withdrawal_amount.saturating_add(*amount);
                    m.volume = m.volume.saturating_add(*amount);
                });
            }
            Applied::ApprovalUpdated {
                token: _,
                operator,
                new_accounts,
                new_operator,
                new_token,
                allowance_churn,
            } => {
                global.total_accounts += new_accounts;
                global.total_operators += u64::from(*new_operator);
                global.total_tokens += u64::from(*new_token);
                self.record_operator(ledger, &day, *operator, |m| {
                    m.volume = m.volume.saturating_add(*allowance_churn);
                });
            }
            Applied::LockupSettled { .. } => {}
            Applied::RailCreated {
                operator,
                payer,
                payee,
                new_accounts,
                new_operator,
                new_token,
                ..
            } => {
                global.total_rails += 1;
                global.zero_rate_rails += 1;
                global.total_accounts += new_accounts;
                global.total_operators += u64::from(*new_operator);
                global.total_tokens += u64::from(*new_token);
                if self.payers.insert(*payer) {
                    global.unique_payers += 1;
                }
                if self.payees.insert(*payee) {
                    global.unique_payees += 1;
                }
                daily.rails_created += 1;
                weekly.rails_created += 1;
                self.record_operator(ledger, &day, *operator, |m| {
                    m.rails_created += 1;
                });
            }
            Applied::RateModified {
                activated,
                deactivated,
                ..
            } => {
                global.total_rate_changes += 1;
                if *activated {
                    global.active_rails += 1;
                    global.zero_rate_rails = global.zero_rate_rails.saturating_sub(1);
                }
                if *deactivated {
                    global.zero_rate_rails += 1;
                    global.active_rails = global.active_rails.saturating_sub(1);
                }
            }
            Applied::LockupModified { .. } => {}
            Applied::Terminated { from_state, .. } => {
                global.terminated_rails += 1;
                match from_state {
                    RailState::Active => {
                        global.active_rails = global.active_rails.saturating_sub(1)
                    }
                    RailState::ZeroRate => {
                        global.zero_rate_rails = global.zero_rate_rails.saturating_sub(1)
                    }
                    _ => {}
                }
            }
            Applied::Settled {
                token,
                operator,
                amount,
                commission,
                fil_burned,
                ..
            } => {
                global.total_settlements += 1;
                global.total_settled = global.total_settled.saturating_add(*amount);
                global.total_commission = global.total_commission.saturating_add(*commission);
                global.total_fil_burned = global.total_fil_burned.saturating_add(*fil_burned);
                daily.settlements += 1;
                daily.settled_amount = daily.settled_amount.saturating_add(*amount);
                daily.commission = daily.commission.saturating_add(*commission);
                daily.fil_burned = daily.fil_burned.saturating_add(*fil_burned);
                weekly.settlements += 1;
                weekly.settled_amount = weekly.settled_amount.saturating_add(*amount);
                weekly.commission = weekly.commission.saturating_add(*commission);
                weekly.fil_burned = weekly.fil_burned.saturating_add(*fil_burned);
                self.record_token(ledger, &day, *token, |m| {
                    m.settled_amount = m.settled_amount.saturating_add(*amount);
                    m.volume = m.volume.saturating_add(*amount);
                    m.settlements += 1;
                });
                self.record_operator(ledger, &day, *operator, |m| {
                    m.settled_amount = m.settled_amount.saturating_add(*amount);
                    m.commission_earned = m.commission_earned.saturating_add(*commission);
                    m.volume = m.volume.saturating_add(*amount);
                });
            }
            Applied::OneTimePayment {
                token,
                operator,
                amount,
                commission,
                ..
            } => {
                global.total_one_time_payments += 1;
                daily.one_time_payments += 1;
                weekly.one_time_payments += 1;
                self.record_token(ledger, &day, *token, |m| {
                    m.volume = m.volume.saturating_add(*amount);
                });
                self.record_operator(ledger, &day, *operator, |m| {
                    m.volume = m.volume.saturating_add(*amount);
                    m.commission_earned = m.commission_earned.saturating_add(*commission);
                });
            }
            Applied::Finalized { .. } => {
                global.finalized_rails += 1;
                global.terminated_rails = global.terminated_rails.saturating_sub(1);
            }
        }

        ledger.daily_metrics.save(day, daily);
        ledger.weekly_metrics.save(week, weekly);
        ledger.payments_metric.save(PAYMENTS_METRIC_ID, global);
    }

    fn record_token(
        &mut self,
        ledger: &mut Ledger,
        day: &str,
        token: Address,
        update: impl FnOnce(&mut DailyTokenMetric),
    ) {
        let key = (day.to_string(), token);
        let (mut metric, _) = ledger
            .daily_token_metrics
            .load_or_create(&key, || DailyTokenMetric {
                day: day.to_string(),
                token,
                ..DailyTokenMetric::default()
            });
        update(&mut metric);
        ledger.daily_token_metrics.save(key, metric);
    }

    fn record_operator(
        &mut self,
        ledger: &mut Ledger,
        day: &str,
        operator: Address,
        update: impl FnOnce(&mut DailyOperatorMetric),
    ) {
        let key = (day.to_string(), operator);
        let (mut metric, _) =
            ledger
                .daily_operator_metrics
                .load_or_create(&key, || DailyOperatorMetric {
                    day: day.to_string(),
                    operator,
                    ..DailyOperatorMetric::default()
                });
        update(&mut metric);
        ledger.daily_operator_metrics.save(key, metric);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_bucket_is_utc_date() {
        assert_eq!(day_bucket(0), "1970-01-01");
        assert_eq!(day_bucket(86_399), "1970-01-01");
        assert_eq!(day_bucket(86_400), "1970-01-02");
        assert_eq!(day_bucket(1_700_000_000), "2023-11-14");
    }

    #[test]
    fn week_bucket_is_one_based() {
        assert_eq!(week_bucket(0), 1);
        assert_eq!(week_bucket(SECONDS_PER_WEEK - 1), 1);
        assert_eq!(week_bucket(SECONDS_PER_WEEK), 2);
    }

    #[test]
    fn deposit_updates_global_and_buckets() {
        let mut ledger = Ledger::new();
        let mut collector = MetricsCollector::new();
        let token = Address::repeat_byte(0xaa);
        collector.record(
            &mut ledger,
            1_700_000_000,
            &Applied::Deposit {
                token,
                amount: U256::from(1000u64),
                new_accounts: 1,
                new_token: true,
                new_user: true,
            },
        );
        ledger.commit();
        let global = ledger.payments_metric.load(&PAYMENTS_METRIC_ID).unwrap();
        assert_eq!(global.total_accounts, 1);
        assert_eq!(global.total_tokens, 1);
        assert_eq!(global.total_deposits, U256::from(1000u64));
        let daily = ledger.daily_metrics.load(&"2023-11-14".to_string()).unwrap();
        assert_eq!(daily.deposit_count, 1);
        assert_eq!(daily.deposit_amount, U256::from(1000u64));
        let token_day = ledger
            .daily_token_metrics
            .load(&("2023-11-14".to_string(), token))
            .unwrap();
        assert_eq!(token_day.volume, U256::from(1000u64));
    }

    #[test]
    fn lifecycle_gauges_move() {
        let mut ledger = Ledger::new();
        let mut collector = MetricsCollector::new();
        let rail_id = U256::from(1u64);
        collector.record(
            &mut ledger,
            0,
            &Applied::RailCreated {
                rail_id,
                token: Address::repeat_byte(1),
                operator: Address::repeat_byte(2),
                payer: Address::repeat_byte(3),
                payee: Address::repeat_byte(4),
                new_accounts: 2,
                new_operator: true,
                new_token: true,
            },
        );
        collector.record(
            &mut ledger,
            0,
            &Applied::RateModified {
                rail_id,
                activated: true,
                deactivated: false,
            },
        );
        collector.record(
            &mut ledger,
            0,
            &Applied::Terminated {
                rail_id,
                from_state: RailState::Active,
            },
        );
        collector.record(&mut ledger, 0, &Applied::Finalized { rail_id });
        ledger.commit();
        let global = ledger.payments_metric.load(&PAYMENTS_METRIC_ID).unwrap();
        assert_eq!(global.total_rails, 1);
        assert_eq!(global.zero_rate_rails, 0);
        assert_eq!(global.active_rails, 0);
        assert_eq!(global.terminated_rails, 0);
        assert_eq!(global.finalized_rails, 1);
        assert_eq!(global.unique_payers, 1);
        assert_eq!(global.unique_payees, 1);
    }

    #[test]
    fn repeat_payer_is_counted_once() {
        let mut ledger = Ledger::new();
        let mut collector = MetricsCollector::new();
        for rail in 1u64..=2 {
            collector.record(
                &mut ledger,
                0,
                &Applied::RailCreated {
                    rail_id: U256::from(rail),
                    token: Address::repeat_byte(1),
                    operator: Address::repeat_byte(2),
                    payer: Address::repeat_byte(3),
                    payee: Address::repeat_byte(rail as u8 + 10),
                    new_accounts: 0,
                    new_operator: false,
                    new_token: false,
                },
            );
        }
        ledger.commit();
        let global = ledger.payments_metric.load(&PAYMENTS_METRIC_ID).unwrap();
        assert_eq!(global.unique_payers, 1);
        assert_eq!(global.unique_payees, 2);
    }
}
