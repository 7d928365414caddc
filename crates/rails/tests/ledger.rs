//! Ledger robustness: clamping, idempotency, dedup, and metric rollups.

mod common;

use common::{addr, ev, tx_hash, u, Fixture};
use rails::entities::PAYMENTS_METRIC_ID;
use rails::{Dispatcher, RailsEvent};

#[tokio::test]
async fn usage_ledgers_never_underflow() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let mut dispatcher = Dispatcher::new(None);
    let f = Fixture::new();
    let mut events = f.setup_events(1_000_000);
    // Rate up, then an exaggerated rate decrease the ledger never saw going
    // up: the subtraction clamps at zero instead of wrapping.
    events.push(ev(
        101,
        0,
        RailsEvent::RailRateModified {
            rail_id: f.rail_id,
            old_rate: u(0),
            new_rate: u(10),
        },
    ));
    events.push(ev(
        102,
        0,
        RailsEvent::RailRateModified {
            rail_id: f.rail_id,
            old_rate: u(500),
            new_rate: u(1),
        },
    ));
    // Lockup shrink larger than anything committed.
    events.push(ev(
        103,
        0,
        RailsEvent::RailLockupModified {
            rail_id: f.rail_id,
            old_lockup_period: u(50),
            new_lockup_period: u(0),
            old_lockup_fixed: u(1_000_000),
            new_lockup_fixed: u(0),
        },
    ));
    common::apply_all(&mut dispatcher, events).await;

    let ledger = dispatcher.ledger();
    let approval = ledger
        .operator_approvals
        .load(&(f.alice, f.operator, f.token))
        .unwrap();
    let aggregate = ledger.operator_tokens.load(&(f.operator, f.token)).unwrap();
    // Clamped results stay small; a wraparound would be astronomically large.
    assert_eq!(approval.rate_usage, u(0));
    assert_eq!(aggregate.rate_usage, u(0));
    assert_eq!(approval.lockup_usage, u(0));
    assert_eq!(aggregate.lockup_usage, u(0));
}

#[tokio::test]
async fn lockup_snapshot_replay_is_idempotent() {
    let mut dispatcher = Dispatcher::new(None);
    let f = Fixture::new();
    let snapshot = RailsEvent::AccountLockupSettled {
        token: f.token,
        owner: f.alice,
        lockup_current: u(777),
        lockup_rate: u(9),
        lockup_last_settled_at: u(50),
    };
    dispatcher.apply(&ev(50, 0, snapshot.clone())).await;
    let first = dispatcher
        .ledger()
        .user_tokens
        .load(&(f.alice, f.token))
        .unwrap();
    dispatcher.apply(&ev(50, 1, snapshot)).await;
    let second = dispatcher
        .ledger()
        .user_tokens
        .load(&(f.alice, f.token))
        .unwrap();
    assert_eq!(first.lockup_current, second.lockup_current);
    assert_eq!(first.lockup_rate, second.lockup_rate);
    assert_eq!(first.lockup_last_settled_at, second.lockup_last_settled_at);
}

#[tokio::test]
async fn termination_settles_then_drops_lockup_rate() {
    let mut dispatcher = Dispatcher::new(None);
    let f = Fixture::new();
    let mut events = f.setup_events(1_000_000);
    // Contract snapshot says alice streams at 7/epoch since block 100.
    events.push(ev(
        100,
        1,
        RailsEvent::AccountLockupSettled {
            token: f.token,
            owner: f.alice,
            lockup_current: u(0),
            lockup_rate: u(7),
            lockup_last_settled_at: u(100),
        },
    ));
    events.push(ev(
        101,
        0,
        RailsEvent::RailRateModified {
            rail_id: f.rail_id,
            old_rate: u(0),
            new_rate: u(7),
        },
    ));
    events.push(ev(
        110,
        0,
        RailsEvent::RailTerminated {
            rail_id: f.rail_id,
            by: f.operator,
            end_epoch: u(120),
        },
    ));
    common::apply_all(&mut dispatcher, events).await;

    let user = dispatcher
        .ledger()
        .user_tokens
        .load(&(f.alice, f.token))
        .unwrap();
    // Accrual ran to the termination block (7 * 10 epochs) before the rate
    // contribution was removed.
    assert_eq!(user.lockup_current, u(70));
    assert_eq!(user.lockup_last_settled_at, u(110));
    assert_eq!(user.lockup_rate, u(0));
}

#[tokio::test]
async fn one_time_payment_flow() {
    let mut dispatcher = Dispatcher::new(None);
    let f = Fixture::new();
    let mut events = f.setup_events(1_000_000);
    events.push(ev(
        101,
        0,
        RailsEvent::RailLockupModified {
            rail_id: f.rail_id,
            old_lockup_period: u(0),
            new_lockup_period: u(0),
            old_lockup_fixed: u(0),
            new_lockup_fixed: u(10_000),
        },
    ));
    events.push(ev(
        105,
        0,
        RailsEvent::RailOneTimePaymentProcessed {
            rail_id: f.rail_id,
            net_payee_amount: u(600),
            operator_commission: u(30),
            network_fee: u(12),
        },
    ));
    common::apply_all(&mut dispatcher, events).await;

    let ledger = dispatcher.ledger();
    let rail = ledger.rails.load(&f.rail_id).unwrap();
    assert_eq!(rail.lockup_fixed, u(10_000 - 600));
    assert_eq!(
        ledger.user_tokens.load(&(f.alice, f.token)).unwrap().funds,
        u(1_000_000 - 642)
    );
    assert_eq!(
        ledger.user_tokens.load(&(f.bob, f.token)).unwrap().funds,
        u(600)
    );
    assert_eq!(
        ledger
            .user_tokens
            .load(&(f.fee_recipient, f.token))
            .unwrap()
            .funds,
        u(12)
    );
    let approval = ledger
        .operator_approvals
        .load(&(f.alice, f.operator, f.token))
        .unwrap();
    // Allowance 1e9 from the fixture, lockup usage 10_000 from the lockup
    // modification, both drawn down by the full 642.
    assert_eq!(approval.lockup_allowance, u(1_000_000_000 - 642));
    assert_eq!(approval.lockup_usage, u(10_000 - 642));
    let record = ledger.one_time_payments.load(&(tx_hash(105, 0), 0)).unwrap();
    assert_eq!(record.total_amount, u(642));
    assert_eq!(record.net_payee_amount, u(600));
    assert_eq!(record.operator_commission, u(30));
    assert_eq!(record.network_fee, u(12));
}

#[tokio::test]
async fn finalization_releases_remaining_commitment() {
    let mut dispatcher = Dispatcher::new(None);
    let f = Fixture::new();
    let mut events = f.setup_events(1_000_000);
    events.push(ev(
        101,
        0,
        RailsEvent::RailRateModified {
            rail_id: f.rail_id,
            old_rate: u(0),
            new_rate: u(100),
        },
    ));
    events.push(ev(
        102,
        0,
        RailsEvent::RailLockupModified {
            rail_id: f.rail_id,
            old_lockup_period: u(0),
            new_lockup_period: u(10),
            old_lockup_fixed: u(0),
            new_lockup_fixed: u(500),
        },
    ));
    events.push(ev(
        110,
        0,
        RailsEvent::RailTerminated {
            rail_id: f.rail_id,
            by: f.operator,
            end_epoch: u(115),
        },
    ));
    events.push(ev(
        120,
        0,
        RailsEvent::RailFinalized {
            rail_id: f.rail_id,
        },
    ));
    common::apply_all(&mut dispatcher, events).await;

    let ledger = dispatcher.ledger();
    let approval = ledger
        .operator_approvals
        .load(&(f.alice, f.operator, f.token))
        .unwrap();
    let aggregate = ledger.operator_tokens.load(&(f.operator, f.token)).unwrap();
    assert_eq!(approval.rate_usage, u(0));
    assert_eq!(approval.lockup_usage, u(0));
    assert_eq!(aggregate.rate_usage, u(0));
    assert_eq!(aggregate.lockup_usage, u(0));
}

#[tokio::test]
async fn settlement_replay_is_deduplicated() {
    let mut dispatcher = Dispatcher::new(None);
    let f = Fixture::new();
    let mut events = f.setup_events(1_000_000);
    events.push(ev(
        101,
        0,
        RailsEvent::RailRateModified {
            rail_id: f.rail_id,
            old_rate: u(0),
            new_rate: u(10),
        },
    ));
    common::apply_all(&mut dispatcher, events).await;

    let settle = RailsEvent::RailSettled {
        rail_id: f.rail_id,
        total_settled_amount: u(100),
        total_net_payee_amount: u(99),
        operator_commission: u(1),
        network_fee: u(0),
        settled_upto: u(110),
    };
    assert!(dispatcher.apply(&ev(110, 0, settle.clone())).await);
    assert!(
        !dispatcher.apply(&ev(110, 0, settle)).await,
        "same (tx_hash, log_index) must not double-apply"
    );
    let ledger = dispatcher.ledger();
    assert_eq!(ledger.rails.load(&f.rail_id).unwrap().total_settlements, 1);
    assert_eq!(
        ledger.user_tokens.load(&(f.alice, f.token)).unwrap().funds,
        u(1_000_000 - 100)
    );
    assert_eq!(ledger.settlements.len(), 1);
}

#[tokio::test]
async fn metric_rollups_accumulate() {
    let mut dispatcher = Dispatcher::new(None);
    let f = Fixture::new();
    let mut events = f.setup_events(1_000_000);
    events.push(ev(
        101,
        0,
        RailsEvent::RailRateModified {
            rail_id: f.rail_id,
            old_rate: u(0),
            new_rate: u(10),
        },
    ));
    events.push(ev(
        110,
        0,
        RailsEvent::RailSettled {
            rail_id: f.rail_id,
            total_settled_amount: u(300),
            total_net_payee_amount: u(297),
            operator_commission: u(3),
            network_fee: u(0),
            settled_upto: u(110),
        },
    ));
    common::apply_all(&mut dispatcher, events).await;

    let ledger = dispatcher.ledger();
    let global = ledger.payments_metric.load(&PAYMENTS_METRIC_ID).unwrap();
    assert_eq!(global.total_rails, 1);
    assert_eq!(global.total_tokens, 1);
    assert_eq!(global.total_operators, 1);
    assert_eq!(global.active_rails, 1);
    assert_eq!(global.zero_rate_rails, 0);
    assert_eq!(global.unique_payers, 1);
    assert_eq!(global.unique_payees, 1);
    assert_eq!(global.total_deposits, u(1_000_000));
    assert_eq!(global.total_settled, u(300));
    assert_eq!(global.total_commission, u(3));
    assert_eq!(global.total_settlements, 1);

    // All fixture events land in the same week bucket.
    let week = rails::metrics::week_bucket(1_700_000_000);
    let weekly = ledger.weekly_metrics.load(&week).unwrap();
    assert_eq!(weekly.deposit_count, 1);
    assert_eq!(weekly.rails_created, 1);
    assert_eq!(weekly.settlements, 1);
    assert_eq!(weekly.settled_amount, u(300));

    let day = rails::metrics::day_bucket(1_700_000_000 + 110 * 30);
    let token_day = ledger
        .daily_token_metrics
        .load(&(day.clone(), f.token))
        .unwrap();
    assert_eq!(token_day.settled_amount, u(300));
    let operator_day = ledger
        .daily_operator_metrics
        .load(&(day, f.operator))
        .unwrap();
    assert_eq!(operator_day.settled_amount, u(300));
    assert_eq!(operator_day.commission_earned, u(3));
}

#[tokio::test]
async fn duplicate_rail_creation_is_skipped() {
    let mut dispatcher = Dispatcher::new(None);
    let f = Fixture::new();
    common::apply_all(&mut dispatcher, f.setup_events(1_000)).await;

    let duplicate = ev(
        150,
        0,
        RailsEvent::RailCreated {
            rail_id: f.rail_id,
            payer: addr(0x71),
            payee: addr(0x72),
            token: f.token,
            operator: f.operator,
            validator: addr(0x73),
            service_fee_recipient: addr(0x74),
            commission_rate_bps: u(9999),
        },
    );
    assert!(!dispatcher.apply(&duplicate).await);
    let rail = dispatcher.ledger().rails.load(&f.rail_id).unwrap();
    assert_eq!(rail.payer, f.alice, "original rail untouched");
    assert_eq!(
        dispatcher
            .ledger()
            .payments_metric
            .load(&PAYMENTS_METRIC_ID)
            .unwrap()
            .total_rails,
        1
    );
}
