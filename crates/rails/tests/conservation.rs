//! Conservation invariant under a full protocol flow.
//!
//! After every applied event, each token's `user_funds` must equal the sum
//! of all per-account balance rows for that token. Settlements here use a
//! zero network fee: the payer/payee transfer nets out and only the operator
//! commission leaves the user-funds pool.

mod common;

use common::{addr, assert_conserved, ev, u, Fixture};
use rails::{Dispatcher, RailsEvent};

#[tokio::test]
async fn conservation_holds_through_full_flow() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let mut dispatcher = Dispatcher::new(None);
    let f = Fixture::new();
    let carol = addr(5);

    let mut events = f.setup_events(1_000_000);
    events.extend([
        // A second depositor on the same token and one on a second token.
        ev(
            12,
            0,
            RailsEvent::DepositRecorded {
                token: f.token,
                from: carol,
                to: carol,
                amount: u(250_000),
            },
        ),
        ev(
            13,
            0,
            RailsEvent::DepositRecorded {
                token: addr(0xb),
                from: carol,
                to: carol,
                amount: u(9_999),
            },
        ),
        ev(
            101,
            0,
            RailsEvent::RailRateModified {
                rail_id: f.rail_id,
                old_rate: u(0),
                new_rate: u(100),
            },
        ),
        ev(
            102,
            0,
            RailsEvent::RailLockupModified {
                rail_id: f.rail_id,
                old_lockup_period: u(0),
                new_lockup_period: u(10),
                old_lockup_fixed: u(0),
                new_lockup_fixed: u(500),
            },
        ),
        // Settle 1000 = 990 net + 10 commission, no network fee.
        ev(
            120,
            0,
            RailsEvent::RailSettled {
                rail_id: f.rail_id,
                total_settled_amount: u(1000),
                total_net_payee_amount: u(990),
                operator_commission: u(10),
                network_fee: u(0),
                settled_upto: u(120),
            },
        ),
        // One-time payment: 200 net + 5 commission + 3 fee to the recipient.
        ev(
            121,
            0,
            RailsEvent::RailOneTimePaymentProcessed {
                rail_id: f.rail_id,
                net_payee_amount: u(200),
                operator_commission: u(5),
                network_fee: u(3),
            },
        ),
        ev(
            130,
            0,
            RailsEvent::WithdrawRecorded {
                token: f.token,
                from: f.bob,
                to: f.bob,
                amount: u(500),
            },
        ),
        ev(
            140,
            0,
            RailsEvent::RailTerminated {
                rail_id: f.rail_id,
                by: f.operator,
                end_epoch: u(150),
            },
        ),
        ev(
            160,
            0,
            RailsEvent::RailFinalized {
                rail_id: f.rail_id,
            },
        ),
    ]);

    for event in events {
        dispatcher.apply(&event).await;
        assert_conserved(&dispatcher);
    }

    // The commissions (10 + 5) are the only user-funds leakage.
    let ledger = dispatcher.ledger();
    let token = ledger.tokens.load(&f.token).unwrap();
    assert_eq!(
        token.user_funds,
        u(1_000_000 + 250_000 - 10 - 5 - 500),
        "deposits minus commissions minus withdrawal"
    );
}

#[tokio::test]
async fn skipped_events_leave_conservation_intact() {
    let mut dispatcher = Dispatcher::new(None);
    let f = Fixture::new();
    common::apply_all(&mut dispatcher, f.setup_events(10_000)).await;

    // Settlement for an unknown rail, withdrawal for an unknown account,
    // termination of an unknown rail: all skipped.
    let junk = vec![
        ev(
            200,
            0,
            RailsEvent::RailSettled {
                rail_id: u(999),
                total_settled_amount: u(1),
                total_net_payee_amount: u(1),
                operator_commission: u(0),
                network_fee: u(0),
                settled_upto: u(200),
            },
        ),
        ev(
            201,
            0,
            RailsEvent::WithdrawRecorded {
                token: f.token,
                from: addr(0x77),
                to: addr(0x77),
                amount: u(5),
            },
        ),
        ev(
            202,
            0,
            RailsEvent::RailTerminated {
                rail_id: u(999),
                by: f.operator,
                end_epoch: u(210),
            },
        ),
    ];
    for event in junk {
        let applied = dispatcher.apply(&event).await;
        assert!(!applied);
        assert_conserved(&dispatcher);
    }
    let token = dispatcher.ledger().tokens.load(&f.token).unwrap();
    assert_eq!(token.user_funds, u(10_000));
}
