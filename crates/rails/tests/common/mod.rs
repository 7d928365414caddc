//! Common helpers for integration tests.
//! Some helpers are only used by specific test binaries; allow dead_code to avoid per-binary warnings.
#![allow(dead_code)]

use alloy::primitives::{Address, B256, U256};
use rails::{Dispatcher, ObservedEvent, RailsEvent};

pub fn addr(n: u8) -> Address {
    Address::repeat_byte(n)
}

pub fn u(n: u64) -> U256 {
    U256::from(n)
}

/// Deterministic tx hash per (block, log_index) so replaying the same
/// coordinates hits the settlement/payment dedup keys.
pub fn tx_hash(block: u64, log_index: u64) -> B256 {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&block.to_be_bytes());
    bytes[8..16].copy_from_slice(&log_index.to_be_bytes());
    B256::new(bytes)
}

/// Wrap a typed event with chain coordinates. Timestamps advance 30s per
/// block from a fixed genesis so metric buckets are predictable.
pub fn ev(block: u64, log_index: u64, event: RailsEvent) -> ObservedEvent {
    ObservedEvent {
        emitter: addr(0xee),
        block_number: block,
        block_timestamp: 1_700_000_000 + block * 30,
        tx_hash: tx_hash(block, log_index),
        log_index,
        event,
    }
}

pub async fn apply_all(dispatcher: &mut Dispatcher, events: Vec<ObservedEvent>) {
    for event in events {
        dispatcher.apply(&event).await;
    }
}

/// Conservation invariant: for every token, the token-level running total
/// equals the sum over all balance rows.
pub fn assert_conserved(dispatcher: &Dispatcher) {
    let ledger = dispatcher.ledger();
    for (id, token) in ledger.tokens.iter() {
        assert_eq!(
            token.user_funds,
            ledger.sum_user_funds(*id),
            "user_funds out of sync for token {id}"
        );
    }
}

/// Standard fixture: alice deposits, approves the operator, and rail 1 is
/// created (alice -> bob) at block 100. The rail is still ZERORATE.
pub struct Fixture {
    pub token: Address,
    pub alice: Address,
    pub bob: Address,
    pub operator: Address,
    pub fee_recipient: Address,
    pub rail_id: U256,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            token: addr(0xa),
            alice: addr(1),
            bob: addr(2),
            operator: addr(3),
            fee_recipient: addr(4),
            rail_id: u(1),
        }
    }

    pub fn setup_events(&self, deposit: u64) -> Vec<ObservedEvent> {
        vec![
            ev(
                10,
                0,
                RailsEvent::DepositRecorded {
                    token: self.token,
                    from: self.alice,
                    to: self.alice,
                    amount: u(deposit),
                },
            ),
            ev(
                11,
                0,
                RailsEvent::OperatorApprovalUpdated {
                    token: self.token,
                    client: self.alice,
                    operator: self.operator,
                    approved: true,
                    rate_allowance: u(1_000_000_000),
                    lockup_allowance: u(1_000_000_000),
                    max_lockup_period: u(100),
                },
            ),
            ev(
                100,
                0,
                RailsEvent::RailCreated {
                    rail_id: self.rail_id,
                    payer: self.alice,
                    payee: self.bob,
                    token: self.token,
                    operator: self.operator,
                    validator: Address::ZERO,
                    service_fee_recipient: self.fee_recipient,
                    commission_rate_bps: u(100),
                },
            ),
        ]
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}
