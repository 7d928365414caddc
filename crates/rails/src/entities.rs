//! Derived ledger entities.
//!
//! One struct per record kind the indexer maintains. All monetary, rate, and
//! epoch fields are 256-bit unsigned integers; none of this state is ever
//! deleted, only created lazily and mutated by handlers.

use crate::abi::TokenMetadata;
use alloy::primitives::{Address, B256, U256};

/// Fixed id of the singleton [PaymentsMetric] row.
pub const PAYMENTS_METRIC_ID: &str = "payments";

/// Seconds per metrics week; week index is `timestamp / SECONDS_PER_WEEK + 1`.
pub const SECONDS_PER_WEEK: u64 = 604_800;

/// A wallet that has appeared as payer, payee, or approval client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: Address,
    pub total_rails: u64,
    pub total_approvals: u64,
    pub total_tokens: u64,
}

impl Account {
    pub fn new(id: Address) -> Self {
        Self {
            id,
            total_rails: 0,
            total_approvals: 0,
            total_tokens: 0,
        }
    }
}

/// An ERC-20 token the contract has seen funds in.
///
/// `user_funds` is the running sum of every [UserToken::funds] for this token
/// and is reconciled incrementally by each handler that moves funds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub id: Address,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub total_deposits: U256,
    pub total_withdrawals: U256,
    pub total_settled_amount: U256,
    pub user_funds: U256,
    pub volume: U256,
    pub total_users: u64,
}

impl Token {
    pub fn new(id: Address, metadata: TokenMetadata) -> Self {
        Self {
            id,
            name: metadata.name,
            symbol: metadata.symbol,
            decimals: metadata.decimals,
            total_deposits: U256::ZERO,
            total_withdrawals: U256::ZERO,
            total_settled_amount: U256::ZERO,
            user_funds: U256::ZERO,
            volume: U256::ZERO,
            total_users: 0,
        }
    }
}

/// Per-(account, token) balance and streaming lockup state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserToken {
    pub account: Address,
    pub token: Address,
    pub funds: U256,
    pub lockup_current: U256,
    pub lockup_rate: U256,
    pub lockup_last_settled_at: U256,
    pub payout: U256,
    pub funds_collected: U256,
}

impl UserToken {
    pub fn new(account: Address, token: Address) -> Self {
        Self {
            account,
            token,
            funds: U256::ZERO,
            lockup_current: U256::ZERO,
            lockup_rate: U256::ZERO,
            lockup_last_settled_at: U256::ZERO,
            payout: U256::ZERO,
            funds_collected: U256::ZERO,
        }
    }
}

/// An address acting as rail operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operator {
    pub id: Address,
    pub total_rails: u64,
    pub total_approvals: u64,
    pub total_tokens: u64,
}

impl Operator {
    pub fn new(id: Address) -> Self {
        Self {
            id,
            total_rails: 0,
            total_approvals: 0,
            total_tokens: 0,
        }
    }
}

/// Per-(client, operator, token) approval: allowance ceilings and the usage
/// committed against them. Usage never goes negative; underflow clamps to
/// zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorApproval {
    pub client: Address,
    pub operator: Address,
    pub token: Address,
    pub is_approved: bool,
    pub rate_allowance: U256,
    pub lockup_allowance: U256,
    pub max_lockup_period: U256,
    pub rate_usage: U256,
    pub lockup_usage: U256,
}

impl OperatorApproval {
    pub fn new(client: Address, operator: Address, token: Address) -> Self {
        Self {
            client,
            operator,
            token,
            is_approved: false,
            rate_allowance: U256::ZERO,
            lockup_allowance: U256::ZERO,
            max_lockup_period: U256::ZERO,
            rate_usage: U256::ZERO,
            lockup_usage: U256::ZERO,
        }
    }
}

/// Per-(operator, token) aggregate mirror of [OperatorApproval] usage,
/// summed across clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorToken {
    pub operator: Address,
    pub token: Address,
    pub rate_allowance: U256,
    pub lockup_allowance: U256,
    pub rate_usage: U256,
    pub lockup_usage: U256,
    pub volume: U256,
    pub settled_amount: U256,
    pub commission_earned: U256,
}

impl OperatorToken {
    pub fn new(operator: Address, token: Address) -> Self {
        Self {
            operator,
            token,
            rate_allowance: U256::ZERO,
            lockup_allowance: U256::ZERO,
            rate_usage: U256::ZERO,
            lockup_usage: U256::ZERO,
            volume: U256::ZERO,
            settled_amount: U256::ZERO,
            commission_earned: U256::ZERO,
        }
    }
}

/// Rail lifecycle. ZeroRate and Active are interchangeable via rate
/// transitions; Terminated and Finalized are terminal (Finalized only
/// reachable from Terminated).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RailState {
    ZeroRate,
    Active,
    Terminated,
    Finalized,
}

impl RailState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RailState::Terminated | RailState::Finalized)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RailState::ZeroRate => "ZERORATE",
            RailState::Active => "ACTIVE",
            RailState::Terminated => "TERMINATED",
            RailState::Finalized => "FINALIZED",
        }
    }
}

impl std::fmt::Display for RailState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payment rail: one payer -> payee stream mediated by an operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rail {
    pub id: U256,
    pub payer: Address,
    pub payee: Address,
    pub operator: Address,
    pub token: Address,
    pub arbiter: Address,
    pub service_fee_recipient: Address,
    pub commission_rate_bps: U256,
    pub payment_rate: U256,
    pub lockup_fixed: U256,
    pub lockup_period: U256,
    pub settled_upto: U256,
    pub state: RailState,
    pub end_epoch: U256,
    pub total_settled_amount: U256,
    pub total_net_payee_amount: U256,
    pub total_commission: U256,
    pub total_settlements: u64,
    pub total_rate_changes: u64,
    pub created_at: U256,
}

/// One rate segment recorded when a rail's rate changed before the prior
/// segment was settled. Keyed (rail_id, start_epoch); append-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateChange {
    pub rail: U256,
    pub start_epoch: U256,
    pub until_epoch: U256,
    pub rate: U256,
}

/// Immutable record of one RailSettled event. Keyed (tx_hash, log_index).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub tx_hash: B256,
    pub log_index: u64,
    pub rail: U256,
    pub total_settled_amount: U256,
    pub total_net_payee_amount: U256,
    pub operator_commission: U256,
    pub fil_burned: U256,
    pub settled_upto: U256,
}

/// Immutable record of one one-time payment. Keyed (tx_hash, log_index).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneTimePayment {
    pub tx_hash: B256,
    pub log_index: u64,
    pub rail: U256,
    pub total_amount: U256,
    pub net_payee_amount: U256,
    pub operator_commission: U256,
    pub network_fee: U256,
}

/// Global singleton counters, updated by every applied event.
///
/// The rail-state counts are gauges (a termination moves a rail from
/// active/zero-rate to terminated); everything else only grows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentsMetric {
    pub total_rails: u64,
    pub total_accounts: u64,
    pub total_operators: u64,
    pub total_tokens: u64,
    pub zero_rate_rails: u64,
    pub active_rails: u64,
    pub terminated_rails: u64,
    pub finalized_rails: u64,
    pub unique_payers: u64,
    pub unique_payees: u64,
    pub total_deposits: U256,
    pub total_withdrawals: U256,
    pub total_settled: U256,
    pub total_commission: U256,
    pub total_fil_burned: U256,
    pub total_settlements: u64,
    pub total_one_time_payments: u64,
    pub total_rate_changes: u64,
}

/// Additive per-UTC-day counters. Keyed by "YYYY-MM-DD"; never decremented.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DailyMetric {
    pub day: String,
    pub rails_created: u64,
    pub settlements: u64,
    pub one_time_payments: u64,
    pub deposit_count: u64,
    pub withdrawal_count: u64,
    pub deposit_amount: U256,
    pub withdrawal_amount: U256,
    pub settled_amount: U256,
    pub commission: U256,
    pub fil_burned: U256,
}

/// Additive per-week counters; same shape as [DailyMetric].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeeklyMetric {
    pub week: u64,
    pub rails_created: u64,
    pub settlements: u64,
    pub one_time_payments: u64,
    pub deposit_count: u64,
    pub withdrawal_count: u64,
    pub deposit_amount: U256,
    pub withdrawal_amount: U256,
    pub settled_amount: U256,
    pub commission: U256,
    pub fil_burned: U256,
}

/// Additive per-(day, token) counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DailyTokenMetric {
    pub day: String,
    pub token: Address,
    pub deposit_amount: U256,
    pub withdrawal_amount: U256,
    pub settled_amount: U256,
    pub volume: U256,
    pub settlements: u64,
}

/// Additive per-(day, operator) counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DailyOperatorMetric {
    pub day: String,
    pub operator: Address,
    pub rails_created: u64,
    pub settled_amount: U256,
    pub commission_earned: U256,
    pub volume: U256,
}
