//! Event dispatcher: the single entry point of the accounting core.
//!
//! Receives decoded events one at a time in `(block_number, log_index)`
//! order, resolves any read-calls the handler will need (so mutation is
//! all-or-nothing), routes to the handler, and on success records metrics
//! and commits the store's staged writes. A skipped event discards its
//! staged writes and the stream continues; only infrastructure faults are
//! allowed to surface as errors, and there are none in an in-memory store.

use crate::abi::{ObservedEvent, RailsEvent, TokenMetadata};
use crate::accounts;
use crate::client::ChainClient;
use crate::entities::{PaymentsMetric, PAYMENTS_METRIC_ID};
use crate::metrics::MetricsCollector;
use crate::rail;
use crate::store::Ledger;
use alloy::primitives::{Address, B256, U256};
use serde::Serialize;

/// One applied event, ready for JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct AppliedEvent {
    pub event: &'static str,
    pub block_number: u64,
    pub block_timestamp: u64,
    #[serde(rename = "tx_hash")]
    pub tx_hash_hex: String,
    pub log_index: u64,
}

impl AppliedEvent {
    pub fn from_observed(observed: &ObservedEvent) -> Self {
        Self {
            event: observed.event.name(),
            block_number: observed.block_number,
            block_timestamp: observed.block_timestamp,
            tx_hash_hex: hex::encode(observed.tx_hash),
            log_index: observed.log_index,
        }
    }
}

/// Per-event context handed to handlers: chain coordinates plus the results
/// of any read-calls resolved before mutation started.
#[derive(Debug, Clone)]
pub struct EventContext {
    pub block_number: u64,
    pub block_timestamp: u64,
    pub tx_hash: B256,
    pub log_index: u64,
    /// ERC-20 metadata, resolved when the event may create a token row.
    pub token_metadata: Option<TokenMetadata>,
    /// NETWORK_FEE() at settlement time; zero when unresolved.
    pub network_fee: U256,
}

impl EventContext {
    /// The event's epoch (block number) as ledger arithmetic expects it.
    pub fn epoch(&self) -> U256 {
        U256::from(self.block_number)
    }

    /// Resolved metadata, or the documented fallback.
    pub fn metadata(&self) -> TokenMetadata {
        self.token_metadata
            .clone()
            .unwrap_or_else(TokenMetadata::fallback)
    }
}

/// Routes observed events into the ledger.
///
/// Holds the derived state, the metrics collector, and an optional chain
/// client for inline read-calls. Without a client every read-call resolves
/// to its fallback, which keeps the core fully deterministic for tests and
/// offline replay.
pub struct Dispatcher {
    ledger: Ledger,
    metrics: MetricsCollector,
    client: Option<ChainClient>,
}

impl Dispatcher {
    pub fn new(client: Option<ChainClient>) -> Self {
        Self {
            ledger: Ledger::new(),
            metrics: MetricsCollector::new(),
            client,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Convenience view of the singleton counters.
    pub fn payments_metric(&self) -> PaymentsMetric {
        self.ledger
            .payments_metric
            .load(&PAYMENTS_METRIC_ID)
            .unwrap_or_default()
    }

    /// Apply one event. Returns true when the event mutated the ledger.
    pub async fn apply(&mut self, observed: &ObservedEvent) -> bool {
        let ctx = self.resolve_context(observed).await;
        let outcome = match &observed.event {
            RailsEvent::DepositRecorded {
                token,
                from,
                to,
                amount,
            } => accounts::handle_deposit(&mut self.ledger, &ctx, *token, *from, *to, *amount),
            RailsEvent::WithdrawRecorded {
                token,
                from,
                to,
                amount,
            } => accounts::handle_withdraw(&mut self.ledger, &ctx, *token, *from, *to, *amount),
            RailsEvent::OperatorApprovalUpdated {
                token,
                client,
                operator,
                approved,
                rate_allowance,
                lockup_allowance,
                max_lockup_period,
            } => accounts::handle_operator_approval_updated(
                &mut self.ledger,
                &ctx,
                *token,
                *client,
                *operator,
                *approved,
                *rate_allowance,
                *lockup_allowance,
                *max_lockup_period,
            ),
            RailsEvent::AccountLockupSettled {
                token,
                owner,
                lockup_current,
                lockup_rate,
                lockup_last_settled_at,
            } => accounts::handle_account_lockup_settled(
                &mut self.ledger,
                &ctx,
                *token,
                *owner,
                *lockup_current,
                *lockup_rate,
                *lockup_last_settled_at,
            ),
            RailsEvent::RailCreated {
                rail_id,
                payer,
                payee,
                token,
                operator,
                validator,
                service_fee_recipient,
                commission_rate_bps,
            } => rail::handle_rail_created(
                &mut self.ledger,
                &ctx,
                *rail_id,
                *payer,
                *payee,
                *token,
                *operator,
                *validator,
                *service_fee_recipient,
                *commission_rate_bps,
            ),
            RailsEvent::RailRateModified {
                rail_id,
                old_rate,
                new_rate,
            } => rail::handle_rail_rate_modified(
                &mut self.ledger,
                &ctx,
                *rail_id,
                *old_rate,
                *new_rate,
            ),
            RailsEvent::RailLockupModified {
                rail_id,
                old_lockup_period,
                new_lockup_period,
                old_lockup_fixed,
                new_lockup_fixed,
            } => rail::handle_rail_lockup_modified(
                &mut self.ledger,
                &ctx,
                *rail_id,
                *old_lockup_period,
                *new_lockup_period,
                *old_lockup_fixed,
                *new_lockup_fixed,
            ),
            RailsEvent::RailTerminated {
                rail_id,
                by,
                end_epoch,
            } => rail::handle_rail_terminated(&mut self.ledger, &ctx, *rail_id, *by, *end_epoch),
            RailsEvent::RailSettled {
                rail_id,
                total_settled_amount,
                total_net_payee_amount,
                operator_commission,
                network_fee: _,
                settled_upto,
            } => rail::handle_rail_settled(
                &mut self.ledger,
                &ctx,
                *rail_id,
                *total_settled_amount,
                *total_net_payee_amount,
                *operator_commission,
                *settled_upto,
            ),
            RailsEvent::RailOneTimePaymentProcessed {
                rail_id,
                net_payee_amount,
                operator_commission,
                network_fee,
            } => rail::handle_rail_one_time_payment(
                &mut self.ledger,
                &ctx,
                *rail_id,
                *net_payee_amount,
                *operator_commission,
                *network_fee,
            ),
            RailsEvent::RailFinalized { rail_id } => {
                rail::handle_rail_finalized(&mut self.ledger, &ctx, *rail_id)
            }
        };

        match outcome {
            Some(applied) => {
                self.metrics
                    .record(&mut self.ledger, ctx.block_timestamp, &applied);
                self.ledger.commit();
                tracing::debug!(
                    event = observed.event.name(),
                    block = observed.block_number,
                    log_index = observed.log_index,
                    "event applied"
                );
                true
            }
            None => {
                self.ledger.discard();
                false
            }
        }
    }

    /// Resolve read-calls before any mutation: token metadata for events
    /// that may create a token row, and the network-fee constant for
    /// settlements. Both are bounded and fall back on failure.
    async fn resolve_context(&self, observed: &ObservedEvent) -> EventContext {
        let mut ctx = EventContext {
            block_number: observed.block_number,
            block_timestamp: observed.block_timestamp,
            tx_hash: observed.tx_hash,
            log_index: observed.log_index,
            token_metadata: None,
            network_fee: U256::ZERO,
        };
        match &observed.event {
            RailsEvent::DepositRecorded { token, .. }
            | RailsEvent::OperatorApprovalUpdated { token, .. }
            | RailsEvent::AccountLockupSettled { token, .. }
            | RailsEvent::RailCreated { token, .. } => {
                if !self.ledger.tokens.contains(token) {
                    ctx.token_metadata = Some(self.fetch_metadata(*token).await);
                }
            }
            RailsEvent::RailSettled { .. } => {
                if let Some(client) = &self.client {
                    ctx.network_fee = client.network_fee().await;
                }
            }
            _ => {}
        }
        ctx
    }

    async fn fetch_metadata(&self, token: Address) -> TokenMetadata {
        match &self.client {
            Some(client) => client.token_metadata(token).await,
            None => TokenMetadata::fallback(),
        }
    }
}
