//! Off-chain Rails runtime: event indexing and derived payment-ledger state
//! for the Rails payments contract.
//!
//! - **RailsIndexer**: observed-only indexing of contract events (WebSocket +
//!   HTTP backfill; no reorg safety or confirmations in the indexer itself).
//! - **Dispatcher**: applies decoded events in (block_number, log_index)
//!   order against the in-memory [store::Ledger]: balances, rails, operator
//!   allowances, settlement history, and day/week metrics.
//! - Handlers never halt the stream: missing rows are logged and skipped,
//!   read-call failures fall back to documented defaults, and usage ledgers
//!   clamp at zero.

pub mod abi;
pub mod accounts;
pub mod approval;
pub mod client;
pub mod config;
pub mod cursor;
pub mod dispatcher;
pub mod entities;
pub mod indexer;
pub mod lockup;
pub mod metrics;
pub mod queue;
pub mod rail;
pub mod store;

pub use abi::{EventTopics, ObservedEvent, RailsEvent, TokenMetadata};
pub use client::{ChainClient, ClientError};
pub use config::{IndexerConfig, ReconnectionConfig};
pub use cursor::Cursor;
pub use dispatcher::{AppliedEvent, Dispatcher, EventContext};
pub use entities::{
    Account, OneTimePayment, Operator, OperatorApproval, OperatorToken, PaymentsMetric, Rail,
    RailState, RateChange, Settlement, Token, UserToken,
};
pub use indexer::RailsIndexer;
pub use metrics::{Applied, MetricsCollector};
pub use store::{Ledger, Table};
