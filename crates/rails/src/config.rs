//! Indexer configuration.

use alloy::primitives::Address;

/// Indexer configuration.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// WebSocket RPC URL for live log subscription.
    pub ws_url: String,
    /// HTTP RPC URL for backfill (eth_getLogs, eth_blockNumber, eth_call).
    pub http_url: String,
    /// Rails contract address.
    pub contract_address: Address,
    /// First block to backfill from on startup.
    pub start_block: u64,
    /// Max block range per eth_getLogs request.
    pub getlogs_max_range: u64,
    /// Reconnection backoff (initial and max seconds).
    pub reconnection: ReconnectionConfig,
}

/// Reconnection backoff.
#[derive(Debug, Clone)]
pub struct ReconnectionConfig {
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            initial_backoff_secs: 1,
            max_backoff_secs: 60,
        }
    }
}
