//! RailsIndexer: observed-only indexing of Rails contract events.
//!
//! Backfills via HTTP on startup/reconnect, then follows live logs over
//! WebSocket. Logs are filtered client-side against the Rails topic table,
//! ordered by (block_number, log_index), and fed one at a time into the
//! [Dispatcher]. Observed-only: no reorg safety or confirmations; recovery
//! from a reorg is a replay from start_block, which re-derives identical
//! state.

use crate::abi::{decode_log_to_observed, EventTopics, ObservedEvent};
use crate::client::ChainClient;
use crate::config::IndexerConfig;
use crate::cursor::Cursor;
use crate::dispatcher::Dispatcher;
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Address-only getLogs filter; topic filtering happens client-side because
/// the Rails contract emits eleven event kinds we all care about.
fn build_logs_filter(address: &alloy::primitives::Address, from_block: Option<u64>, to_block: Option<u64>) -> Value {
    let mut filter = json!({
        "address": format!("0x{}", hex::encode(address)),
    });
    if let Some(from) = from_block {
        filter["fromBlock"] = Value::String(format!("0x{:x}", from));
    }
    if let Some(to) = to_block {
        filter["toBlock"] = Value::String(format!("0x{:x}", to));
    }
    filter
}

/// True if the log's topic0 is one of the Rails events.
fn log_matches_rails_event(topics: &EventTopics, log: &Value) -> bool {
    let t0 = match log
        .get("topics")
        .and_then(|t| t.as_array())
        .and_then(|t| t.first())
        .and_then(|t| t.as_str())
    {
        Some(s) => s,
        None => return false,
    };
    let bytes = match hex::decode(t0.strip_prefix("0x").unwrap_or(t0)) {
        Ok(b) if b.len() == 32 => b,
        _ => return false,
    };
    let mut topic0 = [0u8; 32];
    topic0.copy_from_slice(&bytes);
    topics.matches(&topic0)
}

/// Rails indexer: follows contract logs, backfills via HTTP, maintains the
/// derived ledger behind a shared read lock.
pub struct RailsIndexer {
    config: IndexerConfig,
    topics: EventTopics,
    client: ChainClient,
    dispatcher: Arc<RwLock<Dispatcher>>,
    event_tx: broadcast::Sender<ObservedEvent>,
}

impl RailsIndexer {
    pub fn new(config: IndexerConfig) -> Result<Self> {
        let client = ChainClient::new(config.http_url.clone(), config.contract_address)
            .context("build chain client")?;
        let dispatcher = Arc::new(RwLock::new(Dispatcher::new(Some(client.clone()))));
        let (event_tx, _) = broadcast::channel(256);
        Ok(Self {
            config,
            topics: EventTopics::new(),
            client,
            dispatcher,
            event_tx,
        })
    }

    /// Subscribe to applied events (ordered by block_number, log_index).
    pub fn subscribe(&self) -> broadcast::Receiver<ObservedEvent> {
        self.event_tx.subscribe()
    }

    /// Shared handle to the dispatcher for read access to the ledger.
    pub fn dispatcher(&self) -> Arc<RwLock<Dispatcher>> {
        Arc::clone(&self.dispatcher)
    }

    /// Run the indexer (blocking on the async loop). Call from a spawned task.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let reconnection = self.config.reconnection.clone();
        let mut cursor = Cursor::new(self.config.start_block.saturating_sub(1));
        loop {
            match run_once(Arc::clone(&self), &mut cursor).await {
                Ok(()) => {
                    sleep(Duration::from_secs(reconnection.initial_backoff_secs)).await;
                }
                Err(e) => {
                    tracing::warn!(reason = %e, "RailsIndexer failed, reconnecting...");
                    let base = std::cmp::min(
                        Duration::from_secs(reconnection.initial_backoff_secs) * 2,
                        Duration::from_secs(reconnection.max_backoff_secs),
                    );
                    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..500));
                    sleep(base + jitter).await;
                }
            }
        }
    }

    /// Apply one observed event and broadcast it when it changed the ledger.
    async fn apply_observed(&self, observed: ObservedEvent) {
        let applied = self.dispatcher.write().await.apply(&observed).await;
        if applied {
            let _ = self.event_tx.send(observed);
        }
    }
}

async fn run_once(indexer: Arc<RailsIndexer>, cursor: &mut Cursor) -> Result<()> {
    let config = &indexer.config;
    let mut timestamps: HashMap<u64, u64> = HashMap::new();

    let from_block = cursor.last_processed_block + 1;
    let tip = indexer.client.block_number().await.context("block number")?;
    if from_block <= tip {
        backfill(&indexer, &mut timestamps, from_block, tip).await?;
        cursor.last_processed_block = tip;
    }

    let (ws_stream, _) = connect_async(&config.ws_url).await.context("WS connect")?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let filter = build_logs_filter(&config.contract_address, None, None);
    let sub_req = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "eth_subscribe",
        "params": ["logs", filter]
    });
    ws_sender
        .send(Message::Text(serde_json::to_string(&sub_req)?))
        .await
        .map_err(|e| anyhow::anyhow!("send subscribe: {}", e))?;

    match timeout(Duration::from_secs(10), ws_receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => {
            let v: Value = serde_json::from_str(&text).context("parse sub response")?;
            if let Some(err) = v.get("error") {
                anyhow::bail!("subscribe error: {}", err);
            }
            if v.get("result").and_then(|r| r.as_str()).is_none() {
                anyhow::bail!("subscribe response has no id");
            }
        }
        Ok(Some(Ok(_))) => anyhow::bail!("unexpected message"),
        Ok(Some(Err(e))) => return Err(anyhow::anyhow!("ws: {}", e)),
        Ok(None) => anyhow::bail!("ws closed"),
        Err(_) => anyhow::bail!("subscribe timeout"),
    }
    tracing::info!(contract = %config.contract_address, "live log subscription established");

    while let Some(msg) = ws_receiver.next().await {
        let text = match msg.map_err(|e| anyhow::anyhow!("ws: {}", e))? {
            Message::Text(t) => t,
            Message::Close(_) => break,
            _ => continue,
        };
        let v: Value = serde_json::from_str(&text).context("parse ws message")?;
        if v.get("method").and_then(|m| m.as_str()) != Some("eth_subscription") {
            continue;
        }
        let Some(log) = v.get("params").and_then(|p| p.get("result")) else {
            continue;
        };
        // The node filters by address; topic filtering is ours.
        if !log_matches_rails_event(&indexer.topics, log) {
            continue;
        }
        let block_number = match log
            .get("blockNumber")
            .and_then(|n| n.as_str())
            .and_then(|s| crate::abi::parse_hex_u64(s).ok())
        {
            Some(n) => n,
            None => continue,
        };
        let block_timestamp =
            block_timestamp_cached(&indexer.client, &mut timestamps, block_number).await;
        let observed = match decode_log_to_observed(&indexer.topics, log, block_timestamp) {
            Ok(o) => o,
            Err(e) => {
                tracing::debug!(reason = %e, "decode log skipped");
                continue;
            }
        };
        cursor.last_processed_block = cursor.last_processed_block.max(observed.block_number);
        indexer.apply_observed(observed).await;
    }
    Ok(())
}

async fn backfill(
    indexer: &RailsIndexer,
    timestamps: &mut HashMap<u64, u64>,
    from_block: u64,
    to_block: u64,
) -> Result<()> {
    let config = &indexer.config;
    let max_range = config.getlogs_max_range.max(1);
    let mut from = from_block;
    while from <= to_block {
        let to = (from + max_range - 1).min(to_block);
        let filter = build_logs_filter(&config.contract_address, Some(from), Some(to));
        let logs = indexer
            .client
            .get_logs(filter)
            .await
            .with_context(|| format!("eth_getLogs {}..={}", from, to))?;
        let matching: Vec<&Value> = logs
            .iter()
            .filter(|log| log_matches_rails_event(&indexer.topics, log))
            .collect();
        let mut observed = Vec::with_capacity(matching.len());
        for log in matching {
            let block_number = match log
                .get("blockNumber")
                .and_then(|n| n.as_str())
                .and_then(|s| crate::abi::parse_hex_u64(s).ok())
            {
                Some(n) => n,
                None => continue,
            };
            let block_timestamp =
                block_timestamp_cached(&indexer.client, timestamps, block_number).await;
            match decode_log_to_observed(&indexer.topics, log, block_timestamp) {
                Ok(o) => observed.push(o),
                Err(e) => tracing::debug!(%e, "decode log skipped"),
            }
        }
        if !observed.is_empty() {
            tracing::debug!(count = observed.len(), from, to, "backfill: decoded events");
        }
        observed.sort_by_key(|o| (o.block_number, o.log_index));
        for o in observed {
            indexer.apply_observed(o).await;
        }
        from = to + 1;
    }
    Ok(())
}

/// Block timestamp with a per-connection cache. Resolution failures log and
/// fall back to zero rather than stalling the stream; only the metric day
/// bucket depends on it.
async fn block_timestamp_cached(
    client: &ChainClient,
    cache: &mut HashMap<u64, u64>,
    number: u64,
) -> u64 {
    if let Some(ts) = cache.get(&number) {
        return *ts;
    }
    match client.block_timestamp(number).await {
        Ok(ts) => {
            cache.insert(number, ts);
            ts
        }
        Err(e) => {
            tracing::warn!(block = number, reason = %e, "block timestamp lookup failed");
            0
        }
    }
}
