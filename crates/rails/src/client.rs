//! JSON-RPC client for backfill queries and inline read-calls.
//!
//! Read-calls performed during event handling (ERC-20 metadata, the
//! contract's network-fee constant) are bounded by the HTTP client timeout
//! and fall back to documented defaults on any failure; they never stall the
//! stream.

use crate::abi::{
    self, decode_string_return, decode_u256_return, decode_u8_return, TokenMetadata,
    DECIMALS_SELECTOR, NAME_SELECTOR, SYMBOL_SELECTOR,
};
use alloy::primitives::{Address, U256};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("RPC error: {0}")]
    Rpc(String),
    #[error("decode error: {0}")]
    Decode(String),
}

async fn http_json_rpc(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Value,
    id: u64,
) -> Result<Value, ClientError> {
    let body = json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params
    });
    let resp = client.post(url).json(&body).send().await?;
    let json: Value = resp.json().await?;
    if let Some(err) = json.get("error") {
        return Err(ClientError::Rpc(err.to_string()));
    }
    json.get("result")
        .cloned()
        .ok_or_else(|| ClientError::Decode("Missing result".into()))
}

/// HTTP JSON-RPC client bound to one endpoint and one Rails contract.
#[derive(Debug, Clone)]
pub struct ChainClient {
    http: reqwest::Client,
    http_url: String,
    contract: Address,
}

impl ChainClient {
    pub fn new(http_url: impl Into<String>, contract: Address) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(ClientError::Http)?;
        Ok(Self {
            http,
            http_url: http_url.into(),
            contract,
        })
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    /// Latest block number via eth_blockNumber.
    pub async fn block_number(&self) -> Result<u64, ClientError> {
        let result = http_json_rpc(&self.http, &self.http_url, "eth_blockNumber", json!([]), 1)
            .await?;
        let s = result
            .as_str()
            .ok_or_else(|| ClientError::Decode("blockNumber not string".into()))?;
        abi::parse_hex_u64(s).map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// Timestamp of block `number` via eth_getBlockByNumber (header only).
    pub async fn block_timestamp(&self, number: u64) -> Result<u64, ClientError> {
        let result = http_json_rpc(
            &self.http,
            &self.http_url,
            "eth_getBlockByNumber",
            json!([format!("0x{:x}", number), false]),
            2,
        )
        .await?;
        let s = result
            .get("timestamp")
            .and_then(|t| t.as_str())
            .ok_or_else(|| ClientError::Decode("block has no timestamp".into()))?;
        abi::parse_hex_u64(s).map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// Raw eth_getLogs with a prebuilt filter object.
    pub async fn get_logs(&self, filter: Value) -> Result<Vec<Value>, ClientError> {
        let result =
            http_json_rpc(&self.http, &self.http_url, "eth_getLogs", json!([filter]), 3).await?;
        result
            .as_array()
            .cloned()
            .ok_or_else(|| ClientError::Decode("getLogs not array".into()))
    }

    /// eth_call against `to` at the latest block.
    pub async fn call(&self, to: Address, calldata: &[u8]) -> Result<Vec<u8>, ClientError> {
        let params = json!([{
            "to": format!("0x{}", hex::encode(to)),
            "data": format!("0x{}", hex::encode(calldata)),
        }, "latest"]);
        let result = http_json_rpc(&self.http, &self.http_url, "eth_call", params, 4).await?;
        let s = result
            .as_str()
            .ok_or_else(|| ClientError::Decode("eth_call result not string".into()))?;
        abi::parse_hex_bytes(s).map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// ERC-20 metadata for `token`, with per-field fallback when a call
    /// reverts or returns garbage ("Unknown" / "UNKNOWN" / 18 decimals).
    pub async fn token_metadata(&self, token: Address) -> TokenMetadata {
        let fallback = TokenMetadata::fallback();
        let name = match self.call(token, &NAME_SELECTOR).await {
            Ok(bytes) => decode_string_return(&bytes).unwrap_or_else(|e| {
                tracing::warn!(token = %token, reason = %e, "decode name() failed");
                fallback.name.clone()
            }),
            Err(e) => {
                tracing::warn!(token = %token, reason = %e, "name() call failed");
                fallback.name.clone()
            }
        };
        let symbol = match self.call(token, &SYMBOL_SELECTOR).await {
            Ok(bytes) => decode_string_return(&bytes).unwrap_or_else(|e| {
                tracing::warn!(token = %token, reason = %e, "decode symbol() failed");
                fallback.symbol.clone()
            }),
            Err(e) => {
                tracing::warn!(token = %token, reason = %e, "symbol() call failed");
                fallback.symbol.clone()
            }
        };
        let decimals = match self.call(token, &DECIMALS_SELECTOR).await {
            Ok(bytes) => decode_u8_return(&bytes).unwrap_or(fallback.decimals),
            Err(e) => {
                tracing::warn!(token = %token, reason = %e, "decimals() call failed");
                fallback.decimals
            }
        };
        TokenMetadata {
            name,
            symbol,
            decimals,
        }
    }

    /// The contract's NETWORK_FEE() constant; zero when the call fails.
    pub async fn network_fee(&self) -> U256 {
        match self.call(self.contract, &abi::network_fee_selector()).await {
            Ok(bytes) => decode_u256_return(&bytes).unwrap_or_else(|e| {
                tracing::warn!(reason = %e, "decode NETWORK_FEE() failed");
                U256::ZERO
            }),
            Err(e) => {
                tracing::warn!(reason = %e, "NETWORK_FEE() call failed");
                U256::ZERO
            }
        }
    }
}
