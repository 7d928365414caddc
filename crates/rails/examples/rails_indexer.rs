//! Example: connect to an RPC endpoint and log applied Rails events.
//!
//! Imports the rails lib, runs RailsIndexer against a Rails contract, and
//! prints each applied event plus a running conservation summary per token.
//! WebSocket URL is derived from the HTTP RPC URL (http -> ws, https -> wss).
//!
//! Usage:
//!
//!   cargo run -p rails --example rails_indexer -- --rpc-url <HTTP_URL> --contract <RAILS_ADDRESS>

use alloy::primitives::Address;
use rails::{AppliedEvent, IndexerConfig, RailsIndexer};
use std::sync::Arc;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args: Vec<String> = std::env::args().collect();
    let mut rpc_url = String::new();
    let mut contract = String::new();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--rpc-url" => {
                i += 1;
                rpc_url = args.get(i).cloned().unwrap_or_default();
            }
            "--contract" => {
                i += 1;
                contract = args.get(i).cloned().unwrap_or_default();
            }
            "--help" | "-h" => {
                eprintln!(
                    "Usage: rails_indexer --rpc-url <HTTP_URL> --contract <RAILS_ADDRESS>\n\
                     Logs applied Rails events. WS URL is derived from the RPC URL."
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }
    if rpc_url.is_empty() || contract.is_empty() {
        eprintln!("Usage: rails_indexer --rpc-url <HTTP_URL> --contract <RAILS_ADDRESS>");
        eprintln!("       (WebSocket URL is derived from the RPC URL)");
        std::process::exit(1);
    }
    let http_url = rpc_url.clone();
    let ws_url = rpc_url
        .replace("http://", "ws://")
        .replace("https://", "wss://");

    let addr_hex = contract.strip_prefix("0x").unwrap_or(&contract);
    let addr_bytes = hex::decode(addr_hex)?;
    if addr_bytes.len() != 20 {
        eprintln!("contract must be 20 bytes (40 hex chars)");
        std::process::exit(1);
    }
    let contract_address = Address::from_slice(&addr_bytes);

    let config = IndexerConfig {
        ws_url,
        http_url,
        contract_address,
        start_block: 0,
        getlogs_max_range: 1000,
        reconnection: Default::default(),
    };
    let indexer = Arc::new(RailsIndexer::new(config)?);
    let mut recv = indexer.subscribe();
    let dispatcher = indexer.dispatcher();
    let indexer_clone = Arc::clone(&indexer);
    std::thread::spawn(move || {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let _ = indexer_clone.run().await;
        });
    });
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        loop {
            tokio::select! {
                Ok(ev) = recv.recv() => {
                    let summary = AppliedEvent::from_observed(&ev);
                    println!(
                        "{}",
                        serde_json::to_string(&summary).unwrap_or_else(|_| summary.event.to_string())
                    );
                    let guard = dispatcher.read().await;
                    let ledger = guard.ledger();
                    for (id, token) in ledger.tokens.iter() {
                        println!(
                            "  token 0x{} ({}) user_funds={} sum_user_funds={}",
                            hex::encode(id),
                            token.symbol,
                            token.user_funds,
                            ledger.sum_user_funds(*id)
                        );
                    }
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }
    });
    Ok(())
}
