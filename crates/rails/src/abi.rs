//! ABI types and decoding for the Rails payments contract.
//!
//! Event topics, typed event structs, and pure decoding from the JSON-RPC log
//! shape (eth_subscription / eth_getLogs results) and from eth_call returns
//! (ERC-20 metadata, NETWORK_FEE()). The accounting core only ever sees the
//! typed [ObservedEvent]; nothing downstream touches raw hex.

use alloy::primitives::{Address, B256, U256};
use anyhow::{Context, Result};
use serde_json::Value;
use sha3::{Digest, Keccak256};

/// Canonical event signatures, as declared by the Rails contract.
pub const SIG_DEPOSIT_RECORDED: &str = "DepositRecorded(address,address,address,uint256)";
pub const SIG_WITHDRAW_RECORDED: &str = "WithdrawRecorded(address,address,address,uint256)";
pub const SIG_OPERATOR_APPROVAL_UPDATED: &str =
    "OperatorApprovalUpdated(address,address,address,bool,uint256,uint256,uint256)";
pub const SIG_ACCOUNT_LOCKUP_SETTLED: &str =
    "AccountLockupSettled(address,address,uint256,uint256,uint256)";
pub const SIG_RAIL_CREATED: &str =
    "RailCreated(uint256,address,address,address,address,address,address,uint256)";
pub const SIG_RAIL_RATE_MODIFIED: &str = "RailRateModified(uint256,uint256,uint256)";
pub const SIG_RAIL_LOCKUP_MODIFIED: &str =
    "RailLockupModified(uint256,uint256,uint256,uint256,uint256)";
pub const SIG_RAIL_TERMINATED: &str = "RailTerminated(uint256,address,uint256)";
pub const SIG_RAIL_SETTLED: &str =
    "RailSettled(uint256,uint256,uint256,uint256,uint256,uint256)";
pub const SIG_RAIL_ONE_TIME_PAYMENT: &str =
    "RailOneTimePaymentProcessed(uint256,uint256,uint256,uint256)";
pub const SIG_RAIL_FINALIZED: &str = "RailFinalized(uint256)";

/// Selectors for the read-calls the indexer performs inline (ERC-20 metadata
/// and the contract's network-fee constant).
pub const NAME_SELECTOR: [u8; 4] = [0x06, 0xfd, 0xde, 0x03];
pub const SYMBOL_SELECTOR: [u8; 4] = [0x95, 0xd8, 0x9b, 0x41];
pub const DECIMALS_SELECTOR: [u8; 4] = [0x31, 0x3c, 0xe5, 0x67];

/// Keccak-256 of a canonical signature (topic0 of the emitted log).
pub fn event_topic0(signature: &str) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(signature.as_bytes());
    hasher.finalize().into()
}

/// First 4 bytes of keccak256(signature): a function selector.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = event_topic0(signature);
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Selector for NETWORK_FEE().
pub fn network_fee_selector() -> [u8; 4] {
    selector("NETWORK_FEE()")
}

/// Topic0 table for every Rails event, derived once at construction.
#[derive(Debug, Clone)]
pub struct EventTopics {
    pub deposit_recorded: [u8; 32],
    pub withdraw_recorded: [u8; 32],
    pub operator_approval_updated: [u8; 32],
    pub account_lockup_settled: [u8; 32],
    pub rail_created: [u8; 32],
    pub rail_rate_modified: [u8; 32],
    pub rail_lockup_modified: [u8; 32],
    pub rail_terminated: [u8; 32],
    pub rail_settled: [u8; 32],
    pub rail_one_time_payment: [u8; 32],
    pub rail_finalized: [u8; 32],
}

impl EventTopics {
    pub fn new() -> Self {
        Self {
            deposit_recorded: event_topic0(SIG_DEPOSIT_RECORDED),
            withdraw_recorded: event_topic0(SIG_WITHDRAW_RECORDED),
            operator_approval_updated: event_topic0(SIG_OPERATOR_APPROVAL_UPDATED),
            account_lockup_settled: event_topic0(SIG_ACCOUNT_LOCKUP_SETTLED),
            rail_created: event_topic0(SIG_RAIL_CREATED),
            rail_rate_modified: event_topic0(SIG_RAIL_RATE_MODIFIED),
            rail_lockup_modified: event_topic0(SIG_RAIL_LOCKUP_MODIFIED),
            rail_terminated: event_topic0(SIG_RAIL_TERMINATED),
            rail_settled: event_topic0(SIG_RAIL_SETTLED),
            rail_one_time_payment: event_topic0(SIG_RAIL_ONE_TIME_PAYMENT),
            rail_finalized: event_topic0(SIG_RAIL_FINALIZED),
        }
    }

    /// True if `topic0` belongs to any Rails event (client-side log filter).
    pub fn matches(&self, topic0: &[u8; 32]) -> bool {
        [
            self.deposit_recorded,
            self.withdraw_recorded,
            self.operator_approval_updated,
            self.account_lockup_settled,
            self.rail_created,
            self.rail_rate_modified,
            self.rail_lockup_modified,
            self.rail_terminated,
            self.rail_settled,
            self.rail_one_time_payment,
            self.rail_finalized,
        ]
        .contains(topic0)
    }
}

impl Default for EventTopics {
    fn default() -> Self {
        Self::new()
    }
}

/// A decoded Rails event. Parameter names follow the contract declarations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RailsEvent {
    DepositRecorded {
        token: Address,
        from: Address,
        to: Address,
        amount: U256,
    },
    WithdrawRecorded {
        token: Address,
        from: Address,
        to: Address,
        amount: U256,
    },
    OperatorApprovalUpdated {
        token: Address,
        client: Address,
        operator: Address,
        approved: bool,
        rate_allowance: U256,
        lockup_allowance: U256,
        max_lockup_period: U256,
    },
    AccountLockupSettled {
        token: Address,
        owner: Address,
        lockup_current: U256,
        lockup_rate: U256,
        lockup_last_settled_at: U256,
    },
    RailCreated {
        rail_id: U256,
        payer: Address,
        payee: Address,
        token: Address,
        operator: Address,
        validator: Address,
        service_fee_recipient: Address,
        commission_rate_bps: U256,
    },
    RailRateModified {
        rail_id: U256,
        old_rate: U256,
        new_rate: U256,
    },
    RailLockupModified {
        rail_id: U256,
        old_lockup_period: U256,
        new_lockup_period: U256,
        old_lockup_fixed: U256,
        new_lockup_fixed: U256,
    },
    RailTerminated {
        rail_id: U256,
        by: Address,
        end_epoch: U256,
    },
    RailSettled {
        rail_id: U256,
        total_settled_amount: U256,
        total_net_payee_amount: U256,
        operator_commission: U256,
        network_fee: U256,
        settled_upto: U256,
    },
    RailOneTimePaymentProcessed {
        rail_id: U256,
        net_payee_amount: U256,
        operator_commission: U256,
        network_fee: U256,
    },
    RailFinalized {
        rail_id: U256,
    },
}

impl RailsEvent {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            RailsEvent::DepositRecorded { .. } => "DepositRecorded",
            RailsEvent::WithdrawRecorded { .. } => "WithdrawRecorded",
            RailsEvent::OperatorApprovalUpdated { .. } => "OperatorApprovalUpdated",
            RailsEvent::AccountLockupSettled { .. } => "AccountLockupSettled",
            RailsEvent::RailCreated { .. } => "RailCreated",
            RailsEvent::RailRateModified { .. } => "RailRateModified",
            RailsEvent::RailLockupModified { .. } => "RailLockupModified",
            RailsEvent::RailTerminated { .. } => "RailTerminated",
            RailsEvent::RailSettled { .. } => "RailSettled",
            RailsEvent::RailOneTimePaymentProcessed { .. } => "RailOneTimePaymentProcessed",
            RailsEvent::RailFinalized { .. } => "RailFinalized",
        }
    }
}

/// Observed event with chain metadata. Events are applied in strict
/// `(block_number, log_index)` order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedEvent {
    pub emitter: Address,
    pub block_number: u64,
    pub block_timestamp: u64,
    pub tx_hash: B256,
    pub log_index: u64,
    pub event: RailsEvent,
}

/// Decode a JSON-RPC log into an [ObservedEvent].
///
/// `block_timestamp` comes from the enclosing block header (logs do not carry
/// it); the indexer resolves it before decoding. Returns an error for logs
/// whose topic0 is not a Rails event or whose payload does not match the
/// declared layout; callers skip such logs.
pub fn decode_log_to_observed(
    topics_table: &EventTopics,
    log_value: &Value,
    block_timestamp: u64,
) -> Result<ObservedEvent> {
    let emitter = parse_hex_address(
        log_value
            .get("address")
            .and_then(|a| a.as_str())
            .ok_or_else(|| anyhow::anyhow!("Missing address"))?,
    )?;
    let block_number = parse_hex_u64(
        log_value
            .get("blockNumber")
            .and_then(|n| n.as_str())
            .ok_or_else(|| anyhow::anyhow!("Missing blockNumber"))?,
    )?;
    let log_index = parse_hex_u64(
        log_value
            .get("logIndex")
            .and_then(|n| n.as_str())
            .ok_or_else(|| anyhow::anyhow!("Missing logIndex"))?,
    )?;
    let tx_hash = parse_hex_bytes_32(
        log_value
            .get("transactionHash")
            .and_then(|h| h.as_str())
            .ok_or_else(|| anyhow::anyhow!("Missing transactionHash"))?,
    )?;
    let data = parse_hex_bytes(
        log_value
            .get("data")
            .and_then(|d| d.as_str())
            .ok_or_else(|| anyhow::anyhow!("Missing data"))?,
    )?;
    let topics = log_value
        .get("topics")
        .and_then(|t| t.as_array())
        .ok_or_else(|| anyhow::anyhow!("Missing topics"))?;
    let topics: Vec<[u8; 32]> = topics
        .iter()
        .map(|t| {
            t.as_str()
                .ok_or_else(|| anyhow::anyhow!("topic not a string"))
                .and_then(parse_hex_bytes_32)
                .map(|b| b.0)
        })
        .collect::<Result<_>>()?;
    if topics.is_empty() {
        anyhow::bail!("log has no topics");
    }

    let event = decode_event(topics_table, &topics, &data)?;
    Ok(ObservedEvent {
        emitter,
        block_number,
        block_timestamp,
        tx_hash,
        log_index,
        event,
    })
}

fn decode_event(table: &EventTopics, topics: &[[u8; 32]], data: &[u8]) -> Result<RailsEvent> {
    let t0 = topics[0];
    if t0 == table.deposit_recorded || t0 == table.withdraw_recorded {
        let token = topic_address(topics, 1)?;
        let from = topic_address(topics, 2)?;
        let to = topic_address(topics, 3)?;
        let amount = data_word(data, 0)?;
        return Ok(if t0 == table.deposit_recorded {
            RailsEvent::DepositRecorded {
                token,
                from,
                to,
                amount,
            }
        } else {
            RailsEvent::WithdrawRecorded {
                token,
                from,
                to,
                amount,
            }
        });
    }
    if t0 == table.operator_approval_updated {
        return Ok(RailsEvent::OperatorApprovalUpdated {
            token: topic_address(topics, 1)?,
            client: topic_address(topics, 2)?,
            operator: topic_address(topics, 3)?,
            approved: !data_word(data, 0)?.is_zero(),
            rate_allowance: data_word(data, 1)?,
            lockup_allowance: data_word(data, 2)?,
            max_lockup_period: data_word(data, 3)?,
        });
    }
    if t0 == table.account_lockup_settled {
        return Ok(RailsEvent::AccountLockupSettled {
            token: topic_address(topics, 1)?,
            owner: topic_address(topics, 2)?,
            lockup_current: data_word(data, 0)?,
            lockup_rate: data_word(data, 1)?,
            lockup_last_settled_at: data_word(data, 2)?,
        });
    }
    if t0 == table.rail_created {
        return Ok(RailsEvent::RailCreated {
            rail_id: topic_u256(topics, 1)?,
            payer: topic_address(topics, 2)?,
            payee: topic_address(topics, 3)?,
            token: data_address(data, 0)?,
            operator: data_address(data, 1)?,
            validator: data_address(data, 2)?,
            service_fee_recipient: data_address(data, 3)?,
            commission_rate_bps: data_word(data, 4)?,
        });
    }
    if t0 == table.rail_rate_modified {
        return Ok(RailsEvent::RailRateModified {
            rail_id: topic_u256(topics, 1)?,
            old_rate: data_word(data, 0)?,
            new_rate: data_word(data, 1)?,
        });
    }
    if t0 == table.rail_lockup_modified {
        return Ok(RailsEvent::RailLockupModified {
            rail_id: topic_u256(topics, 1)?,
            old_lockup_period: data_word(data, 0)?,
            new_lockup_period: data_word(data, 1)?,
            old_lockup_fixed: data_word(data, 2)?,
            new_lockup_fixed: data_word(data, 3)?,
        });
    }
    if t0 == table.rail_terminated {
        return Ok(RailsEvent::RailTerminated {
            rail_id: topic_u256(topics, 1)?,
            by: topic_address(topics, 2)?,
            end_epoch: data_word(data, 0)?,
        });
    }
    if t0 == table.rail_settled {
        return Ok(RailsEvent::RailSettled {
            rail_id: topic_u256(topics, 1)?,
            total_settled_amount: data_word(data, 0)?,
            total_net_payee_amount: data_word(data, 1)?,
            operator_commission: data_word(data, 2)?,
            network_fee: data_word(data, 3)?,
            settled_upto: data_word(data, 4)?,
        });
    }
    if t0 == table.rail_one_time_payment {
        return Ok(RailsEvent::RailOneTimePaymentProcessed {
            rail_id: topic_u256(topics, 1)?,
            net_payee_amount: data_word(data, 0)?,
            operator_commission: data_word(data, 1)?,
            network_fee: data_word(data, 2)?,
        });
    }
    if t0 == table.rail_finalized {
        return Ok(RailsEvent::RailFinalized {
            rail_id: topic_u256(topics, 1)?,
        });
    }
    anyhow::bail!("topic0 0x{} is not a Rails event", hex::encode(t0))
}

/// Token metadata from ERC-20 read-calls, with the documented fallback when
/// the calls revert or the token is not a conforming contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

impl TokenMetadata {
    pub fn fallback() -> Self {
        Self {
            name: "Unknown".to_string(),
            symbol: "UNKNOWN".to_string(),
            decimals: 18,
        }
    }
}

/// Decode an ABI string return: (offset, len, bytes), UTF-8 lossy.
pub fn decode_string_return(data: &[u8]) -> Result<String> {
    if data.len() < 64 {
        anyhow::bail!("string return too short");
    }
    let offset = u32::from_be_bytes(data[28..32].try_into().unwrap()) as usize;
    if data.len() < offset + 32 {
        anyhow::bail!("string return too short for offset {}", offset);
    }
    let len = u32::from_be_bytes(data[offset + 28..offset + 32].try_into().unwrap()) as usize;
    if data.len() < offset + 32 + len {
        anyhow::bail!("string return too short for len {}", len);
    }
    Ok(String::from_utf8_lossy(&data[offset + 32..offset + 32 + len]).into_owned())
}

/// Decode a uint8 return (e.g. decimals()): last byte of the single word.
pub fn decode_u8_return(data: &[u8]) -> Result<u8> {
    if data.len() < 32 {
        anyhow::bail!("uint8 return too short");
    }
    Ok(data[31])
}

/// Decode a uint256 return (e.g. NETWORK_FEE()).
pub fn decode_u256_return(data: &[u8]) -> Result<U256> {
    if data.len() < 32 {
        anyhow::bail!("uint256 return too short");
    }
    Ok(U256::from_be_slice(&data[..32]))
}

fn topic_at(topics: &[[u8; 32]], i: usize) -> Result<&[u8; 32]> {
    topics
        .get(i)
        .ok_or_else(|| anyhow::anyhow!("missing topic {}", i))
}

/// Indexed address: 32-byte topic, right-aligned (last 20 bytes).
fn topic_address(topics: &[[u8; 32]], i: usize) -> Result<Address> {
    Ok(Address::from_slice(&topic_at(topics, i)?[12..]))
}

fn topic_u256(topics: &[[u8; 32]], i: usize) -> Result<U256> {
    Ok(U256::from_be_slice(topic_at(topics, i)?))
}

fn data_word(data: &[u8], i: usize) -> Result<U256> {
    let start = i * 32;
    if data.len() < start + 32 {
        anyhow::bail!("data too short for word {}", i);
    }
    Ok(U256::from_be_slice(&data[start..start + 32]))
}

fn data_address(data: &[u8], i: usize) -> Result<Address> {
    let start = i * 32;
    if data.len() < start + 32 {
        anyhow::bail!("data too short for word {}", i);
    }
    Ok(Address::from_slice(&data[start + 12..start + 32]))
}

pub(crate) fn parse_hex_u64(s: &str) -> Result<u64> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).context("parse hex u64")
}

pub(crate) fn parse_hex_bytes(s: &str) -> Result<Vec<u8>> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(s).context("parse hex bytes")
}

pub(crate) fn parse_hex_bytes_32(s: &str) -> Result<B256> {
    let bytes = parse_hex_bytes(s)?;
    if bytes.len() != 32 {
        anyhow::bail!("Expected 32 bytes, got {}", bytes.len());
    }
    Ok(B256::from_slice(&bytes))
}

pub(crate) fn parse_hex_address(s: &str) -> Result<Address> {
    let bytes = parse_hex_bytes(s)?;
    match bytes.len() {
        20 => Ok(Address::from_slice(&bytes)),
        // Indexed address in EVM is 32 bytes (right-padded); take last 20.
        32 => Ok(Address::from_slice(&bytes[12..32])),
        n => anyhow::bail!("Expected 20 or 32 bytes for address, got {}", n),
    }
}
