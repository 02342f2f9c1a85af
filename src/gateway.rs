// ─────────────────────────────────────────────────────────────────────────────
// gateway.rs — Chain Gateway: thin facade over the EVM JSON-RPC endpoint
//
// Capability surface: latest header, log filters, getReserves, eth_call with
// per-address balance/stateDiff overrides, raw tx submission, receipt waits,
// nonce and balance queries. Errors are classified Transient (retry at the
// next block) or Fatal (propagate).
// ─────────────────────────────────────────────────────────────────────────────
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use ethers_core::types::{Address, H256, U256};
use ethers_core::utils::keccak256;
use serde_json::{json, Value};

// ─── Error classification ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum RpcError {
    /// Network hiccup, rate limit, node lag. Safe to retry at the next block.
    Transient(String),
    /// Node rejected the request; retrying the same call will not help.
    Fatal(String),
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcError::Transient(msg) => write!(f, "transient rpc error: {}", msg),
            RpcError::Fatal(msg) => write!(f, "fatal rpc error: {}", msg),
        }
    }
}

// ─── ABI codec helpers ────────────────────────────────────────────────────────
// The call surface is four fixed signatures plus a handful of events, so the
// calldata is assembled by hand instead of carrying a full ABI layer.

pub fn func_selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

pub fn event_topic(signature: &str) -> H256 {
    H256::from(keccak256(signature.as_bytes()))
}

pub fn encode_address(addr: Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(addr.as_bytes());
    word
}

pub fn encode_uint(value: U256) -> [u8; 32] {
    let mut word = [0u8; 32];
    value.to_big_endian(&mut word);
    word
}

pub fn decode_uint(data: &[u8]) -> Option<U256> {
    if data.len() < 32 {
        return None;
    }
    Some(U256::from_big_endian(&data[0..32]))
}

pub fn decode_address_word(data: &[u8]) -> Option<Address> {
    if data.len() < 32 {
        return None;
    }
    Some(Address::from_slice(&data[12..32]))
}

/// Decodes an ABI-encoded dynamic `uint256[]` return value.
pub fn decode_uint_array(data: &[u8]) -> Option<Vec<U256>> {
    if data.len() < 64 {
        return None;
    }
    let offset = U256::from_big_endian(&data[0..32]);
    if offset > U256::from(data.len()) {
        return None;
    }
    let offset = offset.as_usize();
    if data.len() < offset + 32 {
        return None;
    }
    let len = U256::from_big_endian(&data[offset..offset + 32]).as_usize();
    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        let start = offset + 32 + i * 32;
        if data.len() < start + 32 {
            return None;
        }
        out.push(U256::from_big_endian(&data[start..start + 32]));
    }
    Some(out)
}

/// Solidity mapping slot for `balances[owner]` held at slot index `slot`:
/// `keccak256(pad32(owner) ‖ pad32(slot))`.
pub fn balance_storage_index(owner: Address, slot: u64) -> H256 {
    let mut buf = [0u8; 64];
    buf[0..32].copy_from_slice(&encode_address(owner));
    buf[32..64].copy_from_slice(&encode_uint(U256::from(slot)));
    H256::from(keccak256(buf))
}

// ─── Event topics ─────────────────────────────────────────────────────────────

pub fn pair_created_topic() -> H256 {
    event_topic("PairCreated(address,address,address,uint256)")
}

pub fn sync_topic() -> H256 {
    event_topic("Sync(uint112,uint112)")
}

pub fn swap_topic() -> H256 {
    event_topic("Swap(address,uint256,uint256,uint256,uint256,address)")
}

pub fn transfer_topic() -> H256 {
    event_topic("Transfer(address,address,uint256)")
}

pub fn bot_created_topic() -> H256 {
    event_topic("BotCreated(address,address)")
}

// ─── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct CallRequest {
    pub from: Option<Address>,
    pub to: Address,
    pub value: Option<U256>,
    pub data: Vec<u8>,
}

/// Per-address override injected for the duration of one `eth_call`.
#[derive(Debug, Clone, Default)]
pub struct AccountOverride {
    pub balance: Option<U256>,
    pub state_diff: Option<HashMap<H256, H256>>,
}

pub type StateOverride = HashMap<Address, AccountOverride>;

#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub address: Option<Address>,
    pub topic0: Option<H256>,
    pub from_block: u64,
    pub to_block: u64,
}

#[derive(Debug, Clone)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
    pub block_number: u64,
}

#[derive(Debug, Clone)]
pub struct TxReceipt {
    pub tx_hash: H256,
    pub block_number: u64,
    pub status: u64,
    pub logs: Vec<RawLog>,
}

#[derive(Debug, Clone, Default)]
pub struct BlockHeader {
    pub number: u64,
    pub timestamp: u64,
    pub base_fee_per_gas: u64,
    pub gas_used: u64,
    pub gas_limit: u64,
}

// ─── Chain client trait ───────────────────────────────────────────────────────

/// The RPC capability surface the rest of the engine is written against.
/// Production uses `HttpGateway`; tests substitute in-memory chains.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn chain_id(&self) -> Result<u64, RpcError>;
    async fn latest_block(&self) -> Result<BlockHeader, RpcError>;
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, RpcError>;
    async fn get_reserves(&self, pair: Address) -> Result<(U256, U256), RpcError>;
    async fn call_with_override(
        &self,
        req: &CallRequest,
        overrides: &StateOverride,
    ) -> Result<Vec<u8>, RpcError>;
    async fn send_raw_transaction(&self, raw: Vec<u8>) -> Result<H256, RpcError>;
    async fn transaction_receipt(&self, hash: H256) -> Result<Option<TxReceipt>, RpcError>;
    async fn wait_for_receipt(&self, hash: H256) -> Result<TxReceipt, RpcError>;
    async fn transaction_count(&self, addr: Address) -> Result<U256, RpcError>;
    async fn get_balance(&self, addr: Address) -> Result<U256, RpcError>;
}

// ─── HTTP JSON-RPC implementation ─────────────────────────────────────────────

const RPC_TIMEOUT_SECS: u64 = 10;
const RECEIPT_POLL_INTERVAL_MS: u64 = 1_000;
const RECEIPT_POLL_ATTEMPTS: u64 = 120;

pub struct HttpGateway {
    url: String,
    client: reqwest::Client,
    id_counter: AtomicU64,
}

pub fn hex_address(addr: Address) -> String {
    format!("0x{}", hex::encode(addr.as_bytes()))
}

pub fn hex_h256(hash: H256) -> String {
    format!("0x{}", hex::encode(hash.as_bytes()))
}

pub fn hex_u256(value: U256) -> String {
    format!("{:#x}", value)
}

pub fn hex_u64(value: u64) -> String {
    format!("{:#x}", value)
}

fn parse_quantity(value: &Value) -> Result<u64, RpcError> {
    let raw = value
        .as_str()
        .ok_or_else(|| RpcError::Fatal(format!("expected hex quantity, got {}", value)))?;
    u64::from_str_radix(raw.trim_start_matches("0x"), 16)
        .map_err(|e| RpcError::Fatal(format!("bad hex quantity '{}': {}", raw, e)))
}

fn parse_bytes(value: &Value) -> Result<Vec<u8>, RpcError> {
    let raw = value
        .as_str()
        .ok_or_else(|| RpcError::Fatal(format!("expected hex bytes, got {}", value)))?;
    hex::decode(raw.trim_start_matches("0x"))
        .map_err(|e| RpcError::Fatal(format!("bad hex bytes: {}", e)))
}

fn parse_h256(value: &Value) -> Result<H256, RpcError> {
    let bytes = parse_bytes(value)?;
    if bytes.len() != 32 {
        return Err(RpcError::Fatal(format!("expected 32 bytes, got {}", bytes.len())));
    }
    Ok(H256::from_slice(&bytes))
}

fn parse_address(value: &Value) -> Result<Address, RpcError> {
    let bytes = parse_bytes(value)?;
    if bytes.len() != 20 {
        return Err(RpcError::Fatal(format!("expected 20 bytes, got {}", bytes.len())));
    }
    Ok(Address::from_slice(&bytes))
}

fn parse_log(value: &Value) -> Result<RawLog, RpcError> {
    let topics = value["topics"]
        .as_array()
        .map(|arr| arr.iter().map(parse_h256).collect::<Result<Vec<_>, _>>())
        .transpose()?
        .unwrap_or_default();
    Ok(RawLog {
        address: parse_address(&value["address"])?,
        topics,
        data: parse_bytes(&value["data"])?,
        block_number: parse_quantity(&value["blockNumber"]).unwrap_or(0),
    })
}

fn parse_receipt(value: &Value) -> Result<TxReceipt, RpcError> {
    let logs = value["logs"]
        .as_array()
        .map(|arr| arr.iter().map(parse_log).collect::<Result<Vec<_>, _>>())
        .transpose()?
        .unwrap_or_default();
    Ok(TxReceipt {
        tx_hash: parse_h256(&value["transactionHash"])?,
        block_number: parse_quantity(&value["blockNumber"])?,
        status: parse_quantity(&value["status"])?,
        logs,
    })
}

fn override_to_json(overrides: &StateOverride) -> Value {
    let mut map = serde_json::Map::new();
    for (addr, ov) in overrides {
        let mut entry = serde_json::Map::new();
        if let Some(balance) = ov.balance {
            entry.insert("balance".to_string(), json!(hex_u256(balance)));
        }
        if let Some(diff) = &ov.state_diff {
            let mut slots = serde_json::Map::new();
            for (slot, value) in diff {
                slots.insert(hex_h256(*slot), json!(hex_h256(*value)));
            }
            entry.insert("stateDiff".to_string(), Value::Object(slots));
        }
        map.insert(hex_address(*addr), Value::Object(entry));
    }
    Value::Object(map)
}

impl HttpGateway {
    pub fn new(url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(RPC_TIMEOUT_SECS))
            .build()
            .expect("reqwest client build");
        Self {
            url: url.to_string(),
            client,
            id_counter: AtomicU64::new(1),
        }
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.id_counter.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RpcError::Transient(format!("{}: {}", method, e)))?;

        if !response.status().is_success() {
            return Err(RpcError::Transient(format!(
                "{}: http status {}",
                method,
                response.status()
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| RpcError::Transient(format!("{}: bad json: {}", method, e)))?;

        if let Some(err) = payload.get("error") {
            let message = err["message"].as_str().unwrap_or("unknown").to_string();
            // Node-side throttling surfaces as a JSON-RPC error; keep it retryable.
            if message.contains("limit") || message.contains("timeout") {
                return Err(RpcError::Transient(format!("{}: {}", method, message)));
            }
            return Err(RpcError::Fatal(format!("{}: {}", method, message)));
        }

        Ok(payload["result"].clone())
    }

    fn call_to_json(req: &CallRequest) -> Value {
        let mut tx = serde_json::Map::new();
        if let Some(from) = req.from {
            tx.insert("from".to_string(), json!(hex_address(from)));
        }
        tx.insert("to".to_string(), json!(hex_address(req.to)));
        if let Some(value) = req.value {
            tx.insert("value".to_string(), json!(hex_u256(value)));
        }
        tx.insert(
            "data".to_string(),
            json!(format!("0x{}", hex::encode(&req.data))),
        );
        Value::Object(tx)
    }
}

#[async_trait]
impl ChainClient for HttpGateway {
    async fn chain_id(&self) -> Result<u64, RpcError> {
        let result = self.rpc("eth_chainId", json!([])).await?;
        parse_quantity(&result)
    }

    async fn latest_block(&self) -> Result<BlockHeader, RpcError> {
        let result = self
            .rpc("eth_getBlockByNumber", json!(["latest", false]))
            .await?;
        Ok(BlockHeader {
            number: parse_quantity(&result["number"])?,
            timestamp: parse_quantity(&result["timestamp"])?,
            base_fee_per_gas: parse_quantity(&result["baseFeePerGas"]).unwrap_or(0),
            gas_used: parse_quantity(&result["gasUsed"]).unwrap_or(0),
            gas_limit: parse_quantity(&result["gasLimit"]).unwrap_or(0),
        })
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, RpcError> {
        let mut obj = serde_json::Map::new();
        obj.insert("fromBlock".to_string(), json!(hex_u64(filter.from_block)));
        obj.insert("toBlock".to_string(), json!(hex_u64(filter.to_block)));
        if let Some(address) = filter.address {
            obj.insert("address".to_string(), json!(hex_address(address)));
        }
        if let Some(topic0) = filter.topic0 {
            obj.insert("topics".to_string(), json!([hex_h256(topic0)]));
        }

        let result = self.rpc("eth_getLogs", json!([Value::Object(obj)])).await?;
        result
            .as_array()
            .map(|arr| arr.iter().map(parse_log).collect::<Result<Vec<_>, _>>())
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn get_reserves(&self, pair: Address) -> Result<(U256, U256), RpcError> {
        let req = CallRequest {
            from: None,
            to: pair,
            value: None,
            data: func_selector("getReserves()").to_vec(),
        };
        let out = self.call_with_override(&req, &StateOverride::new()).await?;
        if out.len() < 64 {
            return Err(RpcError::Fatal(format!(
                "getReserves returned {} bytes",
                out.len()
            )));
        }
        Ok((
            U256::from_big_endian(&out[0..32]),
            U256::from_big_endian(&out[32..64]),
        ))
    }

    async fn call_with_override(
        &self,
        req: &CallRequest,
        overrides: &StateOverride,
    ) -> Result<Vec<u8>, RpcError> {
        let params = if overrides.is_empty() {
            json!([Self::call_to_json(req), "latest"])
        } else {
            json!([Self::call_to_json(req), "latest", override_to_json(overrides)])
        };
        let result = self.rpc("eth_call", params).await?;
        parse_bytes(&result)
    }

    async fn send_raw_transaction(&self, raw: Vec<u8>) -> Result<H256, RpcError> {
        let result = self
            .rpc(
                "eth_sendRawTransaction",
                json!([format!("0x{}", hex::encode(raw))]),
            )
            .await?;
        parse_h256(&result)
    }

    async fn transaction_receipt(&self, hash: H256) -> Result<Option<TxReceipt>, RpcError> {
        let result = self
            .rpc("eth_getTransactionReceipt", json!([hex_h256(hash)]))
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        parse_receipt(&result).map(Some)
    }

    async fn wait_for_receipt(&self, hash: H256) -> Result<TxReceipt, RpcError> {
        for _ in 0..RECEIPT_POLL_ATTEMPTS {
            if let Some(receipt) = self.transaction_receipt(hash).await? {
                return Ok(receipt);
            }
            tokio::time::sleep(std::time::Duration::from_millis(RECEIPT_POLL_INTERVAL_MS)).await;
        }
        Err(RpcError::Transient(format!(
            "receipt for {} not found after {}s",
            hex_h256(hash),
            RECEIPT_POLL_ATTEMPTS
        )))
    }

    async fn transaction_count(&self, addr: Address) -> Result<U256, RpcError> {
        let result = self
            .rpc(
                "eth_getTransactionCount",
                json!([hex_address(addr), "latest"]),
            )
            .await?;
        Ok(U256::from(parse_quantity(&result)?))
    }

    async fn get_balance(&self, addr: Address) -> Result<U256, RpcError> {
        let result = self
            .rpc("eth_getBalance", json!([hex_address(addr), "latest"]))
            .await?;
        let raw = result
            .as_str()
            .ok_or_else(|| RpcError::Fatal("expected hex balance".to_string()))?;
        U256::from_str_radix(raw.trim_start_matches("0x"), 16)
            .map_err(|e| RpcError::Fatal(format!("bad balance: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_selectors() {
        assert_eq!(func_selector("transfer(address,uint256)"), [0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(func_selector("approve(address,uint256)"), [0x09, 0x5e, 0xa7, 0xb3]);
        assert_eq!(func_selector("balanceOf(address)"), [0x70, 0xa0, 0x82, 0x31]);
        assert_eq!(func_selector("getReserves()"), [0x09, 0x02, 0xf1, 0xac]);
    }

    #[test]
    fn test_encode_address_pads_left() {
        let addr: Address = Address::repeat_byte(0x11);
        let word = encode_address(addr);
        assert_eq!(&word[0..12], &[0u8; 12]);
        assert_eq!(&word[12..], addr.as_bytes());
    }

    #[test]
    fn test_uint_word_round_trip() {
        let value = U256::from(123_456_789u64);
        let word = encode_uint(value);
        assert_eq!(decode_uint(&word), Some(value));
    }

    #[test]
    fn test_decode_uint_array() {
        // Hand-assembled ABI encoding of uint256[] { 7, 9 }
        let mut data = Vec::new();
        data.extend_from_slice(&encode_uint(U256::from(32u64))); // offset
        data.extend_from_slice(&encode_uint(U256::from(2u64))); // length
        data.extend_from_slice(&encode_uint(U256::from(7u64)));
        data.extend_from_slice(&encode_uint(U256::from(9u64)));

        let decoded = decode_uint_array(&data).unwrap();
        assert_eq!(decoded, vec![U256::from(7u64), U256::from(9u64)]);
    }

    #[test]
    fn test_decode_uint_array_rejects_truncated() {
        let mut data = Vec::new();
        data.extend_from_slice(&encode_uint(U256::from(32u64)));
        data.extend_from_slice(&encode_uint(U256::from(4u64))); // claims 4 items
        data.extend_from_slice(&encode_uint(U256::from(7u64))); // provides 1
        assert!(decode_uint_array(&data).is_none());
    }

    #[test]
    fn test_balance_storage_index_is_deterministic_and_distinct() {
        let owner = Address::repeat_byte(0xab);
        let a = balance_storage_index(owner, 0);
        let b = balance_storage_index(owner, 0);
        let c = balance_storage_index(owner, 3);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, balance_storage_index(Address::repeat_byte(0xac), 0));
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity(&serde_json::json!("0x10")).unwrap(), 16);
        assert_eq!(parse_quantity(&serde_json::json!("0x0")).unwrap(), 0);
        assert!(parse_quantity(&serde_json::json!(12)).is_err());
    }

    #[test]
    fn test_override_json_shape() {
        let mut overrides = StateOverride::new();
        let mut diff = HashMap::new();
        diff.insert(H256::repeat_byte(0x01), H256::repeat_byte(0x02));
        overrides.insert(
            Address::repeat_byte(0xaa),
            AccountOverride {
                balance: Some(U256::exp10(18)),
                state_diff: Some(diff),
            },
        );

        let rendered = override_to_json(&overrides);
        let entry = &rendered[hex_address(Address::repeat_byte(0xaa))];
        assert_eq!(entry["balance"], "0xde0b6b3a7640000");
        let slot = hex_h256(H256::repeat_byte(0x01));
        assert_eq!(entry["stateDiff"][slot], hex_h256(H256::repeat_byte(0x02)));
    }
}
