use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use ethers_core::types::{Address, H256};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use crate::gateway::hex_address;

const HTTP_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub enum ExplorerError {
    Http(u16),
    Network(String),
    Malformed(String),
}

impl fmt::Display for ExplorerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExplorerError::Http(code) => write!(f, "explorer http status {}", code),
            ExplorerError::Network(msg) => write!(f, "explorer network error: {}", msg),
            ExplorerError::Malformed(msg) => write!(f, "explorer malformed response: {}", msg),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceCodeInfo {
    #[serde(rename = "SourceCode", default)]
    pub source_code: String,
    #[serde(rename = "ContractName", default)]
    pub contract_name: String,
    #[serde(rename = "Library", default)]
    pub library: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TxListEntry {
    #[serde(default)]
    pub txreceipt_status: String,
    #[serde(default)]
    pub to: String,
    #[serde(rename = "methodId", default)]
    pub method_id: String,
}

impl TxListEntry {
    pub fn is_success(&self) -> bool {
        self.txreceipt_status == "1"
    }

    pub fn is_to(&self, addr: Address) -> bool {
        self.to.eq_ignore_ascii_case(&hex_address(addr))
    }
}

// ─── Traits consumed by the inspector and the strategy ────────────────────────

#[async_trait]
pub trait ExplorerApi: Send + Sync {
    async fn get_source_code(&self, token: Address)
        -> Result<Option<SourceCodeInfo>, ExplorerError>;
    async fn get_contract_creation(&self, token: Address)
        -> Result<Option<H256>, ExplorerError>;
    async fn get_txlist(
        &self,
        address: Address,
        start_block: u64,
        end_block: u64,
        page_size: u32,
    ) -> Result<Vec<TxListEntry>, ExplorerError>;
}

#[async_trait]
pub trait GasOracle: Send + Sync {
    /// Suggested base fee in gwei, `None` when the oracle is unreachable.
    async fn suggest_base_fee(&self) -> Option<Decimal>;
}

// ─── HTTP client ──────────────────────────────────────────────────────────────

/// Etherscan-compatible API client. API keys are round-robined across every
/// request to spread the per-key rate limit.
pub struct ExplorerClient {
    api_url: String,
    api_keys: Vec<String>,
    counter: AtomicUsize,
    client: reqwest::Client,
}

impl ExplorerClient {
    pub fn new(api_url: &str, api_keys: Vec<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .expect("reqwest client build");
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            api_keys,
            counter: AtomicUsize::new(0),
            client,
        }
    }

    fn select_api_key(&self) -> &str {
        if self.api_keys.is_empty() {
            return "";
        }
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        &self.api_keys[(n + 1) % self.api_keys.len()]
    }

    async fn get(&self, query: &str) -> Result<Value, ExplorerError> {
        let url = format!(
            "{}/api?{}&apikey={}",
            self.api_url,
            query,
            self.select_api_key()
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ExplorerError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ExplorerError::Http(response.status().as_u16()));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ExplorerError::Malformed(e.to_string()))
    }

    fn status_ok(payload: &Value) -> bool {
        payload["status"]
            .as_str()
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(0)
            == 1
    }
}

#[async_trait]
impl ExplorerApi for ExplorerClient {
    async fn get_source_code(
        &self,
        token: Address,
    ) -> Result<Option<SourceCodeInfo>, ExplorerError> {
        let payload = self
            .get(&format!(
                "module=contract&action=getsourcecode&address={}",
                hex_address(token)
            ))
            .await?;

        if !Self::status_ok(&payload) {
            return Ok(None);
        }
        let first = match payload["result"].as_array().and_then(|arr| arr.first()) {
            Some(v) => v.clone(),
            None => return Ok(None),
        };
        serde_json::from_value::<SourceCodeInfo>(first)
            .map(Some)
            .map_err(|e| ExplorerError::Malformed(e.to_string()))
    }

    async fn get_contract_creation(
        &self,
        token: Address,
    ) -> Result<Option<H256>, ExplorerError> {
        let payload = self
            .get(&format!(
                "module=contract&action=getcontractcreation&contractaddresses={}",
                hex_address(token)
            ))
            .await?;

        if !Self::status_ok(&payload) {
            return Ok(None);
        }
        let tx_hash = payload["result"][0]["txHash"].as_str().unwrap_or("");
        if tx_hash.is_empty() {
            return Ok(None);
        }
        let bytes = hex::decode(tx_hash.trim_start_matches("0x"))
            .map_err(|e| ExplorerError::Malformed(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(ExplorerError::Malformed(format!(
                "creation tx hash has {} bytes",
                bytes.len()
            )));
        }
        Ok(Some(H256::from_slice(&bytes)))
    }

    async fn get_txlist(
        &self,
        address: Address,
        start_block: u64,
        end_block: u64,
        page_size: u32,
    ) -> Result<Vec<TxListEntry>, ExplorerError> {
        let payload = self
            .get(&format!(
                "module=account&action=txlist&address={}&startblock={}&endblock={}&page=1&offset={}&sort=desc",
                hex_address(address),
                start_block,
                end_block,
                page_size
            ))
            .await?;

        // status 0 with "No transactions found" is a legitimate empty window.
        if !Self::status_ok(&payload) {
            return Ok(Vec::new());
        }
        let entries = payload["result"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| serde_json::from_value::<TxListEntry>(v.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();
        Ok(entries)
    }
}

#[async_trait]
impl GasOracle for ExplorerClient {
    async fn suggest_base_fee(&self) -> Option<Decimal> {
        let payload = self
            .get("module=gastracker&action=gasoracle")
            .await
            .map_err(|e| log::error!("[EXPLORER] gas oracle error:: {}", e))
            .ok()?;
        payload["result"]["suggestBaseFee"]
            .as_str()
            .and_then(|s| s.parse::<Decimal>().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_txlist_entry_deserialization() {
        let raw = serde_json::json!({
            "txreceipt_status": "1",
            "to": "0x22a0005b11e76128239401f237c512962b32a38b",
            "methodId": "0x095ea7b3",
            "blockNumber": "41665828"
        });
        let entry: TxListEntry = serde_json::from_value(raw).unwrap();
        assert!(entry.is_success());
        assert_eq!(entry.method_id, "0x095ea7b3");

        let token: Address = "0x22a0005b11e76128239401f237c512962b32a38b"
            .parse()
            .unwrap();
        assert!(entry.is_to(token));
        assert!(!entry.is_to(Address::zero()));
    }

    #[test]
    fn test_txlist_entry_tolerates_missing_fields() {
        let entry: TxListEntry = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(!entry.is_success());
        assert_eq!(entry.method_id, "");
    }

    #[test]
    fn test_api_key_rotation_cycles() {
        let client = ExplorerClient::new(
            "https://api.example.org",
            vec!["k0".to_string(), "k1".to_string(), "k2".to_string()],
        );
        let picks: Vec<String> = (0..6).map(|_| client.select_api_key().to_string()).collect();
        assert_eq!(picks, vec!["k1", "k2", "k0", "k1", "k2", "k0"]);
    }

    #[test]
    fn test_source_info_field_names() {
        let raw = serde_json::json!({
            "SourceCode": "contract Token {}",
            "ContractName": "Token",
            "Library": ""
        });
        let info: SourceCodeInfo = serde_json::from_value(raw).unwrap();
        assert_eq!(info.contract_name, "Token");
        assert!(info.library.is_empty());
    }
}
