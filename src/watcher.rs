// ─────────────────────────────────────────────────────────────────────────────
// watcher.rs — Block Watcher: newHeads subscription + per-block log filtering
//
// For every new head: PairCreated logs on the V2 factory (WETH pairs only,
// enriched with reserves and the LP minter), Sync refreshes for the tracked
// inventory, then one BlockData tick downstream. The inventory mirror is
// maintained from the execution ack stream.
//
// Reconnects resume with newer blocks only; missed blocks are not
// back-filled (targets are transient).
// ─────────────────────────────────────────────────────────────────────────────
use std::sync::{Arc, Mutex};

use ethers_core::types::{Address, H256, U256};
use futures_util::{stream, SinkExt, StreamExt};
use log::{error, info, warn};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;

use crate::data::{BlockData, ExecutionAck, Pair, TxStatus};
use crate::gateway::{
    encode_address, pair_created_topic, sync_topic, transfer_topic, ChainClient, LogFilter, RawLog,
};

const LOG_FETCH_CONCURRENCY: usize = 5;
const RECONNECT_DELAY_BASE_SECS: u64 = 1;
const RECONNECT_DELAY_MAX_SECS: u64 = 32;

/// Pads an address into a 32-byte topic word, the layout indexed address
/// parameters use.
pub fn topic_address(addr: Address) -> H256 {
    H256::from(encode_address(addr))
}

fn address_from_topic(topic: &H256) -> Address {
    Address::from_slice(&topic.as_bytes()[12..])
}

/// Decodes a factory PairCreated log, keeping only pairs with WETH on one
/// side. `token_index` records which side the non-WETH token occupies.
pub fn decode_pair_created(log: &RawLog, weth: Address, block_timestamp: u64) -> Option<Pair> {
    if log.topics.len() < 3 || log.data.len() < 32 {
        return None;
    }
    let token0 = address_from_topic(&log.topics[1]);
    let token1 = address_from_topic(&log.topics[2]);
    let pair_address = Address::from_slice(&log.data[12..32]);

    if token1 == weth {
        Some(Pair::new(pair_address, token0, 0, block_timestamp))
    } else if token0 == weth {
        Some(Pair::new(pair_address, token1, 1, block_timestamp))
    } else {
        None
    }
}

/// Decodes a pair Sync log into its raw (reserve0, reserve1) words.
pub fn decode_sync(log: &RawLog) -> Option<(U256, U256)> {
    if log.data.len() < 64 {
        return None;
    }
    Some((
        U256::from_big_endian(&log.data[0..32]),
        U256::from_big_endian(&log.data[32..64]),
    ))
}

/// Decodes a pair Swap log into [amount0In, amount1In, amount0Out, amount1Out].
pub fn decode_swap_amounts(log: &RawLog) -> Option<[U256; 4]> {
    if log.data.len() < 128 {
        return None;
    }
    Some([
        U256::from_big_endian(&log.data[0..32]),
        U256::from_big_endian(&log.data[32..64]),
        U256::from_big_endian(&log.data[64..96]),
        U256::from_big_endian(&log.data[96..128]),
    ])
}

/// The first non-zero-target Transfer recipient in the creation block is the
/// LP minter, recorded as the pair creator.
pub fn first_lp_minter(logs: &[RawLog]) -> Option<Address> {
    for log in logs {
        if log.topics.len() >= 3 {
            let to = address_from_topic(&log.topics[2]);
            if to != Address::zero() {
                return Some(to);
            }
        }
    }
    None
}

pub struct BlockWatcher {
    chain: Arc<dyn ChainClient>,
    wss_url: String,
    factory_address: Address,
    weth_address: Address,
    block_sender: mpsc::Sender<BlockData>,
    /// Mirror of the strategy's open positions, fed by the ack stream.
    inventory: Mutex<Vec<Pair>>,
}

impl BlockWatcher {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        wss_url: &str,
        factory_address: Address,
        weth_address: Address,
        block_sender: mpsc::Sender<BlockData>,
    ) -> Arc<Self> {
        Arc::new(Self {
            chain,
            wss_url: wss_url.to_string(),
            factory_address,
            weth_address,
            block_sender,
            inventory: Mutex::new(Vec::new()),
        })
    }

    pub async fn run(self: Arc<Self>, ack_receiver: mpsc::Receiver<ExecutionAck>) {
        let mirror = self.clone();
        tokio::spawn(async move {
            mirror.listen_acks(ack_receiver).await;
        });
        self.listen_block().await;
    }

    // ─── newHeads subscription ───────────────────────────────────────────────

    async fn listen_block(&self) {
        let mut retry_delay = RECONNECT_DELAY_BASE_SECS;

        loop {
            let url = match Url::parse(&self.wss_url) {
                Ok(url) => url,
                Err(e) => {
                    error!("[WATCHER] invalid WSS url {}: {}", self.wss_url, e);
                    return;
                }
            };

            info!("[WATCHER] connecting websocket {}", self.wss_url);
            match connect_async(url).await {
                Ok((ws_stream, _)) => {
                    info!("[WATCHER] websocket connected");
                    retry_delay = RECONNECT_DELAY_BASE_SECS;

                    let (mut write, mut read) = ws_stream.split();
                    let subscribe = serde_json::json!({
                        "id": 1,
                        "jsonrpc": "2.0",
                        "method": "eth_subscribe",
                        "params": ["newHeads"],
                    });
                    if let Err(e) = write.send(Message::Text(subscribe.to_string())).await {
                        error!("[WATCHER] subscribe failed: {}", e);
                        continue;
                    }

                    while let Some(msg) = read.next().await {
                        match msg {
                            Ok(Message::Text(text)) => {
                                if let Ok(parsed) = serde_json::from_str::<Value>(&text) {
                                    if parsed["method"] == "eth_subscription" {
                                        let head = &parsed["params"]["result"];
                                        if let Some(tick) = self.handle_head(head).await {
                                            if self.block_sender.send(tick).await.is_err() {
                                                warn!("[WATCHER] block channel closed, stopping");
                                                return;
                                            }
                                        }
                                    }
                                }
                            }
                            Ok(Message::Ping(payload)) => {
                                let _ = write.send(Message::Pong(payload)).await;
                            }
                            Ok(Message::Close(_)) => {
                                warn!("[WATCHER] websocket closed by server, reconnect...");
                                break;
                            }
                            Err(e) => {
                                error!("[WATCHER] websocket error: {}, reconnect...", e);
                                break;
                            }
                            _ => {}
                        }
                    }
                }
                Err(e) => {
                    error!(
                        "[WATCHER] websocket connect failed: {}. Retrying in {}s",
                        e, retry_delay
                    );
                }
            }

            tokio::time::sleep(std::time::Duration::from_secs(retry_delay)).await;
            retry_delay = std::cmp::min(retry_delay * 2, RECONNECT_DELAY_MAX_SECS);
        }
    }

    fn parse_head_quantity(head: &Value, key: &str) -> u64 {
        head[key]
            .as_str()
            .and_then(|s| u64::from_str_radix(s.trim_start_matches("0x"), 16).ok())
            .unwrap_or(0)
    }

    async fn handle_head(&self, head: &Value) -> Option<BlockData> {
        let block_number = Self::parse_head_quantity(head, "number");
        if block_number == 0 {
            return None;
        }
        let block_timestamp = Self::parse_head_quantity(head, "timestamp");
        log::debug!("[WATCHER] new head #{} ts {}", block_number, block_timestamp);

        let (pairs, inventory) = tokio::join!(
            self.discover_pairs(block_number, block_timestamp),
            self.refresh_inventory(block_number)
        );

        if !pairs.is_empty() {
            info!("[WATCHER] block #{} found {} new pairs", block_number, pairs.len());
        }

        Some(BlockData {
            block_number,
            block_timestamp,
            base_fee: Self::parse_head_quantity(head, "baseFeePerGas"),
            gas_used: Self::parse_head_quantity(head, "gasUsed"),
            gas_limit: Self::parse_head_quantity(head, "gasLimit"),
            pairs,
            inventory,
        })
    }

    // ─── pair discovery ──────────────────────────────────────────────────────

    async fn discover_pairs(&self, block_number: u64, block_timestamp: u64) -> Vec<Pair> {
        let filter = LogFilter {
            address: Some(self.factory_address),
            topic0: Some(pair_created_topic()),
            from_block: block_number,
            to_block: block_number,
        };
        let logs = match self.chain.get_logs(&filter).await {
            Ok(logs) => logs,
            Err(e) => {
                error!("[WATCHER] PairCreated filter error at #{}: {}", block_number, e);
                return Vec::new();
            }
        };

        let pairs: Vec<Pair> = logs
            .iter()
            .filter_map(|log| decode_pair_created(log, self.weth_address, block_timestamp))
            .collect();

        stream::iter(
            pairs
                .into_iter()
                .map(|pair| self.enrich_pair(pair, block_number)),
        )
        .buffer_unordered(LOG_FETCH_CONCURRENCY)
        .collect()
        .await
    }

    /// Fetches reserves and the LP minter for a freshly created pair.
    async fn enrich_pair(&self, mut pair: Pair, block_number: u64) -> Pair {
        match self.chain.get_reserves(pair.address).await {
            Ok((reserve0, reserve1)) => pair.assign_reserves(reserve0, reserve1),
            Err(e) => error!("[WATCHER] getReserves {:?} error {}", pair.address, e),
        }

        let filter = LogFilter {
            address: Some(pair.address),
            topic0: Some(transfer_topic()),
            from_block: block_number,
            to_block: block_number,
        };
        match self.chain.get_logs(&filter).await {
            Ok(logs) => pair.creator = first_lp_minter(&logs),
            Err(e) => error!("[WATCHER] Transfer filter {:?} error {}", pair.address, e),
        }

        pair
    }

    // ─── inventory refresh ───────────────────────────────────────────────────

    async fn refresh_inventory(&self, block_number: u64) -> Vec<Pair> {
        let tracked: Vec<Pair> = self.inventory.lock().unwrap().clone();
        if tracked.is_empty() {
            return Vec::new();
        }

        let futures: Vec<
            std::pin::Pin<
                Box<dyn std::future::Future<Output = Option<(Address, (U256, U256))>> + Send + '_>,
            >,
        > = tracked
            .iter()
            .map(|pair| {
                Box::pin(self.fetch_latest_sync(pair.address, block_number))
                    as std::pin::Pin<
                        Box<dyn std::future::Future<Output = Option<(Address, (U256, U256))>> + Send + '_>,
                    >
            })
            .collect();

        let updates: Vec<Option<(Address, (U256, U256))>> = stream::iter(futures)
            .buffer_unordered(LOG_FETCH_CONCURRENCY)
            .collect()
            .await;

        let mut inventory = self.inventory.lock().unwrap();
        for (address, reserves) in updates.into_iter().flatten() {
            if let Some(pair) = inventory.iter_mut().find(|p| p.address == address) {
                log::debug!("[WATCHER] update reserves for inventory pair {:?}", address);
                pair.assign_reserves(reserves.0, reserves.1);
            }
        }
        inventory.clone()
    }

    async fn fetch_latest_sync(
        &self,
        pair: Address,
        block_number: u64,
    ) -> Option<(Address, (U256, U256))> {
        let filter = LogFilter {
            address: Some(pair),
            topic0: Some(sync_topic()),
            from_block: block_number,
            to_block: block_number,
        };
        match self.chain.get_logs(&filter).await {
            Ok(logs) => logs
                .iter()
                .rev()
                .find_map(decode_sync)
                .map(|reserves| (pair, reserves)),
            Err(e) => {
                error!("[WATCHER] Sync filter {:?} error {}", pair, e);
                None
            }
        }
    }

    // ─── inventory mirror maintenance ────────────────────────────────────────

    pub async fn listen_acks(&self, mut receiver: mpsc::Receiver<ExecutionAck>) {
        while let Some(ack) = receiver.recv().await {
            warn!("[WATCHER] receive ack for {:?}", ack.pair.address);
            if ack.is_buy && ack.tx_status == TxStatus::Success {
                let known = self
                    .inventory
                    .lock()
                    .unwrap()
                    .iter()
                    .any(|p| p.address == ack.pair.address);
                if !known {
                    self.add_pair_to_inventory(ack.pair).await;
                }
            } else if !ack.is_buy {
                self.remove_pair_from_inventory(ack.pair.address);
            }
        }
    }

    async fn add_pair_to_inventory(&self, mut pair: Pair) {
        match self.chain.get_reserves(pair.address).await {
            Ok((reserve0, reserve1)) => pair.assign_reserves(reserve0, reserve1),
            Err(e) => error!("[WATCHER] getReserves {:?} error {}", pair.address, e),
        }
        let mut inventory = self.inventory.lock().unwrap();
        inventory.push(pair);
        warn!("[WATCHER] inventory length {}", inventory.len());
    }

    fn remove_pair_from_inventory(&self, address: Address) {
        let mut inventory = self.inventory.lock().unwrap();
        let before = inventory.len();
        inventory.retain(|p| p.address != address);
        if inventory.len() != before {
            warn!("[WATCHER] removed pair {:?}, inventory length {}", address, inventory.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    use crate::data::WEI_PER_ETH;
    use crate::gateway::{BlockHeader, CallRequest, RpcError, StateOverride, TxReceipt};

    fn pair_created_log(token0: Address, token1: Address, pair: Address) -> RawLog {
        RawLog {
            address: Address::repeat_byte(0xfa),
            topics: vec![
                pair_created_topic(),
                topic_address(token0),
                topic_address(token1),
            ],
            data: {
                let mut data = encode_address(pair).to_vec();
                data.extend_from_slice(&crate::gateway::encode_uint(U256::from(1u64)));
                data
            },
            block_number: 100,
        }
    }

    #[test]
    fn test_decode_pair_created_weth_as_token1() {
        let weth = Address::repeat_byte(0xee);
        let token = Address::repeat_byte(0x11);
        let pair_addr = Address::repeat_byte(0x22);

        let pair = decode_pair_created(&pair_created_log(token, weth, pair_addr), weth, 777)
            .expect("weth pair kept");
        assert_eq!(pair.address, pair_addr);
        assert_eq!(pair.token, token);
        assert_eq!(pair.token_index, 0);
        assert_eq!(pair.created_at, 777);
    }

    #[test]
    fn test_decode_pair_created_weth_as_token0() {
        let weth = Address::repeat_byte(0xee);
        let token = Address::repeat_byte(0x11);
        let pair = decode_pair_created(
            &pair_created_log(weth, token, Address::repeat_byte(0x22)),
            weth,
            0,
        )
        .unwrap();
        assert_eq!(pair.token, token);
        assert_eq!(pair.token_index, 1);
    }

    #[test]
    fn test_decode_pair_created_skips_non_weth_pairs() {
        let weth = Address::repeat_byte(0xee);
        let log = pair_created_log(
            Address::repeat_byte(0x11),
            Address::repeat_byte(0x12),
            Address::repeat_byte(0x22),
        );
        assert!(decode_pair_created(&log, weth, 0).is_none());
    }

    #[test]
    fn test_decode_sync() {
        let log = RawLog {
            address: Address::zero(),
            topics: vec![sync_topic()],
            data: {
                let mut data = crate::gateway::encode_uint(U256::from(5u64)).to_vec();
                data.extend_from_slice(&crate::gateway::encode_uint(U256::from(9u64)));
                data
            },
            block_number: 0,
        };
        assert_eq!(decode_sync(&log), Some((U256::from(5u64), U256::from(9u64))));
    }

    #[test]
    fn test_first_lp_minter_skips_zero_target() {
        let minter = Address::repeat_byte(0x77);
        let logs = vec![
            RawLog {
                address: Address::zero(),
                topics: vec![
                    transfer_topic(),
                    topic_address(Address::zero()),
                    topic_address(Address::zero()),
                ],
                data: vec![0u8; 32],
                block_number: 0,
            },
            RawLog {
                address: Address::zero(),
                topics: vec![
                    transfer_topic(),
                    topic_address(Address::zero()),
                    topic_address(minter),
                ],
                data: vec![0u8; 32],
                block_number: 0,
            },
        ];
        assert_eq!(first_lp_minter(&logs), Some(minter));
        assert_eq!(first_lp_minter(&logs[..1]), None);
    }

    // ─── mirror maintenance ──────────────────────────────────────────────────

    struct FixedReserveChain;

    #[async_trait]
    impl ChainClient for FixedReserveChain {
        async fn chain_id(&self) -> Result<u64, RpcError> {
            Ok(1)
        }
        async fn latest_block(&self) -> Result<BlockHeader, RpcError> {
            Ok(BlockHeader::default())
        }
        async fn get_logs(&self, _filter: &LogFilter) -> Result<Vec<RawLog>, RpcError> {
            Ok(Vec::new())
        }
        async fn get_reserves(&self, _pair: Address) -> Result<(U256, U256), RpcError> {
            Ok((
                U256::from(WEI_PER_ETH) * 4u64,
                U256::from(WEI_PER_ETH) * 2u64,
            ))
        }
        async fn call_with_override(
            &self,
            _req: &CallRequest,
            _overrides: &StateOverride,
        ) -> Result<Vec<u8>, RpcError> {
            Err(RpcError::Fatal("not implemented".to_string()))
        }
        async fn send_raw_transaction(&self, _raw: Vec<u8>) -> Result<H256, RpcError> {
            Err(RpcError::Fatal("not implemented".to_string()))
        }
        async fn transaction_receipt(&self, _hash: H256) -> Result<Option<TxReceipt>, RpcError> {
            Ok(None)
        }
        async fn wait_for_receipt(&self, _hash: H256) -> Result<TxReceipt, RpcError> {
            Err(RpcError::Fatal("not implemented".to_string()))
        }
        async fn transaction_count(&self, _addr: Address) -> Result<U256, RpcError> {
            Ok(U256::zero())
        }
        async fn get_balance(&self, _addr: Address) -> Result<U256, RpcError> {
            Ok(U256::zero())
        }
    }

    fn test_ack(pair: Pair, is_buy: bool, status: TxStatus) -> ExecutionAck {
        ExecutionAck {
            lead_block: 0,
            block_number: 0,
            tx_hash: "0xabc".to_string(),
            tx_status: status,
            pair,
            amount_in: dec!(1),
            amount_out: dec!(1),
            is_buy,
            signer: None,
            bot: None,
            is_paper: false,
        }
    }

    #[tokio::test]
    async fn test_mirror_add_on_buy_success_and_remove_on_sell() {
        let (block_tx, _block_rx) = mpsc::channel(8);
        let watcher = BlockWatcher::new(
            Arc::new(FixedReserveChain),
            "wss://unused.example",
            Address::zero(),
            Address::repeat_byte(0xee),
            block_tx,
        );

        let pair = Pair::new(Address::repeat_byte(0x11), Address::repeat_byte(0x12), 1, 0);

        let (ack_tx, ack_rx) = mpsc::channel(8);
        let listener = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.listen_acks(ack_rx).await })
        };

        // Successful buy adds the pair once (idempotent) with synced reserves.
        ack_tx
            .send(test_ack(pair.clone(), true, TxStatus::Success))
            .await
            .unwrap();
        ack_tx
            .send(test_ack(pair.clone(), true, TxStatus::Success))
            .await
            .unwrap();
        // Failed buys leave the mirror alone.
        ack_tx
            .send(test_ack(pair.clone(), true, TxStatus::Failed))
            .await
            .unwrap();
        // Any sell removes the pair.
        ack_tx
            .send(test_ack(pair.clone(), false, TxStatus::Failed))
            .await
            .unwrap();
        drop(ack_tx);
        listener.await.unwrap();

        assert!(watcher.inventory.lock().unwrap().is_empty());

        // Replay just the buy to check the stored reserves orientation.
        let (ack_tx, ack_rx) = mpsc::channel(8);
        let listener = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.listen_acks(ack_rx).await })
        };
        ack_tx
            .send(test_ack(pair.clone(), true, TxStatus::Success))
            .await
            .unwrap();
        drop(ack_tx);
        listener.await.unwrap();

        let inventory = watcher.inventory.lock().unwrap();
        assert_eq!(inventory.len(), 1);
        // token_index == 1 → token side is reserve1.
        assert_eq!(inventory[0].reserve_token, dec!(2));
        assert_eq!(inventory[0].reserve_eth, dec!(4));
    }
}
