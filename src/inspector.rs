// ─────────────────────────────────────────────────────────────────────────────
// inspector.rs — Pair Inspector: the multi-stage vetting pipeline
//
// Per pair, sequential with short-circuit rejection:
//   1. reserve window          (initial inspections reject out-of-range)
//   2. creator blacklist       (rogue creators frozen in the store)
//   3. malicious incoming txs  (explorer txlist since contract creation)
//   4. source verification     (monotonic once true)
//   5. creator-call count      (re-inspections only)
//   6. market-making swaps     (re-inspections only)
//   7. round-trip simulation   (state-override eth_call buy + sell)
//
// Batches evaluate in parallel with bounded concurrency. Explorer failures
// degrade to Unverified; they never blacklist.
// ─────────────────────────────────────────────────────────────────────────────
use std::sync::Arc;

use async_trait::async_trait;
use ethers_core::types::Address;
use futures_util::{stream, StreamExt};
use log::{error, warn};
use rust_decimal::Decimal;

use crate::data::{from_wei, InspectionResult, MaliciousKind, Pair};
use crate::explorer::ExplorerApi;
use crate::gateway::{swap_topic, ChainClient, LogFilter};
use crate::simulator::EthCallSimulator;
use crate::store::Store;

const INSPECT_CONCURRENCY: usize = 5;
const TXLIST_PAGE_SIZE: u32 = 100;
const CREATOR_TX_HISTORY_PAGE_SIZE: u32 = 500;

pub const APPROVE_METHOD_ID: &str = "0x095ea7b3";
pub const RENOUNCE_OWNERSHIP_METHOD_ID: &str = "0x715018a6";
pub const TRANSFER_METHOD_ID: &str = "0xa9059cbb";
/// Plain native transfers carry no calldata; the explorer reports "0x".
pub const TRANSFER_NATIVE_METHOD_ID: &str = "0x";

/// ETH probed per round trip.
fn simulation_amount() -> Decimal {
    Decimal::new(3, 3) // 0.003
}

/// Swaps below this ETH input are not counted as market making.
fn mm_tx_amount_threshold() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

fn slippage_min_bps() -> Decimal {
    Decimal::from(30)
}

fn slippage_max_bps() -> Decimal {
    Decimal::from(200)
}

/// Batch inspection seam consumed by the strategy.
#[async_trait]
pub trait Inspecting: Send + Sync {
    async fn inspect_batch(
        &self,
        pairs: Vec<Pair>,
        block_number: u64,
        is_initial: bool,
    ) -> Vec<InspectionResult>;
}

pub struct PairInspector {
    chain: Arc<dyn ChainClient>,
    explorer: Arc<dyn ExplorerApi>,
    store: Arc<Store>,
    simulator: EthCallSimulator,
    reserve_eth_min_threshold: Decimal,
    reserve_eth_max_threshold: Decimal,
    contract_verified_required: bool,
    source_deny_markers: Vec<String>,
    rogue_creator_frozen_seconds: u64,
}

impl PairInspector {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain: Arc<dyn ChainClient>,
        explorer: Arc<dyn ExplorerApi>,
        store: Arc<Store>,
        simulator: EthCallSimulator,
        reserve_eth_min_threshold: Decimal,
        reserve_eth_max_threshold: Decimal,
        contract_verified_required: bool,
        source_deny_markers: Vec<String>,
        rogue_creator_frozen_seconds: u64,
    ) -> Self {
        Self {
            chain,
            explorer,
            store,
            simulator,
            reserve_eth_min_threshold,
            reserve_eth_max_threshold,
            contract_verified_required,
            source_deny_markers,
            rogue_creator_frozen_seconds,
        }
    }

    // ─── stage 4: source verification ────────────────────────────────────────

    async fn is_contract_verified(&self, pair: &Pair) -> bool {
        if pair.contract_verified {
            return true;
        }

        match self.explorer.get_source_code(pair.token).await {
            Ok(Some(info)) => {
                if !info.library.is_empty() {
                    return false;
                }
                if !self.contract_verified_required {
                    return true;
                }
                !info.source_code.is_empty()
                    && !info.contract_name.is_empty()
                    && !self
                        .source_deny_markers
                        .iter()
                        .any(|marker| info.source_code.contains(marker.as_str()))
            }
            Ok(None) => false,
            Err(e) => {
                error!("[INSPECTOR] getsourcecode {:?} error:: {}", pair.token, e);
                false
            }
        }
    }

    // ─── stages 2 + 3: blacklist and malicious incoming txs ──────────────────

    async fn is_malicious(&self, pair: &Pair, block_number: u64) -> MaliciousKind {
        if let Some(creator) = pair.creator {
            if self
                .store
                .is_blacklisted(creator, self.rogue_creator_frozen_seconds)
            {
                warn!(
                    "[INSPECTOR] pair {:?} blacklisted due to rogue creator",
                    pair.address
                );
                return MaliciousKind::CreatorBlacklisted;
            }
        }

        let creation_tx = match self.explorer.get_contract_creation(pair.token).await {
            Ok(Some(tx_hash)) => tx_hash,
            Ok(None) => return MaliciousKind::Unverified,
            Err(e) => {
                error!("[INSPECTOR] getcontractcreation error {}", e);
                return MaliciousKind::Unverified;
            }
        };

        let creation_block = match self.chain.transaction_receipt(creation_tx).await {
            Ok(Some(receipt)) => receipt.block_number,
            Ok(None) => return MaliciousKind::Unverified,
            Err(e) => {
                error!("[INSPECTOR] creation receipt error {}", e);
                return MaliciousKind::Unverified;
            }
        };

        let txlist = match self
            .explorer
            .get_txlist(pair.token, creation_block, block_number, TXLIST_PAGE_SIZE)
            .await
        {
            Ok(entries) => entries,
            Err(e) => {
                error!("[INSPECTOR] txlist error {}", e);
                return MaliciousKind::Unverified;
            }
        };

        let allowed = [
            APPROVE_METHOD_ID,
            RENOUNCE_OWNERSHIP_METHOD_ID,
            TRANSFER_METHOD_ID,
            TRANSFER_NATIVE_METHOD_ID,
        ];
        for tx in &txlist {
            if tx.is_success() && tx.is_to(pair.token) && !allowed.contains(&tx.method_id.as_str())
            {
                warn!(
                    "[INSPECTOR] pair {:?} malicious incoming tx method {}",
                    pair.address, tx.method_id
                );
                return MaliciousKind::MaliciousTxIn;
            }
        }

        MaliciousKind::Unmalicious
    }

    // ─── stage 5: creator contract calls since last inspection ───────────────

    async fn creator_call_count(&self, pair: &Pair, from_block: u64, to_block: u64) -> u32 {
        let txlist = match self
            .explorer
            .get_txlist(pair.token, from_block, to_block, CREATOR_TX_HISTORY_PAGE_SIZE)
            .await
        {
            Ok(entries) => entries,
            Err(e) => {
                error!("[INSPECTOR] creator txlist error {}", e);
                return 0;
            }
        };

        let excluded = [RENOUNCE_OWNERSHIP_METHOD_ID, APPROVE_METHOD_ID];
        let count = txlist
            .iter()
            .filter(|tx| {
                tx.is_success() && tx.is_to(pair.token) && !excluded.contains(&tx.method_id.as_str())
            })
            .count() as u32;

        if count > 0 {
            warn!(
                "[INSPECTOR] pair {:?} has {} abnormal incoming txs in window",
                pair.address, count
            );
        }
        count
    }

    // ─── stage 6: market-making swap count ───────────────────────────────────

    async fn number_tx_mm(&self, pair: &Pair, from_block: u64, to_block: u64) -> u32 {
        let filter = LogFilter {
            address: Some(pair.address),
            topic0: Some(swap_topic()),
            from_block,
            to_block,
        };
        let logs = match self.chain.get_logs(&filter).await {
            Ok(logs) => logs,
            Err(e) => {
                error!("[INSPECTOR] swap filter {:?} error {}", pair.address, e);
                return 0;
            }
        };

        logs.iter()
            .filter_map(crate::watcher::decode_swap_amounts)
            .filter(|amounts| {
                // The ETH side of the input is the opposite index of the token.
                let eth_in = if pair.token_index == 1 {
                    amounts[0]
                } else {
                    amounts[1]
                };
                from_wei(eth_in) > mm_tx_amount_threshold()
            })
            .count() as u32
    }

    // ─── the pipeline ────────────────────────────────────────────────────────

    pub async fn inspect_pair(
        &self,
        pair: &Pair,
        block_number: u64,
        is_initial: bool,
    ) -> InspectionResult {
        let from_block = if pair.last_inspected_block > 0 {
            pair.last_inspected_block + 1
        } else {
            block_number
        };
        let mut result = InspectionResult::new(pair.clone(), from_block, block_number);

        if pair.reserve_eth >= self.reserve_eth_min_threshold
            && pair.reserve_eth <= self.reserve_eth_max_threshold
        {
            result.reserve_inrange = true;
        }
        if is_initial && !result.reserve_inrange {
            return result;
        }

        result.is_malicious = self.is_malicious(pair, block_number).await;
        if result.is_malicious != MaliciousKind::Unmalicious {
            return result;
        }

        result.contract_verified = self.is_contract_verified(pair).await;

        if !is_initial {
            result.creator_call_count = self.creator_call_count(pair, from_block, block_number).await;
            if result.creator_call_count > 0 {
                return result;
            }

            result.number_tx_mm = self.number_tx_mm(pair, from_block, block_number).await;
        }

        if let Some(simulation) = self.simulator.inspect_pair(pair, simulation_amount()).await {
            if simulation.slippage > slippage_min_bps() && simulation.slippage < slippage_max_bps() {
                result.simulation_result = Some(simulation);
            } else {
                warn!(
                    "[INSPECTOR] simulation rejected due to abnormal slippage {}",
                    simulation.slippage
                );
            }
        }

        result
    }

    pub async fn inspect_batch_inner(
        &self,
        pairs: Vec<Pair>,
        block_number: u64,
        is_initial: bool,
    ) -> Vec<InspectionResult> {
        let futures: Vec<
            std::pin::Pin<Box<dyn std::future::Future<Output = InspectionResult> + Send + '_>>,
        > = pairs
            .iter()
            .map(|pair| {
                Box::pin(self.inspect_pair(pair, block_number, is_initial))
                    as std::pin::Pin<Box<dyn std::future::Future<Output = InspectionResult> + Send + '_>>
            })
            .collect();

        stream::iter(futures)
            .buffer_unordered(INSPECT_CONCURRENCY)
            .collect()
            .await
    }
}

#[async_trait]
impl Inspecting for PairInspector {
    async fn inspect_batch(
        &self,
        pairs: Vec<Pair>,
        block_number: u64,
        is_initial: bool,
    ) -> Vec<InspectionResult> {
        self.inspect_batch_inner(pairs, block_number, is_initial).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers_core::types::{H256, U256};
    use rust_decimal_macros::dec;

    use crate::explorer::{ExplorerError, SourceCodeInfo, TxListEntry};
    use crate::gateway::{
        balance_storage_index, decode_address_word, encode_uint, func_selector, hex_address,
        BlockHeader, CallRequest, RawLog, RpcError, StateOverride, TxReceipt,
    };
    use crate::watcher::topic_address;

    const RATE: u64 = 1_000;
    const FEE_BPS: u64 = 100;

    struct MockExplorer {
        source: Option<SourceCodeInfo>,
        creation_tx: Option<H256>,
        txlist: Vec<TxListEntry>,
        fail: bool,
    }

    impl Default for MockExplorer {
        fn default() -> Self {
            Self {
                source: Some(SourceCodeInfo {
                    source_code: "contract Token {}".to_string(),
                    contract_name: "Token".to_string(),
                    library: String::new(),
                }),
                creation_tx: Some(H256::repeat_byte(0x01)),
                txlist: Vec::new(),
                fail: false,
            }
        }
    }

    #[async_trait]
    impl ExplorerApi for MockExplorer {
        async fn get_source_code(
            &self,
            _token: Address,
        ) -> Result<Option<SourceCodeInfo>, ExplorerError> {
            if self.fail {
                return Err(ExplorerError::Http(502));
            }
            Ok(self.source.clone())
        }

        async fn get_contract_creation(
            &self,
            _token: Address,
        ) -> Result<Option<H256>, ExplorerError> {
            if self.fail {
                return Err(ExplorerError::Http(502));
            }
            Ok(self.creation_tx)
        }

        async fn get_txlist(
            &self,
            _address: Address,
            _start_block: u64,
            _end_block: u64,
            _page_size: u32,
        ) -> Result<Vec<TxListEntry>, ExplorerError> {
            if self.fail {
                return Err(ExplorerError::Http(502));
            }
            Ok(self.txlist.clone())
        }
    }

    /// A healthy mock token chain: balances at slot 0, 1% round-trip fee,
    /// creation receipt at block 10, configurable swap history.
    struct MockTokenChain {
        token: Address,
        bot: Address,
        swap_logs: Vec<RawLog>,
    }

    #[async_trait]
    impl ChainClient for MockTokenChain {
        async fn chain_id(&self) -> Result<u64, RpcError> {
            Ok(1)
        }
        async fn latest_block(&self) -> Result<BlockHeader, RpcError> {
            Ok(BlockHeader::default())
        }
        async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, RpcError> {
            if filter.topic0 == Some(swap_topic()) {
                return Ok(self.swap_logs.clone());
            }
            Ok(Vec::new())
        }
        async fn get_reserves(&self, _pair: Address) -> Result<(U256, U256), RpcError> {
            Err(RpcError::Fatal("not implemented".to_string()))
        }

        async fn call_with_override(
            &self,
            req: &CallRequest,
            overrides: &StateOverride,
        ) -> Result<Vec<u8>, RpcError> {
            let selector: [u8; 4] = req.data[0..4].try_into().unwrap();
            let slot_value = |owner: Address| -> Option<U256> {
                overrides
                    .get(&self.token)?
                    .state_diff
                    .as_ref()?
                    .get(&balance_storage_index(owner, 0))
                    .map(|v| U256::from_big_endian(v.as_bytes()))
            };

            if selector == func_selector("balanceOf(address)") {
                let owner = decode_address_word(&req.data[4..]).unwrap();
                return Ok(encode_uint(slot_value(owner).unwrap_or_default()).to_vec());
            }
            if selector == func_selector("buy(address,uint256)") {
                let spent = req.value.unwrap_or_default();
                let mut out = encode_uint(U256::from(32u64)).to_vec();
                out.extend_from_slice(&encode_uint(U256::from(2u64)));
                out.extend_from_slice(&encode_uint(spent));
                out.extend_from_slice(&encode_uint(spent * U256::from(RATE)));
                return Ok(out);
            }
            if selector == func_selector("sell(address,address,uint256)") {
                let tokens = slot_value(self.bot)
                    .ok_or_else(|| RpcError::Fatal("no balance override".to_string()))?;
                let net = tokens / U256::from(RATE) * U256::from(10_000 - FEE_BPS)
                    / U256::from(10_000u64);
                let mut out = encode_uint(U256::from(32u64)).to_vec();
                out.extend_from_slice(&encode_uint(U256::from(2u64)));
                out.extend_from_slice(&encode_uint(tokens));
                out.extend_from_slice(&encode_uint(net));
                return Ok(out);
            }
            Err(RpcError::Fatal("unknown selector".to_string()))
        }

        async fn send_raw_transaction(&self, _raw: Vec<u8>) -> Result<H256, RpcError> {
            Err(RpcError::Fatal("not implemented".to_string()))
        }
        async fn transaction_receipt(&self, hash: H256) -> Result<Option<TxReceipt>, RpcError> {
            Ok(Some(TxReceipt {
                tx_hash: hash,
                block_number: 10,
                status: 1,
                logs: Vec::new(),
            }))
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

    fn temp_store() -> Arc<Store> {
        Arc::new(Store::load(std::env::temp_dir().join(format!(
            "snipe-inspector-test-{}.json",
            uuid::Uuid::new_v4()
        ))))
    }

    fn sample_pair() -> Pair {
        let mut pair = Pair::new(Address::repeat_byte(0x55), Address::repeat_byte(0x22), 1, 0);
        pair.reserve_eth = dec!(5);
        pair.reserve_token = dec!(5000000000);
        pair.creator = Some(Address::repeat_byte(0xcc));
        pair
    }

    fn inspector_with(
        explorer: MockExplorer,
        swap_logs: Vec<RawLog>,
        store: Arc<Store>,
    ) -> PairInspector {
        let pair = sample_pair();
        let bot = Address::repeat_byte(0x33);
        let chain = Arc::new(MockTokenChain {
            token: pair.token,
            bot,
            swap_logs,
        });
        let simulator =
            EthCallSimulator::new(chain.clone(), Address::repeat_byte(0x44), bot, 9);
        PairInspector::new(
            chain,
            Arc::new(explorer),
            store,
            simulator,
            dec!(1),
            dec!(20),
            true,
            vec!["family".to_string()],
            86_400,
        )
    }

    fn tx_entry(method_id: &str, to: Address, success: bool) -> TxListEntry {
        TxListEntry {
            txreceipt_status: if success { "1" } else { "0" }.to_string(),
            to: hex_address(to),
            method_id: method_id.to_string(),
        }
    }

    fn swap_log(pair: &Pair, amount0_in_eth: Decimal, amount1_in_eth: Decimal) -> RawLog {
        let to_word = |d: Decimal| encode_uint(crate::data::to_wei(d));
        let mut data = to_word(amount0_in_eth).to_vec();
        data.extend_from_slice(&to_word(amount1_in_eth));
        data.extend_from_slice(&encode_uint(U256::zero()));
        data.extend_from_slice(&encode_uint(U256::zero()));
        RawLog {
            address: pair.address,
            topics: vec![swap_topic(), topic_address(Address::zero())],
            data,
            block_number: 0,
        }
    }

    #[tokio::test]
    async fn test_happy_path_initial_inspection_reaches_simulation() {
        let inspector = inspector_with(MockExplorer::default(), Vec::new(), temp_store());
        let result = inspector.inspect_pair(&sample_pair(), 100, true).await;

        assert!(result.reserve_inrange);
        assert_eq!(result.is_malicious, MaliciousKind::Unmalicious);
        assert!(result.contract_verified);
        let sim = result.simulation_result.expect("simulation accepted");
        // 1% mock fee → 100 bps, inside (30, 200).
        assert_eq!(sim.slippage, dec!(100));
        // First inspection covers only the tick block.
        assert_eq!(result.from_block, 100);
        assert_eq!(result.to_block, 100);
    }

    #[tokio::test]
    async fn test_initial_inspection_rejects_out_of_range_reserves() {
        let inspector = inspector_with(MockExplorer::default(), Vec::new(), temp_store());
        let mut pair = sample_pair();
        pair.reserve_eth = dec!(100); // above the 20 ETH ceiling

        let result = inspector.inspect_pair(&pair, 100, true).await;
        assert!(!result.reserve_inrange);
        assert!(result.simulation_result.is_none());
        // Rejected before any explorer work.
        assert_eq!(result.is_malicious, MaliciousKind::Unmalicious);
    }

    #[tokio::test]
    async fn test_blacklisted_creator_never_reaches_simulation() {
        let store = temp_store();
        let pair = sample_pair();
        store.add_blacklist(&[pair.creator.unwrap()]);

        let inspector = inspector_with(MockExplorer::default(), Vec::new(), store);
        let result = inspector.inspect_pair(&pair, 100, true).await;

        assert_eq!(result.is_malicious, MaliciousKind::CreatorBlacklisted);
        assert!(result.simulation_result.is_none());
    }

    #[tokio::test]
    async fn test_unknown_method_into_token_is_malicious() {
        let pair = sample_pair();
        let explorer = MockExplorer {
            txlist: vec![
                tx_entry(APPROVE_METHOD_ID, pair.token, true),
                tx_entry("0xdeadbeef", pair.token, true),
            ],
            ..Default::default()
        };
        let inspector = inspector_with(explorer, Vec::new(), temp_store());
        let result = inspector.inspect_pair(&pair, 100, true).await;
        assert_eq!(result.is_malicious, MaliciousKind::MaliciousTxIn);
        assert!(result.simulation_result.is_none());
    }

    #[tokio::test]
    async fn test_failed_unknown_method_is_ignored() {
        let pair = sample_pair();
        let explorer = MockExplorer {
            txlist: vec![tx_entry("0xdeadbeef", pair.token, false)],
            ..Default::default()
        };
        let inspector = inspector_with(explorer, Vec::new(), temp_store());
        let result = inspector.inspect_pair(&pair, 100, true).await;
        assert_eq!(result.is_malicious, MaliciousKind::Unmalicious);
    }

    #[tokio::test]
    async fn test_explorer_outage_degrades_to_unverified() {
        let explorer = MockExplorer {
            fail: true,
            ..Default::default()
        };
        let inspector = inspector_with(explorer, Vec::new(), temp_store());
        let result = inspector.inspect_pair(&sample_pair(), 100, true).await;
        assert_eq!(result.is_malicious, MaliciousKind::Unverified);
        assert!(result.simulation_result.is_none());
    }

    #[tokio::test]
    async fn test_deny_marker_blocks_verification_but_not_simulation() {
        let explorer = MockExplorer {
            source: Some(SourceCodeInfo {
                source_code: "contract Token { /* family */ }".to_string(),
                contract_name: "Token".to_string(),
                library: String::new(),
            }),
            ..Default::default()
        };
        let inspector = inspector_with(explorer, Vec::new(), temp_store());
        let result = inspector.inspect_pair(&sample_pair(), 100, true).await;
        assert!(!result.contract_verified);
        assert!(result.simulation_result.is_some());
    }

    #[tokio::test]
    async fn test_reinspection_rejects_on_creator_calls() {
        let pair = {
            let mut p = sample_pair();
            p.last_inspected_block = 90;
            p
        };
        // A transfer is harmless for the malicious-tx stage but counts as a
        // creator call in the re-inspection window.
        let explorer = MockExplorer {
            txlist: vec![tx_entry(TRANSFER_METHOD_ID, pair.token, true)],
            ..Default::default()
        };
        let inspector = inspector_with(explorer, Vec::new(), temp_store());
        let result = inspector.inspect_pair(&pair, 100, false).await;

        assert_eq!(result.from_block, 91);
        assert_eq!(result.creator_call_count, 1);
        assert!(result.simulation_result.is_none());
    }

    #[tokio::test]
    async fn test_reinspection_counts_mm_swaps_on_eth_side() {
        let pair = sample_pair(); // token_index == 1 → ETH input is amount0In
        let swap_logs = vec![
            swap_log(&pair, dec!(0.02), dec!(0)),  // counted
            swap_log(&pair, dec!(0.005), dec!(0)), // below threshold
            swap_log(&pair, dec!(0), dec!(0.05)),  // wrong side
        ];
        let inspector = inspector_with(MockExplorer::default(), swap_logs, temp_store());
        let result = inspector.inspect_pair(&pair, 100, false).await;

        assert_eq!(result.number_tx_mm, 1);
        assert!(result.simulation_result.is_some());
    }

    #[tokio::test]
    async fn test_batch_returns_one_result_per_pair() {
        let inspector = inspector_with(MockExplorer::default(), Vec::new(), temp_store());
        let mut other = sample_pair();
        other.address = Address::repeat_byte(0x56);
        let results = inspector
            .inspect_batch_inner(vec![sample_pair(), other], 100, true)
            .await;
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_pipeline_constants() {
        assert_eq!(mm_tx_amount_threshold(), dec!(0.01));
        assert_eq!(simulation_amount(), dec!(0.003));
        assert_eq!(slippage_min_bps(), dec!(30));
        assert_eq!(slippage_max_bps(), dec!(200));
    }
}
