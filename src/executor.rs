// ─────────────────────────────────────────────────────────────────────────────
// executor.rs — Executor Pool: N signing accounts, each bonded to a bot
//
// Orders are routed to exactly one account (round-robin when unaddressed,
// by signer when addressed) and processed by that account's worker task, so
// per-account ordering holds while accounts run concurrently. Live orders
// build, sign and submit an EIP-1559 transaction against the account's bot
// contract and decode the realized amount from the pair's Swap event in the
// receipt. Paper orders run the same round trip through the eth_call
// simulator instead and book the simulated output.
//
// After every ack the bot rotation state machine advances; worn-out or
// failed bots are detached and a replacement is requested from the factory.
// ─────────────────────────────────────────────────────────────────────────────
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use ethers_core::types::transaction::eip2718::TypedTransaction;
use ethers_core::types::{Address, Bytes, Eip1559TransactionRequest, U256};
use ethers_signers::{LocalWallet, Signer};
use log::{error, info, warn};
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use crate::data::{
    from_wei, to_wei, Bot, BotCreationOrder, ExecutionAck, ExecutionOrder, FactoryOrder, Pair,
    TxStatus,
};
use crate::gateway::{
    encode_address, encode_uint, func_selector, swap_topic, ChainClient, RawLog,
};
use crate::simulator::EthCallSimulator;

const DEADLINE_DELAY_SECONDS: u64 = 30;
const ACCOUNT_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub enum ExecError {
    InvalidKey(String),
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecError::InvalidKey(msg) => write!(f, "invalid executor key: {}", msg),
        }
    }
}

pub struct ExecAccount {
    pub address: Address,
    wallet: LocalWallet,
    /// The account is inactive for unaddressed orders while this is None.
    pub bot: Mutex<Option<Bot>>,
}

/// Decodes the realized output amount from the pair's Swap event: the token
/// side for buys, the ETH side for sells.
pub fn swap_amount_out(logs: &[RawLog], pair: &Pair, is_buy: bool) -> Decimal {
    let amounts = logs
        .iter()
        .filter(|log| log.address == pair.address && log.topics.first() == Some(&swap_topic()))
        .filter_map(crate::watcher::decode_swap_amounts)
        .next();

    let amounts = match amounts {
        Some(a) => a,
        None => return Decimal::ZERO,
    };

    let out_index = if is_buy {
        pair.token_index
    } else {
        1 - pair.token_index
    };
    from_wei(amounts[2 + out_index as usize])
}

pub struct ExecutorPool {
    chain: Arc<dyn ChainClient>,
    accounts: Vec<Arc<ExecAccount>>,
    ack_sender: mpsc::Sender<ExecutionAck>,
    factory_sender: mpsc::Sender<FactoryOrder>,
    simulator: EthCallSimulator,
    chain_id: u64,
    gas_limit: u64,
    max_fee_per_gas: u64,
    max_priority_fee_per_gas: u64,
    bot_max_number_used: u32,
}

impl ExecutorPool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain: Arc<dyn ChainClient>,
        executor_keys: &[String],
        ack_sender: mpsc::Sender<ExecutionAck>,
        factory_sender: mpsc::Sender<FactoryOrder>,
        simulator: EthCallSimulator,
        chain_id: u64,
        gas_limit: u64,
        max_fee_per_gas: u64,
        max_priority_fee_per_gas: u64,
        bot_max_number_used: u32,
    ) -> Result<Arc<Self>, ExecError> {
        let mut accounts = Vec::with_capacity(executor_keys.len());
        for key in executor_keys {
            let wallet = LocalWallet::from_str(key.trim_start_matches("0x"))
                .map_err(|e| ExecError::InvalidKey(e.to_string()))?
                .with_chain_id(chain_id);
            accounts.push(Arc::new(ExecAccount {
                address: wallet.address(),
                wallet,
                bot: Mutex::new(None),
            }));
        }

        Ok(Arc::new(Self {
            chain,
            accounts,
            ack_sender,
            factory_sender,
            simulator,
            chain_id,
            gas_limit,
            max_fee_per_gas,
            max_priority_fee_per_gas,
            bot_max_number_used,
        }))
    }

    pub fn account_addresses(&self) -> Vec<Address> {
        self.accounts.iter().map(|a| a.address).collect()
    }

    // ─── order routing ───────────────────────────────────────────────────────

    /// Picks the account an order runs on, or None when it must be dropped.
    fn select_account(&self, order: &ExecutionOrder, counter: u64) -> Option<usize> {
        match order.signer {
            None => {
                let idx = ((counter - 1) as usize) % self.accounts.len();
                if self.accounts[idx].bot.lock().unwrap().is_none() {
                    warn!(
                        "[EXECUTOR] order dropped: account #{} {:?} has no bot",
                        idx, self.accounts[idx].address
                    );
                    return None;
                }
                Some(idx)
            }
            Some(signer) => {
                let found = self.accounts.iter().position(|a| a.address == signer);
                if found.is_none() {
                    error!("[EXECUTOR] no account found for signer {:?}", signer);
                }
                found
            }
        }
    }

    pub async fn run(
        self: Arc<Self>,
        mut order_receiver: mpsc::Receiver<ExecutionOrder>,
        bot_result_receiver: mpsc::Receiver<Bot>,
    ) {
        // Request a bot for every account up front; the factory replenishes
        // independently after each retirement.
        for account in &self.accounts {
            let _ = self
                .factory_sender
                .send(FactoryOrder::Create(BotCreationOrder {
                    owner: account.address,
                    retry_times: 0,
                }))
                .await;
        }

        {
            let pool = self.clone();
            tokio::spawn(async move {
                pool.handle_bot_results(bot_result_receiver).await;
            });
        }

        // One worker per account keeps per-account submission sequential.
        let mut senders = Vec::with_capacity(self.accounts.len());
        for account in &self.accounts {
            let (tx, rx) = mpsc::channel::<ExecutionOrder>(ACCOUNT_QUEUE_CAPACITY);
            senders.push(tx);
            let pool = self.clone();
            let account = account.clone();
            tokio::spawn(async move {
                pool.account_worker(account, rx).await;
            });
        }

        info!("[EXECUTOR] listening for orders on {} accounts", self.accounts.len());
        let mut counter: u64 = 0;
        while let Some(order) = order_receiver.recv().await {
            counter += 1;
            warn!(
                "[EXECUTOR] receive order #{} {:?} amountIn {} isBuy {}",
                counter, order.pair.address, order.amount_in, order.is_buy
            );
            if let Some(idx) = self.select_account(&order, counter) {
                if senders[idx].send(order).await.is_err() {
                    error!("[EXECUTOR] account #{} worker gone", idx);
                }
            }
        }
    }

    async fn handle_bot_results(&self, mut receiver: mpsc::Receiver<Bot>) {
        while let Some(bot) = receiver.recv().await {
            for (idx, account) in self.accounts.iter().enumerate() {
                if account.address != bot.owner {
                    continue;
                }
                let mut slot = account.bot.lock().unwrap();
                let replace = match slot.as_ref() {
                    None => true,
                    Some(current) => current.needs_replacement(self.bot_max_number_used),
                };
                if replace {
                    warn!(
                        "[EXECUTOR] bond bot {:?} to account #{} {:?}",
                        bot.address, idx, account.address
                    );
                    *slot = Some(bot.clone());
                }
            }
        }
    }

    // ─── per-account worker ──────────────────────────────────────────────────

    async fn account_worker(
        &self,
        account: Arc<ExecAccount>,
        mut receiver: mpsc::Receiver<ExecutionOrder>,
    ) {
        while let Some(order) = receiver.recv().await {
            let deadline = if order.block_timestamp > 0 {
                order.block_timestamp + DEADLINE_DELAY_SECONDS
            } else {
                match self.chain.latest_block().await {
                    Ok(header) => header.timestamp + DEADLINE_DELAY_SECONDS,
                    Err(e) => {
                        error!("[EXECUTOR] latest block error {}", e);
                        continue;
                    }
                }
            };

            let bot_address = order
                .bot
                .or_else(|| account.bot.lock().unwrap().as_ref().map(|b| b.address));
            let bot_address = match bot_address {
                Some(addr) => addr,
                None => {
                    warn!(
                        "[EXECUTOR] order dropped: account {:?} lost its bot",
                        account.address
                    );
                    continue;
                }
            };

            let ack = if order.is_paper {
                self.execute_paper(&account, &order, bot_address).await
            } else {
                self.execute(&account, &order, deadline, bot_address).await
            };

            warn!(
                "[EXECUTOR] ack {:?} status {:?} amountOut {}",
                ack.pair.address, ack.tx_status, ack.amount_out
            );
            if self.ack_sender.send(ack.clone()).await.is_err() {
                error!("[EXECUTOR] ack channel closed");
                return;
            }

            self.rotate_bot(&account, &ack).await;
        }
    }

    /// Bot rotation state machine, run after every ack on the owning worker.
    async fn rotate_bot(&self, account: &ExecAccount, ack: &ExecutionAck) {
        let (update, replacement) = {
            let mut slot = account.bot.lock().unwrap();
            let outcome = match slot.as_mut() {
                None => None,
                Some(bot) => {
                    bot.apply_ack(ack.is_buy, ack.tx_status);
                    Some((bot.clone(), bot.needs_replacement(self.bot_max_number_used)))
                }
            };
            match outcome {
                Some((bot, true)) => {
                    warn!(
                        "[EXECUTOR] bot {:?} of {:?} worn out or failed, detaching",
                        bot.address, account.address
                    );
                    *slot = None;
                    (Some(bot), true)
                }
                Some((bot, false)) => (Some(bot), false),
                None => (None, false),
            }
        };

        if let Some(bot) = update {
            let _ = self
                .factory_sender
                .send(FactoryOrder::Update(bot, ack.clone()))
                .await;
        }
        if replacement {
            let _ = self
                .factory_sender
                .send(FactoryOrder::Create(BotCreationOrder {
                    owner: account.address,
                    retry_times: 0,
                }))
                .await;
        }
    }

    // ─── live execution ──────────────────────────────────────────────────────

    fn build_calldata(order: &ExecutionOrder, signer: Address, deadline: u64) -> Vec<u8> {
        if order.is_buy {
            let mut data = func_selector("buy(address,uint256)").to_vec();
            data.extend_from_slice(&encode_address(order.pair.token));
            data.extend_from_slice(&encode_uint(U256::from(deadline)));
            data
        } else {
            let mut data = func_selector("sell(address,address,uint256)").to_vec();
            data.extend_from_slice(&encode_address(order.pair.token));
            data.extend_from_slice(&encode_address(signer));
            data.extend_from_slice(&encode_uint(U256::from(deadline)));
            data
        }
    }

    async fn execute(
        &self,
        account: &ExecAccount,
        order: &ExecutionOrder,
        deadline: u64,
        bot_address: Address,
    ) -> ExecutionAck {
        let signer = account.address;
        let failed = |tx_hash: String| ExecutionAck {
            lead_block: order.block_number,
            block_number: order.block_number,
            tx_hash,
            tx_status: TxStatus::Failed,
            pair: order.pair.clone(),
            amount_in: order.amount_in,
            amount_out: Decimal::ZERO,
            is_buy: order.is_buy,
            signer: Some(signer),
            bot: Some(bot_address),
            is_paper: false,
        };

        let nonce = match self.chain.transaction_count(signer).await {
            Ok(nonce) => nonce,
            Err(e) => {
                error!("[EXECUTOR] nonce fetch failed: {}", e);
                return failed("0x".to_string());
            }
        };

        let mut tx = Eip1559TransactionRequest::new()
            .from(signer)
            .to(bot_address)
            .data(Bytes::from(Self::build_calldata(order, signer, deadline)))
            .gas(self.gas_limit)
            .max_fee_per_gas(self.max_fee_per_gas)
            .max_priority_fee_per_gas(self.max_priority_fee_per_gas)
            .nonce(nonce)
            .chain_id(self.chain_id);
        if order.is_buy {
            tx = tx.value(to_wei(order.amount_in));
        }
        let typed = TypedTransaction::Eip1559(tx);

        let signature = match account.wallet.sign_transaction(&typed).await {
            Ok(sig) => sig,
            Err(e) => {
                error!("[EXECUTOR] signing failed: {}", e);
                return failed("0x".to_string());
            }
        };
        let raw = typed.rlp_signed(&signature).to_vec();

        let tx_hash = match self.chain.send_raw_transaction(raw).await {
            Ok(hash) => hash,
            Err(e) => {
                error!("[EXECUTOR] submission failed: {}", e);
                return failed("0x".to_string());
            }
        };
        info!("[EXECUTOR] submitted {}", crate::gateway::hex_h256(tx_hash));

        let receipt = match self.chain.wait_for_receipt(tx_hash).await {
            Ok(receipt) => receipt,
            Err(e) => {
                error!("[EXECUTOR] receipt wait failed: {}", e);
                return failed(crate::gateway::hex_h256(tx_hash));
            }
        };

        let mut amount_out = Decimal::ZERO;
        let tx_status = if receipt.status == 1 {
            amount_out = swap_amount_out(&receipt.logs, &order.pair, order.is_buy);
            TxStatus::Success
        } else {
            TxStatus::Failed
        };

        ExecutionAck {
            lead_block: order.block_number,
            block_number: receipt.block_number,
            tx_hash: crate::gateway::hex_h256(tx_hash),
            tx_status,
            pair: order.pair.clone(),
            amount_in: order.amount_in,
            amount_out,
            is_buy: order.is_buy,
            signer: Some(signer),
            bot: Some(bot_address),
            is_paper: false,
        }
    }

    // ─── paper execution ─────────────────────────────────────────────────────

    /// Paper trades never touch the chain: the simulation primitives produce
    /// the fill and downstream bookkeeping is identical to a live trade.
    async fn execute_paper(
        &self,
        account: &ExecAccount,
        order: &ExecutionOrder,
        bot_address: Address,
    ) -> ExecutionAck {
        let signer = account.address;
        let result = if order.is_buy {
            self.simulator
                .buy(order.pair.token, order.amount_in, Some(signer), Some(bot_address))
                .await
        } else {
            self.simulator
                .sell(order.pair.token, order.amount_in, Some(signer), Some(bot_address))
                .await
        };

        let (tx_status, amount_out) = match result {
            Some(values) if values.len() == 2 => (TxStatus::Success, from_wei(values[1])),
            _ => (TxStatus::Failed, Decimal::ZERO),
        };

        ExecutionAck {
            lead_block: order.block_number,
            block_number: order.block_number,
            tx_hash: "0x".to_string(),
            tx_status,
            pair: order.pair.clone(),
            amount_in: order.amount_in,
            amount_out,
            is_buy: order.is_buy,
            signer: Some(signer),
            bot: Some(bot_address),
            is_paper: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ethers_core::types::H256;
    use rust_decimal_macros::dec;

    use crate::gateway::{
        balance_storage_index, decode_address_word, BlockHeader, CallRequest, LogFilter,
        RpcError, StateOverride, TxReceipt,
    };
    use crate::watcher::topic_address;

    const KEY_A: &str = "0000000000000000000000000000000000000000000000000000000000000001";
    const KEY_B: &str = "0000000000000000000000000000000000000000000000000000000000000002";

    struct PaperChain {
        token: Address,
        bot: Address,
    }

    #[async_trait]
    impl ChainClient for PaperChain {
        async fn chain_id(&self) -> Result<u64, RpcError> {
            Ok(1)
        }
        async fn latest_block(&self) -> Result<BlockHeader, RpcError> {
            Ok(BlockHeader {
                timestamp: 1_000,
                ..Default::default()
            })
        }
        async fn get_logs(&self, _filter: &LogFilter) -> Result<Vec<RawLog>, RpcError> {
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
            let uint_array = |a: U256, b: U256| {
                let mut out = encode_uint(U256::from(32u64)).to_vec();
                out.extend_from_slice(&encode_uint(U256::from(2u64)));
                out.extend_from_slice(&encode_uint(a));
                out.extend_from_slice(&encode_uint(b));
                out
            };

            if selector == func_selector("balanceOf(address)") {
                let owner = decode_address_word(&req.data[4..]).unwrap();
                return Ok(encode_uint(slot_value(owner).unwrap_or_default()).to_vec());
            }
            if selector == func_selector("buy(address,uint256)") {
                let spent = req.value.unwrap_or_default();
                return Ok(uint_array(spent, spent * U256::from(500u64)));
            }
            if selector == func_selector("sell(address,address,uint256)") {
                let tokens = slot_value(self.bot)
                    .ok_or_else(|| RpcError::Fatal("no balance override".to_string()))?;
                return Ok(uint_array(tokens, tokens / U256::from(500u64)));
            }
            Err(RpcError::Fatal("unknown selector".to_string()))
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

    fn sample_pair(token_index: u8) -> Pair {
        Pair::new(
            Address::repeat_byte(0x55),
            Address::repeat_byte(0x22),
            token_index,
            0,
        )
    }

    fn sample_order(signer: Option<Address>, is_buy: bool) -> ExecutionOrder {
        ExecutionOrder {
            block_number: 7,
            block_timestamp: 1_000,
            pair: sample_pair(1),
            amount_in: dec!(0.01),
            amount_out_min: dec!(0),
            is_buy,
            signer,
            bot: None,
            is_paper: false,
        }
    }

    fn test_pool() -> Arc<ExecutorPool> {
        let token = Address::repeat_byte(0x22);
        let bot = Address::repeat_byte(0x33);
        let chain = Arc::new(PaperChain { token, bot });
        let simulator = EthCallSimulator::new(chain.clone(), Address::repeat_byte(0x44), bot, 9);
        let (ack_tx, _ack_rx) = mpsc::channel(8);
        let (factory_tx, _factory_rx) = mpsc::channel(8);
        ExecutorPool::new(
            chain,
            &[KEY_A.to_string(), KEY_B.to_string()],
            ack_tx,
            factory_tx,
            simulator,
            1,
            250_000,
            1_000_000_000,
            1_000_000_000,
            2,
        )
        .unwrap()
    }

    fn bond_bot(pool: &ExecutorPool, idx: usize) -> Bot {
        let bot = Bot {
            address: Address::repeat_byte(0x33),
            owner: pool.accounts[idx].address,
            deployed_at: 0,
            number_used: 0,
            is_holding: false,
            is_failed: false,
        };
        *pool.accounts[idx].bot.lock().unwrap() = Some(bot.clone());
        bot
    }

    #[test]
    fn test_round_robin_routing_skips_botless_accounts() {
        let pool = test_pool();
        bond_bot(&pool, 0);

        // Account 0 has a bot → counter 1 routes there.
        assert_eq!(pool.select_account(&sample_order(None, true), 1), Some(0));
        // Counter 2 lands on account 1, which has no bot → dropped.
        assert_eq!(pool.select_account(&sample_order(None, true), 2), None);
        // Counter 3 wraps back to account 0.
        assert_eq!(pool.select_account(&sample_order(None, true), 3), Some(0));
    }

    #[test]
    fn test_addressed_routing() {
        let pool = test_pool();
        let signer = pool.accounts[1].address;
        // Addressed orders bypass the bot check; liquidations carry their bot.
        assert_eq!(pool.select_account(&sample_order(Some(signer), false), 1), Some(1));
        assert_eq!(
            pool.select_account(&sample_order(Some(Address::repeat_byte(0x99)), false), 1),
            None
        );
    }

    #[test]
    fn test_swap_amount_out_sides() {
        let pair0 = sample_pair(0);
        let pair1 = sample_pair(1);

        let log = |a0out: Decimal, a1out: Decimal| RawLog {
            address: pair0.address,
            topics: vec![swap_topic(), topic_address(Address::zero())],
            data: {
                let mut d = encode_uint(U256::zero()).to_vec();
                d.extend_from_slice(&encode_uint(U256::zero()));
                d.extend_from_slice(&encode_uint(to_wei(a0out)));
                d.extend_from_slice(&encode_uint(to_wei(a1out)));
                d
            },
            block_number: 0,
        };

        let logs = vec![log(dec!(100), dec!(0.05))];
        // Buy on token_index 0 → token side = amount0Out.
        assert_eq!(swap_amount_out(&logs, &pair0, true), dec!(100));
        // Sell on token_index 0 → ETH side = amount1Out.
        assert_eq!(swap_amount_out(&logs, &pair0, false), dec!(0.05));
        // Buy on token_index 1 → amount1Out.
        assert_eq!(swap_amount_out(&logs, &pair1, true), dec!(0.05));
        // No matching log → zero.
        assert_eq!(swap_amount_out(&[], &pair0, true), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_paper_buy_and_sell_acks() {
        let pool = test_pool();
        bond_bot(&pool, 0);
        let account = pool.accounts[0].clone();
        let bot_address = Address::repeat_byte(0x33);

        let mut order = sample_order(None, true);
        order.is_paper = true;
        let ack = pool.execute_paper(&account, &order, bot_address).await;
        assert_eq!(ack.tx_status, TxStatus::Success);
        assert_eq!(ack.tx_hash, "0x");
        assert!(ack.is_paper);
        // 500 tokens per wei of ETH at 0.01 in.
        assert_eq!(ack.amount_out, dec!(5));

        let mut sell = sample_order(None, false);
        sell.is_paper = true;
        sell.amount_in = ack.amount_out;
        let ack = pool.execute_paper(&account, &sell, bot_address).await;
        assert_eq!(ack.tx_status, TxStatus::Success);
        assert_eq!(ack.amount_out, dec!(0.01));
    }

    #[tokio::test]
    async fn test_rotation_detaches_failed_bot_and_requests_replacement() {
        let token = Address::repeat_byte(0x22);
        let bot_addr = Address::repeat_byte(0x33);
        let chain = Arc::new(PaperChain { token, bot: bot_addr });
        let simulator = EthCallSimulator::new(chain.clone(), Address::repeat_byte(0x44), bot_addr, 9);
        let (ack_tx, _ack_rx) = mpsc::channel(8);
        let (factory_tx, mut factory_rx) = mpsc::channel(8);
        let pool = ExecutorPool::new(
            chain,
            &[KEY_A.to_string()],
            ack_tx,
            factory_tx,
            simulator,
            1,
            250_000,
            1_000_000_000,
            1_000_000_000,
            2,
        )
        .unwrap();
        bond_bot(&pool, 0);
        let account = pool.accounts[0].clone();

        let ack = ExecutionAck {
            lead_block: 0,
            block_number: 0,
            tx_hash: "0x".to_string(),
            tx_status: TxStatus::Failed,
            pair: sample_pair(1),
            amount_in: dec!(1),
            amount_out: dec!(0),
            is_buy: false,
            signer: Some(account.address),
            bot: Some(bot_addr),
            is_paper: false,
        };
        pool.rotate_bot(&account, &ack).await;

        // Failed sell → bot detached, update + replacement requests queued.
        assert!(account.bot.lock().unwrap().is_none());
        match factory_rx.recv().await.unwrap() {
            FactoryOrder::Update(bot, _) => {
                assert!(bot.is_failed);
                assert_eq!(bot.number_used, 1);
            }
            other => panic!("expected update order, got {:?}", other),
        }
        match factory_rx.recv().await.unwrap() {
            FactoryOrder::Create(order) => assert_eq!(order.owner, account.address),
            other => panic!("expected create order, got {:?}", other),
        }
    }
}
