// factory.rs — Bot factory: serialized creation queue for per-account bot
// contracts. A creation request first looks for an available bot in the
// store; only when none exists does it submit a createBot transaction signed
// by the manager. Failures sleep and re-enqueue with no retry ceiling.
use std::str::FromStr;
use std::sync::Arc;

use ethers_core::types::transaction::eip2718::TypedTransaction;
use ethers_core::types::{Address, Bytes, Eip1559TransactionRequest, H256, U256};
use ethers_signers::{LocalWallet, Signer};
use log::{error, info, warn};
use tokio::sync::mpsc;

use crate::data::{Bot, BotCreationOrder, FactoryOrder, TxStatus};
use crate::gateway::{
    bot_created_topic, decode_address_word, encode_address, func_selector, ChainClient, RawLog,
};
use crate::store::Store;

const RETRY_SLEEP_SECONDS: u64 = 10;

/// Decodes a BotCreated(owner, bot) event, accepting either indexed-topic or
/// plain-data layouts.
pub fn parse_bot_created(log: &RawLog) -> Option<(Address, Address)> {
    if log.data.len() >= 64 {
        let owner = decode_address_word(&log.data[0..32])?;
        let bot = decode_address_word(&log.data[32..64])?;
        return Some((owner, bot));
    }
    if log.topics.len() >= 3 {
        let owner = Address::from_slice(&log.topics[1].as_bytes()[12..]);
        let bot = Address::from_slice(&log.topics[2].as_bytes()[12..]);
        return Some((owner, bot));
    }
    None
}

pub struct BotFactory {
    chain: Arc<dyn ChainClient>,
    store: Arc<Store>,
    manager: LocalWallet,
    bot_factory: Address,
    bot_implementation: Address,
    router: Address,
    pair_factory: Address,
    weth: Address,
    chain_id: u64,
    gas_limit: u64,
    max_fee_per_gas: u64,
    max_priority_fee_per_gas: u64,
    bot_max_number_used: u32,
    /// Self-enqueue handle used for retries.
    order_sender: mpsc::Sender<FactoryOrder>,
    result_sender: mpsc::Sender<Bot>,
}

impl BotFactory {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain: Arc<dyn ChainClient>,
        store: Arc<Store>,
        manager_key: &str,
        bot_factory: Address,
        bot_implementation: Address,
        router: Address,
        pair_factory: Address,
        weth: Address,
        chain_id: u64,
        gas_limit: u64,
        max_fee_per_gas: u64,
        max_priority_fee_per_gas: u64,
        bot_max_number_used: u32,
        order_sender: mpsc::Sender<FactoryOrder>,
        result_sender: mpsc::Sender<Bot>,
    ) -> Result<Arc<Self>, String> {
        let manager = LocalWallet::from_str(manager_key.trim_start_matches("0x"))
            .map_err(|e| format!("invalid manager key: {}", e))?
            .with_chain_id(chain_id);
        Ok(Arc::new(Self {
            chain,
            store,
            manager,
            bot_factory,
            bot_implementation,
            router,
            pair_factory,
            weth,
            chain_id,
            gas_limit,
            max_fee_per_gas,
            max_priority_fee_per_gas,
            bot_max_number_used,
            order_sender,
            result_sender,
        }))
    }

    pub async fn run(self: Arc<Self>, mut order_receiver: mpsc::Receiver<FactoryOrder>) {
        info!("[FACTORY] listening for bot orders...");
        while let Some(order) = order_receiver.recv().await {
            match order {
                FactoryOrder::Create(create) => {
                    self.handle_create(create).await;
                }
                FactoryOrder::Update(bot, ack) => {
                    self.store.update_bot(
                        bot.address,
                        ack.is_buy,
                        ack.tx_status == TxStatus::Success,
                    );
                }
            }
        }
    }

    async fn handle_create(&self, order: BotCreationOrder) {
        info!(
            "[FACTORY] create-bot order for {:?} (attempt {})",
            order.owner, order.retry_times
        );

        // Reuse before deploy: an idle bot from the store with capacity left.
        if let Some(bot) = self
            .store
            .find_available_bot(order.owner, self.bot_max_number_used)
        {
            info!("[FACTORY] found available bot {:?} in store", bot.address);
            let _ = self.result_sender.send(bot).await;
            return;
        }

        match self.create_bot(order.owner).await {
            Some(bot) => {
                self.store.save_bot(&bot);
                let _ = self.result_sender.send(bot).await;
            }
            None => {
                error!(
                    "[FACTORY] create bot for {:?} failed, retry in {}s",
                    order.owner, RETRY_SLEEP_SECONDS
                );
                let sender = self.order_sender.clone();
                let retry = BotCreationOrder {
                    owner: order.owner,
                    retry_times: order.retry_times + 1,
                };
                tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_secs(RETRY_SLEEP_SECONDS)).await;
                    let _ = sender.send(FactoryOrder::Create(retry)).await;
                });
            }
        }
    }

    async fn create_bot(&self, owner: Address) -> Option<Bot> {
        let nonce = match self.chain.transaction_count(self.manager.address()).await {
            Ok(nonce) => nonce,
            Err(e) => {
                error!("[FACTORY] nonce fetch failed: {}", e);
                return None;
            }
        };

        let salt = H256::from(rand::random::<[u8; 32]>());
        let mut data =
            func_selector("createBot(address,bytes32,address,address,address,address)").to_vec();
        data.extend_from_slice(&encode_address(self.bot_implementation));
        data.extend_from_slice(salt.as_bytes());
        data.extend_from_slice(&encode_address(owner));
        data.extend_from_slice(&encode_address(self.router));
        data.extend_from_slice(&encode_address(self.pair_factory));
        data.extend_from_slice(&encode_address(self.weth));

        let tx = Eip1559TransactionRequest::new()
            .from(self.manager.address())
            .to(self.bot_factory)
            .data(Bytes::from(data))
            .gas(self.gas_limit)
            .max_fee_per_gas(self.max_fee_per_gas)
            .max_priority_fee_per_gas(self.max_priority_fee_per_gas)
            .nonce(nonce)
            .chain_id(self.chain_id);
        let typed = TypedTransaction::Eip1559(tx);

        let signature = match self.manager.sign_transaction(&typed).await {
            Ok(sig) => sig,
            Err(e) => {
                error!("[FACTORY] signing failed: {}", e);
                return None;
            }
        };

        let tx_hash = match self
            .chain
            .send_raw_transaction(typed.rlp_signed(&signature).to_vec())
            .await
        {
            Ok(hash) => hash,
            Err(e) => {
                error!("[FACTORY] createBot submission failed: {}", e);
                return None;
            }
        };

        let receipt = match self.chain.wait_for_receipt(tx_hash).await {
            Ok(receipt) => receipt,
            Err(e) => {
                error!("[FACTORY] createBot receipt failed: {}", e);
                return None;
            }
        };
        if receipt.status != 1 {
            error!("[FACTORY] createBot reverted for owner {:?}", owner);
            return None;
        }

        let created = receipt
            .logs
            .iter()
            .filter(|log| {
                log.address == self.bot_factory
                    && log.topics.first() == Some(&bot_created_topic())
            })
            .find_map(parse_bot_created);

        match created {
            Some((event_owner, bot_address)) => {
                info!(
                    "[FACTORY] created bot {:?} for owner {:?}",
                    bot_address, event_owner
                );
                Some(Bot {
                    address: bot_address,
                    owner: event_owner,
                    deployed_at: chrono::Utc::now().timestamp() as u64,
                    number_used: 0,
                    is_holding: false,
                    is_failed: false,
                })
            }
            None => {
                warn!("[FACTORY] BotCreated event missing in receipt");
                None
            }
        }
    }
}
