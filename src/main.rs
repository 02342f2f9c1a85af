// ─────────────────────────────────────────────────────────────────────────────
// snipe-engine-rs: block-driven sniper for freshly created V2 liquidity pairs
//
// Task layout (all cooperative, wired through bounded channels):
//   BlockWatcher ─(BlockData)→ Strategy ─(ExecutionOrder)→ ExecutorPool
//   ExecutorPool ─(ExecutionAck)→ Strategy ─→ watcher mirror + Reporter
//   Reporter ─(ControlOrder)→ Strategy           (pending-position bootstrap)
//   ExecutorPool ⇄ BotFactory                    (bot creation / rotation)
// ─────────────────────────────────────────────────────────────────────────────
mod config;
mod data;
mod executor;
mod explorer;
mod factory;
mod gateway;
mod inspector;
mod publisher;
mod reporter;
mod simulator;
mod store;
mod strategy;
mod watcher;

use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::mpsc;

use config::Config;
use data::from_wei;
use executor::ExecutorPool;
use explorer::ExplorerClient;
use factory::BotFactory;
use gateway::{ChainClient, HttpGateway};
use inspector::PairInspector;
use publisher::StatusPublisher;
use reporter::Reporter;
use simulator::EthCallSimulator;
use store::Store;
use strategy::{Strategy, StrategyConfig};
use watcher::BlockWatcher;

const CHANNEL_CAPACITY: usize = 512;
const STATUS_HEARTBEAT_SECS: u64 = 60;

#[tokio::main]
async fn main() {
    // Load .env file if present (silently ignored if missing)
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("LOG_LEVEL", "info"))
        .init();
    log::info!("snipe-engine-rs starting…");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("configuration error: {}", e);
            std::process::exit(1);
        }
    };
    log::info!("  Run mode:  {:?}", config.run_mode);
    log::info!("  Executors: {}", config.execution_keys.len());
    log::info!("  Store:     {}", config.store_path);

    let chain: Arc<dyn ChainClient> = Arc::new(HttpGateway::new(&config.https_url));
    let chain_id = match chain.chain_id().await {
        Ok(id) => id,
        Err(e) => {
            log::error!("chain id fetch failed: {}", e);
            std::process::exit(1);
        }
    };
    log::info!("  Chain id:  {}", chain_id);

    let store = Arc::new(Store::load(&config.store_path));
    let explorer = Arc::new(ExplorerClient::new(
        &config.etherscan_api_url,
        config.basescan_api_keys.clone(),
    ));

    // ─── Channels ────────────────────────────────────────────────────────────
    let (block_tx, block_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (order_tx, order_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (ack_tx, ack_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (report_tx, report_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (mirror_tx, mirror_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (control_tx, control_rx) = mpsc::channel(64);
    let (factory_tx, factory_rx) = mpsc::channel(256);
    let (bot_result_tx, bot_result_rx) = mpsc::channel(64);

    // ─── Components ──────────────────────────────────────────────────────────
    let block_watcher = BlockWatcher::new(
        chain.clone(),
        &config.wss_url,
        config.factory_address,
        config.weth_address,
        block_tx,
    );

    let inspector = Arc::new(PairInspector::new(
        chain.clone(),
        explorer.clone(),
        store.clone(),
        EthCallSimulator::new(
            chain.clone(),
            config.manager_address,
            config.inspector_bot,
            config.balance_slot_probe_limit,
        ),
        config.reserve_eth_min_threshold,
        config.reserve_eth_max_threshold,
        config.contract_verified_required,
        config.source_deny_markers.clone(),
        config.rogue_creator_frozen_seconds,
    ));

    let executor_pool = match ExecutorPool::new(
        chain.clone(),
        &config.execution_keys,
        ack_tx.clone(),
        factory_tx.clone(),
        EthCallSimulator::new(
            chain.clone(),
            config.manager_address,
            config.inspector_bot,
            config.balance_slot_probe_limit,
        ),
        chain_id,
        config.execution_gas_limit,
        config.max_fee_per_gas,
        config.max_priority_fee_per_gas,
        config.bot_max_number_used,
    ) {
        Ok(pool) => pool,
        Err(e) => {
            log::error!("executor pool init failed: {}", e);
            std::process::exit(1);
        }
    };

    // Register the active signer set with its on-chain balances.
    let mut executor_rows = Vec::new();
    for address in executor_pool.account_addresses() {
        let balance = match chain.get_balance(address).await {
            Ok(wei) => from_wei(wei),
            Err(e) => {
                log::warn!("balance fetch for {:?} failed: {}", address, e);
                Decimal::ZERO
            }
        };
        executor_rows.push((address, balance));
    }
    store.register_executors(&executor_rows);

    let bot_factory = match BotFactory::new(
        chain.clone(),
        store.clone(),
        &config.manager_key,
        config.bot_factory,
        config.bot_implementation,
        config.router_address,
        config.factory_address,
        config.weth_address,
        chain_id,
        config.create_bot_gas_limit,
        config.max_fee_per_gas,
        config.max_priority_fee_per_gas,
        config.bot_max_number_used,
        factory_tx.clone(),
        bot_result_tx,
    ) {
        Ok(factory) => factory,
        Err(e) => {
            log::error!("bot factory init failed: {}", e);
            std::process::exit(1);
        }
    };

    let strategy = Strategy::new(
        StrategyConfig::from(&config),
        inspector,
        explorer.clone(),
        order_tx,
        report_tx.clone(),
        mirror_tx,
    );

    let publisher = StatusPublisher::new(&config.redis_url);
    if publisher.is_none() {
        log::warn!(
            "redis unavailable at {}; dashboard feed disabled",
            config.redis_url
        );
    }
    let reporter = Reporter::new(store.clone(), config.gas_cost, publisher, "data/executions");

    // ─── Status heartbeat ────────────────────────────────────────────────────
    let session_id = uuid::Uuid::new_v4().to_string();
    if let Some(heartbeat) = StatusPublisher::new(&config.redis_url) {
        let strategy = strategy.clone();
        let session_id = session_id.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(std::time::Duration::from_secs(STATUS_HEARTBEAT_SECS)).await;
                let (epoch_pnl, auto_run, buy_amount) = strategy.status();
                let _ = heartbeat
                    .publish_status(&session_id, epoch_pnl, auto_run, buy_amount)
                    .await;
            }
        });
    }

    // ─── Task supervisor ─────────────────────────────────────────────────────
    tokio::spawn(block_watcher.run(mirror_rx));
    tokio::spawn(strategy.clone().run_ticks(block_rx));
    tokio::spawn(strategy.clone().run_acks(ack_rx));
    tokio::spawn(strategy.clone().run_control(control_rx));
    tokio::spawn(reporter.run(report_rx, control_tx));
    tokio::spawn(executor_pool.run(order_rx, bot_result_rx));
    tokio::spawn(bot_factory.run(factory_rx));

    log::info!(
        "all tasks active [session={}], entering block loop…",
        session_id
    );

    // In-flight receipt waits are left to finish inside their tasks; the
    // process exits once the signal lands.
    tokio::signal::ctrl_c().await.ok();
    log::warn!("termination signal received, shutting down…");
}
