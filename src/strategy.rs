// ─────────────────────────────────────────────────────────────────────────────
// strategy.rs — The block-driven strategy loop
//
// Advances three state machines per tick, all guarded by one mutex:
//   - watchlist: candidate pairs between inspection passes
//   - inventory: open positions, liquidated on take-profit/stop-loss/timeout
//   - sizing:    epoch PnL accumulator + adaptive buy amount + kill switch
//
// Critical sections are short; inspection, gas-oracle and channel I/O happen
// outside the lock. At most one liquidation is in flight at any instant.
// ─────────────────────────────────────────────────────────────────────────────
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, FixedOffset, Timelike, Utc};
use ethers_core::types::Address;
use log::{error, info, warn};
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::data::{
    calculate_expect_pnl, calculate_price, BlockData, ControlOrder, ExecutionAck, ExecutionOrder,
    Pair, Position, ReportData, RunMode, TxStatus,
};
use crate::explorer::GasOracle;
use crate::inspector::Inspecting;

const WATCHLIST_CAPACITY: usize = 100;
const PROCESSED_ACK_WINDOW: usize = 256;

/// Hour of day in the trading timezone (UTC+7); epoch and sizing resets are
/// anchored to this clock.
pub fn hour_in_vntz(at: DateTime<Utc>) -> u32 {
    let offset = FixedOffset::east_opt(7 * 3_600).expect("fixed offset");
    at.with_timezone(&offset).hour()
}

#[derive(Debug, Clone)]
pub struct StrategyConfig {
    pub run_mode: RunMode,
    pub watchlist_capacity: usize,
    pub inventory_capacity: usize,
    pub buy_amount_initial: Decimal,
    pub min_buy_amount: Decimal,
    pub max_buy_amount: Decimal,
    pub amount_change_step: Decimal,
    pub min_expected_pnl: Decimal,
    pub risk_reward_ratio: Decimal,
    pub epoch_time_hours: u32,
    pub max_gas_price_allowance: Decimal,
    pub gas_cost: Decimal,
    pub take_profit_percentage: Decimal,
    pub stop_loss_percentage: Decimal,
    pub hold_max_duration_seconds: u64,
    pub hard_stop_pnl_threshold: Decimal,
    pub max_inspect_attempts: u32,
    pub inspect_interval_seconds: u64,
    pub number_tx_mm_threshold: u32,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            run_mode: RunMode::Live,
            watchlist_capacity: WATCHLIST_CAPACITY,
            inventory_capacity: 2,
            buy_amount_initial: Decimal::new(1, 2),  // 0.01
            min_buy_amount: Decimal::new(1, 2),      // 0.01
            max_buy_amount: Decimal::new(5, 2),      // 0.05
            amount_change_step: Decimal::new(5, 3),  // 0.005
            min_expected_pnl: Decimal::from(30),
            risk_reward_ratio: Decimal::from(3),
            epoch_time_hours: 6,
            max_gas_price_allowance: Decimal::from(1_000),
            gas_cost: Decimal::new(2, 4), // 0.0002
            take_profit_percentage: Decimal::from(30),
            stop_loss_percentage: Decimal::from(-60),
            hold_max_duration_seconds: 3_600,
            hard_stop_pnl_threshold: Decimal::from(-300),
            max_inspect_attempts: 1,
            inspect_interval_seconds: 60,
            number_tx_mm_threshold: 10,
        }
    }
}

impl From<&Config> for StrategyConfig {
    fn from(config: &Config) -> Self {
        Self {
            run_mode: config.run_mode,
            watchlist_capacity: WATCHLIST_CAPACITY,
            inventory_capacity: config.inventory_capacity,
            buy_amount_initial: config.buy_amount,
            min_buy_amount: config.min_buy_amount,
            max_buy_amount: config.max_buy_amount,
            amount_change_step: config.amount_change_step,
            min_expected_pnl: config.min_expected_pnl,
            risk_reward_ratio: config.risk_reward_ratio,
            epoch_time_hours: config.epoch_time_hours,
            max_gas_price_allowance: config.max_gas_price_allowance,
            gas_cost: config.gas_cost,
            take_profit_percentage: config.take_profit_percentage,
            stop_loss_percentage: config.stop_loss_percentage,
            hold_max_duration_seconds: config.hold_max_duration_seconds,
            hard_stop_pnl_threshold: config.hard_stop_pnl_threshold,
            max_inspect_attempts: config.max_inspect_attempts,
            inspect_interval_seconds: config.inspect_interval_seconds,
            number_tx_mm_threshold: config.number_tx_mm_threshold,
        }
    }
}

struct StrategyState {
    watchlist: Vec<Pair>,
    inventory: Vec<Position>,
    /// In-flight plus open positions, bounded by the inventory capacity.
    fullfilled: usize,
    /// True while exactly one liquidation is in flight.
    liquidated: bool,
    epoch_pnl: (DateTime<Utc>, Decimal),
    /// Master kill switch; never re-enabled automatically.
    auto_run: bool,
    buy_amount: Decimal,
    /// Rolling window of processed success acks for redelivery protection.
    processed_acks: VecDeque<(Address, bool, String)>,
}

pub struct Strategy {
    config: StrategyConfig,
    state: Mutex<StrategyState>,
    inspector: Arc<dyn Inspecting>,
    gas_oracle: Arc<dyn GasOracle>,
    execution_sender: mpsc::Sender<ExecutionOrder>,
    report_sender: mpsc::Sender<ReportData>,
    /// Relay of every ack into the block watcher's inventory mirror.
    watcher_sender: mpsc::Sender<ExecutionAck>,
}

impl Strategy {
    pub fn new(
        config: StrategyConfig,
        inspector: Arc<dyn Inspecting>,
        gas_oracle: Arc<dyn GasOracle>,
        execution_sender: mpsc::Sender<ExecutionOrder>,
        report_sender: mpsc::Sender<ReportData>,
        watcher_sender: mpsc::Sender<ExecutionAck>,
    ) -> Arc<Self> {
        let buy_amount = config.buy_amount_initial;
        Arc::new(Self {
            config,
            state: Mutex::new(StrategyState {
                watchlist: Vec::new(),
                inventory: Vec::new(),
                fullfilled: 0,
                liquidated: false,
                epoch_pnl: (Utc::now(), Decimal::ZERO),
                auto_run: true,
                buy_amount,
                processed_acks: VecDeque::new(),
            }),
            inspector,
            gas_oracle,
            execution_sender,
            report_sender,
            watcher_sender,
        })
    }

    /// (epoch pnl, auto_run, buy_amount) snapshot for the status heartbeat.
    pub fn status(&self) -> (Decimal, bool, Decimal) {
        let state = self.state.lock().unwrap();
        (state.epoch_pnl.1, state.auto_run, state.buy_amount)
    }

    // ─── task entry points ───────────────────────────────────────────────────

    pub async fn run_ticks(self: Arc<Self>, mut receiver: mpsc::Receiver<BlockData>) {
        while let Some(block) = receiver.recv().await {
            self.on_block(block).await;
        }
    }

    pub async fn run_acks(self: Arc<Self>, mut receiver: mpsc::Receiver<ExecutionAck>) {
        while let Some(ack) = receiver.recv().await {
            self.on_ack(ack).await;
        }
    }

    pub async fn run_control(self: Arc<Self>, mut receiver: mpsc::Receiver<ControlOrder>) {
        while let Some(order) = receiver.recv().await {
            match order {
                ControlOrder::PendingPositions(positions) => {
                    let mut state = self.state.lock().unwrap();
                    for position in positions {
                        if state
                            .inventory
                            .iter()
                            .any(|p| p.pair.address == position.pair.address)
                        {
                            continue;
                        }
                        warn!(
                            "[STRATEGY] append pending position {:?} from bootstrap",
                            position.pair.address
                        );
                        state.inventory.push(position);
                        state.fullfilled += 1;
                    }
                }
            }
        }
    }

    // ─── per-tick algorithm ──────────────────────────────────────────────────

    pub async fn on_block(&self, block: BlockData) {
        info!(
            "[STRATEGY] block #{} pairs {} inventory {}",
            block.block_number,
            block.pairs.len(),
            block.inventory.len()
        );

        if !block.pairs.is_empty() {
            let _ = self
                .report_sender
                .send(ReportData::Block(block.clone()))
                .await;
        }

        {
            let state = self.state.lock().unwrap();
            info!(
                "[{}] realized pnl {} buy-amount {} expected pnl {}",
                state.epoch_pnl.0.format("%Y-%m-%d %H:00:00"),
                state.epoch_pnl.1.round_dp(6),
                state.buy_amount,
                calculate_expect_pnl(
                    state.buy_amount,
                    self.config.min_buy_amount,
                    self.config.min_expected_pnl,
                    self.config.risk_reward_ratio
                )
                .round_dp(6)
            );
        }

        if self.config.run_mode == RunMode::WatchOnly {
            info!("[STRATEGY] watching only...");
            return;
        }

        if let Some(order) = self.advance_inventory(&block) {
            let _ = self.execution_sender.send(order).await;
        }

        // Kill switch: trips once, never re-arms.
        {
            let mut state = self.state.lock().unwrap();
            if state.epoch_pnl.1 < self.config.hard_stop_pnl_threshold && state.auto_run {
                state.auto_run = false;
                warn!("[STRATEGY] hard stop: pnl {} — auto-run disabled", state.epoch_pnl.1);
            }
            if !state.auto_run {
                info!("[STRATEGY] auto-run is disabled");
                return;
            }
        }

        self.reset_epoch_if_needed();
        self.advance_watchlist(&block).await;
        self.admit_new_pairs(&block).await;
    }

    /// Updates PnL against the refreshed snapshot and dispatches at most one
    /// liquidation per tick; further triggers defer until the sell acks.
    fn advance_inventory(&self, block: &BlockData) -> Option<ExecutionOrder> {
        let mut state = self.state.lock().unwrap();
        if state.inventory.is_empty() || state.liquidated {
            return None;
        }

        let buy_amount = state.buy_amount;
        let gas_cost = self.config.gas_cost;
        let mut trigger: Option<usize> = None;

        for (idx, position) in state.inventory.iter_mut().enumerate() {
            let mut liquidate = false;
            if let Some(pair) = block
                .inventory
                .iter()
                .find(|p| p.address == position.pair.address)
            {
                position.pnl = (position.amount * pair.price() - buy_amount - gas_cost)
                    / buy_amount
                    * Decimal::from(100);
                warn!(
                    "[STRATEGY] position {:?} pnl {}",
                    position.pair.address,
                    position.pnl.round_dp(6)
                );
                if position.pnl > self.config.take_profit_percentage
                    || position.pnl < self.config.stop_loss_percentage
                {
                    warn!("[STRATEGY] {:?} take profit or stop loss", position.pair.address);
                    liquidate = true;
                }
            }

            if !liquidate
                && block.block_timestamp.saturating_sub(position.start_time)
                    > self.config.hold_max_duration_seconds
            {
                warn!("[STRATEGY] {:?} liquidation by timeout", position.pair.address);
                liquidate = true;
            }

            if liquidate {
                trigger = Some(idx);
                break;
            }
        }

        let idx = trigger?;
        state.liquidated = true;
        let position = state.inventory.remove(idx);
        warn!(
            "[STRATEGY] remove {:?} from inventory, dispatch sell",
            position.pair.address
        );

        Some(ExecutionOrder {
            block_number: block.block_number,
            block_timestamp: block.block_timestamp,
            pair: position.pair.clone(),
            amount_in: position.amount,
            amount_out_min: Decimal::ZERO,
            is_buy: false,
            signer: position.signer,
            bot: position.bot,
            is_paper: position.is_paper,
        })
    }

    /// Epoch PnL and buy-amount resets on calendar-hour boundaries (UTC+7).
    fn reset_epoch_if_needed(&self) {
        let now = Utc::now();
        let mut state = self.state.lock().unwrap();
        let epoch_hour = state.epoch_pnl.0.format("%Y-%m-%d %H").to_string();
        if epoch_hour == now.format("%Y-%m-%d %H").to_string() {
            return;
        }

        let hour = hour_in_vntz(now);
        if hour % self.config.epoch_time_hours.max(1) == 0 {
            state.epoch_pnl = (now, Decimal::ZERO);
            warn!(
                "[STRATEGY] reset epoch pnl at {}",
                now.format("%Y-%m-%d %H:00:00")
            );
        }
        if hour == 0 {
            state.buy_amount = self.config.buy_amount_initial;
            warn!(
                "[STRATEGY] reset buy-amount to initial {} at day boundary",
                state.buy_amount
            );
        }
    }

    // ─── watchlist ───────────────────────────────────────────────────────────

    async fn advance_watchlist(&self, block: &BlockData) {
        let batch: Vec<Pair> = {
            let state = self.state.lock().unwrap();
            state
                .watchlist
                .iter()
                .filter(|pair| {
                    block.block_timestamp.saturating_sub(pair.created_at)
                        > pair.inspect_attempts as u64 * self.config.inspect_interval_seconds
                })
                .cloned()
                .collect()
        };
        if batch.is_empty() {
            return;
        }
        info!("[STRATEGY] re-inspecting {} watched pairs", batch.len());

        let results = self
            .inspector
            .inspect_batch(batch.clone(), block.block_number, false)
            .await;

        let mut graduates: Vec<Pair> = Vec::new();
        {
            let mut state = self.state.lock().unwrap();

            for result in &results {
                if result.simulation_result.is_none() {
                    continue;
                }
                if let Some(pair) = state
                    .watchlist
                    .iter_mut()
                    .find(|p| p.address == result.pair.address)
                {
                    pair.inspect_attempts += 1;
                    pair.number_tx_mm = result.number_tx_mm;
                    pair.contract_verified = pair.contract_verified || result.contract_verified;
                    // last_inspected_block deliberately stays at the admission
                    // block so every pass re-covers the pair's whole life.
                    warn!(
                        "[STRATEGY] pair {:?} attempts {} mm {} verified {}",
                        pair.address, pair.inspect_attempts, pair.number_tx_mm, pair.contract_verified
                    );
                }
            }

            let max_attempts = self.config.max_inspect_attempts;
            let mm_threshold = self.config.number_tx_mm_threshold;
            state.watchlist.retain(|pair| {
                if pair.inspect_attempts >= max_attempts {
                    if pair.number_tx_mm >= mm_threshold && pair.contract_verified {
                        graduates.push(pair.clone());
                    } else {
                        warn!(
                            "[STRATEGY] pair {:?} not qualified: mm {} verified {}",
                            pair.address, pair.number_tx_mm, pair.contract_verified
                        );
                    }
                    false
                } else {
                    true
                }
            });

            // A failed simulation this round drops the pair immediately.
            let simulated: Vec<Address> = results
                .iter()
                .filter(|r| r.simulation_result.is_some())
                .map(|r| r.pair.address)
                .collect();
            let batch_addresses: Vec<Address> = batch.iter().map(|p| p.address).collect();
            state.watchlist.retain(|pair| {
                let failed = batch_addresses.contains(&pair.address)
                    && !simulated.contains(&pair.address);
                if failed {
                    warn!(
                        "[STRATEGY] remove {:?} from watchlist: inspection failed",
                        pair.address
                    );
                }
                !failed
            });
        }

        let is_paper = self.config.run_mode == RunMode::PaperTrade;
        for pair in graduates {
            self.send_exec_order(block, pair, is_paper).await;
        }
    }

    async fn admit_new_pairs(&self, block: &BlockData) {
        if block.pairs.is_empty() {
            return;
        }
        let results = self
            .inspector
            .inspect_batch(block.pairs.clone(), block.block_number, true)
            .await;

        let is_paper = self.config.run_mode == RunMode::PaperTrade;
        let mut immediate: Vec<Pair> = Vec::new();
        {
            let mut state = self.state.lock().unwrap();
            if state.watchlist.len() >= self.config.watchlist_capacity {
                warn!("[STRATEGY] watchlist is already full");
                return;
            }

            for result in results {
                if result.simulation_result.is_none() {
                    continue;
                }
                if self.config.max_inspect_attempts > 1 {
                    if state.watchlist.len() >= self.config.watchlist_capacity {
                        warn!("[STRATEGY] watchlist reached capacity");
                        break;
                    }
                    let mut pair = result.pair.clone();
                    pair.inspect_attempts = 1;
                    pair.last_inspected_block = block.block_number;
                    pair.contract_verified = result.contract_verified;
                    pair.number_tx_mm = result.number_tx_mm;
                    warn!(
                        "[STRATEGY] add pair {:?} to watchlist ({})",
                        pair.address,
                        state.watchlist.len() + 1
                    );
                    state.watchlist.push(pair);
                } else {
                    immediate.push(result.pair.clone());
                }
            }
        }

        for pair in immediate {
            self.send_exec_order(block, pair, is_paper).await;
        }
    }

    // ─── order submission ────────────────────────────────────────────────────

    async fn send_exec_order(&self, block: &BlockData, pair: Pair, is_paper: bool) {
        if let Some(base_fee) = self.gas_oracle.suggest_base_fee().await {
            if base_fee > self.config.max_gas_price_allowance {
                error!(
                    "[STRATEGY] cancel execution: gas price {} above allowance {}",
                    base_fee, self.config.max_gas_price_allowance
                );
                return;
            }
        }

        let order = {
            let mut state = self.state.lock().unwrap();
            if state.fullfilled >= self.config.inventory_capacity {
                warn!(
                    "[STRATEGY] inventory capacity {} is full",
                    self.config.inventory_capacity
                );
                return;
            }
            state.fullfilled += 1;
            ExecutionOrder {
                block_number: block.block_number,
                block_timestamp: block.block_timestamp,
                pair,
                amount_in: state.buy_amount,
                amount_out_min: Decimal::ZERO,
                is_buy: true,
                signer: None,
                bot: None,
                is_paper,
            }
        };

        warn!(
            "[STRATEGY] send buy-order {:?} amount {}",
            order.pair.address, order.amount_in
        );
        let _ = self.execution_sender.send(order).await;
    }

    // ─── ack handling ────────────────────────────────────────────────────────

    pub async fn on_ack(&self, ack: ExecutionAck) {
        warn!(
            "[STRATEGY] receive ack {:?} isBuy {} status {:?}",
            ack.pair.address, ack.is_buy, ack.tx_status
        );

        let _ = self
            .report_sender
            .send(ReportData::Execution(ack.clone()))
            .await;
        let _ = self.watcher_sender.send(ack.clone()).await;

        let mut blacklist: Vec<Address> = Vec::new();
        {
            let mut state = self.state.lock().unwrap();

            if ack.tx_status == TxStatus::Success {
                // Redelivered success acks must leave state unchanged.
                let key = (ack.pair.address, ack.is_buy, ack.tx_hash.clone());
                if state.processed_acks.contains(&key) {
                    warn!("[STRATEGY] duplicate ack {:?} ignored", key);
                    return;
                }
                if state.processed_acks.len() >= PROCESSED_ACK_WINDOW {
                    state.processed_acks.pop_front();
                }
                state.processed_acks.push_back(key);

                if ack.is_buy {
                    if !state
                        .inventory
                        .iter()
                        .any(|p| p.pair.address == ack.pair.address)
                    {
                        state.inventory.push(Position {
                            pair: ack.pair.clone(),
                            amount: ack.amount_out,
                            buy_price: calculate_price(ack.amount_out, ack.amount_in),
                            start_time: Utc::now().timestamp() as u64,
                            pnl: Decimal::ZERO,
                            signer: ack.signer,
                            bot: ack.bot,
                            amount_in: Some(ack.amount_in),
                            is_paper: ack.is_paper,
                        });
                        warn!(
                            "[STRATEGY] append {:?} to inventory ({})",
                            ack.pair.address,
                            state.inventory.len()
                        );
                    }
                } else {
                    state.fullfilled = state.fullfilled.saturating_sub(1);
                    state.liquidated = false;

                    let buy_amount = state.buy_amount;
                    let pnl = (ack.amount_out - buy_amount - self.config.gas_cost) / buy_amount
                        * Decimal::from(100);
                    state.epoch_pnl.1 += pnl;

                    let expect = calculate_expect_pnl(
                        buy_amount,
                        self.config.min_buy_amount,
                        self.config.min_expected_pnl,
                        self.config.risk_reward_ratio,
                    );
                    if state.epoch_pnl.1 > expect
                        && buy_amount + self.config.amount_change_step
                            <= self.config.max_buy_amount
                    {
                        state.buy_amount = buy_amount + self.config.amount_change_step;
                        state.epoch_pnl.1 = Decimal::ZERO;
                        warn!(
                            "[STRATEGY] increase buy-amount to {} (pnl above {}), reset pnl",
                            state.buy_amount, expect
                        );
                    }
                    warn!("[STRATEGY] epoch pnl {}", state.epoch_pnl.1.round_dp(6));
                }
            } else if ack.is_buy {
                state.fullfilled = state.fullfilled.saturating_sub(1);
            } else {
                state.fullfilled = state.fullfilled.saturating_sub(1);
                state.liquidated = false;

                let buy_amount = state.buy_amount;
                let pnl =
                    (-buy_amount - self.config.gas_cost) / buy_amount * Decimal::from(100);
                state.epoch_pnl.1 += pnl;
                warn!(
                    "[STRATEGY] liquidation failed, epoch pnl {}",
                    state.epoch_pnl.1.round_dp(6)
                );

                if state.epoch_pnl.1 < Decimal::from(-100)
                    && buy_amount - self.config.amount_change_step >= self.config.min_buy_amount
                {
                    state.buy_amount = buy_amount - self.config.amount_change_step;
                    state.epoch_pnl.1 = Decimal::ZERO;
                    warn!(
                        "[STRATEGY] decrease buy-amount to {} (pnl below -100), reset pnl",
                        state.buy_amount
                    );
                }

                blacklist.extend(ack.pair.creator);
            }
        }

        if !blacklist.is_empty() {
            warn!("[STRATEGY] add {:?} to blacklist", blacklist);
            let _ = self
                .report_sender
                .send(ReportData::BlacklistAdded(blacklist))
                .await;
        }
    }
}
