// store.rs — JSON-file-backed persistence tables mirroring the admin schema:
// block, transaction, pair, position, position_transaction, blacklist, bot,
// executor, pnl. Loaded at boot, saved after every mutation. Row ids come
// from a single monotonic counter.
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{TimeZone, Utc};
use ethers_core::types::Address;
use log::{error, info, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::data::{ExecutionAck, Pair, Position, TxStatus};
use crate::gateway::hex_address;

const PENDING_POSITION_MAX_AGE_SECONDS: i64 = 3_600;
/// Bootstrapped positions are aged backwards to force a prompt liquidation
/// decision on the first tick.
const PENDING_POSITION_START_SHIFT_SECONDS: i64 = 600;
const BLACKLIST_CREATED_WINDOW_DAYS: i64 = 90;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockRow {
    pub id: u64,
    pub block_number: u64,
    pub block_timestamp: u64,
    pub base_fee: u64,
    pub gas_used: u64,
    pub gas_limit: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionRow {
    pub id: u64,
    pub tx_hash: String,
    pub block_id: u64,
    pub status: u8,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PairRow {
    pub id: u64,
    pub address: String,
    pub token: String,
    pub token_index: u8,
    pub reserve_token: Decimal,
    pub reserve_eth: Decimal,
    pub creator: Option<String>,
    pub deployed_at: i64,
    pub deployed_block: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PositionRow {
    pub id: u64,
    pub pair_id: u64,
    pub amount: Decimal,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    pub purchased_at: i64,
    pub liquidated_at: Option<i64>,
    pub is_liquidated: bool,
    pub liquidation_attempts: u32,
    pub pnl: Decimal,
    pub investment: Decimal,
    pub returns: Decimal,
    pub signer: Option<String>,
    pub bot: Option<String>,
    pub is_paper: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PositionTransactionRow {
    pub id: u64,
    pub position_id: u64,
    pub transaction_id: u64,
    pub is_buy: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlacklistRow {
    pub id: u64,
    pub address: String,
    pub frozen_at: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotRow {
    pub id: u64,
    pub address: String,
    pub owner: String,
    pub deployed_at: i64,
    pub number_used: u32,
    pub is_holding: bool,
    pub is_failed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorRow {
    pub id: u64,
    pub address: String,
    pub initial_balance: Decimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PnlRow {
    pub id: u64,
    /// "%Y-%m-%d %H:00:00" bucket key.
    pub timestamp_hour: String,
    pub number_positions: u32,
    pub number_failed: u32,
    pub hourly_pnl: Decimal,
    pub avg_daily_pnl: Decimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreData {
    next_id: u64,
    blocks: Vec<BlockRow>,
    transactions: Vec<TransactionRow>,
    pairs: Vec<PairRow>,
    positions: Vec<PositionRow>,
    position_transactions: Vec<PositionTransactionRow>,
    blacklist: Vec<BlacklistRow>,
    bots: Vec<BotRow>,
    executors: Vec<ExecutorRow>,
    pnl: Vec<PnlRow>,
}

impl StoreData {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

pub struct Store {
    path: PathBuf,
    inner: Mutex<StoreData>,
}

fn hour_bucket(ts: i64) -> String {
    match Utc.timestamp_opt(ts, 0).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:00:00").to_string(),
        None => String::new(),
    }
}

fn day_bucket(ts: i64) -> String {
    match Utc.timestamp_opt(ts, 0).single() {
        Some(dt) => dt.format("%Y-%m-%d").to_string(),
        None => String::new(),
    }
}

fn hour_of_day(ts: i64) -> i64 {
    match Utc.timestamp_opt(ts, 0).single() {
        Some(dt) => dt.format("%H").to_string().parse().unwrap_or(0),
        None => 0,
    }
}

impl Store {
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let data = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<StoreData>(&content) {
                Ok(data) => {
                    info!(
                        "[STORE] loaded {:?}: {} positions, {} bots, {} blacklisted",
                        path,
                        data.positions.len(),
                        data.bots.len(),
                        data.blacklist.len()
                    );
                    data
                }
                Err(e) => {
                    error!("[STORE] failed to parse {:?}: {}. Starting empty.", path, e);
                    StoreData::default()
                }
            },
            Err(_) => {
                info!("[STORE] {:?} not found. Starting empty.", path);
                StoreData::default()
            }
        };
        Self {
            path,
            inner: Mutex::new(data),
        }
    }

    fn save(&self, data: &StoreData) {
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(data) {
            Ok(content) => {
                if let Err(e) = std::fs::write(&self.path, content) {
                    error!("[STORE] failed to write {:?}: {}", self.path, e);
                }
            }
            Err(e) => error!("[STORE] failed to serialize: {}", e),
        }
    }

    fn now() -> i64 {
        Utc::now().timestamp()
    }

    // ─── block + pair reports ────────────────────────────────────────────────

    pub fn upsert_block(&self, block: &crate::data::BlockData) {
        let mut data = self.inner.lock().unwrap();
        if !data
            .blocks
            .iter()
            .any(|b| b.block_number == block.block_number)
        {
            let id = data.next_id();
            data.blocks.push(BlockRow {
                id,
                block_number: block.block_number,
                block_timestamp: block.block_timestamp,
                base_fee: block.base_fee,
                gas_used: block.gas_used,
                gas_limit: block.gas_limit,
            });
        }

        for pair in &block.pairs {
            let address = hex_address(pair.address);
            if !data.pairs.iter().any(|p| p.address == address) {
                let id = data.next_id();
                data.pairs.push(PairRow {
                    id,
                    address,
                    token: hex_address(pair.token),
                    token_index: pair.token_index,
                    reserve_token: pair.reserve_token,
                    reserve_eth: pair.reserve_eth,
                    creator: pair.creator.map(hex_address),
                    deployed_at: block.block_timestamp as i64,
                    deployed_block: block.block_number,
                });
            }
        }
        self.save(&data);
    }

    // ─── executions ──────────────────────────────────────────────────────────

    /// Records one execution ack: block/transaction/pair rows, position
    /// open/close, the position↔transaction link, and the hourly pnl bucket.
    pub fn record_execution(&self, ack: &ExecutionAck, gas_cost: Decimal) {
        let now = Self::now();
        let mut data = self.inner.lock().unwrap();

        let block_id = match data
            .blocks
            .iter()
            .find(|b| b.block_number == ack.block_number)
        {
            Some(b) => b.id,
            None => {
                let id = data.next_id();
                data.blocks.push(BlockRow {
                    id,
                    block_number: ack.block_number,
                    ..Default::default()
                });
                id
            }
        };

        let transaction_id = match data.transactions.iter().find(|t| t.tx_hash == ack.tx_hash) {
            Some(t) => t.id,
            None => {
                let id = data.next_id();
                data.transactions.push(TransactionRow {
                    id,
                    tx_hash: ack.tx_hash.clone(),
                    block_id,
                    status: if ack.tx_status == TxStatus::Success { 1 } else { 0 },
                });
                id
            }
        };

        let pair_address = hex_address(ack.pair.address);
        let pair_id = match data.pairs.iter().find(|p| p.address == pair_address) {
            Some(p) => p.id,
            None => {
                let id = data.next_id();
                data.pairs.push(PairRow {
                    id,
                    address: pair_address.clone(),
                    token: hex_address(ack.pair.token),
                    token_index: ack.pair.token_index,
                    creator: ack.pair.creator.map(hex_address),
                    ..Default::default()
                });
                id
            }
        };

        let position_id = match data.positions.iter_mut().find(|p| p.pair_id == pair_id) {
            Some(position) => {
                if !ack.is_buy && !position.is_liquidated {
                    position.is_liquidated = true;
                    position.liquidated_at = Some(now);
                    position.liquidation_attempts += 1;
                    position.sell_price = if ack.amount_in > Decimal::ZERO {
                        ack.amount_out / ack.amount_in
                    } else {
                        Decimal::ZERO
                    };
                    position.returns = ack.amount_out;
                    position.pnl = if position.investment > Decimal::ZERO {
                        (ack.amount_out - position.investment - gas_cost) / position.investment
                            * Decimal::from(100)
                    } else {
                        Decimal::ZERO
                    };
                }
                position.id
            }
            None => {
                let id = data.next_id();
                data.positions.push(PositionRow {
                    id,
                    pair_id,
                    amount: if ack.is_buy { ack.amount_out } else { Decimal::ZERO },
                    buy_price: if ack.is_buy && ack.amount_out > Decimal::ZERO {
                        ack.amount_in / ack.amount_out
                    } else {
                        Decimal::ZERO
                    },
                    sell_price: if !ack.is_buy && ack.amount_in > Decimal::ZERO {
                        ack.amount_out / ack.amount_in
                    } else {
                        Decimal::ZERO
                    },
                    purchased_at: now,
                    is_liquidated: !ack.is_buy,
                    investment: ack.amount_in,
                    signer: ack.signer.map(hex_address),
                    bot: ack.bot.map(hex_address),
                    is_paper: ack.is_paper,
                    ..Default::default()
                });
                id
            }
        };

        if !data
            .position_transactions
            .iter()
            .any(|pt| pt.position_id == position_id && pt.transaction_id == transaction_id)
        {
            let id = data.next_id();
            data.position_transactions.push(PositionTransactionRow {
                id,
                position_id,
                transaction_id,
                is_buy: ack.is_buy,
            });
        }

        let purchased_at = data
            .positions
            .iter()
            .find(|p| p.id == position_id)
            .map(|p| p.purchased_at)
            .unwrap_or(now);
        Self::refresh_pnl_bucket(&mut data, purchased_at);

        self.save(&data);
    }

    /// Re-aggregates the pnl row for the hour containing `purchased_at`.
    fn refresh_pnl_bucket(data: &mut StoreData, purchased_at: i64) {
        let hour_key = hour_bucket(purchased_at);
        let day_key = day_bucket(purchased_at);
        if hour_key.is_empty() {
            return;
        }

        let in_hour: Vec<&PositionRow> = data
            .positions
            .iter()
            .filter(|p| hour_bucket(p.purchased_at) == hour_key)
            .collect();
        let number_positions = in_hour.len() as u32;
        let number_failed = in_hour
            .iter()
            .filter(|p| p.pnl <= Decimal::from(-100))
            .count() as u32;
        let hourly_pnl: Decimal = in_hour.iter().map(|p| p.pnl).sum();

        let day_sum: Decimal = data
            .positions
            .iter()
            .filter(|p| day_bucket(p.purchased_at) == day_key)
            .map(|p| p.pnl)
            .sum();
        let hours_elapsed = Decimal::from(hour_of_day(purchased_at) + 1);
        let avg_daily_pnl = day_sum / hours_elapsed;

        match data.pnl.iter_mut().find(|p| p.timestamp_hour == hour_key) {
            Some(row) => {
                row.number_positions = number_positions;
                row.number_failed = number_failed;
                row.hourly_pnl = hourly_pnl;
                row.avg_daily_pnl = avg_daily_pnl;
            }
            None => {
                let id = data.next_id();
                data.pnl.push(PnlRow {
                    id,
                    timestamp_hour: hour_key,
                    number_positions,
                    number_failed,
                    hourly_pnl,
                    avg_daily_pnl,
                });
            }
        }
    }

    // ─── blacklist ───────────────────────────────────────────────────────────

    pub fn add_blacklist(&self, addresses: &[Address]) {
        let now = Self::now();
        let mut data = self.inner.lock().unwrap();
        for addr in addresses {
            let key = hex_address(*addr);
            match data.blacklist.iter_mut().find(|b| b.address == key) {
                Some(row) => {
                    warn!("[STORE] blacklist {} exists, refreshing frozen time", key);
                    row.frozen_at = now;
                }
                None => {
                    let id = data.next_id();
                    warn!("[STORE] blacklist {} added", key);
                    data.blacklist.push(BlacklistRow {
                        id,
                        address: key,
                        frozen_at: now,
                        created_at: now,
                    });
                }
            }
        }
        self.save(&data);
    }

    /// True when the creator was frozen within the window and the entry is
    /// not older than 90 days.
    pub fn is_blacklisted(&self, creator: Address, frozen_within_seconds: u64) -> bool {
        let now = Self::now();
        let key = hex_address(creator);
        let data = self.inner.lock().unwrap();
        data.blacklist.iter().any(|b| {
            b.address == key
                && b.frozen_at >= now - frozen_within_seconds as i64
                && b.created_at >= now - BLACKLIST_CREATED_WINDOW_DAYS * 24 * 3_600
        })
    }

    // ─── bots ────────────────────────────────────────────────────────────────

    pub fn find_available_bot(
        &self,
        owner: Address,
        max_number_used: u32,
    ) -> Option<crate::data::Bot> {
        let key = hex_address(owner);
        let data = self.inner.lock().unwrap();
        data.bots
            .iter()
            .find(|b| b.owner == key && b.number_used < max_number_used && !b.is_failed)
            .and_then(|row| {
                Some(crate::data::Bot {
                    address: row.address.parse().ok()?,
                    owner,
                    deployed_at: row.deployed_at as u64,
                    number_used: row.number_used,
                    is_holding: row.is_holding,
                    is_failed: row.is_failed,
                })
            })
    }

    pub fn save_bot(&self, bot: &crate::data::Bot) {
        let mut data = self.inner.lock().unwrap();
        let key = hex_address(bot.address);
        if !data.bots.iter().any(|b| b.address == key) {
            let id = data.next_id();
            data.bots.push(BotRow {
                id,
                address: key,
                owner: hex_address(bot.owner),
                deployed_at: bot.deployed_at as i64,
                number_used: bot.number_used,
                is_holding: bot.is_holding,
                is_failed: bot.is_failed,
            });
        }
        self.save(&data);
    }

    pub fn update_bot(&self, bot_address: Address, is_buy: bool, success: bool) {
        let mut data = self.inner.lock().unwrap();
        let key = hex_address(bot_address);
        match data.bots.iter_mut().find(|b| b.address == key) {
            Some(row) => {
                if is_buy {
                    row.is_holding = true;
                } else {
                    row.is_holding = false;
                    row.number_used += 1;
                    if !success {
                        row.is_failed = true;
                    }
                }
            }
            None => {
                warn!("[STORE] bot {} not found for status update", key);
            }
        }
        self.save(&data);
    }

    // ─── executors ───────────────────────────────────────────────────────────

    /// Registers the active signer set, dropping rows for retired signers.
    pub fn register_executors(&self, entries: &[(Address, Decimal)]) {
        let mut data = self.inner.lock().unwrap();
        let active: Vec<String> = entries.iter().map(|(a, _)| hex_address(*a)).collect();
        data.executors.retain(|e| active.contains(&e.address));

        for (addr, balance) in entries {
            let key = hex_address(*addr);
            if !data.executors.iter().any(|e| e.address == key) {
                let id = data.next_id();
                info!("[STORE] register executor {} balance {}", key, balance);
                data.executors.push(ExecutorRow {
                    id,
                    address: key,
                    initial_balance: *balance,
                });
            }
        }
        self.save(&data);
    }

    // ─── bootstrap ───────────────────────────────────────────────────────────

    /// Still-open positions purchased within the last hour, with start_time
    /// shifted backwards so the strategy re-evaluates them immediately.
    pub fn pending_positions(&self) -> Vec<Position> {
        let now = Self::now();
        let data = self.inner.lock().unwrap();

        data.positions
            .iter()
            .filter(|p| !p.is_liquidated && p.purchased_at >= now - PENDING_POSITION_MAX_AGE_SECONDS)
            .filter_map(|row| {
                let pair_row = data.pairs.iter().find(|p| p.id == row.pair_id)?;
                let mut pair = Pair::new(
                    pair_row.address.parse().ok()?,
                    pair_row.token.parse().ok()?,
                    pair_row.token_index,
                    pair_row.deployed_at as u64,
                );
                pair.reserve_token = pair_row.reserve_token;
                pair.reserve_eth = pair_row.reserve_eth;
                pair.creator = pair_row.creator.as_ref().and_then(|c| c.parse().ok());

                Some(Position {
                    pair,
                    amount: row.amount,
                    buy_price: row.buy_price,
                    start_time: (row.purchased_at - PENDING_POSITION_START_SHIFT_SECONDS) as u64,
                    pnl: Decimal::ZERO,
                    signer: row.signer.as_ref().and_then(|s| s.parse().ok()),
                    bot: row.bot.as_ref().and_then(|b| b.parse().ok()),
                    amount_in: Some(row.investment),
                    is_paper: row.is_paper,
                })
            })
            .collect()
    }
}
