// ─────────────────────────────────────────────────────────────────────────────
// data.rs — Core data model shared by every component
//
// Pair / Position / ExecutionOrder / ExecutionAck plus the tagged unions used
// on the channels (ReportData, ControlOrder, FactoryOrder). Monetary fields
// are `rust_decimal::Decimal` scaled to whole ETH units; raw wei only exists
// at the RPC boundary.
// ─────────────────────────────────────────────────────────────────────────────
use ethers_core::types::{Address, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const WEI_PER_ETH: u64 = 1_000_000_000_000_000_000;

/// Converts a wei quantity to whole-ETH `Decimal` (18 fractional digits kept).
pub fn from_wei(value: U256) -> Decimal {
    let divisor = U256::exp10(18);
    let whole = value / divisor;
    let frac = (value % divisor).as_u64();
    // A whole part beyond u64::MAX ETH is not a realistic on-chain amount;
    // saturate rather than panic on hostile token balances.
    let whole = if whole > U256::from(u64::MAX) {
        u64::MAX
    } else {
        whole.as_u64()
    };
    Decimal::from(whole) + Decimal::from_i128_with_scale(frac as i128, 18)
}

/// Converts a whole-ETH `Decimal` back to wei, truncating sub-wei dust.
/// Amounts too large to scale collapse to zero, which downstream callers
/// treat as a failed conversion.
pub fn to_wei(amount: Decimal) -> U256 {
    if amount.is_sign_negative() || amount.is_zero() {
        return U256::zero();
    }
    let scaled = match amount.checked_mul(Decimal::from(WEI_PER_ETH)) {
        Some(scaled) => scaled.trunc(),
        None => return U256::zero(),
    };
    U256::from_dec_str(&scaled.to_string()).unwrap_or_else(|_| U256::zero())
}

/// `price := reserve_eth / reserve_token`, zero when either side is empty.
pub fn calculate_price(reserve_token: Decimal, reserve_eth: Decimal) -> Decimal {
    if reserve_token.is_zero() || reserve_eth.is_zero() {
        return Decimal::ZERO;
    }
    reserve_eth / reserve_token
}

/// Expected-PnL threshold that gates the adaptive size-up step.
pub fn calculate_expect_pnl(
    buy_amount: Decimal,
    min_buy_amount: Decimal,
    min_expected_pnl: Decimal,
    risk_reward_ratio: Decimal,
) -> Decimal {
    if min_buy_amount.is_zero() {
        return Decimal::ZERO;
    }
    buy_amount / min_buy_amount * min_expected_pnl * risk_reward_ratio
}

// ─── Pair ─────────────────────────────────────────────────────────────────────

/// A V2 liquidity pair with WETH on one side. `token_index` records which
/// side the non-WETH token occupies and is frozen once the pair is held.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pair {
    pub address: Address,
    pub token: Address,
    /// 0 if the non-WETH token is token0, 1 if it is token1.
    pub token_index: u8,
    pub reserve_token: Decimal,
    pub reserve_eth: Decimal,
    /// Block timestamp of the PairCreated block.
    pub created_at: u64,
    pub creator: Option<Address>,
    /// Monotonic: once true, stays true.
    pub contract_verified: bool,
    pub number_tx_mm: u32,
    pub inspect_attempts: u32,
    pub last_inspected_block: u64,
}

impl Pair {
    pub fn new(address: Address, token: Address, token_index: u8, created_at: u64) -> Self {
        Self {
            address,
            token,
            token_index,
            reserve_token: Decimal::ZERO,
            reserve_eth: Decimal::ZERO,
            created_at,
            creator: None,
            contract_verified: false,
            number_tx_mm: 0,
            inspect_attempts: 0,
            last_inspected_block: 0,
        }
    }

    pub fn price(&self) -> Decimal {
        calculate_price(self.reserve_token, self.reserve_eth)
    }

    /// Splits raw `getReserves`/`Sync` words into (token, eth) by token_index.
    pub fn assign_reserves(&mut self, reserve0: U256, reserve1: U256) {
        if self.token_index == 0 {
            self.reserve_token = from_wei(reserve0);
            self.reserve_eth = from_wei(reserve1);
        } else {
            self.reserve_token = from_wei(reserve1);
            self.reserve_eth = from_wei(reserve0);
        }
    }
}

// ─── Block tick ───────────────────────────────────────────────────────────────

/// One tick of the block-driven loop: the new head's gas fields, pairs
/// created in that block, and the refreshed inventory snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockData {
    pub block_number: u64,
    pub block_timestamp: u64,
    pub base_fee: u64,
    pub gas_used: u64,
    pub gas_limit: u64,
    pub pairs: Vec<Pair>,
    pub inventory: Vec<Pair>,
}

// ─── Position ─────────────────────────────────────────────────────────────────

/// An open holding. Created on a successful buy ack, removed on the sell ack
/// or at liquidation dispatch; there is no revive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub pair: Pair,
    /// Token units held.
    pub amount: Decimal,
    /// ETH paid per token at entry.
    pub buy_price: Decimal,
    pub start_time: u64,
    pub pnl: Decimal,
    pub signer: Option<Address>,
    pub bot: Option<Address>,
    /// ETH invested (recorded for the persistence layer).
    pub amount_in: Option<Decimal>,
    pub is_paper: bool,
}

// ─── Orders and acknowledgements ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    Failed,
    Success,
}

/// Immutable once queued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOrder {
    pub block_number: u64,
    pub block_timestamp: u64,
    pub pair: Pair,
    pub amount_in: Decimal,
    pub amount_out_min: Decimal,
    pub is_buy: bool,
    /// Unaddressed orders round-robin across the executor accounts.
    pub signer: Option<Address>,
    pub bot: Option<Address>,
    pub is_paper: bool,
}

/// Immutable. `amount_out` is zero iff `tx_status == Failed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionAck {
    pub lead_block: u64,
    pub block_number: u64,
    pub tx_hash: String,
    pub tx_status: TxStatus,
    pub pair: Pair,
    pub amount_in: Decimal,
    pub amount_out: Decimal,
    pub is_buy: bool,
    pub signer: Option<Address>,
    pub bot: Option<Address>,
    pub is_paper: bool,
}

// ─── Inspection ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaliciousKind {
    Unmalicious,
    CreatorBlacklisted,
    /// Explorer unreachable or inconclusive; do not blacklist.
    Unverified,
    MaliciousTxIn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    pub pair: Pair,
    pub amount_in: Decimal,
    pub amount_out: Decimal,
    /// Signed round-trip slippage in basis points.
    pub slippage: Decimal,
    pub amount_token: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectionResult {
    pub pair: Pair,
    pub from_block: u64,
    pub to_block: u64,
    pub reserve_inrange: bool,
    pub is_malicious: MaliciousKind,
    pub contract_verified: bool,
    /// Successful creator calls into the token in the window (re-inspections).
    pub creator_call_count: u32,
    pub number_tx_mm: u32,
    /// Present only when the round trip succeeded with acceptable slippage.
    pub simulation_result: Option<SimulationResult>,
}

impl InspectionResult {
    pub fn new(pair: Pair, from_block: u64, to_block: u64) -> Self {
        Self {
            pair,
            from_block,
            to_block,
            reserve_inrange: false,
            is_malicious: MaliciousKind::Unmalicious,
            contract_verified: false,
            creator_call_count: 0,
            number_tx_mm: 0,
            simulation_result: None,
        }
    }
}

// ─── Bots ─────────────────────────────────────────────────────────────────────

/// A deployed trading contract bonded to one executor account. At most one
/// open position references a bot; it is retired once worn out or failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bot {
    pub address: Address,
    pub owner: Address,
    pub deployed_at: u64,
    pub number_used: u32,
    pub is_holding: bool,
    pub is_failed: bool,
}

impl Bot {
    /// Applies one execution outcome. `number_used` only ever grows and
    /// `is_failed` is monotonic.
    pub fn apply_ack(&mut self, is_buy: bool, tx_status: TxStatus) {
        if is_buy {
            self.is_holding = true;
        } else {
            self.is_holding = false;
            self.number_used += 1;
            if tx_status != TxStatus::Success {
                self.is_failed = true;
            }
        }
    }

    pub fn needs_replacement(&self, max_number_used: u32) -> bool {
        self.number_used >= max_number_used || self.is_failed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotCreationOrder {
    pub owner: Address,
    pub retry_times: u32,
}

/// Work items for the bot factory queue.
#[derive(Debug, Clone)]
pub enum FactoryOrder {
    Create(BotCreationOrder),
    Update(Bot, ExecutionAck),
}

// ─── Channel payloads ─────────────────────────────────────────────────────────

/// Events flowing into the persistence sink.
#[derive(Debug, Clone)]
pub enum ReportData {
    Block(BlockData),
    Execution(ExecutionAck),
    BlacklistAdded(Vec<Address>),
}

/// Control-plane messages from the reporter back into the strategy.
#[derive(Debug, Clone)]
pub enum ControlOrder {
    PendingPositions(Vec<Position>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Live,
    PaperTrade,
    WatchOnly,
}

impl RunMode {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => RunMode::PaperTrade,
            2 => RunMode::WatchOnly,
            _ => RunMode::Live,
        }
    }
}
