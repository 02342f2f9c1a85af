use std::fmt;
use std::str::FromStr;

use ethers_core::types::Address;
use rust_decimal::Decimal;

use crate::data::RunMode;

#[derive(Debug, Clone)]
pub enum ConfigError {
    Missing(String),
    Invalid(String, String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "missing required env var {}", key),
            ConfigError::Invalid(key, value) => {
                write!(f, "env var {} has invalid value '{}'", key, value)
            }
        }
    }
}

/// Everything the engine reads from the environment, parsed once at boot.
/// A missing or malformed value is fatal: surface and abort.
#[derive(Debug, Clone)]
pub struct Config {
    // RPC endpoints
    pub https_url: String,
    pub wss_url: String,

    // On-chain addresses
    pub factory_address: Address,
    pub router_address: Address,
    pub weth_address: Address,
    pub bot_factory: Address,
    pub bot_implementation: Address,
    pub inspector_bot: Address,
    pub manager_address: Address,
    pub manager_key: String,
    pub execution_keys: Vec<String>,

    // Explorer API
    pub etherscan_api_url: String,
    pub basescan_api_keys: Vec<String>,

    // Inspection thresholds
    pub reserve_eth_min_threshold: Decimal,
    pub reserve_eth_max_threshold: Decimal,
    pub max_inspect_attempts: u32,
    pub inspect_interval_seconds: u64,
    pub number_tx_mm_threshold: u32,
    pub rogue_creator_frozen_seconds: u64,
    pub contract_verified_required: bool,
    pub source_deny_markers: Vec<String>,
    pub balance_slot_probe_limit: u64,

    // Trading
    pub run_mode: RunMode,
    pub inventory_capacity: usize,
    pub buy_amount: Decimal,
    pub min_buy_amount: Decimal,
    pub max_buy_amount: Decimal,
    pub amount_change_step: Decimal,
    pub min_expected_pnl: Decimal,
    pub risk_reward_ratio: Decimal,
    pub epoch_time_hours: u32,
    pub take_profit_percentage: Decimal,
    pub stop_loss_percentage: Decimal,
    pub hold_max_duration_seconds: u64,
    pub hard_stop_pnl_threshold: Decimal,

    // Gas
    pub max_gas_price_allowance: Decimal,
    /// Flat per-trade gas cost in ETH, derived from GAS_COST_GWEI.
    pub gas_cost: Decimal,
    pub execution_gas_limit: u64,
    pub create_bot_gas_limit: u64,
    pub max_fee_per_gas: u64,
    pub max_priority_fee_per_gas: u64,

    // Bots
    pub bot_max_number_used: u32,

    // Sinks
    pub store_path: String,
    pub redis_url: String,
}

fn require(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::Missing(key.to_string()))
}

fn require_parsed<T: FromStr>(key: &str) -> Result<T, ConfigError> {
    let raw = require(key)?;
    raw.parse::<T>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), raw))
}

fn require_address(key: &str) -> Result<Address, ConfigError> {
    let raw = require(key)?;
    raw.parse::<Address>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), raw))
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let gas_cost_gwei: Decimal = require_parsed("GAS_COST_GWEI")?;
        let execution_keys = split_list(&require("EXECUTION_KEYS")?);
        if execution_keys.is_empty() {
            return Err(ConfigError::Invalid(
                "EXECUTION_KEYS".to_string(),
                "empty".to_string(),
            ));
        }

        Ok(Self {
            https_url: require("HTTPS_URL")?,
            wss_url: require("WSS_URL")?,

            factory_address: require_address("FACTORY_ADDRESS")?,
            router_address: require_address("ROUTER_ADDRESS")?,
            weth_address: require_address("WETH_ADDRESS")?,
            bot_factory: require_address("BOT_FACTORY")?,
            bot_implementation: require_address("BOT_IMPLEMENTATION")?,
            inspector_bot: require_address("INSPECTOR_BOT")?,
            manager_address: require_address("MANAGER_ADDRESS")?,
            manager_key: require("MANAGER_KEY")?,
            execution_keys,

            etherscan_api_url: require("ETHERSCAN_API_URL")?,
            basescan_api_keys: split_list(&require("BASESCAN_API_KEYS")?),

            reserve_eth_min_threshold: require_parsed("RESERVE_ETH_MIN_THRESHOLD")?,
            reserve_eth_max_threshold: require_parsed("RESERVE_ETH_MAX_THRESHOLD")?,
            max_inspect_attempts: require_parsed("MAX_INSPECT_ATTEMPTS")?,
            inspect_interval_seconds: require_parsed("INSPECT_INTERVAL_SECONDS")?,
            number_tx_mm_threshold: require_parsed("NUMBER_TX_MM_THRESHOLD")?,
            rogue_creator_frozen_seconds: require_parsed("ROGUE_CREATOR_FROZEN_SECONDS")?,
            contract_verified_required: require_parsed::<u8>("CONTRACT_VERIFIED_REQUIRED")? == 1,
            source_deny_markers: std::env::var("SOURCE_DENY_MARKERS")
                .map(|v| split_list(&v))
                .unwrap_or_else(|_| vec!["family".to_string()]),
            balance_slot_probe_limit: parse_or("BALANCE_SLOT_PROBE_LIMIT", 9),

            run_mode: RunMode::from_u8(parse_or("RUN_MODE", 0u8)),
            inventory_capacity: require_parsed("INVENTORY_CAPACITY")?,
            buy_amount: require_parsed("BUY_AMOUNT")?,
            min_buy_amount: require_parsed("MIN_BUY_AMOUNT")?,
            max_buy_amount: require_parsed("MAX_BUY_AMOUNT")?,
            amount_change_step: require_parsed("AMOUNT_CHANGE_STEP")?,
            min_expected_pnl: require_parsed("MIN_EXPECTED_PNL")?,
            risk_reward_ratio: require_parsed("RISK_REWARD_RATIO")?,
            epoch_time_hours: require_parsed("EPOCH_TIME_HOURS")?,
            take_profit_percentage: require_parsed("TAKE_PROFIT_PERCENTAGE")?,
            stop_loss_percentage: require_parsed("STOP_LOSS_PERCENTAGE")?,
            hold_max_duration_seconds: require_parsed("HOLD_MAX_DURATION_SECONDS")?,
            hard_stop_pnl_threshold: require_parsed("HARD_STOP_PNL_THRESHOLD")?,

            max_gas_price_allowance: require_parsed("MAX_GAS_PRICE_ALLOWANCE")?,
            gas_cost: gas_cost_gwei * Decimal::new(1, 9),
            execution_gas_limit: require_parsed("EXECUTION_GAS_LIMIT")?,
            create_bot_gas_limit: require_parsed("CREATE_BOT_GAS_LIMIT")?,
            max_fee_per_gas: parse_or("MAX_FEE_PER_GAS", 1_000_000_000),
            max_priority_fee_per_gas: parse_or("MAX_PRIORITY_FEE_PER_GAS", 1_000_000_000),

            bot_max_number_used: require_parsed("BOT_MAX_NUMBER_USED")?,

            store_path: parse_or("STORE_PATH", "data/store.json".to_string()),
            redis_url: parse_or("REDIS_URL", "redis://127.0.0.1:6379".to_string()),
        })
    }
}
