// ─────────────────────────────────────────────────────────────────────────────
// simulator.rs — Round-trip buy/sell simulation via state-override eth_call
//
// Executes a buy then a sell against the inspector bot contract at the latest
// block, entirely off-chain:
//   1. buy(token, deadline) with the signer balance overridden to 1 ETH
//   2. balance-slot probe: find which storage slot holds the token's balances
//      mapping by overriding candidate slots with a sentinel amount
//   3. sell(token, recipient, deadline) with the bot's token balance
//      overridden to the amount the buy produced
// ─────────────────────────────────────────────────────────────────────────────
use std::collections::HashMap;
use std::sync::Arc;

use ethers_core::types::{Address, H256, U256};
use rust_decimal::Decimal;

use crate::data::{from_wei, to_wei, Pair, SimulationResult};
use crate::gateway::{
    balance_storage_index, encode_address, encode_uint, func_selector, AccountOverride,
    CallRequest, ChainClient, StateOverride,
};

/// Deadline slack for the simulated router calls, seconds past now.
const CALL_DEADLINE_DELAY_SECONDS: i64 = 1_000;

/// Sentinel balance written into candidate slots while probing: 10^27.
fn probe_amount() -> U256 {
    U256::exp10(27)
}

pub struct EthCallSimulator {
    chain: Arc<dyn ChainClient>,
    signer: Address,
    bot: Address,
    /// Candidate balance-mapping slots probed in `[0, limit)`.
    probe_slot_limit: u64,
}

impl EthCallSimulator {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        signer: Address,
        bot: Address,
        probe_slot_limit: u64,
    ) -> Self {
        Self {
            chain,
            signer,
            bot,
            probe_slot_limit,
        }
    }

    fn deadline() -> U256 {
        U256::from((chrono::Utc::now().timestamp() + CALL_DEADLINE_DELAY_SECONDS) as u64)
    }

    fn token_state_diff(token: Address, storage_index: H256, amount: U256) -> StateOverride {
        let mut diff = HashMap::new();
        diff.insert(storage_index, H256::from(encode_uint(amount)));
        let mut overrides = StateOverride::new();
        overrides.insert(
            token,
            AccountOverride {
                balance: None,
                state_diff: Some(diff),
            },
        );
        overrides
    }

    /// Simulated `buy(token, deadline)` with the signer funded to 1 ETH.
    /// Returns the decoded `uint[]` return value: `[spent_eth, received_tokens]`.
    pub async fn buy(
        &self,
        token: Address,
        amount: Decimal,
        signer: Option<Address>,
        bot: Option<Address>,
    ) -> Option<Vec<U256>> {
        let signer = signer.unwrap_or(self.signer);
        let bot = bot.unwrap_or(self.bot);

        let mut overrides = StateOverride::new();
        overrides.insert(
            signer,
            AccountOverride {
                balance: Some(U256::exp10(18)),
                state_diff: None,
            },
        );

        let mut data = func_selector("buy(address,uint256)").to_vec();
        data.extend_from_slice(&encode_address(token));
        data.extend_from_slice(&encode_uint(Self::deadline()));

        let req = CallRequest {
            from: Some(signer),
            to: bot,
            value: Some(to_wei(amount)),
            data,
        };

        match self.chain.call_with_override(&req, &overrides).await {
            Ok(output) => crate::gateway::decode_uint_array(&output),
            Err(e) => {
                log::error!("[SIMULATOR] buy error {}", e);
                None
            }
        }
    }

    /// Simulated `sell(token, recipient, deadline)` with the bot's token
    /// balance overridden to `amount`. Returns `[spent_tokens, received_eth]`.
    pub async fn sell(
        &self,
        token: Address,
        amount: Decimal,
        signer: Option<Address>,
        bot: Option<Address>,
    ) -> Option<Vec<U256>> {
        let signer = signer.unwrap_or(self.signer);
        let bot = bot.unwrap_or(self.bot);

        let slot = self.determine_balance_slot_index(token).await?;
        log::info!("[SIMULATOR] balance slot index {}", slot);

        let storage_index = balance_storage_index(bot, slot);

        let mut data = func_selector("sell(address,address,uint256)").to_vec();
        data.extend_from_slice(&encode_address(token));
        data.extend_from_slice(&encode_address(signer));
        data.extend_from_slice(&encode_uint(Self::deadline()));

        let req = CallRequest {
            from: Some(signer),
            to: bot,
            value: None,
            data,
        };
        let overrides = Self::token_state_diff(token, storage_index, to_wei(amount));

        match self.chain.call_with_override(&req, &overrides).await {
            Ok(output) => crate::gateway::decode_uint_array(&output),
            Err(e) => {
                log::error!("[SIMULATOR] sell error {}", e);
                None
            }
        }
    }

    /// Finds the storage slot of the token's balances mapping by writing a
    /// sentinel into each candidate slot and reading it back via balanceOf.
    /// Robust to proxies and custom layouts without needing source access.
    pub async fn determine_balance_slot_index(&self, token: Address) -> Option<u64> {
        let fake_owner = self.signer;

        for idx in 0..self.probe_slot_limit {
            let storage_index = balance_storage_index(fake_owner, idx);

            let mut data = func_selector("balanceOf(address)").to_vec();
            data.extend_from_slice(&encode_address(fake_owner));

            let req = CallRequest {
                from: Some(self.signer),
                to: token,
                value: None,
                data,
            };
            let overrides = Self::token_state_diff(token, storage_index, probe_amount());

            match self.chain.call_with_override(&req, &overrides).await {
                Ok(output) => {
                    if crate::gateway::decode_uint(&output) == Some(probe_amount()) {
                        return Some(idx);
                    }
                }
                Err(e) => {
                    log::debug!("[SIMULATOR] slot {} probe error {}", idx, e);
                }
            }
        }

        None
    }

    async fn inspect_token_by_swap(
        &self,
        token: Address,
        amount: Decimal,
    ) -> Option<(Decimal, Decimal, Decimal, Decimal)> {
        let result_buy = self.buy(token, amount, None, None).await?;
        log::info!("[SIMULATOR] buy result {:?}", result_buy);

        if result_buy.len() != 2 || result_buy[0] != to_wei(amount) {
            log::error!("[SIMULATOR] buy result mismatch for {:?}", token);
            return None;
        }

        let received_tokens = result_buy[1];
        let result_sell = self
            .sell(token, from_wei(received_tokens), None, None)
            .await?;
        log::info!("[SIMULATOR] sell result {:?}", result_sell);

        if result_sell.len() != 2 || result_sell[0] != received_tokens {
            log::error!("[SIMULATOR] sell result mismatch for {:?}", token);
            return None;
        }

        let amount_out = from_wei(result_sell[1]);
        let slippage = (amount - amount_out) / amount * Decimal::from(10_000);
        let amount_token = from_wei(received_tokens);

        Some((amount, amount_out, slippage, amount_token))
    }

    /// Runs the full round trip for one pair. `None` means the simulation was
    /// rejected; the pair may be re-inspected at the next interval.
    pub async fn inspect_pair(&self, pair: &Pair, amount: Decimal) -> Option<SimulationResult> {
        let (amount_in, amount_out, slippage, amount_token) =
            self.inspect_token_by_swap(pair.token, amount).await?;

        Some(SimulationResult {
            pair: pair.clone(),
            amount_in,
            amount_out,
            slippage,
            amount_token,
        })
    }
}
