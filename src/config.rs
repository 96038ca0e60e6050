//! Deployment addresses, gas policy and the per-call context

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use trove_math::Decimal;

/// Deployed protocol contracts
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractAddresses {
    pub borrower_operations: Address,
    pub trove_manager: Address,
    pub sorted_troves: Address,
    pub hint_helpers: Address,
    pub whitelist: Address,
    pub active_pool: Address,
    pub default_pool: Address,
}

/// Gas policy and hint-search tuning
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulateConfig {
    /// How long a transaction may stay pending while still passing the debt floor
    pub borrowing_fee_decay_tolerance_minutes: u64,
    /// Extra gas for a sorted-list walk when the hints went stale
    pub list_traversal_gas: u64,
    /// Fixed part of the base-rate update cost
    pub base_rate_update_gas: u64,
    /// Cost per squaring in the on-chain `decPow`
    pub base_rate_update_gas_per_squaring: u64,
    pub block_gas_limit: u64,
    /// Added to the current borrowing rate when no max fee is pinned
    pub borrowing_rate_slippage: Decimal,
    /// Added to the current redemption rate when no max fee is pinned
    pub redemption_rate_slippage: Decimal,
    pub redeem_max_iterations: u64,
    /// `k` in `ceil(k * sqrt(listSize))` approximate-hint trials
    pub hint_trials_factor: u64,
    /// Upper bound on trials in one `getApproxHint` call
    pub max_trials_per_call: u64,
}

impl Default for PopulateConfig {
    fn default() -> Self {
        PopulateConfig {
            borrowing_fee_decay_tolerance_minutes: 10,
            list_traversal_gas: 25_000,
            base_rate_update_gas: 10_000,
            base_rate_update_gas_per_squaring: 1_414,
            block_gas_limit: 30_000_000,
            borrowing_rate_slippage: Decimal::from_raw_u128(5_000_000_000_000_000),
            redemption_rate_slippage: Decimal::from_raw_u128(1_000_000_000_000_000),
            redeem_max_iterations: 70,
            hint_trials_factor: 10,
            max_trials_per_call: 2_500,
        }
    }
}

impl PopulateConfig {
    /// Gas to decay the base rate by `minutes` on-chain
    ///
    /// `decPow` squares once per bit of the exponent, hence the logarithm.
    pub fn base_rate_update_gas(&self, minutes: u64) -> u64 {
        let squarings = u64::from(u64::BITS - minutes.leading_zeros());
        self.base_rate_update_gas + self.base_rate_update_gas_per_squaring * squarings
    }

    /// Base-rate update cost across the full decay tolerance window
    pub fn decay_tolerance_update_gas(&self) -> u64 {
        self.base_rate_update_gas(self.borrowing_fee_decay_tolerance_minutes)
    }

    pub fn decay_tolerance_seconds(&self) -> u64 {
        self.borrowing_fee_decay_tolerance_minutes * 60
    }
}

/// Connection-independent state threaded into every populate call
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    pub addresses: ContractAddresses,
    /// Account that signs and pays for populated transactions
    pub sender: Address,
    #[serde(default)]
    pub config: PopulateConfig,
}

impl Context {
    pub fn new(addresses: ContractAddresses, sender: Address) -> Self {
        Context {
            addresses,
            sender,
            config: PopulateConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PopulateConfig) -> Self {
        self.config = config;
        self
    }
}
