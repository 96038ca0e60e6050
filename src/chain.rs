//! Capability interfaces to the chain
//!
//! [`ChainReader`] is the read-only surface the protocol contracts expose and
//! [`ChainWriter`] submits and tracks transactions. Everything above this
//! module takes one or both as an explicit parameter, so the same populate and
//! hint logic runs against the JSON-RPC transport, the block-polled cache or an
//! in-memory mock.
//!
//! Values cross this boundary as raw on-chain integers. Conversion to
//! [`Decimal`](trove_math::Decimal) with per-kind decimals happens in
//! [`readable`](crate::readable).

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize, Serializer};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to decode {what}: {reason}")]
    Decode { what: &'static str, reason: String },

    #[error("call reverted: {0}")]
    Reverted(String),

    #[error("{0} not found")]
    NotFound(String),
}

impl ChainError {
    pub fn decode(what: &'static str, reason: impl ToString) -> Self {
        ChainError::Decode {
            what,
            reason: reason.to_string(),
        }
    }
}

/// Block a read is evaluated against
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum BlockTag {
    #[default]
    Latest,
    Number(u64),
}

impl Serialize for BlockTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            BlockTag::Latest => serializer.serialize_str("latest"),
            BlockTag::Number(n) => serializer.serialize_str(&format!("0x{n:x}")),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub number: u64,
    /// Unix seconds
    pub timestamp: u64,
}

/// Pool holding Trove collateral and debt
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Pool {
    /// Collateral and debt of open Troves
    Active,
    /// Redistributed collateral and debt not yet applied to Troves
    Default,
}

/// Result of one `getApproxHint` sampling call
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ApproxHint {
    pub hint_address: Address,
    pub diff: U256,
    pub latest_random_seed: U256,
}

/// Result of `getRedemptionHints`, raw 18-decimal values
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RawRedemptionHints {
    pub first_redemption_hint: Address,
    pub partial_redemption_hint_nicr: U256,
    pub truncated_amount: U256,
}

/// Per-stake redistribution accumulators `L_Coll` and `L_YUSD`
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RawRewardPerStake {
    pub collateral: U256,
    pub debt: U256,
}

/// Read-only protocol surface
///
/// Every method takes the block to read at. Readers that cache state serve
/// [`BlockTag::Latest`] locally and forward pinned reads.
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn block(&self, tag: BlockTag) -> Result<BlockInfo, ChainError>;

    // Trove manager
    async fn get_trove_status(&self, owner: Address, tag: BlockTag) -> Result<u8, ChainError>;
    async fn get_trove_debt(&self, owner: Address, tag: BlockTag) -> Result<U256, ChainError>;
    async fn get_trove_colls(
        &self,
        owner: Address,
        tag: BlockTag,
    ) -> Result<Vec<(Address, U256)>, ChainError>;
    async fn get_trove_stake(
        &self,
        owner: Address,
        kind: Address,
        tag: BlockTag,
    ) -> Result<U256, ChainError>;
    async fn get_reward_snapshot(
        &self,
        owner: Address,
        kind: Address,
        tag: BlockTag,
    ) -> Result<RawRewardPerStake, ChainError>;
    async fn get_total_redistributed(
        &self,
        kind: Address,
        tag: BlockTag,
    ) -> Result<RawRewardPerStake, ChainError>;
    async fn get_trove_owners_count(&self, tag: BlockTag) -> Result<u64, ChainError>;
    async fn base_rate(&self, tag: BlockTag) -> Result<U256, ChainError>;
    async fn last_fee_operation_time(&self, tag: BlockTag) -> Result<u64, ChainError>;

    // Pools
    async fn get_pool_debt(&self, pool: Pool, tag: BlockTag) -> Result<U256, ChainError>;
    async fn get_pool_collateral(
        &self,
        pool: Pool,
        kind: Address,
        tag: BlockTag,
    ) -> Result<U256, ChainError>;

    // Whitelist
    async fn get_valid_collateral(&self, tag: BlockTag) -> Result<Vec<Address>, ChainError>;
    async fn get_price(&self, kind: Address, tag: BlockTag) -> Result<U256, ChainError>;
    async fn get_decimals(&self, kind: Address, tag: BlockTag) -> Result<u8, ChainError>;
    async fn get_safety_ratio(&self, kind: Address, tag: BlockTag) -> Result<U256, ChainError>;
    async fn get_recovery_ratio(&self, kind: Address, tag: BlockTag) -> Result<U256, ChainError>;
    async fn is_wrapped(&self, kind: Address, tag: BlockTag) -> Result<bool, ChainError>;

    // Sorted Troves
    async fn get_first(&self, tag: BlockTag) -> Result<Address, ChainError>;
    async fn get_last(&self, tag: BlockTag) -> Result<Address, ChainError>;
    async fn get_size(&self, tag: BlockTag) -> Result<u64, ChainError>;
    async fn get_next(&self, id: Address, tag: BlockTag) -> Result<Address, ChainError>;
    async fn get_prev(&self, id: Address, tag: BlockTag) -> Result<Address, ChainError>;
    async fn find_insert_position(
        &self,
        nicr: U256,
        prev_id: Address,
        next_id: Address,
        tag: BlockTag,
    ) -> Result<(Address, Address), ChainError>;

    // Hint helpers
    async fn get_approx_hint(
        &self,
        nicr: U256,
        num_trials: u64,
        random_seed: U256,
        tag: BlockTag,
    ) -> Result<ApproxHint, ChainError>;
    async fn get_redemption_hints(
        &self,
        amount: U256,
        max_iterations: u64,
        tag: BlockTag,
    ) -> Result<RawRedemptionHints, ChainError>;
}

/// An unsigned contract call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContractCall {
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    pub gas_limit: Option<u64>,
}

/// Handle of a transaction accepted by the node
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SubmittedTransaction {
    pub hash: B256,
    pub from: Address,
    pub nonce: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawReceipt {
    pub transaction_hash: B256,
    pub block_number: u64,
    /// `true` if execution succeeded
    pub status: bool,
    pub gas_used: u64,
    pub logs: Vec<RawLog>,
}

/// What became of a submitted transaction
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransactionOutcome {
    /// Not mined yet
    Pending,
    /// Mined under its own hash, successfully or not
    Mined(RawReceipt),
    /// Another transaction with the same sender and nonce was mined instead
    Replaced {
        replacement: RawReceipt,
        /// The replacement carries no call data and targets the sender itself
        cancelled: bool,
    },
}

/// Transaction submission surface
#[async_trait]
pub trait ChainWriter: Send + Sync {
    async fn estimate_gas(&self, call: &ContractCall) -> Result<u64, ChainError>;

    async fn send_transaction(&self, call: &ContractCall) -> Result<SubmittedTransaction, ChainError>;

    /// Poll until the transaction or its replacement is mined, or `timeout`
    /// elapses, in which case the outcome is [`TransactionOutcome::Pending`]
    async fn wait_for_receipt(
        &self,
        tx: &SubmittedTransaction,
        timeout: Duration,
    ) -> Result<TransactionOutcome, ChainError>;
}
