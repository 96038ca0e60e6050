//! JSON-RPC transport
//!
//! [`RpcChain`] implements both capability traits over a plain HTTP JSON-RPC
//! endpoint. Contract reads are `eth_call`s encoded with the `sol!` bindings.
//! Transactions go through `eth_sendTransaction`, so the node must manage the
//! sender's key (a dev node or a signing proxy).

use alloy_primitives::{Address, Bytes, B256, U256, U64};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

use crate::abi::{IHintHelpers, IPool, ISortedTroves, ITroveManager, IWhitelist};
use crate::chain::{
    ApproxHint, BlockInfo, BlockTag, ChainError, ChainReader, ChainWriter, ContractCall, Pool,
    RawLog, RawReceipt, RawRedemptionHints, RawRewardPerStake, SubmittedTransaction,
    TransactionOutcome,
};
use crate::config::ContractAddresses;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Blocks searched below the wait's starting block for a replacement
const REPLACEMENT_SCAN_DEPTH: u64 = 64;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    from: Option<Address>,
    to: Address,
    data: Bytes,
    value: U256,
    #[serde(skip_serializing_if = "Option::is_none")]
    gas: Option<U64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nonce: Option<U64>,
}

#[derive(Debug, Deserialize)]
struct RpcBlock {
    number: U64,
    timestamp: U64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcTransaction {
    hash: B256,
    from: Address,
    to: Option<Address>,
    nonce: U64,
    #[serde(default)]
    value: U256,
    input: Bytes,
}

#[derive(Debug, Deserialize)]
struct RpcBlockWithTransactions {
    transactions: Vec<RpcTransaction>,
}

#[derive(Debug, Deserialize)]
struct RpcLog {
    address: Address,
    topics: Vec<B256>,
    data: Bytes,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: B256,
    block_number: U64,
    status: Option<U64>,
    gas_used: U64,
    logs: Vec<RpcLog>,
}

impl From<RpcReceipt> for RawReceipt {
    fn from(receipt: RpcReceipt) -> Self {
        RawReceipt {
            transaction_hash: receipt.transaction_hash,
            block_number: receipt.block_number.to::<u64>(),
            status: receipt.status == Some(U64::from(1)),
            gas_used: receipt.gas_used.to::<u64>(),
            logs: receipt
                .logs
                .into_iter()
                .map(|log| RawLog {
                    address: log.address,
                    topics: log.topics,
                    data: log.data,
                })
                .collect(),
        }
    }
}

fn transport(e: jsonrpsee::core::ClientError) -> ChainError {
    ChainError::Transport(e.to_string())
}

fn to_u64(value: U256, what: &'static str) -> Result<u64, ChainError> {
    u64::try_from(value).map_err(|_| ChainError::decode(what, format!("{value} exceeds u64")))
}

/// Both capability traits over HTTP JSON-RPC
pub struct RpcChain {
    client: HttpClient,
    addresses: ContractAddresses,
    poll_interval: Duration,
}

impl RpcChain {
    pub fn new(url: &str, addresses: ContractAddresses) -> Result<Self, ChainError> {
        let client = HttpClientBuilder::default()
            .request_timeout(DEFAULT_REQUEST_TIMEOUT)
            .build(url)
            .map_err(transport)?;
        Ok(RpcChain {
            client,
            addresses,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// How often [`ChainWriter::wait_for_receipt`] polls
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn addresses(&self) -> &ContractAddresses {
        &self.addresses
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: jsonrpsee::core::params::ArrayParams,
    ) -> Result<T, ChainError> {
        self.client.request(method, params).await.map_err(transport)
    }

    async fn call<C>(&self, to: Address, call: C, tag: BlockTag) -> Result<C::Return, ChainError>
    where
        C: SolCall + Send + Sync,
    {
        let request = TransactionRequest {
            from: None,
            to,
            data: Bytes::from(call.abi_encode()),
            value: U256::ZERO,
            gas: None,
            nonce: None,
        };
        let output: Bytes = self.request("eth_call", rpc_params![request, tag]).await?;
        C::abi_decode_returns(&output).map_err(|e| ChainError::decode(C::SIGNATURE, e))
    }

    fn pool_address(&self, pool: Pool) -> Address {
        match pool {
            Pool::Active => self.addresses.active_pool,
            Pool::Default => self.addresses.default_pool,
        }
    }

    async fn transaction_count(&self, owner: Address, tag: &str) -> Result<u64, ChainError> {
        let count: U64 = self
            .request("eth_getTransactionCount", rpc_params![owner, tag])
            .await?;
        Ok(count.to::<u64>())
    }

    async fn receipt(&self, hash: B256) -> Result<Option<RawReceipt>, ChainError> {
        let receipt: Option<RpcReceipt> = self
            .request("eth_getTransactionReceipt", rpc_params![hash])
            .await?;
        Ok(receipt.map(RawReceipt::from))
    }

    /// Look for the transaction that took `tx`'s nonce
    async fn find_replacement(
        &self,
        tx: &SubmittedTransaction,
        from_block: u64,
    ) -> Result<Option<TransactionOutcome>, ChainError> {
        let latest = self.block(BlockTag::Latest).await?.number;
        let lowest = from_block.saturating_sub(REPLACEMENT_SCAN_DEPTH);

        for number in (lowest..=latest).rev() {
            let block: Option<RpcBlockWithTransactions> = self
                .request(
                    "eth_getBlockByNumber",
                    rpc_params![BlockTag::Number(number), true],
                )
                .await?;
            let Some(block) = block else { continue };

            let replacement = block
                .transactions
                .into_iter()
                .find(|t| t.from == tx.from && t.nonce.to::<u64>() == tx.nonce && t.hash != tx.hash);
            if let Some(replacement) = replacement {
                let cancelled = replacement.to == Some(tx.from)
                    && replacement.input.is_empty()
                    && replacement.value.is_zero();
                let receipt = self.receipt(replacement.hash).await?.ok_or_else(|| {
                    ChainError::NotFound(format!("receipt of replacement {}", replacement.hash))
                })?;
                return Ok(Some(TransactionOutcome::Replaced {
                    replacement: receipt,
                    cancelled,
                }));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl ChainReader for RpcChain {
    async fn block(&self, tag: BlockTag) -> Result<BlockInfo, ChainError> {
        let block: Option<RpcBlock> = self
            .request("eth_getBlockByNumber", rpc_params![tag, false])
            .await?;
        let block = block.ok_or_else(|| ChainError::NotFound(format!("block {tag:?}")))?;
        Ok(BlockInfo {
            number: block.number.to::<u64>(),
            timestamp: block.timestamp.to::<u64>(),
        })
    }

    async fn get_trove_status(&self, owner: Address, tag: BlockTag) -> Result<u8, ChainError> {
        let status = self
            .call(
                self.addresses.trove_manager,
                ITroveManager::getTroveStatusCall { _borrower: owner },
                tag,
            )
            .await?;
        u8::try_from(status)
            .map_err(|_| ChainError::decode("trove status", format!("{status} exceeds u8")))
    }

    async fn get_trove_debt(&self, owner: Address, tag: BlockTag) -> Result<U256, ChainError> {
        self.call(
            self.addresses.trove_manager,
            ITroveManager::getTroveDebtCall { _borrower: owner },
            tag,
        )
        .await
    }

    async fn get_trove_colls(
        &self,
        owner: Address,
        tag: BlockTag,
    ) -> Result<Vec<(Address, U256)>, ChainError> {
        let colls = self
            .call(
                self.addresses.trove_manager,
                ITroveManager::getTroveCollsCall { _borrower: owner },
                tag,
            )
            .await?;
        if colls.tokens.len() != colls.amounts.len() {
            return Err(ChainError::decode(
                "getTroveColls",
                "token and amount arrays differ in length",
            ));
        }
        Ok(colls.tokens.into_iter().zip(colls.amounts).collect())
    }

    async fn get_trove_stake(
        &self,
        owner: Address,
        kind: Address,
        tag: BlockTag,
    ) -> Result<U256, ChainError> {
        self.call(
            self.addresses.trove_manager,
            ITroveManager::getTroveStakeCall {
                _borrower: owner,
                _token: kind,
            },
            tag,
        )
        .await
    }

    async fn get_reward_snapshot(
        &self,
        owner: Address,
        kind: Address,
        tag: BlockTag,
    ) -> Result<RawRewardPerStake, ChainError> {
        let manager = self.addresses.trove_manager;
        let (collateral, debt) = futures::try_join!(
            self.call(
                manager,
                ITroveManager::getRewardSnapshotCollCall {
                    _borrower: owner,
                    _token: kind,
                },
                tag,
            ),
            self.call(
                manager,
                ITroveManager::getRewardSnapshotYUSDCall {
                    _borrower: owner,
                    _token: kind,
                },
                tag,
            ),
        )?;
        Ok(RawRewardPerStake { collateral, debt })
    }

    async fn get_total_redistributed(
        &self,
        kind: Address,
        tag: BlockTag,
    ) -> Result<RawRewardPerStake, ChainError> {
        let manager = self.addresses.trove_manager;
        let (collateral, debt) = futures::try_join!(
            self.call(manager, ITroveManager::getL_CollCall { _token: kind }, tag),
            self.call(manager, ITroveManager::getL_YUSDCall { _token: kind }, tag),
        )?;
        Ok(RawRewardPerStake { collateral, debt })
    }

    async fn get_trove_owners_count(&self, tag: BlockTag) -> Result<u64, ChainError> {
        let count = self
            .call(
                self.addresses.trove_manager,
                ITroveManager::getTroveOwnersCountCall {},
                tag,
            )
            .await?;
        to_u64(count, "getTroveOwnersCount")
    }

    async fn base_rate(&self, tag: BlockTag) -> Result<U256, ChainError> {
        self.call(self.addresses.trove_manager, ITroveManager::baseRateCall {}, tag)
            .await
    }

    async fn last_fee_operation_time(&self, tag: BlockTag) -> Result<u64, ChainError> {
        let time = self
            .call(
                self.addresses.trove_manager,
                ITroveManager::lastFeeOperationTimeCall {},
                tag,
            )
            .await?;
        to_u64(time, "lastFeeOperationTime")
    }

    async fn get_pool_debt(&self, pool: Pool, tag: BlockTag) -> Result<U256, ChainError> {
        self.call(self.pool_address(pool), IPool::getYUSDDebtCall {}, tag)
            .await
    }

    async fn get_pool_collateral(
        &self,
        pool: Pool,
        kind: Address,
        tag: BlockTag,
    ) -> Result<U256, ChainError> {
        self.call(
            self.pool_address(pool),
            IPool::getCollateralCall { _collateral: kind },
            tag,
        )
        .await
    }

    async fn get_valid_collateral(&self, tag: BlockTag) -> Result<Vec<Address>, ChainError> {
        self.call(self.addresses.whitelist, IWhitelist::getValidCollateralCall {}, tag)
            .await
    }

    async fn get_price(&self, kind: Address, tag: BlockTag) -> Result<U256, ChainError> {
        self.call(
            self.addresses.whitelist,
            IWhitelist::getPriceCall { _collateral: kind },
            tag,
        )
        .await
    }

    async fn get_decimals(&self, kind: Address, tag: BlockTag) -> Result<u8, ChainError> {
        self.call(
            self.addresses.whitelist,
            IWhitelist::getDecimalsCall { _collateral: kind },
            tag,
        )
        .await
    }

    async fn get_safety_ratio(&self, kind: Address, tag: BlockTag) -> Result<U256, ChainError> {
        self.call(
            self.addresses.whitelist,
            IWhitelist::getSafetyRatioCall { _collateral: kind },
            tag,
        )
        .await
    }

    async fn get_recovery_ratio(&self, kind: Address, tag: BlockTag) -> Result<U256, ChainError> {
        self.call(
            self.addresses.whitelist,
            IWhitelist::getRecoveryRatioCall { _collateral: kind },
            tag,
        )
        .await
    }

    async fn is_wrapped(&self, kind: Address, tag: BlockTag) -> Result<bool, ChainError> {
        self.call(
            self.addresses.whitelist,
            IWhitelist::isWrappedCall { _collateral: kind },
            tag,
        )
        .await
    }

    async fn get_first(&self, tag: BlockTag) -> Result<Address, ChainError> {
        self.call(self.addresses.sorted_troves, ISortedTroves::getFirstCall {}, tag)
            .await
    }

    async fn get_last(&self, tag: BlockTag) -> Result<Address, ChainError> {
        self.call(self.addresses.sorted_troves, ISortedTroves::getLastCall {}, tag)
            .await
    }

    async fn get_size(&self, tag: BlockTag) -> Result<u64, ChainError> {
        let size = self
            .call(self.addresses.sorted_troves, ISortedTroves::getSizeCall {}, tag)
            .await?;
        to_u64(size, "getSize")
    }

    async fn get_next(&self, id: Address, tag: BlockTag) -> Result<Address, ChainError> {
        self.call(
            self.addresses.sorted_troves,
            ISortedTroves::getNextCall { _id: id },
            tag,
        )
        .await
    }

    async fn get_prev(&self, id: Address, tag: BlockTag) -> Result<Address, ChainError> {
        self.call(
            self.addresses.sorted_troves,
            ISortedTroves::getPrevCall { _id: id },
            tag,
        )
        .await
    }

    async fn find_insert_position(
        &self,
        nicr: U256,
        prev_id: Address,
        next_id: Address,
        tag: BlockTag,
    ) -> Result<(Address, Address), ChainError> {
        let position = self
            .call(
                self.addresses.sorted_troves,
                ISortedTroves::findInsertPositionCall {
                    _NICR: nicr,
                    _prevId: prev_id,
                    _nextId: next_id,
                },
                tag,
            )
            .await?;
        Ok((position.prev, position.next))
    }

    async fn get_approx_hint(
        &self,
        nicr: U256,
        num_trials: u64,
        random_seed: U256,
        tag: BlockTag,
    ) -> Result<ApproxHint, ChainError> {
        let hint = self
            .call(
                self.addresses.hint_helpers,
                IHintHelpers::getApproxHintCall {
                    _CR: nicr,
                    _numTrials: U256::from(num_trials),
                    _inputRandomSeed: random_seed,
                },
                tag,
            )
            .await?;
        Ok(ApproxHint {
            hint_address: hint.hintAddress,
            diff: hint.diff,
            latest_random_seed: hint.latestRandomSeed,
        })
    }

    async fn get_redemption_hints(
        &self,
        amount: U256,
        max_iterations: u64,
        tag: BlockTag,
    ) -> Result<RawRedemptionHints, ChainError> {
        let hints = self
            .call(
                self.addresses.hint_helpers,
                IHintHelpers::getRedemptionHintsCall {
                    _YUSDamount: amount,
                    _maxIterations: U256::from(max_iterations),
                },
                tag,
            )
            .await?;
        Ok(RawRedemptionHints {
            first_redemption_hint: hints.firstRedemptionHint,
            partial_redemption_hint_nicr: hints.partialRedemptionHintNICR,
            truncated_amount: hints.truncatedYUSDamount,
        })
    }
}

#[async_trait]
impl ChainWriter for RpcChain {
    async fn estimate_gas(&self, call: &ContractCall) -> Result<u64, ChainError> {
        let request = TransactionRequest {
            from: Some(call.from),
            to: call.to,
            data: call.data.clone(),
            value: call.value,
            gas: None,
            nonce: None,
        };
        let gas: U64 = self.request("eth_estimateGas", rpc_params![request]).await?;
        Ok(gas.to::<u64>())
    }

    async fn send_transaction(&self, call: &ContractCall) -> Result<SubmittedTransaction, ChainError> {
        let nonce = self.transaction_count(call.from, "pending").await?;
        let request = TransactionRequest {
            from: Some(call.from),
            to: call.to,
            data: call.data.clone(),
            value: call.value,
            gas: call.gas_limit.map(U64::from),
            nonce: Some(U64::from(nonce)),
        };
        let hash: B256 = self
            .request("eth_sendTransaction", rpc_params![request])
            .await?;
        Ok(SubmittedTransaction {
            hash,
            from: call.from,
            nonce,
        })
    }

    async fn wait_for_receipt(
        &self,
        tx: &SubmittedTransaction,
        timeout: Duration,
    ) -> Result<TransactionOutcome, ChainError> {
        let deadline = Instant::now() + timeout;
        let start_block = self.block(BlockTag::Latest).await?.number;

        loop {
            if let Some(receipt) = self.receipt(tx.hash).await? {
                return Ok(TransactionOutcome::Mined(receipt));
            }

            // A mined nonce past ours without our receipt means another
            // transaction took the slot
            if self.transaction_count(tx.from, "latest").await? > tx.nonce {
                if let Some(receipt) = self.receipt(tx.hash).await? {
                    return Ok(TransactionOutcome::Mined(receipt));
                }
                return self
                    .find_replacement(tx, start_block)
                    .await?
                    .ok_or_else(|| ChainError::NotFound(format!("replacement of {}", tx.hash)));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(TransactionOutcome::Pending);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receipt_from_wire() {
        let json = r#"{
            "transactionHash": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "blockNumber": "0x1b4",
            "status": "0x1",
            "gasUsed": "0x5208",
            "logs": [{
                "address": "0x2222222222222222222222222222222222222222",
                "topics": ["0x3333333333333333333333333333333333333333333333333333333333333333"],
                "data": "0xdead"
            }]
        }"#;
        let receipt: RawReceipt = serde_json::from_str::<RpcReceipt>(json).unwrap().into();

        assert_eq!(receipt.transaction_hash, B256::repeat_byte(0x11));
        assert_eq!(receipt.block_number, 436);
        assert!(receipt.status);
        assert_eq!(receipt.gas_used, 21_000);
        assert_eq!(receipt.logs[0].address, Address::repeat_byte(0x22));
        assert_eq!(receipt.logs[0].data, Bytes::from_static(&[0xde, 0xad]));
    }

    #[test]
    fn test_reverted_and_pre_byzantium_receipts_fail() {
        let reverted = r#"{
            "transactionHash": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "blockNumber": "0x1",
            "status": "0x0",
            "gasUsed": "0x1",
            "logs": []
        }"#;
        let receipt: RawReceipt = serde_json::from_str::<RpcReceipt>(reverted).unwrap().into();
        assert!(!receipt.status);

        let no_status = reverted.replace(r#""status": "0x0","#, "");
        let receipt: RawReceipt = serde_json::from_str::<RpcReceipt>(&no_status).unwrap().into();
        assert!(!receipt.status);
    }

    #[test]
    fn test_request_omits_unset_fields() {
        let request = TransactionRequest {
            from: None,
            to: Address::repeat_byte(0x44),
            data: Bytes::from_static(&[1]),
            value: U256::ZERO,
            gas: None,
            nonce: Some(U64::from(7)),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("from").is_none());
        assert!(json.get("gas").is_none());
        assert_eq!(json["nonce"], "0x7");
        assert_eq!(json["data"], "0x01");
    }

    #[test]
    fn test_to_u64_rejects_overflow() {
        assert_eq!(to_u64(U256::from(5u64), "count").unwrap(), 5);
        assert!(matches!(
            to_u64(U256::MAX, "count"),
            Err(ChainError::Decode { what: "count", .. })
        ));
    }
}
