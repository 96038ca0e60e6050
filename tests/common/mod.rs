//! In-memory chain shared by the integration tests
//!
//! Keeps a sorted Trove list, pools, the whitelist and fee state, answers
//! every read from them and records what the code under test asks for.

#![allow(dead_code)]

use alloy_primitives::{keccak256, Address, U256};
use alloy_sol_types::SolEvent;
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use trovekit::chain::{
    ApproxHint, BlockInfo, BlockTag, ChainError, ChainReader, ChainWriter, ContractCall, Pool,
    RawLog, RawReceipt, RawRedemptionHints, RawRewardPerStake, SubmittedTransaction,
    TransactionOutcome,
};
use trovekit::trove_math::{Collaterals, Decimal, Trove};
use trovekit::{CollateralInfo, Context, ContractAddresses};

pub const WETH: Address = Address::repeat_byte(0x11);
pub const USDC: Address = Address::repeat_byte(0x22);
pub const SENDER: Address = Address::repeat_byte(0xaa);

pub const T0: u64 = 1_700_000_000;

pub fn d(s: &str) -> Decimal {
    s.parse().unwrap()
}

pub fn owner(n: u8) -> Address {
    Address::repeat_byte(n)
}

pub fn addresses() -> ContractAddresses {
    ContractAddresses {
        borrower_operations: Address::repeat_byte(0xb0),
        trove_manager: Address::repeat_byte(0xb1),
        sorted_troves: Address::repeat_byte(0xb2),
        hint_helpers: Address::repeat_byte(0xb3),
        whitelist: Address::repeat_byte(0xb4),
        active_pool: Address::repeat_byte(0xb5),
        default_pool: Address::repeat_byte(0xb6),
    }
}

pub fn context() -> Context {
    Context::new(addresses(), SENDER)
}

#[derive(Clone, Debug)]
pub struct MockTrove {
    pub collaterals: Collaterals,
    pub debt: Decimal,
    pub status: u8,
    /// Reward-per-stake totals as of the Trove's last operation
    pub snapshots: BTreeMap<Address, RawRewardPerStake>,
}

impl MockTrove {
    pub fn open(collaterals: &[(Address, &str)], debt: &str) -> Self {
        MockTrove {
            collaterals: collaterals.iter().map(|(k, a)| (*k, d(a))).collect(),
            debt: d(debt),
            status: 1,
            snapshots: BTreeMap::new(),
        }
    }

    pub fn nicr(&self) -> U256 {
        Trove::new(self.collaterals.clone(), self.debt)
            .nominal_collateral_ratio()
            .raw()
    }
}

pub type GasFn = Box<dyn Fn(&ContractCall) -> u64 + Send + Sync>;

pub struct MockState {
    pub block: BlockInfo,
    /// Whitelist order
    pub whitelist: Vec<(Address, CollateralInfo)>,
    /// Insertion order; the sorted view is derived on every read
    pub troves: Vec<(Address, MockTrove)>,
    pub active_pool: Trove,
    pub default_pool: Trove,
    pub total_redistributed: BTreeMap<Address, RawRewardPerStake>,
    pub base_rate: Decimal,
    pub last_fee_operation_time: u64,
    pub redemption_hints: RawRedemptionHints,
    pub fail_approx_hint: bool,
    pub fail_block: bool,
    pub gas: GasFn,
    pub outcomes: VecDeque<TransactionOutcome>,

    pub approx_calls: Vec<(u64, U256)>,
    pub redemption_hint_calls: Vec<(U256, u64)>,
    pub estimates: Vec<ContractCall>,
    pub sent: Vec<ContractCall>,
    pub block_reads: Vec<BlockTag>,
    /// Tags of Trove and sorted-list reads
    pub read_tags: Vec<BlockTag>,
    /// NICRs passed to `findInsertPosition`
    pub insert_targets: Vec<U256>,
    pub price_reads: usize,
    nonce: u64,
}

fn info(decimals: u8, price: &str, safety: &str, recovery: &str) -> CollateralInfo {
    CollateralInfo {
        decimals,
        price: d(price),
        safety_ratio: d(safety),
        recovery_ratio: d(recovery),
        wrapped: false,
    }
}

impl Default for MockState {
    fn default() -> Self {
        MockState {
            block: BlockInfo {
                number: 100,
                timestamp: T0,
            },
            whitelist: vec![
                (WETH, info(18, "2000", "1.1", "1.5")),
                (USDC, info(6, "1", "1.05", "1.2")),
            ],
            troves: Vec::new(),
            active_pool: Trove::new([(WETH, d("1000"))].into_iter().collect(), d("1000000")),
            default_pool: Trove::default(),
            total_redistributed: BTreeMap::new(),
            base_rate: Decimal::ZERO,
            last_fee_operation_time: T0,
            redemption_hints: RawRedemptionHints {
                first_redemption_hint: Address::ZERO,
                partial_redemption_hint_nicr: U256::ZERO,
                truncated_amount: U256::ZERO,
            },
            fail_approx_hint: false,
            fail_block: false,
            gas: Box::new(|_| 300_000),
            outcomes: VecDeque::new(),
            approx_calls: Vec::new(),
            redemption_hint_calls: Vec::new(),
            estimates: Vec::new(),
            sent: Vec::new(),
            block_reads: Vec::new(),
            read_tags: Vec::new(),
            insert_targets: Vec::new(),
            price_reads: 0,
            nonce: 0,
        }
    }
}

impl MockState {
    /// The Trove with rewards redistributed since its snapshot, stake = collateral
    pub fn with_rewards(&self, trove: &MockTrove) -> Trove {
        let mut result = Trove::new(trove.collaterals.clone(), trove.debt);
        for (kind, stake) in &trove.collaterals {
            let total = self.total_redistributed.get(kind).copied().unwrap_or_default();
            let snapshot = trove.snapshots.get(kind).copied().unwrap_or_default();
            let collateral = Decimal::from_raw(total.collateral - snapshot.collateral);
            let debt = Decimal::from_raw(total.debt - snapshot.debt);
            *result.collaterals.entry(*kind).or_default() += *stake * collateral;
            result.debt += *stake * debt;
        }
        result
    }

    /// Open Troves from head to tail, ordered by NICR including pending rewards
    fn sorted(&self) -> Vec<(Address, U256)> {
        let mut list: Vec<(Address, U256)> = self
            .troves
            .iter()
            .filter(|(_, t)| t.status == 1)
            .map(|(a, t)| (*a, self.with_rewards(t).nominal_collateral_ratio().raw()))
            .collect();
        list.sort_by(|a, b| b.1.cmp(&a.1));
        list
    }

    fn trove(&self, owner: Address) -> Option<&MockTrove> {
        self.troves.iter().find(|(a, _)| *a == owner).map(|(_, t)| t)
    }

    fn collateral(&self, kind: Address) -> Result<CollateralInfo, ChainError> {
        self.whitelist
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, i)| *i)
            .ok_or_else(|| ChainError::Reverted(format!("collateral {kind} not whitelisted")))
    }

    fn units(&self, kind: Address, amount: Decimal) -> Result<U256, ChainError> {
        amount
            .to_units(self.collateral(kind)?.decimals)
            .map_err(|e| ChainError::decode("units", e))
    }

    fn pool(&self, pool: Pool) -> &Trove {
        match pool {
            Pool::Active => &self.active_pool,
            Pool::Default => &self.default_pool,
        }
    }
}

fn abs_diff(a: U256, b: U256) -> U256 {
    if a > b {
        a - b
    } else {
        b - a
    }
}

fn next_seed(seed: U256) -> U256 {
    seed.wrapping_mul(U256::from(6_364_136_223_846_793_005u64))
        .wrapping_add(U256::from(1_442_695_040_888_963_407u64))
}

#[derive(Default)]
pub struct MockChain {
    state: Mutex<MockState>,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    /// Add a Trove whose reward snapshots are the current totals
    pub fn add_trove(&self, owner: Address, mut trove: MockTrove) {
        self.update(|s| {
            trove.snapshots = s.total_redistributed.clone();
            s.troves.push((owner, trove));
        });
    }

    /// Redistribute per unit of stake: every Trove's snapshot falls behind
    pub fn redistribute(&self, kind: Address, collateral: &str, debt: &str) {
        self.update(|s| {
            let total = s.total_redistributed.entry(kind).or_default();
            total.collateral += d(collateral).raw();
            total.debt += d(debt).raw();
        });
    }

    pub fn advance_block(&self, seconds: u64) {
        self.update(|s| {
            s.block.number += 1;
            s.block.timestamp += seconds;
        });
    }

    pub fn set_gas(&self, gas: impl Fn(&ContractCall) -> u64 + Send + Sync + 'static) {
        self.update(|s| s.gas = Box::new(gas));
    }

    pub fn push_outcome(&self, outcome: TransactionOutcome) {
        self.update(|s| s.outcomes.push_back(outcome));
    }

    /// Ids from head to tail
    pub fn sorted_ids(&self) -> Vec<Address> {
        self.update(|s| s.sorted().into_iter().map(|(a, _)| a).collect())
    }

    pub fn approx_calls(&self) -> Vec<(u64, U256)> {
        self.update(|s| s.approx_calls.clone())
    }

    pub fn estimates(&self) -> Vec<ContractCall> {
        self.update(|s| s.estimates.clone())
    }

    pub fn sent(&self) -> Vec<ContractCall> {
        self.update(|s| s.sent.clone())
    }
}

#[async_trait]
impl ChainReader for MockChain {
    async fn block(&self, tag: BlockTag) -> Result<BlockInfo, ChainError> {
        self.update(|s| {
            s.block_reads.push(tag);
            if s.fail_block {
                return Err(ChainError::Transport("connection refused".into()));
            }
            Ok(s.block)
        })
    }

    async fn get_trove_status(&self, owner: Address, tag: BlockTag) -> Result<u8, ChainError> {
        Ok(self.update(|s| {
            s.read_tags.push(tag);
            s.trove(owner).map_or(0, |t| t.status)
        }))
    }

    async fn get_trove_debt(&self, owner: Address, tag: BlockTag) -> Result<U256, ChainError> {
        Ok(self.update(|s| {
            s.read_tags.push(tag);
            s.trove(owner).map_or(U256::ZERO, |t| t.debt.raw())
        }))
    }

    async fn get_trove_colls(
        &self,
        owner: Address,
        tag: BlockTag,
    ) -> Result<Vec<(Address, U256)>, ChainError> {
        self.update(|s| {
            s.read_tags.push(tag);
            let Some(trove) = s.trove(owner) else {
                return Ok(Vec::new());
            };
            trove
                .collaterals
                .iter()
                .map(|(kind, amount)| Ok((*kind, s.units(*kind, *amount)?)))
                .collect()
        })
    }

    async fn get_trove_stake(
        &self,
        owner: Address,
        kind: Address,
        _tag: BlockTag,
    ) -> Result<U256, ChainError> {
        Ok(self.update(|s| {
            s.trove(owner)
                .and_then(|t| t.collaterals.get(&kind))
                .map_or(U256::ZERO, |a| a.raw())
        }))
    }

    async fn get_reward_snapshot(
        &self,
        owner: Address,
        kind: Address,
        tag: BlockTag,
    ) -> Result<RawRewardPerStake, ChainError> {
        Ok(self.update(|s| {
            s.read_tags.push(tag);
            s.trove(owner)
                .and_then(|t| t.snapshots.get(&kind))
                .copied()
                .unwrap_or_default()
        }))
    }

    async fn get_total_redistributed(
        &self,
        kind: Address,
        _tag: BlockTag,
    ) -> Result<RawRewardPerStake, ChainError> {
        Ok(self.update(|s| s.total_redistributed.get(&kind).copied().unwrap_or_default()))
    }

    async fn get_trove_owners_count(&self, _tag: BlockTag) -> Result<u64, ChainError> {
        Ok(self.update(|s| s.sorted().len() as u64))
    }

    async fn base_rate(&self, _tag: BlockTag) -> Result<U256, ChainError> {
        Ok(self.update(|s| s.base_rate.raw()))
    }

    async fn last_fee_operation_time(&self, _tag: BlockTag) -> Result<u64, ChainError> {
        Ok(self.update(|s| s.last_fee_operation_time))
    }

    async fn get_pool_debt(&self, pool: Pool, _tag: BlockTag) -> Result<U256, ChainError> {
        Ok(self.update(|s| s.pool(pool).debt.raw()))
    }

    async fn get_pool_collateral(
        &self,
        pool: Pool,
        kind: Address,
        _tag: BlockTag,
    ) -> Result<U256, ChainError> {
        self.update(|s| {
            let amount = s.pool(pool).collaterals.get(&kind).copied().unwrap_or_default();
            s.units(kind, amount)
        })
    }

    async fn get_valid_collateral(&self, _tag: BlockTag) -> Result<Vec<Address>, ChainError> {
        Ok(self.update(|s| s.whitelist.iter().map(|(k, _)| *k).collect()))
    }

    async fn get_price(&self, kind: Address, _tag: BlockTag) -> Result<U256, ChainError> {
        self.update(|s| {
            s.price_reads += 1;
            Ok(s.collateral(kind)?.price.raw())
        })
    }

    async fn get_decimals(&self, kind: Address, _tag: BlockTag) -> Result<u8, ChainError> {
        self.update(|s| Ok(s.collateral(kind)?.decimals))
    }

    async fn get_safety_ratio(&self, kind: Address, _tag: BlockTag) -> Result<U256, ChainError> {
        self.update(|s| Ok(s.collateral(kind)?.safety_ratio.raw()))
    }

    async fn get_recovery_ratio(&self, kind: Address, _tag: BlockTag) -> Result<U256, ChainError> {
        self.update(|s| Ok(s.collateral(kind)?.recovery_ratio.raw()))
    }

    async fn is_wrapped(&self, kind: Address, _tag: BlockTag) -> Result<bool, ChainError> {
        self.update(|s| Ok(s.collateral(kind)?.wrapped))
    }

    async fn get_first(&self, tag: BlockTag) -> Result<Address, ChainError> {
        Ok(self.update(|s| {
            s.read_tags.push(tag);
            s.sorted().first().map_or(Address::ZERO, |(a, _)| *a)
        }))
    }

    async fn get_last(&self, _tag: BlockTag) -> Result<Address, ChainError> {
        Ok(self.update(|s| s.sorted().last().map_or(Address::ZERO, |(a, _)| *a)))
    }

    async fn get_size(&self, tag: BlockTag) -> Result<u64, ChainError> {
        Ok(self.update(|s| {
            s.read_tags.push(tag);
            s.sorted().len() as u64
        }))
    }

    async fn get_next(&self, id: Address, _tag: BlockTag) -> Result<Address, ChainError> {
        Ok(self.update(|s| {
            let list = s.sorted();
            list.iter()
                .position(|(a, _)| *a == id)
                .and_then(|i| list.get(i + 1))
                .map_or(Address::ZERO, |(a, _)| *a)
        }))
    }

    async fn get_prev(&self, id: Address, _tag: BlockTag) -> Result<Address, ChainError> {
        Ok(self.update(|s| {
            let list = s.sorted();
            list.iter()
                .position(|(a, _)| *a == id)
                .and_then(|i| i.checked_sub(1))
                .and_then(|i| list.get(i))
                .map_or(Address::ZERO, |(a, _)| *a)
        }))
    }

    async fn find_insert_position(
        &self,
        nicr: U256,
        _prev_id: Address,
        _next_id: Address,
        tag: BlockTag,
    ) -> Result<(Address, Address), ChainError> {
        Ok(self.update(|s| {
            s.read_tags.push(tag);
            s.insert_targets.push(nicr);
            let list = s.sorted();
            let prev = list
                .iter()
                .filter(|(_, r)| *r >= nicr)
                .last()
                .map_or(Address::ZERO, |(a, _)| *a);
            let next = list
                .iter()
                .find(|(_, r)| *r < nicr)
                .map_or(Address::ZERO, |(a, _)| *a);
            (prev, next)
        }))
    }

    async fn get_approx_hint(
        &self,
        nicr: U256,
        num_trials: u64,
        random_seed: U256,
        tag: BlockTag,
    ) -> Result<ApproxHint, ChainError> {
        self.update(|s| {
            s.read_tags.push(tag);
            if s.fail_approx_hint {
                return Err(ChainError::Transport("connection reset".into()));
            }
            s.approx_calls.push((num_trials, random_seed));

            let owners: Vec<(Address, U256)> = s
                .troves
                .iter()
                .filter(|(_, t)| t.status == 1)
                .map(|(a, t)| (*a, s.with_rewards(t).nominal_collateral_ratio().raw()))
                .collect();
            let Some(&(mut hint, tail_nicr)) = s.sorted().last() else {
                return Ok(ApproxHint {
                    hint_address: Address::ZERO,
                    diff: U256::MAX,
                    latest_random_seed: random_seed,
                });
            };

            let mut diff = abs_diff(tail_nicr, nicr);
            let mut seed = random_seed;
            for _ in 0..num_trials {
                seed = next_seed(seed);
                let index = (seed % U256::from(owners.len())).to::<usize>();
                let (candidate, candidate_nicr) = owners[index];
                let candidate_diff = abs_diff(candidate_nicr, nicr);
                if candidate_diff < diff {
                    hint = candidate;
                    diff = candidate_diff;
                }
            }
            Ok(ApproxHint {
                hint_address: hint,
                diff,
                latest_random_seed: seed,
            })
        })
    }

    async fn get_redemption_hints(
        &self,
        amount: U256,
        max_iterations: u64,
        _tag: BlockTag,
    ) -> Result<RawRedemptionHints, ChainError> {
        Ok(self.update(|s| {
            s.redemption_hint_calls.push((amount, max_iterations));
            s.redemption_hints
        }))
    }
}

#[async_trait]
impl ChainWriter for MockChain {
    async fn estimate_gas(&self, call: &ContractCall) -> Result<u64, ChainError> {
        Ok(self.update(|s| {
            s.estimates.push(call.clone());
            (s.gas)(call)
        }))
    }

    async fn send_transaction(&self, call: &ContractCall) -> Result<SubmittedTransaction, ChainError> {
        Ok(self.update(|s| {
            let nonce = s.nonce;
            s.nonce += 1;
            s.sent.push(call.clone());
            SubmittedTransaction {
                hash: keccak256([&call.data[..], &nonce.to_be_bytes()[..]].concat()),
                from: call.from,
                nonce,
            }
        }))
    }

    async fn wait_for_receipt(
        &self,
        _tx: &SubmittedTransaction,
        _timeout: Duration,
    ) -> Result<TransactionOutcome, ChainError> {
        Ok(self.update(|s| s.outcomes.pop_front().unwrap_or(TransactionOutcome::Pending)))
    }
}

/// A log as `emitter` would emit `event`
pub fn log<E: SolEvent>(emitter: Address, event: &E) -> RawLog {
    let data = event.encode_log_data();
    RawLog {
        address: emitter,
        topics: data.topics().to_vec(),
        data: data.data.clone(),
    }
}

pub fn receipt(status: bool, logs: Vec<RawLog>) -> RawReceipt {
    RawReceipt {
        transaction_hash: keccak256(b"receipt"),
        block_number: 101,
        status,
        gas_used: 250_000,
        logs,
    }
}
