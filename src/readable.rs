//! Protocol state reconstructed from raw reads
//!
//! Amounts come off the chain as integers in each collateral's own decimals
//! and are normalized to 18-decimal [`Decimal`] here. Prices, ratios, stakes and
//! redistribution accumulators are already 18-decimal and only wrapped.
//!
//! Reads with no dependency on each other are issued concurrently; reads that
//! need the whitelist (for decimals) wait for it.

use alloy_primitives::{Address, U256};
use futures::future::try_join_all;
use futures::try_join;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use trove_math::{
    Collaterals, Decimal, Fees, FeesFactory, Prices, Ratios, RewardPerStake, TotalRedistributed,
    Trove, TroveStatus, TroveWithPendingRedistribution, UserTrove,
};

use crate::chain::{BlockInfo, BlockTag, ChainError, ChainReader, Pool, RawRewardPerStake};
use crate::error::{Error, Result};

/// Whitelist entry for one collateral kind
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralInfo {
    pub decimals: u8,
    pub price: Decimal,
    pub safety_ratio: Decimal,
    pub recovery_ratio: Decimal,
    pub wrapped: bool,
}

/// The collateral whitelist in canonical (on-chain) order
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralParams {
    order: Vec<Address>,
    info: BTreeMap<Address, CollateralInfo>,
}

impl CollateralParams {
    pub fn new(entries: impl IntoIterator<Item = (Address, CollateralInfo)>) -> Self {
        let mut params = CollateralParams::default();
        for (kind, info) in entries {
            if params.info.insert(kind, info).is_none() {
                params.order.push(kind);
            }
        }
        params
    }

    /// Whitelisted kinds in the order the contracts expect positional arrays
    pub fn kinds(&self) -> &[Address] {
        &self.order
    }

    pub fn get(&self, kind: &Address) -> Option<&CollateralInfo> {
        self.info.get(kind)
    }

    pub fn prices(&self) -> Prices {
        self.info.iter().map(|(k, i)| (*k, i.price)).collect()
    }

    pub fn safety_ratios(&self) -> Ratios {
        self.info.iter().map(|(k, i)| (*k, i.safety_ratio)).collect()
    }

    pub fn recovery_ratios(&self) -> Ratios {
        self.info.iter().map(|(k, i)| (*k, i.recovery_ratio)).collect()
    }

    pub fn decimals(&self) -> BTreeMap<Address, u8> {
        self.info.iter().map(|(k, i)| (*k, i.decimals)).collect()
    }

    /// Reject caller-supplied kinds that are not whitelisted
    pub fn require_whitelisted<'a>(&self, kinds: impl IntoIterator<Item = &'a Address>) -> Result<()> {
        match kinds.into_iter().find(|k| !self.info.contains_key(*k)) {
            Some(kind) => Err(Error::UnknownCollateral(*kind)),
            None => Ok(()),
        }
    }

    fn decimals_of(&self, kind: Address) -> Result<u8> {
        self.info
            .get(&kind)
            .map(|i| i.decimals)
            .ok_or(Error::MissingPriceData(kind))
    }

    /// Normalize a raw token amount of `kind`
    pub fn to_decimal(&self, kind: Address, raw: U256) -> Result<Decimal> {
        Ok(Decimal::from_units(raw, self.decimals_of(kind)?)?)
    }

    /// Express `amount` in the token units of `kind`
    pub fn to_units(&self, kind: Address, amount: Decimal) -> Result<U256> {
        Ok(amount.to_units(self.decimals_of(kind)?)?)
    }

    /// Kinds and raw amounts as positional arrays in whitelist order
    pub fn encode(&self, collaterals: &Collaterals) -> Result<(Vec<Address>, Vec<U256>)> {
        self.require_whitelisted(collaterals.keys())?;
        let mut kinds = Vec::with_capacity(collaterals.len());
        let mut amounts = Vec::with_capacity(collaterals.len());
        for kind in &self.order {
            if let Some(amount) = collaterals.get(kind) {
                kinds.push(*kind);
                amounts.push(self.to_units(*kind, *amount)?);
            }
        }
        Ok((kinds, amounts))
    }

    /// Per-kind values as an array aligned with `kinds`, `default` where absent
    pub fn align<T: Copy>(&self, kinds: &[Address], values: &BTreeMap<Address, T>, default: T) -> Vec<T> {
        kinds
            .iter()
            .map(|k| values.get(k).copied().unwrap_or(default))
            .collect()
    }

    /// Recovery mode: the system total is below its value-weighted critical ratio
    pub fn is_recovery_mode(&self, total: &Trove) -> Result<bool> {
        Ok(total.collateral_ratio_is_below_critical(&self.prices(), &self.recovery_ratios())?)
    }

    /// Liquidation eligibility of a single Trove
    pub fn is_liquidatable(&self, trove: &Trove) -> Result<bool> {
        Ok(trove.collateral_ratio_is_below_minimum(&self.prices(), &self.safety_ratios())?)
    }
}

/// Whitelist with live prices and ratios
pub async fn get_collateral_params<R: ChainReader + ?Sized>(
    reader: &R,
    tag: BlockTag,
) -> Result<CollateralParams> {
    let kinds = reader.get_valid_collateral(tag).await?;
    let entries = try_join_all(kinds.iter().map(|&kind| async move {
        let (price, decimals, safety_ratio, recovery_ratio, wrapped) = try_join!(
            reader.get_price(kind, tag),
            reader.get_decimals(kind, tag),
            reader.get_safety_ratio(kind, tag),
            reader.get_recovery_ratio(kind, tag),
            reader.is_wrapped(kind, tag),
        )?;
        Ok::<_, ChainError>((
            kind,
            CollateralInfo {
                decimals,
                price: Decimal::from_raw(price),
                safety_ratio: Decimal::from_raw(safety_ratio),
                recovery_ratio: Decimal::from_raw(recovery_ratio),
                wrapped,
            },
        ))
    }))
    .await?;

    log::trace!("read {} whitelisted collateral kinds", entries.len());
    Ok(CollateralParams::new(entries))
}

fn reward_per_stake(raw: RawRewardPerStake) -> RewardPerStake {
    RewardPerStake {
        collateral: Decimal::from_raw(raw.collateral),
        debt: Decimal::from_raw(raw.debt),
    }
}

/// The Trove as stored, with stakes and reward snapshots for every held kind
pub async fn get_trove_before_redistribution<R: ChainReader + ?Sized>(
    reader: &R,
    owner: Address,
    params: &CollateralParams,
    tag: BlockTag,
) -> Result<TroveWithPendingRedistribution> {
    let code = reader.get_trove_status(owner, tag).await?;
    let status = TroveStatus::from_code(code)
        .ok_or_else(|| ChainError::decode("trove status", format!("unknown status code {code}")))?;

    if !status.is_open() {
        return Ok(TroveWithPendingRedistribution {
            user: UserTrove::empty(owner, status),
            stakes: BTreeMap::new(),
            snapshots: BTreeMap::new(),
        });
    }

    let (debt, colls) = try_join!(
        reader.get_trove_debt(owner, tag),
        reader.get_trove_colls(owner, tag),
    )?;

    let mut collaterals = Collaterals::new();
    for (kind, raw) in &colls {
        let amount = params.to_decimal(*kind, *raw)?;
        if !amount.is_zero() {
            collaterals.insert(*kind, amount);
        }
    }

    let per_kind = try_join_all(colls.iter().map(|&(kind, _)| async move {
        let (stake, snapshot) = try_join!(
            reader.get_trove_stake(owner, kind, tag),
            reader.get_reward_snapshot(owner, kind, tag),
        )?;
        Ok::<_, ChainError>((kind, Decimal::from_raw(stake), reward_per_stake(snapshot)))
    }))
    .await?;

    let mut stakes = BTreeMap::new();
    let mut snapshots = TotalRedistributed::new();
    for (kind, stake, snapshot) in per_kind {
        stakes.insert(kind, stake);
        snapshots.insert(kind, snapshot);
    }

    Ok(TroveWithPendingRedistribution {
        user: UserTrove {
            owner,
            status,
            trove: Trove::new(collaterals, Decimal::from_raw(debt)),
        },
        stakes,
        snapshots,
    })
}

/// Cumulative redistribution rewards per stake for `kinds`
pub async fn get_total_redistributed<R: ChainReader + ?Sized>(
    reader: &R,
    kinds: &[Address],
    tag: BlockTag,
) -> Result<TotalRedistributed> {
    let totals = try_join_all(kinds.iter().map(|&kind| async move {
        let raw = reader.get_total_redistributed(kind, tag).await?;
        Ok::<_, ChainError>((kind, reward_per_stake(raw)))
    }))
    .await?;
    Ok(totals.into_iter().collect())
}

/// The Trove with pending redistribution rewards applied
pub async fn get_trove<R: ChainReader + ?Sized>(
    reader: &R,
    owner: Address,
    params: &CollateralParams,
    tag: BlockTag,
) -> Result<UserTrove> {
    let (before, totals) = try_join!(
        get_trove_before_redistribution(reader, owner, params, tag),
        get_total_redistributed(reader, params.kinds(), tag),
    )?;
    Ok(before.apply_redistribution(&totals)?)
}

/// Collateral and debt held by one pool
pub async fn get_pool<R: ChainReader + ?Sized>(
    reader: &R,
    pool: Pool,
    params: &CollateralParams,
    tag: BlockTag,
) -> Result<Trove> {
    let amounts = try_join_all(params.kinds().iter().map(|&kind| async move {
        let raw = reader.get_pool_collateral(pool, kind, tag).await?;
        Ok::<_, ChainError>((kind, raw))
    }));
    let (debt, amounts) = try_join!(reader.get_pool_debt(pool, tag), amounts)?;

    let mut collaterals = Collaterals::new();
    for (kind, raw) in amounts {
        let amount = params.to_decimal(kind, raw)?;
        if !amount.is_zero() {
            collaterals.insert(kind, amount);
        }
    }
    Ok(Trove::new(collaterals, Decimal::from_raw(debt)))
}

/// System-wide total: active pool plus default pool
pub async fn get_total<R: ChainReader + ?Sized>(
    reader: &R,
    params: &CollateralParams,
    tag: BlockTag,
) -> Result<Trove> {
    let (active, default) = try_join!(
        get_pool(reader, Pool::Active, params, tag),
        get_pool(reader, Pool::Default, params, tag),
    )?;
    Ok(active.add(&default))
}

pub async fn get_fees_factory<R: ChainReader + ?Sized>(
    reader: &R,
    tag: BlockTag,
) -> Result<FeesFactory> {
    let (base_rate, last_fee_operation_time) = try_join!(
        reader.base_rate(tag),
        reader.last_fee_operation_time(tag),
    )?;
    Ok(FeesFactory::new(
        Decimal::from_raw(base_rate),
        last_fee_operation_time,
    ))
}

/// Fees as of the block at `tag`
pub async fn get_fees<R: ChainReader + ?Sized>(
    reader: &R,
    params: &CollateralParams,
    tag: BlockTag,
) -> Result<Fees> {
    let (factory, total, block) = try_join!(
        get_fees_factory(reader, tag),
        get_total(reader, params, tag),
        async { Ok::<_, Error>(reader.block(tag).await?) },
    )?;
    Ok(factory.at(block.timestamp, params.is_recovery_mode(&total)?))
}

pub async fn get_number_of_troves<R: ChainReader + ?Sized>(
    reader: &R,
    tag: BlockTag,
) -> Result<u64> {
    Ok(reader.get_trove_owners_count(tag).await?)
}

/// Everything a populate call needs besides the owner's own Trove
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemState {
    pub block: BlockInfo,
    pub collateral: CollateralParams,
    pub total: Trove,
    pub fees_factory: FeesFactory,
}

impl SystemState {
    pub fn recovery_mode(&self) -> Result<bool> {
        self.collateral.is_recovery_mode(&self.total)
    }

    /// Fees as seen by a block mined `seconds` after the one read
    pub fn fees_after(&self, seconds: u64) -> Result<Fees> {
        Ok(self
            .fees_factory
            .at(self.block.timestamp + seconds, self.recovery_mode()?))
    }
}

pub async fn get_system_state<R: ChainReader + ?Sized>(
    reader: &R,
    tag: BlockTag,
) -> Result<SystemState> {
    let (block, collateral, fees_factory) = try_join!(
        async { Ok::<_, Error>(reader.block(tag).await?) },
        get_collateral_params(reader, tag),
        get_fees_factory(reader, tag),
    )?;
    let total = get_total(reader, &collateral, tag).await?;
    Ok(SystemState {
        block,
        collateral,
        total,
        fees_factory,
    })
}
