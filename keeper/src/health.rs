//! Trove health scoring
//!
//! Health is the collateral ratio divided by the Trove's value-weighted
//! liquidation threshold. Below one the Trove can be liquidated. In recovery
//! mode the threshold is the recovery ratio instead of the safety ratio.

use alloy_primitives::Address;
use futures::future::try_join_all;
use trovekit::chain::{BlockTag, ChainReader};
use trovekit::readable::get_trove;
use trovekit::trove_math::{Decimal, Trove, UserTrove};
use trovekit::CollateralParams;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TroveHealth {
    pub owner: Address,
    pub health: Decimal,
    pub collateral_ratio: Decimal,
    pub debt: Decimal,
    /// Block the Trove was read at
    pub block: u64,
}

impl TroveHealth {
    pub fn is_liquidatable(&self) -> bool {
        self.health < Decimal::ONE
    }
}

/// Health of a single Trove; `None` if it is not open
pub fn assess(
    params: &CollateralParams,
    user: &UserTrove,
    recovery_mode: bool,
    block: u64,
) -> trovekit::Result<Option<TroveHealth>> {
    if !user.status.is_open() {
        return Ok(None);
    }
    let trove = &user.trove;
    let collateral_ratio = trove.collateral_ratio(&params.prices())?;
    Ok(Some(TroveHealth {
        owner: user.owner,
        health: health_factor(params, trove, collateral_ratio, recovery_mode)?,
        collateral_ratio,
        debt: trove.debt,
        block,
    }))
}

fn health_factor(
    params: &CollateralParams,
    trove: &Trove,
    collateral_ratio: Decimal,
    recovery_mode: bool,
) -> trovekit::Result<Decimal> {
    if collateral_ratio.is_infinite() {
        return Ok(Decimal::INFINITY);
    }
    if trove.collateral_value(&params.prices())?.is_zero() {
        return Ok(Decimal::ZERO);
    }
    let ratios = if recovery_mode {
        params.recovery_ratios()
    } else {
        params.safety_ratios()
    };
    let threshold = trove.weighted_ratio(&params.prices(), &ratios)?;
    Ok(collateral_ratio
        .checked_div(threshold)
        .unwrap_or(Decimal::INFINITY))
}

/// Walk up to `depth` owners from the tail of the sorted list, riskiest first
pub async fn scan_tail<R: ChainReader + ?Sized>(
    reader: &R,
    depth: usize,
    tag: BlockTag,
) -> trovekit::Result<Vec<Address>> {
    let mut owners = Vec::new();
    let mut current = reader.get_last(tag).await?;
    while !current.is_zero() && owners.len() < depth {
        owners.push(current);
        current = reader.get_prev(current, tag).await?;
    }
    Ok(owners)
}

/// Read and score `owners` concurrently at one block
pub async fn assess_troves<R: ChainReader + ?Sized>(
    reader: &R,
    params: &CollateralParams,
    owners: &[Address],
    recovery_mode: bool,
    block: u64,
) -> trovekit::Result<Vec<TroveHealth>> {
    let tag = BlockTag::Number(block);
    let troves = try_join_all(owners.iter().map(|owner| get_trove(reader, *owner, params, tag))).await?;

    let mut scored = Vec::with_capacity(troves.len());
    for user in &troves {
        if let Some(health) = assess(params, user, recovery_mode, block)? {
            scored.push(health);
        }
    }
    Ok(scored)
}
