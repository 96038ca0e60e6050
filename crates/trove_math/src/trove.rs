//! Position model
//!
//! A [`Trove`] is a plain value: collateral amounts keyed by collateral kind
//! plus total debt. Every operation returns a new Trove and leaves its input
//! untouched, so the populator can build hypothetical "after" positions
//! (current rate, decayed rate) from the same read without cloning state by hand.
//!
//! ## Ratios
//!
//! - **Nominal**: `100 * Σ amount / debt`, price independent. This is the key
//!   of the on-chain sorted list.
//! - **Real**: `Σ amount * price / debt`.
//! - **Weighted threshold**: a per-kind ratio (safety or recovery) averaged by
//!   collateral value, used for the minimum and critical checks.
//!
//! A Trove with zero debt has an infinite ratio under every definition.

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::constants::{GAS_COMPENSATION, MINIMUM_NET_DEBT, NOMINAL_COLLATERAL_RATIO_PRECISION};
use crate::decimal::Decimal;

/// Collateral amount per collateral kind (token address)
pub type Collaterals = BTreeMap<Address, Decimal>;

/// Live price per collateral kind
pub type Prices = BTreeMap<Address, Decimal>;

/// Per-kind ratio such as the safety or recovery ratio
pub type Ratios = BTreeMap<Address, Decimal>;

/// Cumulative redistribution rewards per collateral kind
pub type TotalRedistributed = BTreeMap<Address, RewardPerStake>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TroveError {
    #[error("resulting net debt {net_debt} is below the minimum net debt of {minimum}")]
    BelowMinimumDebt { net_debt: Decimal, minimum: Decimal },

    #[error("cannot withdraw {requested} of collateral {kind}: only {available} held")]
    InsufficientCollateral {
        kind: Address,
        available: Decimal,
        requested: Decimal,
    },

    #[error("cannot repay {repay}: at most {repayable} of net debt can be repaid")]
    RepayExceedsDebt { repay: Decimal, repayable: Decimal },

    #[error("no price data for collateral {0}")]
    MissingPriceData(Address),

    #[error("no redistribution totals for collateral {0}")]
    MissingRedistributionData(Address),

    #[error("redistribution totals for collateral {0} are older than the Trove's snapshot")]
    StaleRedistributionTotals(Address),

    #[error("trove is not open (status: {0:?})")]
    TroveNotOpen(TroveStatus),

    #[error("invalid amount for {what}: must be non-zero and finite")]
    InvalidAmount { what: String },

    #[error("collateral {0} appears on both sides of the adjustment")]
    DuplicateCollateral(Address),

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("invalid leverage {leverage} for collateral {kind}: must be at least 1")]
    InvalidLeverage { kind: Address, leverage: Decimal },
}

/// On-chain Trove status, in the contracts' enum order
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TroveStatus {
    NonExistent,
    Open,
    ClosedByOwner,
    ClosedByLiquidation,
    ClosedByRedemption,
}

impl TroveStatus {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::NonExistent),
            1 => Some(Self::Open),
            2 => Some(Self::ClosedByOwner),
            3 => Some(Self::ClosedByLiquidation),
            4 => Some(Self::ClosedByRedemption),
            _ => None,
        }
    }

    #[inline]
    pub fn is_open(self) -> bool {
        self == Self::Open
    }
}

/// Collateral and debt of a position
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trove {
    pub collaterals: Collaterals,
    pub debt: Decimal,
}

/// Parameters for opening a new Trove
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TroveCreationParams {
    pub deposit: Collaterals,
    pub borrow: Decimal,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DebtChange {
    Borrow(Decimal),
    Repay(Decimal),
}

/// A signed change to an existing Trove
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TroveAdjustmentParams {
    pub deposit: Collaterals,
    pub withdraw: Collaterals,
    pub debt: Option<DebtChange>,
}

/// Leverage requested for one deposited collateral kind
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeverUp {
    /// Final collateral as a multiple of the deposit, `>= 1`
    pub leverage: Decimal,
    /// Maximum tolerated swap slippage, `<= 1`
    pub max_slippage: Decimal,
}

/// Deposit after leverage has been applied
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeveredDeposit {
    pub collaterals: Collaterals,
    /// Value of the collateral bought with borrowed stablecoin
    pub additional_debt: Decimal,
}

/// Redistributed collateral and debt per unit of stake, for one collateral kind
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardPerStake {
    pub collateral: Decimal,
    pub debt: Decimal,
}

/// A Trove together with its owner and on-chain status
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTrove {
    pub owner: Address,
    pub status: TroveStatus,
    pub trove: Trove,
}

/// A Trove as stored on-chain, before pending redistribution rewards are applied
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TroveWithPendingRedistribution {
    pub user: UserTrove,
    pub stakes: BTreeMap<Address, Decimal>,
    pub snapshots: TotalRedistributed,
}

fn require_amount(amount: Decimal, what: impl FnOnce() -> String) -> Result<(), TroveError> {
    if amount.is_zero() || amount.is_infinite() {
        return Err(TroveError::InvalidAmount { what: what() });
    }
    Ok(())
}

fn require_amounts(collaterals: &Collaterals, side: &str) -> Result<(), TroveError> {
    for (kind, amount) in collaterals {
        require_amount(*amount, || format!("{side} of {kind}"))?;
    }
    Ok(())
}

fn price_of(prices: &Prices, kind: &Address) -> Result<Decimal, TroveError> {
    prices
        .get(kind)
        .copied()
        .ok_or(TroveError::MissingPriceData(*kind))
}

impl TroveCreationParams {
    pub fn validate(&self) -> Result<(), TroveError> {
        if self.deposit.is_empty() {
            return Err(TroveError::InvalidParams(
                "a new Trove needs at least one collateral deposit".into(),
            ));
        }
        require_amounts(&self.deposit, "deposit")?;
        require_amount(self.borrow, || "borrow".into())
    }
}

impl TroveAdjustmentParams {
    pub fn is_empty(&self) -> bool {
        self.deposit.is_empty() && self.withdraw.is_empty() && self.debt.is_none()
    }

    pub fn is_borrowing(&self) -> bool {
        matches!(self.debt, Some(DebtChange::Borrow(_)))
    }

    pub fn validate(&self) -> Result<(), TroveError> {
        if self.is_empty() {
            return Err(TroveError::InvalidParams("adjustment changes nothing".into()));
        }
        require_amounts(&self.deposit, "deposit")?;
        require_amounts(&self.withdraw, "withdrawal")?;
        if let Some(kind) = self.deposit.keys().find(|k| self.withdraw.contains_key(*k)) {
            return Err(TroveError::DuplicateCollateral(*kind));
        }
        match self.debt {
            Some(DebtChange::Borrow(amount)) => require_amount(amount, || "borrow".into()),
            Some(DebtChange::Repay(amount)) => require_amount(amount, || "repayment".into()),
            None => Ok(()),
        }
    }
}

/// Multiply each levered deposit and price the extra collateral as new debt
///
/// # Arguments
/// * `deposit` - Collateral the owner transfers in
/// * `leverage` - Leverage per deposited kind; kinds not listed stay unlevered
/// * `prices` - Live prices, needed for every levered kind
pub fn lever_up(
    deposit: &Collaterals,
    leverage: &BTreeMap<Address, LeverUp>,
    prices: &Prices,
) -> Result<LeveredDeposit, TroveError> {
    let mut collaterals = deposit.clone();
    let mut additional_debt = Decimal::ZERO;

    for (kind, lever) in leverage {
        let amount = deposit.get(kind).copied().ok_or_else(|| {
            TroveError::InvalidParams(format!("leverage given for {kind} without a deposit"))
        })?;
        if lever.leverage < Decimal::ONE || lever.leverage.is_infinite() {
            return Err(TroveError::InvalidLeverage {
                kind: *kind,
                leverage: lever.leverage,
            });
        }
        if lever.max_slippage > Decimal::ONE {
            return Err(TroveError::InvalidParams(format!(
                "max slippage {} for {kind} exceeds 100%",
                lever.max_slippage
            )));
        }

        let extra = amount * (lever.leverage - Decimal::ONE);
        if extra.is_zero() {
            continue;
        }
        additional_debt += extra * price_of(prices, kind)?;
        collaterals.insert(*kind, amount + extra);
    }

    Ok(LeveredDeposit {
        collaterals,
        additional_debt,
    })
}

impl Trove {
    pub fn new(collaterals: Collaterals, debt: Decimal) -> Self {
        Trove { collaterals, debt }
    }

    pub fn is_empty(&self) -> bool {
        self.collaterals.values().all(|a| a.is_zero()) && self.debt.is_zero()
    }

    pub fn total_collateral(&self) -> Decimal {
        self.collaterals.values().copied().sum()
    }

    /// Debt excluding gas compensation
    pub fn net_debt(&self) -> Decimal {
        self.debt.saturating_sub(GAS_COMPENSATION)
    }

    /// Price-independent ratio used as the sorted list key
    pub fn nominal_collateral_ratio(&self) -> Decimal {
        if self.debt.is_zero() {
            return Decimal::INFINITY;
        }
        self.total_collateral()
            .mul_div(NOMINAL_COLLATERAL_RATIO_PRECISION, self.debt)
    }

    /// `Σ amount * price`; every held kind must have a price
    pub fn collateral_value(&self, prices: &Prices) -> Result<Decimal, TroveError> {
        self.collaterals
            .iter()
            .map(|(kind, amount)| Ok(*amount * price_of(prices, kind)?))
            .sum::<Result<Decimal, TroveError>>()
    }

    pub fn collateral_ratio(&self, prices: &Prices) -> Result<Decimal, TroveError> {
        let value = self.collateral_value(prices)?;
        if self.debt.is_zero() {
            return Ok(Decimal::INFINITY);
        }
        Ok(value / self.debt)
    }

    /// Value-weighted average of per-kind `ratios` over the Trove's collateral
    pub fn weighted_ratio(&self, prices: &Prices, ratios: &Ratios) -> Result<Decimal, TroveError> {
        let mut total_value = Decimal::ZERO;
        let mut weighted = Decimal::ZERO;
        for (kind, amount) in &self.collaterals {
            let value = *amount * price_of(prices, kind)?;
            let ratio = ratios
                .get(kind)
                .copied()
                .ok_or(TroveError::MissingPriceData(*kind))?;
            total_value += value;
            weighted += value * ratio;
        }
        Ok(weighted / total_value)
    }

    /// Whether the real ratio is below the value-weighted threshold in `ratios`
    pub fn collateral_ratio_is_below(
        &self,
        prices: &Prices,
        ratios: &Ratios,
    ) -> Result<bool, TroveError> {
        let ratio = self.collateral_ratio(prices)?;
        if ratio.is_infinite() {
            return Ok(false);
        }
        let value = self.collateral_value(prices)?;
        if value.is_zero() {
            return Ok(true);
        }
        Ok(ratio < self.weighted_ratio(prices, ratios)?)
    }

    /// Recovery mode check when called on the system-wide total
    pub fn collateral_ratio_is_below_critical(
        &self,
        prices: &Prices,
        critical_ratios: &Ratios,
    ) -> Result<bool, TroveError> {
        self.collateral_ratio_is_below(prices, critical_ratios)
    }

    /// Liquidation eligibility check
    pub fn collateral_ratio_is_below_minimum(
        &self,
        prices: &Prices,
        safety_ratios: &Ratios,
    ) -> Result<bool, TroveError> {
        self.collateral_ratio_is_below(prices, safety_ratios)
    }

    /// Component-wise sum, e.g. active pool plus default pool
    pub fn add(&self, other: &Trove) -> Trove {
        let mut collaterals = self.collaterals.clone();
        for (kind, amount) in &other.collaterals {
            *collaterals.entry(*kind).or_default() += *amount;
        }
        Trove {
            collaterals,
            debt: self.debt + other.debt,
        }
    }

    /// Build the Trove that opening with `params` at `borrowing_rate` produces
    ///
    /// Debt is `borrow + borrow * rate + GAS_COMPENSATION`. Fails with
    /// [`TroveError::BelowMinimumDebt`] if the net part is below
    /// [`MINIMUM_NET_DEBT`].
    pub fn create(params: &TroveCreationParams, borrowing_rate: Decimal) -> Result<Trove, TroveError> {
        params.validate()?;
        let net_debt = fee_inclusive(params.borrow, borrowing_rate)?;
        if net_debt < MINIMUM_NET_DEBT {
            return Err(TroveError::BelowMinimumDebt {
                net_debt,
                minimum: MINIMUM_NET_DEBT,
            });
        }
        Ok(Trove {
            collaterals: params.deposit.clone(),
            debt: net_debt
                .checked_add(GAS_COMPENSATION)
                .ok_or_else(|| out_of_range("borrow"))?,
        })
    }

    /// Inverse of [`Trove::create`]: the parameters that yield `self` at `borrowing_rate`
    pub fn recreate(&self, borrowing_rate: Decimal) -> TroveCreationParams {
        TroveCreationParams {
            deposit: self.collaterals.clone(),
            borrow: self.net_debt() / (Decimal::ONE + borrowing_rate),
        }
    }

    /// Apply a signed change. The borrowing fee is charged on the borrowed
    /// part only; collateral can never go negative.
    pub fn adjust(
        &self,
        params: &TroveAdjustmentParams,
        borrowing_rate: Decimal,
    ) -> Result<Trove, TroveError> {
        params.validate()?;

        let mut collaterals = self.collaterals.clone();
        for (kind, amount) in &params.deposit {
            let entry = collaterals.entry(*kind).or_default();
            *entry = entry
                .checked_add(*amount)
                .ok_or_else(|| out_of_range(format!("deposit of {kind}")))?;
        }
        for (kind, amount) in &params.withdraw {
            let available = collaterals.get(kind).copied().unwrap_or_default();
            let remaining =
                available
                    .checked_sub(*amount)
                    .ok_or(TroveError::InsufficientCollateral {
                        kind: *kind,
                        available,
                        requested: *amount,
                    })?;
            if remaining.is_zero() {
                collaterals.remove(kind);
            } else {
                collaterals.insert(*kind, remaining);
            }
        }

        let debt = match params.debt {
            None => self.debt,
            Some(DebtChange::Borrow(amount)) => self
                .debt
                .checked_add(fee_inclusive(amount, borrowing_rate)?)
                .ok_or_else(|| out_of_range("borrow"))?,
            Some(DebtChange::Repay(amount)) => {
                let repayable = self.net_debt();
                if amount > repayable {
                    return Err(TroveError::RepayExceedsDebt {
                        repay: amount,
                        repayable,
                    });
                }
                let debt = self.debt - amount;
                let net_debt = debt.saturating_sub(GAS_COMPENSATION);
                if net_debt < MINIMUM_NET_DEBT {
                    return Err(TroveError::BelowMinimumDebt {
                        net_debt,
                        minimum: MINIMUM_NET_DEBT,
                    });
                }
                debt
            }
        };

        Ok(Trove { collaterals, debt })
    }

    /// Inverse of [`Trove::adjust`]: the change that turns `self` into `target`
    pub fn adjust_to(&self, target: &Trove, borrowing_rate: Decimal) -> TroveAdjustmentParams {
        let mut deposit = Collaterals::new();
        let mut withdraw = Collaterals::new();

        for (kind, wanted) in &target.collaterals {
            let held = self.collaterals.get(kind).copied().unwrap_or_default();
            if *wanted > held {
                deposit.insert(*kind, *wanted - held);
            } else if *wanted < held {
                withdraw.insert(*kind, held - *wanted);
            }
        }
        for (kind, held) in &self.collaterals {
            if !target.collaterals.contains_key(kind) && !held.is_zero() {
                withdraw.insert(*kind, *held);
            }
        }

        let debt = if target.debt > self.debt {
            Some(DebtChange::Borrow(
                (target.debt - self.debt) / (Decimal::ONE + borrowing_rate),
            ))
        } else if target.debt < self.debt {
            Some(DebtChange::Repay(self.debt - target.debt))
        } else {
            None
        };

        TroveAdjustmentParams {
            deposit,
            withdraw,
            debt,
        }
    }
}

/// Fee charged on `amount` of newly borrowed stablecoin
pub fn borrowing_fee(amount: Decimal, borrowing_rate: Decimal) -> Decimal {
    amount * borrowing_rate
}

/// `amount` plus its borrowing fee, or `InvalidAmount` if that overflows
fn fee_inclusive(amount: Decimal, borrowing_rate: Decimal) -> Result<Decimal, TroveError> {
    amount
        .checked_mul(borrowing_rate)
        .and_then(|fee| amount.checked_add(fee))
        .ok_or_else(|| out_of_range("borrow"))
}

fn out_of_range(what: impl Into<String>) -> TroveError {
    TroveError::InvalidAmount { what: what.into() }
}

impl UserTrove {
    /// Placeholder for an owner without an open Trove
    pub fn empty(owner: Address, status: TroveStatus) -> Self {
        UserTrove {
            owner,
            status,
            trove: Trove::default(),
        }
    }

    /// The Trove, or an error if it is not open
    pub fn open_trove(&self) -> Result<&Trove, TroveError> {
        if self.status.is_open() {
            Ok(&self.trove)
        } else {
            Err(TroveError::TroveNotOpen(self.status))
        }
    }
}

impl TroveWithPendingRedistribution {
    /// Add rewards accrued since the Trove's last snapshot
    ///
    /// For each kind the owner has stake in, pending collateral is
    /// `stake * (total.collateral - snapshot.collateral)` and pending debt is
    /// `stake * (total.debt - snapshot.debt)`. Totals equal to the snapshot
    /// leave the Trove unchanged. Closed Troves are returned as they are.
    pub fn apply_redistribution(
        &self,
        totals: &TotalRedistributed,
    ) -> Result<UserTrove, TroveError> {
        if !self.user.status.is_open() {
            return Ok(self.user.clone());
        }

        let mut trove = self.user.trove.clone();
        for (kind, stake) in &self.stakes {
            let total = totals
                .get(kind)
                .ok_or(TroveError::MissingRedistributionData(*kind))?;
            let snapshot = self.snapshots.get(kind).copied().unwrap_or_default();

            let collateral_delta = total
                .collateral
                .checked_sub(snapshot.collateral)
                .ok_or(TroveError::StaleRedistributionTotals(*kind))?;
            let debt_delta = total
                .debt
                .checked_sub(snapshot.debt)
                .ok_or(TroveError::StaleRedistributionTotals(*kind))?;

            let pending_collateral = *stake * collateral_delta;
            if !pending_collateral.is_zero() {
                *trove.collaterals.entry(*kind).or_default() += pending_collateral;
            }
            trove.debt += *stake * debt_delta;
        }

        Ok(UserTrove {
            trove,
            ..self.user.clone()
        })
    }
}
