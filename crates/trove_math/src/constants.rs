//! Protocol constants
//!
//! These mirror the deployed contracts bit for bit. Fee projections and debt
//! checks diverge from the chain if any of them drifts.

use crate::decimal::Decimal;

/// Debt added to every Trove to pay the liquidator's gas, refunded on close
pub const GAS_COMPENSATION: Decimal = Decimal::from_raw_u128(200_000_000_000_000_000_000);

/// Smallest allowed debt excluding [`GAS_COMPENSATION`]
pub const MINIMUM_NET_DEBT: Decimal = Decimal::from_raw_u128(1_800_000_000_000_000_000_000);

/// Smallest allowed total debt, `MINIMUM_NET_DEBT + GAS_COMPENSATION`
pub const MINIMUM_DEBT: Decimal = Decimal::from_raw_u128(2_000_000_000_000_000_000_000);

/// Per-minute base rate decay, half-life of 12 hours
pub const MINUTE_DECAY_FACTOR: Decimal = Decimal::from_raw_u128(999_037_758_833_783_000);

/// Divisor applied to the redeemed fraction of supply in the redemption rate
pub const BETA: Decimal = Decimal::from_raw_u128(2_000_000_000_000_000_000);

/// 0.5%
pub const BORROWING_FEE_FLOOR: Decimal = Decimal::from_raw_u128(5_000_000_000_000_000);

/// 5%
pub const MAX_BORROWING_FEE: Decimal = Decimal::from_raw_u128(50_000_000_000_000_000);

/// 0.5%
pub const REDEMPTION_FEE_FLOOR: Decimal = Decimal::from_raw_u128(5_000_000_000_000_000);

/// Nominal collateral ratios are scaled by 100 to keep precision in the sorted list
pub const NOMINAL_COLLATERAL_RATIO_PRECISION: Decimal =
    Decimal::from_raw_u128(100_000_000_000_000_000_000);
