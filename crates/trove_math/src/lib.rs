//! Client-side position and fee math for a multi-collateral CDP protocol
//!
//! Everything here is pure and synchronous: no I/O, no clocks, no randomness.
//! Results must agree with the contracts to the last wei, so all arithmetic is
//! 18-decimal fixed point with the contracts' truncation and rounding rules.
//!
//! ## Modules
//!
//! - [`decimal`]: `Decimal`, the U256-backed fixed-point value type
//! - [`constants`]: protocol constants (debt floor, fee floors, decay factor)
//! - [`trove`]: the position model and its pure transformations
//! - [`fees`]: base-rate decay and the borrowing/redemption rates
//!
//! ## Usage Example
//!
//! ```rust
//! use alloy_primitives::Address;
//! use trove_math::*;
//!
//! let weth = Address::repeat_byte(1);
//! let fees = FeesFactory::new(Decimal::ZERO, 0).at(0, false);
//!
//! let params = TroveCreationParams {
//!     deposit: [(weth, "3".parse().unwrap())].into_iter().collect(),
//!     borrow: "3000".parse().unwrap(),
//! };
//! let trove = Trove::create(&params, fees.borrowing_rate()).unwrap();
//! assert_eq!(trove.debt.to_string(), "3215");
//! ```

pub mod constants;
pub mod decimal;
pub mod fees;
pub mod trove;

pub use decimal::{Decimal, DecimalError};
pub use fees::{Fees, FeesFactory};
pub use trove::{
    borrowing_fee, lever_up, Collaterals, DebtChange, LeverUp, LeveredDeposit, Prices, Ratios,
    RewardPerStake, TotalRedistributed, Trove, TroveAdjustmentParams, TroveCreationParams,
    TroveError, TroveStatus, TroveWithPendingRedistribution, UserTrove,
};
