use alloy_primitives::Address;
use thiserror::Error;
use trove_math::{Decimal, DecimalError, TroveError};

use crate::chain::ChainError;
use crate::hints::HintSearchPhase;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("collateral {0} is not on the whitelist")]
    UnknownCollateral(Address),

    #[error(transparent)]
    Trove(#[from] TroveError),

    #[error("invalid amount: {0}")]
    Decimal(#[from] DecimalError),

    #[error(
        "resulting net debt would fall below the minimum of {minimum} within {minutes} minutes \
         as the borrowing fee decays"
    )]
    DebtDecayBelowMinimum { minutes: u64, minimum: Decimal },

    #[error("redemption amount must be at least {minimum} to redeem from any Trove")]
    RedemptionAmountTooLow { minimum: Decimal },

    #[error("redemption was not truncated, there is nothing to top up")]
    RedemptionNotTruncated,

    #[error("hint lookup failed while {phase}: {source}")]
    HintLookupFailed {
        phase: HintSearchPhase,
        #[source]
        source: ChainError,
    },

    #[error("no price data for collateral {0}")]
    MissingPriceData(Address),

    #[error(transparent)]
    Chain(#[from] ChainError),
}
