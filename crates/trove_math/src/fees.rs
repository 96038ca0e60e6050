//! Fee decay model
//!
//! The base rate jumps on redemptions and decays per elapsed minute
//! otherwise. The rate seen by a transaction depends on the block it lands
//! in, so callers evaluate [`Fees`] at several hypothetical timestamps to bound
//! the worst case.

use serde::{Deserialize, Serialize};

use crate::constants::{
    BETA, BORROWING_FEE_FLOOR, MAX_BORROWING_FEE, MINUTE_DECAY_FACTOR, REDEMPTION_FEE_FLOOR,
};
use crate::decimal::Decimal;

const SECONDS_PER_MINUTE: u64 = 60;

/// Captures the two chain-read fee values once; evaluate at any timestamp
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeesFactory {
    pub base_rate_without_decay: Decimal,
    /// Unix seconds
    pub last_fee_operation_time: u64,
}

impl FeesFactory {
    pub fn new(base_rate_without_decay: Decimal, last_fee_operation_time: u64) -> Self {
        FeesFactory {
            base_rate_without_decay,
            last_fee_operation_time,
        }
    }

    /// Fee state as seen by a block mined at `timestamp`
    pub fn at(&self, timestamp: u64, recovery_mode: bool) -> Fees {
        Fees {
            base_rate_without_decay: self.base_rate_without_decay,
            minute_decay_factor: MINUTE_DECAY_FACTOR,
            beta: BETA,
            last_fee_operation_time: self.last_fee_operation_time,
            timestamp,
            recovery_mode,
        }
    }
}

/// Fee state at a fixed point in time
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fees {
    base_rate_without_decay: Decimal,
    minute_decay_factor: Decimal,
    beta: Decimal,
    last_fee_operation_time: u64,
    timestamp: u64,
    recovery_mode: bool,
}

impl Fees {
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn recovery_mode(&self) -> bool {
        self.recovery_mode
    }

    /// Whole minutes since the last fee operation; a timestamp before it counts as zero
    pub fn minutes_since_last_fee_operation(&self, when: u64) -> u64 {
        when.saturating_sub(self.last_fee_operation_time) / SECONDS_PER_MINUTE
    }

    pub fn base_rate(&self) -> Decimal {
        self.base_rate_at(self.timestamp)
    }

    /// `baseRateWithoutDecay * minuteDecayFactor ^ minutesElapsed`
    pub fn base_rate_at(&self, when: u64) -> Decimal {
        self.minute_decay_factor
            .pow(self.minutes_since_last_fee_operation(when))
            * self.base_rate_without_decay
    }

    pub fn borrowing_rate(&self) -> Decimal {
        self.borrowing_rate_at(self.timestamp)
    }

    /// Zero in recovery mode, else `min(floor + baseRate, max)`
    pub fn borrowing_rate_at(&self, when: u64) -> Decimal {
        if self.recovery_mode {
            return Decimal::ZERO;
        }
        (BORROWING_FEE_FLOOR + self.base_rate_at(when)).min(MAX_BORROWING_FEE)
    }

    pub fn redemption_rate(&self, redeemed_fraction_of_supply: Decimal) -> Decimal {
        self.redemption_rate_at(redeemed_fraction_of_supply, self.timestamp)
    }

    /// `min(floor + baseRate + redeemedFraction / beta, 1)`
    pub fn redemption_rate_at(&self, redeemed_fraction_of_supply: Decimal, when: u64) -> Decimal {
        let newly_redeemed = redeemed_fraction_of_supply / self.beta;
        (REDEMPTION_FEE_FLOOR + self.base_rate_at(when) + newly_redeemed).min(Decimal::ONE)
    }
}
