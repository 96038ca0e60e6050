//! Insertion hints for the sorted Trove list
//!
//! The contracts keep Troves in a doubly linked list ordered by descending
//! nominal collateral ratio. An insert is only cheap when the caller passes a
//! `(prev, next)` pair close to the final position, and the list is far too
//! long to walk from the client.
//!
//! The search runs in two steps:
//!
//! 1. **Sampling**: `getApproxHint` checks `numTrials` random Troves and
//!    returns the closest one. About `k * sqrt(N)` trials give a hint a few
//!    positions away on average. Trials are split into calls of at most
//!    `max_trials_per_call` so no single read grows unbounded; each call
//!    continues from the seed the previous one returned, so calls are
//!    sequential.
//! 2. **Refining**: `findInsertPosition` walks from the best sample to the
//!    exact bracketing pair.
//!
//! Any failed read aborts the whole search.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use trove_math::{Decimal, Trove};

use crate::chain::{ApproxHint, BlockTag, ChainError, ChainReader};
use crate::config::PopulateConfig;
use crate::error::{Error, Result};

/// Progress of a hint search, reported when a read fails
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum HintSearchPhase {
    NotStarted,
    Sampling,
    Refining,
    Done,
}

impl fmt::Display for HintSearchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HintSearchPhase::NotStarted => "reading the list size",
            HintSearchPhase::Sampling => "sampling approximate hints",
            HintSearchPhase::Refining => "refining the insert position",
            HintSearchPhase::Done => "finishing",
        })
    }
}

/// Ids bracketing an insert position; `Address::ZERO` marks a list boundary
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HintPair {
    pub prev: Address,
    pub next: Address,
}

impl HintPair {
    /// Hints for an empty list
    pub const NONE: HintPair = HintPair {
        prev: Address::ZERO,
        next: Address::ZERO,
    };

    pub fn new(prev: Address, next: Address) -> Self {
        HintPair { prev, next }
    }

    /// Anchor both sides on the one non-null id, the list's convention for
    /// inserting at the head or the tail
    pub fn normalized(self) -> Self {
        if self.prev.is_zero() {
            HintPair::new(self.next, self.next)
        } else if self.next.is_zero() {
            HintPair::new(self.prev, self.prev)
        } else {
            self
        }
    }
}

fn ceil_sqrt(x: u128) -> u128 {
    if x < 2 {
        return x;
    }
    // Newton's method from above converges to floor(sqrt(x))
    let mut r = x;
    let mut y = x / 2 + x % 2;
    while y < r {
        r = y;
        y = (r + x / r) / 2;
    }
    if r * r < x {
        r + 1
    } else {
        r
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HintFinder {
    trials_factor: u64,
    max_trials_per_call: u64,
}

impl Default for HintFinder {
    fn default() -> Self {
        HintFinder::from_config(&PopulateConfig::default())
    }
}

impl HintFinder {
    pub fn new(trials_factor: u64, max_trials_per_call: u64) -> Self {
        HintFinder {
            trials_factor: trials_factor.max(1),
            max_trials_per_call: max_trials_per_call.max(1),
        }
    }

    pub fn from_config(config: &PopulateConfig) -> Self {
        HintFinder::new(config.hint_trials_factor, config.max_trials_per_call)
    }

    /// `ceil(k * sqrt(list_size))`, computed as `ceil(sqrt(k² * list_size))`
    pub fn total_trials(&self, list_size: u64) -> u64 {
        let k = u128::from(self.trials_factor);
        let trials = ceil_sqrt(k.saturating_mul(k).saturating_mul(u128::from(list_size)));
        u64::try_from(trials).unwrap_or(u64::MAX)
    }

    /// Split `total` trials into calls of at most `max_trials_per_call`
    pub fn trial_batches(&self, total: u64) -> Vec<u64> {
        let mut batches = Vec::new();
        let mut remaining = total;
        while remaining > 0 {
            let batch = remaining.min(self.max_trials_per_call);
            batches.push(batch);
            remaining -= batch;
        }
        batches
    }

    /// Hints for inserting `trove`, see [`HintFinder::find`]
    pub async fn find_for_trove<R: ChainReader + ?Sized>(
        &self,
        reader: &R,
        trove: &Trove,
        owner: Option<Address>,
    ) -> Result<HintPair> {
        self.find(reader, trove.nominal_collateral_ratio(), owner).await
    }

    /// Hints for inserting a Trove with `nominal_ratio`, seeded at random
    ///
    /// Pass the `owner` of a Trove that is already in the list: the contracts
    /// remove it before reinserting, so it can not serve as its own hint.
    pub async fn find<R: ChainReader + ?Sized>(
        &self,
        reader: &R,
        nominal_ratio: Decimal,
        owner: Option<Address>,
    ) -> Result<HintPair> {
        let seed = U256::from(rand::random::<u64>());
        self.find_with_seed(reader, nominal_ratio, owner, seed).await
    }

    pub async fn find_with_seed<R: ChainReader + ?Sized>(
        &self,
        reader: &R,
        nominal_ratio: Decimal,
        owner: Option<Address>,
        seed: U256,
    ) -> Result<HintPair> {
        let tag = BlockTag::Latest;
        let fail = |phase: HintSearchPhase| move |source: ChainError| Error::HintLookupFailed { phase, source };

        let mut phase = HintSearchPhase::NotStarted;
        let size = reader.get_size(tag).await.map_err(fail(phase))?;
        if size == 0 {
            return Ok(HintPair::NONE);
        }
        if nominal_ratio.is_infinite() {
            let first = reader.get_first(tag).await.map_err(fail(phase))?;
            return Ok(HintPair::new(Address::ZERO, first));
        }
        if size == 1 {
            // A lone zero-debt member sorts above any finite ratio
            let head = reader.get_first(tag).await.map_err(fail(phase))?;
            if reader.get_trove_debt(head, tag).await.map_err(fail(phase))?.is_zero() {
                return Ok(HintPair::new(Address::ZERO, head));
            }
        }

        phase = HintSearchPhase::Sampling;
        let batches = self.trial_batches(self.total_trials(size));
        let mut seed = seed;
        let mut best: Option<ApproxHint> = None;
        for trials in batches {
            let sample = reader
                .get_approx_hint(nominal_ratio.raw(), trials, seed, tag)
                .await
                .map_err(fail(phase))?;
            log::trace!(
                "{} trials: hint {} diff {}",
                trials,
                sample.hint_address,
                sample.diff
            );
            seed = sample.latest_random_seed;
            if best.map_or(true, |b| sample.diff < b.diff) {
                best = Some(sample);
            }
        }
        let hint = best.map(|b| b.hint_address).unwrap_or_default();

        phase = HintSearchPhase::Refining;
        let (mut prev, mut next) = reader
            .find_insert_position(nominal_ratio.raw(), hint, hint, tag)
            .await
            .map_err(fail(phase))?;

        if let Some(owner) = owner {
            if prev == owner {
                prev = reader.get_prev(prev, tag).await.map_err(fail(phase))?;
            }
            if next == owner {
                next = reader.get_next(next, tag).await.map_err(fail(phase))?;
            }
        }

        let hints = HintPair::new(prev, next).normalized();
        log::debug!(
            "hints for NICR {}: prev {} next {}",
            nominal_ratio,
            hints.prev,
            hints.next
        );
        Ok(hints)
    }
}
