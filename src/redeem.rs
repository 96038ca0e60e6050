//! Redemption
//!
//! Redemptions walk the sorted list from its tail. The contracts can only
//! redeem whole Troves plus one partial Trove that stays above the debt
//! floor, so the requested amount may be cut short. `getRedemptionHints`
//! reports where the walk starts, the partially redeemed Trove's new NICR and
//! the amount that will actually be redeemed.

use alloy_primitives::U256;
use alloy_sol_types::SolCall;
use futures::try_join;
use trove_math::constants::MINIMUM_NET_DEBT;
use trove_math::{Decimal, TroveError};

use crate::abi::ITroveManager;
use crate::chain::{BlockTag, ChainReader, ChainWriter};
use crate::error::{Error, Result};
use crate::hints::HintPair;
use crate::populate::Populator;
use crate::readable::get_system_state;
use crate::receipt::{PopulatedTransaction, RedemptionParser};

/// A populated redemption and how much of the request it covers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PopulatedRedemption {
    pub tx: PopulatedTransaction<RedemptionParser>,
    pub attempted_amount: Decimal,
    pub redeemable_amount: Decimal,
    pub is_truncated: bool,
    max_redemption_rate: Option<Decimal>,
}

impl PopulatedRedemption {
    /// Amount the continuation redeems: the truncated amount plus the minimum net debt
    pub fn continuation_amount(&self) -> Option<Decimal> {
        self.is_truncated
            .then(|| self.redeemable_amount + MINIMUM_NET_DEBT)
    }

    /// Re-populate for [`Self::continuation_amount`], so the last Trove
    /// touched is left with at least the minimum net debt
    ///
    /// Uses the max redemption rate pinned for this redemption unless
    /// another is given.
    pub async fn increase_amount_by_minimum_net_debt<R, W>(
        &self,
        populator: &Populator<'_, R, W>,
        max_redemption_rate: Option<Decimal>,
    ) -> Result<PopulatedRedemption>
    where
        R: ChainReader + ?Sized,
        W: ChainWriter + ?Sized,
    {
        let amount = self
            .continuation_amount()
            .ok_or(Error::RedemptionNotTruncated)?;
        populator
            .redeem(amount, max_redemption_rate.or(self.max_redemption_rate), None)
            .await
    }
}

impl<'a, R, W> Populator<'a, R, W>
where
    R: ChainReader + ?Sized,
    W: ChainWriter + ?Sized,
{
    /// Populate `redeemCollateral` for up to `amount` of stablecoin
    pub async fn redeem(
        &self,
        amount: Decimal,
        max_redemption_rate: Option<Decimal>,
        gas_limit: Option<u64>,
    ) -> Result<PopulatedRedemption> {
        if amount.is_zero() || amount.is_infinite() {
            return Err(TroveError::InvalidAmount {
                what: "redemption".into(),
            }
            .into());
        }
        let config = &self.context.config;

        let (state, raw_hints) = try_join!(
            get_system_state(self.reader, BlockTag::Latest),
            async {
                Ok::<_, Error>(
                    self.reader
                        .get_redemption_hints(amount.raw(), config.redeem_max_iterations, BlockTag::Latest)
                        .await?,
                )
            },
        )?;

        let redeemable = Decimal::from_raw(raw_hints.truncated_amount);
        if redeemable.is_zero() {
            return Err(Error::RedemptionAmountTooLow {
                minimum: MINIMUM_NET_DEBT,
            });
        }

        let partial_nicr = Decimal::from_raw(raw_hints.partial_redemption_hint_nicr);
        let partial_hints = if partial_nicr.is_zero() {
            HintPair::NONE
        } else {
            self.hints.find(self.reader, partial_nicr, None).await?
        };

        let fees = state.fees_after(0)?;
        let pinned_rate = max_redemption_rate;
        let max_redemption_rate = max_redemption_rate.unwrap_or_else(|| {
            let fraction = redeemable
                .checked_div(state.total.debt)
                .unwrap_or(Decimal::ONE)
                .min(Decimal::ONE);
            (fees.redemption_rate(fraction) + config.redemption_rate_slippage).min(Decimal::ONE)
        });
        log::debug!(
            "redeem {} of {} requested, first hint {}, max rate {}",
            redeemable,
            amount,
            raw_hints.first_redemption_hint,
            max_redemption_rate
        );

        let data = ITroveManager::redeemCollateralCall {
            _YUSDAmount: redeemable.raw(),
            _maxFeePercentage: max_redemption_rate.raw(),
            _firstRedemptionHint: raw_hints.first_redemption_hint,
            _upperPartialRedemptionHint: partial_hints.prev,
            _lowerPartialRedemptionHint: partial_hints.next,
            _partialRedemptionHintNICR: partial_nicr.raw(),
            _maxIterations: U256::from(config.redeem_max_iterations),
        }
        .abi_encode();

        let call = self.contract_call(self.context.addresses.trove_manager, data);
        let (call, gas_headroom) = self
            .with_gas(call, gas_limit, config.decay_tolerance_update_gas())
            .await?;

        Ok(PopulatedRedemption {
            tx: PopulatedTransaction {
                call,
                gas_headroom,
                parser: RedemptionParser {
                    trove_manager: self.context.addresses.trove_manager,
                    decimals: state.collateral.decimals(),
                },
            },
            attempted_amount: amount,
            redeemable_amount: redeemable,
            is_truncated: redeemable < amount,
            max_redemption_rate: pinned_rate,
        })
    }
}
