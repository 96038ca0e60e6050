//! Transaction population
//!
//! Turns an owner's intent into a chain-ready call: reads the whitelist,
//! system total and fee state, builds the hypothetical Trove, finds its
//! insertion hints, encodes collateral arrays in whitelist order and sets a
//! gas limit.
//!
//! ## Dual gas estimation
//!
//! A borrowing transaction may sit in the mempool while the base rate decays.
//! It is estimated twice: once as populated, and once with the smaller borrow
//! that yields the same debt at the current rate as the full borrow does at the
//! rate `borrowing_fee_decay_tolerance_minutes` from now. The limit covers the
//! worse case plus list traversal and the base-rate update, and the populator
//! refuses outright if the decayed case would fall under the debt floor.

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::SolCall;
use futures::try_join;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use trove_math::constants::MINIMUM_DEBT;
use trove_math::{
    lever_up, Collaterals, DebtChange, Decimal, LeverUp, LeveredDeposit, Trove,
    TroveAdjustmentParams, TroveCreationParams, TroveError,
};

use crate::abi::{IBorrowerOperations, ITroveManager};
use crate::chain::{BlockTag, ChainReader, ChainWriter, ContractCall};
use crate::config::{Context, PopulateConfig};
use crate::error::{Error, Result};
use crate::hints::{HintFinder, HintPair};
use crate::readable::{get_collateral_params, get_system_state, get_trove, CollateralParams};
use crate::receipt::{LiquidationParser, PopulatedTransaction, TroveChangeParser};

/// Open a Trove, optionally levering some of the deposit
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenTroveParams {
    pub trove: TroveCreationParams,
    #[serde(default)]
    pub leverage: BTreeMap<Address, LeverUp>,
}

impl From<TroveCreationParams> for OpenTroveParams {
    fn from(trove: TroveCreationParams) -> Self {
        OpenTroveParams {
            trove,
            leverage: BTreeMap::new(),
        }
    }
}

/// Adjust a Trove, optionally levering some of the deposit
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustTroveParams {
    pub adjustment: TroveAdjustmentParams,
    #[serde(default)]
    pub leverage: BTreeMap<Address, LeverUp>,
}

impl From<TroveAdjustmentParams> for AdjustTroveParams {
    fn from(adjustment: TroveAdjustmentParams) -> Self {
        AdjustTroveParams {
            adjustment,
            leverage: BTreeMap::new(),
        }
    }
}

/// Collateral sold to repay debt when closing
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unlever {
    pub amount: Decimal,
    pub max_slippage: Decimal,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GasEstimate {
    pub gas_limit: u64,
    /// `gas_limit` minus the estimate for the call as populated
    pub headroom: u64,
}

impl GasEstimate {
    /// Limit for the worse of the current and decayed-rate estimates
    pub fn dual(config: &PopulateConfig, now: u64, later: u64, base_rate_update_gas: u64) -> Self {
        let limit = now
            .saturating_add(config.list_traversal_gas)
            .max(later)
            .saturating_add(base_rate_update_gas);
        Self::capped(config, now, now.max(later), limit)
    }

    pub fn padded(config: &PopulateConfig, estimate: u64, padding: u64) -> Self {
        Self::capped(config, estimate, estimate, estimate.saturating_add(padding))
    }

    /// Clamp to the block gas limit, but never below the largest raw estimate
    fn capped(config: &PopulateConfig, now: u64, floor: u64, limit: u64) -> Self {
        let gas_limit = limit.min(config.block_gas_limit).max(floor);
        GasEstimate {
            gas_limit,
            headroom: gas_limit - now,
        }
    }
}

fn decay_below_minimum(config: &PopulateConfig) -> Error {
    Error::DebtDecayBelowMinimum {
        minutes: config.borrowing_fee_decay_tolerance_minutes,
        minimum: MINIMUM_DEBT,
    }
}

/// Creation params with the levered deposit and its debt folded in
fn levered_creation(params: &TroveCreationParams, levered: &LeveredDeposit) -> TroveCreationParams {
    TroveCreationParams {
        deposit: levered.collaterals.clone(),
        borrow: params.borrow + levered.additional_debt,
    }
}

fn levered_adjustment(
    params: &TroveAdjustmentParams,
    levered: &LeveredDeposit,
) -> Result<TroveAdjustmentParams> {
    let debt = match (params.debt, levered.additional_debt.is_zero()) {
        (debt, true) => debt,
        (None, false) => Some(DebtChange::Borrow(levered.additional_debt)),
        (Some(DebtChange::Borrow(amount)), false) => {
            Some(DebtChange::Borrow(amount + levered.additional_debt))
        }
        (Some(DebtChange::Repay(_)), false) => {
            return Err(Error::InvalidParams(
                "cannot repay debt while levering up".into(),
            ))
        }
    };
    Ok(TroveAdjustmentParams {
        deposit: levered.collaterals.clone(),
        withdraw: params.withdraw.clone(),
        debt,
    })
}

/// `(amount, isIncrease)` as the contracts take a debt change
fn encode_debt_change(debt: Option<DebtChange>) -> (U256, bool) {
    match debt {
        Some(DebtChange::Borrow(amount)) => (amount.raw(), true),
        Some(DebtChange::Repay(amount)) => (amount.raw(), false),
        None => (U256::ZERO, false),
    }
}

/// Leverage and slippage arrays aligned with `kinds`; unlevered kinds get `1x` and `0`
fn encode_leverage(kinds: &[Address], leverage: &BTreeMap<Address, LeverUp>) -> (Vec<U256>, Vec<U256>) {
    kinds
        .iter()
        .map(|kind| match leverage.get(kind) {
            Some(lever) => (lever.leverage.raw(), lever.max_slippage.raw()),
            None => (Decimal::ONE.raw(), U256::ZERO),
        })
        .unzip()
}

/// Builds populated transactions against one reader/writer pair
pub struct Populator<'a, R: ?Sized, W: ?Sized> {
    pub(crate) reader: &'a R,
    pub(crate) writer: &'a W,
    pub(crate) context: &'a Context,
    pub(crate) hints: HintFinder,
}

impl<'a, R, W> Populator<'a, R, W>
where
    R: ChainReader + ?Sized,
    W: ChainWriter + ?Sized,
{
    pub fn new(reader: &'a R, writer: &'a W, context: &'a Context) -> Self {
        Populator {
            reader,
            writer,
            context,
            hints: HintFinder::from_config(&context.config),
        }
    }

    pub fn context(&self) -> &Context {
        self.context
    }

    fn config(&self) -> &PopulateConfig {
        &self.context.config
    }

    pub(crate) fn contract_call(&self, to: Address, data: Vec<u8>) -> ContractCall {
        ContractCall {
            from: self.context.sender,
            to,
            data: Bytes::from(data),
            value: U256::ZERO,
            gas_limit: None,
        }
    }

    /// Pin `gas_limit` if given, else estimate and pad by `padding`
    pub(crate) async fn with_gas(
        &self,
        mut call: ContractCall,
        gas_limit: Option<u64>,
        padding: u64,
    ) -> Result<(ContractCall, Option<u64>)> {
        if let Some(limit) = gas_limit {
            call.gas_limit = Some(limit);
            return Ok((call, None));
        }
        let estimate = self.writer.estimate_gas(&call).await?;
        let gas = GasEstimate::padded(self.config(), estimate, padding);
        log::debug!(
            "gas estimate {} -> limit {} (headroom {})",
            estimate,
            gas.gas_limit,
            gas.headroom
        );
        call.gas_limit = Some(gas.gas_limit);
        Ok((call, Some(gas.headroom)))
    }

    /// Estimate `now` and `later` concurrently and apply [`GasEstimate::dual`]
    async fn with_dual_gas(
        &self,
        mut call: ContractCall,
        later: ContractCall,
        base_rate_update_gas: u64,
    ) -> Result<(ContractCall, Option<u64>)> {
        let (gas_now, gas_later) = try_join!(
            self.writer.estimate_gas(&call),
            self.writer.estimate_gas(&later),
        )?;
        let gas = GasEstimate::dual(self.config(), gas_now, gas_later, base_rate_update_gas);
        log::debug!(
            "gas estimates now {} / decayed {} -> limit {} (headroom {})",
            gas_now,
            gas_later,
            gas.gas_limit,
            gas.headroom
        );
        call.gas_limit = Some(gas.gas_limit);
        Ok((call, Some(gas.headroom)))
    }

    fn trove_change_parser(&self, collateral: &CollateralParams) -> TroveChangeParser {
        TroveChangeParser {
            borrower_operations: self.context.addresses.borrower_operations,
            owner: self.context.sender,
            decimals: collateral.decimals(),
        }
    }

    fn encode_open(
        &self,
        collateral: &CollateralParams,
        params: &OpenTroveParams,
        borrow: Decimal,
        hints: HintPair,
        max_borrowing_rate: Decimal,
    ) -> Result<Vec<u8>> {
        let (colls, amounts) = collateral.encode(&params.trove.deposit)?;
        if params.leverage.is_empty() {
            return Ok(IBorrowerOperations::openTroveCall {
                _maxFeePercentage: max_borrowing_rate.raw(),
                _YUSDAmount: borrow.raw(),
                _upperHint: hints.prev,
                _lowerHint: hints.next,
                _colls: colls,
                _amounts: amounts,
            }
            .abi_encode());
        }
        let (leverages, slippages) = encode_leverage(&colls, &params.leverage);
        Ok(IBorrowerOperations::openTroveLeverUpCall {
            _maxFeePercentage: max_borrowing_rate.raw(),
            _YUSDAmount: borrow.raw(),
            _upperHint: hints.prev,
            _lowerHint: hints.next,
            _colls: colls,
            _amounts: amounts,
            _leverages: leverages,
            _maxSlippages: slippages,
        }
        .abi_encode())
    }

    fn encode_adjust(
        &self,
        collateral: &CollateralParams,
        params: &AdjustTroveParams,
        debt: Option<DebtChange>,
        hints: HintPair,
        max_borrowing_rate: Decimal,
    ) -> Result<Vec<u8>> {
        let (colls_in, amounts_in) = collateral.encode(&params.adjustment.deposit)?;
        let (colls_out, amounts_out) = collateral.encode(&params.adjustment.withdraw)?;
        let (debt_change, is_debt_increase) = encode_debt_change(debt);

        if params.leverage.is_empty() {
            return Ok(IBorrowerOperations::adjustTroveCall {
                _collsIn: colls_in,
                _amountsIn: amounts_in,
                _collsOut: colls_out,
                _amountsOut: amounts_out,
                _YUSDChange: debt_change,
                _isDebtIncrease: is_debt_increase,
                _upperHint: hints.prev,
                _lowerHint: hints.next,
                _maxFeePercentage: max_borrowing_rate.raw(),
            }
            .abi_encode());
        }
        let (leverages, slippages) = encode_leverage(&colls_in, &params.leverage);
        Ok(IBorrowerOperations::adjustTroveLeverUpCall {
            _collsIn: colls_in,
            _amountsIn: amounts_in,
            _leverages: leverages,
            _maxSlippages: slippages,
            _collsOut: colls_out,
            _amountsOut: amounts_out,
            _YUSDChange: debt_change,
            _isDebtIncrease: is_debt_increase,
            _upperHint: hints.prev,
            _lowerHint: hints.next,
            _maxFeePercentage: max_borrowing_rate.raw(),
        }
        .abi_encode())
    }

    /// Populate `openTrove` (or `openTroveLeverUp` when leverage is given)
    ///
    /// # Arguments
    /// * `params` - Deposit, borrow amount and optional per-kind leverage
    /// * `max_borrowing_rate` - Highest fee rate to accept; defaults to the
    ///   current rate plus the configured slippage
    /// * `gas_limit` - Skips gas estimation when given
    pub async fn open_trove(
        &self,
        params: &OpenTroveParams,
        max_borrowing_rate: Option<Decimal>,
        gas_limit: Option<u64>,
    ) -> Result<PopulatedTransaction<TroveChangeParser>> {
        params.trove.validate()?;

        let state = get_system_state(self.reader, BlockTag::Latest).await?;
        let collateral = &state.collateral;
        collateral.require_whitelisted(params.trove.deposit.keys())?;

        let fees = state.fees_after(0)?;
        let borrowing_rate = fees.borrowing_rate();

        let levered = lever_up(&params.trove.deposit, &params.leverage, &collateral.prices())?;
        let effective = levered_creation(&params.trove, &levered);
        let new_trove = Trove::create(&effective, borrowing_rate)?;
        let hints = self.hints.find_for_trove(self.reader, &new_trove, None).await?;

        let max_borrowing_rate =
            max_borrowing_rate.unwrap_or(borrowing_rate + self.config().borrowing_rate_slippage);
        log::debug!(
            "open: debt {} NICR {} rate {} (max {})",
            new_trove.debt,
            new_trove.nominal_collateral_ratio(),
            borrowing_rate,
            max_borrowing_rate
        );

        let data = self.encode_open(collateral, params, params.trove.borrow, hints, max_borrowing_rate)?;
        let call = self.contract_call(self.context.addresses.borrower_operations, data);

        let (call, gas_headroom) = match gas_limit {
            Some(_) => self.with_gas(call, gas_limit, 0).await?,
            None => {
                let decayed_rate = fees
                    .borrowing_rate_at(fees.timestamp() + self.config().decay_tolerance_seconds());
                let decayed_trove = match Trove::create(&effective, decayed_rate) {
                    Err(TroveError::BelowMinimumDebt { .. }) => {
                        return Err(decay_below_minimum(self.config()))
                    }
                    other => other?,
                };
                if decayed_trove.debt < MINIMUM_DEBT {
                    return Err(decay_below_minimum(self.config()));
                }

                let borrow_simulating_decay = decayed_trove
                    .recreate(borrowing_rate)
                    .borrow
                    .saturating_sub(levered.additional_debt);
                let later_data = self.encode_open(
                    collateral,
                    params,
                    borrow_simulating_decay,
                    hints,
                    max_borrowing_rate,
                )?;
                let later = self.contract_call(self.context.addresses.borrower_operations, later_data);

                let base_rate_update_gas = if fees.recovery_mode() {
                    0
                } else {
                    self.config().decay_tolerance_update_gas()
                };
                self.with_dual_gas(call, later, base_rate_update_gas).await?
            }
        };

        Ok(PopulatedTransaction {
            call,
            gas_headroom,
            parser: self.trove_change_parser(collateral),
        })
    }

    /// Populate `adjustTrove` (or `adjustTroveLeverUp`) for the sender's Trove
    ///
    /// Only a borrow is estimated twice; other adjustments pay no fee and
    /// are padded for list traversal alone.
    pub async fn adjust_trove(
        &self,
        params: &AdjustTroveParams,
        max_borrowing_rate: Option<Decimal>,
        gas_limit: Option<u64>,
    ) -> Result<PopulatedTransaction<TroveChangeParser>> {
        params.adjustment.validate()?;
        if !params.leverage.is_empty() && matches!(params.adjustment.debt, Some(DebtChange::Repay(_))) {
            return Err(Error::InvalidParams(
                "cannot repay debt while levering up".into(),
            ));
        }

        let owner = self.context.sender;
        let state = get_system_state(self.reader, BlockTag::Latest).await?;
        let collateral = &state.collateral;
        collateral.require_whitelisted(
            params
                .adjustment
                .deposit
                .keys()
                .chain(params.adjustment.withdraw.keys()),
        )?;

        let user = get_trove(self.reader, owner, collateral, BlockTag::Latest).await?;
        let trove = user.open_trove()?;

        let fees = state.fees_after(0)?;
        let borrowing_rate = fees.borrowing_rate();

        let levered = lever_up(&params.adjustment.deposit, &params.leverage, &collateral.prices())?;
        let effective = levered_adjustment(&params.adjustment, &levered)?;
        let adjusted = trove.adjust(&effective, borrowing_rate)?;
        let hints = self.hints.find_for_trove(self.reader, &adjusted, Some(owner)).await?;

        let borrowing = effective.is_borrowing();
        let max_borrowing_rate = max_borrowing_rate.unwrap_or(if borrowing {
            borrowing_rate + self.config().borrowing_rate_slippage
        } else {
            Decimal::ZERO
        });
        log::debug!(
            "adjust {}: debt {} -> {} NICR {}",
            owner,
            trove.debt,
            adjusted.debt,
            adjusted.nominal_collateral_ratio()
        );

        let data = self.encode_adjust(
            collateral,
            params,
            params.adjustment.debt,
            hints,
            max_borrowing_rate,
        )?;
        let call = self.contract_call(self.context.addresses.borrower_operations, data);

        let (call, gas_headroom) = match gas_limit {
            Some(_) => self.with_gas(call, gas_limit, 0).await?,
            None if !borrowing => {
                self.with_gas(call, None, self.config().list_traversal_gas)
                    .await?
            }
            None => {
                let decayed_rate = fees
                    .borrowing_rate_at(fees.timestamp() + self.config().decay_tolerance_seconds());
                let decayed = trove.adjust(&effective, decayed_rate)?;

                // The owner's own borrow, excluding what leverage adds on-chain
                let debt_simulating_decay = match trove.adjust_to(&decayed, borrowing_rate).debt {
                    Some(DebtChange::Borrow(amount)) => {
                        let own = amount.saturating_sub(levered.additional_debt);
                        (!own.is_zero()).then_some(DebtChange::Borrow(own))
                    }
                    _ => None,
                };
                let later_data = self.encode_adjust(
                    collateral,
                    params,
                    debt_simulating_decay,
                    hints,
                    max_borrowing_rate,
                )?;
                let later = self.contract_call(self.context.addresses.borrower_operations, later_data);

                let base_rate_update_gas = if fees.recovery_mode() {
                    0
                } else {
                    self.config().decay_tolerance_update_gas()
                };
                self.with_dual_gas(call, later, base_rate_update_gas).await?
            }
        };

        Ok(PopulatedTransaction {
            call,
            gas_headroom,
            parser: self.trove_change_parser(collateral),
        })
    }

    /// Populate `closeTrove`, or `closeTroveUnlever` when `unlever` is not empty
    pub async fn close_trove(
        &self,
        unlever: &BTreeMap<Address, Unlever>,
        gas_limit: Option<u64>,
    ) -> Result<PopulatedTransaction<TroveChangeParser>> {
        for (kind, u) in unlever {
            if u.amount.is_zero() || u.amount.is_infinite() {
                return Err(TroveError::InvalidAmount {
                    what: format!("unlever of {kind}"),
                }
                .into());
            }
            if u.max_slippage > Decimal::ONE {
                return Err(Error::InvalidParams(format!(
                    "max slippage {} for {kind} exceeds 100%",
                    u.max_slippage
                )));
            }
        }

        let collateral = get_collateral_params(self.reader, BlockTag::Latest).await?;
        collateral.require_whitelisted(unlever.keys())?;
        let user = get_trove(self.reader, self.context.sender, &collateral, BlockTag::Latest).await?;
        let trove = user.open_trove()?;

        let data = if unlever.is_empty() {
            IBorrowerOperations::closeTroveCall {}.abi_encode()
        } else {
            let amounts: Collaterals = unlever.iter().map(|(k, u)| (*k, u.amount)).collect();
            for (kind, amount) in &amounts {
                let available = trove.collaterals.get(kind).copied().unwrap_or_default();
                if *amount > available {
                    return Err(TroveError::InsufficientCollateral {
                        kind: *kind,
                        available,
                        requested: *amount,
                    }
                    .into());
                }
            }
            let (colls, raw_amounts) = collateral.encode(&amounts)?;
            let slippages: BTreeMap<Address, U256> =
                unlever.iter().map(|(k, u)| (*k, u.max_slippage.raw())).collect();
            IBorrowerOperations::closeTroveUnleverCall {
                _maxSlippages: collateral.align(&colls, &slippages, U256::ZERO),
                _collsOut: colls,
                _amountsOut: raw_amounts,
            }
            .abi_encode()
        };

        let call = self.contract_call(self.context.addresses.borrower_operations, data);
        let (call, gas_headroom) = self.with_gas(call, gas_limit, 0).await?;
        Ok(PopulatedTransaction {
            call,
            gas_headroom,
            parser: self.trove_change_parser(&collateral),
        })
    }

    fn liquidation_parser(&self, collateral: &CollateralParams) -> LiquidationParser {
        LiquidationParser {
            trove_manager: self.context.addresses.trove_manager,
            decimals: collateral.decimals(),
        }
    }

    /// Populate `batchLiquidateTroves` for `owners`, paying compensation to the sender
    pub async fn liquidate(
        &self,
        owners: &[Address],
        gas_limit: Option<u64>,
    ) -> Result<PopulatedTransaction<LiquidationParser>> {
        if owners.is_empty() {
            return Err(Error::InvalidParams("no Troves to liquidate".into()));
        }
        let collateral = get_collateral_params(self.reader, BlockTag::Latest).await?;
        let data = ITroveManager::batchLiquidateTrovesCall {
            _troveArray: owners.to_vec(),
            _liquidator: self.context.sender,
        }
        .abi_encode();

        let call = self.contract_call(self.context.addresses.trove_manager, data);
        let (call, gas_headroom) = self
            .with_gas(call, gas_limit, self.config().list_traversal_gas)
            .await?;
        Ok(PopulatedTransaction {
            call,
            gas_headroom,
            parser: self.liquidation_parser(&collateral),
        })
    }

    /// Populate `liquidateTroves(n)`: liquidate up to `max_troves` from the tail
    pub async fn liquidate_up_to(
        &self,
        max_troves: u64,
        gas_limit: Option<u64>,
    ) -> Result<PopulatedTransaction<LiquidationParser>> {
        if max_troves == 0 {
            return Err(Error::InvalidParams("no Troves to liquidate".into()));
        }
        let collateral = get_collateral_params(self.reader, BlockTag::Latest).await?;
        let data = ITroveManager::liquidateTrovesCall {
            _n: U256::from(max_troves),
        }
        .abi_encode();

        let call = self.contract_call(self.context.addresses.trove_manager, data);
        let (call, gas_headroom) = self
            .with_gas(call, gas_limit, self.config().list_traversal_gas)
            .await?;
        Ok(PopulatedTransaction {
            call,
            gas_headroom,
            parser: self.liquidation_parser(&collateral),
        })
    }
}
