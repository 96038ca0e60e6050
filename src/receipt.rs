//! Populated and sent transactions, and typed receipt decoding
//!
//! A [`PopulatedTransaction`] carries the parser for its own receipt. Once
//! sent, waiting yields a [`TransactionResult`]: a failed or replaced
//! transaction is a normal outcome, not an error, and a failed receipt is
//! never decoded.

use alloy_primitives::{Address, B256, U256};
use alloy_sol_types::SolEvent;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use trove_math::{Collaterals, Decimal, Trove};

use crate::abi::{IBorrowerOperations, ITroveManager};
use crate::chain::{
    ChainError, ChainWriter, ContractCall, RawReceipt, SubmittedTransaction, TransactionOutcome,
};

/// Decodes the domain details of a successful receipt
pub trait ReceiptParser: Send + Sync {
    type Details: Send;

    fn parse(&self, receipt: &RawReceipt) -> Result<Self::Details, ChainError>;
}

/// An unsigned call ready to be sent
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PopulatedTransaction<P> {
    pub call: ContractCall,
    /// Gas reserved above the current estimate for fee decay and list traversal
    pub gas_headroom: Option<u64>,
    pub parser: P,
}

impl<P: ReceiptParser> PopulatedTransaction<P> {
    pub async fn send<W: ChainWriter + ?Sized>(
        self,
        writer: &W,
    ) -> Result<SentTransaction<P>, ChainError> {
        let submitted = writer.send_transaction(&self.call).await?;
        log::debug!(
            "sent transaction {} from {} with nonce {}",
            submitted.hash,
            submitted.from,
            submitted.nonce
        );
        Ok(SentTransaction {
            submitted,
            parser: self.parser,
        })
    }
}

/// What became of a transaction, with decoded details on success
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransactionResult<D> {
    Pending,
    Failed {
        raw: RawReceipt,
    },
    Succeeded {
        raw: RawReceipt,
        details: D,
    },
    Replaced {
        replacement: RawReceipt,
        cancelled: bool,
    },
}

impl<D> TransactionResult<D> {
    pub fn is_pending(&self) -> bool {
        matches!(self, TransactionResult::Pending)
    }

    pub fn details(&self) -> Option<&D> {
        match self {
            TransactionResult::Succeeded { details, .. } => Some(details),
            _ => None,
        }
    }
}

pub struct SentTransaction<P> {
    submitted: SubmittedTransaction,
    parser: P,
}

impl<P: ReceiptParser> SentTransaction<P> {
    pub fn hash(&self) -> B256 {
        self.submitted.hash
    }

    pub fn submitted(&self) -> &SubmittedTransaction {
        &self.submitted
    }

    /// Current state without waiting
    pub async fn get_receipt<W: ChainWriter + ?Sized>(
        &self,
        writer: &W,
    ) -> Result<TransactionResult<P::Details>, ChainError> {
        self.wait_for_receipt(writer, Duration::ZERO).await
    }

    /// Wait up to `timeout`; still unmined afterwards is [`TransactionResult::Pending`]
    pub async fn wait_for_receipt<W: ChainWriter + ?Sized>(
        &self,
        writer: &W,
        timeout: Duration,
    ) -> Result<TransactionResult<P::Details>, ChainError> {
        let outcome = writer.wait_for_receipt(&self.submitted, timeout).await?;
        self.resolve(outcome)
    }

    pub fn resolve(
        &self,
        outcome: TransactionOutcome,
    ) -> Result<TransactionResult<P::Details>, ChainError> {
        Ok(match outcome {
            TransactionOutcome::Pending => TransactionResult::Pending,
            TransactionOutcome::Mined(raw) if !raw.status => {
                log::debug!("transaction {} reverted", raw.transaction_hash);
                TransactionResult::Failed { raw }
            }
            TransactionOutcome::Mined(raw) => {
                let details = self.parser.parse(&raw)?;
                TransactionResult::Succeeded { raw, details }
            }
            TransactionOutcome::Replaced {
                replacement,
                cancelled,
            } => {
                log::debug!(
                    "transaction {} replaced by {}{}",
                    self.submitted.hash,
                    replacement.transaction_hash,
                    if cancelled { " (cancelled)" } else { "" }
                );
                TransactionResult::Replaced {
                    replacement,
                    cancelled,
                }
            }
        })
    }
}

/// Decode every log of `E` emitted by `emitter`
fn decode_logs<'a, E: SolEvent + 'a>(
    receipt: &'a RawReceipt,
    emitter: Address,
) -> impl Iterator<Item = Result<E, ChainError>> + 'a {
    receipt
        .logs
        .iter()
        .filter(move |log| log.address == emitter && log.topics.first() == Some(&E::SIGNATURE_HASH))
        .map(|log| {
            E::decode_raw_log(log.topics.iter().copied(), &log.data)
                .map_err(|e| ChainError::decode(E::SIGNATURE, e))
        })
}

fn collaterals_from_event(
    decimals: &BTreeMap<Address, u8>,
    tokens: &[Address],
    amounts: &[U256],
) -> Result<Collaterals, ChainError> {
    if tokens.len() != amounts.len() {
        return Err(ChainError::decode(
            "collateral arrays",
            format!("{} tokens but {} amounts", tokens.len(), amounts.len()),
        ));
    }
    let mut collaterals = Collaterals::new();
    for (kind, raw) in tokens.iter().zip(amounts) {
        let digits = decimals.get(kind).ok_or_else(|| {
            ChainError::decode("collateral arrays", format!("unknown collateral {kind}"))
        })?;
        let amount = Decimal::from_units(*raw, *digits)
            .map_err(|e| ChainError::decode("collateral arrays", e))?;
        if !amount.is_zero() {
            *collaterals.entry(*kind).or_default() += amount;
        }
    }
    Ok(collaterals)
}

/// Owner-initiated Trove operations, in event code order
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TroveOperation {
    Open,
    Close,
    Adjust,
}

impl TroveOperation {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Open),
            1 => Some(Self::Close),
            2 => Some(Self::Adjust),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TroveChangeDetails {
    pub owner: Address,
    pub operation: TroveOperation,
    /// The Trove as stored after the change; empty after a close
    pub new_trove: Trove,
    pub fee: Decimal,
}

/// Parses `TroveUpdated` and `YUSDBorrowingFeePaid` for one owner
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TroveChangeParser {
    pub borrower_operations: Address,
    pub owner: Address,
    pub decimals: BTreeMap<Address, u8>,
}

impl ReceiptParser for TroveChangeParser {
    type Details = TroveChangeDetails;

    fn parse(&self, receipt: &RawReceipt) -> Result<TroveChangeDetails, ChainError> {
        let mut updated = None;
        for event in decode_logs::<IBorrowerOperations::TroveUpdated>(receipt, self.borrower_operations) {
            let event = event?;
            if event._borrower == self.owner {
                updated = Some(event);
            }
        }
        let updated = updated.ok_or_else(|| {
            ChainError::NotFound(format!("TroveUpdated event for {}", self.owner))
        })?;
        let operation = TroveOperation::from_code(updated._operation).ok_or_else(|| {
            ChainError::decode(
                IBorrowerOperations::TroveUpdated::SIGNATURE,
                format!("unknown operation {}", updated._operation),
            )
        })?;

        let mut fee = Decimal::ZERO;
        for event in
            decode_logs::<IBorrowerOperations::YUSDBorrowingFeePaid>(receipt, self.borrower_operations)
        {
            let event = event?;
            if event._borrower == self.owner {
                fee += Decimal::from_raw(event._YUSDFee);
            }
        }

        Ok(TroveChangeDetails {
            owner: self.owner,
            operation,
            new_trove: Trove::new(
                collaterals_from_event(&self.decimals, &updated._tokens, &updated._amounts)?,
                Decimal::from_raw(updated._debt),
            ),
            fee,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedemptionDetails {
    pub attempted_amount: Decimal,
    pub actual_amount: Decimal,
    pub fee: Decimal,
    pub collateral_taken: Collaterals,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedemptionParser {
    pub trove_manager: Address,
    pub decimals: BTreeMap<Address, u8>,
}

impl ReceiptParser for RedemptionParser {
    type Details = RedemptionDetails;

    fn parse(&self, receipt: &RawReceipt) -> Result<RedemptionDetails, ChainError> {
        let event = decode_logs::<ITroveManager::Redemption>(receipt, self.trove_manager)
            .next()
            .ok_or_else(|| ChainError::NotFound("Redemption event".into()))??;

        Ok(RedemptionDetails {
            attempted_amount: Decimal::from_raw(event._attemptedYUSDAmount),
            actual_amount: Decimal::from_raw(event._actualYUSDAmount),
            fee: Decimal::from_raw(event._YUSDFee),
            collateral_taken: collaterals_from_event(&self.decimals, &event._tokens, &event._amounts)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiquidationDetails {
    pub liquidated: Vec<Address>,
    pub total_debt: Decimal,
    pub gas_compensation: Decimal,
    pub collateral: Collaterals,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiquidationParser {
    pub trove_manager: Address,
    pub decimals: BTreeMap<Address, u8>,
}

impl ReceiptParser for LiquidationParser {
    type Details = LiquidationDetails;

    fn parse(&self, receipt: &RawReceipt) -> Result<LiquidationDetails, ChainError> {
        let liquidated = decode_logs::<ITroveManager::TroveLiquidated>(receipt, self.trove_manager)
            .map(|event| event.map(|e| e._borrower))
            .collect::<Result<Vec<_>, _>>()?;

        let summary = decode_logs::<ITroveManager::Liquidation>(receipt, self.trove_manager)
            .next()
            .ok_or_else(|| ChainError::NotFound("Liquidation event".into()))??;

        Ok(LiquidationDetails {
            liquidated,
            total_debt: Decimal::from_raw(summary._liquidatedAmount),
            gas_compensation: Decimal::from_raw(summary._totalYUSDGasCompensation),
            collateral: collaterals_from_event(
                &self.decimals,
                &summary._totalCollTokens,
                &summary._totalCollAmounts,
            )?,
        })
    }
}
