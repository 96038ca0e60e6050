//! Sending, waiting and receipt decoding

mod common;

use alloy_primitives::{Address, Bytes, U256};
use common::*;
use std::collections::BTreeMap;
use std::time::Duration;
use trovekit::abi::{IBorrowerOperations, ITroveManager};
use trovekit::chain::{ChainError, ContractCall, RawLog, TransactionOutcome};
use trovekit::receipt::{LiquidationParser, RedemptionParser, TroveChangeParser};
use trovekit::trove_math::Decimal;
use trovekit::{PopulatedTransaction, TransactionResult, TroveOperation};

const TIMEOUT: Duration = Duration::from_secs(5);

fn decimals() -> BTreeMap<Address, u8> {
    BTreeMap::from([(WETH, 18), (USDC, 6)])
}

fn call() -> ContractCall {
    ContractCall {
        from: SENDER,
        to: addresses().borrower_operations,
        data: Bytes::from_static(&[1, 2, 3, 4]),
        value: U256::ZERO,
        gas_limit: Some(500_000),
    }
}

fn trove_change_tx() -> PopulatedTransaction<TroveChangeParser> {
    PopulatedTransaction {
        call: call(),
        gas_headroom: None,
        parser: TroveChangeParser {
            borrower_operations: addresses().borrower_operations,
            owner: SENDER,
            decimals: decimals(),
        },
    }
}

fn trove_updated(borrower: Address, debt: &str, operation: u8) -> IBorrowerOperations::TroveUpdated {
    IBorrowerOperations::TroveUpdated {
        _borrower: borrower,
        _debt: d(debt).raw(),
        _tokens: vec![WETH, USDC],
        _amounts: vec![d("3").raw(), U256::from(1_000_000_000u64)],
        _operation: operation,
    }
}

#[tokio::test]
async fn test_succeeded_trove_change_is_decoded() {
    let mock = MockChain::new();
    let ops = addresses().borrower_operations;
    mock.push_outcome(TransactionOutcome::Mined(receipt(
        true,
        vec![
            log(ops, &trove_updated(owner(1), "9999", 2)),
            log(
                ops,
                &IBorrowerOperations::YUSDBorrowingFeePaid {
                    _borrower: SENDER,
                    _YUSDFee: d("15").raw(),
                },
            ),
            log(ops, &trove_updated(SENDER, "3215", 0)),
            // Same event from an unrelated contract
            log(Address::repeat_byte(0x77), &trove_updated(SENDER, "1", 2)),
        ],
    )));

    let sent = trove_change_tx().send(&mock).await.unwrap();
    let result = sent.wait_for_receipt(&mock, TIMEOUT).await.unwrap();

    let details = result.details().unwrap();
    assert_eq!(details.owner, SENDER);
    assert_eq!(details.operation, TroveOperation::Open);
    assert_eq!(details.fee, d("15"));
    assert_eq!(details.new_trove.debt, d("3215"));
    assert_eq!(details.new_trove.collaterals[&WETH], d("3"));
    assert_eq!(details.new_trove.collaterals[&USDC], d("1000"));
}

#[tokio::test]
async fn test_failed_receipt_is_not_decoded() {
    let mock = MockChain::new();
    // Would not decode: right topic, truncated data
    let broken = RawLog {
        address: addresses().borrower_operations,
        topics: log(addresses().borrower_operations, &trove_updated(SENDER, "1", 0)).topics,
        data: Bytes::from_static(&[0xde, 0xad]),
    };
    mock.push_outcome(TransactionOutcome::Mined(receipt(false, vec![broken])));

    let sent = trove_change_tx().send(&mock).await.unwrap();
    let result = sent.wait_for_receipt(&mock, TIMEOUT).await.unwrap();
    assert!(matches!(result, TransactionResult::Failed { raw } if !raw.status));
}

#[tokio::test]
async fn test_missing_event_is_an_error() {
    let mock = MockChain::new();
    mock.push_outcome(TransactionOutcome::Mined(receipt(true, Vec::new())));

    let sent = trove_change_tx().send(&mock).await.unwrap();
    let err = sent.wait_for_receipt(&mock, TIMEOUT).await.unwrap_err();
    assert!(matches!(err, ChainError::NotFound(_)));
}

#[tokio::test]
async fn test_pending_and_replaced() {
    let mock = MockChain::new();
    let sent = trove_change_tx().send(&mock).await.unwrap();

    assert!(sent.get_receipt(&mock).await.unwrap().is_pending());

    let replacement = receipt(true, Vec::new());
    mock.push_outcome(TransactionOutcome::Replaced {
        replacement: replacement.clone(),
        cancelled: true,
    });
    match sent.get_receipt(&mock).await.unwrap() {
        TransactionResult::Replaced {
            replacement: got,
            cancelled,
        } => {
            assert_eq!(got, replacement);
            assert!(cancelled);
        }
        other => panic!("expected a replacement, got {other:?}"),
    }
}

#[tokio::test]
async fn test_redemption_details() {
    let mock = MockChain::new();
    let manager = addresses().trove_manager;
    mock.push_outcome(TransactionOutcome::Mined(receipt(
        true,
        vec![log(
            manager,
            &ITroveManager::Redemption {
                _attemptedYUSDAmount: d("5000").raw(),
                _actualYUSDAmount: d("4200").raw(),
                _YUSDFee: d("0.5").raw(),
                _tokens: vec![WETH],
                _amounts: vec![d("2.1").raw()],
            },
        )],
    )));

    let tx = PopulatedTransaction {
        call: call(),
        gas_headroom: None,
        parser: RedemptionParser {
            trove_manager: manager,
            decimals: decimals(),
        },
    };
    let sent = tx.send(&mock).await.unwrap();
    let result = sent.wait_for_receipt(&mock, TIMEOUT).await.unwrap();
    let details = result.details().unwrap();
    assert_eq!(details.attempted_amount, d("5000"));
    assert_eq!(details.actual_amount, d("4200"));
    assert_eq!(details.fee, d("0.5"));
    assert_eq!(details.collateral_taken[&WETH], d("2.1"));
}

#[tokio::test]
async fn test_liquidation_details() {
    let mock = MockChain::new();
    let manager = addresses().trove_manager;
    let liquidated = |borrower| {
        log(
            manager,
            &ITroveManager::TroveLiquidated {
                _borrower: borrower,
                _debt: d("2100").raw(),
                _operation: 3,
            },
        )
    };
    mock.push_outcome(TransactionOutcome::Mined(receipt(
        true,
        vec![
            liquidated(owner(1)),
            liquidated(owner(2)),
            log(
                manager,
                &ITroveManager::Liquidation {
                    _liquidatedAmount: d("4200").raw(),
                    _totalYUSDGasCompensation: d("400").raw(),
                    _totalCollTokens: vec![WETH, USDC],
                    _totalCollAmounts: vec![d("3").raw(), U256::ZERO],
                },
            ),
        ],
    )));

    let tx = PopulatedTransaction {
        call: call(),
        gas_headroom: None,
        parser: LiquidationParser {
            trove_manager: manager,
            decimals: decimals(),
        },
    };
    let result = tx
        .send(&mock)
        .await
        .unwrap()
        .wait_for_receipt(&mock, TIMEOUT)
        .await
        .unwrap();
    let details = result.details().unwrap();
    assert_eq!(details.liquidated, vec![owner(1), owner(2)]);
    assert_eq!(details.total_debt, d("4200"));
    assert_eq!(details.gas_compensation, d("400"));
    assert_eq!(details.collateral.len(), 1);
    assert_eq!(details.collateral.get(&USDC), None::<&Decimal>);
}
