//! Redemptions, truncation and continuation

mod common;

use alloy_primitives::{Address, U256};
use alloy_sol_types::SolCall;
use common::*;
use trovekit::abi::ITroveManager;
use trovekit::chain::RawRedemptionHints;
use trovekit::trove_math::constants::MINIMUM_NET_DEBT;
use trovekit::trove_math::TroveError;
use trovekit::{Error, Populator};

fn ladder() -> MockChain {
    let mock = MockChain::new();
    for i in 1..=20u8 {
        mock.add_trove(owner(i), MockTrove::open(&[(WETH, &i.to_string())], "2000"));
    }
    mock
}

fn script_hints(mock: &MockChain, truncated: &str, partial_nicr: &str) {
    mock.update(|s| {
        s.redemption_hints = RawRedemptionHints {
            first_redemption_hint: owner(1),
            partial_redemption_hint_nicr: d(partial_nicr).raw(),
            truncated_amount: d(truncated).raw(),
        }
    });
}

fn decode(data: &[u8]) -> ITroveManager::redeemCollateralCall {
    ITroveManager::redeemCollateralCall::abi_decode(data).unwrap()
}

#[tokio::test]
async fn test_truncated_redemption() {
    let mock = ladder();
    script_hints(&mock, "4200", "0.125");
    let ctx = context();
    let populator = Populator::new(&mock, &mock, &ctx);

    let redemption = populator.redeem(d("5000"), None, None).await.unwrap();
    assert_eq!(redemption.attempted_amount, d("5000"));
    assert_eq!(redemption.redeemable_amount, d("4200"));
    assert!(redemption.is_truncated);
    assert_eq!(redemption.continuation_amount(), Some(d("6000")));

    let call = decode(&redemption.tx.call.data);
    assert_eq!(call._YUSDAmount, d("4200").raw());
    assert_eq!(call._firstRedemptionHint, owner(1));
    assert_eq!(call._partialRedemptionHintNICR, d("0.125").raw());
    // 0.125 falls between 0.15 and 0.10
    assert_eq!(call._upperPartialRedemptionHint, owner(3));
    assert_eq!(call._lowerPartialRedemptionHint, owner(2));
    assert_eq!(call._maxIterations, U256::from(70));
    // floor 0.5% + 4200 / 1M / 2 + 0.1% slippage
    assert_eq!(call._maxFeePercentage, d("0.0081").raw());

    assert_eq!(redemption.tx.call.to, addresses().trove_manager);
    assert_eq!(redemption.tx.call.gas_limit, Some(300_000 + 15_656));
    assert_eq!(redemption.tx.gas_headroom, Some(15_656));

    let asked = mock.update(|s| s.redemption_hint_calls.clone());
    assert_eq!(asked, vec![(d("5000").raw(), 70)]);
}

#[tokio::test]
async fn test_continuation_adds_minimum_net_debt() {
    let mock = ladder();
    script_hints(&mock, "4200", "0.125");
    let ctx = context();
    let populator = Populator::new(&mock, &mock, &ctx);

    let first = populator
        .redeem(d("5000"), Some(d("0.02")), None)
        .await
        .unwrap();

    script_hints(&mock, "6000", "0.125");
    let next = first
        .increase_amount_by_minimum_net_debt(&populator, None)
        .await
        .unwrap();

    assert_eq!(next.attempted_amount, d("4200") + MINIMUM_NET_DEBT);
    assert!(!next.is_truncated);
    // The first call's pinned max rate carries over
    assert_eq!(decode(&next.tx.call.data)._maxFeePercentage, d("0.02").raw());

    let asked = mock.update(|s| s.redemption_hint_calls.clone());
    assert_eq!(asked[1].0, d("6000").raw());
}

#[tokio::test]
async fn test_continuation_of_full_redemption_is_refused() {
    let mock = ladder();
    script_hints(&mock, "5000", "0");
    let ctx = context();
    let populator = Populator::new(&mock, &mock, &ctx);

    let redemption = populator.redeem(d("5000"), None, None).await.unwrap();
    assert!(!redemption.is_truncated);
    assert_eq!(redemption.continuation_amount(), None);

    let err = redemption
        .increase_amount_by_minimum_net_debt(&populator, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RedemptionNotTruncated));
}

#[tokio::test]
async fn test_no_partial_redemption_needs_no_hints() {
    let mock = ladder();
    script_hints(&mock, "5000", "0");
    let ctx = context();
    let populator = Populator::new(&mock, &mock, &ctx);

    let redemption = populator.redeem(d("5000"), None, None).await.unwrap();
    let call = decode(&redemption.tx.call.data);
    assert_eq!(call._upperPartialRedemptionHint, Address::ZERO);
    assert_eq!(call._lowerPartialRedemptionHint, Address::ZERO);
    assert!(mock.approx_calls().is_empty());
}

#[tokio::test]
async fn test_redemption_too_low() {
    let mock = ladder();
    script_hints(&mock, "0", "0");
    let ctx = context();
    let populator = Populator::new(&mock, &mock, &ctx);

    let err = populator.redeem(d("100"), None, None).await.unwrap_err();
    assert!(matches!(err, Error::RedemptionAmountTooLow { minimum } if minimum == MINIMUM_NET_DEBT));
    assert!(mock.estimates().is_empty());
}

#[tokio::test]
async fn test_zero_redemption_is_invalid() {
    let mock = ladder();
    let ctx = context();
    let populator = Populator::new(&mock, &mock, &ctx);

    let err = populator
        .redeem(d("0"), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Trove(TroveError::InvalidAmount { .. })));
    assert!(mock.update(|s| s.redemption_hint_calls.is_empty()));
}
