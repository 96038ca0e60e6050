//! Block-polled store and the cached reader

mod common;

use common::*;
use std::sync::Arc;
use std::time::Duration;
use trovekit::chain::{BlockTag, ChainReader};
use trovekit::readable::{get_collateral_params, get_trove};
use trovekit::trove_math::TroveCreationParams;
use trovekit::{BlockPolledStore, Populator};

const POLL: Duration = Duration::from_millis(10);

fn chain() -> Arc<MockChain> {
    let mock = MockChain::new();
    mock.add_trove(owner(1), MockTrove::open(&[(WETH, "4")], "2000"));
    mock.add_trove(SENDER, MockTrove::open(&[(WETH, "10")], "5000"));
    Arc::new(mock)
}

#[tokio::test(start_paused = true)]
async fn test_initial_snapshot() {
    let mock = chain();
    let store = BlockPolledStore::start(mock.clone(), Some(SENDER), POLL)
        .await
        .unwrap();

    let snapshot = store.snapshot();
    assert_eq!(snapshot.block.number, 100);
    assert_eq!(snapshot.number_of_troves, 2);
    assert_eq!(snapshot.collateral.kinds(), &[WETH, USDC]);
    assert_eq!(snapshot.total().debt, d("1000000"));
    assert!(!snapshot.recovery_mode().unwrap());
    assert_eq!(snapshot.fees().unwrap().borrowing_rate(), d("0.005"));

    let trove = snapshot.trove().unwrap().unwrap();
    assert_eq!(trove.owner, SENDER);
    assert_eq!(trove.trove.debt, d("5000"));
    assert_eq!(trove.trove.collaterals[&WETH], d("10"));

    // Every read after resolving the block is pinned to it
    let reads = mock.update(|s| s.block_reads.clone());
    assert_eq!(reads, vec![BlockTag::Latest]);

    store.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_refresh_on_new_block() {
    let mock = chain();
    let store = BlockPolledStore::start(mock.clone(), None, POLL).await.unwrap();
    let mut updates = store.subscribe();

    mock.update(|s| s.whitelist[0].1.price = d("2500"));
    mock.advance_block(12);
    updates.changed().await.unwrap();

    let snapshot = store.snapshot();
    assert_eq!(snapshot.block.number, 101);
    assert_eq!(snapshot.block.timestamp, T0 + 12);
    assert_eq!(snapshot.collateral.get(&WETH).unwrap().price, d("2500"));
    assert!(snapshot.owner_trove.is_none());
    assert!(mock
        .update(|s| s.block_reads.contains(&BlockTag::Number(101))));

    store.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_same_block_is_not_refetched() {
    let mock = chain();
    let store = BlockPolledStore::start(mock.clone(), None, POLL).await.unwrap();
    let prices_read = mock.update(|s| s.price_reads);

    tokio::time::sleep(POLL * 10).await;

    assert_eq!(mock.update(|s| s.price_reads), prices_read);
    assert!(mock.update(|s| s.block_reads.len()) > 1);
    store.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_poll_keeps_last_snapshot() {
    let mock = chain();
    let store = BlockPolledStore::start(mock.clone(), None, POLL).await.unwrap();

    mock.update(|s| s.fail_block = true);
    mock.advance_block(12);
    tokio::time::sleep(POLL * 5).await;
    assert_eq!(store.snapshot().block.number, 100);

    // Recovers on the next tick
    mock.update(|s| s.fail_block = false);
    let mut updates = store.subscribe();
    updates.changed().await.unwrap();
    assert_eq!(store.snapshot().block.number, 101);

    store.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_cached_reader_serves_latest_from_snapshot() {
    let mock = chain();
    let store = BlockPolledStore::start(mock.clone(), None, POLL).await.unwrap();
    let cached = store.cached_reader(mock.clone());

    // Changed on chain but not yet in a new block
    mock.update(|s| s.whitelist[0].1.price = d("2500"));
    let prices_read = mock.update(|s| s.price_reads);

    let latest = cached.get_price(WETH, BlockTag::Latest).await.unwrap();
    assert_eq!(latest, d("2000").raw());
    assert_eq!(mock.update(|s| s.price_reads), prices_read);

    let pinned = cached.get_price(WETH, BlockTag::Number(100)).await.unwrap();
    assert_eq!(pinned, d("2500").raw());
    assert_eq!(mock.update(|s| s.price_reads), prices_read + 1);

    assert_eq!(
        cached.get_valid_collateral(BlockTag::Latest).await.unwrap(),
        vec![WETH, USDC]
    );
    assert_eq!(cached.get_size(BlockTag::Latest).await.unwrap(), 2);

    store.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_cached_reader_pins_forwarded_reads_to_snapshot_block() {
    let mock = chain();
    let store = BlockPolledStore::start(mock.clone(), Some(SENDER), POLL)
        .await
        .unwrap();
    let cached = store.cached_reader(mock.clone());

    // The chain moves on while the store is stuck at block 100
    mock.update(|s| s.fail_block = true);
    mock.advance_block(12);
    tokio::time::sleep(POLL * 3).await;
    mock.update(|s| s.read_tags.clear());

    let params = get_collateral_params(&cached, BlockTag::Latest).await.unwrap();
    let user = get_trove(&cached, SENDER, &params, BlockTag::Latest).await.unwrap();
    assert_eq!(user.trove.debt, d("5000"));
    assert_eq!(cached.get_size(BlockTag::Latest).await.unwrap(), 2);

    let tags = mock.update(|s| std::mem::take(&mut s.read_tags));
    assert!(!tags.is_empty());
    assert!(tags.iter().all(|tag| *tag == BlockTag::Number(100)));

    // Follows the snapshot once it catches up
    mock.update(|s| s.fail_block = false);
    let mut updates = store.subscribe();
    updates.changed().await.unwrap();
    mock.update(|s| s.read_tags.clear());

    cached.get_first(BlockTag::Latest).await.unwrap();
    assert_eq!(
        mock.update(|s| s.read_tags.clone()),
        vec![BlockTag::Number(101)]
    );

    store.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_populate_through_cached_reader() {
    let mock = chain();
    let store = BlockPolledStore::start(mock.clone(), None, POLL).await.unwrap();
    let cached = store.cached_reader(mock.clone());
    let ctx = context();
    let populator = Populator::new(&cached, &*mock, &ctx);

    let prices_read = mock.update(|s| s.price_reads);
    let params = TroveCreationParams {
        deposit: [(WETH, d("3"))].into_iter().collect(),
        borrow: d("3000"),
    };
    let tx = populator
        .open_trove(&params.into(), None, Some(500_000))
        .await
        .unwrap();
    assert_eq!(tx.call.gas_limit, Some(500_000));
    assert_eq!(mock.update(|s| s.price_reads), prices_read);

    store.stop().await;
}
