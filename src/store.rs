//! Block-polled state cache
//!
//! [`BlockPolledStore`] owns a background task that polls for new blocks and,
//! for each one, reads a complete [`StoreSnapshot`] pinned to that block. The
//! finished snapshot replaces the previous one in a single `watch` send, so
//! readers never observe a half-updated state. A failed refresh keeps the last
//! good snapshot.
//!
//! [`CachedReader`] wraps any [`ChainReader`] and answers
//! [`BlockTag::Latest`] reads covered by the snapshot locally. Other `Latest`
//! reads go to the chain pinned to the snapshot's block, so a Trove read
//! through the cache agrees with the cached totals. Reads pinned to a block
//! always go to the chain as they are.

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use futures::try_join;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use trove_math::{Decimal, Fees, FeesFactory, TotalRedistributed, Trove, TroveWithPendingRedistribution, UserTrove};

use crate::chain::{
    ApproxHint, BlockInfo, BlockTag, ChainError, ChainReader, Pool, RawRedemptionHints,
    RawRewardPerStake,
};
use crate::error::Result;
use crate::readable::{
    get_collateral_params, get_fees_factory, get_number_of_troves, get_pool,
    get_total_redistributed, get_trove_before_redistribution, CollateralParams,
};

/// Commonly read protocol state, consistent as of one block
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreSnapshot {
    pub block: BlockInfo,
    pub collateral: CollateralParams,
    pub active_pool: Trove,
    pub default_pool: Trove,
    pub total_redistributed: TotalRedistributed,
    pub fees_factory: FeesFactory,
    pub number_of_troves: u64,
    /// The watched owner's Trove, if the store was started with one
    pub owner_trove: Option<TroveWithPendingRedistribution>,
}

impl StoreSnapshot {
    pub fn total(&self) -> Trove {
        self.active_pool.add(&self.default_pool)
    }

    pub fn recovery_mode(&self) -> Result<bool> {
        self.collateral.is_recovery_mode(&self.total())
    }

    pub fn fees(&self) -> Result<Fees> {
        Ok(self
            .fees_factory
            .at(self.block.timestamp, self.recovery_mode()?))
    }

    /// The watched owner's Trove with pending redistribution applied
    pub fn trove(&self) -> Option<Result<UserTrove>> {
        self.owner_trove.as_ref().map(|t| {
            t.apply_redistribution(&self.total_redistributed)
                .map_err(Into::into)
        })
    }

    fn pool(&self, pool: Pool) -> &Trove {
        match pool {
            Pool::Active => &self.active_pool,
            Pool::Default => &self.default_pool,
        }
    }
}

/// Read a snapshot with every read pinned to the block `tag` resolves to
pub async fn fetch_snapshot<R: ChainReader + ?Sized>(
    reader: &R,
    owner: Option<Address>,
    tag: BlockTag,
) -> Result<StoreSnapshot> {
    let block = reader.block(tag).await?;
    let pinned = BlockTag::Number(block.number);

    let (collateral, fees_factory, number_of_troves) = try_join!(
        get_collateral_params(reader, pinned),
        get_fees_factory(reader, pinned),
        get_number_of_troves(reader, pinned),
    )?;

    let owner_trove = async {
        match owner {
            Some(owner) => get_trove_before_redistribution(reader, owner, &collateral, pinned)
                .await
                .map(Some),
            None => Ok(None),
        }
    };
    let (active_pool, default_pool, total_redistributed, owner_trove) = try_join!(
        get_pool(reader, Pool::Active, &collateral, pinned),
        get_pool(reader, Pool::Default, &collateral, pinned),
        get_total_redistributed(reader, collateral.kinds(), pinned),
        owner_trove,
    )?;

    Ok(StoreSnapshot {
        block,
        collateral,
        active_pool,
        default_pool,
        total_redistributed,
        fees_factory,
        number_of_troves,
        owner_trove,
    })
}

/// Background refresh of a [`StoreSnapshot`] on every new block
///
/// Stop with [`BlockPolledStore::stop`] to wait for the task to finish;
/// dropping the store aborts it.
pub struct BlockPolledStore {
    snapshots: watch::Receiver<Arc<StoreSnapshot>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl BlockPolledStore {
    /// Read the first snapshot, then keep polling every `poll_interval`
    ///
    /// Fails if the first snapshot can not be read; later failures are
    /// logged and retried on the next tick.
    pub async fn start<R>(
        reader: Arc<R>,
        owner: Option<Address>,
        poll_interval: Duration,
    ) -> Result<Self>
    where
        R: ChainReader + ?Sized + 'static,
    {
        let initial = fetch_snapshot(&*reader, owner, BlockTag::Latest).await?;
        log::debug!("store started at block {}", initial.block.number);

        let (sender, snapshots) = watch::channel(Arc::new(initial));
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(poll_blocks(reader, owner, poll_interval, sender, shutdown_rx));

        Ok(BlockPolledStore {
            snapshots,
            shutdown: Some(shutdown),
            task: Some(task),
        })
    }

    /// The latest complete snapshot
    pub fn snapshot(&self) -> Arc<StoreSnapshot> {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified on every refresh
    pub fn subscribe(&self) -> watch::Receiver<Arc<StoreSnapshot>> {
        self.snapshots.clone()
    }

    /// A reader that serves `Latest` reads from this store
    pub fn cached_reader<R: ChainReader + ?Sized>(&self, inner: Arc<R>) -> CachedReader<R> {
        CachedReader {
            inner,
            snapshots: self.subscribe(),
        }
    }

    /// Signal the polling task and wait for it to exit
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::warn!("store task ended abnormally: {}", e);
            }
        }
        log::debug!("store stopped");
    }
}

impl Drop for BlockPolledStore {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn poll_blocks<R: ChainReader + ?Sized>(
    reader: Arc<R>,
    owner: Option<Address>,
    poll_interval: Duration,
    sender: watch::Sender<Arc<StoreSnapshot>>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_block = sender.borrow().block.number;

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {}
        }

        let block = match reader.block(BlockTag::Latest).await {
            Ok(block) => block,
            Err(e) => {
                log::warn!("failed to poll for a new block: {}", e);
                continue;
            }
        };
        if block.number <= last_block {
            continue;
        }

        match fetch_snapshot(&*reader, owner, BlockTag::Number(block.number)).await {
            Ok(snapshot) => {
                last_block = snapshot.block.number;
                sender.send_replace(Arc::new(snapshot));
                log::trace!("store refreshed at block {}", last_block);
            }
            Err(e) => log::warn!("failed to refresh store at block {}: {}", block.number, e),
        }
    }
}

/// [`ChainReader`] serving `Latest` reads from a [`BlockPolledStore`]
pub struct CachedReader<R: ?Sized> {
    snapshots: watch::Receiver<Arc<StoreSnapshot>>,
    inner: Arc<R>,
}

impl<R: ?Sized> CachedReader<R> {
    fn cached(&self, tag: BlockTag) -> Option<Arc<StoreSnapshot>> {
        match tag {
            BlockTag::Latest => Some(self.snapshots.borrow().clone()),
            BlockTag::Number(_) => None,
        }
    }

    /// `Latest` resolved to the snapshot's block for reads sent to the chain
    fn pin(&self, tag: BlockTag) -> BlockTag {
        match tag {
            BlockTag::Latest => BlockTag::Number(self.snapshots.borrow().block.number),
            pinned => pinned,
        }
    }
}

#[async_trait]
impl<R: ChainReader + ?Sized> ChainReader for CachedReader<R> {
    async fn block(&self, tag: BlockTag) -> Result<BlockInfo, ChainError> {
        match self.cached(tag) {
            Some(s) => Ok(s.block),
            None => self.inner.block(self.pin(tag)).await,
        }
    }

    async fn get_trove_status(&self, owner: Address, tag: BlockTag) -> Result<u8, ChainError> {
        self.inner.get_trove_status(owner, self.pin(tag)).await
    }

    async fn get_trove_debt(&self, owner: Address, tag: BlockTag) -> Result<U256, ChainError> {
        self.inner.get_trove_debt(owner, self.pin(tag)).await
    }

    async fn get_trove_colls(
        &self,
        owner: Address,
        tag: BlockTag,
    ) -> Result<Vec<(Address, U256)>, ChainError> {
        self.inner.get_trove_colls(owner, self.pin(tag)).await
    }

    async fn get_trove_stake(
        &self,
        owner: Address,
        kind: Address,
        tag: BlockTag,
    ) -> Result<U256, ChainError> {
        self.inner.get_trove_stake(owner, kind, self.pin(tag)).await
    }

    async fn get_reward_snapshot(
        &self,
        owner: Address,
        kind: Address,
        tag: BlockTag,
    ) -> Result<RawRewardPerStake, ChainError> {
        self.inner.get_reward_snapshot(owner, kind, self.pin(tag)).await
    }

    async fn get_total_redistributed(
        &self,
        kind: Address,
        tag: BlockTag,
    ) -> Result<RawRewardPerStake, ChainError> {
        if let Some(total) = self
            .cached(tag)
            .and_then(|s| s.total_redistributed.get(&kind).copied())
        {
            return Ok(RawRewardPerStake {
                collateral: total.collateral.raw(),
                debt: total.debt.raw(),
            });
        }
        self.inner.get_total_redistributed(kind, self.pin(tag)).await
    }

    async fn get_trove_owners_count(&self, tag: BlockTag) -> Result<u64, ChainError> {
        match self.cached(tag) {
            Some(s) => Ok(s.number_of_troves),
            None => self.inner.get_trove_owners_count(self.pin(tag)).await,
        }
    }

    async fn base_rate(&self, tag: BlockTag) -> Result<U256, ChainError> {
        match self.cached(tag) {
            Some(s) => Ok(s.fees_factory.base_rate_without_decay.raw()),
            None => self.inner.base_rate(self.pin(tag)).await,
        }
    }

    async fn last_fee_operation_time(&self, tag: BlockTag) -> Result<u64, ChainError> {
        match self.cached(tag) {
            Some(s) => Ok(s.fees_factory.last_fee_operation_time),
            None => self.inner.last_fee_operation_time(self.pin(tag)).await,
        }
    }

    async fn get_pool_debt(&self, pool: Pool, tag: BlockTag) -> Result<U256, ChainError> {
        match self.cached(tag) {
            Some(s) => Ok(s.pool(pool).debt.raw()),
            None => self.inner.get_pool_debt(pool, self.pin(tag)).await,
        }
    }

    async fn get_pool_collateral(
        &self,
        pool: Pool,
        kind: Address,
        tag: BlockTag,
    ) -> Result<U256, ChainError> {
        if let Some(s) = self.cached(tag) {
            if s.collateral.get(&kind).is_some() {
                let amount = s
                    .pool(pool)
                    .collaterals
                    .get(&kind)
                    .copied()
                    .unwrap_or(Decimal::ZERO);
                return s
                    .collateral
                    .to_units(kind, amount)
                    .map_err(|e| ChainError::decode("pool collateral", e));
            }
        }
        self.inner.get_pool_collateral(pool, kind, self.pin(tag)).await
    }

    async fn get_valid_collateral(&self, tag: BlockTag) -> Result<Vec<Address>, ChainError> {
        match self.cached(tag) {
            Some(s) => Ok(s.collateral.kinds().to_vec()),
            None => self.inner.get_valid_collateral(self.pin(tag)).await,
        }
    }

    async fn get_price(&self, kind: Address, tag: BlockTag) -> Result<U256, ChainError> {
        match self.cached(tag).and_then(|s| s.collateral.get(&kind).copied()) {
            Some(info) => Ok(info.price.raw()),
            None => self.inner.get_price(kind, self.pin(tag)).await,
        }
    }

    async fn get_decimals(&self, kind: Address, tag: BlockTag) -> Result<u8, ChainError> {
        match self.cached(tag).and_then(|s| s.collateral.get(&kind).copied()) {
            Some(info) => Ok(info.decimals),
            None => self.inner.get_decimals(kind, self.pin(tag)).await,
        }
    }

    async fn get_safety_ratio(&self, kind: Address, tag: BlockTag) -> Result<U256, ChainError> {
        match self.cached(tag).and_then(|s| s.collateral.get(&kind).copied()) {
            Some(info) => Ok(info.safety_ratio.raw()),
            None => self.inner.get_safety_ratio(kind, self.pin(tag)).await,
        }
    }

    async fn get_recovery_ratio(&self, kind: Address, tag: BlockTag) -> Result<U256, ChainError> {
        match self.cached(tag).and_then(|s| s.collateral.get(&kind).copied()) {
            Some(info) => Ok(info.recovery_ratio.raw()),
            None => self.inner.get_recovery_ratio(kind, self.pin(tag)).await,
        }
    }

    async fn is_wrapped(&self, kind: Address, tag: BlockTag) -> Result<bool, ChainError> {
        match self.cached(tag).and_then(|s| s.collateral.get(&kind).copied()) {
            Some(info) => Ok(info.wrapped),
            None => self.inner.is_wrapped(kind, self.pin(tag)).await,
        }
    }

    async fn get_first(&self, tag: BlockTag) -> Result<Address, ChainError> {
        self.inner.get_first(self.pin(tag)).await
    }

    async fn get_last(&self, tag: BlockTag) -> Result<Address, ChainError> {
        self.inner.get_last(self.pin(tag)).await
    }

    async fn get_size(&self, tag: BlockTag) -> Result<u64, ChainError> {
        self.inner.get_size(self.pin(tag)).await
    }

    async fn get_next(&self, id: Address, tag: BlockTag) -> Result<Address, ChainError> {
        self.inner.get_next(id, self.pin(tag)).await
    }

    async fn get_prev(&self, id: Address, tag: BlockTag) -> Result<Address, ChainError> {
        self.inner.get_prev(id, self.pin(tag)).await
    }

    async fn find_insert_position(
        &self,
        nicr: U256,
        prev_id: Address,
        next_id: Address,
        tag: BlockTag,
    ) -> Result<(Address, Address), ChainError> {
        self.inner.find_insert_position(nicr, prev_id, next_id, self.pin(tag)).await
    }

    async fn get_approx_hint(
        &self,
        nicr: U256,
        num_trials: u64,
        random_seed: U256,
        tag: BlockTag,
    ) -> Result<ApproxHint, ChainError> {
        self.inner
            .get_approx_hint(nicr, num_trials, random_seed, self.pin(tag))
            .await
    }

    async fn get_redemption_hints(
        &self,
        amount: U256,
        max_iterations: u64,
        tag: BlockTag,
    ) -> Result<RawRedemptionHints, ChainError> {
        self.inner
            .get_redemption_hints(amount, max_iterations, self.pin(tag))
            .await
    }
}
