//! Trove liquidation keeper
//!
//! Polls the riskiest end of the sorted Trove list, scores each Trove's health
//! against the live prices and liquidates those that fell below their threshold.

mod config;
mod health;
mod priority_queue;
mod tx_builder;

use anyhow::{Context as _, Result};
use config::Config;
use priority_queue::HealthQueue;
use std::time::Duration;
use tokio::time;
use trovekit::chain::{BlockTag, ChainReader, ChainWriter};
use trovekit::readable::get_system_state;
use trovekit::{Context, RpcChain, TransactionResult};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting Trove liquidation keeper");

    let config = Config::load().context("Failed to load keeper config")?;
    let chain = RpcChain::new(&config.rpc_url, config.contracts.clone())
        .context("Failed to create RPC client")?;
    let context = config.context();

    log::info!("Connected to RPC: {}", config.rpc_url);
    log::info!("Monitoring TroveManager: {}", config.contracts.trove_manager);
    log::info!("Keeper account: {}", config.keeper);

    let mut queue = HealthQueue::new();
    let mut interval = time::interval(Duration::from_secs(config.poll_interval_secs));

    loop {
        interval.tick().await;

        if let Err(e) = process_liquidations(&mut queue, &chain, &config, &context).await {
            log::error!("Error processing liquidations: {:#}", e);
        }

        if let Some(worst) = queue.peek() {
            log::debug!(
                "Health queue size: {}, worst: {} at {}",
                queue.len(),
                worst.owner,
                worst.health
            );
        }
    }
}

/// Refresh the queue, then liquidate everything below health one
async fn process_liquidations<C: ChainReader + ChainWriter>(
    queue: &mut HealthQueue,
    chain: &C,
    config: &Config,
    context: &Context,
) -> Result<()> {
    update_health_queue(queue, chain, config).await?;

    let liquidatable = queue.get_liquidatable(config.scan_depth);
    if liquidatable.is_empty() {
        log::debug!("No Troves need liquidation");
        return Ok(());
    }
    log::info!("Found {} Troves needing liquidation", liquidatable.len());
    for trove in &liquidatable {
        log::info!(
            "Liquidating {} (health: {}, debt: {})",
            trove.owner,
            trove.health,
            trove.debt
        );
    }

    let owners: Vec<_> = liquidatable.iter().map(|t| t.owner).collect();
    let timeout = Duration::from_secs(config.receipt_timeout_secs);

    for batch in tx_builder::batches(&owners, config.max_liquidations_per_batch) {
        match tx_builder::liquidate(chain, chain, context, &batch, timeout).await {
            Ok(TransactionResult::Succeeded { details, .. }) => {
                log::info!(
                    "Liquidated {} Troves, debt {}, compensation {}",
                    details.liquidated.len(),
                    details.total_debt,
                    details.gas_compensation
                );
                for owner in &details.liquidated {
                    queue.remove(owner);
                }
            }
            Ok(TransactionResult::Failed { raw }) => {
                log::error!("Liquidation {} reverted", raw.transaction_hash);
            }
            Ok(TransactionResult::Replaced { replacement, cancelled }) => {
                log::warn!(
                    "Liquidation replaced by {} (cancelled: {})",
                    replacement.transaction_hash,
                    cancelled
                );
            }
            Ok(TransactionResult::Pending) => {
                log::warn!("Liquidation still pending after {:?}", timeout);
            }
            Err(e) => {
                log::error!("Failed to liquidate batch of {}: {:#}", batch.len(), e);
            }
        }
    }

    Ok(())
}

/// Score the tail of the sorted list at the latest block
async fn update_health_queue<R: ChainReader + ?Sized>(
    queue: &mut HealthQueue,
    reader: &R,
    config: &Config,
) -> Result<()> {
    let state = get_system_state(reader, BlockTag::Latest)
        .await
        .context("Failed to read system state")?;
    let tag = BlockTag::Number(state.block.number);
    let recovery_mode = state.recovery_mode()?;
    if recovery_mode {
        log::warn!("System is in recovery mode at block {}", state.block.number);
    }

    let owners = health::scan_tail(reader, config.scan_depth, tag)
        .await
        .context("Failed to walk sorted Troves")?;
    let scored = health::assess_troves(
        reader,
        &state.collateral,
        &owners,
        recovery_mode,
        state.block.number,
    )
    .await
    .context("Failed to read Troves")?;

    queue.retain_owners(&owners);
    for trove in scored {
        log::trace!(
            "Trove {} health {} (CR {})",
            trove.owner,
            trove.health,
            trove.collateral_ratio
        );
        queue.push(trove);
    }

    log::debug!(
        "Health queue updated at block {}: {} Troves tracked",
        state.block.number,
        queue.len()
    );
    Ok(())
}
