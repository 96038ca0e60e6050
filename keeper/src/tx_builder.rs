//! Liquidation transactions

use alloy_primitives::Address;
use std::time::Duration;
use trovekit::chain::{ChainReader, ChainWriter};
use trovekit::{Context, LiquidationDetails, Populator, TransactionResult};

/// Split `owners` into batches of at most `max` for `batchLiquidateTroves`
pub fn batches(owners: &[Address], max: usize) -> Vec<Vec<Address>> {
    if max == 0 {
        return Vec::new();
    }
    owners.chunks(max).map(<[Address]>::to_vec).collect()
}

/// Populate, send and wait for one batch liquidation
pub async fn liquidate<R, W>(
    reader: &R,
    writer: &W,
    context: &Context,
    owners: &[Address],
    timeout: Duration,
) -> anyhow::Result<TransactionResult<LiquidationDetails>>
where
    R: ChainReader + ?Sized,
    W: ChainWriter + ?Sized,
{
    let populator = Populator::new(reader, writer, context);
    let tx = populator.liquidate(owners, None).await?;
    log::debug!(
        "Populated liquidation of {} Troves (gas limit {:?})",
        owners.len(),
        tx.call.gas_limit
    );

    let sent = tx.send(writer).await?;
    log::info!("Liquidation submitted: {}", sent.hash());

    Ok(sent.wait_for_receipt(writer, timeout).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batches() {
        let owners: Vec<_> = (1..=7).map(Address::with_last_byte).collect();

        let split = batches(&owners, 3);
        assert_eq!(split.len(), 3);
        assert_eq!(split[0], owners[..3]);
        assert_eq!(split[2], vec![Address::with_last_byte(7)]);

        assert_eq!(batches(&owners, 10), vec![owners.clone()]);
        assert!(batches(&[], 3).is_empty());
        assert!(batches(&owners, 0).is_empty());
    }
}
