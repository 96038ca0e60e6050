//! Client library for a multi-collateral CDP protocol
//!
//! Reads protocol state, builds ready-to-send transactions for Trove
//! operations, redemptions and liquidations, and decodes their receipts. The
//! pure position and fee math lives in [`trove_math`]; this crate adds chain
//! access on top of it.
//!
//! ## Modules
//!
//! - [`chain`]: the read and write capability traits the rest is generic over
//! - [`rpc`]: a JSON-RPC implementation of those traits
//! - [`readable`]: whitelist, Trove, pool and fee reads
//! - [`hints`]: insertion hints for the sorted Trove list
//! - [`populate`]: open, adjust, close and liquidate
//! - [`redeem`]: redemptions, including truncation and continuation
//! - [`receipt`]: sending, waiting and typed receipt decoding
//! - [`store`]: a block-polled snapshot cache
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use trovekit::{Context, ContractAddresses, Populator, RpcChain};
//! use trovekit::trove_math::TroveCreationParams;
//! use alloy_primitives::Address;
//!
//! # async fn run(addresses: ContractAddresses, me: Address, weth: Address) -> trovekit::Result<()> {
//! let chain = RpcChain::new("http://localhost:8545", addresses.clone())?;
//! let context = Context::new(addresses, me);
//! let populator = Populator::new(&chain, &chain, &context);
//!
//! let params = TroveCreationParams {
//!     deposit: [(weth, "3".parse()?)].into_iter().collect(),
//!     borrow: "3000".parse()?,
//! };
//! let tx = populator.open_trove(&params.into(), None, None).await?;
//! let sent = tx.send(&chain).await?;
//! let result = sent.wait_for_receipt(&chain, std::time::Duration::from_secs(60)).await?;
//! println!("{:?}", result.details());
//! # Ok(())
//! # }
//! ```

pub mod abi;
pub mod chain;
pub mod config;
pub mod error;
pub mod hints;
pub mod populate;
pub mod readable;
pub mod receipt;
pub mod redeem;
pub mod rpc;
pub mod store;

pub use trove_math;

pub use chain::{BlockTag, ChainError, ChainReader, ChainWriter, ContractCall, TransactionOutcome};
pub use config::{Context, ContractAddresses, PopulateConfig};
pub use error::{Error, Result};
pub use hints::{HintFinder, HintPair, HintSearchPhase};
pub use populate::{AdjustTroveParams, GasEstimate, OpenTroveParams, Populator, Unlever};
pub use readable::{CollateralInfo, CollateralParams, SystemState};
pub use receipt::{
    LiquidationDetails, PopulatedTransaction, ReceiptParser, RedemptionDetails,
    SentTransaction, TroveChangeDetails, TroveOperation, TransactionResult,
};
pub use redeem::PopulatedRedemption;
pub use rpc::RpcChain;
pub use store::{BlockPolledStore, CachedReader, StoreSnapshot};
