// collateral-core: collateral ledger for a trading node.
// every unit of an asset sits in exactly one account; value only moves through
// balanced waterfall transfers, so the per-asset total never changes except
// through deposits, withdrawals and checkpoint restores.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: PartyId, MarketId, AssetId, Amount, Timestamp, Context
//   2.x  account.rs: account types, deterministic account ids
//   3.x  store.rs: ordered account store, credit/debit
//   4.x  transfer.rs: transfer instructions, requests, ledger movements
//   5.x  ledger.rs: the waterfall
//   5.5  distributor.rs: pro-rata loss socialization
//   6.x  state.rs: ledger state, state hash, snapshot codec
//   6.5  checkpoint.rs: compact cross-version checkpoint payload
//   7.x  events.rs, clock.rs: event sink, time source
//   8.x  engine/: settlement, margin, fees, rewards, custody, market close
//   10.x config.rs: engine settings, log level

pub mod account;
pub mod checkpoint;
pub mod clock;
pub mod config;
pub mod distributor;
pub mod engine;
pub mod events;
pub mod ledger;
pub mod state;
pub mod store;
pub mod transfer;
pub mod types;

// re exports for convenience
pub use account::*;
pub use checkpoint::{Checkpoint, CheckpointBalance};
pub use clock::*;
pub use config::{ConfigError, EngineConfig, LogLevel};
pub use distributor::{Distribution, LossDistributor, WinRequest};
pub use engine::*;
pub use events::*;
pub use state::*;
pub use store::*;
pub use transfer::*;
pub use types::*;
