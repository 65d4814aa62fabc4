// 8.0: collateral engine. coordinates settlement, margin moves, fees, rewards,
// custody and market close on top of the account store.
// deterministic: the only inputs are the call arguments, the clock and the live config.

mod checkpoint;
mod config;
mod core;
mod custody;
mod fees;
mod margin;
mod market;
mod requests;
mod results;
mod settlement;

pub use config::LiveConfig;
pub use core::Engine;
pub use results::{EngineError, FatalError, MarginStatus, MarginUpdateResult, SettlementResult};
