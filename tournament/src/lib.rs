//! Tournament orchestration for UGI engines: drive single games, run
//! balanced match sets, apply aggregate Elo updates, and pick the next
//! pairing — all behind an injected storage contract.

pub mod driver;
pub mod elo;
pub mod runner;
pub mod scheduler;
pub mod store;
pub mod types;

#[cfg(test)]
mod testutil;

pub use driver::{EnginePort, GameDriver};
pub use elo::{EloUpdater, RatingUpdate, DEFAULT_K_FACTOR};
pub use runner::{Connector, MatchRunner, UgiConnector};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use store::{EngineRow, EngineStore, GameRow, MatchStore, MatchTx, StoreError};
pub use types::{
    Color, EngineSpec, GameOutcome, GameRecord, MatchSet, MatchSetResult, StartingPosition,
    TimeControl,
};
