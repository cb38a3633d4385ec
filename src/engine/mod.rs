// 8.0: market engine. one Market per asset runs the deferred order lifecycle, margin transfers,
// funding recomputation and liquidations on top of the injected oracle, settings and ledger.
// deterministic: the clock is set by the caller and nothing here does I/O.

mod config;
mod core;
mod funding;
mod liquidations;
mod orders;
mod positions;
mod results;
mod shared;
mod transaction;

pub use self::core::Market;
pub use config::EngineConfig;
pub use results::{
    CancelResult, EngineError, ErrorKind, ExecutionResult, FundingResult, LiquidationResult, SubmitResult,
};
pub use shared::SharedMarket;
pub use transaction::MarketTransaction;
