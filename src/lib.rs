// perps-engine: perpetual futures market engine with deferred (next-price and delayed) orders.
// margin and funding math first, then the order lifecycle on top.
// all computation is deterministic; oracle, settings and ledger are injected.
//
// file map (search X.0 for structs, X.1+ for logic):
//   0.x  math.rs: 18-decimal fixed point helpers
//   1.x  types.rs: primitives: MarketKey, AccountId, RoundId, Price, Quote, SignedSize
//   2.x  order.rs: deferred orders, confirmation windows, fill price selection
//   3.x  margin.rs: remaining margin, liquidation margin, leverage, fees
//   4.x  position.rs: position struct and pnl
//   5.x  funding.rs: funding velocity, rate and the cumulative funding sequence
//   6.x  liquidation.rs: liquidation status and payout
//   7.x  config.rs: settings store adapter, MarketParams snapshot and presets
//   8.x  engine/: Market: orders, positions, funding, liquidations, transactions
//   9.0  oracle.rs: round-based price oracle (in-memory for tests and the simulator)
//   9.1  ledger.rs: settlement asset ledger and fee sink (in-memory)
//   11.x events.rs: state transition events for audit
//   12.x market.rs: market state store and open interest aggregates

pub mod math;
pub mod types;

// market modules
pub mod engine;
pub mod events;
pub mod funding;
pub mod liquidation;
pub mod margin;
pub mod market;
pub mod order;
pub mod position;

// integration modules
pub mod config;
pub mod ledger;
pub mod oracle;

// re exports for convenience
pub use config::*;
pub use engine::*;
pub use events::*;
pub use funding::*;
pub use ledger::*;
pub use liquidation::*;
pub use margin::*;
pub use market::*;
pub use oracle::*;
pub use order::*;
pub use position::*;
pub use types::*;
