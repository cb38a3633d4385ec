//! Perpetual futures market simulation.
//!
//! Walks one sETH market through the deferred order lifecycle: submit,
//! execute at the next price, cancel, keeper clean-up, funding and
//! liquidation. Set `RUST_LOG=debug` to see every staged event.

use perps_engine::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const ASSET: &str = "sETH";

struct Sim {
    market: Market,
    oracle: Arc<InMemoryOracle>,
    ledger: Arc<InMemoryLedger>,
}

impl Sim {
    fn new(params: MarketParams) -> Self {
        let key = MarketKey::new("sETH-PERP");
        let oracle = Arc::new(InMemoryOracle::new());
        let settings = Arc::new(InMemorySettings::with_params(&key, &params));
        let ledger = Arc::new(InMemoryLedger::new());
        // the market clock starts at the first observation: wall-clock now
        oracle.push_price(ASSET, dec!(200), Timestamp::now());

        let market = Market::new(key, ASSET, oracle.clone(), settings, ledger.clone(), EngineConfig::default())
            .unwrap();
        Self { market, oracle, ledger }
    }

    fn price(&self, price: Decimal) -> RoundId {
        self.oracle.push_price(ASSET, price, self.market.time())
    }

    fn deposit(&mut self, account: AccountId, amount: Decimal) {
        self.ledger.credit(account, Quote::new(amount));
        self.market.transfer_margin(account, Quote::new(amount)).unwrap();
    }

    fn margin(&self, account: AccountId) -> Quote {
        self.market.position(account).map(|p| p.margin).unwrap_or_default()
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    println!("Perpetual Futures Market Simulation");
    println!("Single Market, Deferred Orders, Full Lifecycle\n");

    scenario_1_submit_and_execute();
    scenario_2_withdraw_then_cancel();
    scenario_3_keeper_cleanup();
    scenario_4_skew_consistency();
    scenario_5_funding();
    scenario_6_liquidation();

    println!("\nAll simulations completed successfully.");
}

/// Next-price order filled after the price moves.
fn scenario_1_submit_and_execute() {
    println!("Scenario 1: Submit And Execute\n");

    let alice = AccountId(1);
    let mut sim = Sim::new(MarketParams::default());
    sim.deposit(alice, dec!(1000));

    let submitted = sim.market.submit_order(alice, OrderRequest::next_price(dec!(50))).unwrap();
    println!("  Alice submits LONG 50 @ $200, target round {}", submitted.order.target_round_id);
    println!(
        "  Commit deposit: ${}, keeper deposit: ${}, margin left: ${}",
        submitted.order.commit_deposit, submitted.order.keeper_deposit, submitted.margin_after
    );

    let round = sim.price(dec!(180));
    println!("  Oracle publishes round {} at $180", round);

    let executed = sim.market.execute_order(alice, alice).unwrap();
    println!("  Alice executes her own order: fill ${}, fee ${}", executed.fill_price, executed.fee);
    println!("  Position: {} @ margin ${}", executed.position.size, executed.position.margin);
    for event in sim.market.events_for(alice) {
        println!("    [{}] #{} {}", event.timestamp, event.id.0, event.payload.name());
    }
    println!();
}

/// Execution fails once the margin backing the order is gone. cancel still works.
fn scenario_2_withdraw_then_cancel() {
    println!("Scenario 2: Withdraw Then Cancel\n");

    let alice = AccountId(1);
    let mut sim = Sim::new(MarketParams::default());
    sim.deposit(alice, dec!(1000));

    sim.market.submit_order(alice, OrderRequest::next_price(dec!(50))).unwrap();
    let withdrawn = sim.market.withdraw_all_margin(alice).unwrap();
    println!("  Alice submits LONG 50, then withdraws ${}", withdrawn);

    sim.price(dec!(200));
    match sim.market.execute_order(alice, alice) {
        Ok(_) => println!("  Execution unexpectedly succeeded"),
        Err(e) => println!("  Execution refused: {}", e),
    }

    let cancelled = sim.market.cancel_order(alice, alice).unwrap();
    println!(
        "  Alice cancels: ${} forfeited to fees, ${} back in margin",
        cancelled.forfeited, cancelled.refunded_to_margin
    );
    println!("  Margin now ${}, fee pool ${}\n", sim.margin(alice), sim.ledger.fee_pool());
}

/// A keeper may only clean up an order after both confirmation windows pass.
fn scenario_3_keeper_cleanup() {
    println!("Scenario 3: Keeper Clean-up\n");

    let alice = AccountId(1);
    let keeper = AccountId(99);
    let mut sim = Sim::new(MarketParams::default());
    sim.deposit(alice, dec!(1000));
    sim.market.submit_order(alice, OrderRequest::next_price(dec!(10))).unwrap();

    if let Err(e) = sim.market.cancel_order(keeper, alice) {
        println!("  Keeper cancel right away: {}", e);
    }

    let params = sim.market.params().unwrap();
    for _ in 0..=params.confirmation_window_rounds + 1 {
        sim.price(dec!(200));
    }
    sim.market.advance_secs(params.confirmation_window_seconds + 1);

    let result = sim.market.cancel_order(keeper, alice).unwrap();
    println!(
        "  After {} rounds and {}s the keeper cancels and earns ${}",
        params.confirmation_window_rounds + 2,
        params.confirmation_window_seconds + 1,
        result.keeper_reward.unwrap_or_default()
    );
    println!("  Keeper balance: ${}\n", sim.ledger.balance(keeper));
}

/// Partial closes and flips on one account keep the open interest accumulators exact.
fn scenario_4_skew_consistency() {
    println!("Scenario 4: Skew Consistency\n");

    let alice = AccountId(1);
    let keeper = AccountId(99);
    let mut sim = Sim::new(MarketParams::default());
    sim.deposit(alice, dec!(5000));

    for size in [dec!(20), dec!(-5), dec!(-30), dec!(10), dec!(5)] {
        sim.market.submit_order(alice, OrderRequest::next_price(size)).unwrap();
        sim.price(dec!(200));
        sim.market.execute_order(keeper, alice).unwrap();
        println!(
            "  Trade {}: size {}, market size {}, skew {}",
            size,
            sim.market.position(alice).map(|p| p.size).unwrap_or_default(),
            sim.market.market_size(),
            sim.market.market_skew()
        );
    }

    let recount = sim.market.state().recount_aggregates();
    println!("  Accumulators match a full recount: {}\n", recount == sim.market.state().aggregates);
}

/// A skewed market drifts its funding rate; longs pay shorts.
fn scenario_5_funding() {
    println!("Scenario 5: Funding Drift\n");

    let alice = AccountId(1);
    let keeper = AccountId(99);
    let mut sim = Sim::new(MarketParams {
        skew_scale: dec!(1000),
        ..MarketParams::default()
    });
    sim.deposit(alice, dec!(2000));
    sim.market.submit_order(alice, OrderRequest::next_price(dec!(50))).unwrap();
    sim.price(dec!(200));
    sim.market.execute_order(keeper, alice).unwrap();

    for hour in [1u64, 4, 8] {
        sim.market.advance_secs(3600 * hour);
        let funding = sim.market.recompute_funding().unwrap();
        println!(
            "  +{}h: rate {:.6}/day, accrued funding for Alice ${:.4}",
            hour,
            funding.funding_rate,
            sim.market.accrued_funding(alice).unwrap().value()
        );
    }
    println!();
}

/// A price drop makes a leveraged long liquidatable.
fn scenario_6_liquidation() {
    println!("Scenario 6: Liquidation\n");

    let alice = AccountId(1);
    let keeper = AccountId(99);
    let mut sim = Sim::new(MarketParams::default());
    sim.deposit(alice, dec!(1000));
    sim.market.submit_order(alice, OrderRequest::next_price(dec!(50))).unwrap();
    sim.price(dec!(200));
    sim.market.execute_order(alice, alice).unwrap();

    if let Some(price) = sim.market.liquidation_price(alice).unwrap() {
        println!("  Alice LONG 50 @ $200, liquidation price ${:.2}", price);
    }

    for price in [dec!(190), dec!(185), dec!(180)] {
        sim.price(price);
        println!("  Price ${}: liquidatable {}", price, sim.market.can_liquidate(alice).unwrap());
    }

    let result = sim.market.liquidate(keeper, alice).unwrap();
    println!(
        "  Keeper liquidates {} @ ${}: fee ${}, market absorbed ${}",
        result.size, result.price, result.fee, result.market_absorbed
    );
    println!("  Market size after: {}", sim.market.market_size());
}
