//! End-to-end order generation: balances in, order intents out.

use cube_rebalance::{
    Allocations, Asset, ClearReason, NoConstraints, ObjectiveMode, PairId, PairListing,
    RawBalance, Side, SolverOptions, StaticCatalog, TradingPair, UseRegression, aggregate,
    build_positions, commit_targets, generate_orders, sanity_check, solve_allocations,
};
use rust_decimal_macros::dec;

fn catalog() -> StaticCatalog {
    StaticCatalog::new(vec![
        PairListing::new(TradingPair::new(1, "Kraken", "ETH", "BTC"), 0.05)
            .with_constraints(dec!(0.01), dec!(0.0001)),
        PairListing::new(TradingPair::new(2, "Kraken", "XRP", "BTC"), 0.00001)
            .with_constraints(dec!(1), dec!(0.0001)),
        PairListing::new(TradingPair::new(3, "Kraken", "BTC", "USDT"), 40_000.0)
            .with_constraints(dec!(0.001), dec!(10)),
    ])
}

fn allocs(items: &[(&str, f64)]) -> Allocations {
    items.iter().map(|(c, p)| ((*c).into(), *p)).collect()
}

#[test]
fn full_pipeline_sells_overweight_currencies() {
    let balances = vec![
        RawBalance::new("BTC", "Kraken", 1.0),
        RawBalance::new("ETH", "Kraken", 20.0),
        RawBalance::new("XRP", "Kraken", 100_000.0),
    ];
    let mut allocations = allocs(&[("BTC", 0.5), ("ETH", 0.25), ("XRP", 0.25)]);
    sanity_check(&mut allocations, &balances).unwrap();

    let reference = Asset::new("BTC");
    let catalog = catalog();
    let mut positions = build_positions(&balances, &allocations, &reference, &catalog);
    assert_eq!(positions.len(), 3);

    let aggregates = aggregate(&positions, &allocations).unwrap();
    let allocation = solve_allocations(
        &positions,
        &aggregates,
        &reference,
        ObjectiveMode::ExchangePreserving,
        UseRegression::Fallback,
        &SolverOptions::default(),
    )
    .unwrap();
    assert_eq!(commit_targets(&mut positions, &allocation), 3);

    let batch = generate_orders(&mut positions, &reference, &catalog, &catalog, 1.0);
    assert_eq!(batch.orders.len(), 2);

    // ETH: 20 → 15, XRP: 100 000 → 75 000; both sold against BTC
    let eth = batch.orders.iter().find(|o| o.pair == PairId(1)).unwrap();
    assert_eq!(eth.side, Side::Sell);
    assert!(eth.amount >= dec!(4.99) && eth.amount <= dec!(5));
    assert_eq!(eth.price, dec!(0.05));

    let xrp = batch.orders.iter().find(|o| o.pair == PairId(2)).unwrap();
    assert_eq!(xrp.side, Side::Sell);
    assert!(xrp.amount >= dec!(24999) && xrp.amount <= dec!(25000));
    assert_eq!(xrp.amount.fract(), dec!(0));

    assert!(!batch.balanced);
    assert_eq!(batch.cleared.len(), 1);
    assert_eq!(batch.cleared[0].reason, ClearReason::ReferenceCurrency);
}

#[test]
fn below_exchange_minimum_value_clears_target() {
    // BTC/USDT needs 10 USDT of value per order
    let mut positions = vec![
        cube_rebalance::AssetPosition::new("BTC".into(), "Kraken".into(), 1.0, 1.0)
            .with_target(1.0),
        cube_rebalance::AssetPosition::new("USDT".into(), "Kraken".into(), 4.0, 1.0 / 40_000.0)
            .with_target(2.0),
    ];
    let catalog = catalog();
    let batch = generate_orders(&mut positions, &"BTC".into(), &catalog, &catalog, 1.0);

    assert!(batch.orders.is_empty());
    assert!(positions[1].target.is_none());
    assert!(
        batch
            .cleared
            .iter()
            .any(|c| c.currency.as_str() == "USDT" && c.reason == ClearReason::BelowMinimum)
    );
    assert!(batch.balanced);
}

#[test]
fn unknown_constraints_disable_minimums() {
    let mut positions = vec![
        cube_rebalance::AssetPosition::new("BTC".into(), "Kraken".into(), 1.0, 1.0)
            .with_target(1.0),
        cube_rebalance::AssetPosition::new("USDT".into(), "Kraken".into(), 4.0, 1.0 / 40_000.0)
            .with_target(2.0),
    ];
    let batch = generate_orders(&mut positions, &"BTC".into(), &catalog(), &NoConstraints, 1.0);

    // selling 2 USDT = buying BTC through the inverted pair
    assert_eq!(batch.orders.len(), 1);
    assert_eq!(batch.orders[0].pair, PairId(3));
    assert_eq!(batch.orders[0].side, Side::Buy);
    assert!(batch.orders[0].amount > dec!(0));
}

#[test]
fn nothing_to_do_for_empty_table() {
    let batch = generate_orders(&mut [], &"BTC".into(), &catalog(), &catalog(), 1.0);
    assert!(batch.orders.is_empty());
    assert!(batch.cleared.is_empty());
    assert!(batch.balanced);
}
