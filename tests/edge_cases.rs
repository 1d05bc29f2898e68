//! Edge cases: degenerate inputs, error surfaces and dimension checks.

use cube_rebalance::exact::solve_exact;
use cube_rebalance::model::AllocationModel;
use cube_rebalance::{
    AggregateCurrency, Allocations, Asset, AssetPosition, Error, ObjectiveMode, RawBalance,
    Regime, Solution, SolverOptions, StaticCatalog, UseRegression, aggregate, build_positions,
    sanity_check, solve_allocations, verify_solution,
};

fn pos(cur: &str, ex: &str, bal: f64, price: f64) -> AssetPosition {
    AssetPosition::new(cur.into(), ex.into(), bal, price)
}

fn agg(cur: &str, target_value: f64) -> AggregateCurrency {
    AggregateCurrency {
        currency: cur.into(),
        balance: 0.0,
        value: 0.0,
        price: 1.0,
        target_pct: 0.0,
        target_value,
        solved_value: None,
        solved_pct: None,
    }
}

fn allocs(items: &[(&str, f64)]) -> Allocations {
    items.iter().map(|(c, p)| ((*c).into(), *p)).collect()
}

// ============================================================================
// Infeasible models fail fast
// ============================================================================

#[test]
fn empty_position_table_is_infeasible() {
    let err = solve_allocations(
        &[],
        &[agg("BTC", 1.0)],
        &"BTC".into(),
        ObjectiveMode::ExchangePreserving,
        UseRegression::Fallback,
        &SolverOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::Infeasible(_)));
}

#[test]
fn target_total_must_match_current_total() {
    let positions = vec![pos("BTC", "A", 10.0, 1.0)];
    let err = AllocationModel::build(&positions, &[agg("BTC", 12.0)], Regime::PoolWide)
        .unwrap_err();
    assert!(matches!(err, Error::Infeasible(_)));
}

#[test]
fn non_finite_target_is_infeasible() {
    let positions = vec![pos("BTC", "A", 10.0, 1.0)];
    let err = AllocationModel::build(&positions, &[agg("BTC", f64::NAN)], Regime::PoolWide)
        .unwrap_err();
    assert!(matches!(err, Error::Infeasible(_)));
}

#[test]
fn target_currency_without_position_is_infeasible() {
    let positions = vec![pos("BTC", "A", 10.0, 1.0)];
    let err = AllocationModel::build(
        &positions,
        &[agg("BTC", 5.0), agg("ETH", 5.0)],
        Regime::ExchangePreserving,
    )
    .unwrap_err();
    assert!(matches!(err, Error::Infeasible(_)));
}

// ============================================================================
// Dimensions and verification
// ============================================================================

#[test]
fn warm_start_of_wrong_length_is_rejected() {
    let positions = vec![pos("BTC", "A", 10.0, 1.0), pos("BTC", "B", 10.0, 1.0)];
    let model =
        AllocationModel::build(&positions, &[agg("BTC", 20.0)], Regime::PoolWide).unwrap();
    let err = solve_exact(&model, &SolverOptions::default(), Some(&[1.0][..])).unwrap_err();
    assert!(matches!(
        err,
        Error::Dimension {
            expected: 2,
            actual: 1
        }
    ));
    assert!(Solution::from_vector(&model, &[1.0, 2.0, 3.0]).is_err());
}

#[test]
fn verification_rejects_foreign_and_negative_solutions() {
    let positions = vec![pos("BTC", "A", 10.0, 1.0), pos("BTC", "B", 10.0, 1.0)];
    let model =
        AllocationModel::build(&positions, &[agg("BTC", 20.0)], Regime::PoolWide).unwrap();

    let foreign: Solution = vec![
        (("BTC".into(), "A".into()), 10.0),
        (("BTC".into(), "C".into()), 10.0),
    ]
    .into_iter()
    .collect();
    assert!(!verify_solution(&foreign, &model));

    let negative = Solution::from_vector(&model, &[25.0, -5.0]).unwrap();
    assert!(!verify_solution(&negative, &model));

    let shifted = Solution::from_vector(&model, &[20.0, 0.0]).unwrap();
    assert!(verify_solution(&shifted, &model));
}

// ============================================================================
// Preparation
// ============================================================================

#[test]
fn sanity_check_rejects_zero_balances() {
    let balances = vec![RawBalance::new("BTC", "A", 0.0)];
    let mut allocations = allocs(&[("BTC", 1.0)]);
    assert!(matches!(
        sanity_check(&mut allocations, &balances),
        Err(Error::Allocation(_))
    ));
}

#[test]
fn only_unpriced_balances_leave_nothing_to_aggregate() {
    let balances = vec![
        RawBalance::new("BTC", "A", 1.0),
        RawBalance::new("DOGE", "A", 1000.0),
    ];
    let allocations = allocs(&[("DOGE", 1.0), ("BTC", 0.0)]);
    let positions = build_positions(
        &balances,
        &allocations,
        &Asset::new("BTC"),
        &StaticCatalog::default(),
    );
    // DOGE has neither a pair nor a snapshot price
    assert_eq!(positions.len(), 1);
    assert!(matches!(
        aggregate(&positions, &allocations),
        Err(Error::Allocation(_))
    ));
}
