//! Allocation orchestrator: exact solve, regression fallback, regime escalation.
//!
//! ```text
//! exchange-preserving:  exact → verify → regression → verify
//!                                   │ (nothing verified)
//! pool-wide:            exact → verify → regression → verify → NoSolution
//! ```
//!
//! The winning [`Allocation`] is returned to the caller; writing it into the
//! position table is the separate [`commit_targets`] step.

use std::fmt;

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::exact::{SolverOptions, SolverReport, solve_exact};
use crate::model::{AllocationModel, Regime};
use crate::position::{AggregateCurrency, AssetPosition};
use crate::regression::solve_regression;
use crate::solution::{Solution, verify_solution};
use crate::types::Asset;

/// When the regression fallback is used.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum UseRegression {
    /// Skip the exact solver and go straight to regression.
    Force,
    /// Regression only when the exact solution fails verification.
    #[default]
    Fallback,
    /// Exact solver only.
    Forbid,
}

/// Regime the orchestrator starts from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum ObjectiveMode {
    /// Try to keep every exchange total, escalate to pool-wide if needed.
    #[default]
    ExchangePreserving,
    /// Start directly at pool-wide.
    PoolWide,
}

impl ObjectiveMode {
    fn regimes(self) -> &'static [Regime] {
        match self {
            ObjectiveMode::ExchangePreserving => &[Regime::ExchangePreserving, Regime::PoolWide],
            ObjectiveMode::PoolWide => &[Regime::PoolWide],
        }
    }
}

/// Which solver produced the accepted solution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum Method {
    Exact,
    Regression,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Exact => write!(f, "exact"),
            Method::Regression => write!(f, "regression"),
        }
    }
}

/// An accepted, verified allocation.
#[derive(Clone, Debug)]
pub struct Allocation {
    pub solution: Solution,
    pub regime: Regime,
    pub method: Method,
    /// Input aggregates with `solved_value` / `solved_pct` filled in
    pub aggregates: Vec<AggregateCurrency>,
    /// Exact-solver diagnostics, when the exact solver won
    pub report: Option<SolverReport>,
}

impl Allocation {
    /// Pool-wide solutions move value between exchanges.
    pub fn requires_transfer(&self) -> bool {
        self.regime == Regime::PoolWide
    }
}

/// Solve for new per-position values.
///
/// Infeasible inputs fail immediately with [`Error::Infeasible`]; exhausting
/// every regime without a verified candidate yields [`Error::NoSolution`].
/// When every position already carries a target, those targets seed the
/// exact solver as a warm start.
pub fn solve_allocations(
    positions: &[AssetPosition],
    aggregates: &[AggregateCurrency],
    reference: &Asset,
    mode: ObjectiveMode,
    policy: UseRegression,
    options: &SolverOptions,
) -> Result<Allocation> {
    let warm_start = warm_start_from(positions);

    for &regime in mode.regimes() {
        let model = AllocationModel::build(positions, aggregates, regime)?;

        if policy != UseRegression::Force {
            if let Some(outcome) = solve_exact(&model, options, warm_start.as_deref())? {
                if verify_solution(&outcome.solution, &model) {
                    info!("{regime} allocation accepted (exact)");
                    return Ok(accept(
                        outcome.solution,
                        regime,
                        Method::Exact,
                        aggregates,
                        Some(outcome.report),
                    ));
                }
                warn!("{regime} exact solution failed verification");
            }
        }

        if policy != UseRegression::Forbid {
            let candidate = solve_regression(&model, reference)?;
            if verify_solution(&candidate, &model) {
                info!("{regime} allocation accepted (regression)");
                return Ok(accept(candidate, regime, Method::Regression, aggregates, None));
            }
            warn!("{regime} regression solution failed verification");
        }
        debug!("no {regime} allocation, escalating");
    }
    Err(Error::NoSolution)
}

/// Current targets as values, if every position has one.
fn warm_start_from(positions: &[AssetPosition]) -> Option<Vec<f64>> {
    positions.iter().map(AssetPosition::target_value).collect()
}

fn accept(
    solution: Solution,
    regime: Regime,
    method: Method,
    aggregates: &[AggregateCurrency],
    report: Option<SolverReport>,
) -> Allocation {
    let total = solution.total();
    let aggregates = aggregates
        .iter()
        .map(|a| {
            let solved = solution.currency_total(&a.currency);
            AggregateCurrency {
                solved_value: Some(solved),
                solved_pct: Some(if total > 0.0 { solved / total } else { 0.0 }),
                ..a.clone()
            }
        })
        .collect();
    Allocation {
        solution,
        regime,
        method,
        aggregates,
        report,
    }
}

/// Write the solved values into the position table as target balances.
///
/// `target = value / price`; a non-finite quotient becomes 0. Positions the
/// solution does not cover lose their target. Returns the number of positions
/// that received a target.
pub fn commit_targets(positions: &mut [AssetPosition], allocation: &Allocation) -> usize {
    let mut committed = 0;
    for p in positions.iter_mut() {
        match allocation.solution.value(&p.currency, &p.exchange) {
            Some(value) => {
                p.set_target(value / p.price);
                committed += 1;
            }
            None => p.clear_target(),
        }
    }
    debug!("committed {committed} targets");
    committed
}

/// One cube's inputs for [`solve_many`].
#[cfg(feature = "parallel")]
#[derive(Clone, Debug)]
pub struct CubeInput {
    pub positions: Vec<AssetPosition>,
    pub aggregates: Vec<AggregateCurrency>,
    pub reference: Asset,
}

/// Solve independent cubes in parallel, one result per input, in order.
#[cfg(feature = "parallel")]
pub fn solve_many(
    cubes: &[CubeInput],
    mode: ObjectiveMode,
    policy: UseRegression,
    options: &SolverOptions,
) -> Vec<Result<Allocation>> {
    use rayon::prelude::*;

    cubes
        .par_iter()
        .map(|c| {
            solve_allocations(
                &c.positions,
                &c.aggregates,
                &c.reference,
                mode,
                policy,
                options,
            )
        })
        .collect()
}
