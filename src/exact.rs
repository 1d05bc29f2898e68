//! Exact allocation solve through the Clarabel interior-point solver.
//!
//! The model is scaled by its current total so that all values are O(1),
//! lowered to Clarabel's conic form (`min ½zᵀPz + qᵀz  s.t.  Az + s = b,
//! s ∈ K`) and solved. Linearly dependent equality rows are dropped first:
//! the currency groups and the exchange (or total) groups both partition the
//! variables, so at least one row is always redundant.

use clarabel::algebra::CscMatrix;
use clarabel::solver::SupportedConeT::{self, NonnegativeConeT, ZeroConeT};
use clarabel::solver::{
    DefaultSettings, DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus,
};
use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::{AllocationModel, Objective};
use crate::solution::Solution;
use crate::types::ABS_TOL;

/// Pivot threshold when testing equality rows for independence.
const RANK_TOL: f64 = 1e-9;

/// Budget and tolerances for one exact solve.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SolverOptions {
    /// Wall-clock budget per attempt, in seconds
    pub time_limit_secs: f64,
    /// Interior-point iteration budget per attempt
    pub max_iterations: u32,
    pub tol_feas: f64,
    pub tol_gap_abs: f64,
    pub tol_gap_rel: f64,
    pub verbose: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            time_limit_secs: 90.0,
            max_iterations: 20_000,
            tol_feas: 1e-8,
            tol_gap_abs: 1e-8,
            tol_gap_rel: 1e-8,
            verbose: false,
        }
    }
}

/// Which attempt produced the accepted vector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum Attempt {
    Primary,
    /// Second attempt with stronger KKT regularization
    Retry,
    /// Both attempts failed; the caller's feasible warm start was kept
    WarmStart,
}

/// Solver diagnostics for an accepted exact solution.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SolverReport {
    pub status: String,
    pub attempt: Attempt,
    pub iterations: u32,
    pub solve_time: f64,
    /// Objective in reference-currency units
    pub objective: f64,
}

#[derive(Clone, Debug)]
pub struct ExactOutcome {
    pub solution: Solution,
    pub report: SolverReport,
}

/// Solve `model` exactly.
///
/// Returns `Ok(None)` when neither the primary nor the retry attempt reaches a
/// solved status and no usable warm start was given. A warm start of the
/// wrong length is an error.
pub fn solve_exact(
    model: &AllocationModel,
    options: &SolverOptions,
    warm_start: Option<&[f64]>,
) -> Result<Option<ExactOutcome>> {
    if let Some(ws) = warm_start.filter(|ws| ws.len() != model.len()) {
        return Err(Error::Dimension {
            expected: model.len(),
            actual: ws.len(),
        });
    }

    let scale = scale_of(model);
    let Some(problem) = ConicProblem::lower(model, scale) else {
        warn!("{} equality constraints are inconsistent", model.regime());
        return incumbent(model, warm_start);
    };

    for attempt in [Attempt::Primary, Attempt::Retry] {
        let settings = settings_for(options, attempt)?;
        let mut solver = DefaultSolver::new(
            &problem.p,
            &problem.q,
            &problem.a,
            &problem.b,
            &problem.cones,
            settings,
        );
        solver.solve();

        let status = solver.solution.status;
        debug!(
            "{} exact solve ({:?}): {:?} after {} iterations, {:.3}s",
            model.regime(),
            attempt,
            status,
            solver.solution.iterations,
            solver.solution.solve_time
        );
        if !matches!(status, SolverStatus::Solved | SolverStatus::AlmostSolved) {
            warn!("{} exact solve ({attempt:?}) failed: {status:?}", model.regime());
            continue;
        }

        let x: Vec<f64> = solver.solution.x[..model.len()]
            .iter()
            .map(|v| clamp_residue(v * scale))
            .collect();
        let report = SolverReport {
            status: format!("{status:?}"),
            attempt,
            iterations: solver.solution.iterations,
            solve_time: solver.solution.solve_time,
            objective: model.objective_value(&x),
        };
        info!(
            "{} exact solve succeeded ({attempt:?}, objective {:.8})",
            model.regime(),
            report.objective
        );
        return Ok(Some(ExactOutcome {
            solution: Solution::from_vector(model, &x)?,
            report,
        }));
    }

    incumbent(model, warm_start)
}

/// The warm start, if it satisfies the model on its own.
fn incumbent(model: &AllocationModel, warm_start: Option<&[f64]>) -> Result<Option<ExactOutcome>> {
    let Some(ws) = warm_start.filter(|ws| model.is_feasible(ws)) else {
        return Ok(None);
    };
    info!("{} keeping feasible warm start", model.regime());
    let x: Vec<f64> = ws.iter().map(|v| clamp_residue(*v)).collect();
    Ok(Some(ExactOutcome {
        solution: Solution::from_vector(model, &x)?,
        report: SolverReport {
            status: "WarmStart".into(),
            attempt: Attempt::WarmStart,
            iterations: 0,
            solve_time: 0.0,
            objective: model.objective_value(&x),
        },
    }))
}

fn scale_of(model: &AllocationModel) -> f64 {
    let total = model.total_current();
    if total.is_finite() && total > 0.0 {
        total
    } else {
        1.0
    }
}

/// Solver residue slightly below zero is snapped to zero.
fn clamp_residue(v: f64) -> f64 {
    if v < 0.0 && v >= -ABS_TOL { 0.0 } else { v }
}

fn settings_for(options: &SolverOptions, attempt: Attempt) -> Result<DefaultSettings<f64>> {
    let mut builder = DefaultSettingsBuilder::default();
    builder
        .verbose(options.verbose)
        .max_iter(options.max_iterations)
        .time_limit(options.time_limit_secs)
        .tol_feas(options.tol_feas)
        .tol_gap_abs(options.tol_gap_abs)
        .tol_gap_rel(options.tol_gap_rel);
    if attempt == Attempt::Retry {
        builder
            .static_regularization_constant(1e-7)
            .iterative_refinement_max_iter(50)
            .equilibrate_enable(false);
    }
    builder.build().map_err(|e| Error::Solver(e.to_string()))
}

/// Clarabel inputs for one model.
struct ConicProblem {
    p: CscMatrix<f64>,
    q: Vec<f64>,
    a: CscMatrix<f64>,
    b: Vec<f64>,
    cones: Vec<SupportedConeT<f64>>,
}

impl ConicProblem {
    /// Lower `model`, or `None` when its equality rows contradict each other.
    fn lower(model: &AllocationModel, scale: f64) -> Option<Self> {
        let n = model.len();
        let current: Vec<f64> = model.current().iter().map(|c| c / scale).collect();

        let mut eq_rows: Vec<Vec<f64>> = Vec::with_capacity(model.groups().len());
        let mut eq_rhs = Vec::with_capacity(model.groups().len());
        for g in model.groups() {
            let mut row = vec![0.0; n];
            for &i in &g.indices {
                row[i] = 1.0;
            }
            eq_rows.push(row);
            eq_rhs.push(g.rhs / scale);
        }
        let keep = independent_rows(&eq_rows, &eq_rhs, ABS_TOL / scale)?;
        debug!(
            "keeping {} of {} equality rows",
            keep.len(),
            eq_rows.len()
        );

        // Variable layout: L1 uses z = [x, t] with t_i ≥ |x_i − c_i|, L2 uses z = x.
        let (width, p, q) = match model.objective() {
            Objective::AbsoluteDeviation => {
                let mut q = vec![0.0; 2 * n];
                q[n..].fill(1.0);
                (2 * n, CscMatrix::zeros((2 * n, 2 * n)), q)
            }
            Objective::SquaredDeviation => {
                let q = current.iter().map(|c| -2.0 * c).collect();
                (n, diagonal(n, 2.0), q)
            }
        };

        let mut rows: Vec<Vec<(usize, f64)>> = Vec::new();
        let mut b = Vec::new();
        for &r in &keep {
            rows.push(
                eq_rows[r]
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| **v != 0.0)
                    .map(|(j, v)| (j, *v))
                    .collect(),
            );
            b.push(eq_rhs[r]);
        }
        let n_eq = rows.len();

        if model.objective() == Objective::AbsoluteDeviation {
            for i in 0..n {
                // x_i − t_i ≤ c_i
                rows.push(vec![(i, 1.0), (n + i, -1.0)]);
                b.push(current[i]);
                // −x_i − t_i ≤ −c_i
                rows.push(vec![(i, -1.0), (n + i, -1.0)]);
                b.push(-current[i]);
            }
        }
        for i in 0..n {
            // −x_i ≤ 0
            rows.push(vec![(i, -1.0)]);
            b.push(0.0);
        }
        let n_ineq = rows.len() - n_eq;

        let a = csc_from_rows(&rows, width);
        let cones = vec![ZeroConeT(n_eq), NonnegativeConeT(n_ineq)];
        Some(Self { p, q, a, b, cones })
    }
}

/// Indices of a maximal linearly independent subset of `rows`, in order.
///
/// A dependent row whose right-hand side disagrees with the kept rows by more
/// than `tol` makes the system inconsistent and yields `None`.
fn independent_rows(rows: &[Vec<f64>], rhs: &[f64], tol: f64) -> Option<Vec<usize>> {
    let mut basis: Vec<(usize, Vec<f64>, f64)> = Vec::new();
    let mut keep = Vec::new();
    for (r, row) in rows.iter().enumerate() {
        let mut v = row.clone();
        let mut beta = rhs[r];
        for (pivot, b, b_rhs) in &basis {
            let f = v[*pivot];
            if f != 0.0 {
                for (vj, bj) in v.iter_mut().zip(b) {
                    *vj -= f * bj;
                }
                beta -= f * b_rhs;
            }
        }
        let (pivot, max) = v
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
            .unwrap_or((0, 0.0));
        if max.abs() <= RANK_TOL {
            if beta.abs() > tol {
                debug!("equality row {r} contradicts earlier rows by {beta:.3e}");
                return None;
            }
            continue;
        }
        for vj in &mut v {
            *vj /= max;
        }
        basis.push((pivot, v, beta / max));
        keep.push(r);
    }
    Some(keep)
}

fn diagonal(n: usize, value: f64) -> CscMatrix<f64> {
    CscMatrix::new(n, n, (0..=n).collect(), (0..n).collect(), vec![value; n])
}

/// Compressed-column matrix from sparse rows of `(column, value)`.
fn csc_from_rows(rows: &[Vec<(usize, f64)>], ncols: usize) -> CscMatrix<f64> {
    let mut columns: Vec<Vec<(usize, f64)>> = vec![Vec::new(); ncols];
    for (r, row) in rows.iter().enumerate() {
        for &(c, v) in row {
            columns[c].push((r, v));
        }
    }
    let mut colptr = Vec::with_capacity(ncols + 1);
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();
    colptr.push(0);
    for col in columns {
        for (r, v) in col {
            rowval.push(r);
            nzval.push(v);
        }
        colptr.push(rowval.len());
    }
    CscMatrix::new(rows.len(), ncols, colptr, rowval, nzval)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Regime;
    use crate::position::{AggregateCurrency, AssetPosition};
    use crate::solution::verify_solution;

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

    fn positions() -> Vec<AssetPosition> {
        vec![
            AssetPosition::new("BTC".into(), "A".into(), 40.0, 1.0),
            AssetPosition::new("ETH".into(), "A".into(), 20.0, 1.0),
            AssetPosition::new("BTC".into(), "B".into(), 10.0, 1.0),
            AssetPosition::new("ETH".into(), "B".into(), 30.0, 1.0),
        ]
    }

    #[test]
    fn independent_rows_drops_partition_dependency() {
        // two currency rows and two exchange rows over a 2x2 grid
        let rows = vec![
            vec![1.0, 0.0, 1.0, 0.0],
            vec![0.0, 1.0, 0.0, 1.0],
            vec![1.0, 1.0, 0.0, 0.0],
            vec![0.0, 0.0, 1.0, 1.0],
        ];
        let rhs = [0.6, 0.4, 0.5, 0.5];
        assert_eq!(independent_rows(&rows, &rhs, 1e-6), Some(vec![0, 1, 2]));
        assert_eq!(independent_rows(&[vec![0.0, 0.0]], &[0.0], 1e-6), Some(vec![]));
    }

    #[test]
    fn independent_rows_detects_contradiction() {
        let rows = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 0.0]];
        assert_eq!(independent_rows(&rows, &[0.5, 0.5, 0.6], 1e-6), None);
        assert_eq!(
            independent_rows(&rows, &[0.5, 0.5, 0.5 + 1e-9], 1e-6),
            Some(vec![0, 1])
        );
    }

    #[test]
    fn csc_layout() {
        let m = csc_from_rows(&[vec![(0, 1.0), (2, 3.0)], vec![(1, 2.0)]], 3);
        assert_eq!(m.m, 2);
        assert_eq!(m.n, 3);
        assert_eq!(m.colptr, vec![0, 1, 2, 3]);
        assert_eq!(m.rowval, vec![0, 1, 0]);
        assert_eq!(m.nzval, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn exchange_preserving_exact_solution_verifies() {
        let model = AllocationModel::build(
            &positions(),
            &[agg("BTC", 60.0), agg("ETH", 40.0)],
            Regime::ExchangePreserving,
        )
        .unwrap();
        let outcome = solve_exact(&model, &SolverOptions::default(), None)
            .unwrap()
            .expect("solvable");
        assert!(verify_solution(&outcome.solution, &model));
        assert_eq!(outcome.report.attempt, Attempt::Primary);
        // 10 of value changes hands from ETH to BTC somewhere: |+10| + |−10|
        assert!((outcome.report.objective - 20.0).abs() < 1e-3);
    }

    #[test]
    fn pool_wide_exact_solution_verifies() {
        let model = AllocationModel::build(
            &positions(),
            &[agg("BTC", 60.0), agg("ETH", 40.0)],
            Regime::PoolWide,
        )
        .unwrap();
        let outcome = solve_exact(&model, &SolverOptions::default(), None)
            .unwrap()
            .expect("solvable");
        assert!(verify_solution(&outcome.solution, &model));
        // least squares spreads the change evenly: each BTC +5, each ETH −5
        let x = outcome.solution.values();
        assert!((x[0] - 45.0).abs() < 1e-3);
        assert!((x[2] - 15.0).abs() < 1e-3);
        assert!((x[1] - 15.0).abs() < 1e-3);
        assert!((x[3] - 25.0).abs() < 1e-3);
    }

    #[test]
    fn warm_start_length_checked() {
        let model = AllocationModel::build(
            &positions(),
            &[agg("BTC", 60.0), agg("ETH", 40.0)],
            Regime::PoolWide,
        )
        .unwrap();
        let err = solve_exact(&model, &SolverOptions::default(), Some(&[1.0, 2.0])).unwrap_err();
        assert!(matches!(err, Error::Dimension { expected: 4, actual: 2 }));
    }

    #[test]
    fn feasible_warm_start_is_kept_as_incumbent() {
        let model = AllocationModel::build(
            &positions(),
            &[agg("BTC", 60.0), agg("ETH", 40.0)],
            Regime::ExchangePreserving,
        )
        .unwrap();
        let ws = [50.0, 10.0, 10.0, 30.0];
        let outcome = incumbent(&model, Some(&ws)).unwrap().unwrap();
        assert_eq!(outcome.report.attempt, Attempt::WarmStart);
        assert_eq!(outcome.solution.values(), ws.to_vec());

        let bad = [40.0, 20.0, 10.0, 30.0];
        assert!(incumbent(&model, Some(&bad)).unwrap().is_none());
        assert!(incumbent(&model, None).unwrap().is_none());
    }

    #[test]
    fn infeasible_exchange_preserving_returns_none() {
        // exchange A only holds BTC, so BTC can never drop below 60
        let positions = vec![
            AssetPosition::new("BTC".into(), "A".into(), 60.0, 1.0),
            AssetPosition::new("ETH".into(), "B".into(), 40.0, 1.0),
        ];
        let model = AllocationModel::build(
            &positions,
            &[agg("BTC", 50.0), agg("ETH", 50.0)],
            Regime::ExchangePreserving,
        )
        .unwrap();
        assert!(
            solve_exact(&model, &SolverOptions::default(), None)
                .unwrap()
                .is_none()
        );
    }
}
