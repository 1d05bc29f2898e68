//! Regression fallback: a bounded least-squares approximation of the model.
//!
//! The equation system holds one indicator row per balance group (each
//! exchange, or the single total row in pool-wide mode) followed by one row
//! per currency. The reference currency row is left out: it absorbs whatever
//! the other currencies leave behind.

use std::fmt;

use log::{debug, warn};

use crate::error::Result;
use crate::model::{AllocationModel, GroupKey};
use crate::nnls::nnls;
use crate::solution::Solution;
use crate::types::{Asset, ExchangeId};

/// What an equation row constrains.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RowLabel {
    Exchange(ExchangeId),
    Total,
    Currency(Asset),
}

impl fmt::Display for RowLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowLabel::Exchange(e) => write!(f, "{e}"),
            RowLabel::Total => write!(f, "total"),
            RowLabel::Currency(c) => write!(f, "{c}"),
        }
    }
}

/// `Σ coefficients[i]·x_i = rhs`
#[derive(Clone, Debug, PartialEq)]
pub struct EquationRow {
    pub label: RowLabel,
    pub coefficients: Vec<f64>,
    pub rhs: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EquationSystem {
    rows: Vec<EquationRow>,
}

impl EquationSystem {
    /// Build the regression rows for `model`, skipping the `reference` currency.
    pub fn build(model: &AllocationModel, reference: &Asset) -> Self {
        let n = model.len();
        let indicator = |indices: &[usize]| {
            let mut row = vec![0.0; n];
            for &i in indices {
                row[i] = 1.0;
            }
            row
        };

        let mut rows = Vec::with_capacity(model.groups().len());
        for g in model.balance_groups() {
            let label = match &g.key {
                GroupKey::Exchange(e) => RowLabel::Exchange(e.clone()),
                GroupKey::Total | GroupKey::Currency(_) => RowLabel::Total,
            };
            rows.push(EquationRow {
                label,
                coefficients: indicator(&g.indices),
                rhs: g.rhs,
            });
        }
        for g in model.currency_groups() {
            let GroupKey::Currency(c) = &g.key else {
                continue;
            };
            if c == reference {
                continue;
            }
            rows.push(EquationRow {
                label: RowLabel::Currency(c.clone()),
                coefficients: indicator(&g.indices),
                rhs: g.rhs,
            });
        }
        Self { rows }
    }

    pub fn rows(&self) -> &[EquationRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains_currency(&self, currency: &Asset) -> bool {
        self.rows
            .iter()
            .any(|r| matches!(&r.label, RowLabel::Currency(c) if c == currency))
    }

    /// Coefficient matrix and right-hand side, both divided by `scale`.
    fn scaled(&self, scale: f64) -> (Vec<Vec<f64>>, Vec<f64>) {
        let a = self.rows.iter().map(|r| r.coefficients.clone()).collect();
        let b = self.rows.iter().map(|r| r.rhs / scale).collect();
        (a, b)
    }
}

/// Approximate the model with non-negative least squares.
///
/// Always produces a candidate; acceptance is up to
/// [`verify_solution`](crate::solution::verify_solution).
pub fn solve_regression(model: &AllocationModel, reference: &Asset) -> Result<Solution> {
    let system = EquationSystem::build(model, reference);
    let total = model.total_current();
    let scale = if total.is_finite() && total > 0.0 {
        total
    } else {
        1.0
    };

    let (a, b) = system.scaled(scale);
    let result = nnls(&a, &b);
    if !result.converged {
        warn!(
            "{} regression hit its iteration cap after {} iterations",
            model.regime(),
            result.iterations
        );
    }
    debug!(
        "{} regression over {} rows: residual {:.3e}",
        model.regime(),
        system.len(),
        result.residual_norm * scale
    );

    let x: Vec<f64> = result.x.iter().map(|v| v * scale).collect();
    Solution::from_vector(model, &x)
}
