//! Allocation model: decision variables, constraint groups and objective shape.
//!
//! One non-negative variable per position (its solved value in the reference
//! currency). Every currency contributes one equality group; the regime adds
//! either one group per exchange or a single global group. Groups are explicit
//! index lists, built once.

use std::fmt;

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::position::{AggregateCurrency, AssetPosition};
use crate::types::{ABS_TOL, Asset, ExchangeId, PositionKey, currency_tolerance};

/// Which balance constraints accompany the per-currency targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum Regime {
    /// Every exchange keeps its current total value; no transfers needed.
    ExchangePreserving,
    /// Only the portfolio total is kept; value may move between exchanges.
    PoolWide,
}

impl Regime {
    pub fn objective(self) -> Objective {
        match self {
            Regime::ExchangePreserving => Objective::AbsoluteDeviation,
            Regime::PoolWide => Objective::SquaredDeviation,
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Regime::ExchangePreserving => f.pad("exchange-preserving"),
            Regime::PoolWide => f.pad("pool-wide"),
        }
    }
}

/// Deviation measured from the current values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Objective {
    /// Σ |x_i − c_i|
    AbsoluteDeviation,
    /// Σ (x_i − c_i)²
    SquaredDeviation,
}

/// Identifies an equality constraint group.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum GroupKey {
    Currency(Asset),
    Exchange(ExchangeId),
    Total,
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::Currency(c) => write!(f, "currency {c}"),
            GroupKey::Exchange(e) => write!(f, "exchange {e}"),
            GroupKey::Total => write!(f, "total"),
        }
    }
}

/// Σ x_i over `indices` == `rhs`.
#[derive(Clone, Debug, PartialEq)]
pub struct ConstraintGroup {
    pub key: GroupKey,
    pub indices: Vec<usize>,
    pub rhs: f64,
}

impl ConstraintGroup {
    /// Accepted deviation of the group sum from `rhs`.
    ///
    /// Currencies use `max(0.01, 1% of target)`; exchange and global totals a
    /// flat 0.01.
    pub fn tolerance(&self) -> f64 {
        match self.key {
            GroupKey::Currency(_) => currency_tolerance(self.rhs),
            GroupKey::Exchange(_) | GroupKey::Total => ABS_TOL,
        }
    }

    pub fn sum(&self, x: &[f64]) -> f64 {
        self.indices.iter().map(|&i| x[i]).sum()
    }
}

/// A built optimization problem instance.
#[derive(Clone, Debug)]
pub struct AllocationModel {
    regime: Regime,
    keys: Vec<PositionKey>,
    current: Vec<f64>,
    /// Currency groups first, then exchange or total groups
    groups: Vec<ConstraintGroup>,
    currency_groups: usize,
    group_index: FxHashMap<GroupKey, usize>,
}

impl AllocationModel {
    /// Build the model for `positions` against the currency targets in `aggregates`.
    ///
    /// Variables follow position order. Groups follow first appearance in
    /// `positions`.
    pub fn build(
        positions: &[AssetPosition],
        aggregates: &[AggregateCurrency],
        regime: Regime,
    ) -> Result<Self> {
        if positions.is_empty() {
            return Err(Error::Infeasible("no positions".into()));
        }

        let mut targets: FxHashMap<&Asset, f64> = FxHashMap::default();
        for a in aggregates {
            if !a.target_value.is_finite() {
                return Err(Error::Infeasible(format!(
                    "non-finite target for {}",
                    a.currency
                )));
            }
            targets.insert(&a.currency, a.target_value);
        }

        let mut keys = Vec::with_capacity(positions.len());
        let mut current = Vec::with_capacity(positions.len());
        let mut currencies: Vec<(Asset, Vec<usize>)> = Vec::new();
        let mut exchanges: Vec<(ExchangeId, Vec<usize>)> = Vec::new();
        let mut cur_slot: FxHashMap<&Asset, usize> = FxHashMap::default();
        let mut ex_slot: FxHashMap<&ExchangeId, usize> = FxHashMap::default();

        for (i, p) in positions.iter().enumerate() {
            if !p.price.is_finite() || p.price <= 0.0 {
                return Err(Error::Infeasible(format!(
                    "no usable price for {} on {} ({})",
                    p.currency, p.exchange, p.price
                )));
            }
            let value = p.value();
            if !value.is_finite() {
                return Err(Error::Infeasible(format!(
                    "non-finite value for {} on {}",
                    p.currency, p.exchange
                )));
            }
            if !targets.contains_key(&p.currency) {
                return Err(Error::Infeasible(format!(
                    "currency {} has no target",
                    p.currency
                )));
            }
            keys.push(p.key());
            current.push(value);

            let slot = *cur_slot.entry(&p.currency).or_insert_with(|| {
                currencies.push((p.currency.clone(), Vec::new()));
                currencies.len() - 1
            });
            currencies[slot].1.push(i);

            let slot = *ex_slot.entry(&p.exchange).or_insert_with(|| {
                exchanges.push((p.exchange.clone(), Vec::new()));
                exchanges.len() - 1
            });
            exchanges[slot].1.push(i);
        }

        for a in aggregates {
            if !cur_slot.contains_key(&a.currency) {
                return Err(Error::Infeasible(format!(
                    "target currency {} has no position",
                    a.currency
                )));
            }
        }

        let total_current: f64 = current.iter().sum();
        let total_target: f64 = currencies.iter().map(|(c, _)| targets[c]).sum();
        if (total_target - total_current).abs() > ABS_TOL {
            return Err(Error::Infeasible(format!(
                "target total {total_target:.8} differs from current total {total_current:.8}"
            )));
        }

        let mut groups = Vec::with_capacity(currencies.len() + exchanges.len());
        for (currency, indices) in currencies {
            let rhs = targets[&currency];
            groups.push(ConstraintGroup {
                key: GroupKey::Currency(currency),
                indices,
                rhs,
            });
        }
        let currency_groups = groups.len();

        match regime {
            Regime::ExchangePreserving => {
                for (exchange, indices) in exchanges {
                    let rhs = indices.iter().map(|&i| current[i]).sum();
                    groups.push(ConstraintGroup {
                        key: GroupKey::Exchange(exchange),
                        indices,
                        rhs,
                    });
                }
            }
            Regime::PoolWide => groups.push(ConstraintGroup {
                key: GroupKey::Total,
                indices: (0..keys.len()).collect(),
                rhs: total_current,
            }),
        }

        let group_index = groups
            .iter()
            .enumerate()
            .map(|(i, g)| (g.key.clone(), i))
            .collect();

        Ok(Self {
            regime,
            keys,
            current,
            groups,
            currency_groups,
            group_index,
        })
    }

    pub fn regime(&self) -> Regime {
        self.regime
    }

    pub fn objective(&self) -> Objective {
        self.regime.objective()
    }

    /// Number of decision variables.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Variable keys, in variable order.
    pub fn keys(&self) -> &[PositionKey] {
        &self.keys
    }

    /// Current value per variable.
    pub fn current(&self) -> &[f64] {
        &self.current
    }

    pub fn total_current(&self) -> f64 {
        self.current.iter().sum()
    }

    pub fn groups(&self) -> &[ConstraintGroup] {
        &self.groups
    }

    pub fn currency_groups(&self) -> &[ConstraintGroup] {
        &self.groups[..self.currency_groups]
    }

    /// Exchange groups (exchange-preserving) or the single total group (pool-wide).
    pub fn balance_groups(&self) -> &[ConstraintGroup] {
        &self.groups[self.currency_groups..]
    }

    pub fn group(&self, key: &GroupKey) -> Option<&ConstraintGroup> {
        self.group_index.get(key).map(|&i| &self.groups[i])
    }

    /// Objective value at `x`.
    pub fn objective_value(&self, x: &[f64]) -> f64 {
        let deviations = x.iter().zip(&self.current).map(|(x, c)| x - c);
        match self.objective() {
            Objective::AbsoluteDeviation => deviations.map(f64::abs).sum(),
            Objective::SquaredDeviation => deviations.map(|d| d * d).sum(),
        }
    }

    /// Largest group violation relative to its tolerance, as `(group, |sum − rhs|)`.
    ///
    /// A ratio above 1 means the candidate is outside tolerance for that group.
    pub fn worst_violation(&self, x: &[f64]) -> Option<(&ConstraintGroup, f64)> {
        self.groups
            .iter()
            .map(|g| (g, (g.sum(x) - g.rhs).abs()))
            .max_by(|a, b| {
                (a.1 / a.0.tolerance()).total_cmp(&(b.1 / b.0.tolerance()))
            })
    }

    /// Whether `x` satisfies every group within tolerance and is finite and
    /// non-negative (up to [`ABS_TOL`]).
    pub fn is_feasible(&self, x: &[f64]) -> bool {
        x.len() == self.len()
            && x.iter().all(|v| v.is_finite() && *v >= -ABS_TOL)
            && self
                .groups
                .iter()
                .all(|g| (g.sum(x) - g.rhs).abs() <= g.tolerance())
    }
}
