//! Solved per-position values and their verification against a model.

use log::{debug, warn};
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::model::AllocationModel;
use crate::types::{ABS_TOL, Asset, ExchangeId, PositionKey};

/// Solved value per (currency, exchange), in the model's variable order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Solution {
    entries: Vec<(PositionKey, f64)>,
    index: FxHashMap<PositionKey, usize>,
}

impl Solution {
    /// Map a solver vector back to position keys.
    ///
    /// `x[i]` belongs to `model.keys()[i]`; a vector of the wrong length is a
    /// dimension error.
    pub fn from_vector(model: &AllocationModel, x: &[f64]) -> Result<Self> {
        if x.len() != model.len() {
            return Err(Error::Dimension {
                expected: model.len(),
                actual: x.len(),
            });
        }
        Ok(model.keys().iter().cloned().zip(x.iter().copied()).collect())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &PositionKey) -> Option<f64> {
        self.index.get(key).map(|&i| self.entries[i].1)
    }

    pub fn value(&self, currency: &Asset, exchange: &ExchangeId) -> Option<f64> {
        self.get(&(currency.clone(), exchange.clone()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PositionKey, f64)> {
        self.entries.iter().map(|(k, v)| (k, *v))
    }

    /// Values in entry order.
    pub fn values(&self) -> Vec<f64> {
        self.entries.iter().map(|(_, v)| *v).collect()
    }

    pub fn total(&self) -> f64 {
        self.entries.iter().map(|(_, v)| v).sum()
    }

    pub fn currency_total(&self, currency: &Asset) -> f64 {
        self.entries
            .iter()
            .filter(|((c, _), _)| c == currency)
            .map(|(_, v)| v)
            .sum()
    }

    pub fn exchange_total(&self, exchange: &ExchangeId) -> f64 {
        self.entries
            .iter()
            .filter(|((_, e), _)| e == exchange)
            .map(|(_, v)| v)
            .sum()
    }

    /// Values laid out in the model's variable order, if the key sets match.
    fn aligned(&self, model: &AllocationModel) -> Option<Vec<f64>> {
        if self.len() != model.len() {
            return None;
        }
        model.keys().iter().map(|k| self.get(k)).collect()
    }
}

impl FromIterator<(PositionKey, f64)> for Solution {
    fn from_iter<I: IntoIterator<Item = (PositionKey, f64)>>(iter: I) -> Self {
        let mut solution = Solution::default();
        for (key, value) in iter {
            match solution.index.get(&key) {
                Some(&i) => solution.entries[i].1 = value,
                None => {
                    solution.index.insert(key.clone(), solution.entries.len());
                    solution.entries.push((key, value));
                }
            }
        }
        solution
    }
}

/// Check a candidate against the model's constraint groups.
///
/// Accepts when the key set equals the model's, every value is finite and not
/// negative beyond tolerance, every currency sum is within
/// `max(0.01, 1% of target)` and every exchange (or the global) sum is within
/// 0.01. Never fails; a rejected candidate only logs its worst deviation.
pub fn verify_solution(solution: &Solution, model: &AllocationModel) -> bool {
    let Some(x) = solution.aligned(model) else {
        warn!(
            "solution keys do not match the model ({} vs {} entries)",
            solution.len(),
            model.len()
        );
        return false;
    };
    if let Some(bad) = x.iter().find(|v| !v.is_finite() || **v < -ABS_TOL) {
        debug!("solution rejected: value {bad}");
        return false;
    }
    let Some((group, deviation)) = model.worst_violation(&x) else {
        return true;
    };
    if deviation <= group.tolerance() {
        debug!(
            "{} solution verified (worst {}: {:.8})",
            model.regime(),
            group.key,
            deviation
        );
        true
    } else {
        debug!(
            "{} solution rejected: {} off by {:.8} (tolerance {:.8})",
            model.regime(),
            group.key,
            deviation,
            group.tolerance()
        );
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Regime;
    use crate::position::{AggregateCurrency, AssetPosition};

    fn model(regime: Regime) -> AllocationModel {
        let positions = vec![
            AssetPosition::new("BTC".into(), "A".into(), 60.0, 1.0),
            AssetPosition::new("BTC".into(), "B".into(), 20.0, 1.0),
            AssetPosition::new("ETH".into(), "B".into(), 20.0, 1.0),
        ];
        let agg = |c: &str, v: f64| AggregateCurrency {
            currency: c.into(),
            balance: 0.0,
            value: 0.0,
            price: 1.0,
            target_pct: 0.0,
            target_value: v,
            solved_value: None,
            solved_pct: None,
        };
        AllocationModel::build(&positions, &[agg("BTC", 70.0), agg("ETH", 30.0)], regime).unwrap()
    }

    #[test]
    fn parse_follows_model_order() {
        let m = model(Regime::ExchangePreserving);
        let s = Solution::from_vector(&m, &[60.0, 10.0, 30.0]).unwrap();
        assert_eq!(s.value(&"BTC".into(), &"B".into()), Some(10.0));
        assert_eq!(s.value(&"ETH".into(), &"B".into()), Some(30.0));
        assert_eq!(s.value(&"ETH".into(), &"A".into()), None);
        assert_eq!(s.currency_total(&"BTC".into()), 70.0);
        assert_eq!(s.exchange_total(&"B".into()), 40.0);
        assert_eq!(s.total(), 100.0);
        let keys: Vec<_> = s.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, m.keys());
    }

    #[test]
    fn parse_rejects_wrong_length() {
        let m = model(Regime::ExchangePreserving);
        assert!(matches!(
            Solution::from_vector(&m, &[1.0, 2.0]),
            Err(Error::Dimension {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn verify_exchange_preserving() {
        let m = model(Regime::ExchangePreserving);
        let ok = Solution::from_vector(&m, &[60.0, 10.0, 30.0]).unwrap();
        assert!(verify_solution(&ok, &m));
        // within 1% of the BTC target
        let close = Solution::from_vector(&m, &[60.0, 10.2, 29.8]).unwrap();
        assert!(verify_solution(&close, &m));
        // currencies right, exchanges wrong
        let moved = Solution::from_vector(&m, &[50.0, 20.0, 30.0]).unwrap();
        assert!(!verify_solution(&moved, &m));
    }

    #[test]
    fn verify_pool_wide_allows_moves() {
        let m = model(Regime::PoolWide);
        let moved = Solution::from_vector(&m, &[50.0, 20.0, 30.0]).unwrap();
        assert!(verify_solution(&moved, &m));
        let short = Solution::from_vector(&m, &[50.0, 20.0, 28.0]).unwrap();
        assert!(!verify_solution(&short, &m));
    }

    #[test]
    fn verify_rejects_bad_values_and_keys() {
        let m = model(Regime::PoolWide);
        let nan = Solution::from_vector(&m, &[f64::NAN, 20.0, 30.0]).unwrap();
        assert!(!verify_solution(&nan, &m));
        let negative = Solution::from_vector(&m, &[71.0, -1.0, 30.0]).unwrap();
        assert!(!verify_solution(&negative, &m));

        let foreign: Solution = vec![
            (("BTC".into(), "A".into()), 60.0),
            (("BTC".into(), "C".into()), 10.0),
            (("ETH".into(), "B".into()), 30.0),
        ]
        .into_iter()
        .collect();
        assert!(!verify_solution(&foreign, &m));
    }
}
