//! Position tables: per-(currency, exchange) balances and per-currency aggregates.

use rustc_hash::FxHashMap;

use crate::types::{Asset, ExchangeId, PositionKey};

/// One currency held on one exchange.
///
/// Prices and values are denominated in the cube's reference currency.
/// `target` is `None` when the position needs no further trading.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AssetPosition {
    pub currency: Asset,
    pub exchange: ExchangeId,
    /// Current total balance
    pub balance: f64,
    /// Target balance, or `None` once reached
    #[cfg_attr(feature = "serde", serde(default))]
    pub target: Option<f64>,
    /// Last balance reported before the current one
    #[cfg_attr(feature = "serde", serde(default))]
    pub last: Option<f64>,
    /// Spot price in the reference currency
    pub price: f64,
}

impl AssetPosition {
    pub fn new(currency: Asset, exchange: ExchangeId, balance: f64, price: f64) -> Self {
        Self {
            currency,
            exchange,
            balance,
            target: None,
            last: None,
            price,
        }
    }

    /// Builder-style helper that sets an initial target.
    pub fn with_target(mut self, target: f64) -> Self {
        self.set_target(target);
        self
    }

    pub fn key(&self) -> PositionKey {
        (self.currency.clone(), self.exchange.clone())
    }

    /// Current value in the reference currency.
    #[inline]
    pub fn value(&self) -> f64 {
        self.balance * self.price
    }

    /// Target value in the reference currency, if a target is set.
    pub fn target_value(&self) -> Option<f64> {
        self.target.map(|t| t * self.price)
    }

    /// Set a new target balance.
    ///
    /// Non-finite targets become 0 and tiny negative solver residue is
    /// clamped to 0, so the stored target is always finite and non-negative.
    pub fn set_target(&mut self, target: f64) {
        self.target = Some(if target.is_finite() { target.max(0.0) } else { 0.0 });
    }

    /// Mark the target as reached.
    pub fn clear_target(&mut self) {
        self.target = None;
    }
}

/// Per-currency aggregate over every exchange holding that currency.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AggregateCurrency {
    pub currency: Asset,
    pub balance: f64,
    pub value: f64,
    /// Weighted-average price across exchanges
    pub price: f64,
    /// Target share of the total portfolio value (0..=1)
    pub target_pct: f64,
    /// `target_pct` × total portfolio value
    pub target_value: f64,
    /// Value assigned by the accepted solution
    #[cfg_attr(feature = "serde", serde(default))]
    pub solved_value: Option<f64>,
    /// Share of the solved total assigned to this currency
    #[cfg_attr(feature = "serde", serde(default))]
    pub solved_pct: Option<f64>,
}

/// Current total value per exchange, in order of first appearance.
pub fn exchange_totals(positions: &[AssetPosition]) -> Vec<(ExchangeId, f64)> {
    let mut index: FxHashMap<&ExchangeId, usize> = FxHashMap::default();
    let mut totals: Vec<(ExchangeId, f64)> = Vec::new();
    for p in positions {
        match index.get(&p.exchange) {
            Some(&i) => totals[i].1 += p.value(),
            None => {
                index.insert(&p.exchange, totals.len());
                totals.push((p.exchange.clone(), p.value()));
            }
        }
    }
    totals
}

/// Total portfolio value across all positions.
pub fn total_value(positions: &[AssetPosition]) -> f64 {
    positions.iter().map(AssetPosition::value).sum()
}

/// A cube is balanced once every position's target has been cleared.
pub fn is_balanced(positions: &[AssetPosition]) -> bool {
    positions.iter().all(|p| p.target.is_none())
}
