//! Order generation: turn committed targets into exchange-ready order intents.
//!
//! Positions are visited by value surplus, largest first, so sells are
//! generated before the buys they fund. Two passes run over that order:
//!
//! 1. **Secondary pairs.** A surplus in one currency is netted directly
//!    against an opposite imbalance in a non-reference quote currency on the
//!    same exchange, saving a round trip through the reference currency.
//! 2. **Primary pairs.** Whatever remains is traded against the reference
//!    currency, possibly through an inverted pair.
//!
//! Every order is checked against the exchange minimums and the rebalance
//! threshold, throttled to the balance actually available, and truncated to
//! the exchange's precision.

use std::fmt;

use log::{debug, info, warn};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rustc_hash::FxHashMap;

use crate::catalog::{ConstraintLookup, PairCatalog, TradingPair};
use crate::position::{AssetPosition, is_balanced};
use crate::side::Side;
use crate::types::{Asset, ExchangeId, PositionKey};

/// Decimal places for prices, and for amounts without a known precision.
pub const DEFAULT_PRECISION: u32 = 8;

/// Share of an inverted order's amount kept as a fee cushion.
pub const INVERTED_AMOUNT_FACTOR: f64 = 0.99;

/// A limit order ready for the execution layer.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OrderIntent {
    pub pair: crate::types::PairId,
    pub side: Side,
    /// Base-currency amount, truncated to the exchange precision
    pub amount: Decimal,
    /// Quote per base, truncated to 8 decimals
    pub price: Decimal,
}

impl fmt::Display for OrderIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} @ {} ({})", self.side, self.amount, self.price, self.pair)
    }
}

/// Why a position's target was cleared without an order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum ClearReason {
    /// The reference currency balances passively through the other trades
    ReferenceCurrency,
    /// Held on a venue that cannot be traded
    NonTradeable,
    /// Balance already equals the target
    AtTarget,
    /// Order would fall under the exchange minimum amount or value
    BelowMinimum,
    /// Deviation smaller than the rebalance threshold
    BelowThreshold,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClearedTarget {
    pub currency: Asset,
    pub exchange: ExchangeId,
    pub reason: ClearReason,
}

/// Result of one order-generation pass.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OrderBatch {
    pub orders: Vec<OrderIntent>,
    pub cleared: Vec<ClearedTarget>,
    /// Every position's target has been cleared
    pub balanced: bool,
}

/// Running imbalance of one position with a target.
#[derive(Clone, Copy, Debug)]
struct Imbalance {
    position: usize,
    bal_diff: f64,
    val_diff: f64,
    val_diff_pct: f64,
    /// Netted by a secondary-pair order
    netted: bool,
}

enum Outcome {
    Placed(OrderIntent),
    Cleared(ClearReason),
    Dropped,
}

/// Generate orders moving `positions` toward their targets.
///
/// Clears the targets of positions that are reached, untradeable or too small
/// to trade. `threshold_pct` is in percent (1.0 = 1 %).
pub fn generate_orders<C, L>(
    positions: &mut [AssetPosition],
    reference: &Asset,
    catalog: &C,
    limits: &L,
    threshold_pct: f64,
) -> OrderBatch
where
    C: PairCatalog,
    L: ConstraintLookup,
{
    let mut generator = Generator::new(positions, reference, catalog, limits, threshold_pct);
    generator.secondary_pairs();
    generator.primary_pairs();
    generator.finish()
}

struct Generator<'a, C, L> {
    positions: &'a mut [AssetPosition],
    reference: &'a Asset,
    catalog: &'a C,
    limits: &'a L,
    threshold: f64,
    index: FxHashMap<PositionKey, usize>,
    /// Visit order: targets by `val_diff` descending, then positions without one
    visit: Vec<usize>,
    imbalance: Vec<Option<Imbalance>>,
    batch: OrderBatch,
}

impl<'a, C: PairCatalog, L: ConstraintLookup> Generator<'a, C, L> {
    fn new(
        positions: &'a mut [AssetPosition],
        reference: &'a Asset,
        catalog: &'a C,
        limits: &'a L,
        threshold_pct: f64,
    ) -> Self {
        let index = positions
            .iter()
            .enumerate()
            .map(|(i, p)| (p.key(), i))
            .collect();
        let imbalance: Vec<Option<Imbalance>> = positions
            .iter()
            .enumerate()
            .map(|(i, p)| {
                p.target.map(|target| {
                    let value = p.value();
                    let val_diff = value - target * p.price;
                    Imbalance {
                        position: i,
                        bal_diff: p.balance - target,
                        val_diff,
                        val_diff_pct: val_diff / value,
                        netted: false,
                    }
                })
            })
            .collect();

        let mut visit: Vec<usize> = (0..positions.len()).collect();
        visit.sort_by(|&a, &b| match (&imbalance[a], &imbalance[b]) {
            (Some(x), Some(y)) => y.val_diff.total_cmp(&x.val_diff),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });

        Self {
            positions,
            reference,
            catalog,
            limits,
            threshold: threshold_pct / 100.0,
            index,
            visit,
            imbalance,
            batch: OrderBatch::default(),
        }
    }

    /// Skip checks shared by both passes. Returns true when the position is
    /// not traded in this pass.
    fn failsafe(&mut self, i: usize) -> bool {
        let p = &self.positions[i];
        if &p.currency == self.reference {
            debug!("{} {} balanced via other currencies", p.exchange, p.currency);
            if p.target.is_some() {
                self.clear(i, ClearReason::ReferenceCurrency);
            }
            return true;
        }
        if p.target.is_none() {
            return true;
        }
        if !p.exchange.is_tradeable() {
            warn!("resetting balance target for {} {}", p.exchange, p.currency);
            self.clear(i, ClearReason::NonTradeable);
            return true;
        }
        false
    }

    fn clear(&mut self, i: usize, reason: ClearReason) {
        let p = &mut self.positions[i];
        p.clear_target();
        self.imbalance[i] = None;
        self.batch.cleared.push(ClearedTarget {
            currency: p.currency.clone(),
            exchange: p.exchange.clone(),
            reason,
        });
    }

    fn secondary_pairs(&mut self) {
        debug!("running secondary pairs");
        for v in 0..self.visit.len() {
            let i = self.visit[v];
            if self.failsafe(i) {
                continue;
            }
            let Some(row) = self.imbalance[i] else {
                continue;
            };
            if row.val_diff == 0.0 {
                continue;
            }

            let (exchange, currency) = {
                let p = &self.positions[i];
                (p.exchange.clone(), p.currency.clone())
            };
            for pair in self.catalog.pairs_with_base(&exchange, &currency) {
                if &pair.quote == self.reference {
                    continue;
                }
                let Some(&q) = self.index.get(&(pair.quote.clone(), exchange.clone())) else {
                    continue;
                };
                let Some(quote) = self.imbalance[q] else {
                    continue;
                };
                // Only net against an opposite imbalance at least as large.
                if quote.val_diff * row.val_diff >= 0.0 || quote.val_diff.abs() < row.val_diff.abs()
                {
                    continue;
                }
                let Some(price) = self.catalog.last_price(pair.id) else {
                    warn!("no last price for {} {}/{}", exchange, pair.base, pair.quote);
                    continue;
                };
                if self.create_order(i, &pair, price, false) {
                    debug!("secondary order created for {}/{}", pair.base, pair.quote);
                    let quote_price = self.positions[q].price;
                    if let Some(qr) = self.imbalance[q].as_mut() {
                        qr.val_diff += row.val_diff;
                        if quote_price > 0.0 {
                            qr.bal_diff += row.val_diff / quote_price;
                        }
                    }
                    if let Some(r) = self.imbalance[i].as_mut() {
                        r.bal_diff = 0.0;
                        r.val_diff = 0.0;
                        r.netted = true;
                    }
                    break;
                }
                if self.imbalance[i].is_none() {
                    break;
                }
            }
        }
    }

    fn primary_pairs(&mut self) {
        debug!("running primary pairs");
        for v in 0..self.visit.len() {
            let i = self.visit[v];
            if self.failsafe(i) {
                continue;
            }
            match self.imbalance[i] {
                Some(row) if !row.netted => {}
                _ => continue,
            }

            let p = &self.positions[i];
            let price = p.price;
            let found = self
                .catalog
                .find_pair(&p.exchange, &p.currency, self.reference);
            let (pair, inverted) = match found {
                Ok(found) => found,
                Err(e) => {
                    warn!("skipping {} on {}: {e}", p.currency, p.exchange);
                    continue;
                }
            };
            if self.create_order(i, &pair, price, inverted) {
                debug!("primary order created for {}/{}", pair.base, pair.quote);
            }
        }
    }

    /// Build, check, throttle and truncate one order for position `i`.
    /// Returns true when an order was emitted.
    fn create_order(&mut self, i: usize, pair: &TradingPair, price: f64, inverted: bool) -> bool {
        match self.order_for(i, pair, price, inverted) {
            Outcome::Placed(order) => {
                info!("{} {}", pair.exchange, order);
                self.batch.orders.push(order);
                true
            }
            Outcome::Cleared(reason) => {
                debug!(
                    "{} {} reached target ({reason:?})",
                    self.positions[i].exchange, self.positions[i].currency
                );
                self.clear(i, reason);
                false
            }
            Outcome::Dropped => false,
        }
    }

    fn order_for(&self, i: usize, pair: &TradingPair, price: f64, inverted: bool) -> Outcome {
        let Some(row) = self.imbalance[i] else {
            return Outcome::Dropped;
        };
        let target = self.positions[i].target.unwrap_or(0.0);
        if row.bal_diff == 0.0 {
            return Outcome::Cleared(ClearReason::AtTarget);
        }

        let mut side = Side::from_balance_diff(row.bal_diff);
        let mut amount = row.bal_diff.abs();
        let mut value = amount * price;
        let mut price = price;
        if inverted {
            debug!("flipping order data for {}/{}", pair.base, pair.quote);
            side = side.opposite();
            std::mem::swap(&mut amount, &mut value);
            price = 1.0 / price;
            amount *= INVERTED_AMOUNT_FACTOR;
        }
        if !amount.is_finite() || !price.is_finite() || price <= 0.0 {
            warn!(
                "unusable order data for {}/{}: amount {amount}, price {price}",
                pair.base, pair.quote
            );
            return Outcome::Dropped;
        }

        let constraints = self.limits.constraints(pair.id);
        if let Some(k) = constraints {
            let below_amount = Decimal::from_f64(amount).is_some_and(|a| a < k.min_amount);
            let below_value = Decimal::from_f64(value).is_some_and(|v| v < k.min_value);
            if below_amount || below_value {
                return Outcome::Cleared(ClearReason::BelowMinimum);
            }
        }
        if target != 0.0 && row.val_diff_pct.abs() < self.threshold {
            info!(
                "{} {} below threshold",
                self.positions[i].exchange, self.positions[i].currency
            );
            return Outcome::Cleared(ClearReason::BelowThreshold);
        }

        // Throttle to what the exchange balance can cover.
        match side {
            Side::Sell => {
                let available = self.balance_of(&pair.base, &pair.exchange);
                if amount > available {
                    amount = available;
                    debug!("reducing {}/{} sell to {amount} {}", pair.base, pair.quote, pair.base);
                }
            }
            Side::Buy => {
                let available = self.balance_of(&pair.quote, &pair.exchange);
                if amount * price > available {
                    amount = available / price;
                    debug!("reducing {}/{} buy to {amount} {}", pair.base, pair.quote, pair.base);
                }
            }
        }

        let precision = match constraints.and_then(|k| k.amount_precision()) {
            Some(0) if amount < 1.0 => DEFAULT_PRECISION,
            Some(dp) => dp,
            None => DEFAULT_PRECISION,
        };
        let (Some(amount), Some(price)) = (
            truncate(amount, precision),
            truncate(price, DEFAULT_PRECISION),
        ) else {
            return Outcome::Dropped;
        };
        if amount <= Decimal::ZERO || price <= Decimal::ZERO {
            debug!("dropping empty {}/{} order", pair.base, pair.quote);
            return Outcome::Dropped;
        }
        Outcome::Placed(OrderIntent {
            pair: pair.id,
            side,
            amount,
            price,
        })
    }

    fn balance_of(&self, currency: &Asset, exchange: &ExchangeId) -> f64 {
        self.index
            .get(&(currency.clone(), exchange.clone()))
            .map_or(0.0, |&i| self.positions[i].balance.max(0.0))
    }

    fn finish(mut self) -> OrderBatch {
        self.batch.balanced = is_balanced(self.positions);
        if self.batch.balanced {
            info!("cube balanced");
        }
        self.batch
    }
}

/// Truncate toward zero at `dp` decimal places.
fn truncate(value: f64, dp: u32) -> Option<Decimal> {
    Decimal::from_f64(value).map(|d| d.round_dp_with_strategy(dp, RoundingStrategy::ToZero))
}
