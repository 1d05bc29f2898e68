//! Preparation of a rebalance pass: allocation sanity check, position table
//! and per-currency aggregates.

use log::{debug, warn};
use rustc_hash::FxHashMap;

use crate::catalog::PairCatalog;
use crate::error::{Error, Result};
use crate::position::{AggregateCurrency, AssetPosition};
use crate::types::{Asset, DUST_AMOUNT, ExchangeId};

/// Target allocation percentages (fractions of 1) keyed by currency.
pub type Allocations = FxHashMap<Asset, f64>;

/// A balance as reported before pricing.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RawBalance {
    pub currency: Asset,
    pub exchange: ExchangeId,
    pub balance: f64,
    #[cfg_attr(feature = "serde", serde(default))]
    pub target: Option<f64>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub last: Option<f64>,
    /// Fallback price in the reference currency, used when no pair quotes one
    #[cfg_attr(feature = "serde", serde(default))]
    pub price: Option<f64>,
}

impl RawBalance {
    pub fn new(currency: &str, exchange: &str, balance: f64) -> Self {
        Self {
            currency: Asset::new(currency),
            exchange: ExchangeId::new(exchange),
            balance,
            target: None,
            last: None,
            price: None,
        }
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }
}

/// Validate and normalize allocations before solving.
///
/// * no allocation at all → error
/// * percentages off from 1 by more than `count × 0.0001` → normalized
/// * zero total balance → error
/// * held currencies without an allocation get an explicit 0
pub fn sanity_check(allocations: &mut Allocations, balances: &[RawBalance]) -> Result<()> {
    let mut total = 0.0;
    let mut count = 0usize;
    for pct in allocations.values() {
        if !pct.is_finite() || *pct < 0.0 {
            return Err(Error::Allocation(format!("invalid percentage {pct}")));
        }
        total += pct;
        count += 1;
    }
    if total == 0.0 {
        return Err(Error::Allocation("no allocations set".into()));
    }
    if (total - 1.0).abs() > count as f64 * 0.0001 {
        warn!("allocations total {total:.6}, normalizing");
        for pct in allocations.values_mut() {
            *pct /= total;
        }
    } else {
        debug!("allocations total {total:.6}");
    }

    let balance_total: f64 = balances.iter().map(|b| b.balance).sum();
    if balance_total == 0.0 {
        return Err(Error::Allocation("zero total balance".into()));
    }

    for b in balances {
        if !allocations.contains_key(&b.currency) {
            warn!("missing {} allocation, setting to 0", b.currency);
            allocations.insert(b.currency.clone(), 0.0);
        }
    }
    Ok(())
}

/// Price every balance in the reference currency and build the position table.
///
/// The reference currency is priced at 1. Other currencies are priced through
/// their pair against the reference currency on the same exchange (the
/// reciprocal when the pair is inverted), falling back to the balance's own
/// price. Unallocated dust that is not a quote currency, dust on non-tradeable
/// venues, and balances without any usable price are dropped. The result is
/// sorted by (currency, exchange).
pub fn build_positions<C: PairCatalog>(
    balances: &[RawBalance],
    allocations: &Allocations,
    reference: &Asset,
    catalog: &C,
) -> Vec<AssetPosition> {
    let mut quotes: FxHashMap<&ExchangeId, Vec<Asset>> = FxHashMap::default();
    let mut positions = Vec::with_capacity(balances.len());

    for b in balances {
        let price = if &b.currency == reference {
            1.0
        } else {
            let dust = b.balance <= DUST_AMOUNT;
            let allocated = allocations.get(&b.currency).copied().unwrap_or(0.0) > 0.0;
            if dust && !allocated {
                let ex_quotes = quotes
                    .entry(&b.exchange)
                    .or_insert_with(|| catalog.quote_currencies(&b.exchange));
                if !ex_quotes.contains(&b.currency) {
                    continue;
                }
                debug!(
                    "keeping unallocated zero balance {} on {} (quote currency)",
                    b.currency, b.exchange
                );
            }
            if dust && !b.exchange.is_tradeable() {
                debug!("ignoring {} zero balance {}", b.exchange, b.currency);
                continue;
            }
            match reference_price(b, reference, catalog) {
                Some(p) => p,
                None => {
                    warn!(
                        "ignoring {} {} balance on {} (no price in {})",
                        b.balance, b.currency, b.exchange, reference
                    );
                    continue;
                }
            }
        };

        positions.push(AssetPosition {
            currency: b.currency.clone(),
            exchange: b.exchange.clone(),
            balance: b.balance,
            target: b.target.filter(|t| t.is_finite() && *t >= 0.0),
            last: b.last,
            price,
        });
    }

    positions.sort_by(|a, b| {
        a.currency
            .cmp(&b.currency)
            .then_with(|| a.exchange.cmp(&b.exchange))
    });
    positions
}

fn reference_price<C: PairCatalog>(b: &RawBalance, reference: &Asset, catalog: &C) -> Option<f64> {
    let from_pair = match catalog.find_pair(&b.exchange, &b.currency, reference) {
        Ok((pair, inverted)) => catalog
            .last_price(pair.id)
            .map(|p| if inverted { 1.0 / p } else { p }),
        Err(e) => {
            debug!("{e}");
            None
        }
    };
    from_pair
        .or(b.price)
        .filter(|p| p.is_finite() && *p > 0.0)
}

/// Aggregate positions per currency.
///
/// Currencies without a finite price are dropped and the remaining target
/// percentages are renormalized to sum to 1. `target_value` is the
/// percentage of the total value of the retained currencies.
pub fn aggregate(
    positions: &[AssetPosition],
    allocations: &Allocations,
) -> Result<Vec<AggregateCurrency>> {
    struct Acc {
        balance: f64,
        value: f64,
        price_sum: f64,
        count: usize,
    }

    let mut order: Vec<&Asset> = Vec::new();
    let mut accs: FxHashMap<&Asset, Acc> = FxHashMap::default();
    for p in positions {
        let acc = accs.entry(&p.currency).or_insert_with(|| {
            order.push(&p.currency);
            Acc {
                balance: 0.0,
                value: 0.0,
                price_sum: 0.0,
                count: 0,
            }
        });
        acc.balance += p.balance;
        acc.value += p.value();
        acc.price_sum += p.price;
        acc.count += 1;
    }
    order.sort();

    let mut aggregates = Vec::with_capacity(order.len());
    for currency in order {
        let acc = &accs[currency];
        let price = if acc.balance > 0.0 {
            acc.value / acc.balance
        } else {
            acc.price_sum / acc.count as f64
        };
        if !price.is_finite() {
            warn!("ignoring {currency}: missing price");
            continue;
        }
        aggregates.push(AggregateCurrency {
            currency: currency.clone(),
            balance: acc.balance,
            value: acc.value,
            price,
            target_pct: allocations.get(currency).copied().unwrap_or(0.0),
            target_value: 0.0,
            solved_value: None,
            solved_pct: None,
        });
    }

    for (currency, pct) in allocations {
        if *pct > 0.0 && !aggregates.iter().any(|a| &a.currency == currency) {
            warn!("allocated currency {currency} has no priced balance");
        }
    }

    let pct_total: f64 = aggregates.iter().map(|a| a.target_pct).sum();
    if pct_total <= 0.0 || !pct_total.is_finite() {
        return Err(Error::Allocation(
            "allocations cover no priced currency".into(),
        ));
    }
    let total_value: f64 = aggregates.iter().map(|a| a.value).sum();
    for a in &mut aggregates {
        a.target_pct /= pct_total;
        a.target_value = total_value * a.target_pct;
    }
    Ok(aggregates)
}
