//! Inter-exchange transfer planning for pool-wide allocations.
//!
//! Each exchange's delta is its current total minus its solved total.
//! Surpluses are matched against deficits greedily, largest first, which
//! emits at most `surpluses + deficits − 1` transfers.

use std::cmp::Ordering;

use log::debug;
use rustc_hash::FxHashMap;

use crate::position::AssetPosition;
use crate::solution::Solution;
use crate::types::{ABS_TOL, Asset, ExchangeId};

/// Deltas at or below this magnitude are treated as settled.
const SETTLED: f64 = 1e-9;

/// Move `amount` of reference-currency value from `source` to `destination`.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Transfer {
    pub source: ExchangeId,
    pub destination: ExchangeId,
    pub amount: f64,
}

/// Value leaving (sell) or arriving at (buy) one position.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TransferLeg {
    pub currency: Asset,
    pub exchange: ExchangeId,
    /// Reference-currency value, always positive
    pub value: f64,
    /// Same amount in units of `currency`
    pub balance: f64,
}

/// Transfers plus the per-position legs around them.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TransferPlan {
    pub transfers: Vec<Transfer>,
    /// Positions to sell down before transferring
    pub sells: Vec<TransferLeg>,
    /// Positions to buy into after the transfers land
    pub buys: Vec<TransferLeg>,
}

impl TransferPlan {
    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.transfers.iter().map(|t| t.amount).sum()
    }
}

/// Current minus solved total per exchange, in order of first appearance.
pub fn exchange_deltas(positions: &[AssetPosition], solution: &Solution) -> Vec<(ExchangeId, f64)> {
    let mut slot: FxHashMap<&ExchangeId, usize> = FxHashMap::default();
    let mut deltas: Vec<(ExchangeId, f64)> = Vec::new();
    for p in positions {
        let solved = solution.value(&p.currency, &p.exchange).unwrap_or(0.0);
        let i = *slot.entry(&p.exchange).or_insert_with(|| {
            deltas.push((p.exchange.clone(), 0.0));
            deltas.len() - 1
        });
        deltas[i].1 += p.value() - solved;
    }
    deltas
}

/// Greedily match surplus exchanges (delta > 0) with deficit exchanges.
///
/// Both sides are sorted by magnitude descending, ties broken by exchange id
/// ascending. Each step pairs the largest open surplus with the largest open
/// deficit and moves the smaller of the two.
///
/// # Panics
///
/// If surpluses and deficits differ by more than 0.01. That means the
/// solution did not preserve the global total.
pub fn match_transfers(deltas: &[(ExchangeId, f64)]) -> Vec<Transfer> {
    let mut surplus: Vec<(ExchangeId, f64)> = deltas
        .iter()
        .filter(|(_, d)| *d > SETTLED)
        .map(|(e, d)| (e.clone(), *d))
        .collect();
    let mut deficit: Vec<(ExchangeId, f64)> = deltas
        .iter()
        .filter(|(_, d)| *d < -SETTLED)
        .map(|(e, d)| (e.clone(), -d))
        .collect();
    surplus.sort_by(by_magnitude_then_id);
    deficit.sort_by(by_magnitude_then_id);

    let total_surplus: f64 = surplus.iter().map(|(_, d)| d).sum();
    let total_deficit: f64 = deficit.iter().map(|(_, d)| d).sum();
    assert!(
        (total_surplus - total_deficit).abs() <= ABS_TOL,
        "transfer imbalance: surplus {total_surplus} vs deficit {total_deficit}"
    );

    let mut transfers = Vec::with_capacity((surplus.len() + deficit.len()).saturating_sub(1));
    let (mut i, mut j) = (0, 0);
    while i < surplus.len() && j < deficit.len() {
        let amount = surplus[i].1.min(deficit[j].1);
        if amount > SETTLED {
            transfers.push(Transfer {
                source: surplus[i].0.clone(),
                destination: deficit[j].0.clone(),
                amount,
            });
        }
        surplus[i].1 -= amount;
        deficit[j].1 -= amount;
        if surplus[i].1 <= SETTLED {
            i += 1;
        }
        if deficit[j].1 <= SETTLED {
            j += 1;
        }
    }
    transfers
}

fn by_magnitude_then_id(a: &(ExchangeId, f64), b: &(ExchangeId, f64)) -> Ordering {
    b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0))
}

/// Transfers and sell/buy legs that move `positions` to `solution`.
pub fn plan_transfers(positions: &[AssetPosition], solution: &Solution) -> TransferPlan {
    let transfers = match_transfers(&exchange_deltas(positions, solution));

    let mut sells = Vec::new();
    let mut buys = Vec::new();
    for p in positions {
        let Some(solved) = solution.value(&p.currency, &p.exchange) else {
            continue;
        };
        let diff = p.value() - solved;
        if diff.abs() <= SETTLED {
            continue;
        }
        let balance = if p.price > 0.0 { diff.abs() / p.price } else { 0.0 };
        let leg = TransferLeg {
            currency: p.currency.clone(),
            exchange: p.exchange.clone(),
            value: diff.abs(),
            balance,
        };
        if diff > 0.0 {
            sells.push(leg);
        } else {
            buys.push(leg);
        }
    }

    debug!(
        "{} transfers moving {:.8} ({} sell legs, {} buy legs)",
        transfers.len(),
        transfers.iter().map(|t| t.amount).sum::<f64>(),
        sells.len(),
        buys.len()
    );
    TransferPlan {
        transfers,
        sells,
        buys,
    }
}
