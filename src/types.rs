//! Core identifiers: Asset, ExchangeId, PairId, and the fixed solver tolerances.

use std::fmt;

/// Absolute tolerance for exchange totals, global totals and transfer conservation.
pub const ABS_TOL: f64 = 0.01;

/// Relative tolerance for per-currency totals.
pub const CURRENCY_RTOL: f64 = 0.01;

/// Balances at or below this amount count as dust.
pub const DUST_AMOUNT: f64 = 9e-8;

/// Venues that hold funds but cannot be traded through an API.
pub const NON_TRADEABLE_VENUES: [&str; 2] = ["External", "Manual"];

/// Allowed deviation of a currency sum from its target value.
///
/// `max(0.01, 1% of target)`.
#[inline]
pub fn currency_tolerance(target: f64) -> f64 {
    ABS_TOL.max(CURRENCY_RTOL * target.abs())
}

/// Currency ticker (e.g., `BTC`, `ETH`).
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(transparent)
)]
pub struct Asset(String);

impl Asset {
    pub fn new(symbol: &str) -> Self {
        Self(symbol.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Asset {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Exchange (venue) name, e.g. `Binance` or `External`.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(transparent)
)]
pub struct ExchangeId(String);

impl ExchangeId {
    pub fn new(name: &str) -> Self {
        Self(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// False for venues where balances are tracked but orders cannot be placed.
    pub fn is_tradeable(&self) -> bool {
        !NON_TRADEABLE_VENUES.contains(&self.0.as_str())
    }
}

impl From<&str> for ExchangeId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trading pair identifier assigned by the pair catalog.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(transparent)
)]
pub struct PairId(pub u64);

impl fmt::Display for PairId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// A position key: one currency held on one exchange.
pub type PositionKey = (Asset, ExchangeId);
