//! Trading-pair catalog and per-pair trade constraints.
//!
//! The order generator never talks to an exchange: pair discovery, last
//! prices and minimum trade sizes come through [`PairCatalog`] and
//! [`ConstraintLookup`]. [`StaticCatalog`] implements both from an
//! in-memory listing (typically deserialized from a snapshot file).

use rust_decimal::Decimal;
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::types::{Asset, ExchangeId, PairId};

/// A base/quote market on one exchange.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TradingPair {
    pub id: PairId,
    pub exchange: ExchangeId,
    pub base: Asset,
    pub quote: Asset,
    #[cfg_attr(feature = "serde", serde(default = "default_active"))]
    pub active: bool,
}

#[cfg(feature = "serde")]
fn default_active() -> bool {
    true
}

impl TradingPair {
    pub fn new(id: u64, exchange: &str, base: &str, quote: &str) -> Self {
        Self {
            id: PairId(id),
            exchange: ExchangeId::new(exchange),
            base: Asset::new(base),
            quote: Asset::new(quote),
            active: true,
        }
    }
}

/// Exchange-imposed minimums for one pair.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TradeConstraints {
    /// Minimum order amount, in base units
    pub min_amount: Decimal,
    /// Minimum order value, in quote units
    pub min_value: Decimal,
}

impl TradeConstraints {
    pub fn new(min_amount: Decimal, min_value: Decimal) -> Self {
        Self {
            min_amount,
            min_value,
        }
    }

    /// Decimal places accepted for order amounts.
    ///
    /// Taken from the written form of a fractional `min_amount` (`0.001` → 3).
    /// A minimum of one unit or more means whole units (`Some(0)`). Returns
    /// `None` when the exchange reports no minimum.
    pub fn amount_precision(&self) -> Option<u32> {
        if self.min_amount <= Decimal::ZERO {
            None
        } else if self.min_amount >= Decimal::ONE {
            Some(0)
        } else {
            Some(self.min_amount.normalize().scale())
        }
    }
}

/// Pair discovery and pricing.
pub trait PairCatalog {
    /// Find the active pair trading `base` against `quote` on `exchange`.
    ///
    /// Returns the pair and whether it is inverted (listed as `quote/base`).
    fn find_pair(
        &self,
        exchange: &ExchangeId,
        base: &Asset,
        quote: &Asset,
    ) -> Result<(TradingPair, bool)>;

    /// All active pairs on `exchange` whose base currency is `base`.
    fn pairs_with_base(&self, exchange: &ExchangeId, base: &Asset) -> Vec<TradingPair>;

    /// Last traded price of `pair`, quoted in its quote currency.
    fn last_price(&self, pair: PairId) -> Option<f64>;

    /// Currencies used as a quote by any active pair on `exchange`.
    fn quote_currencies(&self, exchange: &ExchangeId) -> Vec<Asset>;
}

/// Minimum-size lookup. `None` means the pair has no known constraints.
pub trait ConstraintLookup {
    fn constraints(&self, pair: PairId) -> Option<TradeConstraints>;
}

/// One row of a static pair listing.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PairListing {
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub pair: TradingPair,
    #[cfg_attr(feature = "serde", serde(default))]
    pub price: Option<f64>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub constraints: Option<TradeConstraints>,
}

impl PairListing {
    pub fn new(pair: TradingPair, price: f64) -> Self {
        Self {
            pair,
            price: Some(price),
            constraints: None,
        }
    }

    pub fn with_constraints(mut self, min_amount: Decimal, min_value: Decimal) -> Self {
        self.constraints = Some(TradeConstraints::new(min_amount, min_value));
        self
    }
}

/// In-memory catalog backed by a pair listing.
#[derive(Clone, Debug, Default)]
pub struct StaticCatalog {
    listings: Vec<PairListing>,
    by_id: FxHashMap<PairId, usize>,
}

impl StaticCatalog {
    /// Build a catalog. Later listings with a duplicate id replace earlier ones.
    pub fn new(listings: Vec<PairListing>) -> Self {
        let mut catalog = Self::default();
        for listing in listings {
            catalog.insert(listing);
        }
        catalog
    }

    pub fn insert(&mut self, listing: PairListing) {
        match self.by_id.get(&listing.pair.id) {
            Some(&i) => self.listings[i] = listing,
            None => {
                self.by_id.insert(listing.pair.id, self.listings.len());
                self.listings.push(listing);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }

    pub fn get(&self, id: PairId) -> Option<&PairListing> {
        self.by_id.get(&id).map(|&i| &self.listings[i])
    }

    pub fn listings(&self) -> &[PairListing] {
        &self.listings
    }

    fn active_on<'a>(&'a self, exchange: &'a ExchangeId) -> impl Iterator<Item = &'a PairListing> {
        self.listings
            .iter()
            .filter(move |l| l.pair.active && &l.pair.exchange == exchange)
    }
}

impl PairCatalog for StaticCatalog {
    fn find_pair(
        &self,
        exchange: &ExchangeId,
        base: &Asset,
        quote: &Asset,
    ) -> Result<(TradingPair, bool)> {
        let mut inverted = None;
        for l in self.active_on(exchange) {
            if &l.pair.base == base && &l.pair.quote == quote {
                return Ok((l.pair.clone(), false));
            }
            if inverted.is_none() && &l.pair.base == quote && &l.pair.quote == base {
                inverted = Some(l.pair.clone());
            }
        }
        inverted
            .map(|pair| (pair, true))
            .ok_or_else(|| Error::PairNotSupported {
                exchange: exchange.clone(),
                base: base.clone(),
                quote: quote.clone(),
            })
    }

    fn pairs_with_base(&self, exchange: &ExchangeId, base: &Asset) -> Vec<TradingPair> {
        self.active_on(exchange)
            .filter(|l| &l.pair.base == base)
            .map(|l| l.pair.clone())
            .collect()
    }

    fn last_price(&self, pair: PairId) -> Option<f64> {
        self.get(pair)
            .and_then(|l| l.price)
            .filter(|p| p.is_finite() && *p > 0.0)
    }

    fn quote_currencies(&self, exchange: &ExchangeId) -> Vec<Asset> {
        let mut quotes: Vec<Asset> = Vec::new();
        for l in self.active_on(exchange) {
            if !quotes.contains(&l.pair.quote) {
                quotes.push(l.pair.quote.clone());
            }
        }
        quotes
    }
}

impl ConstraintLookup for StaticCatalog {
    fn constraints(&self, pair: PairId) -> Option<TradeConstraints> {
        self.get(pair).and_then(|l| l.constraints)
    }
}

/// A lookup that knows no constraints at all.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoConstraints;

impl ConstraintLookup for NoConstraints {
    fn constraints(&self, _pair: PairId) -> Option<TradeConstraints> {
        None
    }
}
