//! Cube snapshot (snapshot.json) loading, validation and write-back.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use cube_rebalance::{
    Allocations, Asset, AssetPosition, PairListing, RawBalance, StaticCatalog, TradingPair,
};
use rust_decimal::Decimal;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One cube's balances, target allocation and tradable pairs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CubeSnapshot {
    pub cube_id: u64,
    pub timestamp: DateTime<Utc>,
    pub reference_currency: String,
    /// Overrides `[orders] threshold_pct` for this cube
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_pct: Option<f64>,
    pub balances: Vec<BalanceRecord>,
    /// Currency → target share (fractions summing to 1)
    pub allocations: BTreeMap<String, f64>,
    #[serde(default)]
    pub pairs: Vec<PairRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceRecord {
    pub currency: String,
    pub exchange: String,
    pub balance: f64,
    #[serde(default)]
    pub target: Option<f64>,
    #[serde(default)]
    pub last: Option<f64>,
    /// Spot price in the reference currency, used when no pair prices it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairRecord {
    pub id: u64,
    pub exchange: String,
    pub base: String,
    pub quote: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<Decimal>,
}

fn default_true() -> bool {
    true
}

impl CubeSnapshot {
    /// Load and validate a snapshot file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::SnapshotRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_json(&contents)
    }

    /// Parse from a JSON string (useful for testing).
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: CubeSnapshot = serde_json::from_str(json)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Validate the snapshot.
    fn validate(&self) -> Result<()> {
        if self.reference_currency.is_empty() {
            return Err(Error::Snapshot("reference currency is empty".into()));
        }
        if self.balances.is_empty() {
            return Err(Error::Snapshot("balances list is empty".into()));
        }

        let mut seen = FxHashSet::default();
        for b in &self.balances {
            if b.currency.is_empty() || b.exchange.is_empty() {
                return Err(Error::Snapshot("balance with empty currency or exchange".into()));
            }
            if !seen.insert((b.currency.as_str(), b.exchange.as_str())) {
                return Err(Error::Snapshot(format!(
                    "duplicate balance: {} on {}",
                    b.currency, b.exchange
                )));
            }
            if !b.balance.is_finite() || b.balance < 0.0 {
                return Err(Error::Snapshot(format!(
                    "balance for {} on {} must be finite and >= 0 (got {})",
                    b.currency, b.exchange, b.balance
                )));
            }
        }

        for (currency, pct) in &self.allocations {
            if !pct.is_finite() || *pct < 0.0 {
                return Err(Error::Snapshot(format!(
                    "allocation for {currency} must be finite and >= 0 (got {pct})"
                )));
            }
        }

        let mut ids = FxHashSet::default();
        for p in &self.pairs {
            if !ids.insert(p.id) {
                return Err(Error::Snapshot(format!("duplicate pair id: {}", p.id)));
            }
        }

        if let Some(t) = self.threshold_pct {
            if !t.is_finite() || t < 0.0 {
                return Err(Error::Snapshot(format!("threshold_pct must be >= 0 (got {t})")));
            }
        }
        Ok(())
    }

    pub fn reference(&self) -> Asset {
        Asset::new(&self.reference_currency)
    }

    /// Balances in the engine's input form.
    pub fn raw_balances(&self) -> Vec<RawBalance> {
        self.balances
            .iter()
            .map(|b| RawBalance {
                currency: Asset::new(&b.currency),
                exchange: b.exchange.as_str().into(),
                balance: b.balance,
                target: b.target,
                last: b.last,
                price: b.price,
            })
            .collect()
    }

    pub fn allocations(&self) -> Allocations {
        self.allocations
            .iter()
            .map(|(c, pct)| (Asset::new(c), *pct))
            .collect()
    }

    /// Pair catalog and constraint lookup built from `pairs`.
    ///
    /// A pair with only one of `min_amount` / `min_value` gets zero for the
    /// other.
    pub fn catalog(&self) -> StaticCatalog {
        StaticCatalog::new(
            self.pairs
                .iter()
                .map(|p| {
                    let mut pair = TradingPair::new(p.id, &p.exchange, &p.base, &p.quote);
                    pair.active = p.active;
                    let listing = PairListing {
                        pair,
                        price: p.price,
                        constraints: None,
                    };
                    if p.min_amount.is_none() && p.min_value.is_none() {
                        listing
                    } else {
                        listing.with_constraints(
                            p.min_amount.unwrap_or(Decimal::ZERO),
                            p.min_value.unwrap_or(Decimal::ZERO),
                        )
                    }
                })
                .collect(),
        )
    }

    /// Threshold for this cube, falling back to `default`.
    pub fn threshold_pct(&self, default: f64) -> f64 {
        self.threshold_pct.unwrap_or(default)
    }

    /// Copy targets from the position table back into the balance records.
    ///
    /// Records without a matching position (dust, unpriced) keep their
    /// target. Returns the number of records updated.
    pub fn apply_targets(&mut self, positions: &[AssetPosition]) -> usize {
        let mut updated = 0;
        for b in &mut self.balances {
            let found = positions
                .iter()
                .find(|p| p.currency.as_str() == b.currency && p.exchange.as_str() == b.exchange);
            if let Some(p) = found {
                b.target = p.target;
                updated += 1;
            }
        }
        updated
    }

    /// Write the snapshot as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| Error::OutputWrite {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cube_rebalance::{ConstraintLookup, PairCatalog, PairId};
    use rust_decimal_macros::dec;

    fn valid_json() -> &'static str {
        r#"{
            "cube_id": 7,
            "timestamp": "2026-02-08T15:30:00Z",
            "reference_currency": "BTC",
            "balances": [
                { "currency": "BTC", "exchange": "Kraken", "balance": 0.6 },
                { "currency": "ETH", "exchange": "Kraken", "balance": 8.0, "target": 9.0 },
                { "currency": "DOGE", "exchange": "External", "balance": 100.0, "price": 0.000002 }
            ],
            "allocations": { "BTC": 0.5, "ETH": 0.5 },
            "pairs": [
                { "id": 1, "exchange": "Kraken", "base": "ETH", "quote": "BTC", "price": 0.05,
                  "min_amount": "0.01", "min_value": "0.0001" },
                { "id": 2, "exchange": "Kraken", "base": "BTC", "quote": "USDT", "price": 40000.0,
                  "active": false }
            ]
        }"#
    }

    #[test]
    fn parse_valid_snapshot() {
        let s = CubeSnapshot::from_json(valid_json()).unwrap();
        assert_eq!(s.cube_id, 7);
        assert_eq!(s.reference(), Asset::new("BTC"));
        assert_eq!(s.balances.len(), 3);
        assert_eq!(s.balances[1].target, Some(9.0));
        assert_eq!(s.balances[2].price, Some(0.000002));
        assert_eq!(s.threshold_pct(1.0), 1.0);
    }

    #[test]
    fn conversions() {
        let s = CubeSnapshot::from_json(valid_json()).unwrap();
        let raw = s.raw_balances();
        assert_eq!(raw.len(), 3);
        assert_eq!(raw[1].target, Some(9.0));

        let allocations = s.allocations();
        assert_eq!(allocations.get(&Asset::new("ETH")), Some(&0.5));

        let catalog = s.catalog();
        assert_eq!(catalog.len(), 2);
        let k = catalog.constraints(PairId(1)).unwrap();
        assert_eq!(k.min_amount, dec!(0.01));
        assert!(catalog.constraints(PairId(2)).is_none());
        // inactive pair is not offered
        assert!(
            catalog
                .find_pair(&"Kraken".into(), &"USDT".into(), &"BTC".into())
                .is_err()
        );
    }

    #[test]
    fn reject_empty_balances() {
        let json = r#"{"cube_id":1,"timestamp":"2026-01-01T00:00:00Z","reference_currency":"BTC",
            "balances":[],"allocations":{"BTC":1.0}}"#;
        assert!(matches!(CubeSnapshot::from_json(json), Err(Error::Snapshot(_))));
    }

    #[test]
    fn reject_duplicate_balance() {
        let json = r#"{"cube_id":1,"timestamp":"2026-01-01T00:00:00Z","reference_currency":"BTC",
            "balances":[
                {"currency":"BTC","exchange":"Kraken","balance":1.0},
                {"currency":"BTC","exchange":"Kraken","balance":2.0}
            ],"allocations":{"BTC":1.0}}"#;
        assert!(CubeSnapshot::from_json(json).is_err());
    }

    #[test]
    fn reject_negative_balance_and_allocation() {
        let json = r#"{"cube_id":1,"timestamp":"2026-01-01T00:00:00Z","reference_currency":"BTC",
            "balances":[{"currency":"BTC","exchange":"Kraken","balance":-1.0}],
            "allocations":{"BTC":1.0}}"#;
        assert!(CubeSnapshot::from_json(json).is_err());

        let json = r#"{"cube_id":1,"timestamp":"2026-01-01T00:00:00Z","reference_currency":"BTC",
            "balances":[{"currency":"BTC","exchange":"Kraken","balance":1.0}],
            "allocations":{"BTC":-0.5}}"#;
        assert!(CubeSnapshot::from_json(json).is_err());
    }

    #[test]
    fn reject_duplicate_pair_id() {
        let json = r#"{"cube_id":1,"timestamp":"2026-01-01T00:00:00Z","reference_currency":"BTC",
            "balances":[{"currency":"BTC","exchange":"Kraken","balance":1.0}],
            "allocations":{"BTC":1.0},
            "pairs":[
                {"id":1,"exchange":"Kraken","base":"ETH","quote":"BTC"},
                {"id":1,"exchange":"Kraken","base":"XRP","quote":"BTC"}
            ]}"#;
        assert!(CubeSnapshot::from_json(json).is_err());
    }

    #[test]
    fn reject_malformed_json() {
        assert!(matches!(
            CubeSnapshot::from_json("{not json"),
            Err(Error::SnapshotJson(_))
        ));
    }

    #[test]
    fn apply_targets_and_save() {
        let mut s = CubeSnapshot::from_json(valid_json()).unwrap();
        let positions = vec![
            AssetPosition::new("BTC".into(), "Kraken".into(), 0.6, 1.0).with_target(0.5),
            AssetPosition::new("ETH".into(), "Kraken".into(), 8.0, 0.05),
        ];
        assert_eq!(s.apply_targets(&positions), 2);
        assert_eq!(s.balances[0].target, Some(0.5));
        assert_eq!(s.balances[1].target, None);
        // untouched: not in the position table
        assert_eq!(s.balances[2].target, None);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        s.save(&path).unwrap();
        let back = CubeSnapshot::load(&path).unwrap();
        assert_eq!(back.balances, s.balances);
        assert_eq!(back.pairs, s.pairs);
    }
}
