//! Error types for allocation solving and order generation.

use crate::types::{Asset, ExchangeId};

/// All errors surfaced by the allocation engine.
///
/// Solver failures and verification failures are not errors: they are
/// recovered by the regression fallback and only show up as
/// [`Error::NoSolution`] when every regime has been exhausted.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("infeasible allocation model: {0}")]
    Infeasible(String),

    #[error("no allocation satisfies the currency and exchange totals")]
    NoSolution,

    #[error("no active pair for {base}/{quote} on {exchange}")]
    PairNotSupported {
        exchange: ExchangeId,
        base: Asset,
        quote: Asset,
    },

    #[error("dimension mismatch: expected {expected} values, got {actual}")]
    Dimension { expected: usize, actual: usize },

    #[error("solver error: {0}")]
    Solver(String),

    #[error("allocation error: {0}")]
    Allocation(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let err = Error::PairNotSupported {
            exchange: ExchangeId::new("Kraken"),
            base: Asset::new("XMR"),
            quote: Asset::new("BTC"),
        };
        assert_eq!(err.to_string(), "no active pair for XMR/BTC on Kraken");

        let err = Error::Dimension {
            expected: 4,
            actual: 3,
        };
        assert!(err.to_string().contains("expected 4"));
    }

    #[test]
    fn is_error() {
        let err: Box<dyn std::error::Error> = Box::new(Error::NoSolution);
        assert!(err.to_string().contains("no allocation"));
    }
}
