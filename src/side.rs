//! Order side: Buy or Sell

use std::fmt;

/// Side of an order intent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Sell when holding more than the target, buy otherwise.
    #[inline]
    pub fn from_balance_diff(bal_diff: f64) -> Self {
        if bal_diff > 0.0 { Side::Sell } else { Side::Buy }
    }

    /// Returns the opposite side.
    #[inline]
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opposite_is_involution() {
        assert_eq!(Side::Buy.opposite().opposite(), Side::Buy);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }

    #[test]
    fn side_from_balance_diff() {
        assert_eq!(Side::from_balance_diff(1.5), Side::Sell);
        assert_eq!(Side::from_balance_diff(-0.2), Side::Buy);
        assert_eq!(Side::from_balance_diff(0.0), Side::Buy);
    }

    #[test]
    fn display() {
        assert_eq!(format!("{}", Side::Buy), "buy");
        assert_eq!(format!("{}", Side::Sell), "sell");
    }
}
